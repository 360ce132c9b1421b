//! File-tree provider for the text collection.
//!
//! Paths handed in from URLs are `/`-separated and relative to the library
//! root. They are normalized lexically before touching the filesystem, and any
//! path that climbs out of the root is rejected.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

pub const DOCUMENT_EXTENSION: &str = "htm";

#[derive(Debug)]
pub enum LibraryError {
    InvalidPath(String),
    NotFound(String),
    Io(io::Error),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::InvalidPath(path) => write!(f, "invalid path: {path:?}"),
            LibraryError::NotFound(path) => write!(f, "not found: {path:?}"),
            LibraryError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LibraryError {
    fn from(value: io::Error) -> Self {
        LibraryError::Io(value)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub children: Vec<FileNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Document,
}

/// Source of documents and listings, addressed by root-relative paths.
pub trait DocumentSource: Send + Sync {
    fn resolve(&self, relative: &str) -> Result<EntryKind, LibraryError>;

    fn listing(&self, relative: &str) -> Result<FileNode, LibraryError>;

    fn read_document(&self, relative: &str) -> Result<String, LibraryError>;

    /// Modification time used to validate cached renders.
    fn modified(&self, relative: &str) -> Option<SystemTime>;
}

/// Documents stored in a directory on disk.
#[derive(Debug, Clone)]
pub struct FsLibrary {
    root: PathBuf,
}

impl FsLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, relative: &str) -> Result<(PathBuf, String), LibraryError> {
        let cleaned = normalize_relative(relative)?;
        let mut full = self.root.clone();
        for segment in cleaned.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        Ok((full, cleaned))
    }
}

impl DocumentSource for FsLibrary {
    fn resolve(&self, relative: &str) -> Result<EntryKind, LibraryError> {
        let (full, cleaned) = self.full_path(relative)?;
        match fs::metadata(&full) {
            Ok(meta) if meta.is_dir() => Ok(EntryKind::Directory),
            Ok(_) => Ok(EntryKind::Document),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(LibraryError::NotFound(cleaned))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn listing(&self, relative: &str) -> Result<FileNode, LibraryError> {
        let (full, cleaned) = self.full_path(relative)?;
        if !full.is_dir() {
            return Err(LibraryError::NotFound(cleaned));
        }
        Ok(build_file_tree(&full, &cleaned))
    }

    fn read_document(&self, relative: &str) -> Result<String, LibraryError> {
        let (full, cleaned) = self.full_path(relative)?;
        match fs::read_to_string(&full) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(LibraryError::NotFound(cleaned))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn modified(&self, relative: &str) -> Option<SystemTime> {
        let (full, _) = self.full_path(relative).ok()?;
        fs::metadata(full).and_then(|meta| meta.modified()).ok()
    }
}

/// Collapses `.` and `..` segments, rejecting anything that leaves the root.
pub fn normalize_relative(relative: &str) -> Result<String, LibraryError> {
    let mut segments: Vec<&str> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| LibraryError::InvalidPath(relative.to_string()))?;
                segments.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(LibraryError::InvalidPath(relative.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LibraryError::InvalidPath(relative.to_string()));
            }
        }
    }
    Ok(segments.join("/"))
}

/// Lists the immediate children of `dir`: subdirectories first, then
/// documents, each group sorted by name.
pub fn build_file_tree(dir: &Path, relative: &str) -> FileNode {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| relative.to_string());
    let mut root = FileNode {
        name,
        path: relative.to_string(),
        is_dir: true,
        children: Vec::new(),
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, dir = %dir.display(), "failed to read library directory");
            return root;
        }
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let entry_name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let child = FileNode {
            path: join_relative(relative, &entry_name),
            name: entry_name,
            is_dir,
            children: Vec::new(),
        };
        if is_dir {
            dirs.push(child);
        } else if is_document_name(&child.name) {
            files.push(child);
        }
    }
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(
        dir = %dir.display(),
        dirs = dirs.len(),
        files = files.len(),
        "listed library directory"
    );

    root.children = dirs;
    root.children.append(&mut files);
    root
}

pub fn is_document_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

fn join_relative(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

pub fn breadcrumbs(path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = Vec::new();
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        crumbs.push(Breadcrumb {
            name: part.to_string(),
            path: current.clone(),
        });
    }
    crumbs
}

/// File name without its extension.
pub fn document_title(path: &str) -> String {
    let name = last_segment(path);
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
        .to_string()
}

pub fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
