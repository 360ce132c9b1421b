pub mod cache;
pub mod library;
pub mod transform;
#[cfg(feature = "web")]
pub mod web;

pub use library::{Breadcrumb, DocumentSource, EntryKind, FileNode, FsLibrary, LibraryError};
pub use transform::{Dictionary, Span, SpanKind, Token, Transformer, isolate_body, render_document};
