use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use pali_reader::library::{self, DocumentSource, FileNode, FsLibrary};
use pali_reader::transform::{
    DEFAULT_DICTIONARY_URL, DEFAULT_LOOKUP_MODE, Dictionary, Transformer,
};
use serde_json::json;

const DEFAULT_ROOT: &str = "2_pali";

#[derive(Parser, Debug)]
#[command(
    name = "pali-reader",
    about = "Read Pali texts with dictionary-linked words",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the text library over HTTP.
    #[cfg(feature = "web")]
    Serve(ServeArgs),
    /// Print the linked body of a single document.
    Render {
        /// Document to transform.
        file: PathBuf,
        /// Transform the whole text instead of only its body.
        #[arg(long)]
        fragment: bool,
        #[command(flatten)]
        dictionary: DictionaryArgs,
    },
    /// List a library directory the way the index page shows it.
    Tree {
        /// Directory relative to the library root.
        #[arg(default_value = "")]
        path: String,
        /// Library root directory.
        #[arg(long, default_value = DEFAULT_ROOT)]
        root: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DictionaryArgs {
    /// Base URL of the dictionary lookup service.
    #[arg(long, default_value = DEFAULT_DICTIONARY_URL)]
    dictionary_url: String,
    /// Value of the `tab` query parameter selecting the lookup mode.
    #[arg(long, default_value = DEFAULT_LOOKUP_MODE)]
    lookup_mode: String,
}

impl DictionaryArgs {
    fn transformer(&self) -> Transformer {
        Transformer::new(Dictionary::new(
            self.dictionary_url.clone(),
            self.lookup_mode.clone(),
        ))
    }
}

#[cfg(feature = "web")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Library root directory.
    #[arg(long, default_value = DEFAULT_ROOT)]
    root: PathBuf,
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: std::net::SocketAddr,
    /// Number of rendered documents kept in memory (0 disables caching).
    #[arg(long, default_value_t = 256)]
    cache_capacity: usize,
    /// Log at debug level.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
    #[command(flatten)]
    dictionary: DictionaryArgs,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        #[cfg(feature = "web")]
        Command::Serve(args) => handle_serve(args),
        Command::Render {
            file,
            fragment,
            dictionary,
        } => handle_render(file, fragment, &dictionary, cli.json),
        Command::Tree { path, root } => handle_tree(&root, &path, cli.json),
    }
}

#[cfg(feature = "web")]
fn handle_serve(args: ServeArgs) -> Result<(), Box<dyn Error>> {
    use pali_reader::web::{WebConfig, serve};

    init_logging(args.verbose, args.quiet);
    let config = WebConfig {
        addr: args.addr,
        root: args.root,
        dictionary_url: args.dictionary.dictionary_url,
        lookup_mode: args.dictionary.lookup_mode,
        cache_capacity: args.cache_capacity,
    };
    println!("Pali Reader starting on http://{}", config.addr);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))?;
    Ok(())
}

/// `RUST_LOG` wins over the verbosity flags.
#[cfg(feature = "web")]
fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn handle_render(
    file: PathBuf,
    fragment: bool,
    dictionary: &DictionaryArgs,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let text = fs::read_to_string(&file)
        .map_err(|err| format!("Failed to read {}: {err}", file.display()))?;
    let transformer = dictionary.transformer();
    let html = if fragment {
        transformer.render_fragment(&text)
    } else {
        transformer.render_document(&text)
    };

    if as_json {
        let payload = json!({
            "file": file.display().to_string(),
            "title": library::document_title(&file.to_string_lossy()),
            "html": html,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{html}");
    }
    Ok(())
}

fn handle_tree(root: &Path, path: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let library = FsLibrary::new(root);
    let tree = library.listing(path)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print_tree_table(&tree);
    }
    Ok(())
}

fn print_tree_table(tree: &FileNode) {
    if tree.children.is_empty() {
        println!("No folders or texts in \"{}\".", tree.name);
        return;
    }
    let width = tree
        .children
        .iter()
        .map(|child| child.name.chars().count())
        .max()
        .unwrap_or(4)
        .max("NAME".len());
    println!("{:<width$}  {:<4}  {}", "NAME", "KIND", "PATH", width = width);
    println!("{:-<width$}  {:-<4}  {}", "", "", "----", width = width);
    for child in &tree.children {
        let kind = if child.is_dir { "dir" } else { "text" };
        println!(
            "{:<width$}  {:<4}  {}",
            child.name,
            kind,
            child.path,
            width = width
        );
    }
}
