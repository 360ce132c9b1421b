use crate::cache::RenderCache;
use crate::library::{
    self, Breadcrumb, DocumentSource, EntryKind, FileNode, FsLibrary, LibraryError,
};
use crate::transform::{
    DEFAULT_DICTIONARY_URL, DEFAULT_LOOKUP_MODE, Dictionary, Transformer, escape_html,
};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use include_dir::{Dir, include_dir};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, warn};

type SharedState = Arc<AppState>;
const SITE_NAME: &str = "Pali Reader";
const LIBRARY_HEADING: &str = "Pali Texts Library";
const DEFAULT_CACHE_CAPACITY: usize = 256;

static ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Characters escaped in one segment of a `/read/...` link.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

pub struct AppState {
    pub library: Arc<dyn DocumentSource>,
    pub transformer: Transformer,
    pub cache: RenderCache,
}

impl AppState {
    pub fn new(
        library: Arc<dyn DocumentSource>,
        transformer: Transformer,
        cache: RenderCache,
    ) -> Self {
        Self {
            library,
            transformer,
            cache,
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub root: PathBuf,
    pub dictionary_url: String,
    pub lookup_mode: String,
    pub cache_capacity: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            root: PathBuf::from("2_pali"),
            dictionary_url: DEFAULT_DICTIONARY_URL.to_string(),
            lookup_mode: DEFAULT_LOOKUP_MODE.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    if !config.root.is_dir() {
        warn!(root = %config.root.display(), "library root is not a directory");
    }
    let state = Arc::new(AppState::new(
        Arc::new(FsLibrary::new(config.root.clone())),
        Transformer::new(Dictionary::new(
            config.dictionary_url.clone(),
            config.lookup_mode.clone(),
        )),
        RenderCache::new(config.cache_capacity),
    ));
    let router = build_router(state);
    info!(
        %config.addr,
        root = %config.root.display(),
        dictionary = %config.dictionary_url,
        cache = config.cache_capacity,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct PageError {
    status: StatusCode,
    message: String,
}

impl PageError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<LibraryError> for PageError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::InvalidPath(_) => Self {
                status: StatusCode::BAD_REQUEST,
                message: "Invalid path".to_string(),
            },
            LibraryError::NotFound(_) => Self::not_found("File not found"),
            LibraryError::Io(err) => {
                warn!(error = %err, "failed to read from library");
                Self::internal("Cannot read file")
            }
        }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        (self.status, Html(render_error_page(&self.message))).into_response()
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/read", get(redirect_home))
        .route("/read/", get(redirect_home))
        .route("/read/*path", get(read))
        .route("/static/*file", get(static_asset))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs filesystem work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, PageError>
where
    F: FnOnce() -> Result<T, LibraryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| PageError::internal(format!("worker failed: {err}")))?
        .map_err(PageError::from)
}

async fn index(State(state): State<SharedState>) -> Result<Html<String>, PageError> {
    let library = Arc::clone(&state.library);
    let tree = blocking(move || library.listing("")).await?;
    let page = PageTemplate::listing(SITE_NAME, LIBRARY_HEADING, &tree, &[], &state);
    render_page(&page)
}

async fn redirect_home() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
}

enum Loaded {
    Directory(FileNode),
    Document(Arc<str>),
}

async fn read(
    State(state): State<SharedState>,
    Path(raw_path): Path<String>,
) -> Result<Response, PageError> {
    let path = library::normalize_relative(raw_path.trim_start_matches('/'))?;
    if path.is_empty() {
        return Ok(redirect_home().await);
    }

    let worker_state = Arc::clone(&state);
    let worker_path = path.clone();
    let loaded = blocking(move || load_entry(&worker_state, &worker_path)).await?;
    let crumbs = library::breadcrumbs(&path);

    let html = match loaded {
        Loaded::Directory(tree) => {
            let title = library::last_segment(&path);
            let page = PageTemplate::listing(title, title, &tree, &crumbs, &state);
            render_page(&page)?
        }
        Loaded::Document(content) => {
            let title = library::document_title(&path);
            let page = PageTemplate::reader(&title, &content, &crumbs, &state);
            render_page(&page)?
        }
    };
    Ok(html.into_response())
}

fn load_entry(state: &AppState, path: &str) -> Result<Loaded, LibraryError> {
    match state.library.resolve(path)? {
        EntryKind::Directory => Ok(Loaded::Directory(state.library.listing(path)?)),
        EntryKind::Document => render_cached(state, path).map(Loaded::Document),
    }
}

fn render_cached(state: &AppState, path: &str) -> Result<Arc<str>, LibraryError> {
    let modified = state.library.modified(path);
    if let Some(html) = modified.and_then(|mtime| state.cache.get(path, mtime)) {
        debug!(path, "render cache hit");
        return Ok(html);
    }
    let raw = state.library.read_document(path)?;
    let html: Arc<str> = Arc::from(state.transformer.render_document(&raw));
    if let Some(mtime) = modified {
        state.cache.insert(path, mtime, Arc::clone(&html));
    }
    debug!(path, input = raw.len(), output = html.len(), "rendered document");
    Ok(html)
}

async fn static_asset(Path(file): Path<String>) -> Response {
    match ASSETS.get_file(file.trim_start_matches('/')) {
        Some(asset) => (
            [(header::CONTENT_TYPE, content_type_for(&file))],
            asset.contents(),
        )
            .into_response(),
        None => PageError::not_found("File not found").into_response(),
    }
}

fn content_type_for(name: &str) -> String {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    let mime = match extension {
        "css" => mime::TEXT_CSS_UTF_8,
        "js" => mime::APPLICATION_JAVASCRIPT_UTF_8,
        "svg" => mime::IMAGE_SVG,
        "png" => mime::IMAGE_PNG,
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    mime.to_string()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "pali-reader" }))
}

fn render_page(page: &PageTemplate<'_>) -> Result<Html<String>, PageError> {
    page.render()
        .map(Html)
        .map_err(|err| PageError::internal(err.to_string()))
}

fn read_href(path: &str) -> String {
    let encoded = path
        .split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!("/read/{encoded}")
}

/// Host part of the dictionary URL, shown in the footer.
fn dictionary_label(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    without_scheme
        .split(['/', '?'])
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or(url)
}

fn render_error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Error • {site}</title>
    <link rel="stylesheet" href="/static/style.css">
  </head>
  <body>
    <main>
      <div class="container">
        <div class="file-browser">
          <h1>Something went wrong</h1>
          <p class="intro">{message}</p>
          <a href="/">Back to the library</a>
        </div>
      </div>
    </main>
  </body>
</html>"#,
        site = SITE_NAME,
        message = escape_html(message),
    )
}

#[derive(Debug, Clone)]
struct EntryLink {
    name: String,
    href: String,
    is_dir: bool,
}

#[derive(Debug, Clone)]
struct CrumbLink {
    name: String,
    href: String,
}

impl From<&Breadcrumb> for CrumbLink {
    fn from(crumb: &Breadcrumb) -> Self {
        Self {
            name: crumb.name.clone(),
            href: read_href(&crumb.path),
        }
    }
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{{ title }} • Pali Reader</title>
    <link rel="stylesheet" href="/static/style.css">
  </head>
  <body>
    <header>
      <div class="header-content">
        <a href="/" class="logo">
          <span class="logo-icon">☸</span>
          <span class="logo-text">Pali Reader</span>
        </a>
        <nav class="breadcrumbs" aria-label="Breadcrumbs">
          <a href="/">Home</a>
          {% for crumb in breadcrumbs %}
          <span class="separator">›</span>
          {% if loop.last %}
          <span class="current">{{ crumb.name }}</span>
          {% else %}
          <a href="{{ crumb.href }}">{{ crumb.name }}</a>
          {% endif %}
          {% endfor %}
        </nav>
      </div>
    </header>
    <main>
      <div class="container">
        {% if has_content %}
        <article class="reader-content">
          <h1>{{ heading }}</h1>
          <div class="pali-text">
            {{ content_html|safe }}
          </div>
        </article>
        {% else %}
        <div class="file-browser">
          <h1>{{ heading }}</h1>
          <p class="intro">Browse the collection of Pali texts. Open a folder to explore, or pick a text to read.</p>
          {% if entries.len() > 0 %}
          <div class="file-grid">
            {% for entry in entries %}
            <a href="{{ entry.href }}" class="file-card {% if entry.is_dir %}folder{% else %}file{% endif %}">
              <div class="file-icon">{% if entry.is_dir %}📁{% else %}📜{% endif %}</div>
              <div class="file-name">{{ entry.name }}</div>
            </a>
            {% endfor %}
          </div>
          {% else %}
          <p class="empty">No texts here yet.</p>
          {% endif %}
        </div>
        {% endif %}
      </div>
    </main>
    <footer>
      <p>Click any Pali word to look it up on <a href="{{ dictionary_url }}" target="_blank" rel="noopener">{{ dictionary_label }}</a></p>
    </footer>
  </body>
</html>"#,
    ext = "html"
)]
struct PageTemplate<'a> {
    title: &'a str,
    heading: &'a str,
    breadcrumbs: Vec<CrumbLink>,
    has_content: bool,
    content_html: &'a str,
    entries: Vec<EntryLink>,
    dictionary_url: &'a str,
    dictionary_label: &'a str,
}

impl<'a> PageTemplate<'a> {
    fn listing(
        title: &'a str,
        heading: &'a str,
        tree: &FileNode,
        crumbs: &[Breadcrumb],
        state: &'a AppState,
    ) -> Self {
        let entries = tree
            .children
            .iter()
            .map(|child| EntryLink {
                name: child.name.clone(),
                href: read_href(&child.path),
                is_dir: child.is_dir,
            })
            .collect();
        Self::base(title, heading, crumbs, state, false, "", entries)
    }

    fn reader(
        title: &'a str,
        content_html: &'a str,
        crumbs: &[Breadcrumb],
        state: &'a AppState,
    ) -> Self {
        Self::base(title, title, crumbs, state, true, content_html, Vec::new())
    }

    fn base(
        title: &'a str,
        heading: &'a str,
        crumbs: &[Breadcrumb],
        state: &'a AppState,
        has_content: bool,
        content_html: &'a str,
        entries: Vec<EntryLink>,
    ) -> Self {
        let dictionary_url = state.transformer.dictionary().base_url();
        Self {
            title,
            heading,
            breadcrumbs: crumbs.iter().map(CrumbLink::from).collect(),
            has_content,
            content_html,
            entries,
            dictionary_url,
            dictionary_label: dictionary_label(dictionary_url),
        }
    }
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request};
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SUTTA: &str = "<html><head><title>ignored</title></head><body><p>Evaṃ me sutaṃ [PTS Page 001] 1.</p></body></html>";

    fn test_state() -> (TempDir, SharedState) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sutta/digha")).unwrap();
        fs::write(root.join("sutta/s0101m.mul.htm"), SUTTA).unwrap();
        fs::write(root.join("sutta/readme.txt"), "hidden").unwrap();
        fs::write(root.join("intro.htm"), "<body>Namo</body>").unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(FsLibrary::new(root)),
            Transformer::default(),
            RenderCache::new(8),
        ));
        (dir, state)
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_lists_library_root() {
        let (_dir, state) = test_state();
        let (status, html) = fetch(build_router(state), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Pali Texts Library"));
        assert!(html.contains("intro.htm"));
        assert!(html.contains("sutta"));
        assert!(html.contains("file-card folder"));
    }

    #[tokio::test]
    async fn reader_links_words_and_styles_references() {
        let (_dir, state) = test_state();
        let (status, html) = fetch(build_router(state), "/read/sutta/s0101m.mul.htm").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains(
            r#"<a href="https://dpdict.net/?tab=dpd&q=eva%E1%B9%83" class="pali-word" target="other">Evaṃ</a>"#
        ));
        assert!(html.contains(r#"<span class="reference">[PTS Page 001]</span>"#));
        assert!(!html.contains("ignored"), "head content must be dropped");
        assert!(html.contains("<h1>s0101m.mul</h1>"));
        assert!(html.contains(r#"<span class="current">s0101m.mul.htm</span>"#));
    }

    #[tokio::test]
    async fn reader_populates_render_cache() {
        let (_dir, state) = test_state();
        let router = build_router(Arc::clone(&state));
        let (status, _) = fetch(router.clone(), "/read/intro.htm").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.cache.len(), 1);
        let (status, html) = fetch(router, "/read/./intro.htm").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("class=\"pali-word\""));
        assert_eq!(state.cache.len(), 1);
    }

    #[tokio::test]
    async fn directory_page_lists_children_only() {
        let (_dir, state) = test_state();
        let (status, html) = fetch(build_router(state), "/read/sutta").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("s0101m.mul.htm"));
        assert!(html.contains("digha"));
        assert!(!html.contains("readme.txt"));
        assert!(html.contains(r#"<span class="current">sutta</span>"#));
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let (_dir, state) = test_state();
        let (status, html) = fetch(build_router(state), "/read/nope.htm").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(html.contains("File not found"));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (_dir, state) = test_state();
        let (status, html) = fetch(build_router(state), "/read/..%2F..%2Fetc%2Fpasswd").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("Invalid path"));
    }

    #[tokio::test]
    async fn empty_read_path_redirects_home() {
        let (_dir, state) = test_state();
        let response = build_router(state)
            .oneshot(Request::get("/read/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn stylesheet_is_served_as_css() {
        let (_dir, state) = test_state();
        let response = build_router(state)
            .oneshot(Request::get("/static/style.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/css"));
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let css = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(css.contains(".pali-word"));
        assert!(css.contains(".reference"));
    }

    #[tokio::test]
    async fn unknown_asset_is_not_found() {
        let (_dir, state) = test_state();
        let (status, _) = fetch(build_router(state), "/static/missing.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_dir, state) = test_state();
        let (status, body) = fetch(build_router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(payload["status"], "ok");
    }

    #[test]
    fn read_href_encodes_each_segment() {
        assert_eq!(read_href("a b/c#d"), "/read/a%20b/c%23d");
        assert_eq!(read_href("vinaya/pārājika.htm"), "/read/vinaya/p%C4%81r%C4%81jika.htm");
    }

    #[test]
    fn dictionary_label_is_host() {
        assert_eq!(dictionary_label("https://dpdict.net/"), "dpdict.net");
        assert_eq!(dictionary_label("http://localhost:9000/x?y"), "localhost:9000");
        assert_eq!(dictionary_label(""), "");
    }

    #[test]
    fn error_page_escapes_message() {
        let html = render_error_page("<script>");
        assert!(html.contains("&lt;script&gt;"));
    }
}
