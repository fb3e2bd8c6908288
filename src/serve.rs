//! Static file server for precompressed builds.
//!
//! Serves a directory over HTTP with permissive CORS headers. Files ending in
//! `.gz` are sent as-is with `Content-Encoding: gzip` and the content type
//! of the name without `.gz`, so `game.wasm.gz` arrives as
//! `application/wasm` and the browser decompresses it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::term;

/// Characters left unescaped in listing links, besides alphanumerics.
const LINK: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub dir: PathBuf,
    pub bind: String,
    pub port: u16,
}

/// Serve until interrupted.
pub fn run(opts: &ServeOptions) -> Result<()> {
    let root = opts
        .dir
        .canonicalize()
        .with_context(|| format!("cannot serve {}", opts.dir.display()))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind((opts.bind.as_str(), opts.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", opts.bind, opts.port))?;
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, root = %root.display(), "file server listening");
        term::notice(&format!("serving {} at http://{addr}", root.display()));
        if addr.ip().is_unspecified() {
            term::notice("accessible from other computers on your network");
        }
        term::notice("press Ctrl+C to stop the server");

        axum::serve(listener, router(root))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                term::notice("shutting down server...");
            })
            .await
            .context("file server failed")
    })
}

pub fn router(root: PathBuf) -> Router {
    Router::new()
        .fallback(handle)
        .layer(axum::middleware::map_response(cors))
        .with_state(Arc::new(root))
}

async fn cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn handle(State(root): State<Arc<PathBuf>>, method: Method, uri: Uri) -> Response {
    match method {
        Method::OPTIONS => StatusCode::NO_CONTENT.into_response(),
        Method::GET | Method::HEAD => {
            let head = method == Method::HEAD;
            match serve_path(&root, &uri, head).await {
                Ok(response) => response,
                Err(status) => error_page(status, head),
            }
        }
        _ => error_page(StatusCode::NOT_IMPLEMENTED, false),
    }
}

async fn serve_path(root: &Path, uri: &Uri, head: bool) -> Result<Response, StatusCode> {
    let url_path = uri.path();
    let path = translate_path(root, url_path);
    debug!(url = %url_path, path = %path.display(), "request");

    let meta = tokio::fs::metadata(&path).await.map_err(|_| StatusCode::NOT_FOUND)?;
    if meta.is_dir() {
        if !url_path.ends_with('/') {
            let mut location = format!("{url_path}/");
            if let Some(query) = uri.query() {
                location.push('?');
                location.push_str(query);
            }
            return Response::builder()
                .status(StatusCode::MOVED_PERMANENTLY)
                .header(header::LOCATION, location)
                .header(header::CONTENT_LENGTH, 0)
                .body(Body::empty())
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR);
        }
        for index in ["index.html", "index.htm"] {
            let candidate = path.join(index);
            if tokio::fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
                return send_file(&candidate, head).await;
            }
        }
        let html = list_directory(&path, url_path)
            .await
            .map_err(|_| StatusCode::NOT_FOUND)?;
        return html_response(StatusCode::OK, html, head);
    }
    send_file(&path, head).await
}

async fn send_file(path: &Path, head: bool) -> Result<Response, StatusCode> {
    let file = tokio::fs::File::open(path).await.map_err(|_| StatusCode::NOT_FOUND)?;
    let len = file.metadata().await.map_err(|_| StatusCode::NOT_FOUND)?.len();
    let (content_type, gzipped) = content_type(path);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len);
    if gzipped {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
    }
    let body = if head {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(file))
    };
    builder.body(body).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Content type for `path` and whether it is a precompressed `.gz` file.
pub fn content_type(path: &Path) -> (String, bool) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".gz") {
        Some(inner) if Path::new(inner).extension().is_some() => (
            mime_guess::from_path(inner).first_or_octet_stream().to_string(),
            true,
        ),
        Some(_) => ("application/gzip".to_string(), true),
        None => (
            mime_guess::from_path(&name).first_or_octet_stream().to_string(),
            false,
        ),
    }
}

/// Map a URL path onto the served directory. Query strings never reach here;
/// `.`, `..` and empty segments are dropped so requests cannot escape `root`.
pub fn translate_path(root: &Path, url_path: &str) -> PathBuf {
    let decoded = percent_decode_str(url_path).decode_utf8_lossy();
    let mut path = root.to_path_buf();
    for segment in decoded.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        if segment.contains('\\') || segment.contains('\0') || Path::new(segment).has_root() {
            continue;
        }
        path.push(segment);
    }
    path
}

async fn list_directory(dir: &Path, url_path: &str) -> std::io::Result<String> {
    let mut entries = Vec::new();
    let mut read = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push((name, is_dir));
    }
    Ok(render_listing(url_path, entries))
}

/// HTML index of a directory, sorted case-insensitively.
pub fn render_listing(url_path: &str, mut entries: Vec<(String, bool)>) -> String {
    entries.sort_by_key(|(name, _)| name.to_lowercase());
    let title = html_escape(&percent_decode_str(url_path).decode_utf8_lossy());

    let mut html = format!(
        "<!DOCTYPE HTML>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Directory listing for {title}</title>\n</head>\n<body>\n\
         <h1>Directory listing for {title}</h1>\n<hr>\n<ul>\n"
    );
    for (name, is_dir) in entries {
        let suffix = if is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<li><a href=\"{}{suffix}\">{}{suffix}</a></li>\n",
            utf8_percent_encode(&name, LINK),
            html_escape(&name),
        ));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    html
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn html_response(status: StatusCode, html: String, head: bool) -> Result<Response, StatusCode> {
    let len = html.len();
    let body = if head { Body::empty() } else { Body::from(html) };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CONTENT_LENGTH, len)
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_page(status: StatusCode, head: bool) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    let html = format!(
        "<!DOCTYPE HTML>\n<html lang=\"en\">\n<head>\n<title>Error response</title>\n</head>\n\
         <body>\n<h1>Error response</h1>\n<p>Error code: {}</p>\n<p>Message: {reason}.</p>\n</body>\n</html>\n",
        status.as_u16()
    );
    html_response(status, html, head).unwrap_or_else(|code| code.into_response())
}
