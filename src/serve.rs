//! Live-reloading preview server
//!
//! Serves the project root over HTTP on its own `tokio` runtime thread.
//! HTML pages get a small client script injected that listens for reload
//! events over Server-Sent Events.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::Stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::watch::ReloadNotifier;

pub const EVENTS_PATH: &str = "/__assetflow/events";
pub const CLIENT_PATH: &str = "/__assetflow/client.js";

/// Reload client served at [`CLIENT_PATH`].
///
/// Swaps matching stylesheets in place; anything else reloads the page.
pub const CLIENT_JS: &str = r#"(function () {
  var source = new EventSource("/__assetflow/events");
  var strip = function (p) { return p.replace(/^\.?\//, ""); };
  source.addEventListener("reload", function (event) {
    var path = strip(event.data);
    var sheets = Array.prototype.filter.call(
      document.querySelectorAll('link[rel="stylesheet"]'),
      function (link) { return strip(link.getAttribute("href") || "").indexOf(path) === 0; }
    );
    if (sheets.length === 0 || /\.(html?|js)$/.test(path)) {
      window.location.reload();
      return;
    }
    sheets.forEach(function (link) {
      var url = new URL(link.href);
      url.searchParams.set("assetflow", Date.now());
      link.href = url.toString();
    });
  });
})();
"#;

const SCRIPT_TAG: &str = r#"<script src="/__assetflow/client.js"></script>"#;

/// Error starting or running the dev server
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Cannot listen on {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("Serve root {} is not a directory", .0.display())]
    Root(PathBuf),
    #[error("Failed to start server runtime: {0}")]
    Runtime(std::io::Error),
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Server thread panicked")]
    Panicked,
}

/// Sender side of the reload channel.
#[derive(Debug, Clone)]
pub struct LiveReload {
    tx: broadcast::Sender<String>,
}

impl LiveReload {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Broadcast a reload; returns the number of connected clients.
    pub fn send(&self, path: &str) -> usize {
        // No connected browser is not an error
        self.tx.send(path.to_string()).unwrap_or(0)
    }
}

impl Default for LiveReload {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadNotifier for LiveReload {
    fn reload(&self, path: &Path) {
        let path = path.to_string_lossy().replace('\\', "/");
        let clients = self.send(&path);
        tracing::debug!("reload '{}' sent to {} client(s)", path, clients);
    }
}

#[derive(Clone)]
struct AppState {
    reload: LiveReload,
    shutdown: watch::Receiver<bool>,
}

/// Build the preview router for a site root.
pub fn router(root: &Path, reload: LiveReload, shutdown: watch::Receiver<bool>) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(events))
        .route(CLIENT_PATH, get(client))
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .layer(middleware::from_fn(inject_client))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { reload, shutdown })
}

async fn client() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript; charset=utf-8")], CLIENT_JS)
}

async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.reload.subscribe();
    let mut shutdown = state.shutdown;

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                result = rx.recv() => match result {
                    Ok(path) => yield Ok(Event::default().event("reload").data(path)),
                    // Dropped events only mean an extra reload is due
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        yield Ok(Event::default().event("reload").data(""));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
}

async fn inject_client(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to read html body: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    if let Ok(len) = HeaderValue::from_str(&html.len().to_string()) {
        parts.headers.insert(header::CONTENT_LENGTH, len);
    }
    Response::from_parts(parts, Body::from(html))
}

/// Insert the reload client tag before the last `</body>`, or append it.
pub fn inject_script(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    match lower.rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], SCRIPT_TAG, &html[at..]),
        None => format!("{}{}", html, SCRIPT_TAG),
    }
}

/// A running preview server.
pub struct DevServer {
    addr: SocketAddr,
    reload: LiveReload,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<Result<(), ServeError>>>,
}

impl DevServer {
    /// Bind `addr` and serve `root` on a background thread.
    ///
    /// Binding happens before this returns, so a busy port is an error here.
    pub fn start(root: &Path, addr: SocketAddr) -> Result<Self, ServeError> {
        if !root.is_dir() {
            return Err(ServeError::Root(root.to_path_buf()));
        }

        let listener = std::net::TcpListener::bind(addr).map_err(|e| ServeError::Bind(addr, e))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("assetflow-serve")
            .enable_all()
            .build()
            .map_err(ServeError::Runtime)?;

        let reload = LiveReload::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let app = router(root, reload.clone(), shutdown_rx.clone());

        let thread = std::thread::Builder::new().name("assetflow-serve".into()).spawn(move || {
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                let mut signal = shutdown_rx;
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = signal.wait_for(|stop| *stop).await;
                    })
                    .await?;
                Ok::<(), ServeError>(())
            })
        })?;

        tracing::info!("Serving {} at http://{}", root.display(), addr);
        Ok(Self { addr, reload, shutdown, thread: Some(thread) })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Reload notifier wired to this server's clients.
    pub fn reloader(&self) -> LiveReload {
        self.reload.clone()
    }

    /// Block until Ctrl+C, then shut down.
    pub fn wait(self) -> Result<(), ServeError> {
        wait_for_ctrl_c()?;
        self.shutdown()
    }

    /// Close client streams and stop accepting connections.
    pub fn shutdown(mut self) -> Result<(), ServeError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), ServeError> {
        let _ = self.shutdown.send(true);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServeError::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("{}", e);
            }
        }
    }
}

/// Block the current thread until Ctrl+C.
pub fn wait_for_ctrl_c() -> Result<(), ServeError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ServeError::Runtime)?;
    runtime.block_on(tokio::signal::ctrl_c())?;
    tracing::info!("Shutting down...");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpStream;
    use tempfile::TempDir;

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn site() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.html"), "<html><body><h1>Hi</h1></body></html>").unwrap();
        fs::create_dir_all(temp.path().join("css")).unwrap();
        fs::write(temp.path().join("css/main.css"), ".a{color:red}").unwrap();
        temp
    }

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_inject_script_before_body_close() {
        let html = inject_script("<html><BODY><p>x</p></BODY></html>");
        assert_eq!(html, format!("<html><BODY><p>x</p>{}</BODY></html>", SCRIPT_TAG));
    }

    #[test]
    fn test_inject_script_appends_without_body() {
        assert_eq!(inject_script("<p>fragment</p>"), format!("<p>fragment</p>{}", SCRIPT_TAG));
    }

    #[test]
    fn test_reload_without_clients_is_fine() {
        let reload = LiveReload::new();
        assert_eq!(reload.send("css"), 0);
        reload.reload(Path::new("index.html"));
    }

    #[test]
    fn test_reload_reaches_subscribers() {
        let reload = LiveReload::new();
        let mut rx = reload.subscribe();
        reload.reload(Path::new("css"));
        assert_eq!(rx.try_recv().unwrap(), "css");
    }

    #[test]
    fn test_serves_html_with_client_injected() {
        let temp = site();
        let server = DevServer::start(temp.path(), localhost()).unwrap();

        let page = get(server.addr(), "/");
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains(&format!("<h1>Hi</h1>{}</body>", SCRIPT_TAG)));

        let css = get(server.addr(), "/css/main.css");
        assert!(css.ends_with(".a{color:red}"));
        assert!(!css.contains(SCRIPT_TAG));

        server.shutdown().unwrap();
    }

    #[test]
    fn test_serves_client_script() {
        let temp = site();
        let server = DevServer::start(temp.path(), localhost()).unwrap();
        let response = get(server.addr(), CLIENT_PATH);
        assert!(response.contains("application/javascript"));
        assert!(response.contains("EventSource"));
        server.shutdown().unwrap();
    }

    #[test]
    fn test_missing_file_is_404() {
        let temp = site();
        let server = DevServer::start(temp.path(), localhost()).unwrap();
        assert!(get(server.addr(), "/nope.html").starts_with("HTTP/1.1 404"));
        server.shutdown().unwrap();
    }

    #[test]
    fn test_busy_port_is_startup_error() {
        let temp = site();
        let taken = std::net::TcpListener::bind(localhost()).unwrap();
        let result = DevServer::start(temp.path(), taken.local_addr().unwrap());
        assert!(matches!(result, Err(ServeError::Bind(..))));
    }

    #[test]
    fn test_event_stream_delivers_reload() {
        let temp = site();
        let server = DevServer::start(temp.path(), localhost()).unwrap();

        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", EVENTS_PATH).unwrap();
        let mut reader = BufReader::new(stream);

        let mut line = String::new();
        loop {
            line.clear();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" {
                break;
            }
        }

        server.reloader().reload(Path::new("css"));

        let mut received = String::new();
        while !received.contains("data: css") {
            line.clear();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            received.push_str(&line);
        }
        assert!(received.contains("event: reload"));
        assert!(received.contains("data: css"));

        server.shutdown().unwrap();
    }
}
