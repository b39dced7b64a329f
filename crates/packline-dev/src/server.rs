//! HTTP side of the dev server.
//!
//! ```text
//! /                        generated entry HTML
//! {publicPath}{file}       chunk, map, stylesheet or asset of the last good build
//! /__packline/hot          WebSocket push channel
//! /__packline/client.js    hot client script
//! ```

use crate::middleware::{run_hooks, MiddlewareStack};
use crate::watch::{self, WatchFilter};
use crate::DevError;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use packline_core::config::Config;
use packline_core::dev::{DevHandle, DevLoop, DevOptions, ErrorReport};
use packline_core::{BuildError, Compiler};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

pub const HOT_PATH: &str = "/__packline/hot";
pub const CLIENT_PATH: &str = "/__packline/client.js";

const CLIENT: &str = include_str!("client.js");

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// URL prefix of output files; always starts and ends with `/`.
    pub public_path: String,
    /// Output-relative name of the entry HTML.
    pub html_file: String,
    pub cors: bool,
    pub middleware: MiddlewareStack,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Result<Self, DevError> {
        Ok(Self {
            host: config.dev_server.host.clone(),
            port: config.dev_server.port,
            public_path: url_prefix(&config.output.public_path),
            html_file: config.html.filename.clone(),
            cors: config.dev_server.cors,
            middleware: MiddlewareStack::from_names(&config.dev_server.middlewares)?,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr, DevError> {
        let ip: IpAddr = if self.host == "localhost" {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host.parse().map_err(|_| DevError::Address {
                addr: self.host.clone(),
            })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Path part of a public path: `"auto"` and `""` become `/`, absolute URLs
/// keep only their path.
fn url_prefix(public_path: &str) -> String {
    let path = match public_path.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |at| &rest[at..]),
        None if public_path == "auto" => "/",
        None => public_path,
    };
    // Relative paths resolve against the page at `/`.
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut prefix = String::with_capacity(path.len() + 2);
    prefix.push('/');
    for segment in segments {
        prefix.push_str(segment);
        prefix.push('/');
    }
    prefix
}

#[derive(Clone)]
struct AppState {
    dev: DevHandle,
    options: Arc<ServerOptions>,
}

/// The dev server routes over a running dev loop.
pub fn router(dev: DevHandle, options: ServerOptions) -> Router {
    let hooks = (options.middleware.clone(), dev.clone());
    let cors = options.cors;
    let state = AppState {
        dev,
        options: Arc::new(options),
    };
    let app = Router::new()
        .route(HOT_PATH, get(hot_socket))
        .route(CLIENT_PATH, get(hot_client))
        .fallback(serve_output)
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(hooks, run_hooks));
    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Run `packline dev` until Ctrl-C: build, watch, serve.
pub async fn serve(mut compiler: Compiler) -> Result<(), DevError> {
    let config = compiler.config().clone();
    let options = ServerOptions::from_config(&config)?;
    let dev_options = DevOptions::from_config(&config);
    let addr = options.addr()?;
    if dev_options.hot {
        compiler.set_hot_client(Some(CLIENT_PATH.to_string()));
    }

    let (dev, handle) = DevLoop::new(compiler, dev_options);
    let filter = WatchFilter::new(vec![config.output_dir(), config.cache_dir()]);
    let watcher = watch::watch(&config.root, filter, handle.changes())?;
    let dev_task = tokio::spawn(dev.run());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| DevError::Bind { addr, source })?;
    info!(%addr, hot = handle.hot(), "dev server listening");

    let app = router(handle, options);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(DevError::Serve);

    drop(watcher);
    dev_task.abort();
    info!("dev server stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

async fn hot_client() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        CLIENT.replace("__PACKLINE_HOT_PATH__", HOT_PATH),
    )
}

async fn hot_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if !state.dev.hot() {
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| forward_messages(socket, state.dev))
}

/// Relay the client's queue to its socket until either side closes.
async fn forward_messages(mut socket: WebSocket, dev: DevHandle) {
    let mut subscription = dev.subscribe();
    let client = subscription.id;

    loop {
        tokio::select! {
            message = subscription.rx.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = socket.send(Message::Text(message.to_json())).await {
                    let err = BuildError::ServerDelivery { client, reason: e.to_string() };
                    warn!(client, code = err.code(), "{err}");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    dev.unsubscribe(client);
    debug!(client, "socket closed");
}

async fn serve_output(State(state): State<AppState>, uri: Uri) -> Response {
    let snapshot = state.dev.snapshot();
    let Some(output) = snapshot.output else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            "packline: first build still running",
        )
            .into_response();
    };

    let html_file = state.options.html_file.as_str();
    let path = uri.path();
    let name = if path == "/" {
        html_file
    } else {
        match path.strip_prefix(state.options.public_path.as_str()) {
            Some("") => html_file,
            Some(name) => name,
            None => return StatusCode::NOT_FOUND.into_response(),
        }
    };

    if name == html_file && output.html.is_none() {
        return error_page(&snapshot.errors, state.dev.hot());
    }
    match output.file(name) {
        Some(bytes) => (
            [
                (header::CONTENT_TYPE, content_type(name)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes.to_vec(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Page served in place of the HTML while every entry is broken. It
/// carries the hot client so it reloads once the build recovers.
fn error_page(errors: &[ErrorReport], hot: bool) -> Response {
    let mut body = String::from("<!DOCTYPE html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n    <title>packline: build failed</title>\n");
    if hot {
        body.push_str(&format!("    <script defer src=\"{CLIENT_PATH}\"></script>\n"));
    }
    body.push_str("  </head>\n  <body>\n    <h1>Build failed</h1>\n");
    for error in errors {
        body.push_str(&format!(
            "    <pre>{} {}\n{}</pre>\n",
            escape(&error.code),
            escape(error.path.as_deref().unwrap_or("")),
            escape(&error.message)
        ));
    }
    body.push_str("  </body>\n</html>\n");
    (StatusCode::INTERNAL_SERVER_ERROR, Html(body)).into_response()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext {
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "html" => "text/html; charset=utf-8",
        "map" | "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
