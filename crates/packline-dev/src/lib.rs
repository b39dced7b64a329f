#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! The network and filesystem side of `packline dev`.
//!
//! [`serve`] starts the [`packline_core::dev::DevLoop`], a `notify` watcher
//! feeding it, and an axum server exposing the current output plus a
//! WebSocket per client for hot updates.

pub mod middleware;
pub mod server;
pub mod watch;

pub use middleware::{Middleware, MiddlewareStack};
pub use server::{router, serve, ServerOptions, CLIENT_PATH, HOT_PATH};
pub use watch::{FileWatcher, WatchFilter};

use std::net::SocketAddr;
use thiserror::Error;

pub mod codes {
    pub const PACKLINE_DEV_BIND_FAILED: &str = "PACKLINE_DEV_BIND_FAILED";
    pub const PACKLINE_DEV_WATCH_FAILED: &str = "PACKLINE_DEV_WATCH_FAILED";
    pub const PACKLINE_DEV_SERVE_FAILED: &str = "PACKLINE_DEV_SERVE_FAILED";
    pub const PACKLINE_DEV_UNKNOWN_MIDDLEWARE: &str = "PACKLINE_DEV_UNKNOWN_MIDDLEWARE";
}

#[derive(Debug, Error)]
pub enum DevError {
    #[error("invalid listen address {addr}")]
    Address { addr: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("unknown middleware '{name}'")]
    UnknownMiddleware { name: String },
}

impl DevError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Address { .. } | Self::Bind { .. } => codes::PACKLINE_DEV_BIND_FAILED,
            Self::Watch(_) => codes::PACKLINE_DEV_WATCH_FAILED,
            Self::Serve(_) => codes::PACKLINE_DEV_SERVE_FAILED,
            Self::UnknownMiddleware { .. } => codes::PACKLINE_DEV_UNKNOWN_MIDDLEWARE,
        }
    }
}
