//! Request hooks that run before the built-in handlers.
//!
//! Hooks run in configuration order; the first one that answers wins and
//! the rest (including the output handlers) are skipped.

use crate::DevError;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use packline_core::dev::DevHandle;
use std::sync::Arc;
use tracing::info;

pub const HEALTH_PATH: &str = "/__packline/health";

pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Answer `request`, or `None` to pass it on.
    fn handle(&self, request: &Request, dev: &DevHandle) -> Option<Response>;
}

/// `GET /__packline/health`: loop state, build count and error count.
#[derive(Debug, Default)]
pub struct Health;

impl Middleware for Health {
    fn name(&self) -> &str {
        "health"
    }

    fn handle(&self, request: &Request, dev: &DevHandle) -> Option<Response> {
        if request.uri().path() != HEALTH_PATH {
            return None;
        }
        let snapshot = dev.snapshot();
        let body = serde_json::json!({
            "ok": snapshot.errors.is_empty(),
            "state": dev.state(),
            "builds": snapshot.builds,
            "errors": snapshot.errors.len(),
            "clients": dev.hub().client_count(),
        });
        Some(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body.to_string(),
            )
                .into_response(),
        )
    }
}

/// Logs every request; never answers.
#[derive(Debug, Default)]
pub struct RequestLog;

impl Middleware for RequestLog {
    fn name(&self) -> &str {
        "request-log"
    }

    fn handle(&self, request: &Request, _dev: &DevHandle) -> Option<Response> {
        info!(method = %request.method(), path = %request.uri().path(), "request");
        None
    }
}

/// Built-in middleware by configured name.
pub fn builtin(name: &str) -> Result<Arc<dyn Middleware>, DevError> {
    match name {
        "health" => Ok(Arc::new(Health)),
        "request-log" => Ok(Arc::new(RequestLog)),
        other => Err(DevError::UnknownMiddleware {
            name: other.to_string(),
        }),
    }
}

/// The ordered hook list.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    hooks: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.hooks.iter().map(|h| h.name())).finish()
    }
}

impl MiddlewareStack {
    /// Resolve configured names to built-ins.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, DevError> {
        let hooks = names
            .iter()
            .map(|n| builtin(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hooks })
    }

    #[must_use]
    pub fn with(mut self, hook: Arc<dyn Middleware>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// First answer from the hooks, in order.
    #[must_use]
    pub fn handle(&self, request: &Request, dev: &DevHandle) -> Option<Response> {
        self.hooks.iter().find_map(|hook| hook.handle(request, dev))
    }
}

pub(crate) async fn run_hooks(
    State((stack, dev)): State<(MiddlewareStack, DevHandle)>,
    request: Request,
    next: Next,
) -> Response {
    match stack.handle(&request, &dev) {
        Some(response) => response,
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_resolve_in_order() {
        let stack = MiddlewareStack::from_names(&["request-log", "health"]).unwrap();
        assert_eq!(format!("{stack:?}"), r#"["request-log", "health"]"#);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let err = MiddlewareStack::from_names(&["gzip"]).unwrap_err();
        assert_eq!(err.code(), crate::codes::PACKLINE_DEV_UNKNOWN_MIDDLEWARE);
        assert!(err.to_string().contains("gzip"));
    }
}
