//! Messages pushed to dev clients.

use crate::error::{BuildError, Error};
use serde::{Deserialize, Serialize};

/// One message on the push channel. Serialised as JSON with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotMessage {
    Connected { client: u64 },
    /// Module definitions, dependencies before dependents.
    Update { updates: Vec<ModuleUpdate> },
    FullReload { reason: String },
    Errors { errors: Vec<ErrorReport> },
    /// The build recovered without any module change.
    Ok,
}

impl HotMessage {
    #[must_use]
    pub fn full_reload(reason: impl Into<String>) -> Self {
        Self::FullReload {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn errors<'a>(errors: impl IntoIterator<Item = &'a BuildError>) -> Self {
        Self::Errors {
            errors: errors.into_iter().map(ErrorReport::from).collect(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Update { .. } => "update",
            Self::FullReload { .. } => "full-reload",
            Self::Errors { .. } => "errors",
            Self::Ok => "ok",
        }
    }

    /// JSON text for the wire.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"full-reload","reason":"encoding"}"#.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUpdate {
    pub module_id: String,
    /// Root-relative path.
    pub path: String,
    /// `[function (module, exports, require) {...}, {deps}]`.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&Error> for ErrorReport {
    fn from(error: &Error) -> Self {
        match error {
            Error::Build(build) => Self::from(build),
            other => Self {
                code: other.code().to_string(),
                message: other.to_string(),
                path: None,
            },
        }
    }
}

impl From<&BuildError> for ErrorReport {
    fn from(error: &BuildError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            path: error.path().map(|p| p.display().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_wire_format() {
        let update = HotMessage::Update {
            updates: vec![ModuleUpdate {
                module_id: "a1b2c3d4".to_string(),
                path: "src/a.js".to_string(),
                code: "[function () {}, {}]".to_string(),
            }],
        };
        let json: serde_json::Value = serde_json::from_str(&update.to_json()).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["updates"][0]["moduleId"], "a1b2c3d4");

        assert_eq!(HotMessage::Ok.to_json(), r#"{"type":"ok"}"#);
        assert_eq!(
            HotMessage::full_reload("entries changed").to_json(),
            r#"{"type":"full-reload","reason":"entries changed"}"#
        );
    }

    #[test]
    fn test_error_report() {
        let err = BuildError::Resolution {
            importer: PathBuf::from("/p/src/a.js"),
            specifier: "./gone".to_string(),
            tried: vec![],
        };
        let HotMessage::Errors { errors } = HotMessage::errors([&err]) else {
            panic!("expected errors");
        };
        assert_eq!(errors[0].code, "PACKLINE_RESOLVE_FAILED");
        assert_eq!(errors[0].path.as_deref(), Some("/p/src/a.js"));
        assert!(errors[0].message.contains("./gone"));
    }
}
