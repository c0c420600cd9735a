use serde::{Deserialize, Serialize};
use tabula_contract::RemoteError;
use thiserror::Error;

use crate::session::ResourceKind;

/// The only failure `Orchestrator::invoke` surfaces to its caller.
/// Every variant means no session was established; the caller may retry.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InvokeError {
    #[error("failed to acquire {kind}: {error}")]
    Acquisition { kind: ResourceKind, error: RemoteError },
    #[error("deadline elapsed while acquiring {0}")]
    DeadlineElapsed(ResourceKind),
}

impl InvokeError {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Acquisition { kind, .. } | Self::DeadlineElapsed(kind) => *kind,
        }
    }
}

#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FallbackError {
    #[error("fallback analyzer failed: {0}")]
    Analyzer(String),
    #[error("fallback analyzer panicked: {0}")]
    Panicked(String),
}

#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("max turns must be at least 1")]
    ZeroMaxTurns,
    #[error("deadline must be non-zero")]
    ZeroDeadline,
}

/// Returned by `Deadline::run` when the deadline fires first.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("deadline elapsed")]
pub struct DeadlineElapsed;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
