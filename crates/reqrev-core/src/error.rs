#![forbid(unsafe_code)]

use reqrev_host::RuntimeError;
use thiserror::Error;

/// Failures the integration core reports.
///
/// A host script re-asserting its own tab state is deliberately absent: that
/// race is absorbed by reconciliation, never raised.
#[derive(Debug, Error)]
pub enum InjectError {
    /// A host element the operation needs is not rendered (yet).
    #[error("host page not ready: {0} not found")]
    HostNotReady(&'static str),
    /// The panel was removed; a new session has to create another one.
    #[error("panel was removed")]
    Uninstalled,
    /// The extension was reloaded or unloaded under the page.
    #[error("extension context invalidated; reload the page")]
    ContextInvalidated,
    /// A privileged runtime call failed for another reason.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// A stored or received payload did not match its schema.
    #[error("malformed extension payload: {0}")]
    Json(#[from] serde_json::Error),
    /// A requirement failed validation before being sent for analysis.
    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),
    /// The analysis backend answered with an error status.
    #[error("analysis failed with status {status}: {detail}")]
    Analysis { status: u16, detail: String },
}

pub type Result<T> = std::result::Result<T, InjectError>;
