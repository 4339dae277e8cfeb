#![forbid(unsafe_code)]

//! Wire contract of the requirement-smell analysis backend.
//!
//! The content script never calls the backend itself: it sends an
//! [`ExtensionMessage`] to the extension background, which forwards it to
//! `POST /api/v1/analyze_requirement` and relays an [`AnalysisReply`].

use std::rc::Rc;

use reqrev_host::{ExtensionRuntime, Host};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InjectError, Result};
use crate::guard::{CONTEXT_INVALIDATED_NOTICE, ContextGuard};

/// Backend route the background forwards analysis requests to.
pub const ANALYZE_REQUIREMENT_PATH: &str = "/api/v1/analyze_requirement";

/// Highest accepted activity score.
pub const MAX_ACTIVITY_POINTS: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequirementRequest {
    pub requirement_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_points: Option<u8>,
}

impl AnalyzeRequirementRequest {
    pub fn new(requirement_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            description: description.into(),
            activity_points: None,
        }
    }

    /// Same checks the backend answers `400` for, applied before sending.
    pub fn validate(&self) -> Result<()> {
        if self.requirement_id.trim().is_empty() {
            return Err(InjectError::InvalidRequirement(
                "requirement_id cannot be empty".into(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(InjectError::InvalidRequirement(
                "description cannot be empty".into(),
            ));
        }
        if let Some(points) = self.activity_points
            && points > MAX_ACTIVITY_POINTS
        {
            return Err(InjectError::InvalidRequirement(format!(
                "activity_points must be between 0 and {MAX_ACTIVITY_POINTS}, got {points}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequirementResponse {
    pub requirement_id: String,
    pub description: String,
    #[serde(default)]
    pub smells: Vec<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_model_output: Option<serde_json::Value>,
}

/// Messages the content script sends to the extension background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionMessage {
    AnalyzeRequirement(AnalyzeRequirementRequest),
}

/// The background's answer to [`ExtensionMessage::AnalyzeRequirement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReply {
    pub ok: bool,
    /// HTTP status of the backend call (`400` invalid input, `500` upstream failure).
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub data: Option<AnalyzeRequirementResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Sends analysis requests through the context guard.
pub struct AnalysisClient<H: Host> {
    guard: Rc<ContextGuard<H>>,
}

impl<H: Host> AnalysisClient<H> {
    pub fn new(guard: Rc<ContextGuard<H>>) -> Self {
        Self { guard }
    }

    /// Ask the backend to classify one requirement.
    ///
    /// `Ok(None)` means the extension context is gone and the user has been
    /// told to refresh.
    pub async fn analyze(
        &self,
        request: &AnalyzeRequirementRequest,
    ) -> Result<Option<AnalyzeRequirementResponse>> {
        request.validate()?;
        let payload = serde_json::to_string(&ExtensionMessage::AnalyzeRequirement(request.clone()))?;
        debug!(requirement_id = %request.requirement_id, "sending analysis request");

        let runtime = self.guard.runtime();
        let Some(raw) = self
            .guard
            .guarded_call(move || runtime.send_message(payload), CONTEXT_INVALIDATED_NOTICE)
            .await?
        else {
            return Ok(None);
        };

        let reply: AnalysisReply = serde_json::from_str(&raw)?;
        if !reply.ok {
            return Err(InjectError::Analysis {
                status: reply.status.unwrap_or(500),
                detail: reply
                    .error
                    .unwrap_or_else(|| "analysis failed without detail".into()),
            });
        }
        let response = reply.data.ok_or_else(|| InjectError::Analysis {
            status: reply.status.unwrap_or(502),
            detail: "analysis reply carried no data".into(),
        })?;
        info!(
            requirement_id = %response.requirement_id,
            smells = response.smells.len(),
            "analysis received"
        );
        Ok(Some(response))
    }
}
