#![forbid(unsafe_code)]

//! ReqRev host-page integration core.
//!
//! Injects a "Requirements" tab into a code-forge repository page and keeps
//! the panel behind it selected while the host's own client-side router
//! keeps trying to re-select its tabs.
//!
//! # Key Components
//!
//! - [`Locator`] - which pages are managed and their [`PageIdentity`]
//! - [`HostPage`] - live queries and idempotent mutators over the host DOM
//! - [`TabInjector`] - the extension tab in the navigation widget
//! - [`PanelLifecycle`] - panel state machine and reconciliation loop
//! - [`HostMutationWatcher`] - same-batch correction of host tab state
//! - [`ContextGuard`] - privileged runtime calls that survive extension reloads
//! - [`Controller`] - wiring, injection retry and SPA navigation
//!
//! Everything is generic over [`reqrev_host::Host`]; `reqrev-extension`
//! supplies the browser implementation and `reqrev-harness` a deterministic
//! one for tests.

pub mod analysis;
pub mod config;
pub mod content;
pub mod controller;
pub mod dom;
pub mod error;
pub mod guard;
pub mod locator;
pub mod panel;
pub mod retry;
pub mod store;
pub mod tab;
pub mod watcher;

pub use analysis::{
    ANALYZE_REQUIREMENT_PATH, AnalysisClient, AnalysisReply, AnalyzeRequirementRequest,
    AnalyzeRequirementResponse, ExtensionMessage,
};
pub use config::{ConfigError, InjectConfig};
pub use content::{PanelContent, RequirementsView, render_requirements};
pub use controller::{Controller, InitOutcome, InjectionStatus, PageSession};
pub use dom::HostPage;
pub use error::{InjectError, Result};
pub use guard::{CONTEXT_INVALIDATED_NOTICE, ContextGuard};
pub use locator::{Locator, PageIdentity};
pub use panel::{DeactivationHorizon, PanelLifecycle, PanelState, PanelVisibility};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{Requirement, RequirementStore};
pub use tab::TabInjector;
pub use watcher::HostMutationWatcher;
