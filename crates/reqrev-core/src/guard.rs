#![forbid(unsafe_code)]

//! Extension-context guard.
//!
//! Browsers unload a content script's extension context when the extension
//! is updated or reloaded, but leave the script's page-side objects alive.
//! From then on every privileged call throws. The guard checks the context
//! before each call, recognises the invalidation error after it, and turns
//! both into a one-time notice plus `None` instead of an error.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use reqrev_host::{ExtensionRuntime, Host, RuntimeError};
use tracing::{debug, warn};

/// Notice shown when the extension context is gone.
pub const CONTEXT_INVALIDATED_NOTICE: &str =
    "ReqRev was updated or reloaded. Refresh this page to keep managing requirements.";

pub struct ContextGuard<H: Host> {
    host: Rc<H>,
    notified: Cell<bool>,
}

impl<H: Host> ContextGuard<H> {
    pub fn new(host: Rc<H>) -> Self {
        Self {
            host,
            notified: Cell::new(false),
        }
    }

    /// Whether the extension runtime still answers. Never panics.
    pub fn is_context_valid(&self) -> bool {
        match self.host.runtime().runtime_id() {
            Ok(id) => !id.is_empty(),
            Err(err) => {
                debug!(%err, "extension runtime identity unavailable");
                false
            }
        }
    }

    /// Surface `message` to the user, once per guard.
    pub fn report_invalid(&self, message: &str) {
        if self.notified.replace(true) {
            return;
        }
        warn!("extension context invalidated; asking for a page refresh");
        self.host.runtime().notify(message);
    }

    pub fn has_reported(&self) -> bool {
        self.notified.get()
    }

    pub fn runtime(&self) -> &H::Runtime {
        self.host.runtime()
    }

    /// Run a privileged call unless the extension context is gone.
    ///
    /// Returns `Ok(None)` (after surfacing `on_invalid`) when the context was
    /// invalid before the call or the call failed with the invalidation
    /// error. Any other runtime error is returned to the caller.
    pub async fn guarded_call<T, F, Fut>(
        &self,
        call: F,
        on_invalid: &str,
    ) -> Result<Option<T>, RuntimeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        if !self.is_context_valid() {
            self.report_invalid(on_invalid);
            return Ok(None);
        }
        match call().await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_context_invalidated() => {
                self.report_invalid(on_invalid);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
