#![forbid(unsafe_code)]

//! Deterministic headless host for ReqRev.
//!
//! Design goals:
//! - **Host-driven time**: nothing runs until the test advances the clock.
//! - **Browser-shaped delivery**: mutation records are delivered after each
//!   callback, never from inside the mutating call.
//! - **Adversarial host**: [`fixtures::HostScript`] plays the host router
//!   re-selecting its own tabs.

pub mod document;
pub mod fixtures;
pub mod runtime;
pub mod scheduler;
pub mod selector;

use core::time::Duration;

use reqrev_host::{Host, HostScheduler};

pub use document::{ClickOutcome, FakeDocument, NodeId};
pub use runtime::FakeRuntime;
pub use scheduler::VirtualScheduler;

/// URL of a page no session manages.
pub const DEFAULT_URL: &str = "https://github.com/";

/// Fake document, virtual scheduler and fake runtime behind one [`Host`].
pub struct TestHost {
    pub dom: FakeDocument,
    pub scheduler: VirtualScheduler,
    pub runtime: FakeRuntime,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    /// An empty document at [`DEFAULT_URL`].
    #[must_use]
    pub fn new() -> Self {
        Self::at(DEFAULT_URL)
    }

    /// An empty document at `href`.
    #[must_use]
    pub fn at(href: &str) -> Self {
        Self {
            dom: FakeDocument::new(href),
            scheduler: VirtualScheduler::new(),
            runtime: FakeRuntime::default(),
        }
    }

    /// Deliver pending mutation records.
    pub fn flush_mutations(&self) -> usize {
        self.dom.flush_mutations()
    }

    /// Move virtual time forward by `dt`, running every callback that comes
    /// due and delivering mutation records after each one.
    ///
    /// Returns the number of scheduled callbacks run.
    pub fn advance(&self, dt: Duration) -> usize {
        let until = self.scheduler.now().saturating_add(dt);
        self.dom.flush_mutations();
        let mut ran = 0;
        while self.scheduler.run_next_due(until) {
            ran += 1;
            self.dom.flush_mutations();
        }
        self.scheduler.advance_to(until);
        ran
    }
}

impl Host for TestHost {
    type Element = NodeId;
    type Dom = FakeDocument;
    type Scheduler = VirtualScheduler;
    type Runtime = FakeRuntime;

    fn dom(&self) -> &FakeDocument {
        &self.dom
    }

    fn scheduler(&self) -> &VirtualScheduler {
        &self.scheduler
    }

    fn runtime(&self) -> &FakeRuntime {
        &self.runtime
    }
}
