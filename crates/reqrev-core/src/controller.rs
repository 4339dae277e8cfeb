#![forbid(unsafe_code)]

//! Top-level wiring for one content-script instance.
//!
//! The controller owns at most one [`PageSession`] (tab, panel and watcher
//! for one page identity) plus a body-wide subtree observer that detects
//! client-side navigation. Moving to another `namespace/resource` tears the
//! session down and builds a new one after a settle delay; moving between
//! sub-pages of the same resource keeps it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use reqrev_host::{Host, HostDom, HostEvent, HostScheduler, ObserverHandle, TimerHandle};
use tracing::{debug, error, info, warn};

use crate::config::InjectConfig;
use crate::error::InjectError;
use crate::guard::ContextGuard;
use crate::locator::{Locator, PageIdentity};
use crate::panel::PanelLifecycle;
use crate::tab::TabInjector;
use crate::watcher::HostMutationWatcher;

/// Result of [`Controller::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// A session was created and injection started.
    Started(PageIdentity),
    /// The extension context is gone; nothing was set up.
    ContextInvalid,
    /// The current path is not a managed resource page.
    Unmanaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionStatus {
    Pending,
    Injected,
    /// Every attempt failed; no further attempts for this session.
    Exhausted,
}

/// Everything built for one page identity.
pub struct PageSession<H: Host> {
    identity: PageIdentity,
    panel: Rc<PanelLifecycle<H>>,
    tab: TabInjector<H>,
    watcher: Rc<HostMutationWatcher<H>>,
    status: Cell<InjectionStatus>,
    attempts: Cell<u32>,
    retry: Cell<Option<TimerHandle>>,
}

impl<H: Host> PageSession<H> {
    pub fn identity(&self) -> &PageIdentity {
        &self.identity
    }

    pub fn panel(&self) -> &Rc<PanelLifecycle<H>> {
        &self.panel
    }

    pub fn watcher(&self) -> &Rc<HostMutationWatcher<H>> {
        &self.watcher
    }

    pub fn status(&self) -> InjectionStatus {
        self.status.get()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }
}

pub struct Controller<H: Host> {
    host: Rc<H>,
    config: Rc<InjectConfig>,
    locator: Locator,
    guard: Rc<ContextGuard<H>>,
    session: RefCell<Option<Rc<PageSession<H>>>>,
    nav_observer: Cell<Option<ObserverHandle>>,
    last_href: RefCell<String>,
    settle: Cell<Option<TimerHandle>>,
    this: Weak<Self>,
}

impl<H: Host> Controller<H> {
    pub fn new(host: Rc<H>, config: InjectConfig) -> Rc<Self> {
        let locator = Locator::from_config(&config);
        let guard = Rc::new(ContextGuard::new(host.clone()));
        Rc::new_cyclic(|this| Self {
            host,
            config: Rc::new(config),
            locator,
            guard,
            session: RefCell::new(None),
            nav_observer: Cell::new(None),
            last_href: RefCell::new(String::new()),
            settle: Cell::new(None),
            this: this.clone(),
        })
    }

    /// Watch for navigation and initialise for the current page.
    pub fn start(&self) -> InitOutcome {
        self.watch_navigation();
        self.init()
    }

    pub fn config(&self) -> &InjectConfig {
        &self.config
    }

    pub fn guard(&self) -> &Rc<ContextGuard<H>> {
        &self.guard
    }

    pub fn session(&self) -> Option<Rc<PageSession<H>>> {
        self.session.borrow().clone()
    }

    pub fn identity(&self) -> Option<PageIdentity> {
        self.session().map(|s| s.identity.clone())
    }

    pub fn panel(&self) -> Option<Rc<PanelLifecycle<H>>> {
        self.session().map(|s| s.panel.clone())
    }

    pub fn injection_status(&self) -> Option<InjectionStatus> {
        self.session().map(|s| s.status.get())
    }

    pub fn is_watching_navigation(&self) -> bool {
        self.nav_observer.get().is_some()
    }

    /// Build a session for the current page.
    ///
    /// Aborts quietly when the extension context is gone or the page is not
    /// a managed resource page.
    pub fn init(&self) -> InitOutcome {
        self.teardown();
        *self.last_href.borrow_mut() = self.host.dom().href();

        if !self.guard.is_context_valid() {
            debug!("extension context invalid; not initialising");
            return InitOutcome::ContextInvalid;
        }
        let pathname = self.host.dom().pathname();
        let Some(identity) = self.locator.parse_identity(&pathname) else {
            debug!(%pathname, "not a managed page");
            return InitOutcome::Unmanaged;
        };

        let panel = PanelLifecycle::with_requirements_view(
            self.host.clone(),
            self.config.clone(),
            identity.clone(),
            self.guard.clone(),
        );
        let watcher =
            HostMutationWatcher::new(self.host.clone(), self.config.clone(), panel.clone());
        let session = Rc::new(PageSession {
            identity: identity.clone(),
            panel,
            tab: TabInjector::new(self.host.clone(), self.config.clone()),
            watcher,
            status: Cell::new(InjectionStatus::Pending),
            attempts: Cell::new(0),
            retry: Cell::new(None),
        });
        *self.session.borrow_mut() = Some(session.clone());

        info!(
            namespace = %identity.namespace,
            resource = %identity.resource,
            "page session started"
        );
        self.attempt_injection(&session);
        InitOutcome::Started(identity)
    }

    fn is_current(&self, session: &Rc<PageSession<H>>) -> bool {
        self.session
            .borrow()
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, session))
    }

    /// One injection attempt; schedules the next on failure.
    fn attempt_injection(&self, session: &Rc<PageSession<H>>) {
        if !self.is_current(session) {
            return;
        }
        let attempt = session.attempts.get() + 1;
        session.attempts.set(attempt);

        let panel = Rc::downgrade(&session.panel);
        let injected = session.tab.inject(move |_event: &dyn HostEvent| {
            let Some(panel) = panel.upgrade() else { return };
            match panel.toggle() {
                Ok(state) => debug!(?state, "panel toggled"),
                Err(InjectError::ContextInvalidated) => {}
                Err(err) => warn!(%err, "panel toggle failed"),
            }
        });

        if injected {
            match session.panel.create_panel() {
                Ok(_) => {
                    if let Err(err) = session.watcher.start() {
                        warn!(%err, "host tab watcher not started");
                    }
                    session.status.set(InjectionStatus::Injected);
                    info!(attempt, page = %session.identity, "injection complete");
                    return;
                }
                Err(err) => debug!(%err, attempt, "panel container not created yet"),
            }
        }

        let policy = self.config.timing.inject_retry_policy();
        if !policy.should_retry(attempt) {
            session.status.set(InjectionStatus::Exhausted);
            error!(attempts = attempt, page = %session.identity, "giving up on injection");
            return;
        }

        let weak = self.this.clone();
        let target = Rc::downgrade(session);
        let handle = self.host.scheduler().set_timeout(
            policy.delay(attempt - 1),
            Box::new(move || {
                let (Some(controller), Some(session)) = (weak.upgrade(), target.upgrade()) else {
                    return;
                };
                session.retry.set(None);
                controller.attempt_injection(&session);
            }),
        );
        if let Some(previous) = session.retry.replace(Some(handle)) {
            self.host.scheduler().cancel(previous);
        }
    }

    /// Observe the document body for client-side navigation. Idempotent.
    pub fn watch_navigation(&self) {
        if self.nav_observer.get().is_some() {
            return;
        }
        let Some(body) = self.host.dom().body() else {
            warn!("document has no body; navigation not observed");
            return;
        };
        let weak = self.this.clone();
        let handle = self.host.dom().observe_subtree(
            &body,
            Box::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.on_dom_mutation();
                }
            }),
        );
        self.nav_observer.set(Some(handle));
    }

    /// React to one batch of document mutations.
    pub fn on_dom_mutation(&self) {
        let href = self.host.dom().href();
        let changed = *self.last_href.borrow() != href;
        if changed {
            *self.last_href.borrow_mut() = href;
            let next = self.locator.parse_identity(&self.host.dom().pathname());
            if next != self.identity() {
                info!(
                    from = ?self.identity().map(|i| i.page_id()),
                    to = ?next.as_ref().map(PageIdentity::page_id),
                    "navigated to another resource"
                );
                self.teardown();
                self.schedule_reinit();
                return;
            }
            debug!("navigated within the same resource");
        }

        let Some(session) = self.session() else {
            return;
        };
        if session.status.get() != InjectionStatus::Injected {
            return;
        }
        // The host may re-render its navigation and drop our tab with it.
        if !session.tab.is_injected() {
            info!(page = %session.identity, "extension tab lost; re-injecting");
            session.status.set(InjectionStatus::Pending);
            session.attempts.set(0);
            self.attempt_injection(&session);
        } else if session.watcher.is_stale() {
            // Or swap its own tabs and keep ours.
            match session.watcher.start() {
                Ok(tabs) => debug!(tabs, "host tabs replaced; watcher rebound"),
                Err(err) => warn!(%err, "host tab watcher not restarted"),
            }
        }
    }

    /// Run `init()` after the settle delay, replacing a pending one.
    pub fn schedule_reinit(&self) {
        let weak = self.this.clone();
        let handle = self.host.scheduler().set_timeout(
            self.config.timing.navigation_settle(),
            Box::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.settle.set(None);
                    controller.init();
                }
            }),
        );
        if let Some(previous) = self.settle.replace(Some(handle)) {
            self.host.scheduler().cancel(previous);
        }
    }

    /// Destroy the current session, if any.
    pub fn teardown(&self) {
        let Some(session) = self.session.borrow_mut().take() else {
            return;
        };
        if let Some(retry) = session.retry.take() {
            self.host.scheduler().cancel(retry);
        }
        session.watcher.stop();
        session.panel.remove();
        session.tab.remove();
        debug!(page = %session.identity, "page session torn down");
    }

    /// Tear everything down, navigation observer included.
    pub fn shutdown(&self) {
        if let Some(settle) = self.settle.take() {
            self.host.scheduler().cancel(settle);
        }
        self.teardown();
        if let Some(observer) = self.nav_observer.take() {
            self.host.dom().disconnect(observer);
        }
    }
}

impl<H: Host> Drop for Controller<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use pretty_assertions::assert_eq;
    use reqrev_harness::{TestHost, fixtures};

    #[test]
    fn unmanaged_page_starts_nothing() {
        let host = Rc::new(TestHost::at("https://github.com/settings/profile"));
        let controller = Controller::new(host.clone(), InjectConfig::default());
        assert_eq!(controller.start(), InitOutcome::Unmanaged);
        assert!(controller.session().is_none());
        assert!(controller.is_watching_navigation());
    }

    #[test]
    fn invalid_context_starts_nothing_quietly() {
        let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
        host.runtime.invalidate();
        let controller = Controller::new(host.clone(), InjectConfig::default());
        assert_eq!(controller.start(), InitOutcome::ContextInvalid);
        assert!(host.runtime.notices().is_empty());
        assert!(host.dom.query_selector("#reqrev-tab").is_none());
    }

    #[test]
    fn immediate_injection_on_rendered_page() {
        let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
        let controller = Controller::new(host.clone(), InjectConfig::default());
        assert_eq!(
            controller.start(),
            InitOutcome::Started(PageIdentity::new("orgA", "repoA"))
        );
        assert_eq!(controller.injection_status(), Some(InjectionStatus::Injected));
        let session = controller.session().unwrap();
        assert_eq!(session.attempts(), 1);
        assert!(session.watcher().is_watching());
        assert!(host.dom.query_selector("#reqrev-panel").is_some());
    }

    #[test]
    fn exhausted_retries_stop_scheduling() {
        let host = Rc::new(fixtures::repo_page_without_nav("orgA", "repoA"));
        let mut config = InjectConfig::default();
        config.timing.inject_max_attempts = 3;
        let controller = Controller::new(host.clone(), config);
        controller.start();

        host.advance(Duration::from_millis(5_000));
        assert_eq!(controller.injection_status(), Some(InjectionStatus::Exhausted));
        assert_eq!(controller.session().unwrap().attempts(), 3);
        assert_eq!(host.scheduler.pending_timers(), 0);
    }

    #[test]
    fn shutdown_disconnects_everything() {
        let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
        let controller = Controller::new(host.clone(), InjectConfig::default());
        controller.start();
        controller.shutdown();
        assert!(!controller.is_watching_navigation());
        assert!(host.dom.query_selector("#reqrev-tab").is_none());
        assert_eq!(host.dom.observer_count(), 0);
        assert_eq!(host.dom.listener_count(), 0);
    }
}
