#![forbid(unsafe_code)]

//! Same-tick reaction to the host re-selecting its tabs.
//!
//! The reconciliation interval eventually corrects any host tab the router
//! re-selects. This watcher corrects it within the same mutation batch, and
//! also tells the two causes apart: a host tab the user just clicked means
//! the user left the panel, anything else is the router re-asserting itself.

use core::time::Duration;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use reqrev_host::{
    AttributeMutation, Host, HostDom, HostEvent, HostScheduler, ListenerHandle, ObserverHandle,
};
use tracing::{debug, info, warn};

use crate::config::InjectConfig;
use crate::dom::{HostPage, TAB_STATE_ATTRIBUTES};
use crate::error::{InjectError, Result};
use crate::panel::{PanelLifecycle, PanelVisibility};

#[derive(Debug, Clone)]
struct UserIntent<E> {
    tab: E,
    at: Duration,
}

pub struct HostMutationWatcher<H: Host> {
    host: Rc<H>,
    config: Rc<InjectConfig>,
    panel: Rc<PanelLifecycle<H>>,
    observer: Cell<Option<ObserverHandle>>,
    listeners: RefCell<Vec<ListenerHandle>>,
    observed: RefCell<Vec<H::Element>>,
    intent: RefCell<Option<UserIntent<H::Element>>>,
    corrections: Cell<u64>,
    this: Weak<Self>,
}

impl<H: Host> HostMutationWatcher<H> {
    pub fn new(host: Rc<H>, config: Rc<InjectConfig>, panel: Rc<PanelLifecycle<H>>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            host,
            config,
            panel,
            observer: Cell::new(None),
            listeners: RefCell::new(Vec::new()),
            observed: RefCell::new(Vec::new()),
            intent: RefCell::new(None),
            corrections: Cell::new(0),
            this: this.clone(),
        })
    }

    /// Observe the current host tabs, replacing any earlier observation.
    ///
    /// Returns the number of tabs watched.
    pub fn start(&self) -> Result<usize> {
        self.stop();
        let dom = self.host.dom();
        let tabs = HostPage::new(dom, &self.config).host_tabs();
        if tabs.is_empty() {
            return Err(InjectError::HostNotReady("host tabs"));
        }

        let weak = self.this.clone();
        let observer = dom.observe_attributes(
            &tabs,
            &TAB_STATE_ATTRIBUTES,
            Box::new(move |records| {
                if let Some(watcher) = weak.upgrade() {
                    watcher.on_mutations(records);
                }
            }),
        );
        self.observer.set(Some(observer));

        let mut listeners = Vec::with_capacity(tabs.len());
        for tab in &tabs {
            let weak = self.this.clone();
            let clicked = tab.clone();
            listeners.push(dom.listen_click(
                tab,
                Box::new(move |_event: &dyn HostEvent| {
                    if let Some(watcher) = weak.upgrade() {
                        watcher.record_intent(clicked.clone());
                    }
                }),
            ));
        }
        *self.listeners.borrow_mut() = listeners;
        let watched = tabs.len();
        *self.observed.borrow_mut() = tabs;

        debug!(tabs = watched, "watching host tab state");
        Ok(watched)
    }

    /// Disconnect the observer and drop the click listeners. Idempotent.
    pub fn stop(&self) {
        let dom = self.host.dom();
        if let Some(observer) = self.observer.take() {
            dom.disconnect(observer);
        }
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in listeners {
            dom.unlisten(listener);
        }
        self.observed.borrow_mut().clear();
        self.intent.borrow_mut().take();
    }

    pub fn is_watching(&self) -> bool {
        self.observer.get().is_some()
    }

    /// Whether the host swapped its tab elements since `start()`.
    ///
    /// A stopped watcher is never stale, and neither is one whose tabs are
    /// gone with nothing rendered in their place yet.
    pub fn is_stale(&self) -> bool {
        if !self.is_watching() {
            return false;
        }
        let current = HostPage::new(self.host.dom(), &self.config).host_tabs();
        !current.is_empty() && *self.observed.borrow() != current
    }

    /// Host tabs forced back to deselected so far.
    pub fn corrections(&self) -> u64 {
        self.corrections.get()
    }

    fn record_intent(&self, tab: H::Element) {
        let at = self.host.scheduler().now();
        *self.intent.borrow_mut() = Some(UserIntent { tab, at });
    }

    fn take_intent_for(&self, tab: &H::Element) -> bool {
        let now = self.host.scheduler().now();
        let window = self.config.timing.user_intent_window();
        let mut intent = self.intent.borrow_mut();
        match intent.as_ref() {
            Some(i) if &i.tab == tab && now.saturating_sub(i.at) <= window => {
                intent.take();
                true
            }
            _ => false,
        }
    }

    /// Handle one batch of attribute mutations on host tabs.
    pub fn on_mutations(&self, records: Vec<AttributeMutation<H::Element>>) {
        if self.panel.visibility() != Some(PanelVisibility::Visible) {
            return;
        }
        let page = HostPage::new(self.host.dom(), &self.config);

        let mut targets: Vec<H::Element> = Vec::new();
        for record in records {
            if !targets.contains(&record.target) {
                targets.push(record.target);
            }
        }

        for tab in targets {
            if page.is_extension_tab(&tab) || !page.is_tab_selected(&tab) {
                continue;
            }
            if self.take_intent_for(&tab) {
                info!("user selected a host tab; hiding panel");
                if let Err(err) = self.panel.hide() {
                    warn!(%err, "hiding panel after host tab selection failed");
                }
                return;
            }
            page.reset_tab_state(&tab);
            if let Some(own) = page.extension_tab() {
                page.set_tab_selected(&own);
            }
            self.corrections.set(self.corrections.get() + 1);
            debug!("host re-selected a tab; forced back");
        }
    }
}

impl<H: Host> Drop for HostMutationWatcher<H> {
    fn drop(&mut self) {
        self.stop();
    }
}
