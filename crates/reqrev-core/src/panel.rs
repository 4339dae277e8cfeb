#![forbid(unsafe_code)]

//! Panel lifecycle state machine.
//!
//! # States
//!
//! ```text
//! Uninstalled --create_panel--> Hidden <--show/hide/toggle--> Visible
//!      ^                           |                             |
//!      +-----------remove()--------+-------------remove()--------+
//! ```
//!
//! `Uninstalled` is terminal once [`PanelLifecycle::remove`] ran. Visibility
//! is never mirrored in a field: the container's marker class is read back
//! on every query, so the host replacing the container cannot desynchronise
//! state and DOM. A created panel whose container the host discarded reads
//! back as `Hidden`; the next toggle re-creates it.
//!
//! # Racing the host router
//!
//! The host SPA re-selects its own tabs after we deselect them, sometimes a
//! frame later, sometimes after its own timers. `show()` therefore resets the
//! host tabs at three horizons (now, next frame, short timeout) and starts a
//! fixed-interval reconciliation loop that keeps re-applying the visible
//! state until `hide()` or `remove()`.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use reqrev_host::{Host, HostDom, HostScheduler, TimerHandle};
use tracing::{debug, info, trace, warn};

use crate::config::InjectConfig;
use crate::content::{PanelContent, RequirementsView};
use crate::dom::HostPage;
use crate::error::{InjectError, Result};
use crate::guard::{CONTEXT_INVALIDATED_NOTICE, ContextGuard};
use crate::locator::PageIdentity;

/// Panel visibility as read from the container's marker class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelVisibility {
    Hidden,
    Visible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Uninstalled,
    Hidden,
    Visible,
}

impl From<PanelVisibility> for PanelState {
    fn from(v: PanelVisibility) -> Self {
        match v {
            PanelVisibility::Hidden => Self::Hidden,
            PanelVisibility::Visible => Self::Visible,
        }
    }
}

/// When a host-tab deactivation runs relative to `show()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationHorizon {
    Immediate,
    NextFrame,
    Timeout,
}

impl DeactivationHorizon {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::NextFrame => "next_frame",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Default)]
struct Timers {
    reconcile: Option<TimerHandle>,
    pending_show: Option<TimerHandle>,
    frame: Option<TimerHandle>,
    deferred: Option<TimerHandle>,
}

impl Timers {
    fn take_deactivations(&mut self) -> [Option<TimerHandle>; 2] {
        [self.frame.take(), self.deferred.take()]
    }

    fn take_all(&mut self) -> [Option<TimerHandle>; 4] {
        [
            self.reconcile.take(),
            self.pending_show.take(),
            self.frame.take(),
            self.deferred.take(),
        ]
    }
}

/// Owns the panel container for one page identity.
pub struct PanelLifecycle<H: Host> {
    host: Rc<H>,
    config: Rc<InjectConfig>,
    identity: PageIdentity,
    guard: Rc<ContextGuard<H>>,
    content: Box<dyn PanelContent<H>>,
    timers: RefCell<Timers>,
    /// Host tab that was selected when the panel was shown.
    restore_tab: RefCell<Option<H::Element>>,
    created: Cell<bool>,
    removed: Cell<bool>,
    ticks: Cell<u64>,
    this: Weak<Self>,
}

impl<H: Host> PanelLifecycle<H> {
    pub fn new(
        host: Rc<H>,
        config: Rc<InjectConfig>,
        identity: PageIdentity,
        guard: Rc<ContextGuard<H>>,
        content: Box<dyn PanelContent<H>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            host,
            config,
            identity,
            guard,
            content,
            timers: RefCell::new(Timers::default()),
            restore_tab: RefCell::new(None),
            created: Cell::new(false),
            removed: Cell::new(false),
            ticks: Cell::new(0),
            this: this.clone(),
        })
    }

    /// A lifecycle rendering the default [`RequirementsView`].
    pub fn with_requirements_view(
        host: Rc<H>,
        config: Rc<InjectConfig>,
        identity: PageIdentity,
        guard: Rc<ContextGuard<H>>,
    ) -> Rc<Self> {
        Self::new(host, config, identity, guard, Box::new(RequirementsView))
    }

    pub fn identity(&self) -> &PageIdentity {
        &self.identity
    }

    fn page(&self) -> HostPage<'_, H::Dom> {
        HostPage::new(self.host.dom(), &self.config)
    }

    /// Visibility from the DOM, `None` when no container exists.
    pub fn visibility(&self) -> Option<PanelVisibility> {
        if self.removed.get() {
            return None;
        }
        let page = self.page();
        let container = page.panel_container()?;
        if page.has_class(&container, &self.config.elements.visible_class) {
            Some(PanelVisibility::Visible)
        } else {
            Some(PanelVisibility::Hidden)
        }
    }

    pub fn state(&self) -> PanelState {
        match self.visibility() {
            Some(visibility) => visibility.into(),
            None if self.created.get() && !self.removed.get() => PanelState::Hidden,
            None => PanelState::Uninstalled,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visibility() == Some(PanelVisibility::Visible)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }

    pub fn reconciliation_active(&self) -> bool {
        self.timers.borrow().reconcile.is_some()
    }

    pub fn has_pending_show(&self) -> bool {
        self.timers.borrow().pending_show.is_some()
    }

    /// Reconciliation ticks run so far, including ones that stopped the loop.
    pub fn tick_count(&self) -> u64 {
        self.ticks.get()
    }

    /// Insert the panel container, hidden. Idempotent.
    ///
    /// The container becomes the first child of the main content region, or
    /// of the body when the host has no main region.
    pub fn create_panel(&self) -> Result<H::Element> {
        if self.removed.get() {
            return Err(InjectError::Uninstalled);
        }
        let page = self.page();
        if let Some(existing) = page.panel_container() {
            self.created.set(true);
            return Ok(existing);
        }

        let dom = self.host.dom();
        let parent = page
            .main_content()
            .or_else(|| dom.body())
            .ok_or(InjectError::HostNotReady("main content region"))?;

        let ids = &self.config.elements;
        let container = dom.create_element("section");
        dom.set_attribute(&container, "id", &ids.panel_id);
        dom.set_attribute(
            &container,
            "class",
            &format!("{} {}", ids.panel_class, ids.hidden_class),
        );
        dom.set_attribute(&container, "role", "tabpanel");
        dom.set_attribute(&container, "aria-labelledby", &ids.tab_id);
        let first = dom.first_child(&parent);
        dom.insert_before(&parent, &container, first.as_ref());

        self.content.mount(&self.host, &container, &self.identity);
        self.created.set(true);
        info!(
            namespace = %self.identity.namespace,
            resource = %self.identity.resource,
            "panel created"
        );
        Ok(container)
    }

    /// Flip visibility; create and show after the mount delay on first use.
    ///
    /// With an invalidated extension context the user gets a one-time notice
    /// and nothing is created.
    pub fn toggle(&self) -> Result<PanelState> {
        if self.removed.get() {
            return Err(InjectError::Uninstalled);
        }
        if !self.guard.is_context_valid() {
            self.guard.report_invalid(CONTEXT_INVALIDATED_NOTICE);
            return Err(InjectError::ContextInvalidated);
        }

        match self.visibility() {
            None => {
                self.create_panel()?;
                self.schedule_show();
                Ok(PanelState::Hidden)
            }
            Some(PanelVisibility::Visible) => {
                self.hide()?;
                Ok(PanelState::Hidden)
            }
            Some(PanelVisibility::Hidden) => {
                self.show()?;
                Ok(PanelState::Visible)
            }
        }
    }

    fn schedule_show(&self) {
        let weak = self.this.clone();
        let handle = self.host.scheduler().set_timeout(
            self.config.timing.mount_show_delay(),
            Box::new(move || {
                let Some(panel) = weak.upgrade() else { return };
                panel.timers.borrow_mut().pending_show = None;
                if panel.visibility() == Some(PanelVisibility::Hidden)
                    && let Err(err) = panel.show()
                {
                    warn!(%err, "deferred show failed");
                }
            }),
        );
        let previous = self.timers.borrow_mut().pending_show.replace(handle);
        if let Some(previous) = previous {
            self.host.scheduler().cancel(previous);
        }
    }

    /// Make the panel the selected view.
    pub fn show(&self) -> Result<()> {
        if self.removed.get() {
            return Err(InjectError::Uninstalled);
        }
        let page = self.page();
        let container = page
            .panel_container()
            .ok_or(InjectError::HostNotReady("panel container"))?;
        let pending = self.timers.borrow_mut().pending_show.take();
        if let Some(pending) = pending {
            self.host.scheduler().cancel(pending);
        }

        if !page.has_class(&container, &self.config.elements.visible_class) {
            let selected = page
                .host_tabs()
                .into_iter()
                .find(|tab| page.is_tab_selected(tab));
            *self.restore_tab.borrow_mut() = selected;
        }

        let ids = &self.config.elements;
        page.swap_class(&container, &ids.hidden_class, &ids.visible_class);
        if let Some(tab) = page.extension_tab() {
            page.set_tab_selected(&tab);
        }
        let hidden = page.hide_host_content();
        self.deactivate_host_tabs();
        self.start_reconciliation();

        info!(page = %self.identity, hidden_regions = hidden, "panel shown");
        Ok(())
    }

    /// Return the page to the host: content restored, own tab deselected.
    pub fn hide(&self) -> Result<()> {
        if self.removed.get() {
            return Err(InjectError::Uninstalled);
        }
        self.stop_reconciliation();
        self.cancel_pending();

        let page = self.page();
        if let Some(container) = page.panel_container() {
            let ids = &self.config.elements;
            page.swap_class(&container, &ids.visible_class, &ids.hidden_class);
        }
        self.release_host_page();
        info!(page = %self.identity, "panel hidden");
        Ok(())
    }

    fn release_host_page(&self) {
        let page = self.page();
        let shown = page.show_host_content();
        if let Some(tab) = page.extension_tab() {
            page.reset_tab_state(&tab);
        }

        let remembered = self.restore_tab.borrow_mut().take();
        let host_tabs = page.host_tabs();
        if !host_tabs.iter().any(|tab| page.is_tab_selected(tab))
            && let Some(tab) = remembered.filter(|tab| host_tabs.contains(tab))
        {
            page.set_tab_selected(&tab);
            debug!("previously selected host tab restored");
        }
        trace!(shown_regions = shown, "host page released");
    }

    /// Deselect every host tab now, on the next frame and after the
    /// configured short delay.
    ///
    /// The deferred passes do nothing once the panel is no longer visible.
    pub fn deactivate_host_tabs(&self) -> usize {
        let reset = self.deactivate_now(DeactivationHorizon::Immediate);

        let scheduler = self.host.scheduler();
        let weak = self.this.clone();
        let frame = scheduler.request_animation_frame(Box::new(move || {
            if let Some(panel) = weak.upgrade() {
                panel.timers.borrow_mut().frame = None;
                panel.deactivate_deferred(DeactivationHorizon::NextFrame);
            }
        }));
        let weak = self.this.clone();
        let deferred = scheduler.set_timeout(
            self.config.timing.deactivate_delay(),
            Box::new(move || {
                if let Some(panel) = weak.upgrade() {
                    panel.timers.borrow_mut().deferred = None;
                    panel.deactivate_deferred(DeactivationHorizon::Timeout);
                }
            }),
        );

        let stale = {
            let mut timers = self.timers.borrow_mut();
            [timers.frame.replace(frame), timers.deferred.replace(deferred)]
        };
        for handle in stale.into_iter().flatten() {
            scheduler.cancel(handle);
        }
        reset
    }

    fn deactivate_deferred(&self, horizon: DeactivationHorizon) {
        if self.is_visible() {
            self.deactivate_now(horizon);
        }
    }

    fn deactivate_now(&self, horizon: DeactivationHorizon) -> usize {
        let page = self.page();
        let mut reset = 0;
        for tab in page.host_tabs() {
            if page.is_tab_selected(&tab) {
                reset += 1;
            }
            page.reset_tab_state(&tab);
        }
        if reset > 0 {
            debug!(horizon = horizon.as_str(), reset, "host tabs deactivated");
        }
        reset
    }

    /// Start the reconciliation interval, replacing any running one.
    pub fn start_reconciliation(&self) {
        self.stop_reconciliation();
        let weak = self.this.clone();
        let handle = self.host.scheduler().set_interval(
            self.config.timing.reconcile_interval(),
            Box::new(move || {
                if let Some(panel) = weak.upgrade() {
                    panel.reconcile_tick();
                }
            }),
        );
        self.timers.borrow_mut().reconcile = Some(handle);
    }

    pub fn stop_reconciliation(&self) {
        let handle = self.timers.borrow_mut().reconcile.take();
        if let Some(handle) = handle {
            self.host.scheduler().cancel(handle);
        }
    }

    /// One reconciliation pass. Errors are logged, never propagated.
    ///
    /// A panel that stopped being visible without `hide()` (marker flipped,
    /// container discarded) gives the host page back and ends the loop.
    pub fn reconcile_tick(&self) {
        self.ticks.set(self.ticks.get() + 1);
        if !self.is_visible() {
            debug!("panel no longer visible; releasing the host page");
            self.stop_reconciliation();
            self.cancel_pending();
            self.release_host_page();
            return;
        }
        match self.reconcile() {
            Ok(0) => {}
            Ok(corrected) => debug!(corrected, "reconciliation corrected host tabs"),
            Err(err) => warn!(%err, "reconciliation tick failed"),
        }
    }

    /// Re-apply the visible state. Returns how many host tabs had to be
    /// deselected.
    pub fn reconcile(&self) -> Result<usize> {
        let page = self.page();
        let corrected = self.deactivate_now(DeactivationHorizon::Timeout);
        page.hide_host_content();
        let tab = page
            .extension_tab()
            .ok_or(InjectError::HostNotReady("extension tab"))?;
        page.set_tab_selected(&tab);
        Ok(corrected)
    }

    fn cancel_pending(&self) {
        let [frame, deferred] = self.timers.borrow_mut().take_deactivations();
        let pending = self.timers.borrow_mut().pending_show.take();
        for handle in [frame, deferred, pending].into_iter().flatten() {
            self.host.scheduler().cancel(handle);
        }
    }

    /// Tear the panel down for good.
    ///
    /// Cancels every timer, gives the host page back if the panel was
    /// visible, unmounts the content and deletes the container.
    pub fn remove(&self) {
        let was_visible = self.is_visible();
        if self.removed.replace(true) {
            return;
        }
        let handles = self.timers.borrow_mut().take_all();
        for handle in handles.into_iter().flatten() {
            self.host.scheduler().cancel(handle);
        }

        let page = self.page();
        if was_visible {
            self.release_host_page();
        }
        if let Some(container) = page.panel_container() {
            self.content.unmount(&self.host, &container);
            self.host.dom().remove(&container);
        }
        info!(page = %self.identity, "panel removed");
    }
}

impl<H: Host> Drop for PanelLifecycle<H> {
    fn drop(&mut self) {
        let handles = self.timers.get_mut().take_all();
        for handle in handles.into_iter().flatten() {
            self.host.scheduler().cancel(handle);
        }
    }
}
