#![forbid(unsafe_code)]

//! The extension's tab in the host navigation widget.

use std::cell::Cell;
use std::rc::Rc;

use reqrev_host::{Host, HostDom, HostEvent, ListenerHandle};
use tracing::{debug, info};

use crate::config::InjectConfig;
use crate::dom::HostPage;

/// Inserts and removes the extension tab.
///
/// Presence is keyed on the tab's DOM id, so injecting twice leaves one tab.
pub struct TabInjector<H: Host> {
    host: Rc<H>,
    config: Rc<InjectConfig>,
    listener: Cell<Option<ListenerHandle>>,
}

impl<H: Host> TabInjector<H> {
    pub fn new(host: Rc<H>, config: Rc<InjectConfig>) -> Self {
        Self {
            host,
            config,
            listener: Cell::new(None),
        }
    }

    /// Insert the tab with `on_activate` as its click handler.
    ///
    /// Returns `false` when the navigation widget is not rendered yet; the
    /// caller is expected to retry. Returns `true` if the tab is present
    /// afterwards, whether it was inserted now or already there.
    pub fn inject<F>(&self, mut on_activate: F) -> bool
    where
        F: FnMut(&dyn HostEvent) + 'static,
    {
        let dom = self.host.dom();
        let page = HostPage::new(dom, &self.config);
        let Some(nav) = page.nav_bar() else {
            debug!("navigation widget not rendered; tab not injected");
            return false;
        };
        if page.extension_tab().is_some() {
            return true;
        }

        let host_tabs = page.host_tabs();
        let host_item = host_tabs
            .first()
            .and_then(|tab| dom.parent(tab))
            .filter(|parent| dom.tag_name(parent).eq_ignore_ascii_case("li"));

        let tab = self.build_tab();
        let node = match &host_item {
            Some(item) => {
                let wrapper = dom.create_element("li");
                dom.set_attribute(&wrapper, "id", &self.config.elements.tab_item_id);
                if let Some(class) = dom.attribute(item, "class") {
                    dom.set_attribute(&wrapper, "class", &class);
                }
                dom.append_child(&wrapper, &tab);
                wrapper
            }
            None => tab.clone(),
        };

        let handle = dom.listen_click(
            &tab,
            Box::new(move |event: &dyn HostEvent| {
                // The host router listens on the same click; keep it out.
                event.prevent_default();
                event.stop_propagation();
                on_activate(event);
            }),
        );
        if let Some(previous) = self.listener.replace(Some(handle)) {
            dom.unlisten(previous);
        }

        let wrapped = host_item.is_some();
        let outer = |tab: &H::Element| -> H::Element {
            if wrapped {
                dom.parent(tab).unwrap_or_else(|| tab.clone())
            } else {
                tab.clone()
            }
        };

        match page.anchor_tab() {
            Some(anchor) => {
                let anchor_node = outer(&anchor);
                let parent = dom.parent(&anchor_node).unwrap_or_else(|| nav.clone());
                let next = dom.next_sibling(&anchor_node);
                dom.insert_before(&parent, &node, next.as_ref());
                debug!(anchor = %self.config.selectors.anchor_tab_text, "tab inserted after anchor");
            }
            None => {
                let container = host_tabs
                    .last()
                    .map(|tab| outer(tab))
                    .and_then(|last| dom.parent(&last))
                    .unwrap_or(nav);
                dom.append_child(&container, &node);
                debug!("anchor tab not found; tab appended");
            }
        }

        info!(tab_id = %self.config.elements.tab_id, "extension tab injected");
        true
    }

    /// Delete the tab and its click listener. No-op if absent.
    pub fn remove(&self) {
        let dom = self.host.dom();
        if let Some(handle) = self.listener.take() {
            dom.unlisten(handle);
        }
        let ids = &self.config.elements;
        if let Some(item) = dom.element_by_id(&ids.tab_item_id) {
            dom.remove(&item);
        }
        if let Some(tab) = dom.element_by_id(&ids.tab_id) {
            dom.remove(&tab);
        }
    }

    pub fn is_injected(&self) -> bool {
        HostPage::new(self.host.dom(), &self.config)
            .extension_tab()
            .is_some()
    }

    fn build_tab(&self) -> H::Element {
        let dom = self.host.dom();
        let ids = &self.config.elements;
        let tab = dom.create_element("a");
        dom.set_attribute(&tab, "id", &ids.tab_id);
        dom.set_attribute(&tab, "class", &self.config.markers.base_class);
        dom.set_attribute(&tab, "href", "#");
        dom.set_attribute(&tab, "role", "tab");
        dom.set_attribute(&tab, "aria-selected", "false");
        dom.set_attribute(&tab, "data-tab-item", "reqrev");

        let label = dom.create_element("span");
        dom.set_attribute(&label, "data-content", &ids.tab_label);
        dom.set_text_content(&label, &ids.tab_label);
        dom.append_child(&tab, &label);
        tab
    }
}

impl<H: Host> Drop for TabInjector<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.take() {
            self.host.dom().unlisten(handle);
        }
    }
}
