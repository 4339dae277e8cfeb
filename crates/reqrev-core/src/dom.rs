#![forbid(unsafe_code)]

//! Live queries and idempotent mutators over the host page.
//!
//! Nothing here caches an element: each accessor runs one query against the
//! current document, because the host SPA replaces nodes at will. Mutators
//! compare before writing, so calling them every reconciliation tick does not
//! flood the host's own observers with no-op attribute writes.

use reqrev_host::HostDom;

use crate::config::{InjectConfig, TabMarkers};

/// Attribute set on host content regions the panel has hidden.
pub const HIDDEN_BY_PANEL_ATTR: &str = "data-reqrev-hidden";

/// Attributes the host toggles when it selects a tab.
pub const TAB_STATE_ATTRIBUTES: [&str; 3] = ["class", "aria-selected", "aria-current"];

/// Accessors bound to one document and one config.
pub struct HostPage<'a, D: HostDom> {
    dom: &'a D,
    config: &'a InjectConfig,
}

impl<'a, D: HostDom> HostPage<'a, D> {
    pub fn new(dom: &'a D, config: &'a InjectConfig) -> Self {
        Self { dom, config }
    }

    pub fn nav_bar(&self) -> Option<D::Element> {
        self.dom.query_selector(&self.config.selectors.nav)
    }

    /// Tab links in the navigation widget, the extension's own excluded.
    pub fn host_tabs(&self) -> Vec<D::Element> {
        let Some(nav) = self.nav_bar() else {
            return Vec::new();
        };
        self.dom
            .query_selector_all_within(&nav, &self.config.selectors.tab_links)
            .into_iter()
            .filter(|tab| !self.is_extension_tab(tab))
            .collect()
    }

    pub fn extension_tab(&self) -> Option<D::Element> {
        self.dom.element_by_id(&self.config.elements.tab_id)
    }

    pub fn panel_container(&self) -> Option<D::Element> {
        self.dom.element_by_id(&self.config.elements.panel_id)
    }

    pub fn main_content(&self) -> Option<D::Element> {
        self.dom.query_selector(&self.config.selectors.main_content)
    }

    pub fn host_content_regions(&self) -> Vec<D::Element> {
        self.dom.query_selector_all(&self.config.selectors.host_content)
    }

    /// Host tab whose visible text matches the configured anchor text.
    pub fn anchor_tab(&self) -> Option<D::Element> {
        let wanted = self.config.selectors.anchor_tab_text.trim();
        if wanted.is_empty() {
            return None;
        }
        // Tab text carries counters ("Pull requests 12"), so match the prefix.
        self.host_tabs().into_iter().find(|tab| {
            let text = self.dom.text_content(tab);
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            text == wanted || text.starts_with(&format!("{wanted} "))
        })
    }

    pub fn is_extension_tab(&self, element: &D::Element) -> bool {
        self.dom.attribute(element, "id").as_deref() == Some(self.config.elements.tab_id.as_str())
    }

    /// Whether the host (or we) marked this tab selected by any marker.
    pub fn is_tab_selected(&self, tab: &D::Element) -> bool {
        let markers = &self.config.markers;
        let class = self.dom.attribute(tab, "class").unwrap_or_default();
        let has_class = class
            .split_whitespace()
            .any(|token| markers.selected_classes.iter().any(|c| c == token));
        let aria_selected = self.dom.attribute(tab, "aria-selected").as_deref() == Some("true");
        let aria_current = self
            .dom
            .attribute(tab, "aria-current")
            .is_some_and(|v| v != "false");
        has_class || aria_selected || aria_current
    }

    /// Mark `tab` selected with every marker the host uses.
    pub fn set_tab_selected(&self, tab: &D::Element) {
        let markers = &self.config.markers;
        let current = self.dom.attribute(tab, "class").unwrap_or_default();
        let selected = selected_tab_class(&current, markers);
        self.write_attribute(tab, "class", &selected);
        self.write_attribute(tab, "aria-selected", "true");
        self.write_attribute(tab, "aria-current", &markers.aria_current_value);
    }

    /// Restore `tab` to its canonical deselected state.
    ///
    /// Class, `aria-selected` and `aria-current` are cleared together; the
    /// host renders a tab as selected if any one of them survives.
    pub fn reset_tab_state(&self, tab: &D::Element) {
        let current = self.dom.attribute(tab, "class").unwrap_or_default();
        let base = canonical_tab_class(&current, &self.config.markers);
        self.write_attribute(tab, "class", &base);
        self.write_attribute(tab, "aria-selected", "false");
        if self.dom.attribute(tab, "aria-current").is_some() {
            self.dom.remove_attribute(tab, "aria-current");
        }
    }

    /// Hide every host content region not already hidden by the panel.
    pub fn hide_host_content(&self) -> usize {
        let mut hidden = 0;
        for region in self.host_content_regions() {
            if self.dom.attribute(&region, HIDDEN_BY_PANEL_ATTR).is_none() {
                self.dom.set_style_property(&region, "display", Some("none"));
                self.dom.set_attribute(&region, HIDDEN_BY_PANEL_ATTR, "true");
                hidden += 1;
            }
        }
        hidden
    }

    /// Reveal every host content region the panel hid.
    pub fn show_host_content(&self) -> usize {
        let mut shown = 0;
        for region in self.host_content_regions() {
            if self.dom.attribute(&region, HIDDEN_BY_PANEL_ATTR).is_some() {
                self.dom.set_style_property(&region, "display", None);
                self.dom.remove_attribute(&region, HIDDEN_BY_PANEL_ATTR);
                shown += 1;
            }
        }
        shown
    }

    /// Replace one marker class with another in a single class write.
    pub fn swap_class(&self, element: &D::Element, remove: &str, add: &str) {
        let current = self.dom.attribute(element, "class").unwrap_or_default();
        let next = swapped_class(&current, remove, add);
        self.write_attribute(element, "class", &next);
    }

    pub fn has_class(&self, element: &D::Element, class: &str) -> bool {
        self.dom
            .attribute(element, "class")
            .is_some_and(|c| c.split_whitespace().any(|t| t == class))
    }

    fn write_attribute(&self, element: &D::Element, name: &str, value: &str) {
        if self.dom.attribute(element, name).as_deref() != Some(value) {
            self.dom.set_attribute(element, name, value);
        }
    }
}

/// Class string of a deselected tab: selection markers stripped, duplicates
/// dropped, base class present, remaining order preserved.
#[must_use]
pub fn canonical_tab_class(current: &str, markers: &TabMarkers) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    for token in current.split_whitespace() {
        if markers.selected_classes.iter().any(|c| c == token) || tokens.contains(&token) {
            continue;
        }
        tokens.push(token);
    }
    if !markers.base_class.is_empty() && !tokens.contains(&markers.base_class.as_str()) {
        tokens.insert(0, markers.base_class.as_str());
    }
    tokens.join(" ")
}

/// Class string of a selected tab: the canonical string plus every selected
/// marker class.
#[must_use]
pub fn selected_tab_class(current: &str, markers: &TabMarkers) -> String {
    let mut class = canonical_tab_class(current, markers);
    for marker in &markers.selected_classes {
        if !class.is_empty() {
            class.push(' ');
        }
        class.push_str(marker);
    }
    class
}

/// `current` with `remove` dropped and `add` present exactly once.
#[must_use]
pub fn swapped_class(current: &str, remove: &str, add: &str) -> String {
    let mut tokens: Vec<&str> = current
        .split_whitespace()
        .filter(|t| *t != remove && *t != add)
        .collect();
    tokens.push(add);
    tokens.join(" ")
}
