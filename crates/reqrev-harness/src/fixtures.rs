#![forbid(unsafe_code)]

//! GitHub-shaped repository pages and a scripted host router.
//!
//! The markup mirrors the parts of a repository page the integration reads:
//!
//! ```text
//! body
//! └── div.application-main
//!     ├── div#repository-container-header
//!     │   └── nav.js-repo-nav.UnderlineNav[aria-label="Repository"]
//!     │       └── ul.UnderlineNav-body
//!     │           └── li.d-inline-flex > a.UnderlineNav-item   (one per tab)
//!     └── main#js-repo-pjax-container
//!         └── turbo-frame#repo-content-turbo-frame
//!             └── div.repository-content
//! ```

use core::time::Duration;
use std::rc::Rc;

use reqrev_host::{HostDom, HostScheduler, TimerHandle};

use crate::{ClickOutcome, NodeId, TestHost};

pub const ORIGIN: &str = "https://github.com";

/// Host tabs rendered in every fixture nav, in order.
pub const HOST_TAB_LABELS: [&str; 5] = ["Code", "Issues", "Pull requests", "Actions", "Settings"];

const TAB_CLASS: &str = "UnderlineNav-item";
const SELECTED_CLASS: &str = "selected";

/// A fully rendered repository page at `/<namespace>/<resource>` with the
/// "Code" tab selected.
#[must_use]
pub fn repo_page(namespace: &str, resource: &str) -> TestHost {
    let host = repo_page_without_nav(namespace, resource);
    render_nav(&host);
    host
}

/// A repository page whose navigation widget has not rendered yet.
#[must_use]
pub fn repo_page_without_nav(namespace: &str, resource: &str) -> TestHost {
    let host = TestHost::at(&format!("{ORIGIN}/{namespace}/{resource}"));
    let dom = &host.dom;
    let Some(body) = dom.body() else {
        return host;
    };

    let app = dom.element("div", &[("class", "application-main")]);
    dom.append_child(&body, &app);
    let header = dom.element("div", &[("id", "repository-container-header")]);
    dom.append_child(&app, &header);
    let main = dom.element("main", &[("id", "js-repo-pjax-container")]);
    dom.append_child(&app, &main);
    let frame = dom.element("turbo-frame", &[("id", "repo-content-turbo-frame")]);
    dom.append_child(&main, &frame);
    render_content(&host, "README.md");
    host
}

/// Render (or re-render) the navigation widget for the current URL,
/// selecting the tab that matches the path. Returns the nav element.
pub fn render_nav(host: &TestHost) -> Option<NodeId> {
    let dom = &host.dom;
    let header = dom.element_by_id("repository-container-header")?;
    if let Some(old) = dom.query_selector("nav.js-repo-nav") {
        dom.remove(&old);
    }

    let pathname = dom.pathname();
    let base = base_path(&pathname);
    let selected = label_for_path(&pathname);

    let nav = dom.element(
        "nav",
        &[
            ("class", "js-repo-nav js-sidenav-container-pjax UnderlineNav"),
            ("aria-label", "Repository"),
        ],
    );
    let list = dom.element("ul", &[("class", "UnderlineNav-body list-style-none")]);
    dom.append_child(&nav, &list);

    for label in HOST_TAB_LABELS {
        let item = dom.element("li", &[("class", "d-inline-flex")]);
        let tab = tab_element(host, &base, label, label == selected);
        dom.append_child(&item, &tab);
        dom.append_child(&list, &item);
    }

    dom.append_child(&header, &nav);
    Some(nav)
}

fn tab_element(host: &TestHost, base: &str, label: &str, selected: bool) -> NodeId {
    let dom = &host.dom;
    let slug = slug(label);
    let href = if slug == "code" {
        base.to_owned()
    } else {
        format!("{base}/{slug}")
    };
    let id = format!("{slug}-tab");
    let item_key = format!("i{slug}-tab");
    let tab = dom.element(
        "a",
        &[
            ("id", id.as_str()),
            ("href", href.as_str()),
            ("class", TAB_CLASS),
            ("data-tab-item", item_key.as_str()),
        ],
    );
    if selected {
        dom.set_attribute(&tab, "class", &format!("{TAB_CLASS} {SELECTED_CLASS}"));
        dom.set_attribute(&tab, "aria-current", "page");
    }
    let text = dom.element("span", &[("data-content", label)]);
    dom.set_text_content(&text, label);
    dom.append_child(&tab, &text);
    tab
}

/// Replace the host content region's children, as a turbo-frame visit does.
pub fn render_content(host: &TestHost, title: &str) {
    let dom = &host.dom;
    let Some(frame) = dom.element_by_id("repo-content-turbo-frame") else {
        return;
    };
    dom.set_text_content(&frame, "");
    let content = dom.element("div", &[("class", "repository-content")]);
    dom.set_text_content(&content, title);
    dom.append_child(&frame, &content);
}

/// Client-side navigation to `path`.
///
/// Same repository: the nav is kept and the router moves the selection.
/// Another repository: the nav is rendered again. Either way the content
/// region is replaced. Records are delivered at the next flush.
pub fn navigate_spa(host: &TestHost, path: &str) {
    let before = base_path(&host.dom.pathname());
    host.dom.set_location(&format!("{ORIGIN}{path}"));
    let after = base_path(path);

    if before == after {
        if let Some(tab) = host_tab(host, label_for_path(path)) {
            select(host, &tab);
        }
    } else {
        render_nav(host);
    }
    render_content(host, path);
}

/// The host tab whose label is `label`.
pub fn host_tab(host: &TestHost, label: &str) -> Option<NodeId> {
    let dom = &host.dom;
    let nav = dom.query_selector("nav.js-repo-nav")?;
    dom.query_selector_all_within(&nav, &format!("a.{TAB_CLASS}"))
        .into_iter()
        .find(|tab| dom.text_content(tab).trim() == label)
}

/// Plays the host's client-side router.
pub struct HostScript {
    host: Rc<TestHost>,
}

impl HostScript {
    pub fn new(host: &Rc<TestHost>) -> Self {
        Self { host: host.clone() }
    }

    /// Select `tab` the way the router does: markers off every tab in the
    /// nav, the extension's included, then on for `tab`.
    pub fn select_host_tab(&self, tab: &NodeId) {
        select(&self.host, tab);
    }

    /// A user click on `tab`; the router reacts unless propagation stopped.
    pub fn user_clicks_host_tab(&self, tab: &NodeId) -> ClickOutcome {
        let outcome = self.host.dom.click(tab);
        if !outcome.propagation_stopped {
            select(&self.host, tab);
        }
        outcome
    }

    /// Re-select `tab` every `period`, like a router re-asserting its state
    /// from its own timers. Cancel the handle to stop.
    pub fn keep_reselecting(&self, tab: &NodeId, period: Duration) -> TimerHandle {
        let weak = Rc::downgrade(&self.host);
        let tab = *tab;
        self.host.scheduler.set_interval(
            period,
            Box::new(move || {
                if let Some(host) = weak.upgrade() {
                    select(&host, &tab);
                }
            }),
        )
    }

    /// Throw the navigation widget away and render a fresh one.
    pub fn rerender_nav(&self) -> Option<NodeId> {
        render_nav(&self.host)
    }

    /// Swap every host tab for a freshly rendered element in place, keeping
    /// the nav and anything else in it. Returns the number of tabs replaced.
    pub fn rerender_host_tabs(&self) -> usize {
        let dom = &self.host.dom;
        let base = base_path(&dom.pathname());
        let mut replaced = 0;
        for label in HOST_TAB_LABELS {
            let Some(old) = host_tab(&self.host, label) else {
                continue;
            };
            let Some(item) = dom.parent(&old) else {
                continue;
            };
            let selected = dom
                .attribute(&old, "class")
                .is_some_and(|c| c.split_whitespace().any(|t| t == SELECTED_CLASS));
            let fresh = tab_element(&self.host, &base, label, selected);
            dom.insert_before(&item, &fresh, Some(&old));
            dom.remove(&old);
            replaced += 1;
        }
        replaced
    }
}

fn select(host: &TestHost, tab: &NodeId) {
    let dom = &host.dom;
    let Some(nav) = dom.query_selector("nav.js-repo-nav") else {
        return;
    };
    for other in dom.query_selector_all_within(&nav, &format!("a.{TAB_CLASS}")) {
        if other == *tab {
            continue;
        }
        let class = dom.attribute(&other, "class").unwrap_or_default();
        if class.split_whitespace().any(|c| c == SELECTED_CLASS) {
            let stripped: Vec<&str> = class
                .split_whitespace()
                .filter(|c| *c != SELECTED_CLASS)
                .collect();
            dom.set_attribute(&other, "class", &stripped.join(" "));
        }
        dom.remove_attribute(&other, "aria-current");
    }

    let class = dom.attribute(tab, "class").unwrap_or_default();
    let mut tokens: Vec<&str> = class
        .split_whitespace()
        .filter(|c| *c != SELECTED_CLASS)
        .collect();
    tokens.push(SELECTED_CLASS);
    dom.set_attribute(tab, "class", &tokens.join(" "));
    dom.set_attribute(tab, "aria-current", "page");
}

fn slug(label: &str) -> String {
    match label {
        "Pull requests" => "pulls".to_owned(),
        other => other.to_ascii_lowercase(),
    }
}

fn base_path(pathname: &str) -> String {
    let segments: Vec<&str> = pathname.split('/').filter(|s| !s.is_empty()).take(2).collect();
    format!("/{}", segments.join("/"))
}

fn label_for_path(pathname: &str) -> &'static str {
    let third = pathname.split('/').filter(|s| !s.is_empty()).nth(2);
    HOST_TAB_LABELS
        .into_iter()
        .find(|label| third.is_some_and(|s| s == slug(label)))
        .unwrap_or("Code")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn repo_page_selects_code() {
        let host = repo_page("orgA", "repoA");
        let code = host_tab(&host, "Code").unwrap();
        assert_eq!(
            host.dom.attribute(&code, "class").as_deref(),
            Some("UnderlineNav-item selected")
        );
        assert_eq!(host.dom.pathname(), "/orgA/repoA");
        assert!(host.dom.query_selector("#repo-content-turbo-frame").is_some());
    }

    #[test]
    fn sub_page_navigation_moves_the_selection() {
        let host = repo_page("orgA", "repoA");
        let nav = host.dom.query_selector("nav.js-repo-nav").unwrap();
        navigate_spa(&host, "/orgA/repoA/issues");

        assert_eq!(host.dom.query_selector("nav.js-repo-nav"), Some(nav));
        let issues = host_tab(&host, "Issues").unwrap();
        assert_eq!(host.dom.attribute(&issues, "aria-current").as_deref(), Some("page"));
        let code = host_tab(&host, "Code").unwrap();
        assert_eq!(host.dom.attribute(&code, "aria-current"), None);
    }

    #[test]
    fn cross_repository_navigation_renders_a_new_nav() {
        let host = repo_page("orgA", "repoA");
        let nav = host.dom.query_selector("nav.js-repo-nav").unwrap();
        navigate_spa(&host, "/orgB/repoB/pulls");
        let fresh = host.dom.query_selector("nav.js-repo-nav").unwrap();
        assert_ne!(fresh, nav);
        let pulls = host_tab(&host, "Pull requests").unwrap();
        assert_eq!(host.dom.attribute(&pulls, "href").as_deref(), Some("/orgB/repoB/pulls"));
    }

    #[test]
    fn user_click_reaches_the_router() {
        let host = Rc::new(repo_page("orgA", "repoA"));
        let actions = host_tab(&host, "Actions").unwrap();
        let outcome = HostScript::new(&host).user_clicks_host_tab(&actions);
        assert!(!outcome.propagation_stopped);
        assert!(host.dom.attribute(&actions, "class").unwrap().contains("selected"));
    }

    #[test]
    fn rerendered_host_tabs_are_new_elements_with_the_same_selection() {
        let host = Rc::new(repo_page("orgA", "repoA"));
        let nav = host.dom.query_selector("nav.js-repo-nav").unwrap();
        let code = host_tab(&host, "Code").unwrap();

        assert_eq!(HostScript::new(&host).rerender_host_tabs(), HOST_TAB_LABELS.len());
        let fresh = host_tab(&host, "Code").unwrap();
        assert_ne!(fresh, code);
        assert!(!host.dom.contains(&code));
        assert_eq!(host.dom.query_selector("nav.js-repo-nav"), Some(nav));
        assert_eq!(host.dom.attribute(&fresh, "aria-current").as_deref(), Some("page"));
        assert_eq!(host.dom.query_selector_all("nav.js-repo-nav a.UnderlineNav-item").len(), 5);
    }

    #[test]
    fn path_helpers() {
        assert_eq!(base_path("/orgA/repoA/tree/main"), "/orgA/repoA");
        assert_eq!(label_for_path("/orgA/repoA/pulls/3"), "Pull requests");
        assert_eq!(label_for_path("/orgA/repoA"), "Code");
    }
}
