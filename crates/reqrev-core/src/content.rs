#![forbid(unsafe_code)]

//! What the panel container shows.
//!
//! The lifecycle manager only owns the container; whatever fills it is a
//! [`PanelContent`]. [`RequirementsView`] is the default.

use std::rc::Rc;

use reqrev_host::{Host, HostDom};

use crate::locator::PageIdentity;
use crate::store::Requirement;

pub const LIST_CLASS: &str = "reqrev-panel__list";
pub const EMPTY_CLASS: &str = "reqrev-panel__empty";
pub const ROW_CLASS: &str = "reqrev-panel__row";
pub const SMELL_CLASS: &str = "reqrev-panel__smell";
pub const EMPTY_MESSAGE: &str = "No requirements yet.";

/// Fills and clears the panel container.
pub trait PanelContent<H: Host> {
    /// Called once, right after the container is inserted.
    fn mount(&self, host: &Rc<H>, container: &H::Element, identity: &PageIdentity);

    /// Called before the container is deleted.
    fn unmount(&self, _host: &Rc<H>, _container: &H::Element) {}
}

/// Header, list container and empty-state message.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequirementsView;

impl<H: Host> PanelContent<H> for RequirementsView {
    fn mount(&self, host: &Rc<H>, container: &H::Element, identity: &PageIdentity) {
        let dom = host.dom();

        let header = dom.create_element("header");
        dom.set_attribute(&header, "class", "reqrev-panel__header");
        let title = dom.create_element("h2");
        dom.set_text_content(&title, "Requirements");
        dom.append_child(&header, &title);
        let scope = dom.create_element("span");
        dom.set_attribute(&scope, "class", "reqrev-panel__scope");
        dom.set_text_content(&scope, &identity.page_id());
        dom.append_child(&header, &scope);
        dom.append_child(container, &header);

        let list = dom.create_element("ul");
        dom.set_attribute(&list, "class", LIST_CLASS);
        dom.append_child(container, &list);

        let empty = dom.create_element("p");
        dom.set_attribute(&empty, "class", EMPTY_CLASS);
        dom.set_text_content(&empty, EMPTY_MESSAGE);
        dom.append_child(container, &empty);
    }
}

/// Replace the rows of the list inside `container`.
///
/// Returns the number of rows rendered; `0` when the view is not mounted.
pub fn render_requirements<D: HostDom>(
    dom: &D,
    container: &D::Element,
    requirements: &[Requirement],
) -> usize {
    let Some(list) = dom
        .query_selector_all_within(container, &format!(".{LIST_CLASS}"))
        .into_iter()
        .next()
    else {
        return 0;
    };
    while let Some(child) = dom.first_child(&list) {
        dom.remove(&child);
    }

    for requirement in requirements {
        let row = dom.create_element("li");
        dom.set_attribute(&row, "class", ROW_CLASS);
        dom.set_attribute(&row, "data-requirement-id", &requirement.id);

        let id = dom.create_element("strong");
        dom.set_text_content(&id, &requirement.id);
        dom.append_child(&row, &id);
        let text = dom.create_element("span");
        dom.set_text_content(&text, &requirement.description);
        dom.append_child(&row, &text);

        for smell in &requirement.smells {
            let badge = dom.create_element("span");
            dom.set_attribute(&badge, "class", SMELL_CLASS);
            dom.set_text_content(&badge, smell);
            dom.append_child(&row, &badge);
        }
        if let Some(explanation) = &requirement.explanation {
            dom.set_attribute(&row, "title", explanation);
        }
        dom.append_child(&list, &row);
    }

    for empty in dom.query_selector_all_within(container, &format!(".{EMPTY_CLASS}")) {
        let display = if requirements.is_empty() { None } else { Some("none") };
        dom.set_style_property(&empty, "display", display);
    }
    requirements.len()
}
