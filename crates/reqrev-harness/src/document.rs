#![forbid(unsafe_code)]

//! Arena-backed fake document.
//!
//! Elements live in a flat arena addressed by [`NodeId`]; there are no text
//! nodes, each element carries its own text instead. Mutation observers are
//! fed the way a browser feeds them: records are queued as mutations happen
//! and delivered only at [`FakeDocument::flush_mutations`], never from inside
//! the mutating call.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use reqrev_host::{
    AttributeCallback, AttributeMutation, ClickHandler, HostDom, HostEvent, ListenerHandle,
    ObserverHandle, SubtreeCallback,
};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::matching::{ElementSelectorFlags, MatchingContext};
use selectors::OpaqueElement;
use tracing::{trace, warn};

use crate::selector::{CssName, CssString, HarnessImpl, NonTSPseudoClass, PseudoElement, SelectorList};

/// Flush rounds after which a mutation feedback loop is assumed.
const MAX_FLUSH_ROUNDS: usize = 256;

/// Element handle, valid for the document that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    style: Vec<(String, String)>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            style: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Arena {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    href: String,
}

impl Arena {
    fn new(href: &str) -> Self {
        let mut arena = Self {
            nodes: vec![Node::new("html")],
            root: NodeId(0),
            body: NodeId(0),
            href: href.to_owned(),
        };
        arena.nodes.push(Node::new("head"));
        arena.nodes.push(Node::new("body"));
        arena.nodes[1].parent = Some(NodeId(0));
        arena.nodes[2].parent = Some(NodeId(0));
        arena.nodes[0].children = vec![NodeId(1), NodeId(2)];
        arena.body = NodeId(2);
        arena
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Strict descendants of `scope` in document order.
    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(scope).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        out
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.node(id).parent;
        }
        false
    }

    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.node_mut(id).parent.take()?;
        self.node_mut(parent).children.retain(|c| *c != id);
        Some(parent)
    }

    fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn text(&self, id: NodeId) -> String {
        let mut out = self.node(id).text.clone();
        for child in &self.node(id).children {
            out.push_str(&self.text(*child));
        }
        out
    }
}

/// An arena node as seen by the selector matcher.
#[derive(Debug, Clone, Copy)]
struct ElementRef<'a> {
    arena: &'a Arena,
    id: NodeId,
}

impl<'a> ElementRef<'a> {
    fn node(&self) -> &'a Node {
        self.arena.node(self.id)
    }

    fn at(&self, id: NodeId) -> Self {
        Self {
            arena: self.arena,
            id,
        }
    }

    fn attr(&self, name: &str) -> Option<&'a str> {
        self.arena.attr(self.id, name)
    }

    fn sibling(&self, offset: isize) -> Option<Self> {
        let siblings = &self.arena.node(self.node().parent?).children;
        let index = siblings.iter().position(|c| *c == self.id)?;
        let target = index.checked_add_signed(offset)?;
        siblings.get(target).map(|id| self.at(*id))
    }
}

impl selectors::Element for ElementRef<'_> {
    type Impl = HarnessImpl;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self.node())
    }

    fn parent_element(&self) -> Option<Self> {
        self.node().parent.map(|id| self.at(id))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.sibling(-1)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.sibling(1)
    }

    fn first_element_child(&self) -> Option<Self> {
        self.node().children.first().map(|id| self.at(*id))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, name: &CssName) -> bool {
        self.node().tag == name.as_str()
    }

    fn has_namespace(&self, namespace: &CssName) -> bool {
        namespace.as_str().is_empty()
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.node().tag == other.node().tag
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&CssName>,
        local_name: &CssName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if let NamespaceConstraint::Specific(url) = ns
            && !url.as_str().is_empty()
        {
            return false;
        }
        self.attr(local_name.as_str())
            .is_some_and(|value| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, HarnessImpl>,
    ) -> bool {
        match *pc {}
    }

    fn match_pseudo_element(
        &self,
        pe: &PseudoElement,
        _context: &mut MatchingContext<'_, HarnessImpl>,
    ) -> bool {
        match *pe {}
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        self.node().tag == "a" && self.attr("href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssName, case_sensitivity: CaseSensitivity) -> bool {
        self.attr("id")
            .is_some_and(|own| case_sensitivity.eq(own.as_bytes(), id.as_str().as_bytes()))
    }

    fn has_class(&self, name: &CssName, case_sensitivity: CaseSensitivity) -> bool {
        self.attr("class").is_some_and(|classes| {
            classes
                .split_ascii_whitespace()
                .any(|class| case_sensitivity.eq(class.as_bytes(), name.as_str().as_bytes()))
        })
    }

    fn imported_part(&self, _name: &CssName) -> Option<CssName> {
        None
    }

    fn is_part(&self, _name: &CssName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.node().children.is_empty() && self.node().text.is_empty()
    }

    fn is_root(&self) -> bool {
        self.id == self.arena.root
    }
}

enum Observer {
    Attributes {
        targets: Vec<NodeId>,
        attributes: Vec<String>,
        queue: Vec<AttributeMutation<NodeId>>,
        callback: Rc<RefCell<AttributeCallback<NodeId>>>,
    },
    Subtree {
        root: NodeId,
        pending: bool,
        callback: Rc<RefCell<SubtreeCallback>>,
    },
}

enum Delivery {
    Attributes(Rc<RefCell<AttributeCallback<NodeId>>>, Vec<AttributeMutation<NodeId>>),
    Subtree(Rc<RefCell<SubtreeCallback>>),
}

impl Observer {
    fn take_ready(&mut self) -> Option<Delivery> {
        match self {
            Self::Attributes {
                queue, callback, ..
            } if !queue.is_empty() => Some(Delivery::Attributes(
                callback.clone(),
                std::mem::take(queue),
            )),
            Self::Subtree {
                pending, callback, ..
            } if *pending => {
                *pending = false;
                Some(Delivery::Subtree(callback.clone()))
            }
            _ => None,
        }
    }
}

struct Listener {
    target: NodeId,
    handler: Rc<RefCell<ClickHandler>>,
}

/// Event passed to click handlers.
#[derive(Debug, Default)]
pub struct FakeEvent {
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
}

impl HostEvent for FakeEvent {
    fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }
}

/// What happened to a dispatched click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClickOutcome {
    pub default_prevented: bool,
    pub propagation_stopped: bool,
    pub handlers_run: usize,
}

pub struct FakeDocument {
    arena: RefCell<Arena>,
    observers: RefCell<BTreeMap<u32, Observer>>,
    listeners: RefCell<BTreeMap<u32, Listener>>,
    next_handle: Cell<u32>,
    mutations: Cell<u64>,
}

impl FakeDocument {
    /// An empty `html > head + body` document at `href`.
    pub fn new(href: &str) -> Self {
        Self {
            arena: RefCell::new(Arena::new(href)),
            observers: RefCell::new(BTreeMap::new()),
            listeners: RefCell::new(BTreeMap::new()),
            next_handle: Cell::new(1),
            mutations: Cell::new(0),
        }
    }

    /// Change the URL the way `history.pushState` does: no DOM mutation.
    pub fn set_location(&self, href: &str) {
        self.arena.borrow_mut().href = href.to_owned();
    }

    /// Create an element with attributes, detached.
    pub fn element(&self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let mut arena = self.arena.borrow_mut();
        let mut node = Node::new(tag);
        node.attrs = attrs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        arena.nodes.push(node);
        NodeId(arena.nodes.len() - 1)
    }

    pub fn children(&self, element: &NodeId) -> Vec<NodeId> {
        self.arena.borrow().node(*element).children.clone()
    }

    /// Whether `element` is attached to the document.
    pub fn contains(&self, element: &NodeId) -> bool {
        let arena = self.arena.borrow();
        arena.is_inclusive_ancestor(arena.root, *element)
    }

    pub fn style_property(&self, element: &NodeId, property: &str) -> Option<String> {
        self.arena
            .borrow()
            .node(*element)
            .style
            .iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v.clone())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Total DOM mutations since creation, observed or not.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.get()
    }

    /// Dispatch a click on `target`, bubbling to its ancestors.
    pub fn click(&self, target: &NodeId) -> ClickOutcome {
        let event = FakeEvent::default();
        let mut handlers_run = 0;
        let mut cursor = Some(*target);
        while let Some(node) = cursor {
            let handlers: Vec<_> = self
                .listeners
                .borrow()
                .values()
                .filter(|l| l.target == node)
                .map(|l| l.handler.clone())
                .collect();
            for handler in handlers {
                let mut handler = handler.borrow_mut();
                (&mut **handler)(&event);
                handlers_run += 1;
            }
            if event.propagation_stopped.get() {
                break;
            }
            cursor = self.arena.borrow().node(node).parent;
        }
        ClickOutcome {
            default_prevented: event.default_prevented.get(),
            propagation_stopped: event.propagation_stopped.get(),
            handlers_run,
        }
    }

    /// Deliver queued mutation records, repeating while callbacks cause
    /// more. Returns the number of callbacks run.
    pub fn flush_mutations(&self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_FLUSH_ROUNDS {
            let ready: Vec<(u32, Delivery)> = self
                .observers
                .borrow_mut()
                .iter_mut()
                .filter_map(|(id, observer)| observer.take_ready().map(|d| (*id, d)))
                .collect();
            if ready.is_empty() {
                return delivered;
            }
            for (id, delivery) in ready {
                // Disconnected by an earlier callback in this round.
                if !self.observers.borrow().contains_key(&id) {
                    continue;
                }
                match delivery {
                    Delivery::Attributes(callback, records) => {
                        trace!(observer = id, records = records.len(), "attribute records delivered");
                        let mut callback = callback.borrow_mut();
                        (&mut **callback)(records);
                    }
                    Delivery::Subtree(callback) => {
                        let mut callback = callback.borrow_mut();
                        (&mut **callback)();
                    }
                }
                delivered += 1;
            }
        }
        warn!(rounds = MAX_FLUSH_ROUNDS, "mutation observers kept mutating; flush abandoned");
        delivered
    }

    fn next_handle(&self) -> u32 {
        let id = self.next_handle.get();
        self.next_handle.set(id.wrapping_add(1));
        id
    }

    fn record_attribute(&self, target: NodeId, name: &str) {
        self.mutations.set(self.mutations.get() + 1);
        let arena = self.arena.borrow();
        for observer in self.observers.borrow_mut().values_mut() {
            match observer {
                Observer::Attributes {
                    targets,
                    attributes,
                    queue,
                    ..
                } => {
                    if targets.contains(&target) && attributes.iter().any(|a| a == name) {
                        queue.push(AttributeMutation {
                            target,
                            attribute: name.to_owned(),
                        });
                    }
                }
                Observer::Subtree { root, pending, .. } => {
                    if arena.is_inclusive_ancestor(*root, target) {
                        *pending = true;
                    }
                }
            }
        }
    }

    fn record_child_list(&self, parent: NodeId) {
        self.mutations.set(self.mutations.get() + 1);
        let arena = self.arena.borrow();
        for observer in self.observers.borrow_mut().values_mut() {
            if let Observer::Subtree { root, pending, .. } = observer
                && arena.is_inclusive_ancestor(*root, parent)
            {
                *pending = true;
            }
        }
    }

    fn query(&self, scope: Option<NodeId>, selector: &str, first_only: bool) -> Vec<NodeId> {
        let list = match SelectorList::parse(selector) {
            Ok(list) => list,
            Err(err) => {
                warn!(%selector, %err, "invalid selector");
                return Vec::new();
            }
        };
        let arena = self.arena.borrow();
        let scope = scope.unwrap_or(arena.root);
        let mut out = Vec::new();
        for node in arena.descendants(scope) {
            let element = ElementRef {
                arena: &*arena,
                id: node,
            };
            if list.matches(&element) {
                out.push(node);
                if first_only {
                    break;
                }
            }
        }
        out
    }
}

impl HostDom for FakeDocument {
    type Element = NodeId;

    fn pathname(&self) -> String {
        pathname_of(&self.arena.borrow().href).to_owned()
    }

    fn href(&self) -> String {
        self.arena.borrow().href.clone()
    }

    fn body(&self) -> Option<NodeId> {
        Some(self.arena.borrow().body)
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let arena = self.arena.borrow();
        arena
            .descendants(arena.root)
            .into_iter()
            .find(|n| arena.attr(*n, "id") == Some(id))
    }

    fn query_selector(&self, selector: &str) -> Option<NodeId> {
        self.query(None, selector, true).into_iter().next()
    }

    fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        self.query(None, selector, false)
    }

    fn query_selector_all_within(&self, scope: &NodeId, selector: &str) -> Vec<NodeId> {
        self.query(Some(*scope), selector, false)
    }

    fn tag_name(&self, element: &NodeId) -> String {
        self.arena.borrow().node(*element).tag.to_ascii_uppercase()
    }

    fn text_content(&self, element: &NodeId) -> String {
        self.arena.borrow().text(*element)
    }

    fn set_text_content(&self, element: &NodeId, text: &str) {
        {
            let mut arena = self.arena.borrow_mut();
            let children = std::mem::take(&mut arena.node_mut(*element).children);
            for child in children {
                arena.node_mut(child).parent = None;
            }
            arena.node_mut(*element).text = text.to_owned();
        }
        self.record_child_list(*element);
    }

    fn attribute(&self, element: &NodeId, name: &str) -> Option<String> {
        self.arena.borrow().attr(*element, name).map(str::to_owned)
    }

    fn set_attribute(&self, element: &NodeId, name: &str, value: &str) {
        {
            let mut arena = self.arena.borrow_mut();
            let attrs = &mut arena.node_mut(*element).attrs;
            match attrs.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value.to_owned(),
                None => attrs.push((name.to_owned(), value.to_owned())),
            }
        }
        self.record_attribute(*element, name);
    }

    fn remove_attribute(&self, element: &NodeId, name: &str) {
        let removed = {
            let mut arena = self.arena.borrow_mut();
            let attrs = &mut arena.node_mut(*element).attrs;
            let before = attrs.len();
            attrs.retain(|(k, _)| k != name);
            attrs.len() != before
        };
        if removed {
            self.record_attribute(*element, name);
        }
    }

    fn set_style_property(&self, element: &NodeId, property: &str, value: Option<&str>) {
        {
            let mut arena = self.arena.borrow_mut();
            let style = &mut arena.node_mut(*element).style;
            style.retain(|(k, _)| k != property);
            if let Some(value) = value {
                style.push((property.to_owned(), value.to_owned()));
            }
        }
        self.record_attribute(*element, "style");
    }

    fn create_element(&self, tag: &str) -> NodeId {
        self.element(tag, &[])
    }

    fn parent(&self, element: &NodeId) -> Option<NodeId> {
        self.arena.borrow().node(*element).parent
    }

    fn next_sibling(&self, element: &NodeId) -> Option<NodeId> {
        let arena = self.arena.borrow();
        let parent = arena.node(*element).parent?;
        let siblings = &arena.node(parent).children;
        let index = siblings.iter().position(|c| c == element)?;
        siblings.get(index + 1).copied()
    }

    fn first_child(&self, element: &NodeId) -> Option<NodeId> {
        self.arena.borrow().node(*element).children.first().copied()
    }

    fn append_child(&self, parent: &NodeId, child: &NodeId) {
        self.insert_before(parent, child, None);
    }

    fn insert_before(&self, parent: &NodeId, child: &NodeId, reference: Option<&NodeId>) {
        let old_parent = {
            let mut arena = self.arena.borrow_mut();
            if arena.is_inclusive_ancestor(*child, *parent) {
                warn!(?parent, ?child, "refusing to insert a node into its own subtree");
                return;
            }
            if let Some(reference) = reference
                && arena.node(*reference).parent != Some(*parent)
            {
                warn!(?parent, ?reference, "reference node is not a child of parent");
                return;
            }
            let old_parent = if reference == Some(child) {
                None
            } else {
                arena.detach(*child)
            };
            if reference != Some(child) {
                let siblings = &arena.node(*parent).children;
                let index = reference
                    .and_then(|r| siblings.iter().position(|c| c == r))
                    .unwrap_or(siblings.len());
                arena.node_mut(*parent).children.insert(index, *child);
                arena.node_mut(*child).parent = Some(*parent);
            }
            old_parent
        };
        if let Some(old) = old_parent {
            self.record_child_list(old);
        }
        self.record_child_list(*parent);
    }

    fn remove(&self, element: &NodeId) {
        let parent = self.arena.borrow_mut().detach(*element);
        if let Some(parent) = parent {
            self.record_child_list(parent);
        }
    }

    fn listen_click(&self, element: &NodeId, handler: ClickHandler) -> ListenerHandle {
        let id = self.next_handle();
        self.listeners.borrow_mut().insert(
            id,
            Listener {
                target: *element,
                handler: Rc::new(RefCell::new(handler)),
            },
        );
        ListenerHandle(id)
    }

    fn unlisten(&self, handle: ListenerHandle) {
        self.listeners.borrow_mut().remove(&handle.0);
    }

    fn observe_attributes(
        &self,
        targets: &[NodeId],
        attributes: &[&str],
        callback: AttributeCallback<NodeId>,
    ) -> ObserverHandle {
        let id = self.next_handle();
        self.observers.borrow_mut().insert(
            id,
            Observer::Attributes {
                targets: targets.to_vec(),
                attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
                queue: Vec::new(),
                callback: Rc::new(RefCell::new(callback)),
            },
        );
        ObserverHandle(id)
    }

    fn observe_subtree(&self, root: &NodeId, callback: SubtreeCallback) -> ObserverHandle {
        let id = self.next_handle();
        self.observers.borrow_mut().insert(
            id,
            Observer::Subtree {
                root: *root,
                pending: false,
                callback: Rc::new(RefCell::new(callback)),
            },
        );
        ObserverHandle(id)
    }

    fn disconnect(&self, handle: ObserverHandle) {
        self.observers.borrow_mut().remove(&handle.0);
    }
}

/// Path part of an absolute or path-only URL, query and fragment dropped.
fn pathname_of(href: &str) -> &str {
    let rest = match href.find("://") {
        Some(scheme_end) => {
            let after = &href[scheme_end + 3..];
            match after.find('/') {
                Some(slash) => &after[slash..],
                None => return "/",
            }
        }
        None => href,
    };
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    if end == 0 { "/" } else { &rest[..end] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc() -> FakeDocument {
        FakeDocument::new("https://github.com/orgA/repoA/issues?q=open#top")
    }

    #[test]
    fn pathname_strips_origin_query_and_fragment() {
        assert_eq!(doc().pathname(), "/orgA/repoA/issues");
        assert_eq!(pathname_of("https://github.com"), "/");
        assert_eq!(pathname_of("https://github.com/?tab=x"), "/");
        assert_eq!(pathname_of("/a/b#c"), "/a/b");
    }

    #[test]
    fn queries_follow_document_order() {
        let dom = doc();
        let body = dom.body().unwrap();
        let first = dom.element("a", &[("class", "tab")]);
        let wrapper = dom.element("div", &[]);
        let nested = dom.element("a", &[("class", "tab"), ("id", "nested")]);
        dom.append_child(&body, &first);
        dom.append_child(&body, &wrapper);
        dom.append_child(&wrapper, &nested);

        assert_eq!(dom.query_selector_all("a.tab"), vec![first, nested]);
        assert_eq!(dom.query_selector_all_within(&wrapper, "a"), vec![nested]);
        assert_eq!(dom.element_by_id("nested"), Some(nested));
        assert_eq!(dom.query_selector("a:hover"), None);

        dom.remove(&wrapper);
        assert_eq!(dom.element_by_id("nested"), None);
        assert!(!dom.contains(&nested));
    }

    #[test]
    fn selectors_match_structure_attributes_and_classes() {
        let dom = doc();
        let body = dom.body().unwrap();
        let nav = dom.element(
            "nav",
            &[("class", "js-repo-nav UnderlineNav"), ("aria-label", "Repository")],
        );
        let list = dom.element("ul", &[]);
        let first = dom.element("li", &[("class", "d-inline-flex")]);
        let code = dom.element(
            "a",
            &[("class", "UnderlineNav-item selected"), ("id", "code-tab"), ("href", "/orgA/repoA")],
        );
        let second = dom.element("li", &[("class", "d-inline-flex")]);
        let issues = dom.element(
            "a",
            &[("class", "UnderlineNav-item"), ("aria-selected", "TRUE")],
        );
        dom.append_child(&body, &nav);
        dom.append_child(&nav, &list);
        dom.append_child(&list, &first);
        dom.append_child(&first, &code);
        dom.append_child(&list, &second);
        dom.append_child(&second, &issues);

        let all = |s: &str| dom.query_selector_all(s);
        assert_eq!(all("a.UnderlineNav-item"), vec![code, issues]);
        assert_eq!(all("a.UnderlineNav-item.selected"), vec![code]);
        assert!(all("a.UnderlineNav-item.active").is_empty());
        assert_eq!(all("nav.js-repo-nav a"), vec![code, issues]);
        assert_eq!(all(r#"nav[aria-label="Repository"] a#code-tab"#), vec![code]);
        assert!(all("nav > a").is_empty());
        assert_eq!(all("li:first-child > a"), vec![code]);
        assert_eq!(all("li + li a"), vec![issues]);
        assert_eq!(all("a:not(.selected)"), vec![issues]);
        assert_eq!(all(r#"a[href^="/orgA"]"#), vec![code]);
        assert_eq!(all("a[aria-selected=true i]"), vec![issues]);
        assert!(all("a[aria-selected=true]").is_empty());
        assert_eq!(all("NAV"), vec![nav]);
        assert_eq!(dom.query_selector_all_within(&nav, "ul li").len(), 2);
    }

    #[test]
    fn insert_before_moves_existing_nodes() {
        let dom = doc();
        let body = dom.body().unwrap();
        let a = dom.create_element("a");
        let b = dom.create_element("b");
        dom.append_child(&body, &a);
        dom.append_child(&body, &b);
        dom.insert_before(&body, &b, Some(&a));
        assert_eq!(dom.children(&body), vec![b, a]);
        assert_eq!(dom.next_sibling(&b), Some(a));
        assert_eq!(dom.next_sibling(&a), None);

        // Inserting a node into itself is refused.
        dom.append_child(&a, &a);
        assert_eq!(dom.parent(&a), Some(body));
    }

    #[test]
    fn attribute_records_wait_for_flush() {
        let dom = doc();
        let body = dom.body().unwrap();
        let tab = dom.element("a", &[("class", "UnderlineNav-item")]);
        dom.append_child(&body, &tab);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let handle = dom.observe_attributes(
            &[tab],
            &["class", "aria-current"],
            Box::new(move |records| sink.borrow_mut().extend(records)),
        );

        dom.set_attribute(&tab, "class", "UnderlineNav-item selected");
        dom.set_attribute(&tab, "href", "/x");
        dom.remove_attribute(&tab, "aria-current");
        assert!(seen.borrow().is_empty());

        assert_eq!(dom.flush_mutations(), 1);
        assert_eq!(
            *seen.borrow(),
            vec![AttributeMutation {
                target: tab,
                attribute: "class".to_owned()
            }]
        );

        dom.disconnect(handle);
        dom.set_attribute(&tab, "class", "UnderlineNav-item");
        assert_eq!(dom.flush_mutations(), 0);
    }

    #[test]
    fn subtree_observer_sees_descendant_changes_once_per_batch() {
        let dom = doc();
        let body = dom.body().unwrap();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        dom.observe_subtree(&body, Box::new(move || counter.set(counter.get() + 1)));

        let div = dom.create_element("div");
        dom.append_child(&body, &div);
        dom.set_attribute(&div, "class", "x");
        dom.set_text_content(&div, "hello");
        dom.flush_mutations();
        assert_eq!(count.get(), 1);
        assert_eq!(dom.text_content(&body), "hello");
    }

    #[test]
    fn click_bubbles_until_stopped() {
        let dom = doc();
        let body = dom.body().unwrap();
        let link = dom.create_element("a");
        dom.append_child(&body, &link);

        let body_hits = Rc::new(Cell::new(0));
        let hits = body_hits.clone();
        dom.listen_click(&body, Box::new(move |_: &dyn HostEvent| hits.set(hits.get() + 1)));
        let first = dom.click(&link);
        assert_eq!(first.handlers_run, 1);
        assert!(!first.default_prevented);

        let own = dom.listen_click(
            &link,
            Box::new(|event: &dyn HostEvent| {
                event.prevent_default();
                event.stop_propagation();
            }),
        );
        let second = dom.click(&link);
        assert!(second.default_prevented && second.propagation_stopped);
        assert_eq!(body_hits.get(), 1);

        dom.unlisten(own);
        dom.click(&link);
        assert_eq!(body_hits.get(), 2);
    }
}
