#![cfg(target_arch = "wasm32")]
#![forbid(unsafe_code)]

use core::time::Duration;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::Promise;
use reqrev_extension::WebHost;
use reqrev_host::{ExtensionRuntime, Host, HostDom, HostScheduler};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::HtmlElement;

wasm_bindgen_test_configure!(run_in_browser);

/// Resolve after `ms` milliseconds of real time.
async fn sleep(ms: i32) {
    let promise = Promise::new(&mut |resolve, _reject| {
        let window = web_sys::window().expect("window");
        window
            .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms)
            .expect("setTimeout");
    });
    JsFuture::from(promise).await.expect("timer promise");
}

fn host() -> WebHost {
    WebHost::from_window().expect("browser host")
}

fn fixture(host: &WebHost, id: &str) -> web_sys::Element {
    let dom = host.dom();
    let body = dom.body().expect("body");
    let root = dom.create_element("section");
    dom.set_attribute(&root, "id", id);
    dom.append_child(&body, &root);
    root
}

#[wasm_bindgen_test]
fn dom_queries_and_mutations_are_live() {
    let host = host();
    let dom = host.dom();
    let root = fixture(&host, "dom-live");

    let first = dom.create_element("a");
    dom.set_attribute(&first, "class", "UnderlineNav-item selected");
    dom.set_text_content(&first, "Code");
    let second = dom.create_element("a");
    dom.set_attribute(&second, "class", "UnderlineNav-item");
    dom.append_child(&root, &second);
    dom.insert_before(&root, &first, Some(&second));

    let tabs = dom.query_selector_all_within(&root, "a.UnderlineNav-item");
    assert_eq!(tabs, vec![first.clone(), second.clone()]);
    assert_eq!(dom.tag_name(&first), "A");
    assert_eq!(dom.first_child(&root), Some(first.clone()));
    assert_eq!(dom.next_sibling(&first), Some(second.clone()));
    assert_eq!(dom.parent(&second), Some(root.clone()));
    assert_eq!(dom.text_content(&root), "Code");

    dom.set_style_property(&root, "display", Some("none"));
    assert_eq!(dom.attribute(&root, "style").as_deref(), Some("display: none;"));
    dom.set_style_property(&root, "display", None);

    dom.remove(&root);
    assert!(dom.element_by_id("dom-live").is_none());
}

#[wasm_bindgen_test]
fn invalid_selectors_find_nothing() {
    let host = host();
    assert!(host.dom().query_selector("a[").is_none());
    assert!(host.dom().query_selector_all("a[").is_empty());
}

#[wasm_bindgen_test]
fn click_listeners_run_until_unlistened() {
    let host = host();
    let dom = host.dom();
    let root = fixture(&host, "click-listener");
    let link = dom.create_element("a");
    dom.set_attribute(&link, "href", "#elsewhere");
    dom.append_child(&root, &link);

    let clicks = Rc::new(Cell::new(0));
    let seen = Rc::clone(&clicks);
    let handle = dom.listen_click(
        &link,
        Box::new(move |event| {
            event.prevent_default();
            seen.set(seen.get() + 1);
        }),
    );

    let html = link.dyn_ref::<HtmlElement>().expect("html element");
    html.click();
    assert_eq!(clicks.get(), 1);

    dom.unlisten(handle);
    html.click();
    assert_eq!(clicks.get(), 1);
    dom.remove(&root);
}

#[wasm_bindgen_test]
async fn attribute_observer_reports_filtered_changes() {
    let host = host();
    let dom = host.dom();
    let root = fixture(&host, "attribute-observer");
    let tab = dom.create_element("a");
    dom.append_child(&root, &tab);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let handle = dom.observe_attributes(
        std::slice::from_ref(&tab),
        &["class", "aria-current"],
        Box::new(move |batch| {
            sink.borrow_mut()
                .extend(batch.into_iter().map(|m| m.attribute));
        }),
    );

    dom.set_attribute(&tab, "class", "selected");
    dom.set_attribute(&tab, "title", "ignored");
    sleep(0).await;
    assert_eq!(*seen.borrow(), vec!["class".to_owned()]);

    dom.disconnect(handle);
    dom.set_attribute(&tab, "aria-current", "page");
    sleep(0).await;
    assert_eq!(seen.borrow().len(), 1);
    dom.remove(&root);
}

#[wasm_bindgen_test]
async fn timers_fire_and_cancel() {
    let host = host();
    let scheduler = host.scheduler();
    let fired = Rc::new(Cell::new(0));

    let a = Rc::clone(&fired);
    scheduler.set_timeout(Duration::from_millis(5), Box::new(move || a.set(a.get() + 1)));
    let b = Rc::clone(&fired);
    let cancelled =
        scheduler.set_timeout(Duration::from_millis(5), Box::new(move || b.set(b.get() + 10)));
    scheduler.cancel(cancelled);

    let ticks = Rc::new(Cell::new(0));
    let t = Rc::clone(&ticks);
    let interval = scheduler.set_interval(Duration::from_millis(5), Box::new(move || t.set(t.get() + 1)));

    let before = scheduler.now();
    sleep(40).await;
    scheduler.cancel(interval);
    let after_cancel = ticks.get();
    sleep(20).await;

    assert_eq!(fired.get(), 1);
    assert!(after_cancel >= 1);
    assert_eq!(ticks.get(), after_cancel);
    assert!(scheduler.now() > before);
}

#[wasm_bindgen_test]
fn plain_pages_have_no_extension_context() {
    let host = host();
    assert!(host.runtime().runtime_id().is_err());
}
