#![forbid(unsafe_code)]

//! [`Host`] over the live page through `web-sys`.
//!
//! Every DOM call is a fresh query. Listener and observer closures are kept
//! in handle-keyed maps so they live exactly as long as their registration.

use core::fmt;
use core::time::Duration;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Array, Function, JSON, Object, Promise, Reflect};
use reqrev_host::{
    AttributeCallback, AttributeMutation, ClickHandler, ExtensionRuntime, Host, HostDom,
    HostEvent, HostScheduler, ListenerHandle, LocalFuture, ObserverHandle, RuntimeError,
    SubtreeCallback, TimerHandle,
};
use tracing::{debug, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    Document, Element, Event, HtmlElement, MutationObserver, MutationObserverInit,
    MutationRecord, NodeList, Performance, Window,
};

const NOTICE_ID: &str = "reqrev-notice";

const NOTICE_STYLE: &str = "position:fixed;top:16px;right:16px;z-index:2147483647;\
max-width:360px;padding:12px 16px;border-radius:6px;background:#fff8c5;\
border:1px solid #d4a72c;color:#1f2328;font:14px/1.5 system-ui,sans-serif;";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The page lacks something the host needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebHostError {
    /// A required global (`window`, `document`) is missing.
    Unavailable(&'static str),
    /// A DOM call needed during setup threw.
    Js(String),
}

impl fmt::Display for WebHostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(what) => write!(f, "browser host unavailable: no {what}"),
            Self::Js(message) => write!(f, "browser host setup failed: {message}"),
        }
    }
}

impl std::error::Error for WebHostError {}

/// Best-effort message text for a thrown JS value.
fn js_message(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

fn runtime_error(value: &JsValue) -> RuntimeError {
    RuntimeError::new(js_message(value))
}

// ---------------------------------------------------------------------------
// Retired closures
// ---------------------------------------------------------------------------

/// Closures whose registration was cancelled.
///
/// A callback may cancel its own registration (an interval tick that stops
/// the loop), so the closure is still on the JS stack at that point. Retired
/// closures are dropped from a fresh zero-delay task.
#[derive(Clone)]
struct Retired {
    window: Window,
    items: Rc<RefCell<Vec<Box<dyn Any>>>>,
    sweep_pending: Rc<Cell<bool>>,
}

impl Retired {
    fn new(window: Window) -> Self {
        Self {
            window,
            items: Rc::new(RefCell::new(Vec::new())),
            sweep_pending: Rc::new(Cell::new(false)),
        }
    }

    fn retire(&self, item: Box<dyn Any>) {
        self.items.borrow_mut().push(item);
        if self.sweep_pending.replace(true) {
            return;
        }
        let items = Rc::clone(&self.items);
        let pending = Rc::clone(&self.sweep_pending);
        let sweep = Closure::once_into_js(move || {
            pending.set(false);
            let drained = std::mem::take(&mut *items.borrow_mut());
            drop(drained);
        });
        if self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(sweep.unchecked_ref(), 0)
            .is_err()
        {
            // Try again on the next retirement.
            self.sweep_pending.set(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

struct WebEvent(Event);

impl HostEvent for WebEvent {
    fn prevent_default(&self) {
        self.0.prevent_default();
    }

    fn stop_propagation(&self) {
        self.0.stop_propagation();
    }
}

struct Listener {
    target: Element,
    closure: Closure<dyn FnMut(Event)>,
}

struct Observer {
    observer: MutationObserver,
    closure: Closure<dyn FnMut(Array, MutationObserver)>,
}

/// The live document.
pub struct WebDom {
    document: Document,
    window: Window,
    /// Detached element returned when `createElement` rejects a tag name.
    scratch: Element,
    next_handle: Cell<u32>,
    listeners: RefCell<HashMap<u32, Listener>>,
    observers: RefCell<HashMap<u32, Observer>>,
    retired: Retired,
}

impl WebDom {
    fn new(window: Window, document: Document, retired: Retired) -> Result<Self, WebHostError> {
        let scratch = document
            .create_element("div")
            .map_err(|err| WebHostError::Js(js_message(&err)))?;
        Ok(Self {
            document,
            window,
            scratch,
            next_handle: Cell::new(0),
            listeners: RefCell::new(HashMap::new()),
            observers: RefCell::new(HashMap::new()),
            retired,
        })
    }

    fn next_handle(&self) -> u32 {
        let id = self.next_handle.get().wrapping_add(1);
        self.next_handle.set(id);
        id
    }

    fn observe(
        &self,
        targets: &[Element],
        init: &MutationObserverInit,
        closure: Closure<dyn FnMut(Array, MutationObserver)>,
    ) -> ObserverHandle {
        let id = self.next_handle();
        let observer = match MutationObserver::new(closure.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(err) => {
                warn!(error = %js_message(&err), "MutationObserver unavailable");
                self.retired.retire(Box::new(closure));
                return ObserverHandle(id);
            }
        };
        for target in targets {
            if let Err(err) = observer.observe_with_options(target, init) {
                warn!(error = %js_message(&err), "observe failed");
            }
        }
        self.observers
            .borrow_mut()
            .insert(id, Observer { observer, closure });
        ObserverHandle(id)
    }
}

fn elements(list: &NodeList) -> Vec<Element> {
    (0..list.length())
        .filter_map(|i| list.get(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .collect()
}

fn attribute_mutations(records: &Array) -> Vec<AttributeMutation<Element>> {
    records
        .iter()
        .filter_map(|record| {
            let record = record.dyn_into::<MutationRecord>().ok()?;
            let target = record.target()?.dyn_into::<Element>().ok()?;
            let attribute = record.attribute_name()?;
            Some(AttributeMutation { target, attribute })
        })
        .collect()
}

impl HostDom for WebDom {
    type Element = Element;

    fn pathname(&self) -> String {
        self.window.location().pathname().unwrap_or_default()
    }

    fn href(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn body(&self) -> Option<Element> {
        self.document.body().map(Into::into)
    }

    fn element_by_id(&self, id: &str) -> Option<Element> {
        self.document.get_element_by_id(id)
    }

    fn query_selector(&self, selector: &str) -> Option<Element> {
        self.document.query_selector(selector).unwrap_or_else(|err| {
            warn!(selector, error = %js_message(&err), "invalid selector");
            None
        })
    }

    fn query_selector_all(&self, selector: &str) -> Vec<Element> {
        match self.document.query_selector_all(selector) {
            Ok(list) => elements(&list),
            Err(err) => {
                warn!(selector, error = %js_message(&err), "invalid selector");
                Vec::new()
            }
        }
    }

    fn query_selector_all_within(&self, scope: &Element, selector: &str) -> Vec<Element> {
        match scope.query_selector_all(selector) {
            Ok(list) => elements(&list),
            Err(err) => {
                warn!(selector, error = %js_message(&err), "invalid selector");
                Vec::new()
            }
        }
    }

    fn tag_name(&self, element: &Element) -> String {
        element.tag_name()
    }

    fn text_content(&self, element: &Element) -> String {
        element.text_content().unwrap_or_default()
    }

    fn set_text_content(&self, element: &Element, text: &str) {
        element.set_text_content(Some(text));
    }

    fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        element.get_attribute(name)
    }

    fn set_attribute(&self, element: &Element, name: &str, value: &str) {
        if let Err(err) = element.set_attribute(name, value) {
            warn!(name, error = %js_message(&err), "setAttribute failed");
        }
    }

    fn remove_attribute(&self, element: &Element, name: &str) {
        if let Err(err) = element.remove_attribute(name) {
            warn!(name, error = %js_message(&err), "removeAttribute failed");
        }
    }

    fn set_style_property(&self, element: &Element, property: &str, value: Option<&str>) {
        let Some(html) = element.dyn_ref::<HtmlElement>() else {
            return;
        };
        let style = html.style();
        let result = match value {
            Some(value) => style.set_property(property, value),
            None => style.remove_property(property).map(drop),
        };
        if let Err(err) = result {
            warn!(property, error = %js_message(&err), "style update failed");
        }
    }

    fn create_element(&self, tag: &str) -> Element {
        match self.document.create_element(tag) {
            Ok(element) => element,
            Err(err) => {
                warn!(tag, error = %js_message(&err), "createElement rejected tag");
                self.scratch.clone()
            }
        }
    }

    fn parent(&self, element: &Element) -> Option<Element> {
        element.parent_element()
    }

    fn next_sibling(&self, element: &Element) -> Option<Element> {
        element.next_element_sibling()
    }

    fn first_child(&self, element: &Element) -> Option<Element> {
        element.first_element_child()
    }

    fn append_child(&self, parent: &Element, child: &Element) {
        if let Err(err) = parent.append_child(child) {
            warn!(error = %js_message(&err), "appendChild failed");
        }
    }

    fn insert_before(&self, parent: &Element, child: &Element, reference: Option<&Element>) {
        if let Err(err) = parent.insert_before(child, reference.map(|r| &**r)) {
            warn!(error = %js_message(&err), "insertBefore failed");
        }
    }

    fn remove(&self, element: &Element) {
        element.remove();
    }

    fn listen_click(&self, element: &Element, mut handler: ClickHandler) -> ListenerHandle {
        let closure = Closure::<dyn FnMut(Event)>::new(move |event: Event| {
            handler(&WebEvent(event));
        });
        if let Err(err) =
            element.add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())
        {
            warn!(error = %js_message(&err), "click listener not attached");
        }
        let id = self.next_handle();
        self.listeners.borrow_mut().insert(
            id,
            Listener {
                target: element.clone(),
                closure,
            },
        );
        ListenerHandle(id)
    }

    fn unlisten(&self, handle: ListenerHandle) {
        let Some(listener) = self.listeners.borrow_mut().remove(&handle.0) else {
            return;
        };
        let _ = listener
            .target
            .remove_event_listener_with_callback("click", listener.closure.as_ref().unchecked_ref());
        self.retired.retire(Box::new(listener.closure));
    }

    fn observe_attributes(
        &self,
        targets: &[Element],
        attributes: &[&str],
        mut callback: AttributeCallback<Element>,
    ) -> ObserverHandle {
        let closure = Closure::<dyn FnMut(Array, MutationObserver)>::new(
            move |records: Array, _observer: MutationObserver| {
                let batch = attribute_mutations(&records);
                if !batch.is_empty() {
                    callback(batch);
                }
            },
        );
        let filter: Array = attributes.iter().map(|name| JsValue::from_str(name)).collect();
        let init = MutationObserverInit::new();
        init.set_attributes(true);
        init.set_attribute_filter(&filter);
        self.observe(targets, &init, closure)
    }

    fn observe_subtree(&self, root: &Element, mut callback: SubtreeCallback) -> ObserverHandle {
        let closure = Closure::<dyn FnMut(Array, MutationObserver)>::new(
            move |_records: Array, _observer: MutationObserver| callback(),
        );
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        init.set_attributes(true);
        self.observe(std::slice::from_ref(root), &init, closure)
    }

    fn disconnect(&self, handle: ObserverHandle) {
        let Some(entry) = self.observers.borrow_mut().remove(&handle.0) else {
            return;
        };
        entry.observer.disconnect();
        self.retired.retire(Box::new(entry.closure));
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// `window` timers and animation frames.
pub struct WebScheduler {
    window: Window,
    performance: Option<Performance>,
    intervals: RefCell<HashMap<i32, Closure<dyn FnMut()>>>,
    retired: Retired,
}

impl WebScheduler {
    fn new(window: Window, retired: Retired) -> Self {
        let performance = window.performance();
        Self {
            window,
            performance,
            intervals: RefCell::new(HashMap::new()),
            retired,
        }
    }
}

fn clamp_ms(delay: Duration) -> i32 {
    i32::try_from(delay.as_millis()).unwrap_or(i32::MAX)
}

impl HostScheduler for WebScheduler {
    fn now(&self) -> Duration {
        let ms = self
            .performance
            .as_ref()
            .map_or_else(js_sys::Date::now, Performance::now);
        if ms.is_finite() && ms >= 0.0 {
            Duration::from_secs_f64(ms / 1_000.0)
        } else {
            Duration::ZERO
        }
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let callback = Closure::once_into_js(move || callback());
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                callback.unchecked_ref(),
                clamp_ms(delay),
            ) {
            Ok(id) => TimerHandle::Timeout(id),
            Err(err) => {
                warn!(error = %js_message(&err), "setTimeout failed");
                TimerHandle::Timeout(0)
            }
        }
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerHandle {
        let closure = Closure::wrap(callback);
        match self
            .window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                clamp_ms(period),
            ) {
            Ok(id) => {
                self.intervals.borrow_mut().insert(id, closure);
                TimerHandle::Interval(id)
            }
            Err(err) => {
                warn!(error = %js_message(&err), "setInterval failed");
                TimerHandle::Interval(0)
            }
        }
    }

    fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let callback = Closure::once_into_js(move || callback());
        match self.window.request_animation_frame(callback.unchecked_ref()) {
            Ok(id) => TimerHandle::Frame(id),
            Err(err) => {
                warn!(error = %js_message(&err), "requestAnimationFrame failed");
                TimerHandle::Frame(0)
            }
        }
    }

    fn cancel(&self, handle: TimerHandle) {
        match handle {
            TimerHandle::Timeout(id) => self.window.clear_timeout_with_handle(id),
            TimerHandle::Interval(id) => {
                self.window.clear_interval_with_handle(id);
                if let Some(closure) = self.intervals.borrow_mut().remove(&id) {
                    self.retired.retire(Box::new(closure));
                }
            }
            TimerHandle::Frame(id) => {
                let _ = self.window.cancel_animation_frame(id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Extension runtime
// ---------------------------------------------------------------------------

/// `chrome.runtime` and `chrome.storage.local`, looked up on every call.
pub struct WebRuntime {
    document: Document,
}

/// Walk `path` from the global object, failing on the first missing step.
fn global_path(path: &[&str]) -> Result<JsValue, RuntimeError> {
    let mut value: JsValue = js_sys::global().into();
    for step in path {
        value = Reflect::get(&value, &JsValue::from_str(step)).map_err(|e| runtime_error(&e))?;
        if value.is_undefined() || value.is_null() {
            return Err(RuntimeError::new(format!("{} is unavailable", path.join("."))));
        }
    }
    Ok(value)
}

/// Call `object[method](...args)` and wait for its promise to settle.
///
/// Synchronous throws (the usual shape of a context-invalidated error)
/// surface the same way as rejections.
async fn call_async(object: JsValue, method: &str, args: Array) -> Result<JsValue, RuntimeError> {
    let function: Function = Reflect::get(&object, &JsValue::from_str(method))
        .map_err(|e| runtime_error(&e))?
        .dyn_into()
        .map_err(|_| RuntimeError::new(format!("{method} is not a function")))?;
    let returned = Reflect::apply(&function, &object, &args).map_err(|e| runtime_error(&e))?;
    JsFuture::from(Promise::resolve(&returned))
        .await
        .map_err(|e| runtime_error(&e))
}

fn json_text(value: &JsValue) -> Result<String, RuntimeError> {
    if let Some(text) = value.as_string() {
        return Ok(text);
    }
    JSON::stringify(value)
        .map(String::from)
        .map_err(|e| runtime_error(&e))
}

impl WebRuntime {
    fn show_banner(&self, message: &str) {
        let Some(body) = self.document.body() else {
            return;
        };
        let banner = match self.document.get_element_by_id(NOTICE_ID) {
            Some(existing) => existing,
            None => {
                let Ok(banner) = self.document.create_element("div") else {
                    return;
                };
                banner.set_id(NOTICE_ID);
                let _ = banner.set_attribute("role", "alert");
                let _ = banner.set_attribute("style", NOTICE_STYLE);
                if body.append_child(&banner).is_err() {
                    return;
                }
                banner
            }
        };
        banner.set_text_content(Some(message));
    }
}

impl ExtensionRuntime for WebRuntime {
    fn runtime_id(&self) -> Result<String, RuntimeError> {
        let runtime = global_path(&["chrome", "runtime"])?;
        Reflect::get(&runtime, &JsValue::from_str("id"))
            .map_err(|e| runtime_error(&e))?
            .as_string()
            .ok_or_else(RuntimeError::context_invalidated)
    }

    fn notify(&self, message: &str) {
        web_sys::console::warn_1(&JsValue::from_str(message));
        self.show_banner(message);
    }

    fn send_message(&self, payload: String) -> LocalFuture<'static, Result<String, RuntimeError>> {
        Box::pin(async move {
            let message = JSON::parse(&payload).map_err(|e| runtime_error(&e))?;
            let runtime = global_path(&["chrome", "runtime"])?;
            let reply = call_async(runtime, "sendMessage", Array::of1(&message)).await?;
            if reply.is_undefined() {
                return Err(RuntimeError::new("background sent no reply"));
            }
            json_text(&reply)
        })
    }

    fn storage_get(&self, key: &str) -> LocalFuture<'static, Result<Option<String>, RuntimeError>> {
        let key = key.to_owned();
        Box::pin(async move {
            let local = global_path(&["chrome", "storage", "local"])?;
            let key = JsValue::from_str(&key);
            let items = call_async(local, "get", Array::of1(&key)).await?;
            let value = Reflect::get(&items, &key).map_err(|e| runtime_error(&e))?;
            if value.is_undefined() || value.is_null() {
                return Ok(None);
            }
            json_text(&value).map(Some)
        })
    }

    fn storage_set(&self, key: &str, value: String) -> LocalFuture<'static, Result<(), RuntimeError>> {
        let key = key.to_owned();
        Box::pin(async move {
            let local = global_path(&["chrome", "storage", "local"])?;
            let items = Object::new();
            Reflect::set(&items, &JsValue::from_str(&key), &JsValue::from_str(&value))
                .map_err(|e| runtime_error(&e))?;
            call_async(local, "set", Array::of1(&items)).await?;
            debug!(key = %key, bytes = value.len(), "storage written");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// The page the content script runs in.
pub struct WebHost {
    dom: WebDom,
    scheduler: WebScheduler,
    runtime: WebRuntime,
}

impl WebHost {
    /// Bind to the current `window`.
    pub fn from_window() -> Result<Self, WebHostError> {
        let window = web_sys::window().ok_or(WebHostError::Unavailable("window"))?;
        let document = window
            .document()
            .ok_or(WebHostError::Unavailable("document"))?;
        let retired = Retired::new(window.clone());
        Ok(Self {
            dom: WebDom::new(window.clone(), document.clone(), retired.clone())?,
            scheduler: WebScheduler::new(window, retired),
            runtime: WebRuntime { document },
        })
    }
}

impl Host for WebHost {
    type Element = Element;
    type Dom = WebDom;
    type Scheduler = WebScheduler;
    type Runtime = WebRuntime;

    fn dom(&self) -> &WebDom {
        &self.dom
    }

    fn scheduler(&self) -> &WebScheduler {
        &self.scheduler
    }

    fn runtime(&self) -> &WebRuntime {
        &self.runtime
    }
}
