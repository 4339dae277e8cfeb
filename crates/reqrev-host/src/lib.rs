#![forbid(unsafe_code)]
#![doc = "Host-page boundary traits for ReqRev."]
#![doc = ""]
#![doc = "This crate defines the seam between the integration core and the page it"]
#![doc = "lives in: the live DOM of a third-party single-page app, the page's timer"]
#![doc = "and animation-frame queues, and the browser-extension runtime. The wasm"]
#![doc = "content script implements it over `web-sys`; the headless harness"]
#![doc = "implements it over an in-memory document and a virtual clock."]

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::time::Duration;

/// Boxed, non-`Send` future returned by runtime calls.
///
/// The extension runtime is single-threaded, so nothing here needs `Send`.
pub type LocalFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Text the browser puts in errors raised after the extension was reloaded.
pub const CONTEXT_INVALIDATED_MARKER: &str = "Extension context invalidated";

/// Opaque handle for a scheduled callback.
///
/// Each kind maps onto a different cancellation primitive on the web
/// (`clearTimeout`, `clearInterval`, `cancelAnimationFrame`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerHandle {
    Timeout(i32),
    Interval(i32),
    Frame(i32),
}

/// Opaque handle for a mutation observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u32);

/// Opaque handle for an event listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u32);

/// One attribute change reported by an attribute observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMutation<E> {
    pub target: E,
    pub attribute: String,
}

/// The subset of a DOM event a click handler may act on.
pub trait HostEvent {
    /// Suppress the browser's default action (link navigation).
    fn prevent_default(&self);

    /// Keep the event from reaching handlers on ancestor elements.
    fn stop_propagation(&self);
}

/// Callback invoked for each click on a listened element.
pub type ClickHandler = Box<dyn FnMut(&dyn HostEvent)>;

/// Callback invoked with one batch of attribute mutations.
pub type AttributeCallback<E> = Box<dyn FnMut(Vec<AttributeMutation<E>>)>;

/// Callback invoked once per batch of subtree mutations.
pub type SubtreeCallback = Box<dyn FnMut()>;

/// Live access to the host document.
///
/// Every method is a fresh query or a direct mutation; implementations must
/// not cache results. Missing elements are reported as `None` or an empty
/// vector, never as a panic.
pub trait HostDom {
    /// Element handle. Cheap to clone; equality is node identity.
    type Element: Clone + PartialEq + fmt::Debug + 'static;

    /// `location.pathname` of the current page.
    fn pathname(&self) -> String;

    /// `location.href` of the current page.
    fn href(&self) -> String;

    fn body(&self) -> Option<Self::Element>;

    fn element_by_id(&self, id: &str) -> Option<Self::Element>;

    /// First element in document order matching `selector`.
    fn query_selector(&self, selector: &str) -> Option<Self::Element>;

    /// All elements in document order matching `selector`.
    fn query_selector_all(&self, selector: &str) -> Vec<Self::Element>;

    /// All descendants of `scope` matching `selector`.
    fn query_selector_all_within(&self, scope: &Self::Element, selector: &str)
    -> Vec<Self::Element>;

    /// Upper-case tag name, as the DOM reports it.
    fn tag_name(&self, element: &Self::Element) -> String;

    fn text_content(&self, element: &Self::Element) -> String;

    fn set_text_content(&self, element: &Self::Element, text: &str);

    fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;

    fn set_attribute(&self, element: &Self::Element, name: &str, value: &str);

    fn remove_attribute(&self, element: &Self::Element, name: &str);

    /// Set (`Some`) or clear (`None`) one inline style property.
    fn set_style_property(&self, element: &Self::Element, property: &str, value: Option<&str>);

    fn create_element(&self, tag: &str) -> Self::Element;

    fn parent(&self, element: &Self::Element) -> Option<Self::Element>;

    fn next_sibling(&self, element: &Self::Element) -> Option<Self::Element>;

    fn first_child(&self, element: &Self::Element) -> Option<Self::Element>;

    fn append_child(&self, parent: &Self::Element, child: &Self::Element);

    /// Insert `child` before `reference`, or append when `reference` is `None`.
    fn insert_before(
        &self,
        parent: &Self::Element,
        child: &Self::Element,
        reference: Option<&Self::Element>,
    );

    /// Detach `element` from the document.
    fn remove(&self, element: &Self::Element);

    fn listen_click(&self, element: &Self::Element, handler: ClickHandler) -> ListenerHandle;

    fn unlisten(&self, handle: ListenerHandle);

    /// Watch the named attributes on each of `targets`.
    fn observe_attributes(
        &self,
        targets: &[Self::Element],
        attributes: &[&str],
        callback: AttributeCallback<Self::Element>,
    ) -> ObserverHandle;

    /// Watch child-list and attribute changes anywhere under `root`.
    fn observe_subtree(&self, root: &Self::Element, callback: SubtreeCallback) -> ObserverHandle;

    fn disconnect(&self, handle: ObserverHandle);
}

/// Timer, interval and animation-frame queues of the page.
///
/// Native browsers back this with `window`; the harness backs it with a
/// virtual clock the test advances explicitly.
pub trait HostScheduler {
    /// Monotonic time since an unspecified epoch.
    fn now(&self) -> Duration;

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle;

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerHandle;

    fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> TimerHandle;

    /// Cancel a pending callback. Cancelling a fired or unknown handle is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// Error raised by a privileged extension-runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error the browser raises once the extension has been unloaded.
    pub fn context_invalidated() -> Self {
        Self::new(CONTEXT_INVALIDATED_MARKER)
    }

    /// Whether this error means the extension context is gone for good.
    #[must_use]
    pub fn is_context_invalidated(&self) -> bool {
        self.message.contains(CONTEXT_INVALIDATED_MARKER)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extension runtime error: {}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Privileged browser-extension APIs.
///
/// Payloads cross this boundary as JSON text so the trait stays free of any
/// serialization dependency.
pub trait ExtensionRuntime {
    /// Read the runtime identity. Fails once the extension context is gone.
    fn runtime_id(&self) -> Result<String, RuntimeError>;

    /// Show a non-blocking notice to the user.
    fn notify(&self, message: &str);

    /// Send a JSON message to the extension background and await its JSON reply.
    fn send_message(&self, payload: String) -> LocalFuture<'static, Result<String, RuntimeError>>;

    /// Read one JSON value from extension storage.
    fn storage_get(&self, key: &str) -> LocalFuture<'static, Result<Option<String>, RuntimeError>>;

    /// Write one JSON value to extension storage.
    fn storage_set(&self, key: &str, value: String) -> LocalFuture<'static, Result<(), RuntimeError>>;
}

/// Unified host combining document, scheduler and extension runtime.
///
/// The integration core is generic over this trait. Implementations:
/// - `reqrev-extension`: the live page through `web-sys`.
/// - `reqrev-harness`: an in-memory page driven by a virtual clock.
pub trait Host: 'static {
    /// Element handle shared with [`Self::Dom`].
    type Element: Clone + PartialEq + fmt::Debug + 'static;

    type Dom: HostDom<Element = Self::Element>;

    type Scheduler: HostScheduler;

    type Runtime: ExtensionRuntime;

    fn dom(&self) -> &Self::Dom;

    fn scheduler(&self) -> &Self::Scheduler;

    fn runtime(&self) -> &Self::Runtime;
}
