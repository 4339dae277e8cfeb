#![forbid(unsafe_code)]

//! In-memory extension runtime.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::ready;
use reqrev_host::{ExtensionRuntime, LocalFuture, RuntimeError};

/// What the browser says when a message has no listener.
pub const NO_RECEIVER: &str = "Could not establish connection. Receiving end does not exist.";

type Responder = Rc<dyn Fn(&str) -> Result<String, RuntimeError>>;

/// Fake `chrome.runtime` + `chrome.storage.local`.
///
/// Starts valid. [`FakeRuntime::invalidate`] makes every later call fail the
/// way a reloaded extension's orphaned content script does.
pub struct FakeRuntime {
    id: String,
    valid: Cell<bool>,
    notices: RefCell<Vec<String>>,
    storage: RefCell<HashMap<String, String>>,
    sent: RefCell<Vec<String>>,
    responder: RefCell<Option<Responder>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new("reqrev-test-extension")
    }
}

impl FakeRuntime {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            valid: Cell::new(true),
            notices: RefCell::new(Vec::new()),
            storage: RefCell::new(HashMap::new()),
            sent: RefCell::new(Vec::new()),
            responder: RefCell::new(None),
        }
    }

    pub fn invalidate(&self) {
        self.valid.set(false);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// Notices shown to the user, oldest first.
    pub fn notices(&self) -> Vec<String> {
        self.notices.borrow().clone()
    }

    /// Answer every `send_message` with `respond`.
    pub fn respond_with<F>(&self, respond: F)
    where
        F: Fn(&str) -> Result<String, RuntimeError> + 'static,
    {
        *self.responder.borrow_mut() = Some(Rc::new(respond));
    }

    /// Payloads passed to `send_message`, oldest first.
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.storage.borrow().get(key).cloned()
    }

    pub fn seed_storage(&self, key: &str, value: &str) {
        self.storage
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
    }

    fn check(&self) -> Result<(), RuntimeError> {
        if self.valid.get() {
            Ok(())
        } else {
            Err(RuntimeError::context_invalidated())
        }
    }
}

impl ExtensionRuntime for FakeRuntime {
    fn runtime_id(&self) -> Result<String, RuntimeError> {
        self.check().map(|()| self.id.clone())
    }

    fn notify(&self, message: &str) {
        self.notices.borrow_mut().push(message.to_owned());
    }

    fn send_message(&self, payload: String) -> LocalFuture<'static, Result<String, RuntimeError>> {
        let result = self.check().and_then(|()| {
            self.sent.borrow_mut().push(payload.clone());
            let responder = self.responder.borrow().clone();
            match responder {
                Some(respond) => respond(&payload),
                None => Err(RuntimeError::new(NO_RECEIVER)),
            }
        });
        ready(result).boxed_local()
    }

    fn storage_get(&self, key: &str) -> LocalFuture<'static, Result<Option<String>, RuntimeError>> {
        let result = self.check().map(|()| self.stored(key));
        ready(result).boxed_local()
    }

    fn storage_set(&self, key: &str, value: String) -> LocalFuture<'static, Result<(), RuntimeError>> {
        let result = self.check().map(|()| {
            self.storage.borrow_mut().insert(key.to_owned(), value);
        });
        ready(result).boxed_local()
    }
}
