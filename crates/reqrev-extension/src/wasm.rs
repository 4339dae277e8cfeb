#![forbid(unsafe_code)]

//! Content-script entry points. Only compiled on `wasm32` targets.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Reflect;
use reqrev_core::Controller;
use tracing::{Level, error, info, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::logging::{self, LogSink};
use crate::settings;
use crate::web_host::WebHost;

thread_local! {
    static CONTROLLER: RefCell<Option<Rc<Controller<WebHost>>>> = const { RefCell::new(None) };
}

fn console(method: &str, msg: &str) {
    let global = js_sys::global();
    let Ok(console) = Reflect::get(&global, &"console".into()) else {
        return;
    };
    let Ok(function) = Reflect::get(&console, &method.into()) else {
        return;
    };
    let Ok(function) = function.dyn_into::<js_sys::Function>() else {
        return;
    };
    let _ = function.call1(&console, &JsValue::from_str(msg));
}

/// Devtools console, one method per level.
#[derive(Debug, Clone, Copy)]
struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn emit(&self, level: Level, line: &str) {
        let method = match level {
            Level::ERROR => "error",
            Level::WARN => "warn",
            Level::INFO => "info",
            Level::DEBUG | Level::TRACE => "debug",
        };
        console(method, line);
    }
}

fn install_panic_hook() {
    use std::sync::Once;

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let msg = if let Some(loc) = info.location() {
                format!(
                    "reqrev panic at {}:{}:{}: {info}",
                    loc.file(),
                    loc.line(),
                    loc.column()
                )
            } else {
                format!("reqrev panic: {info}")
            };
            console("error", &msg);
        }));
    });
}

/// Runs when the content script is loaded into a page.
#[wasm_bindgen(start)]
pub fn wasm_start() {
    install_panic_hook();

    let loaded = settings::load_config(settings::EMBEDDED_CONFIG);
    logging::init(ConsoleSink, settings::level_filter(&loaded.config.log_level));
    for problem in &loaded.problems {
        warn!(%problem, "embedded config rejected; using defaults");
    }

    let host = match WebHost::from_window() {
        Ok(host) => Rc::new(host),
        Err(err) => {
            error!(%err, "content script idle");
            return;
        }
    };
    let controller = Controller::new(host, loaded.config);
    let outcome = controller.start();
    info!(?outcome, "content script started");
    CONTROLLER.with(|slot| {
        if let Some(previous) = slot.borrow_mut().replace(controller) {
            previous.shutdown();
        }
    });
}

/// Remove everything the content script added and stop all of its work.
///
/// Called by the loader before the extension is reloaded in place.
#[wasm_bindgen(js_name = reqrevShutdown)]
pub fn shutdown() {
    let controller = CONTROLLER.with(|slot| slot.borrow_mut().take());
    if let Some(controller) = controller {
        controller.shutdown();
        info!("content script shut down");
    }
}
