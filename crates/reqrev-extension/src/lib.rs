#![forbid(unsafe_code)]

//! WASM content script for ReqRev.
//!
//! On load, the script reads its embedded `reqrev.toml`, routes `tracing`
//! output to the devtools console and starts a
//! [`reqrev_core::Controller`] over `WebHost`, the `web-sys`
//! implementation of the host traits.
//!
//! [`settings`] and [`logging`] carry no browser dependency and are tested
//! natively; the `web-sys` layer is only compiled on `wasm32`.

pub mod logging;
pub mod settings;

#[cfg(target_arch = "wasm32")]
mod wasm;
#[cfg(target_arch = "wasm32")]
pub mod web_host;

#[cfg(target_arch = "wasm32")]
pub use wasm::shutdown;
#[cfg(target_arch = "wasm32")]
pub use web_host::{WebDom, WebHost, WebHostError, WebRuntime, WebScheduler};
