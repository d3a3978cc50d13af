//! Page ⇄ native RPC bridge
//!
//! - [`protocol`] - Wire format, method catalogue and injected scripts
//! - [`host`] - Browser view seam
//! - [`client`] - In-page client module
//! - [`dispatcher`] - Request routing and event streams

pub mod client;
pub mod dispatcher;
pub mod host;
pub mod protocol;

pub use dispatcher::{Capabilities, Dispatcher};
