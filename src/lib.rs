//! Native side of a WebView shell: an RPC bridge between the embedded page
//! and device capabilities (BLE, location, push token, permissions).

pub mod bridge;
pub mod domain;
pub mod infrastructure;
pub mod shell;

pub use shell::{NativePorts, NativeShell};
