//! Bluetooth Module
//!
//! BLE central role on behalf of the page: discovery, connections and
//! characteristic I/O.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BleService                         │
//! │   (connection table, data stream, public API)            │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │  Codec   │
//! │           │  │            │  │          │
//! │ - one scan│  │ - connect  │  │ - base64 │
//! │ - name    │  │ - GATT     │  │   ⇄ text │
//! │   filter  │  │   monitors │  │          │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       └──────┬───────┘
//!              ▼
//!      ┌──────────────┐
//!      │ native ports │  (BleManager / BlePeripheral)
//!      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`native`] - Platform BLE manager and peripheral traits
//! - [`codec`] - Characteristic value encoding
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - Link setup and notification wiring
//! - [`service`] - Main service coordinator

pub mod codec;
pub mod connection;
pub mod native;
pub mod scanner;
pub mod service;

// Re-export main service for convenience
pub use service::BleService;
