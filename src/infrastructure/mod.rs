pub mod bluetooth;
pub mod location;
pub mod logging;
pub mod permissions;
pub mod push;
pub mod simulated;
