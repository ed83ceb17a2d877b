//! Domain layer - call sessions, conferences and the switchboard routing
//! between them
//!
//! Everything here is synchronous. Backend answers arrive later as
//! notifications, so no operation ever waits on the modem.

pub mod call;
pub mod conference;
pub mod shared;
pub mod switchboard;

pub use shared::{CallError, Result};
