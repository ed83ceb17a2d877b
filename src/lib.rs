//! Callgate - call session control for a cellular telephony gateway
//!
//! Each voice call on the modem is presented to call-control clients as a
//! call session. Sessions can be held, merged into conferences and split
//! out again; the modem answers every request asynchronously.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
