//! Interface layer - the call control loop clients talk to

pub mod control;

pub use control::{spawn, ControlError, ControlHandle, ControlResult, SessionView};
