//! Domain result type

use super::error::CallError;

/// Standard result type for call control operations
pub type Result<T> = std::result::Result<T, CallError>;
