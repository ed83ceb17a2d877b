//! Domain errors

use thiserror::Error;

/// Caller-facing error vocabulary for call control operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CallError {
    /// Domain-qualified error name reported to call-control consumers
    pub fn dbus_name(&self) -> &'static str {
        match self {
            CallError::InvalidContact(_) => "org.freedesktop.Telepathy.Error.InvalidHandle",
            CallError::Disconnected(_) => "org.freedesktop.Telepathy.Error.Disconnected",
            CallError::NotAvailable(_) => "org.freedesktop.Telepathy.Error.NotAvailable",
            CallError::InvalidArgument(_) => "org.freedesktop.Telepathy.Error.InvalidArgument",
            CallError::NotImplemented(_) => "org.freedesktop.Telepathy.Error.NotImplemented",
            CallError::InternalError(_) => "org.freedesktop.Telepathy.Error.InternalError",
        }
    }

    /// Free-text part of the error
    pub fn message(&self) -> &str {
        match self {
            CallError::InvalidContact(m)
            | CallError::Disconnected(m)
            | CallError::NotAvailable(m)
            | CallError::InvalidArgument(m)
            | CallError::NotImplemented(m)
            | CallError::InternalError(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        let err = CallError::NotAvailable("Call control operation pending".to_string());
        assert_eq!(err.dbus_name(), "org.freedesktop.Telepathy.Error.NotAvailable");
        assert_eq!(err.message(), "Call control operation pending");
        assert_eq!(err.to_string(), "Not available: Call control operation pending");
    }
}
