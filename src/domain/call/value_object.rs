//! Call value objects

use crate::domain::shared::value_objects::Handle;
use serde::{Deserialize, Serialize};

/// Call state as reported by the call service for one call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendCallState {
    /// No call instance, or the instance has gone away
    Invalid,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Active,
    Held,
    Disconnected,
}

impl BackendCallState {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCallState::Invalid => "Invalid",
            BackendCallState::Dialing => "Dialing",
            BackendCallState::Alerting => "Alerting",
            BackendCallState::Incoming => "Incoming",
            BackendCallState::Waiting => "Waiting",
            BackendCallState::Active => "Active",
            BackendCallState::Held => "Held",
            BackendCallState::Disconnected => "Disconnected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendCallState::Disconnected | BackendCallState::Invalid)
    }
}

/// Externally visible call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Outgoing call waiting for the local user to accept it
    PendingInitiator,
    /// Create request issued, waiting for the network
    Initialising,
    /// Remote side is being alerted, or an incoming call is ringing locally
    Initialised,
    /// Incoming call accepted locally, waiting for the connection
    Accepted,
    Active,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::PendingInitiator => "pending_initiator",
            CallState::Initialising => "initialising",
            CallState::Initialised => "initialised",
            CallState::Accepted => "accepted",
            CallState::Active => "active",
            CallState::Ended => "ended",
        }
    }
}

/// Which side placed the call. Set once from the first backend notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Originating,
    Terminating,
}

/// Local hold state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Unheld,
    Held,
    PendingHold,
    PendingUnheld,
}

impl HoldState {
    pub fn name(&self) -> &'static str {
        match self {
            HoldState::Unheld => "Unheld",
            HoldState::Held => "Held",
            HoldState::PendingHold => "Pending_Hold",
            HoldState::PendingUnheld => "Pending_Unhold",
        }
    }

    /// The confirmed state this state is heading to
    pub fn target(&self) -> HoldState {
        match self {
            HoldState::Unheld | HoldState::PendingUnheld => HoldState::Unheld,
            HoldState::Held | HoldState::PendingHold => HoldState::Held,
        }
    }
}

/// Reason attached to a hold state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    None,
    Requested,
    ResourceNotAvailable,
}

/// Reason attached to a call state or member change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Unknown,
    ProgressMade,
    UserRequested,
    Forwarded,
    InvalidContact,
    InternalError,
}

/// Symbolic reason a party left a call or conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    None,
    /// Cleared on purpose by the local user
    UserRequested,
    Offline,
    Busy,
    NoAnswer,
    InvalidContact,
    PermissionDenied,
    NetworkError,
    Invited,
    Separated,
    Error,
}

impl ReleaseReason {
    pub fn name(&self) -> &'static str {
        match self {
            ReleaseReason::None => "None",
            ReleaseReason::UserRequested => "UserRequested",
            ReleaseReason::Offline => "Offline",
            ReleaseReason::Busy => "Busy",
            ReleaseReason::NoAnswer => "NoAnswer",
            ReleaseReason::InvalidContact => "InvalidContact",
            ReleaseReason::PermissionDenied => "PermissionDenied",
            ReleaseReason::NetworkError => "NetworkError",
            ReleaseReason::Invited => "Invited",
            ReleaseReason::Separated => "Separated",
            ReleaseReason::Error => "Error",
        }
    }
}

/// Details carried with a call state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReason {
    pub actor: Option<Handle>,
    pub reason: ChangeReason,
    pub release: ReleaseReason,
    /// Domain-qualified error name, empty when there is no error
    pub dbus_reason: String,
    pub message: String,
}

impl StateReason {
    pub fn new(actor: Option<Handle>, reason: ChangeReason, message: impl Into<String>) -> Self {
        Self {
            actor,
            reason,
            release: ReleaseReason::None,
            dbus_reason: String::new(),
            message: message.into(),
        }
    }
}

/// Caller identity presentation policy applied when originating a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClirOverride {
    Default,
    /// Hide the caller identity
    Enabled,
    /// Show the caller identity
    Disabled,
}

/// Anonymity modes requested for an outgoing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnonymityModes(u32);

impl AnonymityModes {
    pub const CLIENT_INFO: u32 = 1;
    pub const SHOW_CLIENT_INFO: u32 = 2;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn clir(&self) -> ClirOverride {
        if self.0 & Self::CLIENT_INFO != 0 {
            ClirOverride::Enabled
        } else if self.0 & Self::SHOW_CLIENT_INFO != 0 {
            ClirOverride::Disabled
        } else {
            ClirOverride::Default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_targets() {
        assert_eq!(HoldState::PendingHold.target(), HoldState::Held);
        assert_eq!(HoldState::PendingUnheld.target(), HoldState::Unheld);
        assert_eq!(HoldState::Held.target(), HoldState::Held);
    }

    #[test]
    fn test_anonymity_to_clir() {
        assert_eq!(AnonymityModes::from_bits(0).clir(), ClirOverride::Default);
        assert_eq!(AnonymityModes::from_bits(1).clir(), ClirOverride::Enabled);
        assert_eq!(AnonymityModes::from_bits(2).clir(), ClirOverride::Disabled);
        // client info wins when both are set
        assert_eq!(AnonymityModes::from_bits(3).clir(), ClirOverride::Enabled);
    }

    #[test]
    fn test_terminal_backend_states() {
        assert!(BackendCallState::Disconnected.is_terminal());
        assert!(!BackendCallState::Active.is_terminal());
        assert_eq!(BackendCallState::Held.name(), "Held");
    }
}
