//! Release causes reported by the call service and their mapping onto
//! release reasons and feedback tones

use crate::domain::call::tone::ToneEvent;
use crate::domain::call::value_object::ReleaseReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a disconnect cause originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CauseType {
    Unknown,
    Local,
    Remote,
    Network,
}

impl CauseType {
    pub fn domain_prefix(&self) -> &'static str {
        match self {
            CauseType::Unknown => "Unknown",
            CauseType::Local => "Local",
            CauseType::Remote => "Remote",
            CauseType::Network => "Network",
        }
    }
}

// 3GPP TS 24.008 cause values referenced by the mapping below
pub const UNASSIGNED_NUMBER: u8 = 1;
pub const NO_ROUTE_TO_DESTINATION: u8 = 3;
pub const NORMAL_CALL_CLEARING: u8 = 16;
pub const USER_BUSY: u8 = 17;
pub const NO_USER_RESPONDING: u8 = 18;
pub const USER_ALERTING_NO_ANSWER: u8 = 19;
pub const CALL_REJECTED: u8 = 21;
pub const NUMBER_CHANGED: u8 = 22;
pub const DESTINATION_OUT_OF_ORDER: u8 = 27;
pub const INVALID_NUMBER_FORMAT: u8 = 28;
pub const NORMAL_UNSPECIFIED: u8 = 31;
pub const NO_CIRCUIT_CHANNEL_AVAILABLE: u8 = 34;
pub const NETWORK_OUT_OF_ORDER: u8 = 38;
pub const TEMPORARY_FAILURE: u8 = 41;
pub const SWITCHING_EQUIPMENT_CONGESTION: u8 = 42;
pub const REQUESTED_CIRCUIT_NOT_AVAILABLE: u8 = 44;
pub const RESOURCES_UNAVAILABLE: u8 = 47;
pub const OPERATOR_DETERMINED_BARRING: u8 = 8;
pub const INCOMING_CALLS_BARRED_WITHIN_CUG: u8 = 55;
pub const BEARER_CAPABILITY_NOT_AUTHORIZED: u8 = 57;
pub const RECOVERY_ON_TIMER_EXPIRY: u8 = 102;
pub const INTERWORKING_UNSPECIFIED: u8 = 127;

/// Disconnect cause as delivered with a `Disconnected` state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCause {
    pub cause_type: CauseType,
    /// Zero when the backend gave no cause
    pub cause: u8,
}

impl CallCause {
    pub fn new(cause_type: CauseType, cause: u8) -> Self {
        Self { cause_type, cause }
    }

    pub fn none() -> Self {
        Self::new(CauseType::Unknown, 0)
    }

    pub fn is_known(&self) -> bool {
        self.cause_type != CauseType::Unknown && self.cause != 0
    }

    /// Symbolic name of the cause value
    pub fn name(&self) -> &'static str {
        match self.cause {
            0 => "NoCause",
            UNASSIGNED_NUMBER => "UnassignedNumber",
            NO_ROUTE_TO_DESTINATION => "NoRouteToDestination",
            OPERATOR_DETERMINED_BARRING => "OperatorDeterminedBarring",
            NORMAL_CALL_CLEARING => "NormalCallClearing",
            USER_BUSY => "UserBusy",
            NO_USER_RESPONDING => "NoUserResponding",
            USER_ALERTING_NO_ANSWER => "UserAlertingNoAnswer",
            CALL_REJECTED => "CallRejected",
            NUMBER_CHANGED => "NumberChanged",
            DESTINATION_OUT_OF_ORDER => "DestinationOutOfOrder",
            INVALID_NUMBER_FORMAT => "InvalidNumberFormat",
            NORMAL_UNSPECIFIED => "NormalUnspecified",
            NO_CIRCUIT_CHANNEL_AVAILABLE => "NoCircuitChannelAvailable",
            NETWORK_OUT_OF_ORDER => "NetworkOutOfOrder",
            TEMPORARY_FAILURE => "TemporaryFailure",
            SWITCHING_EQUIPMENT_CONGESTION => "SwitchingEquipmentCongestion",
            REQUESTED_CIRCUIT_NOT_AVAILABLE => "RequestedCircuitChannelNotAvailable",
            RESOURCES_UNAVAILABLE => "ResourcesUnavailable",
            INCOMING_CALLS_BARRED_WITHIN_CUG => "IncomingCallsBarredWithinCug",
            BEARER_CAPABILITY_NOT_AUTHORIZED => "BearerCapabilityNotAuthorized",
            RECOVERY_ON_TIMER_EXPIRY => "RecoveryOnTimerExpiry",
            INTERWORKING_UNSPECIFIED => "InterworkingUnspecified",
            _ => "Unknown",
        }
    }

    /// Human-readable message for the cause
    pub fn message(&self) -> String {
        match self.cause {
            0 => "Call released".to_string(),
            NORMAL_CALL_CLEARING | NORMAL_UNSPECIFIED => "Call released".to_string(),
            USER_BUSY => "User busy".to_string(),
            NO_USER_RESPONDING | USER_ALERTING_NO_ANSWER => "No answer".to_string(),
            CALL_REJECTED => "Call rejected".to_string(),
            _ => format!("{} cause {} ({})", self.cause_type.domain_prefix(), self.name(), self.cause),
        }
    }

    /// Release reason for a disconnect with this cause
    pub fn release_reason(&self) -> ReleaseReason {
        match self.cause {
            0 => ReleaseReason::None,
            NORMAL_CALL_CLEARING | NORMAL_UNSPECIFIED => {
                if self.cause_type == CauseType::Local {
                    ReleaseReason::UserRequested
                } else {
                    ReleaseReason::None
                }
            }
            USER_BUSY => ReleaseReason::Busy,
            NO_USER_RESPONDING | USER_ALERTING_NO_ANSWER => ReleaseReason::NoAnswer,
            UNASSIGNED_NUMBER | NO_ROUTE_TO_DESTINATION | NUMBER_CHANGED | INVALID_NUMBER_FORMAT => {
                ReleaseReason::InvalidContact
            }
            CALL_REJECTED
            | OPERATOR_DETERMINED_BARRING
            | INCOMING_CALLS_BARRED_WITHIN_CUG
            | BEARER_CAPABILITY_NOT_AUTHORIZED => ReleaseReason::PermissionDenied,
            DESTINATION_OUT_OF_ORDER
            | NO_CIRCUIT_CHANNEL_AVAILABLE
            | NETWORK_OUT_OF_ORDER
            | TEMPORARY_FAILURE
            | SWITCHING_EQUIPMENT_CONGESTION
            | REQUESTED_CIRCUIT_NOT_AVAILABLE
            | RESOURCES_UNAVAILABLE
            | RECOVERY_ON_TIMER_EXPIRY => ReleaseReason::NetworkError,
            _ => ReleaseReason::Error,
        }
    }

    /// Feedback tone for a call that ended with this cause
    pub fn event_tone(&self) -> Option<ToneEvent> {
        match self.cause {
            USER_BUSY => Some(ToneEvent::Busy),
            NO_CIRCUIT_CHANNEL_AVAILABLE
            | SWITCHING_EQUIPMENT_CONGESTION
            | REQUESTED_CIRCUIT_NOT_AVAILABLE
            | RESOURCES_UNAVAILABLE => Some(ToneEvent::Congestion),
            UNASSIGNED_NUMBER | NO_ROUTE_TO_DESTINATION | NUMBER_CHANGED | INVALID_NUMBER_FORMAT => {
                Some(ToneEvent::SpecialInformation)
            }
            NETWORK_OUT_OF_ORDER | TEMPORARY_FAILURE | DESTINATION_OUT_OF_ORDER => {
                Some(ToneEvent::RadioPathNotAvailable)
            }
            _ => None,
        }
    }
}

/// Error reported by the call service for a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    /// Network-level failure with a disconnect cause
    Cause(CallCause),
    /// Failure raised by the call service itself
    Service { name: String, message: String },
}

impl BackendError {
    pub fn service(name: &str, message: &str) -> Self {
        BackendError::Service {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn domain_prefix(&self) -> &'static str {
        match self {
            BackendError::Cause(cause) => cause.cause_type.domain_prefix(),
            BackendError::Service { .. } => "Service",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BackendError::Cause(cause) => cause.name(),
            BackendError::Service { name, .. } => name,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BackendError::Cause(cause) => cause.message(),
            BackendError::Service { message, .. } => message.clone(),
        }
    }

    /// Domain-qualified error name
    pub fn fqn(&self) -> String {
        format!("org.ofono.Error.{}.{}", self.domain_prefix(), self.name())
    }

    /// Release reason for a failed dial
    pub fn release_reason(&self) -> ReleaseReason {
        match self {
            BackendError::Cause(cause) => cause.release_reason(),
            BackendError::Service { name, .. } => match name.as_str() {
                "InvalidFormat" | "InvalidArguments" => ReleaseReason::InvalidContact,
                "NotAllowed" | "AccessDenied" => ReleaseReason::PermissionDenied,
                "Busy" => ReleaseReason::Busy,
                _ => ReleaseReason::Error,
            },
        }
    }

    /// Feedback tone for a failed dial
    pub fn error_tone(&self) -> Option<ToneEvent> {
        match self {
            BackendError::Cause(cause) => cause.event_tone(),
            BackendError::Service { .. } => Some(ToneEvent::RadioPathNotAvailable),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.domain_prefix(), self.name(), self.message())
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_reason_mapping() {
        let busy = CallCause::new(CauseType::Network, USER_BUSY);
        assert_eq!(busy.release_reason(), ReleaseReason::Busy);

        let no_answer = CallCause::new(CauseType::Remote, USER_ALERTING_NO_ANSWER);
        assert_eq!(no_answer.release_reason(), ReleaseReason::NoAnswer);

        let congestion = CallCause::new(CauseType::Network, SWITCHING_EQUIPMENT_CONGESTION);
        assert_eq!(congestion.release_reason(), ReleaseReason::NetworkError);

        let hangup = CallCause::new(CauseType::Local, NORMAL_CALL_CLEARING);
        assert_eq!(hangup.release_reason(), ReleaseReason::UserRequested);

        let remote_hangup = CallCause::new(CauseType::Remote, NORMAL_CALL_CLEARING);
        assert_eq!(remote_hangup.release_reason(), ReleaseReason::None);

        assert_eq!(CallCause::none().release_reason(), ReleaseReason::None);
    }

    #[test]
    fn test_event_tones() {
        assert_eq!(CallCause::new(CauseType::Network, USER_BUSY).event_tone(), Some(ToneEvent::Busy));
        assert_eq!(
            CallCause::new(CauseType::Network, INVALID_NUMBER_FORMAT).event_tone(),
            Some(ToneEvent::SpecialInformation)
        );
        assert_eq!(CallCause::new(CauseType::Remote, NORMAL_CALL_CLEARING).event_tone(), None);
    }

    #[test]
    fn test_backend_error_names() {
        let err = BackendError::Cause(CallCause::new(CauseType::Network, USER_BUSY));
        assert_eq!(err.fqn(), "org.ofono.Error.Network.UserBusy");
        assert_eq!(err.release_reason(), ReleaseReason::Busy);

        let err = BackendError::service("InvalidFormat", "Invalid phone number");
        assert_eq!(err.fqn(), "org.ofono.Error.Service.InvalidFormat");
        assert_eq!(err.release_reason(), ReleaseReason::InvalidContact);
        assert_eq!(err.to_string(), "Service.InvalidFormat: Invalid phone number");
    }
}
