//! Call service port
//!
//! The call service is the modem-side signaling backend. Every request
//! returns immediately with a [`PendingRequest`]; the result arrives later
//! as a [`BackendNotification`] keyed by the request id.

use crate::domain::call::cause::{BackendError, CallCause};
use crate::domain::call::value_object::{BackendCallState, ClirOverride};
use crate::domain::shared::value_objects::{CallHandle, RequestId, SessionId};
use serde::{Deserialize, Serialize};

/// Opaque handle to an in-flight backend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingRequest(RequestId);

impl PendingRequest {
    pub fn new(id: RequestId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> RequestId {
        self.0
    }
}

/// Modem call service
#[cfg_attr(test, mockall::automock)]
pub trait CallService: Send + Sync {
    /// Dial `number`. An immediate rejection means the number was not accepted.
    fn create_call(
        &self,
        owner: SessionId,
        number: &str,
        clir: ClirOverride,
    ) -> std::result::Result<PendingRequest, BackendError>;

    fn answer(&self, call: &CallHandle) -> PendingRequest;

    /// Best-effort release, no reply is delivered
    fn release(&self, call: &CallHandle);

    fn request_hold(&self, call: &CallHandle, hold: bool) -> PendingRequest;

    fn split(&self, call: &CallHandle) -> PendingRequest;

    /// `None` when the digit string is rejected
    fn send_dtmf(&self, call: &CallHandle, digits: &str) -> Option<PendingRequest>;

    fn can_join(&self, call: &CallHandle) -> bool;

    fn call_state(&self, call: &CallHandle) -> BackendCallState;

    /// Cancelled requests never deliver a reply
    fn cancel(&self, request: PendingRequest);

    /// Route notifications of `call` to `owner`
    fn attach(&self, call: &CallHandle, owner: SessionId);

    /// Stop routing notifications of `call`
    fn detach(&self, call: &CallHandle);
}

/// Notification delivered by the call service to the owning session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendNotification {
    StateChanged {
        state: BackendCallState,
        cause: CallCause,
    },
    /// The remote party put us on hold, or released the hold
    RemoteHold(bool),
    Forwarded,
    /// The call targets an emergency service
    Emergency(String),
    Multiparty(bool),
    Waiting,
    CreateReply {
        request: RequestId,
        result: std::result::Result<CallHandle, BackendError>,
    },
    AnswerReply {
        request: RequestId,
        result: std::result::Result<(), BackendError>,
    },
    HoldReply {
        request: RequestId,
        result: std::result::Result<(), BackendError>,
    },
    SplitReply {
        request: RequestId,
        result: std::result::Result<(), BackendError>,
    },
    DtmfReply {
        request: RequestId,
        result: std::result::Result<(), BackendError>,
    },
}

impl BackendNotification {
    pub fn name(&self) -> &'static str {
        match self {
            BackendNotification::StateChanged { .. } => "state",
            BackendNotification::RemoteHold(_) => "on-hold",
            BackendNotification::Forwarded => "forwarded",
            BackendNotification::Emergency(_) => "emergency",
            BackendNotification::Multiparty(_) => "multiparty",
            BackendNotification::Waiting => "waiting",
            BackendNotification::CreateReply { .. } => "create-reply",
            BackendNotification::AnswerReply { .. } => "answer-reply",
            BackendNotification::HoldReply { .. } => "hold-reply",
            BackendNotification::SplitReply { .. } => "split-reply",
            BackendNotification::DtmfReply { .. } => "dtmf-reply",
        }
    }
}

/// Owned reference to the live backend call leg.
///
/// Attaching subscribes the session to the leg's notifications; detaching
/// unsubscribes. The session holds at most one.
#[derive(Debug)]
pub struct BackendCall {
    handle: CallHandle,
}

impl BackendCall {
    pub fn attach(service: &dyn CallService, handle: CallHandle, owner: SessionId) -> Self {
        service.attach(&handle, owner);
        Self { handle }
    }

    pub fn detach(self, service: &dyn CallService) -> CallHandle {
        service.detach(&self.handle);
        self.handle
    }

    pub fn handle(&self) -> &CallHandle {
        &self.handle
    }
}
