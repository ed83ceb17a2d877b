//! In-memory call service
//!
//! `SimulatedModem` accepts every request the way a modem call manager
//! would, records it, and lets the driver decide how the network answers.
//! Answers come back as [`BackendEvent`]s to feed into the switchboard.

use crate::domain::call::backend::{BackendNotification, CallService, PendingRequest};
use crate::domain::call::cause::{BackendError, CallCause};
use crate::domain::call::value_object::{BackendCallState, ClirOverride};
use crate::domain::shared::value_objects::{CallHandle, RequestId, SessionId};
use crate::domain::switchboard::BackendEvent;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A request as seen by the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemRequest {
    Dial {
        owner: SessionId,
        number: String,
        clir: ClirOverride,
    },
    Answer(CallHandle),
    Release(CallHandle),
    Hold { call: CallHandle, hold: bool },
    Split(CallHandle),
    Dtmf { call: CallHandle, digits: String },
    Cancel(RequestId),
}

#[derive(Debug)]
struct CallLeg {
    state: BackendCallState,
    owner: Option<SessionId>,
}

#[derive(Debug)]
struct Pending {
    owner: Option<SessionId>,
    request: ModemRequest,
}

#[derive(Debug, Default)]
struct ModemState {
    next_request: u64,
    next_call: u32,
    log: Vec<ModemRequest>,
    pending: HashMap<RequestId, Pending>,
    calls: HashMap<CallHandle, CallLeg>,
}

impl ModemState {
    fn issue(&mut self, owner: Option<SessionId>, request: ModemRequest) -> PendingRequest {
        self.next_request += 1;
        let id = RequestId::new(self.next_request);
        debug!("modem: {} {:?}", id, request);
        self.log.push(request.clone());
        self.pending.insert(id, Pending { owner, request });
        PendingRequest::new(id)
    }

    fn owner_of(&self, call: &CallHandle) -> Option<SessionId> {
        self.calls.get(call).and_then(|leg| leg.owner)
    }

    fn mint_call(&mut self, state: BackendCallState, owner: Option<SessionId>) -> CallHandle {
        self.next_call += 1;
        let handle = CallHandle::new(format!("/ril_0/voicecall{:02}", self.next_call));
        self.calls.insert(handle.clone(), CallLeg { state, owner });
        handle
    }
}

#[derive(Debug, Default)]
pub struct SimulatedModem {
    state: Mutex<ModemState>,
}

impl SimulatedModem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ModemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<ModemRequest> {
        self.state().log.clone()
    }

    /// Requests still waiting for an answer
    pub fn pending(&self) -> Vec<(RequestId, ModemRequest)> {
        let state = self.state();
        let mut pending: Vec<_> = state
            .pending
            .iter()
            .map(|(id, p)| (*id, p.request.clone()))
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        pending
    }

    /// Most recent pending request matching `pred`
    pub fn last_pending(&self, pred: impl Fn(&ModemRequest) -> bool) -> Option<RequestId> {
        self.pending()
            .into_iter()
            .rev()
            .find(|(_, request)| pred(request))
            .map(|(id, _)| id)
    }

    pub fn cancelled(&self) -> Vec<RequestId> {
        self.state()
            .log
            .iter()
            .filter_map(|r| match r {
                ModemRequest::Cancel(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Session currently attached to `call`
    pub fn owner(&self, call: &CallHandle) -> Option<SessionId> {
        self.state().owner_of(call)
    }

    /// Answer a dial request with a new call leg in `Dialing`
    pub fn complete_dial(&self, request: RequestId) -> Option<BackendEvent> {
        let mut state = self.state();
        let pending = state.pending.remove(&request)?;
        let ModemRequest::Dial { owner, .. } = pending.request else {
            state.pending.insert(request, pending);
            return None;
        };
        let handle = state.mint_call(BackendCallState::Dialing, None);
        Some(BackendEvent::Session {
            session: owner,
            notification: BackendNotification::CreateReply {
                request,
                result: Ok(handle),
            },
        })
    }

    pub fn fail_dial(&self, request: RequestId, error: BackendError) -> Option<BackendEvent> {
        let mut state = self.state();
        let pending = state.pending.remove(&request)?;
        let ModemRequest::Dial { owner, .. } = pending.request else {
            state.pending.insert(request, pending);
            return None;
        };
        Some(BackendEvent::Session {
            session: owner,
            notification: BackendNotification::CreateReply {
                request,
                result: Err(error),
            },
        })
    }

    /// Answer an answer, hold, split or DTMF request
    pub fn reply(
        &self,
        request: RequestId,
        result: std::result::Result<(), BackendError>,
    ) -> Option<BackendEvent> {
        let mut state = self.state();
        let pending = state.pending.remove(&request)?;

        let notification = match pending.request {
            ModemRequest::Answer(_) => BackendNotification::AnswerReply { request, result },
            ModemRequest::Hold { ref call, hold } => {
                if result.is_ok() {
                    if let Some(leg) = state.calls.get_mut(call) {
                        leg.state = if hold {
                            BackendCallState::Held
                        } else {
                            BackendCallState::Active
                        };
                    }
                }
                BackendNotification::HoldReply { request, result }
            }
            ModemRequest::Split(_) => BackendNotification::SplitReply { request, result },
            ModemRequest::Dtmf { .. } => BackendNotification::DtmfReply { request, result },
            other => {
                state.pending.insert(request, Pending { owner: pending.owner, request: other });
                return None;
            }
        };

        let session = pending.owner?;
        Some(BackendEvent::Session {
            session,
            notification,
        })
    }

    /// The network moved `call` to `state`
    pub fn set_state(
        &self,
        call: &CallHandle,
        new_state: BackendCallState,
        cause: CallCause,
    ) -> Option<BackendEvent> {
        let mut state = self.state();
        let leg = state.calls.get_mut(call)?;
        leg.state = new_state;
        let owner = leg.owner?;
        Some(BackendEvent::Session {
            session: owner,
            notification: BackendNotification::StateChanged {
                state: new_state,
                cause,
            },
        })
    }

    /// Deliver any other notification for `call`
    pub fn notify(&self, call: &CallHandle, notification: BackendNotification) -> Option<BackendEvent> {
        let owner = self.state().owner_of(call)?;
        Some(BackendEvent::Session {
            session: owner,
            notification,
        })
    }

    /// A new call arrives from the network
    pub fn announce_incoming(&self, remote: &str, call_state: BackendCallState) -> (CallHandle, BackendEvent) {
        let handle = self.state().mint_call(call_state, None);
        let event = BackendEvent::Incoming {
            call: handle.clone(),
            remote: remote.to_string(),
            state: call_state,
        };
        (handle, event)
    }
}

impl CallService for SimulatedModem {
    fn create_call(
        &self,
        owner: SessionId,
        number: &str,
        clir: ClirOverride,
    ) -> std::result::Result<PendingRequest, BackendError> {
        if number.is_empty() {
            return Err(BackendError::service("InvalidFormat", "Empty phone number"));
        }
        Ok(self.state().issue(
            Some(owner),
            ModemRequest::Dial {
                owner,
                number: number.to_string(),
                clir,
            },
        ))
    }

    fn answer(&self, call: &CallHandle) -> PendingRequest {
        let mut state = self.state();
        let owner = state.owner_of(call);
        state.issue(owner, ModemRequest::Answer(call.clone()))
    }

    fn release(&self, call: &CallHandle) {
        debug!("modem: release {}", call);
        self.state().log.push(ModemRequest::Release(call.clone()));
    }

    fn request_hold(&self, call: &CallHandle, hold: bool) -> PendingRequest {
        let mut state = self.state();
        let owner = state.owner_of(call);
        state.issue(
            owner,
            ModemRequest::Hold {
                call: call.clone(),
                hold,
            },
        )
    }

    fn split(&self, call: &CallHandle) -> PendingRequest {
        let mut state = self.state();
        let owner = state.owner_of(call);
        state.issue(owner, ModemRequest::Split(call.clone()))
    }

    fn send_dtmf(&self, call: &CallHandle, digits: &str) -> Option<PendingRequest> {
        let valid = !digits.is_empty()
            && digits
                .chars()
                .all(|c| c.is_ascii_digit() || "*#ABCDabcdpPwW".contains(c));
        if !valid {
            return None;
        }

        let mut state = self.state();
        let owner = state.owner_of(call);
        Some(state.issue(
            owner,
            ModemRequest::Dtmf {
                call: call.clone(),
                digits: digits.to_string(),
            },
        ))
    }

    fn can_join(&self, call: &CallHandle) -> bool {
        matches!(
            self.call_state(call),
            BackendCallState::Active | BackendCallState::Held
        )
    }

    fn call_state(&self, call: &CallHandle) -> BackendCallState {
        self.state()
            .calls
            .get(call)
            .map_or(BackendCallState::Invalid, |leg| leg.state)
    }

    fn cancel(&self, request: PendingRequest) {
        let mut state = self.state();
        state.pending.remove(&request.id());
        state.log.push(ModemRequest::Cancel(request.id()));
    }

    fn attach(&self, call: &CallHandle, owner: SessionId) {
        if let Some(leg) = self.state().calls.get_mut(call) {
            leg.owner = Some(owner);
        }
    }

    fn detach(&self, call: &CallHandle) {
        if let Some(leg) = self.state().calls.get_mut(call) {
            leg.owner = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::cause::CauseType;

    #[test]
    fn test_dial_reply_routes_to_owner() {
        let modem = SimulatedModem::new();
        let owner = SessionId::new();
        let request = modem.create_call(owner, "+3581234", ClirOverride::Default).unwrap();

        let Some(BackendEvent::Session { session, notification }) = modem.complete_dial(request.id()) else {
            panic!("expected a create reply");
        };
        assert_eq!(session, owner);
        let BackendNotification::CreateReply { result: Ok(call), .. } = notification else {
            panic!("expected a call handle");
        };
        assert_eq!(modem.call_state(&call), BackendCallState::Dialing);

        // Nothing attached yet, so state changes go nowhere
        assert!(modem.set_state(&call, BackendCallState::Alerting, CallCause::none()).is_none());
        modem.attach(&call, owner);
        assert!(modem.set_state(&call, BackendCallState::Active, CallCause::none()).is_some());
        assert!(modem.can_join(&call));
    }

    #[test]
    fn test_cancelled_request_never_replies() {
        let modem = SimulatedModem::new();
        let request = modem.create_call(SessionId::new(), "123", ClirOverride::Default).unwrap();
        modem.cancel(request);

        assert!(modem.complete_dial(request.id()).is_none());
        assert_eq!(modem.cancelled(), vec![request.id()]);
    }

    #[test]
    fn test_disconnected_call_cannot_join() {
        let modem = SimulatedModem::new();
        let owner = SessionId::new();
        let (call, _) = modem.announce_incoming("+3585555", BackendCallState::Incoming);
        modem.attach(&call, owner);

        let cause = CallCause::new(CauseType::Remote, 16);
        assert!(modem.set_state(&call, BackendCallState::Disconnected, cause).is_some());
        assert_eq!(modem.call_state(&call), BackendCallState::Disconnected);
        assert!(!modem.can_join(&call));
    }

    #[test]
    fn test_bad_dtmf_rejected() {
        let modem = SimulatedModem::new();
        let call = CallHandle::new("/ril_0/voicecall01");
        assert!(modem.send_dtmf(&call, "12#").is_some());
        assert!(modem.send_dtmf(&call, "12x").is_none());
        assert!(modem.send_dtmf(&call, "").is_none());
    }
}
