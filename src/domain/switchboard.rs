//! Switchboard - owns every call session and conference of the gateway
//!
//! All control requests and backend events pass through here one at a
//! time. Sessions are looked up by id; a closed session is dropped once
//! no create request is outstanding for it.

use crate::domain::call::backend::BackendNotification;
use crate::domain::call::cause::CallCause;
use crate::domain::call::event::{CallEvent, EventBus};
use crate::domain::call::session::{CallSession, SessionContext};
use crate::domain::call::tone::ToneToken;
use crate::domain::call::value_object::{
    AnonymityModes, BackendCallState, ChangeReason, HoldReason, HoldState, ReleaseReason,
};
use crate::domain::conference::{membership, Conference, ConferenceBook};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallHandle, ConferenceId, Handle, RequestId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Input delivered by the backend side of the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendEvent {
    /// Notification for a call leg attached to `session`
    Session {
        session: SessionId,
        notification: BackendNotification,
    },
    /// The network announced a new call
    Incoming {
        call: CallHandle,
        /// Empty when the number is withheld
        remote: String,
        state: BackendCallState,
    },
    /// A tone ran to its end
    ToneStopped { session: SessionId, token: ToneToken },
}

/// Result of a split request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOutcome {
    /// Nothing left to split from; the remaining calls were unheld
    Completed,
    /// The backend split was issued; the answer comes as a [`SplitCompletion`]
    Pending(RequestId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCompletion {
    pub session: SessionId,
    pub request: RequestId,
    pub result: Result<()>,
}

pub struct Switchboard {
    ctx: SessionContext,
    anonymity: AnonymityModes,
    sessions: HashMap<SessionId, CallSession>,
    conferences: ConferenceBook,
    splits: HashMap<RequestId, SessionId>,
    next_serial: u32,
}

impl Switchboard {
    pub fn new(ctx: SessionContext, anonymity: AnonymityModes) -> Self {
        let conferences = ConferenceBook::new(ctx.events.clone());
        Self {
            ctx,
            anonymity,
            sessions: HashMap::new(),
            conferences,
            splits: HashMap::new(),
            next_serial: 0,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn session(&self, id: SessionId) -> Option<&CallSession> {
        self.sessions.get(&id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn conference(&self, id: ConferenceId) -> Option<&Conference> {
        self.conferences.get(id)
    }

    pub fn conferences(&self) -> &ConferenceBook {
        &self.conferences
    }

    fn next_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    fn insert(&mut self, session: CallSession) -> SessionId {
        let id = session.id();
        self.ctx.events.publish(CallEvent::NewChannel {
            session: id,
            requested: session.is_requested(),
            peer: session.peer(),
        });
        self.sessions.insert(id, session);
        id
    }

    /// Create an outgoing session towards `target`; the call is placed on
    /// [`accept`](Self::accept)
    pub fn dial(&mut self, target: &str) -> Result<SessionId> {
        if target.is_empty() {
            return Err(CallError::InvalidArgument("Empty target".to_string()));
        }
        let peer = self.ctx.handles.ensure(target);
        Ok(self.create_outgoing(peer, None, None))
    }

    pub fn create_outgoing(
        &mut self,
        peer: Handle,
        anonymity: Option<AnonymityModes>,
        emergency_service: Option<String>,
    ) -> SessionId {
        let serial = self.next_serial();
        let anonymity = anonymity.unwrap_or(self.anonymity);
        let session = CallSession::outgoing(self.ctx.clone(), serial, peer, anonymity, emergency_service);
        info!("{}: outgoing call to {}", session.nick(), peer);
        self.insert(session)
    }

    /// Create a terminating session for a call announced by the backend
    pub fn incoming(&mut self, call: CallHandle, remote: &str, state: BackendCallState) -> SessionId {
        let peer = if remote.is_empty() {
            None
        } else {
            Some(self.ctx.handles.ensure(remote))
        };

        let serial = self.next_serial();
        let session = CallSession::incoming(self.ctx.clone(), serial, peer, call);
        info!("{}: incoming call from {:?}", session.nick(), peer);
        let id = self.insert(session);

        let notification = BackendNotification::StateChanged {
            state,
            cause: CallCause::none(),
        };
        if let Some(session) = self.sessions.get_mut(&id) {
            session.handle_notification(&mut self.conferences, notification);
        }
        self.reap();
        id
    }

    fn with_session<T>(
        &mut self,
        id: SessionId,
        f: impl FnOnce(&mut CallSession, &mut ConferenceBook) -> T,
    ) -> Result<T> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CallError::InvalidArgument(format!("Unknown session {}", id)))?;
        let result = f(session, &mut self.conferences);
        self.reap();
        Ok(result)
    }

    pub fn accept(&mut self, id: SessionId) -> Result<()> {
        self.with_session(id, |session, _| session.accept())?
    }

    pub fn hangup(
        &mut self,
        id: SessionId,
        reason: ChangeReason,
        detail: &str,
        message: &str,
    ) -> Result<()> {
        self.with_session(id, |session, conferences| {
            session.hangup(conferences, reason, detail, message)
        })
    }

    pub fn close(&mut self, id: SessionId) -> Result<()> {
        self.with_session(id, |session, conferences| session.close(conferences))
    }

    pub fn request_hold(&mut self, id: SessionId, hold: bool) -> Result<()> {
        self.with_session(id, |session, _| session.request_hold(hold))?
    }

    pub fn get_hold_state(&self, id: SessionId) -> Result<(HoldState, HoldReason)> {
        self.sessions
            .get(&id)
            .ok_or_else(|| CallError::InvalidArgument(format!("Unknown session {}", id)))?
            .get_hold_state()
    }

    pub fn send_dialstring(&mut self, id: SessionId, digits: &str, duration: u32, pause: u32) -> Result<()> {
        self.with_session(id, |session, _| session.send_dialstring(digits, duration, pause))?
    }

    pub fn release_from_conference(&mut self, id: SessionId, message: &str, reason: ReleaseReason) -> Result<()> {
        self.with_session(id, |session, _| session.release_from_conference(message, reason))?
    }

    /// Move a session into `conference`
    pub fn join(&mut self, id: SessionId, conference: ConferenceId) -> Result<()> {
        self.with_session(id, |session, conferences| {
            membership::join(session, conferences, conference)
        })?
    }

    /// Take a session out of its conference without ending the call
    pub fn leave(&mut self, id: SessionId) -> Result<()> {
        self.with_session(id, |session, conferences| {
            membership::leave(session, conferences)
        })
    }

    /// Create a conference out of `members`
    pub fn merge(&mut self, members: &[SessionId]) -> Result<ConferenceId> {
        let mut unique: Vec<SessionId> = Vec::with_capacity(members.len());
        for id in members {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        let members = unique.as_slice();
        if members.len() < 2 {
            return Err(CallError::InvalidArgument(
                "Conference needs at least two members".to_string(),
            ));
        }
        for id in members {
            let session = self
                .sessions
                .get(id)
                .ok_or_else(|| CallError::InvalidArgument(format!("Unknown session {}", id)))?;
            membership::can_join(session)?;
        }

        let conference = self.conferences.create();
        for id in members {
            if let Some(session) = self.sessions.get_mut(id) {
                membership::join(session, &mut self.conferences, conference)?;
            }
        }
        Ok(conference)
    }

    /// Split a session out of its conference
    pub fn split(&mut self, id: SessionId) -> Result<SplitOutcome> {
        let session = self
            .sessions
            .get(&id)
            .ok_or_else(|| CallError::InvalidArgument(format!("Unknown session {}", id)))?;
        let Some(conference) = session.conference() else {
            return Err(CallError::NotAvailable("Not a member channel".to_string()));
        };
        let members = self
            .conferences
            .get(conference)
            .map(|c| c.members().to_vec())
            .unwrap_or_default();

        if members.len() <= 2 {
            // The other member may be leaving right now; unhold what is left
            warn!(
                "{}: only {} members in conference, unholding instead of split",
                session.nick(),
                members.len()
            );
            for member in members {
                if let Some(session) = self.sessions.get_mut(&member) {
                    if let Err(e) = session.force_unhold() {
                        warn!("{}: unhold failed: {}", session.nick(), e);
                    }
                }
            }
            return Ok(SplitOutcome::Completed);
        }

        let Some(call) = session.call_handle() else {
            return Err(CallError::NotAvailable("Channel is not connected".to_string()));
        };
        let request = self.ctx.service.split(call);
        debug!("{}: split issued as {}", session.nick(), request.id());
        self.splits.insert(request.id(), id);
        Ok(SplitOutcome::Pending(request.id()))
    }

    /// Route one backend event. Returns the answer to a pending split.
    pub fn handle_backend(&mut self, event: BackendEvent) -> Option<SplitCompletion> {
        let completion = match event {
            BackendEvent::Session { session, notification } => {
                self.route_notification(session, notification)
            }
            BackendEvent::Incoming { call, remote, state } => {
                self.incoming(call, &remote, state);
                None
            }
            BackendEvent::ToneStopped { session, token } => {
                match self.sessions.get_mut(&session) {
                    Some(s) => s.on_tone_stopped(&mut self.conferences, token),
                    None => debug!("tone {} stopped for unknown session {}", token.as_u32(), session),
                }
                None
            }
        };
        self.reap();
        completion
    }

    fn route_notification(
        &mut self,
        id: SessionId,
        notification: BackendNotification,
    ) -> Option<SplitCompletion> {
        if let BackendNotification::SplitReply { request, result } = &notification {
            if let Some(session) = self.splits.remove(request) {
                let result = result.clone().map_err(|e| {
                    debug!("split failed: {}", e);
                    CallError::NotAvailable("Cannot LeaveConference".to_string())
                });
                return Some(SplitCompletion {
                    session,
                    request: *request,
                    result,
                });
            }
        }

        match self.sessions.get_mut(&id) {
            Some(session) => session.handle_notification(&mut self.conferences, notification),
            None => debug!("{} for unknown session {}", notification.name(), id),
        }
        None
    }

    /// Drop closed sessions and empty conferences
    fn reap(&mut self) {
        let closed: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_closed() && !s.has_pending_create())
            .map(|s| s.id())
            .collect();
        for id in closed {
            self.sessions.remove(&id);
            debug!("Cleaned up session: {}", id);
        }

        for id in self.conferences.ids() {
            self.conferences.remove_if_empty(id);
        }
    }
}
