//! Call session controller
//!
//! One [`CallSession`] exists per ongoing or pending call. It reconciles
//! backend notifications, local control requests and conference membership
//! changes into the externally visible call state. Everything here runs on
//! the caller's task; backend requests only record a [`PendingRequest`] and
//! their results come back through [`CallSession::handle_notification`].

use crate::domain::call::addressing::{AddressResolver, HandleRegistry};
use crate::domain::call::backend::{BackendCall, BackendNotification, CallService, PendingRequest};
use crate::domain::call::cause::{BackendError, CallCause};
use crate::domain::call::content::{CallContent, ContentDisposition};
use crate::domain::call::event::{CallEvent, Conversation, EventBus};
use crate::domain::call::hold::{HoldChange, HoldCheck, HoldMachine};
use crate::domain::call::member::{MemberFlags, MemberRegistry};
use crate::domain::call::request_queue::RequestQueue;
use crate::domain::call::tone::{ToneEvent, TonePlayer, ToneSettings, ToneToken};
use crate::domain::call::value_object::{
    AnonymityModes, BackendCallState, CallState, ChangeReason, HoldReason, HoldState, Origin,
    ReleaseReason, StateReason,
};
use crate::domain::conference::membership;
use crate::domain::conference::ConferenceBook;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallHandle, ConferenceId, Handle, RequestId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionContext {
    pub service: Arc<dyn CallService>,
    pub tones: Arc<dyn TonePlayer>,
    pub resolver: Arc<dyn AddressResolver>,
    pub handles: Arc<dyn HandleRegistry>,
    pub settings: ToneSettings,
    pub events: EventBus,
    /// Handle of the local user
    pub self_handle: Handle,
}

/// Release details latched by the first release request
#[derive(Debug, Clone)]
struct ReleaseInfo {
    message: Option<String>,
    actor: Option<Handle>,
    reason: ReleaseReason,
}

impl Default for ReleaseInfo {
    fn default() -> Self {
        Self {
            message: None,
            actor: None,
            reason: ReleaseReason::None,
        }
    }
}

pub struct CallSession {
    ctx: SessionContext,
    id: SessionId,
    serial: u32,
    nick: String,
    path: String,
    /// Outgoing call requested by the local user
    requested: bool,
    peer: Option<Handle>,
    initial_remote: Option<Handle>,
    member_handle: Option<Handle>,
    state: CallState,
    backend_state: BackendCallState,
    origin: Option<Origin>,
    call: Option<BackendCall>,
    pending_create: Option<PendingRequest>,
    hold: HoldMachine,
    release: ReleaseInfo,
    released: bool,
    shutting_down: bool,
    closed: bool,
    accepted: Option<String>,
    conference: Option<ConferenceId>,
    requests: RequestQueue,
    dial2nd: Option<String>,
    anonymity: AnonymityModes,
    emergency_service: Option<String>,
    initial_emergency_service: Option<String>,
    members: MemberRegistry,
    content: CallContent,
    tone: Option<ToneToken>,
}

impl CallSession {
    /// Session for a call the local user wants to place to `peer`
    pub fn outgoing(
        ctx: SessionContext,
        serial: u32,
        peer: Handle,
        anonymity: AnonymityModes,
        initial_emergency_service: Option<String>,
    ) -> Self {
        let mut session = Self::new(ctx, serial, Some(peer), true, CallState::PendingInitiator);
        session.anonymity = anonymity;
        session.emergency_service = initial_emergency_service.clone();
        session.initial_emergency_service = initial_emergency_service;
        session
    }

    /// Session for a call announced by the backend. `peer` is `None` when
    /// the caller withheld their number.
    pub fn incoming(ctx: SessionContext, serial: u32, peer: Option<Handle>, call: CallHandle) -> Self {
        let mut session = Self::new(ctx, serial, peer, false, CallState::Initialised);
        session.call = Some(BackendCall::attach(
            session.ctx.service.as_ref(),
            call,
            session.id,
        ));
        session
    }

    fn new(
        ctx: SessionContext,
        serial: u32,
        peer: Option<Handle>,
        requested: bool,
        state: CallState,
    ) -> Self {
        let id = SessionId::new();
        let nick = format!("CallChannel{}", serial);
        let path = format!("/callgate/{}", nick);

        let mut members = MemberRegistry::new(Conversation::Session(id), ctx.events.clone());
        if let Some(peer) = peer {
            members.ensure(peer);
        }

        let mut content = CallContent::new(&path, "Audio", ContentDisposition::Initial);
        content.add_stream();

        debug!("{}: created for {:?}", nick, peer);

        Self {
            ctx,
            id,
            serial,
            nick,
            path,
            requested,
            peer,
            initial_remote: peer,
            member_handle: None,
            state,
            backend_state: BackendCallState::Invalid,
            origin: None,
            call: None,
            pending_create: None,
            hold: HoldMachine::new(),
            release: ReleaseInfo::default(),
            released: false,
            shutting_down: false,
            closed: false,
            accepted: None,
            conference: None,
            requests: RequestQueue::new(),
            dial2nd: None,
            anonymity: AnonymityModes::default(),
            emergency_service: None,
            initial_emergency_service: None,
            members,
            content,
            tone: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn peer(&self) -> Option<Handle> {
        self.peer
    }

    pub fn initial_remote(&self) -> Option<Handle> {
        self.initial_remote
    }

    pub fn self_handle(&self) -> Handle {
        self.ctx.self_handle
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Last call state reported by the backend
    pub fn backend_state(&self) -> BackendCallState {
        self.backend_state
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    pub fn call_handle(&self) -> Option<&CallHandle> {
        self.call.as_ref().map(|c| c.handle())
    }

    pub fn has_pending_create(&self) -> bool {
        self.pending_create.is_some()
    }

    pub fn hold_state(&self) -> HoldState {
        self.hold.state()
    }

    pub fn conference(&self) -> Option<ConferenceId> {
        self.conference
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release_message(&self) -> Option<&str> {
        self.release.message.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn accepted(&self) -> Option<&str> {
        self.accepted.as_deref()
    }

    pub fn anonymity(&self) -> AnonymityModes {
        self.anonymity
    }

    pub fn emergency_service(&self) -> Option<&str> {
        self.emergency_service.as_deref()
    }

    pub fn initial_emergency_service(&self) -> Option<&str> {
        self.initial_emergency_service.as_deref()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn members(&self) -> &MemberRegistry {
        &self.members
    }

    pub fn content(&self) -> &CallContent {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut CallContent {
        &mut self.content
    }

    /// Audio is routed by the modem, never through the host
    pub fn hardware_streaming(&self) -> bool {
        true
    }

    pub fn tone(&self) -> Option<ToneToken> {
        self.tone
    }

    pub(crate) fn service(&self) -> &dyn CallService {
        self.ctx.service.as_ref()
    }

    /// Handle identifying this call inside a conference, minted on first use
    pub fn member_handle(&mut self) -> Option<Handle> {
        if self.member_handle.is_none() {
            let peer = self.peer?;
            let owner = self
                .ctx
                .handles
                .identifier(peer)
                .unwrap_or_else(|| peer.as_u32().to_string());
            let name = format!("{}/{}", owner, self.serial);
            self.member_handle = Some(self.ctx.handles.ensure(&name));
        }
        self.member_handle
    }

    /// Member handle to peer handle
    pub fn handle_map(&mut self) -> HashMap<Handle, Handle> {
        let mut map = HashMap::new();
        if let (Some(member), Some(peer)) = (self.member_handle(), self.peer) {
            map.insert(member, peer);
        }
        map
    }

    fn set_state(&mut self, state: CallState, reason: StateReason) {
        if self.state == state {
            return;
        }
        info!("{}: {} -> {}", self.nick, self.state.as_str(), state.as_str());
        self.state = state;
        self.ctx.events.publish(CallEvent::StateChanged {
            session: self.id,
            state,
            reason,
        });
    }

    fn set_origin(&mut self, origin: Origin) {
        if self.origin.is_some() {
            return;
        }
        self.origin = Some(origin);
        self.ctx.events.publish(CallEvent::OriginResolved {
            session: self.id,
            origin,
        });
    }

    fn set_peer_flag(&mut self, flag: MemberFlags, set: bool) {
        if let Some(peer) = self.peer {
            self.members.ensure(peer).set_flag(flag, set);
        }
    }

    fn publish_hold(&self, change: HoldChange) {
        debug!(
            "{}: emitting HoldStateChanged({})",
            self.nick,
            change.state.name()
        );
        self.ctx.events.publish(CallEvent::HoldStateChanged {
            session: self.id,
            state: change.state,
            reason: change.reason,
        });
    }

    // ----------------------------------------------------------------------
    // Control requests

    /// Start the outgoing call, or answer the incoming one
    pub fn accept(&mut self) -> Result<()> {
        if self.closed {
            return Err(CallError::Disconnected("Channel is closed".to_string()));
        }

        if self.requested {
            if self.state != CallState::PendingInitiator {
                return Err(CallError::NotAvailable(
                    "Call was already accepted".to_string(),
                ));
            }
            self.accept_outgoing();
            return Ok(());
        }

        if self.state != CallState::Initialised {
            return Err(CallError::NotAvailable(format!(
                "Incoming call cannot be accepted in state {}",
                self.state.as_str()
            )));
        }
        self.accept_incoming();
        Ok(())
    }

    fn accept_outgoing(&mut self) {
        let destination = self.peer.and_then(|peer| self.ctx.resolver.inspect(peer));
        debug!("{}: trying to start call to {:?}", self.nick, destination);

        let destination = match destination {
            Some(d) if self.ctx.resolver.is_valid_address(&d) => d,
            _ => {
                self.end_with_invalid_contact("Invalid destination");
                return;
            }
        };

        match self.create(&destination) {
            Ok(()) => {
                let actor = Some(self.ctx.self_handle);
                self.set_state(
                    CallState::Initialising,
                    StateReason::new(actor, ChangeReason::UserRequested, "Dialing"),
                );
            }
            Err(e) => self.end_with_invalid_contact(e.message()),
        }
    }

    fn accept_incoming(&mut self) {
        debug!("{}: accepting incoming call", self.nick);

        let Some(call) = &self.call else {
            warn!("{}: missing call instance", self.nick);
            return;
        };
        let service = self.ctx.service.clone();
        if service.call_state(call.handle()) == BackendCallState::Disconnected {
            warn!("{}: invalid call state", self.nick);
            return;
        }
        let handle = call.handle().clone();

        if self.accepted.is_none() {
            self.accepted = Some("Call accepted".to_string());
        }
        let actor = Some(self.ctx.self_handle);
        self.set_state(
            CallState::Accepted,
            StateReason::new(actor, ChangeReason::UserRequested, "Call accepted"),
        );

        // The answer reply is only logged
        let request = service.answer(&handle);
        debug!("{}: answer issued as {}", self.nick, request.id());
    }

    fn end_with_invalid_contact(&mut self, message: &str) {
        warn!("{}: {}", self.nick, message);
        self.released = true;
        self.latch_release(message, None, ReleaseReason::InvalidContact);
        let error = CallError::InvalidContact(message.to_string());
        self.set_state(
            CallState::Ended,
            StateReason {
                actor: None,
                reason: ChangeReason::InvalidContact,
                release: ReleaseReason::InvalidContact,
                dbus_reason: error.dbus_name().to_string(),
                message: message.to_string(),
            },
        );
    }

    fn create(&mut self, destination: &str) -> Result<()> {
        let split = self
            .ctx
            .resolver
            .split_address(destination, self.anonymity.clir());

        self.dial2nd = split.dial2nd;
        if let Some(digits) = &self.dial2nd {
            debug!("{}: 2nd stage dialing: \"{}\"", self.nick, digits);
        }

        let request = self
            .ctx
            .service
            .create_call(self.id, &split.number, split.clir)
            .map_err(|e| CallError::InvalidContact(e.message()))?;
        self.pending_create = Some(request);
        Ok(())
    }

    /// Hang up. Safe to call any number of times.
    ///
    /// With a live call the `Ended` state follows the backend disconnect;
    /// without one the session ends immediately.
    pub fn hangup(
        &mut self,
        conferences: &mut ConferenceBook,
        reason: ChangeReason,
        detail: &str,
        message: &str,
    ) {
        info!("{}: hanging up", self.nick);
        self.shutdown_modem(conferences, message);
        self.members.shutdown_all();

        if self.call.is_none() && !self.released {
            self.released = true;
            let self_handle = Some(self.ctx.self_handle);
            self.latch_release(message, self_handle, ReleaseReason::UserRequested);
            self.set_state(
                CallState::Ended,
                StateReason {
                    actor: Some(self.ctx.self_handle),
                    reason,
                    release: ReleaseReason::UserRequested,
                    dbus_reason: detail.to_string(),
                    message: message.to_string(),
                },
            );
        }
    }

    /// Tear down and close the session
    pub fn close(&mut self, conferences: &mut ConferenceBook) {
        if self.closed {
            return;
        }
        self.shutdown_modem(conferences, "Channel closed");
        self.members.shutdown_all();

        let self_handle = Some(self.ctx.self_handle);
        self.released(
            conferences,
            self_handle,
            ReleaseReason::UserRequested,
            "Channel closed",
            None,
            "channel closed",
        );

        if let Some(call) = self.call.take() {
            call.detach(self.ctx.service.as_ref());
        }
        self.closed = true;
        info!("{}: closed", self.nick);
        self.ctx.events.publish(CallEvent::Closed { session: self.id });
    }

    fn shutdown_modem(&mut self, conferences: &mut ConferenceBook, message: &str) {
        debug!("{}: shutting down the modem call", self.nick);
        self.shutting_down = true;
        self.stop_tone();

        if self.conference.is_some() {
            let actor = self.release.actor;
            let reason = self.release.reason;
            membership::remove_from_conference(self, conferences, message, actor, reason);
        }

        let cancelled = self.requests.cancel_all(self.ctx.service.as_ref());
        if cancelled > 0 {
            debug!("{}: cancelled {} pending requests", self.nick, cancelled);
        }
        self.hold.abandon();

        if let Some(call) = &self.call {
            if self.release.message.is_none() {
                self.release.message = Some(message.to_string());
            }
            self.ctx.service.release(call.handle());
        } else if let Some(request) = self.pending_create.take() {
            self.ctx.service.cancel(request);
        }
    }

    /// Current hold state and reason
    pub fn get_hold_state(&self) -> Result<(HoldState, HoldReason)> {
        if self.call.is_none() {
            return Err(CallError::Disconnected(
                "Channel is not connected".to_string(),
            ));
        }
        Ok((self.hold.state(), self.hold.reason()))
    }

    /// Ask the backend to hold (`true`) or unhold the call. Returns once the
    /// request is validated; the pending state is already visible then.
    pub fn request_hold(&mut self, hold: bool) -> Result<()> {
        debug!("{}: request_hold({})", self.nick, hold);
        let result = self.issue_hold(hold, false);
        if let Err(e) = &result {
            debug!("{}: request_hold({}): {}", self.nick, hold, e.message());
        }
        result
    }

    /// Unhold regardless of the backend call state
    pub(crate) fn force_unhold(&mut self) -> Result<()> {
        self.issue_hold(false, true)
    }

    fn issue_hold(&mut self, hold: bool, forced: bool) -> Result<()> {
        let Some(call) = &self.call else {
            return Err(CallError::Disconnected(
                "Channel is not connected".to_string(),
            ));
        };

        match self.hold.check(hold, self.backend_state, forced)? {
            HoldCheck::Satisfied => Ok(()),
            HoldCheck::Issue => {
                let request = self.ctx.service.request_hold(call.handle(), hold);
                self.requests.enqueue(request);
                if let Some(change) = self.hold.begin(hold, request) {
                    self.publish_hold(change);
                }
                Ok(())
            }
        }
    }

    /// Send DTMF digits without waiting for the result
    pub fn send_dialstring(&self, digits: &str, duration: u32, pause: u32) -> Result<()> {
        debug!(
            "{}: send_dialstring(\"{}\", {}, {})",
            self.nick, digits, duration, pause
        );

        let Some(call) = &self.call else {
            return Err(CallError::NotAvailable(
                "Channel is not connected".to_string(),
            ));
        };
        match self.ctx.service.send_dtmf(call.handle(), digits) {
            Some(_) => Ok(()),
            None => Err(CallError::InvalidArgument("Bad dial string".to_string())),
        }
    }

    /// Release requested by the conference this session belongs to
    pub fn release_from_conference(&mut self, message: &str, reason: ReleaseReason) -> Result<()> {
        if self.release.message.is_some() {
            return Err(CallError::NotAvailable("already releasing".to_string()));
        }
        let Some(call) = &self.call else {
            return Err(CallError::NotAvailable("no call instance".to_string()));
        };

        self.release.message = Some(message.to_string());
        self.release.actor = Some(self.ctx.self_handle);
        self.release.reason = reason;
        self.ctx.service.release(call.handle());
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Conference membership hooks

    pub(crate) fn joined(&mut self, conference: ConferenceId) {
        debug_assert!(self.conference.is_none());
        self.conference = Some(conference);
        debug!("{}: joined conference {}", self.nick, conference);
        self.ctx.events.publish(CallEvent::JoinedConference {
            session: self.id,
            conference,
        });
    }

    pub(crate) fn left(&mut self) {
        match self.conference.take() {
            Some(conference) => {
                debug!("{}: leaving conference", self.nick);
                self.ctx.events.publish(CallEvent::LeftConference {
                    session: self.id,
                    conference,
                });
            }
            None => debug!("{}: got left but not in conference", self.nick),
        }
    }

    // ----------------------------------------------------------------------
    // Backend notifications

    pub fn handle_notification(
        &mut self,
        conferences: &mut ConferenceBook,
        notification: BackendNotification,
    ) {
        debug!("{}: backend {}", self.nick, notification.name());

        match notification {
            BackendNotification::StateChanged { state, cause } => {
                self.update_state(conferences, state, cause)
            }
            BackendNotification::RemoteHold(held) => self.set_peer_flag(MemberFlags::HELD, held),
            BackendNotification::Forwarded => debug!("{}: call forwarded", self.nick),
            BackendNotification::Emergency(service) => self.on_emergency(service),
            BackendNotification::Multiparty(multiparty) => self.on_multiparty(conferences, multiparty),
            BackendNotification::Waiting => debug!("{}: call is waiting", self.nick),
            BackendNotification::CreateReply { request, result } => {
                self.on_create_reply(conferences, request, result)
            }
            BackendNotification::AnswerReply { result, .. } => match result {
                Ok(()) => debug!("{}: answer ok", self.nick),
                Err(e) => debug!("{}: answer failed: {}", self.nick, e),
            },
            BackendNotification::HoldReply { request, result } => self.on_hold_reply(request, result),
            BackendNotification::SplitReply { request, .. } => {
                debug!("{}: split reply {} without a caller", self.nick, request)
            }
            BackendNotification::DtmfReply { result, .. } => {
                if let Err(e) = result {
                    warn!("{}: DTMF failed: {}", self.nick, e);
                }
            }
        }
    }

    fn update_state(&mut self, conferences: &mut ConferenceBook, state: BackendCallState, cause: CallCause) {
        debug!("{}: backend state {}", self.nick, state.name());
        self.backend_state = state;

        match state {
            BackendCallState::Dialing
            | BackendCallState::Incoming
            | BackendCallState::Waiting
            | BackendCallState::Active => self.stop_tone(),
            BackendCallState::Alerting => {
                let volume = self.ctx.settings.ringback_volume;
                self.play_tone(Some(ToneEvent::Ringing), volume, Duration::ZERO);
            }
            BackendCallState::Disconnected => self.play_error_tone(cause),
            BackendCallState::Invalid => self.stop_stale_tone(),
            BackendCallState::Held => {}
        }

        match state {
            BackendCallState::Dialing => self.set_origin(Origin::Originating),
            BackendCallState::Incoming | BackendCallState::Waiting => {
                self.set_origin(Origin::Terminating)
            }
            BackendCallState::Alerting => self.on_alerting(),
            BackendCallState::Active => {
                if let Some(change) = self.hold.confirm(false) {
                    self.publish_hold(change);
                }
                self.on_active();
            }
            BackendCallState::Held => {
                if let Some(change) = self.hold.confirm(true) {
                    self.publish_hold(change);
                }
            }
            BackendCallState::Disconnected => {
                self.on_release(conferences, cause);
                self.drop_call(conferences);
            }
            BackendCallState::Invalid => self.drop_call(conferences),
        }
    }

    fn on_alerting(&mut self) {
        self.set_peer_flag(MemberFlags::RINGING, true);
        if self.requested && self.state == CallState::Initialising {
            self.set_state(
                CallState::Initialised,
                StateReason::new(self.peer, ChangeReason::ProgressMade, "Remote party alerted"),
            );
        }
    }

    fn on_active(&mut self) {
        if let Some(digits) = self.dial2nd.take() {
            // 'p' separated digits go out once the called party answers
            if let Err(e) = self.send_dialstring(&digits, 0, 0) {
                debug!("{}: ignoring dialstring \"{}\": {}", self.nick, digits, e.message());
            }
        }

        let actor = if self.requested {
            self.peer
        } else {
            Some(self.ctx.self_handle)
        };
        self.set_state(
            CallState::Active,
            StateReason::new(actor, ChangeReason::UserRequested, "call state change to active"),
        );
    }

    fn on_release(&mut self, conferences: &mut ConferenceBook, cause: CallCause) {
        let error = BackendError::Cause(cause);

        let (actor, reason, message, details) = match self.release.actor {
            Some(actor) => (
                Some(actor),
                self.release.reason,
                self.release.message.clone().unwrap_or_else(|| cause.message()),
                false,
            ),
            None => {
                let reason = cause.release_reason();
                let details = cause.is_known()
                    && !matches!(
                        reason,
                        ReleaseReason::Busy | ReleaseReason::None | ReleaseReason::UserRequested
                    );
                (self.peer, reason, cause.message(), details)
            }
        };

        let detail = format!(
            "mo-release: reason={} cause={}.{} ({:?}.{})",
            reason.name(),
            error.domain_prefix(),
            error.name(),
            cause.cause_type,
            cause.cause
        );
        debug!("{}: {} message=\"{}\"", self.nick, detail, message);

        self.released(
            conferences,
            actor,
            reason,
            &message,
            if details { Some(&error) } else { None },
            &detail,
        );
    }

    fn released(
        &mut self,
        conferences: &mut ConferenceBook,
        actor: Option<Handle>,
        reason: ReleaseReason,
        message: &str,
        error: Option<&BackendError>,
        detail: &str,
    ) {
        if self.released {
            return;
        }
        self.released = true;
        self.latch_release(message, actor, reason);

        if self.conference.is_some() {
            membership::remove_from_conference(self, conferences, message, actor, reason);
        }

        if self.state != CallState::Ended {
            self.set_state(
                CallState::Ended,
                StateReason {
                    actor,
                    reason: if error.is_some() {
                        ChangeReason::InternalError
                    } else {
                        ChangeReason::ProgressMade
                    },
                    release: reason,
                    dbus_reason: error.map(|e| e.fqn()).unwrap_or_default(),
                    message: detail.to_string(),
                },
            );
        }
    }

    /// Record who released the call and why, keeping the first record
    fn latch_release(&mut self, message: &str, actor: Option<Handle>, reason: ReleaseReason) {
        if self.release.message.is_none() {
            self.release = ReleaseInfo {
                message: Some(message.to_string()),
                actor,
                reason,
            };
        }
    }

    fn on_create_reply(
        &mut self,
        conferences: &mut ConferenceBook,
        request: RequestId,
        result: std::result::Result<CallHandle, BackendError>,
    ) {
        match self.pending_create {
            Some(pending) if pending.id() == request => self.pending_create = None,
            _ => {
                warn!("{}: unexpected create reply {}", self.nick, request);
                if let Ok(handle) = &result {
                    self.ctx.service.release(handle);
                }
                return;
            }
        }

        match result {
            Ok(handle) => {
                debug_assert!(self.call.is_none());
                self.call = Some(BackendCall::attach(self.ctx.service.as_ref(), handle, self.id));
                if self.release.message.is_none() {
                    self.update_state(conferences, BackendCallState::Dialing, CallCause::none());
                } else if let Some(call) = &self.call {
                    self.ctx.service.release(call.handle());
                }
            }
            Err(error) => {
                let duration = self.ctx.settings.dial_error_duration;
                self.play_tone(error.error_tone(), 0, duration);

                let reason = error.release_reason();
                warn!(
                    "{}: Call.Dial: message=\"{}\" reason={} cause={}.{}",
                    self.nick,
                    error.message(),
                    reason.name(),
                    error.domain_prefix(),
                    error.name()
                );
                let detail = format!(
                    "Dial() failed: reason={} cause={}.{}",
                    reason.name(),
                    error.domain_prefix(),
                    error.name()
                );
                let peer = self.peer;
                self.released(conferences, peer, reason, &error.message(), Some(&error), &detail);
            }
        }
    }

    fn on_hold_reply(&mut self, request: RequestId, result: std::result::Result<(), BackendError>) {
        self.requests.remove(request);
        if let Err(e) = &result {
            debug!("{}: hold request failed: {}", self.nick, e);
        }
        for change in self.hold.complete(request, &result) {
            self.publish_hold(change);
        }
    }

    fn on_multiparty(&mut self, conferences: &mut ConferenceBook, multiparty: bool) {
        if !multiparty && self.conference.is_some() {
            membership::remove_from_conference(
                self,
                conferences,
                "Conference call split",
                None,
                ReleaseReason::Separated,
            );
        }
    }

    fn on_emergency(&mut self, service: String) {
        debug!("{}: emergency service {}", self.nick, service);
        if self.emergency_service.as_deref() == Some(service.as_str()) {
            return;
        }
        self.emergency_service = Some(service.clone());
        self.ctx.events.publish(CallEvent::ServicePointChanged {
            session: self.id,
            service,
        });
    }

    /// Backend call leg went away
    fn drop_call(&mut self, conferences: &mut ConferenceBook) {
        let Some(call) = self.call.take() else {
            return;
        };
        call.detach(self.ctx.service.as_ref());

        if self.tone.is_none() {
            self.close(conferences);
        }
    }

    // ----------------------------------------------------------------------
    // Tones

    fn play_tone(&mut self, event: Option<ToneEvent>, volume: i32, duration: Duration) {
        if self.shutting_down || !self.ctx.settings.enabled {
            return;
        }

        match event {
            Some(event) if self.tone.is_some() || !self.ctx.tones.is_any_playing() => {
                if let Some(old) = self.tone.take() {
                    self.ctx.tones.stop(old);
                }
                self.tone = Some(self.ctx.tones.start(self.id, event, volume, duration));
            }
            None => self.stop_tone(),
            _ => {}
        }
    }

    fn play_error_tone(&mut self, cause: CallCause) {
        if self.call.is_none() {
            return;
        }

        let settings = &self.ctx.settings;
        let (event, volume, duration) = match self.hold.state() {
            HoldState::Unheld | HoldState::PendingUnheld => {
                (cause.event_tone(), 0, settings.error_duration)
            }
            // Damped tone when a held call drops
            _ => (
                Some(ToneEvent::Dropped),
                settings.dropped_volume,
                settings.dropped_duration,
            ),
        };
        self.play_tone(event, volume, duration);
    }

    fn stop_tone(&mut self) {
        if let Some(token) = self.tone.take() {
            self.ctx.tones.stop(token);
        }
    }

    fn stop_stale_tone(&mut self) {
        let Some(token) = self.tone else {
            return;
        };
        let progress = self
            .ctx
            .tones
            .event(token)
            .map_or(false, |e| e.is_progress_tone());
        let stale = self
            .ctx
            .tones
            .elapsed(token)
            .map_or(false, |elapsed| elapsed > self.ctx.settings.stale_threshold);

        if progress && stale {
            self.stop_tone();
        }
    }

    /// A tone owned by this session finished on its own
    pub fn on_tone_stopped(&mut self, conferences: &mut ConferenceBook, token: ToneToken) {
        if self.tone != Some(token) {
            return;
        }
        self.tone = None;

        if self.call.is_none() {
            debug!("{}: tone ended, closing", self.nick);
            self.close(conferences);
        }
    }
}
