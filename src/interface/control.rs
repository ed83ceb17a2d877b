//! Call control loop
//!
//! The switchboard is owned by one task. Control requests and backend
//! events share a single queue, so they are applied strictly in the order
//! they were submitted. Each request carries a oneshot for its answer.

use crate::config::CallConfig;
use crate::domain::call::event::{EventBus, Notification};
use crate::domain::call::value_object::{
    AnonymityModes, CallState, ChangeReason, HoldReason, HoldState, ReleaseReason,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::value_objects::{CallHandle, ConferenceId, Handle, RequestId, SessionId};
use crate::domain::switchboard::{BackendEvent, SplitOutcome, Switchboard};
use crate::infrastructure::metrics;
use crate::infrastructure::tones::ToneGenerator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often finished tones are collected
const TONE_TICK: Duration = Duration::from_millis(50);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("Control loop stopped")]
    Stopped,
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Read-only view of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub id: SessionId,
    pub nick: String,
    pub requested: bool,
    pub peer: Option<Handle>,
    pub state: CallState,
    pub hold: HoldState,
    pub conference: Option<ConferenceId>,
    /// Backend call leg, `None` until the call is placed or once it dropped
    pub call: Option<CallHandle>,
}

type Reply<T> = oneshot::Sender<Result<T, CallError>>;

enum Command {
    Dial {
        target: String,
        reply: Reply<SessionId>,
    },
    CreateOutgoing {
        peer: Handle,
        anonymity: Option<AnonymityModes>,
        emergency_service: Option<String>,
        reply: Reply<SessionId>,
    },
    Accept {
        session: SessionId,
        reply: Reply<()>,
    },
    Hangup {
        session: SessionId,
        reason: ChangeReason,
        detail: String,
        message: String,
        reply: Reply<()>,
    },
    Close {
        session: SessionId,
        reply: Reply<()>,
    },
    RequestHold {
        session: SessionId,
        hold: bool,
        reply: Reply<()>,
    },
    GetHoldState {
        session: SessionId,
        reply: Reply<(HoldState, HoldReason)>,
    },
    SendDialstring {
        session: SessionId,
        digits: String,
        duration: u32,
        pause: u32,
        reply: Reply<()>,
    },
    ReleaseFromConference {
        session: SessionId,
        message: String,
        reason: ReleaseReason,
        reply: Reply<()>,
    },
    Merge {
        members: Vec<SessionId>,
        reply: Reply<ConferenceId>,
    },
    Join {
        session: SessionId,
        conference: ConferenceId,
        reply: Reply<()>,
    },
    Leave {
        session: SessionId,
        reply: Reply<()>,
    },
    Split {
        session: SessionId,
        reply: Reply<()>,
    },
    View {
        session: SessionId,
        reply: oneshot::Sender<Option<SessionView>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    Backend(BackendEvent),
}

/// Cloneable handle to the control loop
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Command>,
    events: EventBus,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Dial { .. } => "dial",
            Command::CreateOutgoing { .. } => "create-outgoing",
            Command::Accept { .. } => "accept",
            Command::Hangup { .. } => "hangup",
            Command::Close { .. } => "close",
            Command::RequestHold { .. } => "request-hold",
            Command::GetHoldState { .. } => "get-hold-state",
            Command::SendDialstring { .. } => "send-dialstring",
            Command::ReleaseFromConference { .. } => "release-from-conference",
            Command::Merge { .. } => "merge",
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::Split { .. } => "split",
            Command::View { .. } => "view",
            Command::Sessions { .. } => "sessions",
            Command::Backend(_) => "backend",
        };
        f.write_str(name)
    }
}

impl ControlHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> ControlResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ControlError::Stopped)?;
        Ok(rx.await.map_err(|_| ControlError::Stopped)??)
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> ControlResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ControlError::Stopped)?;
        rx.await.map_err(|_| ControlError::Stopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Hand a backend event to the loop
    pub async fn deliver(&self, event: BackendEvent) -> ControlResult<()> {
        self.tx
            .send(Command::Backend(event))
            .await
            .map_err(|_| ControlError::Stopped)
    }

    pub async fn dial(&self, target: &str) -> ControlResult<SessionId> {
        let target = target.to_string();
        self.call(|reply| Command::Dial { target, reply }).await
    }

    pub async fn create_outgoing(
        &self,
        peer: Handle,
        anonymity: Option<AnonymityModes>,
        emergency_service: Option<String>,
    ) -> ControlResult<SessionId> {
        self.call(|reply| Command::CreateOutgoing {
            peer,
            anonymity,
            emergency_service,
            reply,
        })
        .await
    }

    pub async fn accept(&self, session: SessionId) -> ControlResult<()> {
        self.call(|reply| Command::Accept { session, reply }).await
    }

    pub async fn hangup(
        &self,
        session: SessionId,
        reason: ChangeReason,
        detail: &str,
        message: &str,
    ) -> ControlResult<()> {
        let (detail, message) = (detail.to_string(), message.to_string());
        self.call(|reply| Command::Hangup {
            session,
            reason,
            detail,
            message,
            reply,
        })
        .await
    }

    pub async fn close(&self, session: SessionId) -> ControlResult<()> {
        self.call(|reply| Command::Close { session, reply }).await
    }

    pub async fn request_hold(&self, session: SessionId, hold: bool) -> ControlResult<()> {
        self.call(|reply| Command::RequestHold { session, hold, reply }).await
    }

    pub async fn get_hold_state(&self, session: SessionId) -> ControlResult<(HoldState, HoldReason)> {
        self.call(|reply| Command::GetHoldState { session, reply }).await
    }

    pub async fn send_dialstring(
        &self,
        session: SessionId,
        digits: &str,
        duration: u32,
        pause: u32,
    ) -> ControlResult<()> {
        let digits = digits.to_string();
        self.call(|reply| Command::SendDialstring {
            session,
            digits,
            duration,
            pause,
            reply,
        })
        .await
    }

    pub async fn release_from_conference(
        &self,
        session: SessionId,
        message: &str,
        reason: ReleaseReason,
    ) -> ControlResult<()> {
        let message = message.to_string();
        self.call(|reply| Command::ReleaseFromConference {
            session,
            message,
            reason,
            reply,
        })
        .await
    }

    pub async fn merge(&self, members: &[SessionId]) -> ControlResult<ConferenceId> {
        let members = members.to_vec();
        self.call(|reply| Command::Merge { members, reply }).await
    }

    pub async fn join(&self, session: SessionId, conference: ConferenceId) -> ControlResult<()> {
        self.call(|reply| Command::Join {
            session,
            conference,
            reply,
        })
        .await
    }

    pub async fn leave(&self, session: SessionId) -> ControlResult<()> {
        self.call(|reply| Command::Leave { session, reply }).await
    }

    /// Split a session out of its conference. Resolves once the backend
    /// answered the split.
    pub async fn split(&self, session: SessionId) -> ControlResult<()> {
        self.call(|reply| Command::Split { session, reply }).await
    }

    pub async fn view(&self, session: SessionId) -> ControlResult<Option<SessionView>> {
        self.query(|reply| Command::View { session, reply }).await
    }

    pub async fn sessions(&self) -> ControlResult<Vec<SessionId>> {
        self.query(|reply| Command::Sessions { reply }).await
    }
}

struct ControlLoop {
    switchboard: Switchboard,
    rx: mpsc::Receiver<Command>,
    tones: Option<Arc<ToneGenerator>>,
    splits: HashMap<RequestId, Reply<()>>,
}

/// Start the control loop. With a tone generator, finished tones are
/// collected on a timer and handed back to their sessions.
pub fn spawn(
    switchboard: Switchboard,
    tones: Option<Arc<ToneGenerator>>,
    config: &CallConfig,
) -> (ControlHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.control_queue.max(1));
    let handle = ControlHandle {
        tx,
        events: switchboard.events().clone(),
    };
    let control = ControlLoop {
        switchboard,
        rx,
        tones,
        splits: HashMap::new(),
    };
    (handle, tokio::spawn(control.run()))
}

impl ControlLoop {
    async fn run(mut self) {
        info!("Call control loop started");
        let mut clock = tokio::time::interval(TONE_TICK);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ticking = self.tones.is_some();

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.execute(command),
                    None => break,
                },
                _ = clock.tick(), if ticking => self.collect_tones(),
            }
            metrics::update_live_sessions(self.switchboard.len());
        }

        for (request, reply) in self.splits.drain() {
            debug!("dropping split reply for {}", request);
            let _ = reply.send(Err(CallError::NotAvailable("Cannot LeaveConference".to_string())));
        }
        info!("Call control loop stopped");
    }

    fn collect_tones(&mut self) {
        let Some(tones) = self.tones.clone() else {
            return;
        };
        for event in tones.expire(Instant::now()) {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: BackendEvent) {
        if let Some(completion) = self.switchboard.handle_backend(event) {
            match self.splits.remove(&completion.request) {
                Some(reply) => {
                    let _ = reply.send(completion.result);
                }
                None => warn!("split answer {} has no waiting caller", completion.request),
            }
        }
    }

    fn execute(&mut self, command: Command) {
        debug!("control: {:?}", command);
        let sb = &mut self.switchboard;
        match command {
            Command::Dial { target, reply } => {
                let _ = reply.send(sb.dial(&target));
            }
            Command::CreateOutgoing {
                peer,
                anonymity,
                emergency_service,
                reply,
            } => {
                let _ = reply.send(Ok(sb.create_outgoing(peer, anonymity, emergency_service)));
            }
            Command::Accept { session, reply } => {
                let _ = reply.send(sb.accept(session));
            }
            Command::Hangup {
                session,
                reason,
                detail,
                message,
                reply,
            } => {
                let _ = reply.send(sb.hangup(session, reason, &detail, &message));
            }
            Command::Close { session, reply } => {
                let _ = reply.send(sb.close(session));
            }
            Command::RequestHold {
                session,
                hold,
                reply,
            } => {
                let _ = reply.send(sb.request_hold(session, hold));
            }
            Command::GetHoldState { session, reply } => {
                let _ = reply.send(sb.get_hold_state(session));
            }
            Command::SendDialstring {
                session,
                digits,
                duration,
                pause,
                reply,
            } => {
                let _ = reply.send(sb.send_dialstring(session, &digits, duration, pause));
            }
            Command::ReleaseFromConference {
                session,
                message,
                reason,
                reply,
            } => {
                let _ = reply.send(sb.release_from_conference(session, &message, reason));
            }
            Command::Merge { members, reply } => {
                let _ = reply.send(sb.merge(&members));
            }
            Command::Join {
                session,
                conference,
                reply,
            } => {
                let _ = reply.send(sb.join(session, conference));
            }
            Command::Leave { session, reply } => {
                let _ = reply.send(sb.leave(session));
            }
            Command::Split { session, reply } => match sb.split(session) {
                Ok(SplitOutcome::Completed) => {
                    let _ = reply.send(Ok(()));
                }
                Ok(SplitOutcome::Pending(request)) => {
                    self.splits.insert(request, reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::View { session, reply } => {
                let view = sb.session(session).map(|s| SessionView {
                    id: s.id(),
                    nick: s.nick().to_string(),
                    requested: s.is_requested(),
                    peer: s.peer(),
                    state: s.state(),
                    hold: s.hold_state(),
                    conference: s.conference(),
                    call: s.call_handle().cloned(),
                });
                let _ = reply.send(view);
            }
            Command::Sessions { reply } => {
                let mut ids = sb.session_ids();
                ids.sort_by_key(|id| id.as_uuid());
                let _ = reply.send(ids);
            }
            Command::Backend(event) => self.dispatch(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::addressing::HandleRegistry;
    use crate::domain::call::cause::{CallCause, CauseType, USER_BUSY};
    use crate::domain::call::session::SessionContext;
    use crate::domain::call::tone::{TonePlayer, ToneSettings};
    use crate::domain::call::value_object::BackendCallState;
    use crate::infrastructure::address::HandleRepository;
    use crate::infrastructure::modem::{ModemRequest, SimulatedModem};
    use tokio_test::assert_ok;

    struct Harness {
        modem: Arc<SimulatedModem>,
        tones: Arc<ToneGenerator>,
        handle: ControlHandle,
    }

    fn harness() -> Harness {
        let modem = Arc::new(SimulatedModem::new());
        let tones = Arc::new(ToneGenerator::new());
        let handles = Arc::new(HandleRepository::new());
        let ctx = SessionContext {
            service: modem.clone(),
            tones: tones.clone(),
            resolver: handles.clone(),
            self_handle: handles.ensure("self"),
            handles,
            settings: ToneSettings::default(),
            events: EventBus::new(64),
        };
        let switchboard = Switchboard::new(ctx, AnonymityModes::default());
        let (handle, _task) = spawn(switchboard, Some(tones.clone()), &CallConfig::default());
        Harness { modem, tones, handle }
    }

    async fn connect(h: &Harness, target: &str) -> SessionId {
        let session = h.handle.dial(target).await.unwrap();
        h.handle.accept(session).await.unwrap();

        let dial = h
            .modem
            .last_pending(|r| matches!(r, ModemRequest::Dial { owner, .. } if *owner == session))
            .unwrap();
        h.handle.deliver(h.modem.complete_dial(dial).unwrap()).await.unwrap();
        session
    }

    async fn call_of(h: &Harness, session: SessionId) -> CallHandle {
        let view = h.handle.view(session).await.unwrap().unwrap();
        view.call.unwrap()
    }

    async fn activate(h: &Harness, session: SessionId) {
        let call = call_of(h, session).await;
        assert_eq!(h.modem.owner(&call), Some(session));
        let event = h
            .modem
            .set_state(&call, BackendCallState::Active, CallCause::none())
            .unwrap();
        h.handle.deliver(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_outgoing_call_becomes_active() {
        let h = harness();
        let session = connect(&h, "+358401234567").await;
        activate(&h, session).await;

        let view = h.handle.view(session).await.unwrap().unwrap();
        assert_eq!(view.state, CallState::Active);
        assert!(view.requested);
        assert_eq!(view.nick, "CallChannel0");
    }

    #[tokio::test]
    async fn test_hold_round_trip() {
        let h = harness();
        let session = connect(&h, "+358401234567").await;
        activate(&h, session).await;

        assert_ok!(h.handle.request_hold(session, true).await);
        let (state, reason) = h.handle.get_hold_state(session).await.unwrap();
        assert_eq!(state, HoldState::PendingHold);
        assert_eq!(reason, HoldReason::Requested);

        let hold = h
            .modem
            .last_pending(|r| matches!(r, ModemRequest::Hold { .. }))
            .unwrap();
        h.handle.deliver(h.modem.reply(hold, Ok(())).unwrap()).await.unwrap();

        let (state, _) = h.handle.get_hold_state(session).await.unwrap();
        assert_eq!(state, HoldState::Held);
    }

    #[tokio::test]
    async fn test_errors_cross_the_loop() {
        let h = harness();
        let err = h.handle.accept(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, ControlError::Call(CallError::InvalidArgument(_))));

        let err = h.handle.dial("").await.unwrap_err();
        assert!(matches!(err, ControlError::Call(CallError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_split_of_two_member_conference_completes_immediately() {
        let h = harness();
        let a = connect(&h, "+358401111111").await;
        activate(&h, a).await;
        let b = connect(&h, "+358402222222").await;
        activate(&h, b).await;

        let conference = h.handle.merge(&[a, b]).await.unwrap();
        assert_eq!(h.handle.view(a).await.unwrap().unwrap().conference, Some(conference));

        h.handle.split(a).await.unwrap();
        assert_eq!(h.handle.view(a).await.unwrap().unwrap().conference, Some(conference));
        assert!(h
            .modem
            .requests()
            .iter()
            .all(|r| !matches!(r, ModemRequest::Split(_))));
    }

    #[tokio::test]
    async fn test_split_waits_for_backend_answer() {
        let h = harness();
        let mut members = Vec::new();
        for target in ["+358401111111", "+358402222222", "+358403333333"] {
            let session = connect(&h, target).await;
            activate(&h, session).await;
            members.push(session);
        }
        h.handle.merge(&members).await.unwrap();

        let split = tokio::spawn({
            let handle = h.handle.clone();
            let session = members[0];
            async move { handle.split(session).await }
        });

        let mut request = None;
        for _ in 0..100 {
            request = h.modem.last_pending(|r| matches!(r, ModemRequest::Split(_)));
            if request.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let request = request.unwrap();
        h.handle.deliver(h.modem.reply(request, Ok(())).unwrap()).await.unwrap();

        assert_eq!(split.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_finished_tone_closes_dropped_call() {
        let h = harness();
        let session = connect(&h, "+358401234567").await;
        activate(&h, session).await;

        let call = call_of(&h, session).await;
        let cause = CallCause::new(CauseType::Remote, USER_BUSY);
        let event = h
            .modem
            .set_state(&call, BackendCallState::Disconnected, cause)
            .unwrap();
        h.handle.deliver(event).await.unwrap();

        let view = h.handle.view(session).await.unwrap().unwrap();
        assert_eq!(view.state, CallState::Ended);
        assert!(h.tones.is_any_playing());

        let (token, _, _) = h.tones.playing()[0];
        h.handle.deliver(h.tones.finish(token).unwrap()).await.unwrap();
        assert!(h.handle.view(session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_loop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = ControlHandle {
            tx,
            events: EventBus::new(1),
        };
        assert_eq!(handle.sessions().await, Err(ControlError::Stopped));
    }
}
