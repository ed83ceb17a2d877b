//! Conference membership integration tests

use callgate::domain::call::addressing::HandleRegistry;
use callgate::domain::call::cause::{BackendError, CallCause, CauseType, NORMAL_CALL_CLEARING};
use callgate::domain::call::event::{CallEvent, EventBus, Notification};
use callgate::domain::call::session::SessionContext;
use callgate::domain::call::tone::ToneSettings;
use callgate::domain::call::value_object::{
    AnonymityModes, BackendCallState, ChangeReason, HoldState, ReleaseReason,
};
use callgate::domain::call::BackendNotification;
use callgate::domain::shared::value_objects::{CallHandle, ConferenceId, SessionId};
use callgate::domain::switchboard::{SplitOutcome, Switchboard};
use callgate::infrastructure::{HandleRepository, ModemRequest, SimulatedModem, ToneGenerator};
use callgate::CallError;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;

struct Gateway {
    modem: Arc<SimulatedModem>,
    board: Switchboard,
    rx: Receiver<Notification>,
}

fn gateway() -> Gateway {
    let modem = Arc::new(SimulatedModem::new());
    let handles = Arc::new(HandleRepository::new());
    let events = EventBus::new(512);
    let rx = events.subscribe();
    let ctx = SessionContext {
        service: modem.clone(),
        tones: Arc::new(ToneGenerator::new()),
        resolver: handles.clone(),
        self_handle: handles.ensure("self"),
        handles,
        settings: ToneSettings {
            enabled: false,
            ..ToneSettings::default()
        },
        events,
    };
    Gateway {
        modem,
        board: Switchboard::new(ctx, AnonymityModes::default()),
        rx,
    }
}

impl Gateway {
    fn drain(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            events.push(n.event);
        }
        events
    }

    /// Outgoing call answered by the remote party
    fn connect(&mut self, target: &str) -> (SessionId, CallHandle) {
        let session = self.board.dial(target).unwrap();
        self.board.accept(session).unwrap();
        let request = self
            .modem
            .last_pending(|r| matches!(r, ModemRequest::Dial { owner, .. } if *owner == session))
            .unwrap();
        let event = self.modem.complete_dial(request).unwrap();
        self.board.handle_backend(event);

        let call = self.board.session(session).unwrap().call_handle().cloned().unwrap();
        self.network(&call, BackendCallState::Active, CallCause::none());
        (session, call)
    }

    fn network(&mut self, call: &CallHandle, state: BackendCallState, cause: CallCause) {
        if let Some(event) = self.modem.set_state(call, state, cause) {
            self.board.handle_backend(event);
        }
    }

    fn hold(&mut self, session: SessionId, call: &CallHandle) {
        self.board.request_hold(session, true).unwrap();
        let request = self
            .modem
            .last_pending(|r| matches!(r, ModemRequest::Hold { .. }))
            .unwrap();
        let event = self.modem.reply(request, Ok(())).unwrap();
        self.board.handle_backend(event);
        self.network(call, BackendCallState::Held, CallCause::none());
    }

    fn conference_of(&self, session: SessionId) -> Option<ConferenceId> {
        self.board.session(session).and_then(|s| s.conference())
    }

    fn members(&self, conference: ConferenceId) -> Vec<SessionId> {
        self.board
            .conference(conference)
            .map(|c| c.members().to_vec())
            .unwrap_or_default()
    }
}

#[test]
fn test_merge_two_active_calls() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    gw.drain();

    let conference = gw.board.merge(&[a, b]).unwrap();
    assert_eq!(gw.members(conference), vec![a, b]);
    assert_eq!(gw.conference_of(a), Some(conference));
    assert_eq!(gw.conference_of(b), Some(conference));
    assert_eq!(gw.board.conference(conference).unwrap().registry().len(), 2);

    let added = gw
        .drain()
        .into_iter()
        .filter(|e| matches!(e, CallEvent::ChannelAdded { .. }))
        .count();
    assert_eq!(added, 2);
}

#[test]
fn test_merge_rejects_unconnected_member() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let b = gw.board.dial("+358402222222").unwrap();

    let err = gw.board.merge(&[a, b]).unwrap_err();
    assert_eq!(
        err,
        CallError::InvalidArgument("Member channel has no ongoing call".to_string())
    );
    assert!(gw.board.conferences().is_empty());
    assert_eq!(gw.conference_of(a), None);

    let err = gw.board.merge(&[a]).unwrap_err();
    assert!(matches!(err, CallError::InvalidArgument(_)));
}

#[test]
fn test_merge_counts_each_session_once() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");

    let err = gw.board.merge(&[a, a]).unwrap_err();
    assert_eq!(
        err,
        CallError::InvalidArgument("Conference needs at least two members".to_string())
    );
    assert!(gw.board.conferences().is_empty());
    assert_eq!(gw.conference_of(a), None);

    let (b, _) = gw.connect("+358402222222");
    let conference = gw.board.merge(&[a, b, a]).unwrap();
    assert_eq!(gw.members(conference), vec![a, b]);
    assert_eq!(gw.board.conference(conference).unwrap().registry().len(), 2);
}

#[test]
fn test_join_rejects_session_without_peer_or_call() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let conference = gw.board.merge(&[a, b]).unwrap();

    let (call, _) = gw.modem.announce_incoming("", BackendCallState::Active);
    let withheld = gw.board.incoming(call, "", BackendCallState::Active);
    let err = gw.board.join(withheld, conference).unwrap_err();
    assert_eq!(
        err,
        CallError::InvalidArgument("Member channel has no target".to_string())
    );
    assert_eq!(gw.conference_of(withheld), None);

    let unplaced = gw.board.dial("+358403333333").unwrap();
    let err = gw.board.join(unplaced, conference).unwrap_err();
    assert_eq!(
        err,
        CallError::InvalidArgument("Member channel has no ongoing call".to_string())
    );
    assert_eq!(gw.members(conference), vec![a, b]);
    assert_eq!(gw.board.conference(conference).unwrap().registry().len(), 2);
}

#[test]
fn test_merge_rejects_ringing_member() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let (b, call) = gw.connect("+358402222222");
    gw.network(&call, BackendCallState::Alerting, CallCause::none());

    let err = gw.board.merge(&[a, b]).unwrap_err();
    assert_eq!(
        err,
        CallError::NotAvailable("Member channel in state Alerting".to_string())
    );
}

#[test]
fn test_split_of_two_members_unholds_both() {
    let mut gw = gateway();
    let (a, call_a) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    gw.hold(a, &call_a);
    assert_eq!(gw.board.get_hold_state(a).unwrap().0, HoldState::Held);

    let conference = gw.board.merge(&[a, b]).unwrap();
    assert_eq!(gw.board.split(b).unwrap(), SplitOutcome::Completed);

    // Nobody was removed and no split went to the modem
    assert_eq!(gw.members(conference), vec![a, b]);
    assert!(gw
        .modem
        .requests()
        .iter()
        .all(|r| !matches!(r, ModemRequest::Split(_))));

    // The held call was asked to resume regardless of its state
    assert_eq!(gw.board.get_hold_state(a).unwrap().0, HoldState::PendingUnheld);
    let request = gw
        .modem
        .last_pending(|r| matches!(r, ModemRequest::Hold { hold: false, .. }))
        .unwrap();
    let event = gw.modem.reply(request, Ok(())).unwrap();
    gw.board.handle_backend(event);
    gw.network(&call_a, BackendCallState::Active, CallCause::none());

    assert_eq!(gw.board.get_hold_state(a).unwrap().0, HoldState::Unheld);
    assert_eq!(gw.board.get_hold_state(b).unwrap().0, HoldState::Unheld);
}

#[test]
fn test_split_of_larger_conference_waits_for_modem() {
    let mut gw = gateway();
    let (a, call_a) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let (c, _) = gw.connect("+358403333333");
    gw.board.merge(&[a, b, c]).unwrap();

    let SplitOutcome::Pending(request) = gw.board.split(a).unwrap() else {
        panic!("expected a pending split");
    };
    assert!(gw
        .modem
        .requests()
        .contains(&ModemRequest::Split(call_a.clone())));

    let event = gw.modem.reply(request, Ok(())).unwrap();
    let completion = gw.board.handle_backend(event).unwrap();
    assert_eq!(completion.session, a);
    assert_eq!(completion.request, request);
    assert_eq!(completion.result, Ok(()));
}

#[test]
fn test_failed_split_reports_not_available() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let (c, _) = gw.connect("+358403333333");
    gw.board.merge(&[a, b, c]).unwrap();

    let SplitOutcome::Pending(request) = gw.board.split(c).unwrap() else {
        panic!("expected a pending split");
    };
    let event = gw
        .modem
        .reply(request, Err(BackendError::service("Failed", "Operation failed")))
        .unwrap();
    let completion = gw.board.handle_backend(event).unwrap();
    assert_eq!(
        completion.result,
        Err(CallError::NotAvailable("Cannot LeaveConference".to_string()))
    );
}

#[test]
fn test_multiparty_off_leaves_conference() {
    let mut gw = gateway();
    let (a, call_a) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let (c, _) = gw.connect("+358403333333");
    let conference = gw.board.merge(&[a, b, c]).unwrap();
    gw.drain();

    let event = gw
        .modem
        .notify(&call_a, BackendNotification::Multiparty(false))
        .unwrap();
    gw.board.handle_backend(event);

    assert_eq!(gw.conference_of(a), None);
    assert_eq!(gw.members(conference), vec![b, c]);

    let removed: Vec<_> = gw
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            CallEvent::ChannelRemoved {
                session,
                message,
                actor,
                reason,
                ..
            } => Some((session, message, actor, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(
        removed,
        vec![(a, "Conference call split".to_string(), None, ReleaseReason::Separated)]
    );
}

#[test]
fn test_join_other_conference_leaves_first() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let (c, _) = gw.connect("+358403333333");
    let (d, _) = gw.connect("+358404444444");
    let first = gw.board.merge(&[a, b]).unwrap();
    let second = gw.board.merge(&[c, d]).unwrap();
    gw.drain();

    gw.board.join(a, second).unwrap();
    assert_eq!(gw.conference_of(a), Some(second));
    assert_eq!(gw.members(first), vec![b]);
    assert_eq!(gw.members(second), vec![c, d, a]);

    let events = gw.drain();
    let position = |pred: &dyn Fn(&CallEvent) -> bool| events.iter().position(|e| pred(e)).unwrap();

    let removed = position(&|e| {
        matches!(e, CallEvent::ChannelRemoved { conference, session, reason: ReleaseReason::Invited, .. }
            if *conference == first && *session == a)
    });
    let left = position(&|e| {
        matches!(e, CallEvent::LeftConference { session, conference } if *session == a && *conference == first)
    });
    let added = position(&|e| {
        matches!(e, CallEvent::ChannelAdded { conference, session } if *conference == second && *session == a)
    });
    let joined = position(&|e| {
        matches!(e, CallEvent::JoinedConference { session, conference } if *session == a && *conference == second)
    });
    assert!(removed < added);
    assert!(left < joined);
    assert!(left < added);

    // Joining the same conference again changes nothing
    gw.board.join(a, second).unwrap();
    assert!(gw.drain().is_empty());
}

#[test]
fn test_member_hangup_leaves_conference() {
    let mut gw = gateway();
    let (a, call_a) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let (c, _) = gw.connect("+358403333333");
    let conference = gw.board.merge(&[a, b, c]).unwrap();

    gw.board
        .hangup(a, ChangeReason::UserRequested, "", "Bye")
        .unwrap();
    assert_eq!(gw.conference_of(a), None);
    assert_eq!(gw.members(conference), vec![b, c]);

    gw.network(
        &call_a,
        BackendCallState::Disconnected,
        CallCause::new(CauseType::Local, NORMAL_CALL_CLEARING),
    );
    assert!(gw.board.session(a).is_none());
}

#[test]
fn test_release_from_conference_reports_latched_reason() {
    let mut gw = gateway();
    let (a, call_a) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let (c, _) = gw.connect("+358403333333");
    let conference = gw.board.merge(&[a, b, c]).unwrap();
    gw.drain();

    gw.board
        .release_from_conference(a, "Kicked", ReleaseReason::PermissionDenied)
        .unwrap();
    assert!(gw.modem.requests().contains(&ModemRequest::Release(call_a.clone())));
    let err = gw
        .board
        .release_from_conference(a, "Again", ReleaseReason::None)
        .unwrap_err();
    assert_eq!(err, CallError::NotAvailable("already releasing".to_string()));

    gw.network(
        &call_a,
        BackendCallState::Disconnected,
        CallCause::new(CauseType::Remote, NORMAL_CALL_CLEARING),
    );

    let removed = gw.drain().into_iter().find_map(|e| match e {
        CallEvent::ChannelRemoved {
            conference: id,
            session,
            message,
            reason,
            ..
        } if session == a => Some((id, message, reason)),
        _ => None,
    });
    assert_eq!(
        removed,
        Some((conference, "Kicked".to_string(), ReleaseReason::PermissionDenied))
    );
    assert_eq!(gw.members(conference), vec![b, c]);
}

#[test]
fn test_empty_conference_is_dropped() {
    let mut gw = gateway();
    let (a, _) = gw.connect("+358401111111");
    let (b, _) = gw.connect("+358402222222");
    let conference = gw.board.merge(&[a, b]).unwrap();

    gw.board.leave(a).unwrap();
    assert!(gw.board.conference(conference).is_some());
    gw.board.leave(b).unwrap();
    assert!(gw.board.conference(conference).is_none());

    // Leaving when not in a conference is harmless
    gw.board.leave(b).unwrap();
}
