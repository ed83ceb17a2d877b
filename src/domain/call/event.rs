//! Observer notifications emitted by sessions and conferences

use crate::domain::call::member::MemberFlags;
use crate::domain::call::value_object::{
    CallState, ChangeReason, HoldReason, HoldState, Origin, ReleaseReason, StateReason,
};
use crate::domain::shared::events::EventMetadata;
use crate::domain::shared::value_objects::{ConferenceId, Handle, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The conversation a member registry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Conversation {
    Session(SessionId),
    Conference(ConferenceId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CallEvent {
    /// A session was created, `requested` for calls placed locally
    NewChannel {
        session: SessionId,
        requested: bool,
        peer: Option<Handle>,
    },
    StateChanged {
        session: SessionId,
        state: CallState,
        reason: StateReason,
    },
    OriginResolved {
        session: SessionId,
        origin: Origin,
    },
    HoldStateChanged {
        session: SessionId,
        state: HoldState,
        reason: HoldReason,
    },
    MemberFlagsChanged {
        conversation: Conversation,
        handle: Handle,
        flags: MemberFlags,
        reason: ChangeReason,
    },
    MemberRemoved {
        conversation: Conversation,
        handle: Handle,
        reason: ChangeReason,
    },
    ServicePointChanged {
        session: SessionId,
        service: String,
    },
    JoinedConference {
        session: SessionId,
        conference: ConferenceId,
    },
    LeftConference {
        session: SessionId,
        conference: ConferenceId,
    },
    ChannelAdded {
        conference: ConferenceId,
        session: SessionId,
    },
    ChannelRemoved {
        conference: ConferenceId,
        session: SessionId,
        message: String,
        actor: Option<Handle>,
        reason: ReleaseReason,
    },
    Closed {
        session: SessionId,
    },
}

impl CallEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CallEvent::NewChannel { .. } => "call.new_channel",
            CallEvent::StateChanged { .. } => "call.state_changed",
            CallEvent::OriginResolved { .. } => "call.origin_resolved",
            CallEvent::HoldStateChanged { .. } => "call.hold_state_changed",
            CallEvent::MemberFlagsChanged { .. } => "member.flags_changed",
            CallEvent::MemberRemoved { .. } => "member.removed",
            CallEvent::ServicePointChanged { .. } => "call.service_point_changed",
            CallEvent::JoinedConference { .. } => "call.joined_conference",
            CallEvent::LeftConference { .. } => "call.left_conference",
            CallEvent::ChannelAdded { .. } => "conference.channel_added",
            CallEvent::ChannelRemoved { .. } => "conference.channel_removed",
            CallEvent::Closed { .. } => "call.closed",
        }
    }
}

/// Event with its metadata, as seen by subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub metadata: EventMetadata,
    pub event: CallEvent,
}

/// Event broadcaster shared by every session and conference
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: CallEvent) {
        let notification = Notification {
            metadata: EventMetadata::new(event.event_type()),
            event,
        };
        // Ignore send errors (no receivers)
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_tagged() {
        let session = SessionId::new();
        let json = serde_json::to_value(CallEvent::Closed { session }).unwrap();
        assert_eq!(json["type"], "Closed");
        assert_eq!(json["data"]["session"], session.as_uuid().to_string());

        let conversation = serde_json::to_value(Conversation::Session(session)).unwrap();
        assert_eq!(conversation["kind"], "session");
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let session = SessionId::new();
        bus.publish(CallEvent::Closed { session });

        for rx in [&mut first, &mut second] {
            let notification = rx.try_recv().unwrap();
            assert_eq!(notification.metadata.event_type, "call.closed");
            assert_eq!(notification.event, CallEvent::Closed { session });
        }
    }
}
