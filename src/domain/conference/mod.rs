//! Conference bounded context - groups of call sessions merged into one
//! multiparty call

pub mod membership;

use crate::domain::call::event::{CallEvent, Conversation, EventBus};
use crate::domain::call::member::{MemberFlags, MemberRegistry};
use crate::domain::call::value_object::ReleaseReason;
use crate::domain::shared::value_objects::{ConferenceId, Handle, SessionId};
use std::collections::HashMap;
use tracing::info;

/// A conference and the sessions currently joined to it
#[derive(Debug)]
pub struct Conference {
    id: ConferenceId,
    nick: String,
    members: Vec<SessionId>,
    /// Member handles of the joined sessions
    registry: MemberRegistry,
    events: EventBus,
}

impl Conference {
    fn new(serial: u32, events: EventBus) -> Self {
        let id = ConferenceId::new();
        Self {
            id,
            nick: format!("ConferenceChannel{}", serial),
            members: Vec::new(),
            registry: MemberRegistry::new(Conversation::Conference(id), events.clone()),
            events,
        }
    }

    pub fn id(&self) -> ConferenceId {
        self.id
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn members(&self) -> &[SessionId] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.members.contains(&session)
    }

    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
    }

    /// Only called through [`membership::join`]
    fn add_member(&mut self, session: SessionId, member: Option<Handle>) {
        if self.contains(session) {
            return;
        }
        self.members.push(session);
        if let Some(member) = member {
            self.registry.ensure(member).set_flag(MemberFlags::JOINED, true);
        }

        info!("{}: added channel {}", self.nick, session);
        self.events.publish(CallEvent::ChannelAdded {
            conference: self.id,
            session,
        });
    }

    /// Only called through [`membership::remove_from_conference`]
    fn remove_member(
        &mut self,
        session: SessionId,
        member: Option<Handle>,
        message: &str,
        actor: Option<Handle>,
        reason: ReleaseReason,
    ) -> bool {
        let Some(index) = self.members.iter().position(|s| *s == session) else {
            return false;
        };
        self.members.remove(index);

        info!(
            "{}: removed channel {} ({}): {}",
            self.nick,
            session,
            reason.name(),
            message
        );
        self.events.publish(CallEvent::ChannelRemoved {
            conference: self.id,
            session,
            message: message.to_string(),
            actor,
            reason,
        });

        if let Some(member) = member {
            if self.registry.lookup(member).is_some() {
                self.registry.remove(member);
            }
        }
        true
    }
}

/// Every conference of the gateway
#[derive(Debug)]
pub struct ConferenceBook {
    events: EventBus,
    conferences: HashMap<ConferenceId, Conference>,
    next_serial: u32,
}

impl ConferenceBook {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            conferences: HashMap::new(),
            next_serial: 0,
        }
    }

    /// Create an empty conference
    pub fn create(&mut self) -> ConferenceId {
        let conference = Conference::new(self.next_serial, self.events.clone());
        self.next_serial += 1;

        let id = conference.id();
        info!("Created conference: {}", conference.nick());
        self.conferences.insert(id, conference);
        id
    }

    pub fn get(&self, id: ConferenceId) -> Option<&Conference> {
        self.conferences.get(&id)
    }

    pub fn contains(&self, id: ConferenceId) -> bool {
        self.conferences.contains_key(&id)
    }

    /// Drop a conference nobody belongs to any more
    pub fn remove_if_empty(&mut self, id: ConferenceId) -> bool {
        if self.get(id).map_or(false, |c| c.member_count() == 0) {
            self.conferences.remove(&id);
            info!("Cleaned up conference: {}", id);
            return true;
        }
        false
    }

    pub fn ids(&self) -> Vec<ConferenceId> {
        self.conferences.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.conferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conferences.is_empty()
    }

    fn get_mut(&mut self, id: ConferenceId) -> Option<&mut Conference> {
        self.conferences.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_flags_follow_channels() {
        let events = EventBus::new(16);
        let mut book = ConferenceBook::new(events.clone());
        let id = book.create();
        let session = SessionId::new();
        let member = Handle::new(40).unwrap();

        let conference = book.get_mut(id).unwrap();
        conference.add_member(session, Some(member));
        conference.add_member(session, Some(member));
        assert_eq!(conference.member_count(), 1);
        assert!(conference
            .registry()
            .lookup(member)
            .unwrap()
            .flags()
            .contains(MemberFlags::JOINED));

        assert!(conference.remove_member(session, Some(member), "bye", None, ReleaseReason::None));
        assert!(!conference.remove_member(session, Some(member), "bye", None, ReleaseReason::None));
        assert!(conference.registry().is_empty());

        assert!(book.remove_if_empty(id));
        assert!(book.is_empty());
    }
}
