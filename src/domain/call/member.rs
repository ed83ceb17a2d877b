//! Call members and the per-conversation member registry

use crate::domain::call::event::{CallEvent, Conversation, EventBus};
use crate::domain::call::value_object::ChangeReason;
use crate::domain::shared::value_objects::Handle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Member status flags reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberFlags(u32);

impl MemberFlags {
    pub const RINGING: MemberFlags = MemberFlags(1);
    pub const HELD: MemberFlags = MemberFlags(2);
    pub const JOINED: MemberFlags = MemberFlags(4);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: MemberFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, flag: MemberFlags, set: bool) -> Self {
        if set {
            Self(self.0 | flag.0)
        } else {
            Self(self.0 & !flag.0)
        }
    }
}

/// One peer known to a session or conference
#[derive(Debug)]
pub struct CallMember {
    handle: Handle,
    flags: MemberFlags,
    /// Flag changes are re-broadcast here until shutdown
    observer: Option<(Conversation, EventBus)>,
}

impl CallMember {
    fn new(handle: Handle) -> Self {
        Self {
            handle,
            flags: MemberFlags::empty(),
            observer: None,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn flags(&self) -> MemberFlags {
        self.flags
    }

    pub fn is_shut_down(&self) -> bool {
        self.observer.is_none()
    }

    /// Set or clear one flag. Returns whether the flags changed.
    pub fn set_flag(&mut self, flag: MemberFlags, set: bool) -> bool {
        let flags = self.flags.with(flag, set);
        if flags == self.flags {
            return false;
        }
        self.flags = flags;

        if let Some((conversation, events)) = &self.observer {
            events.publish(CallEvent::MemberFlagsChanged {
                conversation: *conversation,
                handle: self.handle,
                flags,
                reason: ChangeReason::ProgressMade,
            });
        }
        true
    }

    /// Stop reporting flag changes
    pub fn shutdown(&mut self) {
        self.observer = None;
    }
}

/// Handle to member map owned by exactly one session or conference
#[derive(Debug)]
pub struct MemberRegistry {
    conversation: Conversation,
    events: EventBus,
    members: HashMap<Handle, CallMember>,
}

impl MemberRegistry {
    pub fn new(conversation: Conversation, events: EventBus) -> Self {
        Self {
            conversation,
            events,
            members: HashMap::new(),
        }
    }

    pub fn lookup(&self, handle: Handle) -> Option<&CallMember> {
        self.members.get(&handle)
    }

    /// Existing member for `handle`, or a new one reported to observers
    pub fn ensure(&mut self, handle: Handle) -> &mut CallMember {
        let conversation = self.conversation;
        let events = &self.events;
        self.members.entry(handle).or_insert_with(|| {
            let mut member = CallMember::new(handle);
            events.publish(CallEvent::MemberFlagsChanged {
                conversation,
                handle,
                flags: member.flags,
                reason: ChangeReason::ProgressMade,
            });
            member.observer = Some((conversation, events.clone()));
            debug!("member {} added to {:?}", handle, conversation);
            member
        })
    }

    /// Remove a member previously returned by [`ensure`](Self::ensure).
    ///
    /// # Panics
    ///
    /// Panics when `handle` is not registered; removing an unknown member
    /// is a caller bug.
    pub fn remove(&mut self, handle: Handle) {
        let member = self
            .members
            .get_mut(&handle)
            .unwrap_or_else(|| panic!("member {} is not registered", handle));

        member.shutdown();
        self.events.publish(CallEvent::MemberRemoved {
            conversation: self.conversation,
            handle,
            reason: ChangeReason::ProgressMade,
        });
        self.members.remove(&handle);
    }

    pub fn shutdown_all(&mut self) {
        for member in self.members.values_mut() {
            member.shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::SessionId;

    fn registry() -> (MemberRegistry, tokio::sync::broadcast::Receiver<crate::domain::call::event::Notification>) {
        let events = EventBus::new(16);
        let rx = events.subscribe();
        (MemberRegistry::new(Conversation::Session(SessionId::new()), events), rx)
    }

    #[test]
    fn test_ensure_reports_new_member_once() {
        let (mut registry, mut rx) = registry();
        let handle = Handle::new(5).unwrap();

        registry.ensure(handle);
        registry.ensure(handle);
        assert_eq!(registry.len(), 1);

        let first = rx.try_recv().unwrap();
        assert!(matches!(
            first.event,
            CallEvent::MemberFlagsChanged { flags, reason: ChangeReason::ProgressMade, .. } if flags == MemberFlags::empty()
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flag_changes_rebroadcast_until_shutdown() {
        let (mut registry, mut rx) = registry();
        let handle = Handle::new(5).unwrap();

        let member = registry.ensure(handle);
        assert!(member.set_flag(MemberFlags::RINGING, true));
        assert!(!member.set_flag(MemberFlags::RINGING, true));
        let _ = rx.try_recv(); // creation
        let changed = rx.try_recv().unwrap();
        assert!(matches!(
            changed.event,
            CallEvent::MemberFlagsChanged { flags, .. } if flags.contains(MemberFlags::RINGING)
        ));

        registry.shutdown_all();
        let member = registry.ensure(handle);
        assert!(member.is_shut_down());
        assert!(member.set_flag(MemberFlags::HELD, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_reports_and_deletes() {
        let (mut registry, mut rx) = registry();
        let handle = Handle::new(9).unwrap();
        registry.ensure(handle);
        registry.remove(handle);

        assert!(registry.lookup(handle).is_none());
        let _ = rx.try_recv();
        let removed = rx.try_recv().unwrap();
        assert!(matches!(removed.event, CallEvent::MemberRemoved { reason: ChangeReason::ProgressMade, .. }));
    }

    #[test]
    #[should_panic(expected = "is not registered")]
    fn test_remove_unknown_member_panics() {
        let (mut registry, _rx) = registry();
        registry.remove(Handle::new(3).unwrap());
    }
}
