//! Conference membership protocol
//!
//! Joining and leaving touch both the session and the conference. Each
//! function here completes both sides before returning, so a session's
//! conference reference and the conference member list never disagree.

use crate::domain::call::session::CallSession;
use crate::domain::call::value_object::ReleaseReason;
use crate::domain::conference::ConferenceBook;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallHandle, ConferenceId, Handle};
use tracing::{debug, warn};

/// Check that `session` may be merged into a conference
pub fn can_join(session: &CallSession) -> Result<()> {
    require_peer(session)?;
    if session.conference().is_some() {
        return Err(CallError::InvalidArgument(
            "Member channel is already in conference".to_string(),
        ));
    }
    let call = require_call(session)?;

    let service = session.service();
    if !service.can_join(call) {
        return Err(CallError::NotAvailable(format!(
            "Member channel in state {}",
            service.call_state(call).name()
        )));
    }
    Ok(())
}

fn require_peer(session: &CallSession) -> Result<()> {
    if session.peer().is_none() {
        return Err(CallError::InvalidArgument(
            "Member channel has no target".to_string(),
        ));
    }
    Ok(())
}

fn require_call(session: &CallSession) -> Result<&CallHandle> {
    session.call_handle().ok_or_else(|| {
        CallError::InvalidArgument("Member channel has no ongoing call".to_string())
    })
}

/// Join `conference`, leaving the current one first
pub fn join(
    session: &mut CallSession,
    conferences: &mut ConferenceBook,
    conference: ConferenceId,
) -> Result<()> {
    if !conferences.contains(conference) {
        return Err(CallError::InvalidArgument(format!(
            "Unknown conference {}",
            conference
        )));
    }
    require_peer(session)?;
    require_call(session)?;

    match session.conference() {
        Some(current) if current == conference => return Ok(()),
        Some(_) => {
            debug!("{}: switching to a new conference", session.nick());
            let actor = Some(session.self_handle());
            remove_from_conference(
                session,
                conferences,
                "Joined new conference",
                actor,
                ReleaseReason::Invited,
            );
        }
        None => {}
    }

    let member = session.member_handle();
    if let Some(target) = conferences.get_mut(conference) {
        target.add_member(session.id(), member);
    }
    session.joined(conference);
    Ok(())
}

/// Leave the current conference. Harmless when not in one.
pub fn leave(session: &mut CallSession, conferences: &mut ConferenceBook) {
    if session.conference().is_none() {
        session.left();
        return;
    }
    remove_from_conference(session, conferences, "", None, ReleaseReason::None);
}

/// Remove `session` from its conference, reporting who removed it and why
pub fn remove_from_conference(
    session: &mut CallSession,
    conferences: &mut ConferenceBook,
    message: &str,
    actor: Option<Handle>,
    reason: ReleaseReason,
) {
    let Some(id) = session.conference() else {
        return;
    };

    let member = session.member_handle();
    match conferences.get_mut(id) {
        Some(conference) => {
            conference.remove_member(session.id(), member, message, actor, reason);
        }
        None => warn!("{}: conference {} no longer exists", session.nick(), id),
    }
    session.left();
}
