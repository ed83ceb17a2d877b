//! Local hold state machine
//!
//! Pure bookkeeping: the session decides when to talk to the call service
//! and publishes every [`HoldChange`] the machine hands back.

use crate::domain::call::backend::PendingRequest;
use crate::domain::call::cause::BackendError;
use crate::domain::call::value_object::{BackendCallState, HoldReason, HoldState};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::RequestId;

/// Publicly visible hold change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldChange {
    pub state: HoldState,
    pub reason: HoldReason,
}

/// Outcome of validating a hold request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldCheck {
    /// Already held/unheld or heading there, nothing to issue
    Satisfied,
    /// A backend request must be issued
    Issue,
}

#[derive(Debug)]
pub struct HoldMachine {
    state: HoldState,
    reason: HoldReason,
    /// Confirmed state the outstanding request aims for
    requested: Option<HoldState>,
    control: Option<PendingRequest>,
}

impl HoldMachine {
    pub fn new() -> Self {
        Self {
            state: HoldState::Unheld,
            reason: HoldReason::None,
            requested: None,
            control: None,
        }
    }

    pub fn state(&self) -> HoldState {
        self.state
    }

    pub fn reason(&self) -> HoldReason {
        self.reason
    }

    pub fn requested(&self) -> Option<HoldState> {
        self.requested
    }

    pub fn control(&self) -> Option<PendingRequest> {
        self.control
    }

    /// Validate a hold (`true`) or unhold request against the backend state.
    ///
    /// `forced` skips the backend state check; it is used when a conference
    /// split releases the remaining calls.
    pub fn check(&mut self, hold: bool, backend: BackendCallState, forced: bool) -> Result<HoldCheck> {
        let (target, pending, expect) = if hold {
            (HoldState::Held, HoldState::PendingHold, BackendCallState::Active)
        } else {
            (HoldState::Unheld, HoldState::PendingUnheld, BackendCallState::Held)
        };

        if self.state == target || self.state == pending {
            self.reason = HoldReason::Requested;
            return Ok(HoldCheck::Satisfied);
        }
        if !forced && backend != expect {
            return Err(CallError::NotAvailable(format!(
                "Invalid call state {}",
                backend.name()
            )));
        }
        if self.control.is_some() {
            return Err(CallError::NotAvailable(
                "Call control operation pending".to_string(),
            ));
        }
        Ok(HoldCheck::Issue)
    }

    /// Record an issued request and enter the pending state
    pub fn begin(&mut self, hold: bool, request: PendingRequest) -> Option<HoldChange> {
        self.control = Some(request);
        if hold {
            self.requested = Some(HoldState::Held);
            self.update(HoldState::PendingHold, Some(HoldReason::Requested))
        } else {
            self.requested = Some(HoldState::Unheld);
            self.update(HoldState::PendingUnheld, Some(HoldReason::Requested))
        }
    }

    /// Whether `id` is the outstanding hold request
    pub fn is_control(&self, id: RequestId) -> bool {
        self.control.map(|r| r.id()) == Some(id)
    }

    /// Apply the reply to a hold request
    pub fn complete(
        &mut self,
        request: RequestId,
        result: &std::result::Result<(), BackendError>,
    ) -> Vec<HoldChange> {
        if self.is_control(request) {
            self.control = None;
        }

        let mut changes = Vec::new();
        if let (Err(_), Some(requested)) = (result, self.requested) {
            let revert = match requested {
                HoldState::Unheld => HoldState::Held,
                _ => HoldState::Unheld,
            };
            changes.extend(self.update(revert, Some(HoldReason::ResourceNotAvailable)));
            self.requested = None;
        }

        if let Some(requested) = self.requested {
            changes.extend(self.update(requested, None));
        }
        changes
    }

    /// Forget the outstanding request after it was cancelled
    pub fn abandon(&mut self) {
        self.control = None;
    }

    /// Backend reported the call held (`true`) or active
    pub fn confirm(&mut self, held: bool) -> Option<HoldChange> {
        let state = if held { HoldState::Held } else { HoldState::Unheld };
        self.update(state, None)
    }

    /// Move to `state`, deriving the reason when none is given
    pub fn update(&mut self, state: HoldState, reason: Option<HoldReason>) -> Option<HoldChange> {
        let old = self.state;
        if state == old {
            return None;
        }

        let reason = match state {
            HoldState::Held | HoldState::Unheld => {
                let opposite_pending = if state == HoldState::Held {
                    HoldState::PendingUnheld
                } else {
                    HoldState::PendingHold
                };
                let reason = reason.unwrap_or(if Some(state) == self.requested {
                    HoldReason::Requested
                } else if old == opposite_pending {
                    HoldReason::ResourceNotAvailable
                } else {
                    HoldReason::None
                });
                self.requested = None;
                reason
            }
            HoldState::PendingHold | HoldState::PendingUnheld => reason.unwrap_or(HoldReason::None),
        };

        self.state = state;
        self.reason = reason;
        Some(HoldChange { state, reason })
    }
}

impl Default for HoldMachine {
    fn default() -> Self {
        Self::new()
    }
}
