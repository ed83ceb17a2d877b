//! Tone player port

use crate::domain::shared::value_objects::SessionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Call progress and feedback tones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneEvent {
    /// Ringback heard while the remote party is alerted
    Ringing,
    Busy,
    Congestion,
    RadioPathAck,
    RadioPathNotAvailable,
    /// Damped tone played when a held call drops
    Dropped,
    SpecialInformation,
}

impl ToneEvent {
    /// Call progress tones are the only ones stopped when a call instance
    /// lingers past the stale threshold
    pub fn is_progress_tone(&self) -> bool {
        matches!(self, ToneEvent::Ringing | ToneEvent::Busy | ToneEvent::Congestion)
    }
}

/// Token identifying one started tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToneToken(u32);

impl ToneToken {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Tone playback hardware
///
/// A zero duration plays until stopped. When a tone ends on its own the
/// driver reports it back to the owning session.
#[cfg_attr(test, mockall::automock)]
pub trait TonePlayer: Send + Sync {
    fn start(&self, owner: SessionId, event: ToneEvent, volume: i32, duration: Duration) -> ToneToken;

    fn stop(&self, token: ToneToken);

    /// Time the tone has been playing, `None` once it stopped
    fn elapsed(&self, token: ToneToken) -> Option<Duration>;

    fn event(&self, token: ToneToken) -> Option<ToneEvent>;

    fn is_any_playing(&self) -> bool;
}

/// Tone parameters used by call sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneSettings {
    pub enabled: bool,
    pub ringback_volume: i32,
    /// Feedback tone after a disconnect
    pub error_duration: Duration,
    /// Feedback tone after a failed dial
    pub dial_error_duration: Duration,
    pub dropped_duration: Duration,
    pub dropped_volume: i32,
    /// Progress tones older than this are stopped once the call is gone
    pub stale_threshold: Duration,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ringback_volume: 0,
            error_duration: Duration::from_millis(5000),
            dial_error_duration: Duration::from_millis(4000),
            dropped_duration: Duration::from_millis(1200),
            dropped_volume: -3,
            stale_threshold: Duration::from_millis(1200),
        }
    }
}
