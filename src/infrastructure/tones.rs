//! Software tone generator
//!
//! Keeps track of which tones are playing and for how long. Nothing is
//! rendered; the control loop calls [`ToneGenerator::expire`] on a timer
//! and feeds the finished tones back as [`BackendEvent::ToneStopped`].

use crate::domain::call::tone::{ToneEvent, TonePlayer, ToneToken};
use crate::domain::shared::value_objects::SessionId;
use crate::domain::switchboard::BackendEvent;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct PlayingTone {
    owner: SessionId,
    event: ToneEvent,
    volume: i32,
    started: Instant,
    /// Zero plays until stopped
    duration: Duration,
}

#[derive(Debug, Default)]
struct GeneratorState {
    next_token: u32,
    playing: HashMap<ToneToken, PlayingTone>,
}

#[derive(Debug, Default)]
pub struct ToneGenerator {
    state: Mutex<GeneratorState>,
}

impl ToneGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GeneratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tones that ran past their duration at `now`
    pub fn expire(&self, now: Instant) -> Vec<BackendEvent> {
        let mut state = self.state();
        let mut finished: Vec<(ToneToken, SessionId)> = state
            .playing
            .iter()
            .filter(|(_, tone)| {
                !tone.duration.is_zero() && now.saturating_duration_since(tone.started) >= tone.duration
            })
            .map(|(token, tone)| (*token, tone.owner))
            .collect();
        finished.sort_by_key(|(token, _)| token.as_u32());

        finished
            .into_iter()
            .map(|(token, session)| {
                state.playing.remove(&token);
                debug!("tone {} finished", token.as_u32());
                BackendEvent::ToneStopped { session, token }
            })
            .collect()
    }

    /// End a tone as if it ran out
    pub fn finish(&self, token: ToneToken) -> Option<BackendEvent> {
        let tone = self.state().playing.remove(&token)?;
        Some(BackendEvent::ToneStopped {
            session: tone.owner,
            token,
        })
    }

    /// Currently playing tones as `(token, event, volume)`
    pub fn playing(&self) -> Vec<(ToneToken, ToneEvent, i32)> {
        let mut playing: Vec<_> = self
            .state()
            .playing
            .iter()
            .map(|(token, tone)| (*token, tone.event, tone.volume))
            .collect();
        playing.sort_by_key(|(token, _, _)| token.as_u32());
        playing
    }
}

impl TonePlayer for ToneGenerator {
    fn start(&self, owner: SessionId, event: ToneEvent, volume: i32, duration: Duration) -> ToneToken {
        let mut state = self.state();
        state.next_token += 1;
        let token = ToneToken::new(state.next_token);
        debug!("tone {} start {:?} volume {} for {:?}", token.as_u32(), event, volume, duration);
        state.playing.insert(
            token,
            PlayingTone {
                owner,
                event,
                volume,
                started: Instant::now(),
                duration,
            },
        );
        token
    }

    fn stop(&self, token: ToneToken) {
        if self.state().playing.remove(&token).is_some() {
            debug!("tone {} stopped", token.as_u32());
        }
    }

    fn elapsed(&self, token: ToneToken) -> Option<Duration> {
        self.state()
            .playing
            .get(&token)
            .map(|tone| tone.started.elapsed())
    }

    fn event(&self, token: ToneToken) -> Option<ToneEvent> {
        self.state().playing.get(&token).map(|tone| tone.event)
    }

    fn is_any_playing(&self) -> bool {
        !self.state().playing.is_empty()
    }
}
