//! Prometheus metrics for call sessions

use crate::domain::call::event::{CallEvent, Notification};
use crate::domain::call::value_object::{CallState, ChangeReason};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Install the Prometheus exporter with its own scrape endpoint
///
/// Must run inside a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;

    describe_counter!("callgate_calls_total", "Total number of call sessions created");
    describe_counter!("callgate_calls_ended_total", "Total number of calls ended");
    describe_counter!(
        "callgate_call_failures_total",
        "Total number of calls that ended with an error"
    );
    describe_counter!("callgate_hold_changes_total", "Total number of hold state changes");
    describe_counter!(
        "callgate_conference_joins_total",
        "Total number of channels added to conferences"
    );
    describe_gauge!("callgate_live_sessions", "Number of live call sessions");

    debug!("Metrics exporter listening on {}", listen);
    Ok(())
}

/// Count one call event
pub fn record_event(event: &CallEvent) {
    match event {
        CallEvent::NewChannel { requested, .. } => {
            let direction = if *requested { "outgoing" } else { "incoming" };
            counter!("callgate_calls_total", "direction" => direction).increment(1);
        }
        CallEvent::StateChanged {
            state: CallState::Ended,
            reason,
            ..
        } => {
            counter!("callgate_calls_ended_total", "release" => reason.release.name()).increment(1);
            if reason.reason == ChangeReason::InternalError {
                counter!("callgate_call_failures_total", "error" => reason.dbus_reason.clone())
                    .increment(1);
            }
        }
        CallEvent::HoldStateChanged { state, .. } => {
            counter!("callgate_hold_changes_total", "state" => state.name()).increment(1);
        }
        CallEvent::ChannelAdded { .. } => {
            counter!("callgate_conference_joins_total").increment(1);
        }
        _ => {}
    }
}

/// Update live sessions gauge
pub fn update_live_sessions(count: usize) {
    gauge!("callgate_live_sessions").set(count as f64);
}

/// Count every event published on the bus until it closes
pub fn spawn_event_recorder(mut rx: broadcast::Receiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => record_event(&notification.event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Metrics recorder lagged, {} events not counted", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::event::EventBus;
    use crate::domain::call::value_object::StateReason;
    use crate::domain::shared::value_objects::SessionId;

    #[test]
    fn test_record_without_recorder() {
        // No recorder installed: recording is a no-op
        record_event(&CallEvent::NewChannel {
            session: SessionId::new(),
            requested: true,
            peer: None,
        });
        record_event(&CallEvent::StateChanged {
            session: SessionId::new(),
            state: CallState::Ended,
            reason: StateReason::new(None, ChangeReason::InternalError, "failed"),
        });
        update_live_sessions(3);
    }

    #[tokio::test]
    async fn test_recorder_stops_when_bus_closes() {
        let bus = EventBus::new(8);
        let task = spawn_event_recorder(bus.subscribe());
        bus.publish(CallEvent::Closed {
            session: SessionId::new(),
        });
        drop(bus);
        task.await.unwrap();
    }
}
