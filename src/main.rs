use callgate::config::Config;
use callgate::domain::call::addressing::HandleRegistry;
use callgate::domain::call::cause::{CallCause, CauseType, NORMAL_CALL_CLEARING};
use callgate::domain::call::event::CallEvent;
use callgate::domain::call::session::SessionContext;
use callgate::domain::call::value_object::{BackendCallState, ChangeReason};
use callgate::domain::call::EventBus;
use callgate::domain::switchboard::Switchboard;
use callgate::infrastructure::metrics::{init_metrics, spawn_event_recorder};
use callgate::infrastructure::{HandleRepository, ModemRequest, SimulatedModem, ToneGenerator};
use callgate::interface::{self, ControlHandle};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let path = std::env::args().nth(1);
    let config = Config::load(Some(path.as_deref().unwrap_or("callgate")))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Callgate");
    info!("Configuration loaded: {:?}", config);

    let events = EventBus::new(config.call.event_capacity);
    if config.metrics.enabled {
        init_metrics(config.metrics.listen.parse()?)?;
        spawn_event_recorder(events.subscribe());
        info!("Metrics available on {}", config.metrics.listen);
    }

    let modem = Arc::new(SimulatedModem::new());
    let tones = Arc::new(ToneGenerator::new());
    let handles = Arc::new(HandleRepository::new());
    let ctx = SessionContext {
        service: modem.clone(),
        tones: tones.clone(),
        resolver: handles.clone(),
        self_handle: handles.ensure("self"),
        handles,
        settings: config.tones.settings(),
        events,
    };
    let switchboard = Switchboard::new(ctx, config.call.anonymity());
    let (control, task) = interface::spawn(switchboard, Some(tones), &config.call);

    demo_call_lifecycle(&control, &modem).await?;

    if config.metrics.enabled {
        info!("Press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    drop(control);
    task.await?;
    info!("Callgate stopped");
    Ok(())
}

async fn demo_call_lifecycle(control: &ControlHandle, modem: &SimulatedModem) -> anyhow::Result<()> {
    info!("=== Call Lifecycle Demo ===");

    let mut rx = control.subscribe();

    // Place the call
    let session = control.dial("+358401234567p12").await?;
    control.accept(session).await?;
    let dial = modem
        .last_pending(|r| matches!(r, ModemRequest::Dial { .. }))
        .ok_or_else(|| anyhow::anyhow!("no dial request"))?;
    if let Some(event) = modem.complete_dial(dial) {
        control.deliver(event).await?;
    }

    let call = control
        .view(session)
        .await?
        .and_then(|view| view.call)
        .ok_or_else(|| anyhow::anyhow!("call was not placed"))?;
    info!("Call placed on {}", call);

    // Network progress
    for state in [BackendCallState::Dialing, BackendCallState::Alerting, BackendCallState::Active] {
        if let Some(event) = modem.set_state(&call, state, CallCause::none()) {
            control.deliver(event).await?;
        }
    }

    // Hold and resume
    for hold in [true, false] {
        control.request_hold(session, hold).await?;
        if let Some(request) = modem.last_pending(|r| matches!(r, ModemRequest::Hold { .. })) {
            if let Some(event) = modem.reply(request, Ok(())) {
                control.deliver(event).await?;
            }
        }
        let (state, reason) = control.get_hold_state(session).await?;
        info!("Hold state: {:?} ({:?})", state, reason);
    }

    // Hang up
    control
        .hangup(session, ChangeReason::UserRequested, "", "Demo finished")
        .await?;
    let cause = CallCause::new(CauseType::Local, NORMAL_CALL_CLEARING);
    if let Some(event) = modem.set_state(&call, BackendCallState::Disconnected, cause) {
        control.deliver(event).await?;
    }

    // Show generated events
    let mut count = 0;
    while let Ok(notification) = rx.try_recv() {
        if let CallEvent::StateChanged { state, reason, .. } = &notification.event {
            info!("Call state: {} ({:?})", state.as_str(), reason.reason);
        }
        count += 1;
    }
    info!("Generated {} events", count);
    info!("Live sessions: {}", control.sessions().await?.len());
    info!("Modem saw {} requests", modem.requests().len());

    info!("=== Call Lifecycle Demo Complete ===");
    Ok(())
}
