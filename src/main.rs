use anyhow::Context;
use spp_speed_relay::domain::models::{AppEvent, ErrorReport, MessageSeverity, StatusMessage};
use spp_speed_relay::domain::settings::SettingsService;
use spp_speed_relay::domain::speed::{GrantedCapabilities, SpeedProvider};
use spp_speed_relay::infrastructure::bluetooth::{self, LinkManager};
use spp_speed_relay::infrastructure::keep_alive::{KeepAlive, NoopKeepAlive, SystemKeepAlive};
use spp_speed_relay::infrastructure::logging;
use spp_speed_relay::infrastructure::shutdown::shutdown_signal;
use spp_speed_relay::infrastructure::speed;
use spp_speed_relay::presentation::console::{
    render_events, spawn_stdin_reader, Console, SharedView,
};
use spp_speed_relay::telemetry::TelemetryLoop;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;

    let _logging_guard = logging::init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting SPP speed relay (settings: {})",
        settings.path().display()
    );
    let config = settings.get().clone();

    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let connector = bluetooth::connector_for(config.transport)
        .with_context(|| format!("{:?} transport unavailable", config.transport))?;
    let keep_alive: Arc<dyn KeepAlive> = if config.keep_alive {
        Arc::new(SystemKeepAlive::new())
    } else {
        Arc::new(NoopKeepAlive)
    };
    let link = LinkManager::new(connector, keep_alive, event_tx.clone());

    let authorization = Arc::new(GrantedCapabilities::new(
        config.granted_capabilities.iter().cloned(),
    ));
    let (mut provider, feed) = speed::provider_from_settings(&config.speed_source, authorization);
    if let Err(e) = provider.start() {
        // Ticks still run and publish zero until the source is available
        warn!("Speed source {} not started: {}", provider.source(), e);
        let _ = event_tx.send(AppEvent::Error(ErrorReport::from(&e)));
        let _ = event_tx.send(AppEvent::LogMessage(StatusMessage::new(
            format!("{} unavailable, relaying 0 mph", provider.source()),
            MessageSeverity::Warning,
        )));
    }

    let view = SharedView::default();
    let renderer = tokio::spawn(render_events(event_rx, view.clone()));

    let (stop_tx, stop_rx) = watch::channel(false);
    let telemetry = TelemetryLoop::new(provider, link.clone(), event_tx)
        .with_interval(Duration::from_millis(config.tick_interval_ms.max(1)));
    let telemetry = tokio::spawn(telemetry.run(stop_rx));

    let directory = bluetooth::directory_for(config.transport, config.known_peers.clone());
    let mut console = Console::new(link.clone(), Box::new(directory), settings, view, feed);
    let input = spawn_stdin_reader().context("Failed to start console input")?;

    tokio::select! {
        exit = console.run(input) => match exit {
            Ok(reason) => info!("Console finished ({:?})", reason),
            Err(e) => error!("Console failed: {:#}", e),
        },
        signal = shutdown_signal() => match signal {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("{}", e),
        },
    }

    info!("Shutting down");
    link.close();
    let _ = stop_tx.send(true);
    if let Err(e) = telemetry.await {
        warn!("Telemetry task failed: {}", e);
    }
    link.wait_for_connect().await;

    drop(console);
    drop(link);
    if tokio::time::timeout(Duration::from_secs(1), renderer)
        .await
        .is_err()
    {
        warn!("Event renderer did not drain in time");
    }

    Ok(())
}
