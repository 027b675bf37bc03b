use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::host::{ExecutionHost, HostSettings, Supervisor};
use crate::application::services::{AlertDispatcher, DispatchSettings};
use crate::domain::outputs::Notifier;
use crate::domain::repositories::TaskRepository;
use crate::infrastructure::alerts::{AudioPlayer, CommandNotifier, CommandSideEffects, LogNotifier};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::coordination::CoordinationServer;
use crate::infrastructure::repositories::SqliteTaskRepository;

const EVENT_BUFFER: usize = 64;

pub fn dispatch_settings(config: &AppConfig) -> Result<DispatchSettings> {
    Ok(DispatchSettings {
        guarantee: config.delivery,
        output_timeout: Duration::from_secs(config.alerts.output_timeout_secs),
        side_effect_timeout: Duration::from_secs(config.alerts.side_effect_timeout_secs),
        timezone: config.timezone()?,
    })
}

pub fn host_settings(config: &AppConfig) -> HostSettings {
    HostSettings {
        lock_path: config.lock_path(),
        liveness_path: config.liveness_path(),
        max_sleep: config.max_sleep(),
        heartbeat_interval: config.heartbeat_interval(),
        history_retention: config.history_retention(),
        max_delivery_failures: config.host.max_delivery_failures,
    }
}

/// Runs the supervised execution host in the foreground until SIGINT/SIGTERM.
pub async fn run_host(config: AppConfig) -> Result<()> {
    let db_path = config.db_path();
    let store: Arc<dyn TaskRepository> = Arc::new(
        SqliteTaskRepository::open(&db_path)
            .await
            .with_context(|| format!("Failed to open task store {}", db_path.display()))?,
    );
    info!("📦 Task store at {}", db_path.display());

    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let (hints, mut wake) = mpsc::unbounded_channel();

    let output_timeout = Duration::from_secs(config.alerts.output_timeout_secs);
    let notifier: Arc<dyn Notifier> = match &config.alerts.notify_command {
        Some(program) => Arc::new(CommandNotifier::new(program.clone(), output_timeout)),
        None => Arc::new(LogNotifier),
    };
    let audio = Arc::new(AudioPlayer::new(
        config.alerts.audio_command.clone(),
        config.alerts.default_sound.clone(),
        config.alerts.sounds_dir.clone(),
        Duration::from_secs(config.alerts.alarm_max_secs),
    ));
    let side_effects = Arc::new(CommandSideEffects::new(
        config.alerts.wallpaper_command.clone(),
        Duration::from_secs(config.alerts.side_effect_timeout_secs),
    ));

    let dispatcher = Arc::new(AlertDispatcher::new(
        store.clone(),
        notifier,
        audio,
        side_effects,
        events.clone(),
        dispatch_settings(&config)?,
    ));
    let host = ExecutionHost::new(store, dispatcher, events.clone(), host_settings(&config));
    let supervisor = Supervisor::new(host, Duration::from_secs(config.host.max_backoff_secs));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // The channel only speeds things up; the host still works from the store without it.
    match CoordinationServer::bind(
        config.coordination_addr(),
        hints,
        events,
        supervisor.host().subscribe_state(),
    )
    .await
    {
        Ok(server) => {
            tokio::spawn(server.run(shutdown.clone()));
        }
        Err(e) => warn!(
            "Coordination channel unavailable on {} ({}); UI changes are picked up on the next re-read",
            config.coordination_addr(),
            e
        ),
    }

    supervisor.run(&mut wake, shutdown).await?;
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
