//! `trendscope-tracker` -- headless job-progress monitor.
//!
//! Connects to the job event stream, polls status snapshots for the
//! configured job kinds, reconciles both into the registry and logs every
//! change to the job summary until interrupted.
//!
//! # Environment variables
//!
//! See [`TrackerConfig::from_env`] for the full table. `RUST_LOG`
//! overrides the default log filter.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trendscope_core::event::EventSink;
use trendscope_core::registry::{JobSummary, RegistrySnapshot};
use trendscope_transport::api::HttpJobApi;
use trendscope_transport::error::TransportError;
use trendscope_transport::poll::PollGroup;
use trendscope_transport::reconnect::{jittered, next_delay, ReconnectConfig};
use trendscope_transport::stream::{ConnectionState, StreamChannel};
use trendscope_tracker::actor::spawn_registry;
use trendscope_tracker::config::TrackerConfig;
use trendscope_tracker::error::TrackerResult;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trendscope_tracker=info,trendscope_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match TrackerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        kinds = ?config.poll_kinds,
        "Starting trendscope-tracker",
    );

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Tracker stopped with an error");
        std::process::exit(1);
    }
}

async fn run(config: TrackerConfig) -> TrackerResult<()> {
    let (registry, registry_task) = spawn_registry(config.registry_capacity);
    let sink: Arc<dyn EventSink> = Arc::new(registry.clone());

    let api = Arc::new(HttpJobApi::new(&config.api_url, &config.token)?);
    let pollers = Arc::new(PollGroup::new(api, Arc::clone(&sink), config.poll_interval));
    for kind in &config.poll_kinds {
        pollers.ensure_running(*kind).await;
    }

    let stream = StreamChannel::new(&config.ws_url, config.stream_config());
    stream.on_event(sink).await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let connected = tokio::select! {
        () = &mut shutdown => false,
        result = connect_stream(&stream, &config.token) => {
            result?;
            true
        }
    };

    if connected {
        let mut snapshots = registry.subscribe();
        let mut stream_state = stream.state();
        let mut last_summary = JobSummary::default();

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = Arc::clone(&snapshots.borrow_and_update());
                    last_summary = log_summary(&snapshot, last_summary);
                }
                changed = stream_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *stream_state.borrow_and_update();
                    on_stream_state(state, &config, &pollers).await;
                }
            }
        }
    }

    // Producers first so nothing is queued after the registry stops.
    stream.disconnect().await;
    pollers.stop_all().await;
    registry.shutdown().await;
    if let Err(e) = registry_task.await {
        tracing::error!(error = %e, "Registry task failed");
    }

    tracing::info!("Tracker shut down");
    Ok(())
}

/// Connect the event stream, retrying transport failures with backoff.
///
/// A rejected credential is returned immediately.
async fn connect_stream(stream: &StreamChannel, token: &str) -> Result<(), TransportError> {
    let backoff = ReconnectConfig::default();
    let mut delay = backoff.initial_delay;

    loop {
        match stream.connect(token).await {
            Ok(()) => return Ok(()),
            Err(e @ TransportError::Auth(_)) => return Err(e),
            Err(e) => {
                let wait = jittered(delay, &backoff);
                tracing::warn!(
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "Event stream unavailable, relying on polling until it connects",
                );
                tokio::time::sleep(wait).await;
                delay = next_delay(delay, &backoff);
            }
        }
    }
}

/// Keep polling alive while the stream is down.
async fn on_stream_state(state: ConnectionState, config: &TrackerConfig, pollers: &PollGroup) {
    tracing::info!(?state, "Event stream state changed");
    if matches!(
        state,
        ConnectionState::Reconnecting { .. } | ConnectionState::AuthRejected
    ) {
        for kind in &config.poll_kinds {
            if pollers.ensure_running(*kind).await {
                tracing::info!(kind = %kind, "Polling resumed during stream outage");
            }
        }
    }
}

fn log_summary(snapshot: &RegistrySnapshot, last: JobSummary) -> JobSummary {
    let summary = snapshot.summary();
    if summary != last {
        tracing::info!(
            revision = snapshot.revision,
            queued = summary.queued,
            active = summary.active,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Job summary changed",
        );
    }
    summary
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
