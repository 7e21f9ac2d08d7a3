//! Exponential-backoff reconnection for the event stream.
//!
//! When the stream drops, the channel calls [`reconnect_loop`] to keep
//! retrying with increasing, jittered delays until either the connection
//! is restored or the [`CancellationToken`] is triggered. There is no
//! overall deadline.

use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::{StreamClient, StreamConnection};
use crate::error::TransportError;
use crate::stream::ConnectionState;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Maximum relative deviation applied to each delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Scale `delay` by `1 + jitter * sample`, where `sample` is in `[-1, 1]`.
pub fn apply_jitter(delay: Duration, jitter: f64, sample: f64) -> Duration {
    let factor = 1.0 + jitter * sample.clamp(-1.0, 1.0);
    Duration::from_millis((delay.as_millis() as f64 * factor).round().max(0.0) as u64)
}

/// Jitter `delay` with a random sample.
pub fn jittered(delay: Duration, config: &ReconnectConfig) -> Duration {
    if config.jitter <= 0.0 {
        return delay;
    }
    let sample = rand::rng().random_range(-1.0..=1.0);
    apply_jitter(delay, config.jitter, sample)
}

/// Reconnect to the event stream with exponential backoff.
///
/// Reads the current credential from `token` before every attempt so a
/// refreshed token takes effect without restarting the loop. Returns
/// `Some(connection)` once a connection succeeds, or `None` if `cancel`
/// is triggered first.
pub async fn reconnect_loop(
    client: &StreamClient,
    token: &RwLock<String>,
    config: &ReconnectConfig,
    state: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) -> Option<StreamConnection> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let wait = jittered(delay, config);
        tracing::info!(
            client_id = client.client_id(),
            attempt,
            delay_ms = wait.as_millis() as u64,
            "Reconnecting to event stream",
        );

        // Wait before the attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(wait) => {}
        }

        state.send_replace(ConnectionState::Reconnecting { attempt });
        let credential = token.read().await.clone();

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(client_id = client.client_id(), "Reconnect cancelled");
                return None;
            }
            result = client.connect(&credential) => {
                match result {
                    Ok(conn) => {
                        tracing::info!(
                            client_id = client.client_id(),
                            attempt,
                            "Reconnected to event stream",
                        );
                        return Some(conn);
                    }
                    Err(TransportError::Auth(reason)) => {
                        tracing::error!(
                            client_id = client.client_id(),
                            reason = %reason,
                            "Reconnect rejected, credential needs refreshing",
                        );
                        state.send_replace(ConnectionState::AuthRejected);
                    }
                    Err(e) => {
                        tracing::warn!(
                            client_id = client.client_id(),
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        delay = next_delay(delay, config);
    }
}
