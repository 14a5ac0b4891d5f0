//! Bounded readiness polling.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::display::ReadinessProbe;
use crate::protocol_constants::{READINESS_POLL_INTERVAL_MS, READINESS_TIMEOUT_MS};
use crate::retry::sleep_or_cancel;

use super::error::{SupervisorError, SupervisorResult};

/// How long and how often to probe a freshly launched display server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(READINESS_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(READINESS_TIMEOUT_MS),
        }
    }
}

/// Polls `probe` until it succeeds, the timeout expires, or `cancel` fires.
///
/// Returns the number of probes made.
pub async fn poll_until_ready(
    probe: &dyn ReadinessProbe,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> SupervisorResult<u32> {
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }

        attempts += 1;
        match tokio::time::timeout_at(deadline, probe.probe()).await {
            Ok(Ok(())) => {
                log::info!(
                    "[Supervisor] Display server ready after {}ms ({} probes)",
                    started.elapsed().as_millis(),
                    attempts
                );
                return Ok(attempts);
            }
            Ok(Err(e)) => {
                log::debug!("[Supervisor] Readiness probe {} failed: {}", attempts, e);
                last_error = Some(e.to_string());
            }
            Err(_) => {
                last_error.get_or_insert_with(|| "probe timed out".to_string());
                break;
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if !sleep_or_cancel(config.poll_interval.min(deadline - now), cancel).await {
            return Err(SupervisorError::Cancelled);
        }
    }

    Err(SupervisorError::ReadinessTimeout {
        waited: started.elapsed(),
        attempts,
        last_error,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::RefusingUntil;
    use super::*;

    fn config(timeout_ms: u64) -> ReadinessConfig {
        ReadinessConfig {
            poll_interval: Duration::from_millis(200),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_timeout_exceeds_refusal_window() {
        let probe = RefusingUntil::after(Duration::from_millis(1_000));
        let attempts = poll_until_ready(&probe, &config(2_000), &CancellationToken::new())
            .await
            .unwrap();
        // Probes at 0, 200, ..., 1000ms.
        assert_eq!(attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_refusal_outlasts_timeout() {
        let probe = RefusingUntil::after(Duration::from_millis(3_000));
        let err = poll_until_ready(&probe, &config(2_000), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SupervisorError::ReadinessTimeout {
                waited,
                attempts,
                last_error,
            } => {
                assert_eq!(waited, Duration::from_millis(2_000));
                assert_eq!(attempts, 11);
                assert!(last_error.unwrap().contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let probe = RefusingUntil::after(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let err = poll_until_ready(&probe, &config(5_000), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Cancelled));
    }
}
