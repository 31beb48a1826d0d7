use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pass::run_pass;
use crate::SyncDeps;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_JITTER_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub jitter: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            jitter: Duration::from_secs(DEFAULT_JITTER_SECS),
        }
    }
}

/// Process-visible polling state, exposed through the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStatus {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    pub consecutive_failures: u32,
}

/// Cheap cloneable accessor for status snapshots, handed to the HTTP
/// surface so it never touches the driver itself.
#[derive(Clone)]
pub struct PollStatusHandle {
    status: Arc<RwLock<PollStatus>>,
}

impl PollStatusHandle {
    pub fn snapshot(&self) -> PollStatus {
        self.status
            .read()
            .map(|status| status.clone())
            .unwrap_or_default()
    }
}

/// The single periodic loop driving the pipeline: sleep `interval` plus a
/// uniform jitter, skip the tick when a pass is still in flight, run one
/// full pass otherwise. An explicit trigger enqueues an immediate tick
/// through the same overlap guard.
pub struct PollDriver {
    deps: Arc<SyncDeps>,
    config: PollConfig,
    status: Arc<RwLock<PollStatus>>,
    in_flight: AtomicBool,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl PollDriver {
    pub fn new(deps: Arc<SyncDeps>, config: PollConfig) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            deps,
            config,
            status: Arc::new(RwLock::new(PollStatus::default())),
            in_flight: AtomicBool::new(false),
            trigger_tx,
            trigger_rx: tokio::sync::Mutex::new(trigger_rx),
        }
    }

    pub fn status_handle(&self) -> PollStatusHandle {
        PollStatusHandle {
            status: Arc::clone(&self.status),
        }
    }

    /// Requests an immediate tick. Lossy by design: if a trigger is already
    /// queued the extra request is dropped.
    pub fn trigger_now(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    fn sleep_duration(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.config.interval + Duration::from_millis(extra)
    }

    /// Runs ticks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            jitter_secs = self.config.jitter.as_secs(),
            "poll driver started"
        );

        let mut trigger_rx = self.trigger_rx.lock().await;
        loop {
            let sleep = self.sleep_duration();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {
                    self.run_once(&cancel).await;
                }
                Some(()) = trigger_rx.recv() => {
                    debug!("explicit trigger received");
                    self.run_once(&cancel).await;
                }
            }
        }

        info!("poll driver stopped");
    }

    /// One guarded tick. Returns false when a previous tick was still in
    /// flight and this one was skipped.
    pub async fn run_once(&self, cancel: &CancellationToken) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("previous pass still in flight; skipping tick");
            return false;
        }

        let started = OffsetDateTime::now_utc();
        if let Ok(mut status) = self.status.write() {
            status.last_run_at = Some(started);
        }

        let result = run_pass(&self.deps, cancel).await;
        match result {
            Ok(_summary) => {
                if let Ok(mut status) = self.status.write() {
                    status.last_success_at = Some(OffsetDateTime::now_utc());
                    status.consecutive_failures = 0;
                }
            }
            Err(tandem_core::SyncError::Cancelled) => {
                // Partial work is already committed; the global success
                // marker stays where it was.
                debug!("pass cancelled mid-flight");
            }
            Err(err) => {
                let failures = if let Ok(mut status) = self.status.write() {
                    status.consecutive_failures += 1;
                    status.consecutive_failures
                } else {
                    0
                };
                error!(error = %err, consecutive_failures = failures, "pass failed");
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_rfc3339_instants() {
        let status = PollStatus {
            last_run_at: Some(time::macros::datetime!(2025-01-10 12:00:00 UTC)),
            last_success_at: None,
            consecutive_failures: 2,
        };
        let rendered = serde_json::to_string(&status).expect("serialize");
        assert!(rendered.contains("2025-01-10T12:00:00Z"));
        assert!(rendered.contains("\"consecutive_failures\":2"));
        assert!(rendered.contains("\"last_success_at\":null"));
    }

    #[test]
    fn default_config_matches_polling_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.jitter, Duration::from_secs(5));
    }
}
