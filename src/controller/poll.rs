//! Poll-until-deadline loop
//!
//! Runs a [`Probe`] immediately and then once per `pace` until it reports
//! done, returns an error, or the deadline passes. The loop runs on the
//! caller's task and never spawns.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Fallback pace for data-movement checks
pub const DEFAULT_UPLOAD_PACE: Duration = Duration::from_secs(10);

/// Fallback deadline for data-movement checks
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fallback pace for pause propagation checks
pub const DEFAULT_PROPAGATION_PACE: Duration = Duration::from_secs(2);

/// Fallback deadline for pause propagation checks
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub pace: Duration,
}

impl PollSettings {
    pub fn new(timeout: Duration, pace: Duration) -> Self {
        Self { timeout, pace }
    }

    pub fn upload_defaults() -> Self {
        Self::new(DEFAULT_UPLOAD_TIMEOUT, DEFAULT_UPLOAD_PACE)
    }

    pub fn propagation_defaults() -> Self {
        Self::new(DEFAULT_PROPAGATION_TIMEOUT, DEFAULT_PROPAGATION_PACE)
    }
}

/// Result of one probe invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeStatus {
    pub done: bool,
    /// Human-readable snapshot of what was observed
    pub detail: String,
}

impl ProbeStatus {
    pub fn done(detail: impl Into<String>) -> Self {
        Self {
            done: true,
            detail: detail.into(),
        }
    }

    pub fn pending(detail: impl Into<String>) -> Self {
        Self {
            done: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait Probe: Send {
    /// What is being waited for, used in logs and timeout errors
    fn describe(&self) -> String;

    async fn probe(&mut self) -> Result<ProbeStatus>;
}

#[derive(Clone, Debug)]
pub struct PollReport {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last: ProbeStatus,
}

/// Probe until done, error or deadline.
///
/// Errors from the probe abort the loop and are returned unchanged. A blown
/// deadline yields [`Error::PollTimeout`] carrying the last observed state.
pub async fn poll_until<P>(settings: PollSettings, probe: &mut P) -> Result<PollReport>
where
    P: Probe + ?Sized,
{
    let operation = probe.describe();
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let status = probe.probe().await?;
        let observed_at: DateTime<Utc> = Utc::now();

        if status.done {
            info!(
                operation = %operation,
                attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                detail = %status.detail,
                "Wait finished"
            );
            return Ok(PollReport {
                attempts,
                elapsed: started.elapsed(),
                last: status,
            });
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(operation = %operation, attempts, detail = %status.detail, "Deadline exceeded");
            return Err(Error::PollTimeout {
                operation,
                timeout: settings.timeout,
                last_state: status.detail,
                observed_at: observed_at.to_rfc3339(),
            });
        }

        debug!(operation = %operation, attempt = attempts, detail = %status.detail, "Not finished yet");
        let remaining = deadline - now;
        tokio::time::sleep(settings.pace.min(remaining)).await;
    }
}
