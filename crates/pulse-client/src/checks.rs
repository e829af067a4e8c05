//! Submit-then-poll client for check tasks.
//!
//! One submission produces one handle and at most one poll loop; polls are
//! strictly sequential within a loop, and per-attempt transport failures
//! are tolerated until the attempt budget runs out.

use crate::ApiClient;
use async_trait::async_trait;
use pulse_core::{CheckHandle, CheckOutcome, CheckRequest, PulseError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Poll policy. Injected so callers (and tests) choose their own urgency;
/// the defaults match the interactive surface.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            interval: Duration::from_secs(2),
        }
    }
}

/// The seam between the poll loop and the wire. The live implementation is
/// [`ApiClient`]; tests script their own.
#[async_trait]
pub trait CheckBackend: Send + Sync {
    async fn submit(&self, request: &CheckRequest) -> Result<CheckHandle, PulseError>;
    async fn fetch(&self, id: &str) -> Result<CheckOutcome, PulseError>;
}

#[async_trait]
impl CheckBackend for ApiClient {
    async fn submit(&self, request: &CheckRequest) -> Result<CheckHandle, PulseError> {
        let body = self.post_json("checks", request).await?;
        serde_json::from_value(body)
            .map_err(|err| PulseError::Protocol(format!("submission response missing id: {err}")))
    }

    async fn fetch(&self, id: &str) -> Result<CheckOutcome, PulseError> {
        let body = self.get_json(&format!("checks/{id}")).await?;
        serde_json::from_value(body)
            .map_err(|err| PulseError::Protocol(format!("undecodable poll response: {err}")))
    }
}

/// Run one check to a definite terminal outcome.
///
/// `Err` is returned only for local validation failure, before any network
/// call. Every other fault becomes a terminal outcome: a submission
/// failure yields an error outcome immediately, an exhausted poll budget
/// yields a timeout outcome. The whole cycle is wall-clock timed and the
/// measurement attached as `client_response_time`.
pub async fn submit_and_await<B>(
    backend: &B,
    request: &CheckRequest,
    poll: &PollConfig,
) -> Result<CheckOutcome, PulseError>
where
    B: CheckBackend + ?Sized,
{
    request.validate()?;
    let started = Instant::now();
    let outcome = run_to_terminal(backend, request, poll).await;
    Ok(outcome.with_client_time(started.elapsed().as_secs_f64()))
}

async fn run_to_terminal<B>(backend: &B, request: &CheckRequest, poll: &PollConfig) -> CheckOutcome
where
    B: CheckBackend + ?Sized,
{
    let handle = match backend.submit(request).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!("check_submit_error: target={}: {err}", request.target);
            return CheckOutcome::from_error(&err);
        }
    };
    debug!("check_submitted: id={} target={}", handle.id, request.target);

    let mut last: Option<CheckOutcome> = None;
    for attempt in 1..=poll.max_attempts {
        tokio::time::sleep(poll.interval).await;
        match backend.fetch(&handle.id).await {
            Ok(outcome) => {
                if outcome.status.is_terminal() {
                    debug!(
                        "check_finished: id={} status={} attempts={attempt}",
                        handle.id, outcome.status
                    );
                    return outcome;
                }
                last = Some(outcome);
            }
            Err(err) if err.is_authorization() => {
                // The credential is already gone; further polls would fail
                // the same way, so this one fault ends the loop.
                warn!("check_poll_unauthorized: id={}", handle.id);
                return CheckOutcome::from_error(&err);
            }
            Err(err) => {
                warn!(
                    "check_poll_error: id={} attempt={attempt}/{}: {err}",
                    handle.id, poll.max_attempts
                );
            }
        }
    }

    warn!("check_poll_exhausted: id={}", handle.id);
    last.unwrap_or_default().into_timeout(format!(
        "check did not finish within {} attempts",
        poll.max_attempts
    ))
}
