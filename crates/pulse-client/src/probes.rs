//! Periodic probe panel over a fixed set of well-known targets.
//!
//! Each sweep pings every target concurrently; a slow or failing target
//! only affects its own entry. The published dataset is replaced
//! atomically once the whole sweep resolves, in panel order.

use crate::checks::{submit_and_await, CheckBackend, PollConfig};
use futures_util::future::join_all;
use pulse_core::normalize::{self, DisplayStatus, NO_TIME_LABEL};
use pulse_core::{CheckRequest, CheckType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const DEFAULT_PANEL_TARGETS: [&str; 5] =
    ["yandex.ru", "vk.com", "ok.com", "tremolino.ru", "auto.ru"];
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct PanelEntry {
    pub target: String,
    pub time: String,
    pub status: DisplayStatus,
}

impl PanelEntry {
    fn pending(target: &str) -> Self {
        Self {
            target: target.to_string(),
            time: NO_TIME_LABEL.to_string(),
            status: DisplayStatus::Pending,
        }
    }

    fn failed(target: &str) -> Self {
        Self {
            target: target.to_string(),
            time: NO_TIME_LABEL.to_string(),
            status: DisplayStatus::Bad,
        }
    }
}

pub struct ProbeScheduler<B> {
    backend: Arc<B>,
    targets: Vec<String>,
    poll: PollConfig,
    interval: Duration,
    tx: watch::Sender<Vec<PanelEntry>>,
}

impl<B> ProbeScheduler<B>
where
    B: CheckBackend,
{
    /// The receiver starts with a pending entry per target so the strip can
    /// render before the first sweep completes.
    pub fn new(
        backend: Arc<B>,
        targets: Vec<String>,
        poll: PollConfig,
        interval: Duration,
    ) -> (Self, watch::Receiver<Vec<PanelEntry>>) {
        let initial = targets
            .iter()
            .map(|target| PanelEntry::pending(target))
            .collect();
        let (tx, rx) = watch::channel(initial);
        (
            Self {
                backend,
                targets,
                poll,
                interval,
                tx,
            },
            rx,
        )
    }

    /// One full sweep: ping every target concurrently, publish the results
    /// as a single replacement dataset, and return them.
    pub async fn sweep(&self) -> Vec<PanelEntry> {
        let probes = self.targets.iter().map(|target| self.probe(target));
        let entries = join_all(probes).await;
        debug!("panel_sweep_complete: targets={}", entries.len());
        self.tx.send_replace(entries.clone());
        entries
    }

    /// Sweep immediately, then on every interval tick, until dropped.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn probe(&self, target: &str) -> PanelEntry {
        let request = CheckRequest::new(target, CheckType::Ping, None);
        match submit_and_await(self.backend.as_ref(), &request, &self.poll).await {
            Ok(outcome) => {
                let normalized = normalize::normalize(&outcome, CheckType::Ping);
                PanelEntry {
                    target: target.to_string(),
                    time: normalized.display_time,
                    status: normalized.display_status,
                }
            }
            Err(err) => {
                warn!("panel_probe_error: target={target}: {err}");
                PanelEntry::failed(target)
            }
        }
    }
}
