//! Non-blocking hub reporter

use super::link::HubLink;
use crate::tap::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One queued report
#[derive(Debug, Clone, PartialEq)]
pub enum HubReport {
    SessionStart(String),
    SessionEnd(String),
    Frame(Frame),
}

/// Queues reports for a background worker. `report` never waits.
#[derive(Clone)]
pub struct HubReporter {
    tx: mpsc::Sender<HubReport>,
    dropped: Arc<AtomicU64>,
}

impl HubReporter {
    /// Start the worker task draining into `link`
    pub fn spawn(link: Arc<dyn HubLink>, queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<HubReport>(queue_capacity.max(1));
        tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                let outcome = match &report {
                    HubReport::SessionStart(id) => link.report_session_start(id).await,
                    HubReport::SessionEnd(id) => link.report_session_end(id).await,
                    HubReport::Frame(frame) => link.report_frame(frame).await,
                };
                if let Err(e) = outcome {
                    tracing::debug!("Hub report failed: {}", e);
                }
            }
            tracing::debug!("Hub reporter stopped");
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue a report, dropping it if the queue is full
    pub fn report(&self, report: HubReport) {
        if self.tx.try_send(report).is_err() {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(dropped = n, "Hub queue full, report dropped");
        }
    }

    pub fn session_start(&self, session_id: &str) {
        self.report(HubReport::SessionStart(session_id.to_string()));
    }

    pub fn session_end(&self, session_id: &str) {
        self.report(HubReport::SessionEnd(session_id.to_string()));
    }

    pub fn frame(&self, frame: Frame) {
        self.report(HubReport::Frame(frame));
    }

    /// Reports lost to a full queue so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
