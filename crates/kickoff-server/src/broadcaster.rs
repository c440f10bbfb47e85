//! Per-connection filtering and delivery of fetched documents.

use std::sync::Arc;

use bytes::Bytes;
use kickoff_core::{Document, PayloadError};
use kickoff_feed::Receiver;
use kickoff_telemetry::names;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, Delivery, SendError};

/// Counts from one broadcast pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections registered when the pass ran.
    pub recipients: usize,
    /// Frames queued.
    pub delivered: usize,
    /// Connections whose filtered view was empty.
    pub skipped_empty: usize,
    /// Frames dropped because the connection's queue was full.
    pub dropped: usize,
    /// Connections removed because their writer was gone.
    pub failed: usize,
}

/// Sends every registered connection the subset of a document that passes
/// its criteria.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Parse a raw document and fan it out. A document that does not parse
    /// reaches nobody.
    pub fn broadcast(&self, raw: &[u8]) -> Result<FanOutReport, PayloadError> {
        let document = Document::parse(raw)?;
        Ok(self.broadcast_document(&document))
    }

    pub fn broadcast_document(&self, document: &Document) -> FanOutReport {
        metrics::counter!(names::BROADCAST_PASSES_TOTAL).increment(1);
        let mut report = FanOutReport::default();

        let failed = self.registry.fan_out(|handle, criteria| {
            report.recipients += 1;
            let view = document.filter(criteria);
            if view.is_empty() {
                report.skipped_empty += 1;
                return Delivery::Skipped;
            }
            let frame = match view.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(conn_id = %handle.id(), error = %e, "failed to encode filtered document");
                    report.skipped_empty += 1;
                    return Delivery::Skipped;
                }
            };
            match handle.try_send(frame) {
                Ok(()) => {
                    report.delivered += 1;
                    Delivery::Sent
                }
                Err(SendError::Full) => {
                    report.dropped += 1;
                    warn!(conn_id = %handle.id(), "send queue full, dropping frame");
                    Delivery::Dropped
                }
                Err(SendError::Closed) => {
                    report.failed += 1;
                    Delivery::Failed
                }
            }
        });

        for handle in failed {
            warn!(conn_id = %handle.id(), "send failed, closing connection");
            handle.close();
        }

        metrics::counter!(names::FRAMES_SENT_TOTAL).increment(report.delivered as u64);
        metrics::counter!(names::FRAMES_DROPPED_TOTAL).increment(report.dropped as u64);
        metrics::counter!(names::SEND_FAILURES_TOTAL).increment(report.failed as u64);
        report
    }

    /// Drain the publish slot until every publisher is gone.
    pub async fn run(self, mut documents: Receiver<Bytes>) {
        info!("broadcaster started");
        while let Some(raw) = documents.recv().await {
            match self.broadcast(&raw) {
                Ok(report) => debug!(
                    recipients = report.recipients,
                    delivered = report.delivered,
                    skipped_empty = report.skipped_empty,
                    dropped = report.dropped,
                    failed = report.failed,
                    "broadcast pass complete"
                ),
                Err(e) => {
                    metrics::counter!(names::PAYLOAD_DECODE_ERRORS_TOTAL, "kind" => e.error_kind())
                        .increment(1);
                    warn!(error = %e, bytes = raw.len(), "dropping undecodable document");
                }
            }
        }
        info!("publish channel closed, broadcaster stopped");
    }

    pub fn spawn(self, documents: Receiver<Bytes>) -> JoinHandle<()> {
        tokio::spawn(self.run(documents))
    }
}
