use std::time::Instant;

use bytes::Bytes;
use kickoff_telemetry::names;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cadence::{Cadence, Ticker};
use crate::client::FetchClient;
use crate::error::FetchError;
use crate::range::DateRange;
use crate::slot::{Publish, Publisher};

/// Fetches a document on every cadence fire and hands it to the broadcaster.
///
/// Failures are logged and the cycle is skipped; there is no retry or
/// backoff, and nothing is published for a failed cycle.
pub struct Producer<C> {
    client: C,
    publisher: Publisher<Bytes>,
    cadence: Cadence,
}

impl<C: FetchClient + 'static> Producer<C> {
    pub fn new(client: C, publisher: Publisher<Bytes>, cadence: Cadence) -> Self {
        Self {
            client,
            publisher,
            cadence,
        }
    }

    /// One fetch-and-publish cycle for the current month-to-date range.
    pub async fn fetch_once(&self) -> Result<Publish, FetchError> {
        let range = DateRange::current();
        metrics::counter!(names::FETCH_TOTAL).increment(1);

        let started = Instant::now();
        let result = self.client.fetch(&range).await;
        metrics::histogram!(names::FETCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let body = result.inspect_err(|e| {
            metrics::counter!(names::FETCH_ERRORS_TOTAL, "kind" => e.error_kind()).increment(1);
        })?;

        let bytes = body.len();
        let outcome = self.publisher.publish(body);
        match outcome {
            Publish::Stored => debug!(%range, bytes, "document published"),
            Publish::Replaced => {
                metrics::counter!(names::DOCUMENTS_DROPPED_TOTAL).increment(1);
                warn!(%range, bytes, "broadcaster busy, replaced undelivered document");
            }
        }
        Ok(outcome)
    }

    async fn run_cycle(&self) {
        if let Err(e) = self.fetch_once().await {
            warn!(error = %e, kind = e.error_kind(), "fetch failed, skipping cycle");
        }
    }

    /// Fetch once immediately, then on every fire. Runs until aborted.
    pub async fn run(self) {
        info!(cadence = %self.cadence, "producer started");
        self.run_cycle().await;

        let mut ticker = Ticker::new(self.cadence);
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
