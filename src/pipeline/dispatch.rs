//! Rate-limited, strictly sequential delivery.
//!
//! Preparation is parallel; delivery is not. The provider enforces a hard
//! request rate, so consecutive sends start at least `min_interval` apart.
//! The first send goes out immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::pipeline::audit::RunLedger;
use crate::pipeline::types::{ArchiveStore, DeliveryProvider, FailureKind, PreparedDigest};

/// Counts for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub archive_failures: usize,
}

/// Sends digests one at a time with a minimum inter-send interval.
#[derive(Clone)]
pub struct RateLimitedDispatcher {
    delivery: Arc<dyn DeliveryProvider>,
    archive: Arc<dyn ArchiveStore>,
    min_interval: Duration,
}

impl RateLimitedDispatcher {
    pub fn new(
        delivery: Arc<dyn DeliveryProvider>,
        archive: Arc<dyn ArchiveStore>,
        min_interval: Duration,
    ) -> Self {
        Self {
            delivery,
            archive,
            min_interval,
        }
    }

    /// Deliver `digests` in order, recording each recipient's terminal
    /// state in `ledger`.
    pub async fn dispatch(
        &self,
        digests: Vec<PreparedDigest>,
        ledger: &mut RunLedger,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut last_start: Option<Instant> = None;

        for digest in digests {
            if let Some(previous) = last_start {
                tokio::time::sleep_until(previous + self.min_interval).await;
            }
            last_start = Some(Instant::now());

            let recipient_id = digest.recipient.id.as_str();
            match self.delivery.send(&digest.recipient.email, &digest).await {
                Ok(receipt) => {
                    summary.sent += 1;
                    ledger.record_success(recipient_id);
                    info!(
                        recipient = %recipient_id,
                        provider = self.delivery.name(),
                        provider_id = receipt.provider_id.as_deref().unwrap_or("-"),
                        topics = digest.summaries.len(),
                        "Digest delivered"
                    );

                    // Archiving is best-effort and never undoes a delivery.
                    if let Err(e) = self
                        .archive
                        .record_digest(recipient_id, &digest.body, &digest.topics())
                        .await
                    {
                        summary.archive_failures += 1;
                        warn!(recipient = %recipient_id, error = %e, "Failed to archive delivered digest");
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        recipient = %recipient_id,
                        provider = self.delivery.name(),
                        error = %e,
                        "Digest delivery failed"
                    );
                    ledger.record_failure(recipient_id, FailureKind::DeliveryError, e.to_string());
                }
            }
        }

        summary
    }
}
