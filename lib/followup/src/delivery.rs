//! Delivery pass.
//!
//! Picks up scheduled follow-ups whose trigger time has arrived, re-checks
//! the parent entity, and hands the message to the notification sink. The
//! record mirrors the outcome: `sent` on acceptance, still `scheduled`
//! after a transient rejection with attempts left, `failed` otherwise.

use crate::error::{EntityError, GatewayError, PassError, SinkError};
use crate::record::FollowUp;
use crate::sink::{NotificationMessage, NotificationSink};
use crate::store::{EntityGateway, FollowUpStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    /// Messages the sink accepted.
    pub delivered: u32,
    /// Records stopped because their entity resolved meanwhile.
    pub stopped: u32,
    /// Records marked failed.
    pub failed: u32,
    /// Transient rejections left scheduled for a later pass.
    pub retried: u32,
    /// Records whose processing errored.
    pub errors: u32,
}

impl DeliverySummary {
    /// Returns whether the pass changed any record.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.delivered > 0 || self.stopped > 0 || self.failed > 0 || self.retried > 0
    }
}

enum DeliveryOutcome {
    Delivered,
    Stopped,
    Failed,
    Retried,
}

/// Runs one delivery pass over all due follow-ups.
///
/// # Errors
///
/// Returns [`PassError`] only when listing due records fails; per-record
/// errors are contained in the summary.
pub async fn run(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    sink: &impl NotificationSink,
    now: DateTime<Utc>,
) -> Result<DeliverySummary, PassError> {
    let mut summary = DeliverySummary::default();

    for record in store.list_due(now).await? {
        let id = record.id;
        let entity = record.entity;
        match deliver_one(store, gateway, sink, record).await {
            Ok(DeliveryOutcome::Delivered) => summary.delivered += 1,
            Ok(DeliveryOutcome::Stopped) => summary.stopped += 1,
            Ok(DeliveryOutcome::Failed) => summary.failed += 1,
            Ok(DeliveryOutcome::Retried) => summary.retried += 1,
            Err(error) => {
                warn!(follow_up = %id, entity = %entity, %error, "delivery failed for record");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

async fn deliver_one(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    sink: &impl NotificationSink,
    mut record: FollowUp,
) -> Result<DeliveryOutcome, EntityError> {
    // The entity may have resolved since the record was scheduled; never
    // notify for a terminal entity.
    let tracked = gateway
        .find_entity(record.entity)
        .await?
        .ok_or(GatewayError::entity_not_found(record.entity))?;
    if tracked.is_terminal() {
        record.stop();
        store.update(&record).await?;
        debug!(
            follow_up = %record.id,
            entity = %record.entity,
            "stopped follow-up for resolved entity"
        );
        return Ok(DeliveryOutcome::Stopped);
    }

    // A record never sends past its attempt budget.
    if record.attempts_exhausted() {
        record.fail("delivery attempts exhausted");
        store.update(&record).await?;
        return Ok(DeliveryOutcome::Failed);
    }

    record.record_attempt();
    let message = NotificationMessage::from_record(&record);
    match sink.send(&message).await {
        Ok(()) => {
            record.mark_sent();
            store.update(&record).await?;
            debug!(
                follow_up = %record.id,
                stage = record.stage,
                attempts = record.attempts,
                "notification accepted by sink"
            );
            Ok(DeliveryOutcome::Delivered)
        }
        Err(SinkError::Rejected { reason }) => {
            let outcome = if record.attempts_exhausted() {
                record.fail(format!("sink rejected final attempt: {reason}"));
                DeliveryOutcome::Failed
            } else {
                debug!(
                    follow_up = %record.id,
                    attempts = record.attempts,
                    reason,
                    "sink rejected, will retry"
                );
                DeliveryOutcome::Retried
            };
            store.update(&record).await?;
            Ok(outcome)
        }
        Err(SinkError::Failed { reason }) => {
            warn!(follow_up = %record.id, reason, "sink failed permanently");
            record.fail(reason);
            store.update(&record).await?;
            Ok(DeliveryOutcome::Failed)
        }
    }
}
