//! Stage progression pass.
//!
//! Once a stage's delivery attempts are spent, the follow-up either climbs
//! to the next stage with a fresh trigger time or, past the last stage,
//! finishes as `all_stages_completed`. Records whose attempts are not yet
//! exhausted are left for the next dispatch pass to requeue.

use crate::entity::TrackedEntity;
use crate::error::{EntityError, GatewayError, PassError};
use crate::record::{FollowUp, FollowUpType};
use crate::rule::RuleSet;
use crate::store::{EntityGateway, FollowUpStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result of one progression pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionSummary {
    /// Records advanced to their next stage.
    pub advanced: u32,
    /// Records that finished their last stage.
    pub completed: u32,
    /// Records stopped because their entity resolved meanwhile.
    pub stopped: u32,
    /// Records whose processing errored.
    pub errors: u32,
}

impl ProgressionSummary {
    /// Returns whether the pass changed any record.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.advanced > 0 || self.completed > 0 || self.stopped > 0
    }
}

enum ProgressionOutcome {
    Advanced,
    Completed,
    Stopped,
}

/// Runs one progression pass over all sent follow-ups.
///
/// # Errors
///
/// Returns [`PassError`] only when listing sent records fails; per-record
/// errors are contained in the summary.
pub async fn run(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    rules: &RuleSet,
    now: DateTime<Utc>,
) -> Result<ProgressionSummary, PassError> {
    let mut summary = ProgressionSummary::default();

    for record in store.list_sent().await? {
        if !record.attempts_exhausted() {
            // Dispatch keeps requeuing this stage until its attempts are
            // spent.
            continue;
        }
        let id = record.id;
        let entity = record.entity;
        match progress_one(store, gateway, rules, record, now).await {
            Ok(ProgressionOutcome::Advanced) => summary.advanced += 1,
            Ok(ProgressionOutcome::Completed) => summary.completed += 1,
            Ok(ProgressionOutcome::Stopped) => summary.stopped += 1,
            Err(error) => {
                warn!(follow_up = %id, entity = %entity, %error, "progression failed for record");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

async fn progress_one(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    rules: &RuleSet,
    mut record: FollowUp,
    now: DateTime<Utc>,
) -> Result<ProgressionOutcome, EntityError> {
    let tracked = gateway
        .find_entity(record.entity)
        .await?
        .ok_or(GatewayError::entity_not_found(record.entity))?;
    if tracked.is_terminal() {
        record.stop();
        store.update(&record).await?;
        return Ok(ProgressionOutcome::Stopped);
    }

    let rule = rules.for_domain(record.entity.kind());
    let next_stage = record.stage + 1;
    if next_stage > rule.max_stages {
        record.complete_all_stages();
        store.update(&record).await?;
        debug!(
            follow_up = %record.id,
            entity = %record.entity,
            stage = record.stage,
            "follow-up completed all stages"
        );
        return Ok(ProgressionOutcome::Completed);
    }
    let Some(delay) = rule.delay_for_stage(next_stage) else {
        // The rule shrank since the record was created; nothing left to
        // schedule.
        record.complete_all_stages();
        store.update(&record).await?;
        return Ok(ProgressionOutcome::Completed);
    };

    // Overdue ladders stay anchored to the invoice due date; everything
    // else counts from the moment of progression.
    let scheduled_at = match (&tracked, record.follow_up_type) {
        (TrackedEntity::Invoice(invoice), FollowUpType::Overdue) => {
            invoice.due_date + Duration::days(delay)
        }
        _ => now + Duration::days(delay),
    };
    record.advance_stage(scheduled_at);
    store.update(&record).await?;
    debug!(
        follow_up = %record.id,
        entity = %record.entity,
        stage = record.stage,
        scheduled_at = %record.scheduled_at,
        "advanced follow-up to next stage"
    );
    Ok(ProgressionOutcome::Advanced)
}
