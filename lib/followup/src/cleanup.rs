//! Lifecycle cleanup.
//!
//! The moment an entity reaches a terminal business status, every active
//! follow-up for it must stop. [`stop_for_entity`] is the synchronous path
//! invoked when the application reports a status change; [`run_sweep`]
//! backstops it by scanning entities that still hold active records.

use crate::entity::EntityRef;
use crate::error::{PassError, StoreError};
use crate::store::{EntityGateway, FollowUpStore};
use billhound_core::FollowUpEventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// An audit event recording why follow-ups for an entity were stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpEvent {
    /// Event ID.
    pub id: FollowUpEventId,
    /// Entity whose follow-ups were stopped.
    #[serde(flatten)]
    pub entity: EntityRef,
    /// Why the stop happened.
    pub reason: String,
    /// Entity status at the time of the stop.
    pub final_status: String,
    /// How many records were stopped.
    pub stopped_count: u64,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl FollowUpEvent {
    /// Event for an entity that reached a terminal status.
    #[must_use]
    pub fn entity_finalized(
        entity: EntityRef,
        final_status: impl Into<String>,
        stopped_count: u64,
    ) -> Self {
        Self {
            id: FollowUpEventId::new(),
            entity,
            reason: "entity_finalized".to_string(),
            final_status: final_status.into(),
            stopped_count,
            created_at: Utc::now(),
        }
    }
}

/// Result of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    /// Records moved to `stopped`.
    pub stopped: u64,
    /// Entities whose lookup or stop failed.
    pub errors: u32,
}

impl CleanupSummary {
    /// Returns whether the sweep changed anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.stopped > 0
    }
}

/// Stops all active follow-ups for one finalized entity.
///
/// Idempotent: an entity with no active records yields zero and leaves no
/// audit event behind. Returns the number of records stopped.
///
/// # Errors
///
/// Returns [`StoreError`] when the bulk stop or the event write fails.
pub async fn stop_for_entity(
    store: &impl FollowUpStore,
    entity: EntityRef,
    final_status: &str,
) -> Result<u64, StoreError> {
    let stopped = store.stop_active_for_entity(entity).await?;
    if stopped > 0 {
        let event = FollowUpEvent::entity_finalized(entity, final_status, stopped);
        store.record_event(&event).await?;
        info!(
            entity = %entity,
            final_status,
            stopped,
            "stopped follow-ups for finalized entity"
        );
    }
    Ok(stopped)
}

/// Sweeps all entities that still hold active follow-ups and stops those
/// whose entity has meanwhile reached a terminal status.
///
/// Per-entity failures are logged and counted; the sweep continues.
///
/// # Errors
///
/// Returns [`PassError`] when the active-entity listing itself fails.
pub async fn run_sweep(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
) -> Result<CleanupSummary, PassError> {
    let mut summary = CleanupSummary::default();

    for entity in store.list_active_entities().await? {
        let tracked = match gateway.find_entity(entity).await {
            Ok(Some(tracked)) => tracked,
            Ok(None) => {
                warn!(entity = %entity, "entity with active follow-ups no longer exists");
                summary.errors += 1;
                continue;
            }
            Err(error) => {
                warn!(entity = %entity, %error, "entity lookup failed during cleanup sweep");
                summary.errors += 1;
                continue;
            }
        };
        if !tracked.is_terminal() {
            continue;
        }
        match stop_for_entity(store, entity, tracked.status_str()).await {
            Ok(stopped) => summary.stopped += stopped,
            Err(error) => {
                warn!(entity = %entity, %error, "failed to stop follow-ups during cleanup sweep");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Invoice, InvoiceStatus};
    use crate::memory::{InMemoryEntityGateway, InMemoryFollowUpStore};
    use crate::record::{FollowUp, FollowUpStatus, FollowUpType};
    use billhound_core::{ClientId, InvoiceId};
    use chrono::Duration;

    fn overdue_invoice(now: DateTime<Utc>) -> Invoice {
        Invoice {
            id: InvoiceId::new(),
            client_id: ClientId::new(),
            number: "F-2024-001".to_string(),
            status: InvoiceStatus::Unpaid,
            issue_date: now - Duration::days(31),
            due_date: now - Duration::days(1),
            created_at: now - Duration::days(31),
        }
    }

    async fn seed_scheduled(store: &InMemoryFollowUpStore, entity: EntityRef) {
        let mut record = FollowUp::new(
            entity,
            FollowUpType::Overdue,
            1,
            Utc::now(),
            3,
            "invoice_overdue",
        );
        record.schedule();
        store
            .insert_if_absent(&record)
            .await
            .unwrap_or_else(|e| panic!("seed insert failed: {e}"));
    }

    #[tokio::test]
    async fn stops_active_records_and_files_event() {
        let store = InMemoryFollowUpStore::new();
        let entity = EntityRef::Invoice(InvoiceId::new());
        seed_scheduled(&store, entity).await;

        let stopped = stop_for_entity(&store, entity, "paid")
            .await
            .unwrap_or_else(|e| panic!("stop failed: {e}"));
        assert_eq!(stopped, 1);

        let records = store.records();
        assert_eq!(records[0].status, FollowUpStatus::Stopped);

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "entity_finalized");
        assert_eq!(events[0].final_status, "paid");
        assert_eq!(events[0].stopped_count, 1);
    }

    #[tokio::test]
    async fn stopping_quiet_entity_is_a_no_op() {
        let store = InMemoryFollowUpStore::new();
        let entity = EntityRef::Invoice(InvoiceId::new());

        let stopped = stop_for_entity(&store, entity, "paid")
            .await
            .unwrap_or_else(|e| panic!("stop failed: {e}"));
        assert_eq!(stopped, 0);
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn sweep_stops_entities_that_turned_terminal() {
        let now = Utc::now();
        let store = InMemoryFollowUpStore::new();
        let gateway = InMemoryEntityGateway::new();

        let paid = overdue_invoice(now);
        let still_open = overdue_invoice(now);
        gateway.add_invoice(paid.clone());
        gateway.add_invoice(still_open.clone());
        seed_scheduled(&store, EntityRef::Invoice(paid.id)).await;
        seed_scheduled(&store, EntityRef::Invoice(still_open.id)).await;

        gateway.set_invoice_status(paid.id, InvoiceStatus::Paid);

        let summary = run_sweep(&store, &gateway)
            .await
            .unwrap_or_else(|e| panic!("sweep failed: {e}"));
        assert_eq!(summary.stopped, 1);
        assert_eq!(summary.errors, 0);
        assert!(summary.has_changes());

        let records = store.records();
        let stopped = records
            .iter()
            .find(|r| r.entity == EntityRef::Invoice(paid.id))
            .unwrap();
        assert_eq!(stopped.status, FollowUpStatus::Stopped);
        let open = records
            .iter()
            .find(|r| r.entity == EntityRef::Invoice(still_open.id))
            .unwrap();
        assert_eq!(open.status, FollowUpStatus::Scheduled);
    }

    #[tokio::test]
    async fn sweep_counts_missing_entities_as_errors() {
        let store = InMemoryFollowUpStore::new();
        let gateway = InMemoryEntityGateway::new();
        seed_scheduled(&store, EntityRef::Invoice(InvoiceId::new())).await;

        let summary = run_sweep(&store, &gateway)
            .await
            .unwrap_or_else(|e| panic!("sweep failed: {e}"));
        assert_eq!(summary.stopped, 0);
        assert_eq!(summary.errors, 1);
    }
}
