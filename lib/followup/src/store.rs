//! Storage and gateway ports.
//!
//! The engine reaches the outside world through three traits: its own
//! follow-up store, a read-only gateway to the business entities, and the
//! rule store. Production wires these to a relational database; tests use
//! the in-memory doubles from [`crate::memory`].

use crate::cleanup::FollowUpEvent;
use crate::entity::{EntityKind, EntityRef, Invoice, Quote, TrackedEntity};
use crate::error::{GatewayError, RuleError, StoreError};
use crate::record::{FollowUp, FollowUpType};
use crate::rule::FollowUpRule;
use async_trait::async_trait;
use billhound_core::{ClientId, InvoiceId, QuoteId};
use chrono::{DateTime, Utc};

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No active record existed; the new row was persisted.
    Inserted,
    /// An active record for the same key already exists; nothing was
    /// written. Under concurrent passes this is the losing writer's view of
    /// a uniqueness conflict, treated as success.
    AlreadyActive,
}

/// Persistence for follow-up records and their lifecycle events.
#[async_trait]
pub trait FollowUpStore: Send + Sync {
    /// Inserts `record` unless an active row already exists for its
    /// `(entity, follow_up_type)` key.
    ///
    /// The check and the write must be one atomic operation at the storage
    /// layer, otherwise two overlapping passes can both insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the write fails.
    async fn insert_if_absent(&self, record: &FollowUp) -> Result<InsertOutcome, StoreError>;

    /// Most recent record for an `(entity, type)` key, any status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the read fails.
    async fn find_latest(
        &self,
        entity: EntityRef,
        follow_up_type: FollowUpType,
    ) -> Result<Option<FollowUp>, StoreError>;

    /// Scheduled records whose trigger time is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the read fails.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<FollowUp>, StoreError>;

    /// Records whose notification the sink has accepted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the read fails.
    async fn list_sent(&self) -> Result<Vec<FollowUp>, StoreError>;

    /// All records for one entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the read fails.
    async fn list_for_entity(&self, entity: EntityRef) -> Result<Vec<FollowUp>, StoreError>;

    /// Entities that currently hold at least one active record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the read fails.
    async fn list_active_entities(&self) -> Result<Vec<EntityRef>, StoreError>;

    /// Persists the record's current state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row exists for the record's
    /// ID, and [`StoreError::StorageFailed`] when the write fails.
    async fn update(&self, record: &FollowUp) -> Result<(), StoreError>;

    /// Stops every active record for an entity, returning how many changed.
    ///
    /// Stopping an entity with no active records is a no-op returning zero.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the write fails.
    async fn stop_active_for_entity(&self, entity: EntityRef) -> Result<u64, StoreError>;

    /// Appends a lifecycle event to the audit trail.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailed`] when the write fails.
    async fn record_event(&self, event: &FollowUpEvent) -> Result<(), StoreError>;
}

/// Read-only access to the business entities the engine tracks.
///
/// Entities are owned and mutated by the surrounding application; the
/// engine never writes through this trait.
#[async_trait]
pub trait EntityGateway: Send + Sync {
    /// Quotes in a status that can still warrant a follow-up.
    ///
    /// The coarse pre-filter: sent or viewed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StorageFailed`] when the read fails.
    async fn list_candidate_quotes(&self) -> Result<Vec<Quote>, GatewayError>;

    /// Invoices in a status that can still warrant a follow-up.
    ///
    /// The coarse pre-filter: unpaid or overdue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StorageFailed`] when the read fails.
    async fn list_candidate_invoices(&self) -> Result<Vec<Invoice>, GatewayError>;

    /// Looks up one quote.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StorageFailed`] when the read fails.
    async fn find_quote(&self, id: QuoteId) -> Result<Option<Quote>, GatewayError>;

    /// Looks up one invoice.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StorageFailed`] when the read fails.
    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, GatewayError>;

    /// Looks up any tracked entity by reference.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StorageFailed`] when the read fails.
    async fn find_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Option<TrackedEntity>, GatewayError> {
        match entity {
            EntityRef::Quote(id) => Ok(self.find_quote(id).await?.map(TrackedEntity::Quote)),
            EntityRef::Invoice(id) => {
                Ok(self.find_invoice(id).await?.map(TrackedEntity::Invoice))
            }
        }
    }

    /// Display name of a client, for message variables.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ClientNotFound`] when the client record is
    /// missing, and [`GatewayError::StorageFailed`] when the read fails.
    async fn client_name(&self, id: ClientId) -> Result<String, GatewayError>;
}

/// Read access to per-domain follow-up rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Configured rule for a domain, if one exists.
    ///
    /// Absence is not an error; the engine falls back to the built-in
    /// defaults injected at startup.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::StorageFailed`] when the read fails.
    async fn rule_for(&self, domain: EntityKind) -> Result<Option<FollowUpRule>, RuleError>;
}
