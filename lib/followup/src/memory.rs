//! In-memory implementations of the storage ports.
//!
//! Mutex-guarded vectors and maps behind the same traits the relational
//! store implements. The engine's tests run entirely on these; they also
//! serve as a throwaway backend for local experiments.

use crate::cleanup::FollowUpEvent;
use crate::entity::{EntityKind, EntityRef, Invoice, InvoiceStatus, Quote, QuoteStatus};
use crate::error::{GatewayError, RuleError, SinkError, StoreError};
use crate::record::{FollowUp, FollowUpStatus, FollowUpType};
use crate::rule::FollowUpRule;
use crate::sink::{NotificationMessage, NotificationSink};
use crate::store::{EntityGateway, FollowUpStore, InsertOutcome, RuleStore};
use async_trait::async_trait;
use billhound_core::{ClientId, InvoiceId, QuoteId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory follow-up store.
///
/// Clones share the same underlying data, so a test can hand a clone to the
/// engine and inspect state through its own handle afterwards.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFollowUpStore {
    records: Arc<Mutex<Vec<FollowUp>>>,
    events: Arc<Mutex<Vec<FollowUpEvent>>>,
}

impl InMemoryFollowUpStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<FollowUp> {
        lock(&self.records).clone()
    }

    /// Snapshot of all lifecycle events.
    #[must_use]
    pub fn events(&self) -> Vec<FollowUpEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl FollowUpStore for InMemoryFollowUpStore {
    async fn insert_if_absent(&self, record: &FollowUp) -> Result<InsertOutcome, StoreError> {
        let mut records = lock(&self.records);
        let conflict = records.iter().any(|existing| {
            existing.entity == record.entity
                && existing.follow_up_type == record.follow_up_type
                && existing.status.is_active()
        });
        if conflict {
            return Ok(InsertOutcome::AlreadyActive);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn find_latest(
        &self,
        entity: EntityRef,
        follow_up_type: FollowUpType,
    ) -> Result<Option<FollowUp>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .rev()
            .find(|r| r.entity == entity && r.follow_up_type == follow_up_type)
            .cloned())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<FollowUp>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect())
    }

    async fn list_sent(&self) -> Result<Vec<FollowUp>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.status == FollowUpStatus::Sent)
            .cloned()
            .collect())
    }

    async fn list_for_entity(&self, entity: EntityRef) -> Result<Vec<FollowUp>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.entity == entity)
            .cloned()
            .collect())
    }

    async fn list_active_entities(&self) -> Result<Vec<EntityRef>, StoreError> {
        let records = lock(&self.records);
        let mut entities = Vec::new();
        for record in records.iter() {
            if record.status.is_active() && !entities.contains(&record.entity) {
                entities.push(record.entity);
            }
        }
        Ok(entities)
    }

    async fn update(&self, record: &FollowUp) -> Result<(), StoreError> {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound { id: record.id }),
        }
    }

    async fn stop_active_for_entity(&self, entity: EntityRef) -> Result<u64, StoreError> {
        let mut records = lock(&self.records);
        let mut stopped = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.entity == entity && r.status.is_active())
        {
            record.stop();
            stopped += 1;
        }
        Ok(stopped)
    }

    async fn record_event(&self, event: &FollowUpEvent) -> Result<(), StoreError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// In-memory entity gateway.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityGateway {
    quotes: Arc<Mutex<Vec<Quote>>>,
    invoices: Arc<Mutex<Vec<Invoice>>>,
    clients: Arc<Mutex<HashMap<ClientId, String>>>,
}

impl InMemoryEntityGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client display name.
    pub fn add_client(&self, id: ClientId, name: impl Into<String>) {
        lock(&self.clients).insert(id, name.into());
    }

    /// Adds a quote.
    pub fn add_quote(&self, quote: Quote) {
        lock(&self.quotes).push(quote);
    }

    /// Adds an invoice.
    pub fn add_invoice(&self, invoice: Invoice) {
        lock(&self.invoices).push(invoice);
    }

    /// Changes a quote's status, as the business application would.
    pub fn set_quote_status(&self, id: QuoteId, status: QuoteStatus) {
        if let Some(quote) = lock(&self.quotes).iter_mut().find(|q| q.id == id) {
            quote.status = status;
        }
    }

    /// Changes an invoice's status, as the business application would.
    pub fn set_invoice_status(&self, id: InvoiceId, status: InvoiceStatus) {
        if let Some(invoice) = lock(&self.invoices).iter_mut().find(|i| i.id == id) {
            invoice.status = status;
        }
    }
}

#[async_trait]
impl EntityGateway for InMemoryEntityGateway {
    async fn list_candidate_quotes(&self) -> Result<Vec<Quote>, GatewayError> {
        Ok(lock(&self.quotes)
            .iter()
            .filter(|q| matches!(q.status, QuoteStatus::Sent | QuoteStatus::Viewed))
            .cloned()
            .collect())
    }

    async fn list_candidate_invoices(&self) -> Result<Vec<Invoice>, GatewayError> {
        Ok(lock(&self.invoices)
            .iter()
            .filter(|i| matches!(i.status, InvoiceStatus::Unpaid | InvoiceStatus::Overdue))
            .cloned()
            .collect())
    }

    async fn find_quote(&self, id: QuoteId) -> Result<Option<Quote>, GatewayError> {
        Ok(lock(&self.quotes).iter().find(|q| q.id == id).cloned())
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, GatewayError> {
        Ok(lock(&self.invoices).iter().find(|i| i.id == id).cloned())
    }

    async fn client_name(&self, id: ClientId) -> Result<String, GatewayError> {
        lock(&self.clients)
            .get(&id)
            .cloned()
            .ok_or(GatewayError::ClientNotFound { id })
    }
}

/// In-memory rule store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<Mutex<HashMap<EntityKind, FollowUpRule>>>,
}

impl InMemoryRuleStore {
    /// Creates a store with no configured rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule for its domain.
    pub fn set_rule(&self, rule: FollowUpRule) {
        lock(&self.rules).insert(rule.domain, rule);
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn rule_for(&self, domain: EntityKind) -> Result<Option<FollowUpRule>, RuleError> {
        Ok(lock(&self.rules).get(&domain).cloned())
    }
}

/// Notification sink that records accepted messages.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<NotificationMessage>>>,
    next_error: Arc<Mutex<Option<SinkError>>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of accepted messages, in send order.
    #[must_use]
    pub fn messages(&self) -> Vec<NotificationMessage> {
        lock(&self.messages).clone()
    }

    /// Makes the next send fail with `error`. One-shot; later sends succeed.
    pub fn fail_next(&self, error: SinkError) {
        *lock(&self.next_error) = Some(error);
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &NotificationMessage) -> Result<(), SinkError> {
        if let Some(error) = lock(&self.next_error).take() {
            return Err(error);
        }
        lock(&self.messages).push(message.clone());
        Ok(())
    }
}
