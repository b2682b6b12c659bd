//! The follow-up engine façade.
//!
//! Wires the storage ports, rule configuration, template resolution, and
//! the notification sink behind the operations the application calls: the
//! periodic batch run and the targeted per-invoice actions.

use crate::cleanup::{self, CleanupSummary};
use crate::delivery::{self, DeliverySummary};
use crate::dispatch::{self, DispatchOutcome, DispatchSummary};
use crate::entity::{EntityKind, EntityRef};
use crate::error::{EngineError, PassError, RuleError};
use crate::progression::{self, ProgressionSummary};
use crate::record::FollowUp;
use crate::rule::{FollowUpRule, RuleSet};
use crate::sink::NotificationSink;
use crate::store::{EntityGateway, FollowUpStore, RuleStore};
use crate::template::TemplateResolver;
use billhound_core::{InvoiceId, QuoteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Combined result of one batch invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Dispatch pass counters.
    pub dispatch: DispatchSummary,
    /// Delivery pass counters.
    pub delivery: DeliverySummary,
    /// Progression pass counters.
    pub progression: ProgressionSummary,
    /// Cleanup sweep counters.
    pub cleanup: CleanupSummary,
}

impl BatchReport {
    /// Returns whether any pass changed a record.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.dispatch.has_changes()
            || self.delivery.has_changes()
            || self.progression.has_changes()
            || self.cleanup.has_changes()
    }
}

/// The follow-up engine.
///
/// Stateless between invocations; every decision derives from the persisted
/// follow-up records, so any number of overlapping runs stay consistent.
pub struct FollowUpEngine<S, G, R, T, N>
where
    S: FollowUpStore,
    G: EntityGateway,
    R: RuleStore,
    T: TemplateResolver,
    N: NotificationSink,
{
    store: S,
    gateway: G,
    rules: R,
    templates: T,
    sink: N,
    defaults: RuleSet,
}

impl<S, G, R, T, N> FollowUpEngine<S, G, R, T, N>
where
    S: FollowUpStore,
    G: EntityGateway,
    R: RuleStore,
    T: TemplateResolver,
    N: NotificationSink,
{
    /// Creates an engine with the built-in rule defaults.
    pub fn new(store: S, gateway: G, rules: R, templates: T, sink: N) -> Self {
        Self {
            store,
            gateway,
            rules,
            templates,
            sink,
            defaults: RuleSet::built_in(),
        }
    }

    /// Replaces the fallback rules used when none are configured.
    #[must_use]
    pub fn with_rule_defaults(mut self, defaults: RuleSet) -> Self {
        self.defaults = defaults;
        self
    }

    /// Runs the dispatch, delivery, progression, and cleanup passes once.
    ///
    /// Safe to invoke on any schedule, including concurrently with an
    /// overrunning previous batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PassFailed`] when a pass-level operation
    /// fails. Per-entity failures stay inside the report counters.
    #[instrument(skip(self))]
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchReport, EngineError> {
        let rules = self
            .resolved_rules()
            .await
            .map_err(|e| EngineError::PassFailed {
                pass: "rules",
                reason: e.to_string(),
            })?;

        let dispatch = dispatch::run(&self.store, &self.gateway, &self.templates, &rules, now)
            .await
            .map_err(|e| pass_failed("dispatch", e))?;
        let delivery = delivery::run(&self.store, &self.gateway, &self.sink, now)
            .await
            .map_err(|e| pass_failed("delivery", e))?;
        let progression = progression::run(&self.store, &self.gateway, &rules, now)
            .await
            .map_err(|e| pass_failed("progression", e))?;
        let cleanup = cleanup::run_sweep(&self.store, &self.gateway)
            .await
            .map_err(|e| pass_failed("cleanup", e))?;

        let report = BatchReport {
            dispatch,
            delivery,
            progression,
            cleanup,
        };
        if report.has_changes() {
            info!(
                created = report.dispatch.created,
                rescheduled = report.dispatch.rescheduled,
                delivered = report.delivery.delivered,
                advanced = report.progression.advanced,
                completed = report.progression.completed,
                swept = report.cleanup.stopped,
                "batch run finished"
            );
        } else {
            debug!(
                evaluated = report.dispatch.evaluated,
                "batch run finished with no changes"
            );
        }
        Ok(report)
    }

    /// Runs the initial follow-up flow for exactly one invoice.
    ///
    /// Called by the application right after an invoice becomes payable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvoiceNotFound`] for an unknown invoice and
    /// [`EngineError::StorageFailed`] when the flow cannot complete.
    #[instrument(skip(self))]
    pub async fn followup_for_invoice(
        &self,
        id: InvoiceId,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, EngineError> {
        let invoice = self
            .gateway
            .find_invoice(id)
            .await
            .map_err(storage_failed)?
            .ok_or(EngineError::InvoiceNotFound { id })?;
        let rule = self
            .domain_rule(EntityKind::Invoice)
            .await
            .map_err(storage_failed)?;
        dispatch::dispatch_one_invoice(
            &self.store,
            &self.gateway,
            &self.templates,
            invoice,
            &rule,
            now,
            false,
        )
        .await
        .map_err(storage_failed)
    }

    /// Stops all follow-ups for a finalized invoice.
    ///
    /// Returns how many records were stopped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] when the invoice is not in a
    /// terminal status; nothing is mutated in that case.
    #[instrument(skip(self))]
    pub async fn cleanup_invoice(&self, id: InvoiceId) -> Result<u64, EngineError> {
        let invoice = self
            .gateway
            .find_invoice(id)
            .await
            .map_err(storage_failed)?
            .ok_or(EngineError::InvoiceNotFound { id })?;
        if !invoice.status.is_terminal() {
            return Err(EngineError::InvalidRequest {
                reason: format!(
                    "invoice {id} is not finalized (status: {})",
                    invoice.status.as_str()
                ),
            });
        }
        cleanup::stop_for_entity(&self.store, EntityRef::Invoice(id), invoice.status.as_str())
            .await
            .map_err(storage_failed)
    }

    /// Stops all follow-ups for a finalized quote.
    ///
    /// Returns how many records were stopped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] when the quote is not in a
    /// terminal status; nothing is mutated in that case.
    #[instrument(skip(self))]
    pub async fn cleanup_quote(&self, id: QuoteId) -> Result<u64, EngineError> {
        let quote = self
            .gateway
            .find_quote(id)
            .await
            .map_err(storage_failed)?
            .ok_or(EngineError::QuoteNotFound { id })?;
        if !quote.status.is_terminal() {
            return Err(EngineError::InvalidRequest {
                reason: format!(
                    "quote {id} is not finalized (status: {})",
                    quote.status.as_str()
                ),
            });
        }
        cleanup::stop_for_entity(&self.store, EntityRef::Quote(id), quote.status.as_str())
            .await
            .map_err(storage_failed)
    }

    /// All follow-up records for one entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StorageFailed`] when the read fails.
    pub async fn followups_for_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Vec<FollowUp>, EngineError> {
        self.store
            .list_for_entity(entity)
            .await
            .map_err(storage_failed)
    }

    async fn resolved_rules(&self) -> Result<RuleSet, RuleError> {
        Ok(RuleSet {
            quote: self.domain_rule(EntityKind::Quote).await?,
            invoice: self.domain_rule(EntityKind::Invoice).await?,
        })
    }

    async fn domain_rule(&self, domain: EntityKind) -> Result<FollowUpRule, RuleError> {
        match self.rules.rule_for(domain).await? {
            Some(rule) => match rule.validate() {
                Ok(()) => Ok(rule),
                Err(error) => {
                    warn!(%domain, %error, "configured rule is invalid, using defaults");
                    Ok(self.defaults.for_domain(domain).clone())
                }
            },
            None => Ok(self.defaults.for_domain(domain).clone()),
        }
    }
}

fn pass_failed(pass: &'static str, error: PassError) -> EngineError {
    EngineError::PassFailed {
        pass,
        reason: error.to_string(),
    }
}

fn storage_failed(error: impl std::fmt::Display) -> EngineError {
    EngineError::StorageFailed {
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Invoice, InvoiceStatus, Quote, QuoteStatus};
    use crate::memory::{
        InMemoryEntityGateway, InMemoryFollowUpStore, InMemoryRuleStore, RecordingSink,
    };
    use crate::record::{FollowUpStatus, FollowUpType};
    use crate::template::StaticTemplates;
    use billhound_core::ClientId;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    type TestEngine = FollowUpEngine<
        InMemoryFollowUpStore,
        InMemoryEntityGateway,
        InMemoryRuleStore,
        StaticTemplates,
        RecordingSink,
    >;

    struct Harness {
        engine: TestEngine,
        store: InMemoryFollowUpStore,
        gateway: InMemoryEntityGateway,
        rules: InMemoryRuleStore,
        sink: RecordingSink,
        client_id: ClientId,
    }

    impl Harness {
        fn new() -> Self {
            let store = InMemoryFollowUpStore::new();
            let gateway = InMemoryEntityGateway::new();
            let rules = InMemoryRuleStore::new();
            let sink = RecordingSink::new();
            let client_id = ClientId::new();
            gateway.add_client(client_id, "Acme SARL");

            let engine = FollowUpEngine::new(
                store.clone(),
                gateway.clone(),
                rules.clone(),
                StaticTemplates::builtin(),
                sink.clone(),
            );
            Self {
                engine,
                store,
                gateway,
                rules,
                sink,
                client_id,
            }
        }

        fn quote(&self, status: QuoteStatus, sent_at: Option<DateTime<Utc>>) -> Quote {
            Quote {
                id: billhound_core::QuoteId::new(),
                client_id: self.client_id,
                number: "Q-2024-007".to_string(),
                status,
                sent_at,
                valid_until: None,
                created_at: Utc::now(),
            }
        }

        fn invoice(&self, status: InvoiceStatus, due_date: DateTime<Utc>) -> Invoice {
            Invoice {
                id: InvoiceId::new(),
                client_id: self.client_id,
                number: "F-2024-042".to_string(),
                status,
                issue_date: due_date - Duration::days(30),
                due_date,
                created_at: due_date - Duration::days(30),
            }
        }

        async fn batch(&self, now: DateTime<Utc>) -> BatchReport {
            self.engine
                .run_batch(now)
                .await
                .unwrap_or_else(|e| panic!("batch failed: {e}"))
        }
    }

    #[tokio::test]
    async fn overdue_invoice_climbs_the_ladder() {
        let harness = Harness::new();
        let due = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        harness
            .gateway
            .add_invoice(harness.invoice(InvoiceStatus::Unpaid, due));

        // One day past due: the stage-1 record is created and delivered.
        let report = harness.batch(due + Duration::days(1)).await;
        assert_eq!(report.dispatch.created, 1);
        assert_eq!(report.delivery.delivered, 1);

        let record = &harness.store.records()[0];
        assert_eq!(record.follow_up_type, FollowUpType::Overdue);
        assert_eq!(record.stage, 1);
        assert_eq!(record.status, FollowUpStatus::Sent);
        assert_eq!(record.scheduled_at, due + Duration::days(1));

        // Day two requeues the same record and spends the second attempt.
        let report = harness.batch(due + Duration::days(2)).await;
        assert_eq!(report.dispatch.created, 0);
        assert_eq!(report.dispatch.rescheduled, 1);
        assert_eq!(report.delivery.delivered, 1);
        assert_eq!(harness.store.records()[0].attempts, 2);

        // Day three exhausts stage 1 and escalates, anchored to the due
        // date.
        let report = harness.batch(due + Duration::days(3)).await;
        assert_eq!(report.delivery.delivered, 1);
        assert_eq!(report.progression.advanced, 1);

        let record = &harness.store.records()[0];
        assert_eq!(record.stage, 2);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.status, FollowUpStatus::Scheduled);
        assert_eq!(record.scheduled_at, due + Duration::days(3));

        // Daily batches alone walk the rest of the ladder and stay quiet
        // once it finishes.
        for day in 4..=30 {
            harness.batch(due + Duration::days(day)).await;
        }

        let records = harness.store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.stage, 3);
        assert_eq!(record.status, FollowUpStatus::AllStagesCompleted);
        assert_eq!(record.scheduled_at, due + Duration::days(7));
        // Three attempts per stage, three stages.
        assert_eq!(harness.sink.messages().len(), 9);
    }

    #[tokio::test]
    async fn repeated_batches_keep_one_record_per_key() {
        let harness = Harness::new();
        let now = Utc::now();
        harness
            .gateway
            .add_quote(harness.quote(QuoteStatus::Sent, Some(now - Duration::days(4))));
        harness
            .gateway
            .add_quote(harness.quote(QuoteStatus::Viewed, Some(now - Duration::days(1))));

        let first = harness.batch(now).await;
        assert_eq!(first.dispatch.created, 2);

        // Later passes retry the delivered records instead of duplicating
        // them.
        let second = harness.batch(now + Duration::minutes(5)).await;
        assert_eq!(second.dispatch.created, 0);
        assert_eq!(second.dispatch.rescheduled, 2);

        let records = harness.store.records();
        assert_eq!(records.len(), 2);
        let keys: std::collections::HashSet<_> = records
            .iter()
            .map(|r| (r.entity, r.follow_up_type))
            .collect();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn viewed_quote_nudge_goes_out_in_the_same_batch() {
        let harness = Harness::new();
        let now = Utc::now();
        harness
            .gateway
            .add_quote(harness.quote(QuoteStatus::Viewed, Some(now - Duration::hours(2))));

        let report = harness.batch(now).await;
        assert_eq!(report.dispatch.created, 1);
        assert_eq!(report.delivery.delivered, 1);

        let messages = harness.sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].subject.contains("Q-2024-007"));

        // A minute later the nudge retries on the same record; no sibling
        // is created.
        let report = harness.batch(now + Duration::minutes(1)).await;
        assert_eq!(report.dispatch.created, 0);
        assert_eq!(report.dispatch.rescheduled, 1);
        assert_eq!(harness.store.records().len(), 1);
        assert_eq!(harness.sink.messages().len(), 2);
    }

    #[tokio::test]
    async fn paid_invoice_is_stopped_and_never_recreated() {
        let harness = Harness::new();
        // Just past midnight: the invoice is one day overdue but its stage-1
        // trigger still sits later today, so the record stays scheduled.
        let now = Utc.with_ymd_and_hms(2024, 3, 16, 0, 30, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2024, 3, 15, 23, 0, 0).unwrap();
        let invoice = harness.invoice(InvoiceStatus::Unpaid, due);
        harness.gateway.add_invoice(invoice.clone());

        let report = harness.batch(now).await;
        assert_eq!(report.dispatch.created, 1);
        assert_eq!(report.delivery.delivered, 0);
        assert!(report.has_changes());
        assert_eq!(harness.store.records()[0].status, FollowUpStatus::Scheduled);

        harness
            .gateway
            .set_invoice_status(invoice.id, InvoiceStatus::Paid);
        let stopped = harness
            .engine
            .cleanup_invoice(invoice.id)
            .await
            .unwrap_or_else(|e| panic!("cleanup failed: {e}"));
        assert_eq!(stopped, 1);

        let events = harness.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].final_status, "paid");

        // Later batches neither recreate nor deliver anything.
        let report = harness.batch(now + Duration::days(2)).await;
        assert_eq!(report.dispatch.created, 0);
        assert!(!report.has_changes());
        assert!(harness.sink.messages().is_empty());
        assert_eq!(harness.store.records().len(), 1);
        assert_eq!(harness.store.records()[0].status, FollowUpStatus::Stopped);
    }

    #[tokio::test]
    async fn cleanup_of_open_invoice_is_rejected() {
        let harness = Harness::new();
        let now = Utc::now();
        let invoice = harness.invoice(InvoiceStatus::Unpaid, now + Duration::days(10));
        harness.gateway.add_invoice(invoice.clone());

        let err = harness
            .engine
            .cleanup_invoice(invoice.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest { .. }));
        assert!(err.to_string().contains("unpaid"));
    }

    #[tokio::test]
    async fn cleanup_of_rejected_quote_stops_its_followups() {
        let harness = Harness::new();
        let now = Utc::now();
        let quote = harness.quote(QuoteStatus::Sent, Some(now - Duration::days(2)));
        harness.gateway.add_quote(quote.clone());

        let mut record = FollowUp::new(
            EntityRef::Quote(quote.id),
            FollowUpType::NotViewed,
            2,
            now + Duration::hours(4),
            3,
            "quote_not_viewed",
        );
        record.schedule();
        harness
            .store
            .insert_if_absent(&record)
            .await
            .unwrap_or_else(|e| panic!("seed insert failed: {e}"));

        harness
            .gateway
            .set_quote_status(quote.id, QuoteStatus::Rejected);
        let stopped = harness
            .engine
            .cleanup_quote(quote.id)
            .await
            .unwrap_or_else(|e| panic!("cleanup failed: {e}"));
        assert_eq!(stopped, 1);
        assert_eq!(harness.store.records()[0].status, FollowUpStatus::Stopped);
        assert_eq!(harness.store.events()[0].final_status, "rejected");
    }

    #[tokio::test]
    async fn targeted_followup_reports_missing_invoice() {
        let harness = Harness::new();
        let id = InvoiceId::new();
        let err = harness
            .engine
            .followup_for_invoice(id, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::InvoiceNotFound { id });
    }

    #[tokio::test]
    async fn targeted_followup_creates_then_noops() {
        let harness = Harness::new();
        let now = Utc::now();
        let invoice = harness.invoice(InvoiceStatus::Unpaid, now - Duration::days(1));
        harness.gateway.add_invoice(invoice.clone());

        let outcome = harness
            .engine
            .followup_for_invoice(invoice.id, now)
            .await
            .unwrap_or_else(|e| panic!("targeted followup failed: {e}"));
        assert_eq!(outcome, DispatchOutcome::Created);
        assert!(!harness.store.records()[0].meta.automated);

        let outcome = harness
            .engine
            .followup_for_invoice(invoice.id, now)
            .await
            .unwrap_or_else(|e| panic!("targeted followup failed: {e}"));
        assert_eq!(outcome, DispatchOutcome::AlreadyTracked);
    }

    #[tokio::test]
    async fn configured_rules_override_defaults() {
        let harness = Harness::new();
        let now = Utc::now();
        harness.rules.set_rule(FollowUpRule {
            domain: EntityKind::Quote,
            max_stages: 3,
            stage_delays: vec![0, 5, 9],
            max_attempts_per_stage: 2,
            approaching_deadline_days: None,
            instant_view_followup: false,
            template_ids: BTreeMap::new(),
        });

        harness
            .gateway
            .add_quote(harness.quote(QuoteStatus::Sent, Some(now - Duration::days(4))));
        harness
            .gateway
            .add_quote(harness.quote(QuoteStatus::Sent, Some(now - Duration::days(6))));

        let report = harness.batch(now).await;
        assert_eq!(report.dispatch.created, 1);
        assert_eq!(harness.store.records()[0].max_attempts, 2);
    }

    #[tokio::test]
    async fn invalid_configured_rule_falls_back_to_defaults() {
        let harness = Harness::new();
        let now = Utc::now();
        harness.rules.set_rule(FollowUpRule {
            domain: EntityKind::Quote,
            max_stages: 3,
            stage_delays: vec![0],
            max_attempts_per_stage: 9,
            approaching_deadline_days: None,
            instant_view_followup: true,
            template_ids: BTreeMap::new(),
        });

        harness
            .gateway
            .add_quote(harness.quote(QuoteStatus::Sent, Some(now - Duration::days(4))));

        let report = harness.batch(now).await;
        assert_eq!(report.dispatch.created, 1);
        // Default rule attributes, not the invalid row's.
        assert_eq!(harness.store.records()[0].max_attempts, 3);
    }

    #[tokio::test]
    async fn finished_ladder_stays_finished() {
        let harness = Harness::new();
        let now = Utc::now();
        let invoice = harness.invoice(InvoiceStatus::Overdue, now - Duration::days(15));
        harness.gateway.add_invoice(invoice.clone());

        let mut record = FollowUp::new(
            EntityRef::Invoice(invoice.id),
            FollowUpType::Overdue,
            3,
            now - Duration::days(1),
            3,
            "invoice_overdue",
        );
        record.schedule();
        for _ in 0..3 {
            record.record_attempt();
        }
        record.mark_sent();
        harness
            .store
            .insert_if_absent(&record)
            .await
            .unwrap_or_else(|e| panic!("seed insert failed: {e}"));

        let report = harness.batch(now).await;
        assert_eq!(report.progression.completed, 1);
        let record = &harness.store.records()[0];
        assert_eq!(record.status, FollowUpStatus::AllStagesCompleted);
        assert_eq!(record.stage, 3);

        // No new ladder starts for the same key.
        let report = harness.batch(now + Duration::days(1)).await;
        assert_eq!(report.dispatch.created, 0);
        assert_eq!(harness.store.records().len(), 1);
    }

    #[tokio::test]
    async fn batch_report_serializes_for_the_api() {
        let report = BatchReport::default();
        let json = serde_json::to_value(&report)
            .unwrap_or_else(|e| panic!("serialization failed: {e}"));
        assert!(json.get("dispatch").is_some());
        assert!(json.get("cleanup").is_some());
    }
}
