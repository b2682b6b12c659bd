//! Idempotent dispatch pass.
//!
//! One pass enumerates candidate entities, evaluates eligibility, creates
//! scheduled follow-ups where none exist, and puts delivered ones back on
//! the schedule until their stage's attempts are spent. Creation is
//! conditional on the uniqueness key: re-running a pass, or overlapping
//! passes, can never double-track an entity. One entity's failure is
//! logged and the pass moves on.

use crate::eligibility::evaluate;
use crate::entity::{EntityKind, Invoice, TrackedEntity};
use crate::error::{EntityError, PassError, TemplateError};
use crate::record::{FollowUp, FollowUpMeta, FollowUpStatus, FollowUpType};
use crate::rule::{FollowUpRule, RuleSet};
use crate::store::{EntityGateway, FollowUpStore, InsertOutcome};
use crate::template::{TemplateResolver, generic_template};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Entities evaluated.
    pub evaluated: u32,
    /// New follow-ups created.
    pub created: u32,
    /// Sent records put back on the schedule for their next attempt.
    pub rescheduled: u32,
    /// Entities skipped as ineligible or already tracked.
    pub skipped: u32,
    /// Entities whose processing failed.
    pub failed: u32,
}

impl DispatchSummary {
    /// Returns whether the pass created or requeued anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.created > 0 || self.rescheduled > 0
    }
}

/// Outcome of dispatching a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A new follow-up was created and scheduled.
    Created,
    /// A delivered follow-up went back on the schedule for its next
    /// attempt within the current stage.
    Rescheduled,
    /// The evaluator reported no eligibility.
    NotEligible,
    /// A follow-up already exists for this entity and trigger type.
    AlreadyTracked,
}

/// Runs one dispatch pass over all candidate entities.
///
/// # Errors
///
/// Returns [`PassError`] only when candidate listing fails; per-entity
/// errors are contained in the summary.
pub async fn run(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    templates: &impl TemplateResolver,
    rules: &RuleSet,
    now: DateTime<Utc>,
) -> Result<DispatchSummary, PassError> {
    let mut summary = DispatchSummary::default();

    let quote_rule = rules.for_domain(EntityKind::Quote);
    for quote in gateway.list_candidate_quotes().await? {
        let entity = TrackedEntity::Quote(quote);
        let outcome = dispatch_entity(store, gateway, templates, &entity, quote_rule, now, true)
            .await;
        tally(&mut summary, &entity, outcome);
    }

    let invoice_rule = rules.for_domain(EntityKind::Invoice);
    for invoice in gateway.list_candidate_invoices().await? {
        let entity = TrackedEntity::Invoice(invoice);
        let outcome = dispatch_entity(store, gateway, templates, &entity, invoice_rule, now, true)
            .await;
        tally(&mut summary, &entity, outcome);
    }

    Ok(summary)
}

/// Runs the dispatch flow for exactly one invoice.
///
/// Used by the application right after an invoice becomes payable, ahead of
/// the next batch pass. `automated` should be false for these caller-driven
/// invocations.
///
/// # Errors
///
/// Returns [`EntityError`] when lookup, template resolution, or persistence
/// fails for the invoice.
pub async fn dispatch_one_invoice(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    templates: &impl TemplateResolver,
    invoice: Invoice,
    rule: &FollowUpRule,
    now: DateTime<Utc>,
    automated: bool,
) -> Result<DispatchOutcome, EntityError> {
    dispatch_entity(
        store,
        gateway,
        templates,
        &TrackedEntity::Invoice(invoice),
        rule,
        now,
        automated,
    )
    .await
}

fn tally(
    summary: &mut DispatchSummary,
    entity: &TrackedEntity,
    outcome: Result<DispatchOutcome, EntityError>,
) {
    summary.evaluated += 1;
    match outcome {
        Ok(DispatchOutcome::Created) => summary.created += 1,
        Ok(DispatchOutcome::Rescheduled) => summary.rescheduled += 1,
        Ok(DispatchOutcome::NotEligible | DispatchOutcome::AlreadyTracked) => {
            summary.skipped += 1;
        }
        Err(error) => {
            warn!(entity = %entity.entity_ref(), %error, "dispatch failed for entity");
            summary.failed += 1;
        }
    }
}

async fn dispatch_entity(
    store: &impl FollowUpStore,
    gateway: &impl EntityGateway,
    templates: &impl TemplateResolver,
    entity: &TrackedEntity,
    rule: &FollowUpRule,
    now: DateTime<Utc>,
    automated: bool,
) -> Result<DispatchOutcome, EntityError> {
    let entity_ref = entity.entity_ref();

    // Escalated invoices keep their trigger arithmetic anchored to the
    // stage of the record already in flight, delivered or not.
    let active_overdue_stage = match entity {
        TrackedEntity::Invoice(_) => store
            .find_latest(entity_ref, FollowUpType::Overdue)
            .await?
            .filter(|r| r.status.is_active() || r.status == FollowUpStatus::Sent)
            .map(|r| r.stage),
        TrackedEntity::Quote(_) => None,
    };

    let Some(eligibility) = evaluate(entity, rule, now, active_overdue_stage) else {
        return Ok(DispatchOutcome::NotEligible);
    };

    // A sent record with attempts to spare goes back on the schedule for
    // delivery to spend the next one. Any other prior record blocks
    // creation: active records by the uniqueness invariant, terminal ones
    // because a finished ladder must not restart, and exhausted ones
    // because stage progression owns them.
    if let Some(mut existing) = store
        .find_latest(entity_ref, eligibility.follow_up_type)
        .await?
    {
        if existing.status == FollowUpStatus::Sent && !existing.attempts_exhausted() {
            existing.reschedule(eligibility.scheduled_at);
            store.update(&existing).await?;
            debug!(
                entity = %entity_ref,
                follow_up = %existing.id,
                stage = existing.stage,
                attempts = existing.attempts,
                "follow-up requeued for its next attempt"
            );
            return Ok(DispatchOutcome::Rescheduled);
        }
        debug!(
            entity = %entity_ref,
            follow_up = %existing.id,
            status = existing.status.as_str(),
            "follow-up already tracked"
        );
        return Ok(DispatchOutcome::AlreadyTracked);
    }

    let client_name = gateway.client_name(entity.client_id()).await?;

    let template_id = rule.template_id(eligibility.follow_up_type);
    let template = match templates.resolve(&template_id).await {
        Ok(template) => template,
        Err(TemplateError::Missing { template_id }) => {
            debug!(template_id, "template missing, using generic fallback");
            generic_template(entity.kind())
        }
        Err(error @ TemplateError::ResolverFailed { .. }) => return Err(error.into()),
    };

    let mut variables = HashMap::new();
    variables.insert("client_name".to_string(), client_name);
    match entity {
        TrackedEntity::Quote(quote) => {
            variables.insert("quote_number".to_string(), quote.number.clone());
        }
        TrackedEntity::Invoice(invoice) => {
            variables.insert("invoice_number".to_string(), invoice.number.clone());
            variables.insert(
                "due_date".to_string(),
                invoice.due_date.format("%Y-%m-%d").to_string(),
            );
        }
    }
    if let Some(days) = eligibility.days_overdue {
        variables.insert("days_overdue".to_string(), days.to_string());
    }
    if let Some(days) = eligibility.days_until_due {
        variables.insert("days_until_due".to_string(), days.to_string());
    }
    let rendered = template.render(&variables);

    let meta = FollowUpMeta {
        priority: eligibility.priority,
        automated,
        days_overdue: eligibility.days_overdue,
        days_until_due: eligibility.days_until_due,
        ..FollowUpMeta::default()
    };
    let mut record = FollowUp::new(
        entity_ref,
        eligibility.follow_up_type,
        eligibility.stage,
        eligibility.scheduled_at,
        rule.max_attempts_per_stage,
        template.id.clone(),
    )
    .with_message(rendered.subject, rendered.text, rendered.html)
    .with_meta(meta);
    record.schedule();

    match store.insert_if_absent(&record).await? {
        InsertOutcome::Inserted => {
            debug!(
                entity = %entity_ref,
                follow_up = %record.id,
                follow_up_type = %record.follow_up_type,
                stage = record.stage,
                "created follow-up"
            );
            Ok(DispatchOutcome::Created)
        }
        // Lost a race against a concurrent pass; their record stands.
        InsertOutcome::AlreadyActive => Ok(DispatchOutcome::AlreadyTracked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityRef, InvoiceStatus, Quote, QuoteStatus};
    use crate::memory::{InMemoryEntityGateway, InMemoryFollowUpStore};
    use crate::record::Priority;
    use crate::template::StaticTemplates;
    use billhound_core::{ClientId, InvoiceId, QuoteId};
    use chrono::Duration;

    struct Fixture {
        store: InMemoryFollowUpStore,
        gateway: InMemoryEntityGateway,
        templates: StaticTemplates,
        rules: RuleSet,
        client_id: ClientId,
    }

    impl Fixture {
        fn new() -> Self {
            let gateway = InMemoryEntityGateway::new();
            let client_id = ClientId::new();
            gateway.add_client(client_id, "Acme SARL");
            Self {
                store: InMemoryFollowUpStore::new(),
                gateway,
                templates: StaticTemplates::builtin(),
                rules: RuleSet::built_in(),
                client_id,
            }
        }

        fn quote(&self, status: QuoteStatus, sent_at: Option<DateTime<Utc>>) -> Quote {
            Quote {
                id: QuoteId::new(),
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

        async fn run(&self, now: DateTime<Utc>) -> DispatchSummary {
            run(&self.store, &self.gateway, &self.templates, &self.rules, now)
                .await
                .unwrap_or_else(|e| panic!("dispatch pass failed: {e}"))
        }
    }

    #[tokio::test]
    async fn creates_scheduled_followup_for_aged_quote() {
        let fixture = Fixture::new();
        let now = Utc::now();
        fixture
            .gateway
            .add_quote(fixture.quote(QuoteStatus::Sent, Some(now - Duration::days(4))));

        let summary = fixture.run(now).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 0);

        let records = fixture.store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.follow_up_type, FollowUpType::NotViewed);
        assert_eq!(record.stage, 2);
        assert_eq!(record.status, FollowUpStatus::Scheduled);
        assert_eq!(record.scheduled_at, now);
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.attempts, 0);
        assert!(record.subject.contains("Q-2024-007"));
        assert!(record.body_text.contains("Acme SARL"));
        assert!(record.meta.automated);
        assert_eq!(record.meta.priority, Priority::High);
    }

    #[tokio::test]
    async fn repeated_passes_never_duplicate() {
        let fixture = Fixture::new();
        let now = Utc::now();
        fixture
            .gateway
            .add_quote(fixture.quote(QuoteStatus::Viewed, Some(now - Duration::days(1))));

        let first = fixture.run(now).await;
        assert_eq!(first.created, 1);

        let second = fixture.run(now + Duration::minutes(1)).await;
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(fixture.store.records().len(), 1);
    }

    #[tokio::test]
    async fn fresh_sent_quote_is_not_yet_eligible() {
        let fixture = Fixture::new();
        let now = Utc::now();
        fixture
            .gateway
            .add_quote(fixture.quote(QuoteStatus::Sent, Some(now)));

        let summary = fixture.run(now).await;
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 1);
        assert!(fixture.store.records().is_empty());
    }

    #[tokio::test]
    async fn missing_template_falls_back_to_generic() {
        let mut fixture = Fixture::new();
        fixture.templates = StaticTemplates::new();
        let now = Utc::now();
        fixture
            .gateway
            .add_quote(fixture.quote(QuoteStatus::Viewed, None));

        let summary = fixture.run(now).await;
        assert_eq!(summary.created, 1);

        let records = fixture.store.records();
        assert_eq!(records[0].template_id, "generic_quote");
        assert!(records[0].subject.contains("Q-2024-007"));
    }

    #[tokio::test]
    async fn missing_client_is_contained_as_failure() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let mut quote = fixture.quote(QuoteStatus::Viewed, None);
        quote.client_id = ClientId::new();
        fixture.gateway.add_quote(quote);

        let summary = fixture.run(now).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 0);
        assert!(fixture.store.records().is_empty());
    }

    #[tokio::test]
    async fn approaching_deadline_invoice_gets_warning() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let invoice = fixture.invoice(InvoiceStatus::Unpaid, now + Duration::days(3));
        fixture.gateway.add_invoice(invoice.clone());

        let summary = fixture.run(now).await;
        assert_eq!(summary.created, 1);

        let records = fixture.store.records();
        let record = &records[0];
        assert_eq!(record.follow_up_type, FollowUpType::ApproachingDeadline);
        assert_eq!(record.stage, 1);
        assert_eq!(record.scheduled_at, invoice.due_date - Duration::days(3));
        assert_eq!(record.meta.days_until_due, Some(3));
        assert!(record.subject.contains("due in 3 days"));
    }

    #[tokio::test]
    async fn overdue_invoice_anchors_to_due_date() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let invoice = fixture.invoice(InvoiceStatus::Unpaid, now - Duration::days(1));
        fixture.gateway.add_invoice(invoice.clone());

        let summary = fixture.run(now).await;
        assert_eq!(summary.created, 1);

        let records = fixture.store.records();
        let record = &records[0];
        assert_eq!(record.follow_up_type, FollowUpType::Overdue);
        assert_eq!(record.stage, 1);
        assert_eq!(record.scheduled_at, invoice.due_date + Duration::days(1));
        assert_eq!(record.meta.priority, Priority::Medium);
        assert_eq!(record.meta.days_overdue, Some(1));
    }

    #[tokio::test]
    async fn delivered_record_is_requeued_for_the_next_attempt() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let invoice = fixture.invoice(InvoiceStatus::Unpaid, now - Duration::days(1));
        fixture.gateway.add_invoice(invoice.clone());

        let summary = fixture.run(now).await;
        assert_eq!(summary.created, 1);

        // Delivery spends the first attempt before the next pass.
        let mut delivered = fixture.store.records()[0].clone();
        delivered.record_attempt();
        delivered.mark_sent();
        fixture
            .store
            .update(&delivered)
            .await
            .unwrap_or_else(|e| panic!("update failed: {e}"));

        let summary = fixture.run(now + Duration::days(1)).await;
        assert_eq!(summary.created, 0);
        assert_eq!(summary.rescheduled, 1);

        let records = fixture.store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, FollowUpStatus::Scheduled);
        assert_eq!(record.stage, 1);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.scheduled_at, invoice.due_date + Duration::days(1));
    }

    #[tokio::test]
    async fn exhausted_record_is_left_for_progression() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let invoice = fixture.invoice(InvoiceStatus::Unpaid, now - Duration::days(1));
        fixture.gateway.add_invoice(invoice.clone());
        fixture.run(now).await;

        let mut delivered = fixture.store.records()[0].clone();
        for _ in 0..3 {
            delivered.record_attempt();
        }
        delivered.mark_sent();
        fixture
            .store
            .update(&delivered)
            .await
            .unwrap_or_else(|e| panic!("update failed: {e}"));

        let summary = fixture.run(now + Duration::days(1)).await;
        assert_eq!(summary.created, 0);
        assert_eq!(summary.rescheduled, 0);
        assert_eq!(summary.skipped, 1);

        let record = &fixture.store.records()[0];
        assert_eq!(record.status, FollowUpStatus::Sent);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test]
    async fn completed_ladder_is_never_recreated() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let invoice = fixture.invoice(InvoiceStatus::Overdue, now - Duration::days(20));
        fixture.gateway.add_invoice(invoice.clone());

        let mut finished = FollowUp::new(
            EntityRef::Invoice(invoice.id),
            FollowUpType::Overdue,
            3,
            now - Duration::days(2),
            3,
            "invoice_overdue",
        );
        finished.complete_all_stages();
        fixture
            .store
            .insert_if_absent(&finished)
            .await
            .unwrap_or_else(|e| panic!("seed insert failed: {e}"));

        let summary = fixture.run(now).await;
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fixture.store.records().len(), 1);
    }

    #[tokio::test]
    async fn targeted_dispatch_marks_manual_origin() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let invoice = fixture.invoice(InvoiceStatus::Unpaid, now - Duration::days(1));
        fixture.gateway.add_invoice(invoice.clone());

        let outcome = dispatch_one_invoice(
            &fixture.store,
            &fixture.gateway,
            &fixture.templates,
            invoice.clone(),
            fixture.rules.for_domain(EntityKind::Invoice),
            now,
            false,
        )
        .await
        .unwrap_or_else(|e| panic!("targeted dispatch failed: {e}"));
        assert_eq!(outcome, DispatchOutcome::Created);

        let records = fixture.store.records();
        assert!(!records[0].meta.automated);

        let again = dispatch_one_invoice(
            &fixture.store,
            &fixture.gateway,
            &fixture.templates,
            invoice,
            fixture.rules.for_domain(EntityKind::Invoice),
            now,
            false,
        )
        .await
        .unwrap_or_else(|e| panic!("targeted dispatch failed: {e}"));
        assert_eq!(again, DispatchOutcome::AlreadyTracked);
    }
}
