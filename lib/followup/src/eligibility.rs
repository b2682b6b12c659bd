//! Pure eligibility evaluation.
//!
//! Given one tracked entity, its rule, and the current time, decides whether
//! a follow-up is warranted and at which stage. Evaluation never touches
//! storage; the dispatcher owns the idempotent create that follows.

use crate::entity::{Invoice, InvoiceStatus, Quote, QuoteStatus, TrackedEntity};
use crate::record::{FollowUpType, Priority};
use crate::rule::FollowUpRule;
use chrono::{DateTime, Duration, Utc};

/// First follow-up stage for quotes.
///
/// Stage 1 represents the original send of the quote itself, so the first
/// reminder a client receives is stage 2. Invoice follow-ups start at
/// stage 1.
pub const QUOTE_FIRST_FOLLOWUP_STAGE: u32 = 2;

/// A positive eligibility decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    /// The behavioral trigger that fired.
    pub follow_up_type: FollowUpType,
    /// Target escalation stage, starting at 1.
    pub stage: u32,
    /// When the notification should go out.
    pub scheduled_at: DateTime<Utc>,
    /// Delivery priority for the target stage.
    pub priority: Priority,
    /// Calendar days past the due date, for overdue invoices.
    pub days_overdue: Option<i64>,
    /// Calendar days until the due date, for deadline warnings.
    pub days_until_due: Option<i64>,
}

/// Whole calendar days between two instants, truncated at midnight.
///
/// Day arithmetic deliberately ignores the time of day so that decisions do
/// not oscillate for entities created near a day boundary.
#[must_use]
pub fn calendar_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

/// Evaluates one tracked entity against its rule.
///
/// `active_overdue_stage` carries the stage of an existing active overdue
/// record, if any, so that escalated invoices keep their trigger arithmetic
/// anchored to the right delay.
#[must_use]
pub fn evaluate(
    entity: &TrackedEntity,
    rule: &FollowUpRule,
    now: DateTime<Utc>,
    active_overdue_stage: Option<u32>,
) -> Option<Eligibility> {
    match entity {
        TrackedEntity::Quote(quote) => evaluate_quote(quote, rule, now),
        TrackedEntity::Invoice(invoice) => {
            evaluate_invoice(invoice, rule, now, active_overdue_stage)
        }
    }
}

/// Evaluates a quote.
///
/// A viewed quote gets an instant stage-1 nudge when the rule opts in. A
/// sent-but-unviewed quote becomes eligible for a stage-2 reminder once the
/// stage-2 delay has elapsed since sending.
#[must_use]
pub fn evaluate_quote(
    quote: &Quote,
    rule: &FollowUpRule,
    now: DateTime<Utc>,
) -> Option<Eligibility> {
    if quote.status.is_terminal() {
        return None;
    }
    if let Some(valid_until) = quote.valid_until
        && valid_until < now
    {
        return None;
    }
    match quote.status {
        QuoteStatus::Viewed if rule.instant_view_followup => Some(Eligibility {
            follow_up_type: FollowUpType::ViewedInstant,
            stage: 1,
            scheduled_at: now,
            priority: Priority::Medium,
            days_overdue: None,
            days_until_due: None,
        }),
        QuoteStatus::Sent => {
            let delay = rule.delay_for_stage(QUOTE_FIRST_FOLLOWUP_STAGE)?;
            let past_delay = match quote.sent_at {
                // Missing send timestamp would otherwise never age out of
                // the window; treat it as already past the delay.
                None => true,
                Some(sent_at) => calendar_days_between(sent_at, now) >= delay,
            };
            past_delay.then(|| Eligibility {
                follow_up_type: FollowUpType::NotViewed,
                stage: QUOTE_FIRST_FOLLOWUP_STAGE,
                scheduled_at: now,
                priority: Priority::High,
                days_overdue: None,
                days_until_due: None,
            })
        }
        _ => None,
    }
}

/// Evaluates an invoice.
///
/// An unpaid invoice exactly `approaching_deadline_days` before its due date
/// gets a deadline warning. Once the due date is strictly in the past, the
/// invoice enters the overdue ladder: stage 1 unless an active record is
/// already escalated, trigger time anchored at the due date plus the stage
/// delay.
#[must_use]
pub fn evaluate_invoice(
    invoice: &Invoice,
    rule: &FollowUpRule,
    now: DateTime<Utc>,
    active_overdue_stage: Option<u32>,
) -> Option<Eligibility> {
    if invoice.status.is_terminal() {
        return None;
    }
    let days_until_due = calendar_days_between(now, invoice.due_date);
    if invoice.status == InvoiceStatus::Unpaid
        && let Some(window) = rule.approaching_deadline_days
        && days_until_due == window
    {
        return Some(Eligibility {
            follow_up_type: FollowUpType::ApproachingDeadline,
            stage: 1,
            scheduled_at: invoice.due_date - Duration::days(window),
            priority: Priority::Medium,
            days_overdue: None,
            days_until_due: Some(days_until_due),
        });
    }
    if days_until_due < 0
        && matches!(
            invoice.status,
            InvoiceStatus::Unpaid | InvoiceStatus::Overdue
        )
    {
        let stage = active_overdue_stage.unwrap_or(1);
        let delay = rule.delay_for_stage(stage)?;
        let priority = if stage > 1 {
            Priority::High
        } else {
            Priority::Medium
        };
        return Some(Eligibility {
            follow_up_type: FollowUpType::Overdue,
            stage,
            scheduled_at: invoice.due_date + Duration::days(delay),
            priority,
            days_overdue: Some(-days_until_due),
            days_until_due: None,
        });
    }
    None
}
