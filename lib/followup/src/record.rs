//! Follow-up records and their state machine.
//!
//! A `FollowUp` ties one tracked entity to one behavioral trigger type and
//! walks `pending → scheduled → sent → {scheduled(next stage) |
//! all_stages_completed}`, with `stopped` reachable from any non-terminal
//! state and `failed` reachable on unrecoverable delivery errors.

use crate::entity::EntityRef;
use billhound_core::FollowUpId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Behavioral trigger type of a follow-up.
///
/// At most one follow-up per `(entity, type)` pair may be active at a time;
/// different types for the same entity escalate independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpType {
    /// Quote was sent but never opened.
    NotViewed,
    /// Quote was opened; react while interest is fresh.
    ViewedInstant,
    /// Invoice due date is approaching.
    ApproachingDeadline,
    /// Invoice is past its due date.
    Overdue,
}

impl FollowUpType {
    /// Returns the stable string form used in storage and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotViewed => "not_viewed",
            Self::ViewedInstant => "viewed_instant",
            Self::ApproachingDeadline => "approaching_deadline",
            Self::Overdue => "overdue",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "not_viewed" => Some(Self::NotViewed),
            "viewed_instant" => Some(Self::ViewedInstant),
            "approaching_deadline" => Some(Self::ApproachingDeadline),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

impl fmt::Display for FollowUpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification priority carried in follow-up metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Informational.
    Low,
    /// Default reminder priority.
    Medium,
    /// Escalated reminder priority.
    High,
}

impl Priority {
    /// Returns the stable string form used in storage and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Status of a follow-up record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    /// Created, trigger time not yet committed.
    Pending,
    /// Waiting for its trigger time.
    Scheduled,
    /// Accepted by the notification sink; stage not yet resolved.
    Sent,
    /// Every configured stage has run its course.
    AllStagesCompleted,
    /// Stopped because the entity reached a terminal business state.
    Stopped,
    /// Unrecoverable delivery or resolver error.
    Failed,
}

impl FollowUpStatus {
    /// Returns the stable string form used in storage and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::AllStagesCompleted => "all_stages_completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "sent" => Some(Self::Sent),
            "all_stages_completed" => Some(Self::AllStagesCompleted),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true while the record still blocks creation of a sibling.
    ///
    /// Active statuses are the ones the uniqueness invariant ranges over.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    /// Returns true once the record can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AllStagesCompleted | Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for FollowUpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnostic metadata on a follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpMeta {
    /// Notification priority computed at eligibility time.
    pub priority: Priority,
    /// True when the record was created by the batch scheduler rather than
    /// a direct application request.
    pub automated: bool,
    /// Days past due at evaluation time (invoice overdue only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_overdue: Option<i64>,
    /// Days until the due date at evaluation time (approaching deadline only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_until_due: Option<i64>,
    /// True once stage progression has advanced this record at least once.
    #[serde(default)]
    pub stage_progressed: bool,
    /// Why the record was marked failed, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Default for FollowUpMeta {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            automated: true,
            days_overdue: None,
            days_until_due: None,
            stage_progressed: false,
            failure_reason: None,
        }
    }
}

/// A follow-up record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    /// Record ID.
    pub id: FollowUpId,
    /// The entity this follow-up reminds about.
    #[serde(flatten)]
    pub entity: EntityRef,
    /// Behavioral trigger type.
    pub follow_up_type: FollowUpType,
    /// Current escalation stage, starting at 1.
    pub stage: u32,
    /// Current status.
    pub status: FollowUpStatus,
    /// When the notification should go out.
    pub scheduled_at: DateTime<Utc>,
    /// Delivery attempts made within the current stage.
    pub attempts: u32,
    /// Delivery attempts allowed per stage.
    pub max_attempts: u32,
    /// Template the message was resolved from.
    pub template_id: String,
    /// Resolved subject, cached at creation for audit.
    pub subject: String,
    /// Resolved plain-text body, cached at creation for audit.
    pub body_text: String,
    /// Resolved HTML body, when the template provides one.
    pub body_html: Option<String>,
    /// Structured diagnostic metadata.
    pub meta: FollowUpMeta,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl FollowUp {
    /// Creates a new record in `pending` state.
    #[must_use]
    pub fn new(
        entity: EntityRef,
        follow_up_type: FollowUpType,
        stage: u32,
        scheduled_at: DateTime<Utc>,
        max_attempts: u32,
        template_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FollowUpId::new(),
            entity,
            follow_up_type,
            stage,
            status: FollowUpStatus::Pending,
            scheduled_at,
            attempts: 0,
            max_attempts,
            template_id: template_id.into(),
            subject: String::new(),
            body_text: String::new(),
            body_html: None,
            meta: FollowUpMeta::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches the resolved message content.
    #[must_use]
    pub fn with_message(
        mut self,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        body_html: Option<String>,
    ) -> Self {
        self.subject = subject.into();
        self.body_text = body_text.into();
        self.body_html = body_html;
        self
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: FollowUpMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Promotes a pending record to `scheduled`.
    pub fn schedule(&mut self) {
        self.status = FollowUpStatus::Scheduled;
        self.touch();
    }

    /// Counts one delivery attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.touch();
    }

    /// Marks the current attempt accepted by the notification sink.
    pub fn mark_sent(&mut self) {
        self.status = FollowUpStatus::Sent;
        self.touch();
    }

    /// Puts a delivered record back on the schedule for its next attempt.
    ///
    /// Stage and attempt count carry over; only the trigger time moves.
    pub fn reschedule(&mut self, scheduled_at: DateTime<Utc>) {
        self.status = FollowUpStatus::Scheduled;
        self.scheduled_at = scheduled_at;
        self.touch();
    }

    /// Advances to the next stage and reschedules.
    ///
    /// Attempts reset to zero; escalated stages carry high priority.
    pub fn advance_stage(&mut self, scheduled_at: DateTime<Utc>) {
        self.stage += 1;
        self.attempts = 0;
        self.status = FollowUpStatus::Scheduled;
        self.scheduled_at = scheduled_at;
        self.meta.stage_progressed = true;
        if self.stage > 1 {
            self.meta.priority = Priority::High;
        }
        self.touch();
    }

    /// Marks every configured stage exhausted.
    pub fn complete_all_stages(&mut self) {
        self.status = FollowUpStatus::AllStagesCompleted;
        self.touch();
    }

    /// Stops the record because the entity reached a terminal state.
    pub fn stop(&mut self) {
        self.status = FollowUpStatus::Stopped;
        self.touch();
    }

    /// Marks the record failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = FollowUpStatus::Failed;
        self.meta.failure_reason = Some(reason.into());
        self.touch();
    }

    /// Returns true while the record blocks creation of a sibling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns true when the record is scheduled and its trigger time has
    /// passed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == FollowUpStatus::Scheduled && self.scheduled_at <= now
    }

    /// Returns true once the current stage has used up its attempts.
    #[must_use]
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billhound_core::QuoteId;
    use chrono::Duration;

    fn test_record() -> FollowUp {
        FollowUp::new(
            EntityRef::Quote(QuoteId::new()),
            FollowUpType::NotViewed,
            2,
            Utc::now(),
            3,
            "quote_not_viewed",
        )
    }

    #[test]
    fn new_record_starts_pending() {
        let record = test_record();
        assert_eq!(record.status, FollowUpStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.stage, 2);
        assert!(record.is_active());
    }

    #[test]
    fn schedule_and_deliver() {
        let mut record = test_record();
        record.schedule();
        assert_eq!(record.status, FollowUpStatus::Scheduled);
        assert!(record.is_active());

        record.record_attempt();
        record.mark_sent();
        assert_eq!(record.status, FollowUpStatus::Sent);
        assert_eq!(record.attempts, 1);
        assert!(!record.is_active());
    }

    #[test]
    fn reschedule_keeps_stage_and_attempts() {
        let mut record = test_record();
        record.schedule();
        record.record_attempt();
        record.mark_sent();

        let next = Utc::now() + Duration::hours(6);
        record.reschedule(next);

        assert_eq!(record.status, FollowUpStatus::Scheduled);
        assert_eq!(record.scheduled_at, next);
        assert_eq!(record.stage, 2);
        assert_eq!(record.attempts, 1);
        assert!(!record.attempts_exhausted());
    }

    #[test]
    fn advance_stage_resets_attempts() {
        let mut record = test_record();
        record.schedule();
        record.record_attempt();
        record.record_attempt();
        record.record_attempt();
        record.mark_sent();
        assert!(record.attempts_exhausted());

        let next = Utc::now() + Duration::days(3);
        record.advance_stage(next);

        assert_eq!(record.stage, 3);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.status, FollowUpStatus::Scheduled);
        assert_eq!(record.scheduled_at, next);
        assert!(record.meta.stage_progressed);
        assert_eq!(record.meta.priority, Priority::High);
    }

    #[test]
    fn stop_is_reachable_from_scheduled() {
        let mut record = test_record();
        record.schedule();
        record.stop();
        assert_eq!(record.status, FollowUpStatus::Stopped);
        assert!(record.status.is_terminal());
        assert!(!record.is_active());
    }

    #[test]
    fn fail_records_reason() {
        let mut record = test_record();
        record.schedule();
        record.fail("sink permanently rejected message");
        assert_eq!(record.status, FollowUpStatus::Failed);
        assert_eq!(
            record.meta.failure_reason.as_deref(),
            Some("sink permanently rejected message")
        );
    }

    #[test]
    fn is_due_honors_scheduled_time() {
        let mut record = test_record();
        record.schedule();
        record.scheduled_at = Utc::now() - Duration::minutes(1);
        assert!(record.is_due(Utc::now()));

        record.scheduled_at = Utc::now() + Duration::hours(1);
        assert!(!record.is_due(Utc::now()));
    }

    #[test]
    fn pending_record_is_never_due() {
        let mut record = test_record();
        record.scheduled_at = Utc::now() - Duration::hours(1);
        assert!(!record.is_due(Utc::now()));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            FollowUpStatus::Pending,
            FollowUpStatus::Scheduled,
            FollowUpStatus::Sent,
            FollowUpStatus::AllStagesCompleted,
            FollowUpStatus::Stopped,
            FollowUpStatus::Failed,
        ] {
            assert_eq!(
                FollowUpStatus::from_str_value(status.as_str()),
                Some(status)
            );
        }
        assert_eq!(FollowUpStatus::from_str_value("bogus"), None);
    }

    #[test]
    fn record_serde_uses_snake_case() {
        let record = test_record();
        let value = serde_json::to_value(&record).expect("serialize");

        assert_eq!(value["entity_type"], "quote");
        assert_eq!(value["follow_up_type"], "not_viewed");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["meta"]["priority"], "medium");
    }

    #[test]
    fn meta_omits_empty_diagnostics() {
        let meta = FollowUpMeta::default();
        let value = serde_json::to_value(&meta).expect("serialize");
        assert!(value.get("days_overdue").is_none());
        assert!(value.get("failure_reason").is_none());

        let parsed: FollowUpMeta = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed, meta);
    }
}
