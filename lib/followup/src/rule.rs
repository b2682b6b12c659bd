//! Per-domain follow-up rule configuration.
//!
//! One rule exists per domain (quotes, invoices). Rules are read-only to the
//! engine during a pass; when no rule row is configured the built-in defaults
//! injected at engine construction apply.

use crate::entity::EntityKind;
use crate::error::RuleError;
use crate::record::FollowUpType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for one follow-up domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRule {
    /// Domain this rule applies to.
    pub domain: EntityKind,
    /// Number of escalation stages.
    pub max_stages: u32,
    /// Per-stage delay in days; element `i` is the delay for stage `i + 1`.
    /// Must hold at least `max_stages` entries.
    pub stage_delays: Vec<i64>,
    /// Delivery attempts allowed within one stage.
    pub max_attempts_per_stage: u32,
    /// Days before the due date for the approaching-deadline reminder
    /// (invoices only).
    pub approaching_deadline_days: Option<i64>,
    /// Whether a viewed quote triggers an instant follow-up (quotes only).
    pub instant_view_followup: bool,
    /// Template identifiers by follow-up type.
    pub template_ids: BTreeMap<FollowUpType, String>,
}

impl FollowUpRule {
    /// Built-in defaults for the quote domain.
    ///
    /// Stage 1 represents the original send, so its delay is zero; the first
    /// real follow-up (stage 2) fires one day after sending.
    #[must_use]
    pub fn quote_defaults() -> Self {
        Self {
            domain: EntityKind::Quote,
            max_stages: 3,
            stage_delays: vec![0, 1, 3],
            max_attempts_per_stage: 3,
            approaching_deadline_days: None,
            instant_view_followup: true,
            template_ids: BTreeMap::from([
                (FollowUpType::NotViewed, "quote_not_viewed".to_string()),
                (FollowUpType::ViewedInstant, "quote_viewed_instant".to_string()),
            ]),
        }
    }

    /// Built-in defaults for the invoice domain.
    ///
    /// Overdue reminders fire one, three, and seven days past the due date;
    /// the approaching-deadline reminder fires three days before it.
    #[must_use]
    pub fn invoice_defaults() -> Self {
        Self {
            domain: EntityKind::Invoice,
            max_stages: 3,
            stage_delays: vec![1, 3, 7],
            max_attempts_per_stage: 3,
            approaching_deadline_days: Some(3),
            instant_view_followup: false,
            template_ids: BTreeMap::from([
                (
                    FollowUpType::ApproachingDeadline,
                    "invoice_approaching_deadline".to_string(),
                ),
                (FollowUpType::Overdue, "invoice_overdue".to_string()),
            ]),
        }
    }

    /// Built-in defaults for a domain.
    #[must_use]
    pub fn defaults_for(domain: EntityKind) -> Self {
        match domain {
            EntityKind::Quote => Self::quote_defaults(),
            EntityKind::Invoice => Self::invoice_defaults(),
        }
    }

    /// Returns the delay in days for the given 1-based stage, or `None` when
    /// the stage has no configured delay.
    #[must_use]
    pub fn delay_for_stage(&self, stage: u32) -> Option<i64> {
        if stage == 0 {
            return None;
        }
        self.stage_delays.get(stage as usize - 1).copied()
    }

    /// Returns the template identifier for a follow-up type, falling back to
    /// the conventional `<domain>_<type>` name when none is configured.
    #[must_use]
    pub fn template_id(&self, follow_up_type: FollowUpType) -> String {
        self.template_ids
            .get(&follow_up_type)
            .cloned()
            .unwrap_or_else(|| format!("{}_{}", self.domain.as_str(), follow_up_type.as_str()))
    }

    /// Validates the rule invariants.
    ///
    /// # Errors
    ///
    /// Returns an error when the rule has no stages or fewer delays than
    /// stages.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.max_stages == 0 {
            return Err(RuleError::NoStages {
                domain: self.domain,
            });
        }
        if self.stage_delays.len() < self.max_stages as usize {
            return Err(RuleError::MissingStageDelays {
                domain: self.domain,
                max_stages: self.max_stages,
                delays: self.stage_delays.len(),
            });
        }
        Ok(())
    }
}

/// The rule pair a scheduling pass runs with, one rule per domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rule for the quote domain.
    pub quote: FollowUpRule,
    /// Rule for the invoice domain.
    pub invoice: FollowUpRule,
}

impl RuleSet {
    /// The built-in rule pair.
    #[must_use]
    pub fn built_in() -> Self {
        Self {
            quote: FollowUpRule::quote_defaults(),
            invoice: FollowUpRule::invoice_defaults(),
        }
    }

    /// Returns the rule for a domain.
    #[must_use]
    pub fn for_domain(&self, domain: EntityKind) -> &FollowUpRule {
        match domain {
            EntityKind::Quote => &self.quote,
            EntityKind::Invoice => &self.invoice,
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::built_in()
    }
}
