//! Database repository for per-domain follow-up rules.

use super::decode_error;
use async_trait::async_trait;
use billhound_followup::{EntityKind, FollowUpRule, FollowUpType, RuleError, RuleStore};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;

/// Row type for rule queries.
#[derive(FromRow)]
struct RuleRow {
    domain: String,
    max_stages: i32,
    stage_delays: Vec<i64>,
    max_attempts_per_stage: i32,
    approaching_deadline_days: Option<i64>,
    instant_view_followup: bool,
    template_ids: serde_json::Value,
}

impl RuleRow {
    fn try_into_rule(self) -> Result<FollowUpRule, sqlx::Error> {
        let domain = EntityKind::from_str_value(&self.domain)
            .ok_or_else(|| decode_error(format!("unknown rule domain '{}'", self.domain)))?;
        let max_stages = u32::try_from(self.max_stages).map_err(|_| {
            decode_error(format!(
                "negative max stages {} for '{}'",
                self.max_stages, self.domain
            ))
        })?;
        let max_attempts_per_stage = u32::try_from(self.max_attempts_per_stage).map_err(|_| {
            decode_error(format!(
                "negative max attempts {} for '{}'",
                self.max_attempts_per_stage, self.domain
            ))
        })?;
        let template_ids: BTreeMap<FollowUpType, String> =
            serde_json::from_value(self.template_ids).map_err(|e| {
                decode_error(format!("invalid template ids for '{}': {}", self.domain, e))
            })?;

        Ok(FollowUpRule {
            domain,
            max_stages,
            stage_delays: self.stage_delays,
            max_attempts_per_stage,
            approaching_deadline_days: self.approaching_deadline_days,
            instant_view_followup: self.instant_view_followup,
            template_ids,
        })
    }
}

fn storage_error(error: sqlx::Error) -> RuleError {
    RuleError::StorageFailed {
        reason: error.to_string(),
    }
}

/// Postgres-backed rule store.
///
/// Absence of a row for a domain is not an error; the engine falls back to
/// the defaults injected at startup.
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    /// Creates a new store over the pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn rule_for(&self, domain: EntityKind) -> Result<Option<FollowUpRule>, RuleError> {
        let row: Option<RuleRow> = sqlx::query_as(
            r#"
            SELECT domain, max_stages, stage_delays, max_attempts_per_stage,
                   approaching_deadline_days, instant_view_followup, template_ids
            FROM follow_up_rules
            WHERE domain = $1
            "#,
        )
        .bind(domain.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_rule().map_err(storage_error)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_row_parses_back() {
        let row = RuleRow {
            domain: "invoice".to_string(),
            max_stages: 3,
            stage_delays: vec![1, 3, 7],
            max_attempts_per_stage: 3,
            approaching_deadline_days: Some(3),
            instant_view_followup: false,
            template_ids: json!({ "overdue": "invoice_overdue" }),
        };

        let rule = row.try_into_rule().expect("should parse");
        assert_eq!(rule.domain, EntityKind::Invoice);
        assert_eq!(rule.stage_delays, vec![1, 3, 7]);
        assert_eq!(
            rule.template_id(FollowUpType::Overdue),
            "invoice_overdue".to_string()
        );
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn rule_row_with_unknown_domain_fails_decode() {
        let row = RuleRow {
            domain: "subscription".to_string(),
            max_stages: 1,
            stage_delays: vec![1],
            max_attempts_per_stage: 1,
            approaching_deadline_days: None,
            instant_view_followup: false,
            template_ids: json!({}),
        };

        let error = row.try_into_rule().expect_err("should fail");
        assert!(error.to_string().contains("unknown rule domain"));
    }
}
