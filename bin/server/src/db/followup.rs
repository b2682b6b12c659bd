//! Database repository for follow-up records and lifecycle events.

use super::decode_error;
use async_trait::async_trait;
use billhound_core::FollowUpId;
use billhound_followup::{
    EntityKind, EntityRef, FollowUp, FollowUpEvent, FollowUpMeta, FollowUpStatus, FollowUpStore,
    FollowUpType, InsertOutcome, StoreError,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for follow-up queries.
#[derive(FromRow)]
struct FollowUpRow {
    id: String,
    entity_type: String,
    entity_id: String,
    follow_up_type: String,
    stage: i32,
    status: String,
    scheduled_at: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    template_id: String,
    subject: String,
    body_text: String,
    body_html: Option<String>,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_entity(entity_type: &str, entity_id: &str) -> Result<EntityRef, sqlx::Error> {
    let kind = EntityKind::from_str_value(entity_type)
        .ok_or_else(|| decode_error(format!("unknown entity type '{entity_type}'")))?;
    EntityRef::from_parts(kind, entity_id)
        .map_err(|e| decode_error(format!("invalid entity id '{entity_id}': {e}")))
}

impl FollowUpRow {
    fn try_into_record(self) -> Result<FollowUp, sqlx::Error> {
        let id = FollowUpId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid follow-up id '{}': {}", self.id, e)))?;
        let entity = parse_entity(&self.entity_type, &self.entity_id)?;
        let follow_up_type = FollowUpType::from_str_value(&self.follow_up_type).ok_or_else(|| {
            decode_error(format!("unknown follow-up type '{}'", self.follow_up_type))
        })?;
        let status = FollowUpStatus::from_str_value(&self.status)
            .ok_or_else(|| decode_error(format!("unknown follow-up status '{}'", self.status)))?;
        let stage = u32::try_from(self.stage)
            .map_err(|_| decode_error(format!("negative stage {} on '{}'", self.stage, self.id)))?;
        let attempts = u32::try_from(self.attempts).map_err(|_| {
            decode_error(format!("negative attempts {} on '{}'", self.attempts, self.id))
        })?;
        let max_attempts = u32::try_from(self.max_attempts).map_err(|_| {
            decode_error(format!(
                "negative max attempts {} on '{}'",
                self.max_attempts, self.id
            ))
        })?;
        let meta: FollowUpMeta = serde_json::from_value(self.meta)
            .map_err(|e| decode_error(format!("invalid follow-up meta on '{}': {}", self.id, e)))?;

        Ok(FollowUp {
            id,
            entity,
            follow_up_type,
            stage,
            status,
            scheduled_at: self.scheduled_at,
            attempts,
            max_attempts,
            template_id: self.template_id,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            meta,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_error(error: sqlx::Error) -> StoreError {
    StoreError::StorageFailed {
        reason: error.to_string(),
    }
}

/// Row type for active-entity queries.
#[derive(FromRow)]
struct EntityKeyRow {
    entity_type: String,
    entity_id: String,
}

/// Postgres-backed follow-up store.
///
/// The conditional insert relies on the partial unique index over
/// `(entity_id, follow_up_type)` for active statuses; the check and the
/// write are one atomic statement, so overlapping passes cannot both
/// create a record for the same key.
pub struct PgFollowUpStore {
    pool: PgPool,
}

impl PgFollowUpStore {
    /// Creates a new store over the pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FollowUpStore for PgFollowUpStore {
    async fn insert_if_absent(&self, record: &FollowUp) -> Result<InsertOutcome, StoreError> {
        let meta = serde_json::to_value(&record.meta).map_err(|e| StoreError::StorageFailed {
            reason: format!("serialize follow-up meta: {e}"),
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO follow_ups
                (id, entity_type, entity_id, follow_up_type, stage, status, scheduled_at,
                 attempts, max_attempts, template_id, subject, body_text, body_html, meta,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.entity.kind().as_str())
        .bind(record.entity.id_string())
        .bind(record.follow_up_type.as_str())
        .bind(record.stage as i32)
        .bind(record.status.as_str())
        .bind(record.scheduled_at)
        .bind(record.attempts as i32)
        .bind(record.max_attempts as i32)
        .bind(&record.template_id)
        .bind(&record.subject)
        .bind(&record.body_text)
        .bind(&record.body_html)
        .bind(meta)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::AlreadyActive)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn find_latest(
        &self,
        entity: EntityRef,
        follow_up_type: FollowUpType,
    ) -> Result<Option<FollowUp>, StoreError> {
        let row: Option<FollowUpRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, entity_id, follow_up_type, stage, status, scheduled_at,
                   attempts, max_attempts, template_id, subject, body_text, body_html, meta,
                   created_at, updated_at
            FROM follow_ups
            WHERE entity_type = $1 AND entity_id = $2 AND follow_up_type = $3
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(entity.kind().as_str())
        .bind(entity.id_string())
        .bind(follow_up_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_record().map_err(storage_error)?)),
            None => Ok(None),
        }
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<FollowUp>, StoreError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, entity_id, follow_up_type, stage, status, scheduled_at,
                   attempts, max_attempts, template_id, subject, body_text, body_html, meta,
                   created_at, updated_at
            FROM follow_ups
            WHERE status = 'scheduled' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|r| r.try_into_record().map_err(storage_error))
            .collect()
    }

    async fn list_sent(&self) -> Result<Vec<FollowUp>, StoreError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, entity_id, follow_up_type, stage, status, scheduled_at,
                   attempts, max_attempts, template_id, subject, body_text, body_html, meta,
                   created_at, updated_at
            FROM follow_ups
            WHERE status = 'sent'
            ORDER BY updated_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|r| r.try_into_record().map_err(storage_error))
            .collect()
    }

    async fn list_for_entity(&self, entity: EntityRef) -> Result<Vec<FollowUp>, StoreError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, entity_id, follow_up_type, stage, status, scheduled_at,
                   attempts, max_attempts, template_id, subject, body_text, body_html, meta,
                   created_at, updated_at
            FROM follow_ups
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(entity.kind().as_str())
        .bind(entity.id_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|r| r.try_into_record().map_err(storage_error))
            .collect()
    }

    async fn list_active_entities(&self) -> Result<Vec<EntityRef>, StoreError> {
        let rows: Vec<EntityKeyRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT entity_type, entity_id
            FROM follow_ups
            WHERE status IN ('pending', 'scheduled')
            ORDER BY entity_type, entity_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|row| parse_entity(&row.entity_type, &row.entity_id).map_err(storage_error))
            .collect()
    }

    async fn update(&self, record: &FollowUp) -> Result<(), StoreError> {
        let meta = serde_json::to_value(&record.meta).map_err(|e| StoreError::StorageFailed {
            reason: format!("serialize follow-up meta: {e}"),
        })?;

        let result = sqlx::query(
            r#"
            UPDATE follow_ups
            SET stage = $2, status = $3, scheduled_at = $4, attempts = $5, meta = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.stage as i32)
        .bind(record.status.as_str())
        .bind(record.scheduled_at)
        .bind(record.attempts as i32)
        .bind(meta)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id: record.id });
        }
        Ok(())
    }

    async fn stop_active_for_entity(&self, entity: EntityRef) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE follow_ups
            SET status = 'stopped', updated_at = NOW()
            WHERE entity_type = $1 AND entity_id = $2 AND status IN ('pending', 'scheduled')
            "#,
        )
        .bind(entity.kind().as_str())
        .bind(entity.id_string())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn record_event(&self, event: &FollowUpEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO follow_up_events
                (id, entity_type, entity_id, reason, final_status, stopped_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.entity.kind().as_str())
        .bind(event.entity.id_string())
        .bind(&event.reason)
        .bind(&event.final_status)
        .bind(event.stopped_count as i64)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}
