//! Read-only database gateway to the business entities.
//!
//! Clients, quotes, and invoices are owned and mutated by the surrounding
//! application; this gateway only reads the fields the engine evaluates.

use super::decode_error;
use async_trait::async_trait;
use billhound_core::{ClientId, InvoiceId, QuoteId};
use billhound_followup::{
    EntityGateway, GatewayError, Invoice, InvoiceStatus, Quote, QuoteStatus,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for quote queries.
#[derive(FromRow)]
struct QuoteRow {
    id: String,
    client_id: String,
    number: String,
    status: String,
    sent_at: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl QuoteRow {
    fn try_into_quote(self) -> Result<Quote, sqlx::Error> {
        let id = QuoteId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid quote id '{}': {}", self.id, e)))?;
        let client_id = ClientId::from_str(&self.client_id)
            .map_err(|e| decode_error(format!("invalid client id '{}': {}", self.client_id, e)))?;
        let status = QuoteStatus::from_str_value(&self.status)
            .ok_or_else(|| decode_error(format!("unknown quote status '{}'", self.status)))?;

        Ok(Quote {
            id,
            client_id,
            number: self.number,
            status,
            sent_at: self.sent_at,
            valid_until: self.valid_until,
            created_at: self.created_at,
        })
    }
}

/// Row type for invoice queries.
#[derive(FromRow)]
struct InvoiceRow {
    id: String,
    client_id: String,
    number: String,
    status: String,
    issue_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn try_into_invoice(self) -> Result<Invoice, sqlx::Error> {
        let id = InvoiceId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid invoice id '{}': {}", self.id, e)))?;
        let client_id = ClientId::from_str(&self.client_id)
            .map_err(|e| decode_error(format!("invalid client id '{}': {}", self.client_id, e)))?;
        let status = InvoiceStatus::from_str_value(&self.status)
            .ok_or_else(|| decode_error(format!("unknown invoice status '{}'", self.status)))?;

        Ok(Invoice {
            id,
            client_id,
            number: self.number,
            status,
            issue_date: self.issue_date,
            due_date: self.due_date,
            created_at: self.created_at,
        })
    }
}

fn storage_error(error: sqlx::Error) -> GatewayError {
    GatewayError::StorageFailed {
        reason: error.to_string(),
    }
}

/// Postgres-backed entity gateway.
pub struct PgEntityGateway {
    pool: PgPool,
}

impl PgEntityGateway {
    /// Creates a new gateway over the pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityGateway for PgEntityGateway {
    async fn list_candidate_quotes(&self) -> Result<Vec<Quote>, GatewayError> {
        let rows: Vec<QuoteRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, number, status, sent_at, valid_until, created_at
            FROM quotes
            WHERE status IN ('sent', 'viewed')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|r| r.try_into_quote().map_err(storage_error))
            .collect()
    }

    async fn list_candidate_invoices(&self) -> Result<Vec<Invoice>, GatewayError> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, number, status, issue_date, due_date, created_at
            FROM invoices
            WHERE status IN ('unpaid', 'overdue')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|r| r.try_into_invoice().map_err(storage_error))
            .collect()
    }

    async fn find_quote(&self, id: QuoteId) -> Result<Option<Quote>, GatewayError> {
        let row: Option<QuoteRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, number, status, sent_at, valid_until, created_at
            FROM quotes
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_quote().map_err(storage_error)?)),
            None => Ok(None),
        }
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, GatewayError> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, number, status, issue_date, due_date, created_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_invoice().map_err(storage_error)?)),
            None => Ok(None),
        }
    }

    async fn client_name(&self, id: ClientId) -> Result<String, GatewayError> {
        let name: Option<String> = sqlx::query_scalar(
            r#"
            SELECT name
            FROM clients
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        name.ok_or(GatewayError::ClientNotFound { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_row_parses_back() {
        let id = InvoiceId::new();
        let client_id = ClientId::new();
        let row = InvoiceRow {
            id: id.to_string(),
            client_id: client_id.to_string(),
            number: "F-2025-0042".to_string(),
            status: "overdue".to_string(),
            issue_date: Utc::now(),
            due_date: Utc::now(),
            created_at: Utc::now(),
        };

        let invoice = row.try_into_invoice().expect("should parse");
        assert_eq!(invoice.id, id);
        assert_eq!(invoice.client_id, client_id);
        assert_eq!(invoice.status, InvoiceStatus::Overdue);
    }

    #[test]
    fn quote_row_with_unknown_status_fails_decode() {
        let row = QuoteRow {
            id: QuoteId::new().to_string(),
            client_id: ClientId::new().to_string(),
            number: "Q-2025-017".to_string(),
            status: "misplaced".to_string(),
            sent_at: None,
            valid_until: None,
            created_at: Utc::now(),
        };

        let error = row.try_into_quote().expect_err("should fail");
        assert!(error.to_string().contains("unknown quote status"));
    }
}
