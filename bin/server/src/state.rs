//! Shared application state.

use crate::db::{PgEntityGateway, PgFollowUpStore, PgRuleStore};
use crate::sink::TracingSink;
use async_trait::async_trait;
use billhound_core::{InvoiceId, QuoteId};
use billhound_followup::{
    BatchReport, DispatchOutcome, EngineError, EntityGateway, EntityRef, FollowUp, FollowUpEngine,
    FollowUpStore, NotificationSink, RuleStore, StaticTemplates, TemplateResolver,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

/// The engine operations the HTTP layer invokes.
///
/// Handlers depend on this seam rather than on the concrete engine type,
/// so route tests can stand the router up over the in-memory backends.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Runs one full batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PassFailed`] when a pass-level operation fails.
    async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchReport, EngineError>;

    /// Runs the initial follow-up flow for one invoice.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvoiceNotFound`] for an unknown invoice.
    async fn followup_for_invoice(
        &self,
        id: InvoiceId,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, EngineError>;

    /// Stops all follow-ups for a finalized invoice.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] when the invoice is not
    /// terminal.
    async fn cleanup_invoice(&self, id: InvoiceId) -> Result<u64, EngineError>;

    /// Stops all follow-ups for a finalized quote.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] when the quote is not
    /// terminal.
    async fn cleanup_quote(&self, id: QuoteId) -> Result<u64, EngineError>;

    /// Lists all follow-up records for one entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StorageFailed`] when the read fails.
    async fn followups_for_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Vec<FollowUp>, EngineError>;
}

#[async_trait]
impl<S, G, R, T, N> EngineHandle for FollowUpEngine<S, G, R, T, N>
where
    S: FollowUpStore,
    G: EntityGateway,
    R: RuleStore,
    T: TemplateResolver,
    N: NotificationSink,
{
    async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchReport, EngineError> {
        FollowUpEngine::run_batch(self, now).await
    }

    async fn followup_for_invoice(
        &self,
        id: InvoiceId,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, EngineError> {
        FollowUpEngine::followup_for_invoice(self, id, now).await
    }

    async fn cleanup_invoice(&self, id: InvoiceId) -> Result<u64, EngineError> {
        FollowUpEngine::cleanup_invoice(self, id).await
    }

    async fn cleanup_quote(&self, id: QuoteId) -> Result<u64, EngineError> {
        FollowUpEngine::cleanup_quote(self, id).await
    }

    async fn followups_for_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Vec<FollowUp>, EngineError> {
        FollowUpEngine::followups_for_entity(self, entity).await
    }
}

/// The production engine over the Postgres-backed ports.
pub type PgEngine =
    FollowUpEngine<PgFollowUpStore, PgEntityGateway, PgRuleStore, StaticTemplates, TracingSink>;

/// Wires the engine to the database pool, the built-in templates, and the
/// tracing sink.
#[must_use]
pub fn pg_engine(pool: PgPool) -> PgEngine {
    FollowUpEngine::new(
        PgFollowUpStore::new(pool.clone()),
        PgEntityGateway::new(pool.clone()),
        PgRuleStore::new(pool),
        StaticTemplates::builtin(),
        TracingSink,
    )
}

/// Shared state for the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    /// The follow-up engine behind its handler seam.
    pub engine: Arc<dyn EngineHandle>,
}

impl AppState {
    /// Creates the state around an engine.
    pub fn new(engine: Arc<dyn EngineHandle>) -> Self {
        Self { engine }
    }
}
