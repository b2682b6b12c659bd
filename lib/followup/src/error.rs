//! Error types for the follow-up engine.
//!
//! Per-seam errors keep failures contained: one entity's lookup, template,
//! or persistence error never aborts a whole pass. Only errors that make the
//! pass itself impossible (candidate listing, rule loading) surface as
//! `PassError`, and only the engine façade's `EngineError` reaches callers.

use crate::entity::{EntityKind, EntityRef};
use billhound_core::{ClientId, FollowUpId, InvoiceId, QuoteId};
use std::fmt;

/// Errors from follow-up record storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record not found.
    NotFound { id: FollowUpId },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "follow-up not found: {id}"),
            Self::StorageFailed { reason } => {
                write!(f, "follow-up storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the tracked-entity gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Quote not found.
    QuoteNotFound { id: QuoteId },
    /// Invoice not found.
    InvoiceNotFound { id: InvoiceId },
    /// Client record not found.
    ClientNotFound { id: ClientId },
    /// Gateway read failed.
    StorageFailed { reason: String },
}

impl GatewayError {
    /// Builds the not-found variant matching a reference's kind.
    #[must_use]
    pub fn entity_not_found(entity: EntityRef) -> Self {
        match entity {
            EntityRef::Quote(id) => Self::QuoteNotFound { id },
            EntityRef::Invoice(id) => Self::InvoiceNotFound { id },
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuoteNotFound { id } => write!(f, "quote not found: {id}"),
            Self::InvoiceNotFound { id } => write!(f, "invoice not found: {id}"),
            Self::ClientNotFound { id } => write!(f, "client not found: {id}"),
            Self::StorageFailed { reason } => {
                write!(f, "entity gateway read failed: {reason}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

/// Errors from rule configuration and loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Rule declares zero stages.
    NoStages { domain: EntityKind },
    /// Rule declares more stages than stage delays.
    MissingStageDelays {
        domain: EntityKind,
        max_stages: u32,
        delays: usize,
    },
    /// Rule storage read failed.
    StorageFailed { reason: String },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStages { domain } => {
                write!(f, "rule for {domain} declares zero stages")
            }
            Self::MissingStageDelays {
                domain,
                max_stages,
                delays,
            } => {
                write!(
                    f,
                    "rule for {domain} declares {max_stages} stages but only {delays} stage delays"
                )
            }
            Self::StorageFailed { reason } => {
                write!(f, "rule storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for RuleError {}

/// Errors from template resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// No template exists for the identifier.
    ///
    /// Creation falls back to the built-in generic message; this variant
    /// never blocks a follow-up.
    Missing { template_id: String },
    /// The resolver itself failed.
    ResolverFailed { reason: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { template_id } => {
                write!(f, "template missing: {template_id}")
            }
            Self::ResolverFailed { reason } => {
                write!(f, "template resolver failed: {reason}")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// Errors from the notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Transient rejection; the attempt counts but the record stays
    /// scheduled for a later pass.
    Rejected { reason: String },
    /// Permanent rejection; the record is marked failed.
    Failed { reason: String },
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => {
                write!(f, "notification sink rejected message: {reason}")
            }
            Self::Failed { reason } => {
                write!(f, "notification sink failed permanently: {reason}")
            }
        }
    }
}

impl std::error::Error for SinkError {}

/// Errors from processing a single entity within a pass.
///
/// These are contained: the pass logs them and continues with the next
/// entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// Entity or client lookup failed.
    Lookup(GatewayError),
    /// Template resolution failed (beyond a plain missing template).
    Template(TemplateError),
    /// Follow-up persistence failed.
    Store(StoreError),
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lookup(e) => write!(f, "lookup error: {e}"),
            Self::Template(e) => write!(f, "template error: {e}"),
            Self::Store(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EntityError {}

impl From<GatewayError> for EntityError {
    fn from(e: GatewayError) -> Self {
        Self::Lookup(e)
    }
}

impl From<TemplateError> for EntityError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e)
    }
}

impl From<StoreError> for EntityError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors that abort an entire pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    /// Candidate or entity listing failed.
    Gateway(GatewayError),
    /// Record listing or bulk update failed.
    Store(StoreError),
    /// Rule loading failed.
    Rule(RuleError),
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "gateway error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Rule(e) => write!(f, "rule error: {e}"),
        }
    }
}

impl std::error::Error for PassError {}

impl From<GatewayError> for PassError {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

impl From<StoreError> for PassError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RuleError> for PassError {
    fn from(e: RuleError) -> Self {
        Self::Rule(e)
    }
}

/// High-level engine errors surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Quote not found for a targeted operation.
    QuoteNotFound { id: QuoteId },
    /// Invoice not found for a targeted operation.
    InvoiceNotFound { id: InvoiceId },
    /// Targeted operation referenced an entity in the wrong status.
    ///
    /// No state mutation occurs when this is returned.
    InvalidRequest { reason: String },
    /// A whole pass failed.
    PassFailed { pass: &'static str, reason: String },
    /// A storage operation outside a pass failed.
    StorageFailed { reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuoteNotFound { id } => write!(f, "quote not found: {id}"),
            Self::InvoiceNotFound { id } => write!(f, "invoice not found: {id}"),
            Self::InvalidRequest { reason } => write!(f, "invalid request: {reason}"),
            Self::PassFailed { pass, reason } => {
                write!(f, "{pass} pass failed: {reason}")
            }
            Self::StorageFailed { reason } => write!(f, "storage failed: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}
