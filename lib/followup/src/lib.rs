//! Automated follow-up scheduling for quotes and invoices.
//!
//! This crate provides:
//!
//! - **Eligibility**: Pure per-entity evaluation of whether a reminder is
//!   warranted, at which stage, and when
//! - **Dispatch**: Idempotent creation of scheduled follow-up records
//! - **Delivery**: Handing due notifications to the transport sink
//! - **Progression**: Multi-stage escalation once attempts are exhausted
//! - **Cleanup**: Stopping every follow-up the moment an entity resolves
//!
//! The [`engine::FollowUpEngine`] composes the passes behind the operations
//! the application calls; the `memory` module offers in-process backends
//! for tests and local runs.

pub mod cleanup;
pub mod delivery;
pub mod dispatch;
pub mod eligibility;
pub mod engine;
pub mod entity;
pub mod error;
pub mod memory;
pub mod progression;
pub mod record;
pub mod rule;
pub mod sink;
pub mod store;
pub mod template;

pub use cleanup::{CleanupSummary, FollowUpEvent};
pub use delivery::DeliverySummary;
pub use dispatch::{DispatchOutcome, DispatchSummary};
pub use eligibility::{Eligibility, evaluate};
pub use engine::{BatchReport, FollowUpEngine};
pub use entity::{EntityKind, EntityRef, Invoice, InvoiceStatus, Quote, QuoteStatus, TrackedEntity};
pub use error::{EngineError, GatewayError, RuleError, SinkError, StoreError, TemplateError};
pub use progression::ProgressionSummary;
pub use record::{FollowUp, FollowUpMeta, FollowUpStatus, FollowUpType, Priority};
pub use rule::{FollowUpRule, RuleSet};
pub use sink::{NotificationMessage, NotificationSink};
pub use store::{EntityGateway, FollowUpStore, InsertOutcome, RuleStore};
pub use template::{MessageTemplate, RenderedMessage, StaticTemplates, TemplateResolver};
