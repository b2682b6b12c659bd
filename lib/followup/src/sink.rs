//! Notification sink boundary.
//!
//! The engine decides when a reminder exists; an external transport decides
//! how it travels. The sink is that seam.

use crate::entity::EntityRef;
use crate::error::SinkError;
use crate::record::{FollowUp, FollowUpType, Priority};
use async_trait::async_trait;
use billhound_core::FollowUpId;
use serde::{Deserialize, Serialize};

/// A fully resolved message handed to the delivery transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Originating follow-up record.
    pub follow_up_id: FollowUpId,
    /// Entity the reminder is about.
    #[serde(flatten)]
    pub entity: EntityRef,
    /// Behavioral trigger type.
    pub follow_up_type: FollowUpType,
    /// Escalation stage of the reminder.
    pub stage: u32,
    /// Delivery priority.
    pub priority: Priority,
    /// Resolved subject line.
    pub subject: String,
    /// Resolved plain-text body.
    pub text: String,
    /// Resolved html body, when the template provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl NotificationMessage {
    /// Builds the outgoing message from a follow-up record.
    #[must_use]
    pub fn from_record(record: &FollowUp) -> Self {
        Self {
            follow_up_id: record.id,
            entity: record.entity,
            follow_up_type: record.follow_up_type,
            stage: record.stage,
            priority: record.meta.priority,
            subject: record.subject.clone(),
            text: record.body_text.clone(),
            html: record.body_html.clone(),
        }
    }
}

/// Accepts resolved messages for delivery.
///
/// Transport-level concerns (connection retries, bounces, rate limits) live
/// behind this trait. The engine only needs to know whether the message was
/// accepted, turned away for now, or refused for good.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Hands one message to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Rejected`] for transient refusals that should be
    /// retried on a later pass, and [`SinkError::Failed`] for permanent ones.
    async fn send(&self, message: &NotificationMessage) -> Result<(), SinkError>;
}
