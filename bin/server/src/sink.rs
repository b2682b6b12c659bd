//! Notification sink wiring.

use async_trait::async_trait;
use billhound_followup::{NotificationMessage, NotificationSink, SinkError};
use tracing::info;

/// Sink that logs accepted messages instead of transporting them.
///
/// The concrete transport (mail provider, queue) lives outside this
/// service; the rendered content is already persisted on the follow-up
/// record, so handing off here only needs to be observable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send(&self, message: &NotificationMessage) -> Result<(), SinkError> {
        info!(
            follow_up = %message.follow_up_id,
            entity = %message.entity,
            follow_up_type = %message.follow_up_type,
            stage = message.stage,
            priority = message.priority.as_str(),
            subject = %message.subject,
            "notification handed off"
        );
        Ok(())
    }
}
