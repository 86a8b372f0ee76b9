/// Notification boundary
///
/// The engine announces task creation and terminal transitions through a [`Notifier`];
/// delivery (mail, IM, webhook) belongs to whoever implements it. The default
/// [`TracingNotifier`] only logs.

use crate::workflow::types::UserId;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    TaskAssigned,
    TaskEscalated,
    InstanceApproved,
    InstanceRejected,
    InstanceWithdrawn,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_ids: &BTreeSet<UserId>, instance_id: &str, event: NotifyEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_ids: &BTreeSet<UserId>, instance_id: &str, event: NotifyEvent) {
        if user_ids.is_empty() {
            return;
        }
        tracing::info!(
            instance_id,
            event = ?event,
            recipients = ?user_ids,
            "approval notification"
        );
    }
}
