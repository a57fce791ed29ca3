use notify_core::store::AuditRepository;
use notify_core::{AuditEntry, AuditEvent, Clock, DispatchError, DispatchResult};
use std::sync::Arc;
use uuid::Uuid;

/// Optional detail attached to an audit entry.
#[derive(Debug, Clone, Default)]
pub struct AuditDetail {
    pub attempt: Option<i32>,
    pub provider: Option<String>,
    pub provider_response: Option<serde_json::Value>,
    pub message: Option<String>,
    pub is_error: bool,
}

impl AuditDetail {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn attempt(attempt: i32) -> Self {
        Self {
            attempt: Some(attempt),
            ..Default::default()
        }
    }

    pub fn error(attempt: i32, message: impl Into<String>) -> Self {
        Self {
            attempt: Some(attempt),
            message: Some(message.into()),
            is_error: true,
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_response(mut self, response: Option<serde_json::Value>) -> Self {
        self.provider_response = response;
        self
    }
}

/// Append-only lifecycle trail. Writes never fail the caller.
#[derive(Clone)]
pub struct AuditLog {
    repository: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(repository: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn record(&self, notification_id: Uuid, event: AuditEvent, detail: AuditDetail) {
        if let Err(e) = self.try_record(notification_id, event, detail).await {
            tracing::error!(%notification_id, %event, "{}", e);
        }
    }

    async fn try_record(
        &self,
        notification_id: Uuid,
        event: AuditEvent,
        detail: AuditDetail,
    ) -> DispatchResult<()> {
        let mut entry = AuditEntry::new(notification_id, event, self.clock.now());
        entry.attempt = detail.attempt;
        entry.provider = detail.provider;
        entry.provider_response = detail.provider_response;
        entry.message = detail.message;
        entry.is_error = detail.is_error;

        self.repository
            .append_audit(&entry)
            .await
            .map_err(|e| DispatchError::AuditWriteFailed(e.to_string()))
    }

    pub async fn trail(&self, notification_id: Uuid) -> DispatchResult<Vec<AuditEntry>> {
        Ok(self.repository.list_audit(notification_id).await?)
    }
}
