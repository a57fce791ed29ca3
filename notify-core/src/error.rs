use thiserror::Error;
use uuid::Uuid;

use crate::types::{Channel, NotificationStatus};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Recipient required for channel {0}")]
    RecipientRequired(Channel),

    #[error("Notification blocked by preference: {0}")]
    PreferenceBlocked(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template is inactive: {0}")]
    TemplateInactive(String),

    #[error("Template already exists: {0}")]
    TemplateExists(String),

    #[error("Template {0} is referenced by existing notifications")]
    TemplateInUse(Uuid),

    #[error("Notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Cannot cancel notification in status {0}")]
    CannotCancel(NotificationStatus),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error("Notification {0} was modified concurrently")]
    ConcurrentModification(Uuid),

    #[error("No active provider for channel {0}")]
    NoActiveProvider(Channel),

    #[error("Provider is not healthy: {0}")]
    ProviderNotHealthy(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Audit write failed: {0}")]
    AuditWriteFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
