//! Record store contracts.
//!
//! The engine only talks to these traits; [`crate::memory::MemoryStore`] and
//! [`crate::pg_store::PgStore`] implement all of them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{
    AuditEntry, Batch, BatchOutcome, Channel, Notification, NotificationType, Preference,
    ProviderConfig, Template,
};

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>>;

    /// Compare-and-swap write. Succeeds only when the stored row still has
    /// `notification.version`; the stored version is then incremented.
    async fn update_notification(&self, notification: &Notification) -> Result<bool>;

    /// `queued` notifications whose `scheduled_at` is at or before `now`.
    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;

    /// `retrying` notifications whose `next_retry_at` is at or before `now`
    /// or unset (manual retries).
    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;

    /// `pending` notifications created at or before `created_before`.
    async fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// Notifications for the triple with `sent_at` at or after `since`,
    /// whatever their later status.
    async fn count_sent_since(
        &self,
        recipient_id: &str,
        channel: Channel,
        notification_type: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    async fn count_by_template(&self, template_id: Uuid) -> Result<i64>;

    async fn list_by_batch(&self, batch_id: Uuid) -> Result<Vec<Notification>>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn insert_template(&self, template: &Template) -> Result<()>;

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>>;

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>>;

    async fn update_template(&self, template: &Template) -> Result<()>;

    async fn delete_template(&self, id: Uuid) -> Result<bool>;

    async fn list_templates(&self, active_only: bool) -> Result<Vec<Template>>;
}

#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn get_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> Result<Option<Preference>>;

    async fn list_preferences(&self, user_id: &str) -> Result<Vec<Preference>>;

    /// Insert, or replace the row with the same (user, channel, type).
    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference>;

    async fn delete_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> Result<bool>;
}

/// Append-only.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Entries for one notification in the order they were written.
    async fn list_audit(&self, notification_id: Uuid) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
pub trait ProviderConfigRepository: Send + Sync {
    async fn save_provider_config(&self, config: &ProviderConfig) -> Result<()>;

    async fn get_provider_config(&self, name: &str) -> Result<Option<ProviderConfig>>;

    async fn list_provider_configs(&self) -> Result<Vec<ProviderConfig>>;
}

#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn insert_batch(&self, batch: &Batch) -> Result<()>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>>;

    /// Atomically apply one member outcome to the batch counters.
    async fn record_batch_outcome(
        &self,
        id: Uuid,
        outcome: BatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Batch>>;
}

/// Every repository the engine needs, usually backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub notifications: Arc<dyn NotificationRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub preferences: Arc<dyn PreferenceRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub provider_configs: Arc<dyn ProviderConfigRepository>,
    pub batches: Arc<dyn BatchRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: NotificationRepository
            + TemplateRepository
            + PreferenceRepository
            + AuditRepository
            + ProviderConfigRepository
            + BatchRepository
            + 'static,
    {
        Self {
            notifications: store.clone(),
            templates: store.clone(),
            preferences: store.clone(),
            audit: store.clone(),
            provider_configs: store.clone(),
            batches: store,
        }
    }
}
