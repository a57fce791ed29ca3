use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{
    AuditRepository, BatchRepository, NotificationRepository, PreferenceRepository,
    ProviderConfigRepository, TemplateRepository,
};
use crate::types::{
    AuditEntry, Batch, BatchOutcome, Channel, Notification, NotificationStatus, NotificationType,
    Preference, ProviderConfig, Template,
};

/// Process-local record store.
///
/// Used by tests and by the runner when no database is configured. State is
/// lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    notifications: RwLock<HashMap<Uuid, Notification>>,
    templates: RwLock<HashMap<Uuid, Template>>,
    preferences: RwLock<Vec<Preference>>,
    audit: RwLock<Vec<AuditEntry>>,
    provider_configs: RwLock<HashMap<String, ProviderConfig>>,
    batches: RwLock<HashMap<Uuid, Batch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut rows = self.notifications.write().await;
        if rows.contains_key(&notification.id) {
            return Err(anyhow!("Notification {} already exists", notification.id));
        }
        rows.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.notifications.read().await.get(&id).cloned())
    }

    async fn update_notification(&self, notification: &Notification) -> Result<bool> {
        let mut rows = self.notifications.write().await;
        match rows.get_mut(&notification.id) {
            Some(stored) if stored.version == notification.version => {
                let mut next = notification.clone();
                next.version += 1;
                *stored = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(anyhow!("Notification {} does not exist", notification.id)),
        }
    }

    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let rows = self.notifications.read().await;
        let mut due: Vec<Notification> = rows
            .values()
            .filter(|n| n.status == NotificationStatus::Queued)
            .filter(|n| n.scheduled_at.map_or(false, |at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|n| n.scheduled_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let rows = self.notifications.read().await;
        let mut due: Vec<Notification> = rows
            .values()
            .filter(|n| n.status == NotificationStatus::Retrying)
            .filter(|n| n.next_retry_at.map_or(true, |at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|n| n.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = self.notifications.read().await;
        let mut stale: Vec<Notification> = rows
            .values()
            .filter(|n| n.status == NotificationStatus::Pending)
            .filter(|n| n.created_at <= created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|n| n.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn count_sent_since(
        &self,
        recipient_id: &str,
        channel: Channel,
        notification_type: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let rows = self.notifications.read().await;
        let count = rows
            .values()
            .filter(|n| n.recipient_id.as_deref() == Some(recipient_id))
            .filter(|n| n.channel == channel && n.notification_type == notification_type)
            .filter(|n| n.sent_at.map_or(false, |at| at >= since))
            .count();
        Ok(count as i64)
    }

    async fn count_by_template(&self, template_id: Uuid) -> Result<i64> {
        let rows = self.notifications.read().await;
        Ok(rows
            .values()
            .filter(|n| n.template_id == Some(template_id))
            .count() as i64)
    }

    async fn list_by_batch(&self, batch_id: Uuid) -> Result<Vec<Notification>> {
        let rows = self.notifications.read().await;
        let mut members: Vec<Notification> = rows
            .values()
            .filter(|n| n.batch_id == Some(batch_id))
            .cloned()
            .collect();
        members.sort_by_key(|n| n.created_at);
        Ok(members)
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn insert_template(&self, template: &Template) -> Result<()> {
        let mut rows = self.templates.write().await;
        if rows.values().any(|t| t.name == template.name) {
            return Err(anyhow!("Template name {} already taken", template.name));
        }
        rows.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>> {
        let rows = self.templates.read().await;
        Ok(rows.values().find(|t| t.name == name).cloned())
    }

    async fn update_template(&self, template: &Template) -> Result<()> {
        let mut rows = self.templates.write().await;
        match rows.get_mut(&template.id) {
            Some(stored) => {
                *stored = template.clone();
                Ok(())
            }
            None => Err(anyhow!("Template {} does not exist", template.id)),
        }
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool> {
        Ok(self.templates.write().await.remove(&id).is_some())
    }

    async fn list_templates(&self, active_only: bool) -> Result<Vec<Template>> {
        let rows = self.templates.read().await;
        let mut templates: Vec<Template> = rows
            .values()
            .filter(|t| !active_only || t.is_active)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}

#[async_trait]
impl PreferenceRepository for MemoryStore {
    async fn get_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> Result<Option<Preference>> {
        let rows = self.preferences.read().await;
        Ok(rows
            .iter()
            .find(|p| {
                p.user_id == user_id
                    && p.channel == channel
                    && p.notification_type == notification_type
            })
            .cloned())
    }

    async fn list_preferences(&self, user_id: &str) -> Result<Vec<Preference>> {
        let rows = self.preferences.read().await;
        Ok(rows.iter().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference> {
        let mut rows = self.preferences.write().await;
        let existing = rows.iter_mut().find(|p| {
            p.user_id == preference.user_id
                && p.channel == preference.channel
                && p.notification_type == preference.notification_type
        });

        match existing {
            Some(stored) => {
                let created_at = stored.created_at;
                let id = stored.id;
                *stored = preference.clone();
                stored.id = id;
                stored.created_at = created_at;
                Ok(stored.clone())
            }
            None => {
                rows.push(preference.clone());
                Ok(preference.clone())
            }
        }
    }

    async fn delete_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> Result<bool> {
        let mut rows = self.preferences.write().await;
        let before = rows.len();
        rows.retain(|p| {
            !(p.user_id == user_id
                && p.channel == channel
                && p.notification_type == notification_type)
        });
        Ok(rows.len() != before)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, notification_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows = self.audit.read().await;
        Ok(rows
            .iter()
            .filter(|e| e.notification_id == notification_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProviderConfigRepository for MemoryStore {
    async fn save_provider_config(&self, config: &ProviderConfig) -> Result<()> {
        self.provider_configs
            .write()
            .await
            .insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn get_provider_config(&self, name: &str) -> Result<Option<ProviderConfig>> {
        Ok(self.provider_configs.read().await.get(name).cloned())
    }

    async fn list_provider_configs(&self) -> Result<Vec<ProviderConfig>> {
        let rows = self.provider_configs.read().await;
        let mut configs: Vec<ProviderConfig> = rows.values().cloned().collect();
        configs.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
        Ok(configs)
    }
}

#[async_trait]
impl BatchRepository for MemoryStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<()> {
        self.batches.write().await.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>> {
        Ok(self.batches.read().await.get(&id).cloned())
    }

    async fn record_batch_outcome(
        &self,
        id: Uuid,
        outcome: BatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Batch>> {
        let mut rows = self.batches.write().await;
        Ok(rows.get_mut(&id).map(|batch| {
            batch.record(outcome, now);
            batch.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = MemoryStore::new();
        let n = Notification::new(Channel::Email, "hi", Utc::now());
        store.insert_notification(&n).await.unwrap();

        let mut first = store.get_notification(n.id).await.unwrap().unwrap();
        let mut second = first.clone();

        first.status = NotificationStatus::Sending;
        assert!(store.update_notification(&first).await.unwrap());

        second.status = NotificationStatus::Cancelled;
        assert!(!store.update_notification(&second).await.unwrap());

        let stored = store.get_notification(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sending);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_due_retries_respects_next_retry_at() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut due = Notification::new(Channel::Sms, "a", now);
        due.status = NotificationStatus::Retrying;
        due.next_retry_at = Some(now - Duration::seconds(1));

        let mut later = Notification::new(Channel::Sms, "b", now);
        later.status = NotificationStatus::Retrying;
        later.next_retry_at = Some(now + Duration::seconds(60));

        store.insert_notification(&due).await.unwrap();
        store.insert_notification(&later).await.unwrap();

        let found = store.due_retries(now, 100).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_upsert_preference_keeps_identity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let pref = Preference {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            channel: Channel::Email,
            notification_type: NotificationType::Marketing,
            is_enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: None,
            max_per_day: 0,
            max_per_week: 0,
            max_per_month: 0,
            created_at: now,
            updated_at: now,
        };
        store.upsert_preference(&pref).await.unwrap();

        let mut changed = pref.clone();
        changed.id = Uuid::new_v4();
        changed.is_enabled = false;
        let stored = store.upsert_preference(&changed).await.unwrap();

        assert_eq!(stored.id, pref.id);
        assert!(!stored.is_enabled);
        assert_eq!(store.list_preferences("u1").await.unwrap().len(), 1);
    }
}
