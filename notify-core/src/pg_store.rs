//! Postgres-backed record store (diesel-async over a deadpool pool).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::schema::{
    notify_audit_entries, notify_batches, notify_notifications, notify_preferences,
    notify_provider_configs, notify_templates,
};
use crate::store::{
    AuditRepository, BatchRepository, NotificationRepository, PreferenceRepository,
    ProviderConfigRepository, TemplateRepository,
};
use crate::types::{
    AuditEntry, Batch, BatchOutcome, BatchStatus, Channel, DataMap, Notification,
    NotificationStatus, NotificationType, Preference, ProviderConfig, Template,
};

pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

fn map_to_json(map: &Option<DataMap>) -> Result<Option<serde_json::Value>> {
    map.as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("Failed to encode data map")
}

fn json_to_map(value: Option<serde_json::Value>) -> Result<Option<DataMap>> {
    value
        .map(serde_json::from_value)
        .transpose()
        .context("Failed to decode data map")
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = notify_notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct NotificationRow {
    id: Uuid,
    batch_id: Option<Uuid>,
    notification_type: String,
    channel: String,
    priority: String,
    status: String,
    sender_id: Option<String>,
    recipient_id: Option<String>,
    recipient_email: Option<String>,
    recipient_phone: Option<String>,
    recipient_device_id: Option<String>,
    recipient_webhook: Option<String>,
    title: Option<String>,
    content: String,
    content_html: Option<String>,
    template_id: Option<Uuid>,
    template_data: Option<serde_json::Value>,
    channel_data: Option<serde_json::Value>,
    channel_provider: Option<String>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
    metadata: Option<serde_json::Value>,
    external_id: Option<String>,
    provider_response: Option<serde_json::Value>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<&Notification> for NotificationRow {
    type Error = anyhow::Error;

    fn try_from(n: &Notification) -> Result<Self> {
        Ok(Self {
            id: n.id,
            batch_id: n.batch_id,
            notification_type: n.notification_type.as_str().to_string(),
            channel: n.channel.as_str().to_string(),
            priority: n.priority.as_str().to_string(),
            status: n.status.as_str().to_string(),
            sender_id: n.sender_id.clone(),
            recipient_id: n.recipient_id.clone(),
            recipient_email: n.recipient_email.clone(),
            recipient_phone: n.recipient_phone.clone(),
            recipient_device_id: n.recipient_device_id.clone(),
            recipient_webhook: n.recipient_webhook.clone(),
            title: n.title.clone(),
            content: n.content.clone(),
            content_html: n.content_html.clone(),
            template_id: n.template_id,
            template_data: map_to_json(&n.template_data)?,
            channel_data: map_to_json(&n.channel_data)?,
            channel_provider: n.channel_provider.clone(),
            retry_count: n.retry_count,
            max_retries: n.max_retries,
            next_retry_at: n.next_retry_at,
            last_error: n.last_error.clone(),
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            delivered_at: n.delivered_at,
            read_at: n.read_at,
            failed_at: n.failed_at,
            expires_at: n.expires_at,
            archived_at: n.archived_at,
            metadata: map_to_json(&n.metadata)?,
            external_id: n.external_id.clone(),
            provider_response: n.provider_response.clone(),
            version: n.version,
            created_at: n.created_at,
            updated_at: n.updated_at,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            batch_id: row.batch_id,
            notification_type: row.notification_type.parse()?,
            channel: row.channel.parse()?,
            priority: row.priority.parse()?,
            status: row.status.parse()?,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            recipient_email: row.recipient_email,
            recipient_phone: row.recipient_phone,
            recipient_device_id: row.recipient_device_id,
            recipient_webhook: row.recipient_webhook,
            title: row.title,
            content: row.content,
            content_html: row.content_html,
            template_id: row.template_id,
            template_data: json_to_map(row.template_data)?,
            channel_data: json_to_map(row.channel_data)?,
            channel_provider: row.channel_provider,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            failed_at: row.failed_at,
            expires_at: row.expires_at,
            archived_at: row.archived_at,
            metadata: json_to_map(row.metadata)?,
            external_id: row.external_id,
            provider_response: row.provider_response,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>> {
    rows.into_iter().map(Notification::try_from).collect()
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let row = NotificationRow::try_from(notification)?;
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notify_notifications::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        let row: Option<NotificationRow> = notify_notifications::table
            .find(id)
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Notification::try_from).transpose()
    }

    async fn update_notification(&self, notification: &Notification) -> Result<bool> {
        let mut row = NotificationRow::try_from(notification)?;
        row.version = notification.version + 1;

        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notify_notifications::table
                .filter(notify_notifications::id.eq(notification.id))
                .filter(notify_notifications::version.eq(notification.version)),
        )
        .set(&row)
        .execute(&mut conn)
        .await?;

        Ok(updated == 1)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notify_notifications::table
            .filter(notify_notifications::status.eq(NotificationStatus::Queued.as_str()))
            .filter(notify_notifications::scheduled_at.le(now))
            .order(notify_notifications::scheduled_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notify_notifications::table
            .filter(notify_notifications::status.eq(NotificationStatus::Retrying.as_str()))
            .filter(
                notify_notifications::next_retry_at
                    .le(now)
                    .or(notify_notifications::next_retry_at.is_null()),
            )
            .order(notify_notifications::next_retry_at.asc().nulls_first())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notify_notifications::table
            .filter(notify_notifications::status.eq(NotificationStatus::Pending.as_str()))
            .filter(notify_notifications::created_at.le(created_before))
            .order(notify_notifications::created_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn count_sent_since(
        &self,
        recipient_id: &str,
        channel: Channel,
        notification_type: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let count = notify_notifications::table
            .filter(notify_notifications::recipient_id.eq(recipient_id))
            .filter(notify_notifications::channel.eq(channel.as_str()))
            .filter(notify_notifications::notification_type.eq(notification_type.as_str()))
            .filter(notify_notifications::sent_at.ge(since))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        Ok(count)
    }

    async fn count_by_template(&self, template_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let count = notify_notifications::table
            .filter(notify_notifications::template_id.eq(template_id))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        Ok(count)
    }

    async fn list_by_batch(&self, batch_id: Uuid) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notify_notifications::table
            .filter(notify_notifications::batch_id.eq(batch_id))
            .order(notify_notifications::created_at.asc())
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = notify_templates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct TemplateRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    channel: Option<String>,
    notification_type: String,
    subject: Option<String>,
    body: String,
    body_html: Option<String>,
    variables: serde_json::Value,
    is_active: bool,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Template> for TemplateRow {
    fn from(t: &Template) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            description: t.description.clone(),
            channel: t.channel.map(|c| c.as_str().to_string()),
            notification_type: t.notification_type.as_str().to_string(),
            subject: t.subject.clone(),
            body: t.body.clone(),
            body_html: t.body_html.clone(),
            variables: serde_json::Value::from(t.variables.clone()),
            is_active: t.is_active,
            version: t.version,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl TryFrom<TemplateRow> for Template {
    type Error = anyhow::Error;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            channel: row.channel.map(|c| c.parse()).transpose()?,
            notification_type: row.notification_type.parse()?,
            subject: row.subject,
            body: row.body,
            body_html: row.body_html,
            variables: serde_json::from_value(row.variables)
                .context("Failed to decode template variables")?,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl TemplateRepository for PgStore {
    async fn insert_template(&self, template: &Template) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notify_templates::table)
            .values(&TemplateRow::from(template))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
        let mut conn = self.pool.get().await?;
        let row: Option<TemplateRow> = notify_templates::table
            .find(id)
            .select(TemplateRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Template::try_from).transpose()
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>> {
        let mut conn = self.pool.get().await?;
        let row: Option<TemplateRow> = notify_templates::table
            .filter(notify_templates::name.eq(name))
            .select(TemplateRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Template::try_from).transpose()
    }

    async fn update_template(&self, template: &Template) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(notify_templates::table.find(template.id))
            .set(&TemplateRow::from(template))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(notify_templates::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn list_templates(&self, active_only: bool) -> Result<Vec<Template>> {
        let mut conn = self.pool.get().await?;
        let mut query = notify_templates::table
            .order(notify_templates::name.asc())
            .select(TemplateRow::as_select())
            .into_boxed();
        if active_only {
            query = query.filter(notify_templates::is_active.eq(true));
        }
        let rows: Vec<TemplateRow> = query.load(&mut conn).await?;
        rows.into_iter().map(Template::try_from).collect()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = notify_preferences)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct PreferenceRow {
    id: Uuid,
    user_id: String,
    channel: String,
    notification_type: String,
    is_enabled: bool,
    quiet_hours_start: Option<String>,
    quiet_hours_end: Option<String>,
    timezone: Option<String>,
    max_per_day: i32,
    max_per_week: i32,
    max_per_month: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Preference> for PreferenceRow {
    fn from(p: &Preference) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id.clone(),
            channel: p.channel.as_str().to_string(),
            notification_type: p.notification_type.as_str().to_string(),
            is_enabled: p.is_enabled,
            quiet_hours_start: p.quiet_hours_start.clone(),
            quiet_hours_end: p.quiet_hours_end.clone(),
            timezone: p.timezone.clone(),
            max_per_day: p.max_per_day,
            max_per_week: p.max_per_week,
            max_per_month: p.max_per_month,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl TryFrom<PreferenceRow> for Preference {
    type Error = anyhow::Error;

    fn try_from(row: PreferenceRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            channel: row.channel.parse()?,
            notification_type: row.notification_type.parse()?,
            is_enabled: row.is_enabled,
            quiet_hours_start: row.quiet_hours_start,
            quiet_hours_end: row.quiet_hours_end,
            timezone: row.timezone,
            max_per_day: row.max_per_day,
            max_per_week: row.max_per_week,
            max_per_month: row.max_per_month,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl PreferenceRepository for PgStore {
    async fn get_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> Result<Option<Preference>> {
        let mut conn = self.pool.get().await?;
        let row: Option<PreferenceRow> = notify_preferences::table
            .filter(notify_preferences::user_id.eq(user_id))
            .filter(notify_preferences::channel.eq(channel.as_str()))
            .filter(notify_preferences::notification_type.eq(notification_type.as_str()))
            .select(PreferenceRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Preference::try_from).transpose()
    }

    async fn list_preferences(&self, user_id: &str) -> Result<Vec<Preference>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<PreferenceRow> = notify_preferences::table
            .filter(notify_preferences::user_id.eq(user_id))
            .order((
                notify_preferences::channel.asc(),
                notify_preferences::notification_type.asc(),
            ))
            .select(PreferenceRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(Preference::try_from).collect()
    }

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference> {
        let mut conn = self.pool.get().await?;
        let row: PreferenceRow = diesel::insert_into(notify_preferences::table)
            .values(&PreferenceRow::from(preference))
            .on_conflict((
                notify_preferences::user_id,
                notify_preferences::channel,
                notify_preferences::notification_type,
            ))
            .do_update()
            .set((
                notify_preferences::is_enabled.eq(excluded(notify_preferences::is_enabled)),
                notify_preferences::quiet_hours_start
                    .eq(excluded(notify_preferences::quiet_hours_start)),
                notify_preferences::quiet_hours_end
                    .eq(excluded(notify_preferences::quiet_hours_end)),
                notify_preferences::timezone.eq(excluded(notify_preferences::timezone)),
                notify_preferences::max_per_day.eq(excluded(notify_preferences::max_per_day)),
                notify_preferences::max_per_week.eq(excluded(notify_preferences::max_per_week)),
                notify_preferences::max_per_month.eq(excluded(notify_preferences::max_per_month)),
                notify_preferences::updated_at.eq(excluded(notify_preferences::updated_at)),
            ))
            .returning(PreferenceRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Preference::try_from(row)
    }

    async fn delete_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(
            notify_preferences::table
                .filter(notify_preferences::user_id.eq(user_id))
                .filter(notify_preferences::channel.eq(channel.as_str()))
                .filter(notify_preferences::notification_type.eq(notification_type.as_str())),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = notify_audit_entries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct AuditRow {
    id: Uuid,
    notification_id: Uuid,
    event: String,
    attempt: Option<i32>,
    provider: Option<String>,
    provider_response: Option<serde_json::Value>,
    message: Option<String>,
    is_error: bool,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let row = AuditRow {
            id: entry.id,
            notification_id: entry.notification_id,
            event: entry.event.as_str().to_string(),
            attempt: entry.attempt,
            provider: entry.provider.clone(),
            provider_response: entry.provider_response.clone(),
            message: entry.message.clone(),
            is_error: entry.is_error,
            created_at: entry.created_at,
        };
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notify_audit_entries::table)
            .values(&row)
            .on_conflict(notify_audit_entries::id)
            .do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_audit(&self, notification_id: Uuid) -> Result<Vec<AuditEntry>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<AuditRow> = notify_audit_entries::table
            .filter(notify_audit_entries::notification_id.eq(notification_id))
            .order(notify_audit_entries::seq.asc())
            .select(AuditRow::as_select())
            .load(&mut conn)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: row.id,
                    notification_id: row.notification_id,
                    event: row.event.parse()?,
                    attempt: row.attempt,
                    provider: row.provider,
                    provider_response: row.provider_response,
                    message: row.message,
                    is_error: row.is_error,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = notify_provider_configs)]
#[diesel(primary_key(name))]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct ProviderConfigRow {
    name: String,
    channel: String,
    config: serde_json::Value,
    health: String,
    rate_limit: i32,
    usage_count: i32,
    usage_window_start: DateTime<Utc>,
    priority: i32,
    last_health_check: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProviderConfigRow> for ProviderConfig {
    type Error = anyhow::Error;

    fn try_from(row: ProviderConfigRow) -> Result<Self> {
        Ok(Self {
            name: row.name,
            channel: row.channel.parse()?,
            config: row.config,
            health: row.health.parse()?,
            rate_limit: row.rate_limit,
            usage_count: row.usage_count,
            usage_window_start: row.usage_window_start,
            priority: row.priority,
            last_health_check: row.last_health_check,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ProviderConfigRepository for PgStore {
    async fn save_provider_config(&self, config: &ProviderConfig) -> Result<()> {
        let row = ProviderConfigRow {
            name: config.name.clone(),
            channel: config.channel.as_str().to_string(),
            config: config.config.clone(),
            health: config.health.as_str().to_string(),
            rate_limit: config.rate_limit,
            usage_count: config.usage_count,
            usage_window_start: config.usage_window_start,
            priority: config.priority,
            last_health_check: config.last_health_check,
            created_at: config.created_at,
            updated_at: config.updated_at,
        };
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notify_provider_configs::table)
            .values(&row)
            .on_conflict(notify_provider_configs::name)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_provider_config(&self, name: &str) -> Result<Option<ProviderConfig>> {
        let mut conn = self.pool.get().await?;
        let row: Option<ProviderConfigRow> = notify_provider_configs::table
            .find(name)
            .select(ProviderConfigRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(ProviderConfig::try_from).transpose()
    }

    async fn list_provider_configs(&self) -> Result<Vec<ProviderConfig>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<ProviderConfigRow> = notify_provider_configs::table
            .order((
                notify_provider_configs::priority.asc(),
                notify_provider_configs::name.asc(),
            ))
            .select(ProviderConfigRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(ProviderConfig::try_from).collect()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = notify_batches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct BatchRow {
    id: Uuid,
    total_count: i32,
    sent_count: i32,
    delivered_count: i32,
    failed_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = anyhow::Error;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            total_count: row.total_count,
            sent_count: row.sent_count,
            delivered_count: row.delivered_count,
            failed_count: row.failed_count,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl BatchRepository for PgStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<()> {
        let row = BatchRow {
            id: batch.id,
            total_count: batch.total_count,
            sent_count: batch.sent_count,
            delivered_count: batch.delivered_count,
            failed_count: batch.failed_count,
            status: batch.status.as_str().to_string(),
            created_at: batch.created_at,
            updated_at: batch.updated_at,
        };
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notify_batches::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>> {
        let mut conn = self.pool.get().await?;
        let row: Option<BatchRow> = notify_batches::table
            .find(id)
            .select(BatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Batch::try_from).transpose()
    }

    async fn record_batch_outcome(
        &self,
        id: Uuid,
        outcome: BatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Batch>> {
        use notify_batches::dsl;

        let mut conn = self.pool.get().await?;
        let target = dsl::notify_batches.find(id);

        // Single-statement increments keep concurrent workers from losing counts.
        let row: Option<BatchRow> = match outcome {
            BatchOutcome::Sent => {
                diesel::update(target)
                    .set((dsl::sent_count.eq(dsl::sent_count + 1), dsl::updated_at.eq(now)))
                    .returning(BatchRow::as_returning())
                    .get_result(&mut conn)
                    .await
            }
            BatchOutcome::Delivered => {
                diesel::update(target)
                    .set((
                        dsl::delivered_count.eq(dsl::delivered_count + 1),
                        dsl::updated_at.eq(now),
                    ))
                    .returning(BatchRow::as_returning())
                    .get_result(&mut conn)
                    .await
            }
            BatchOutcome::Failed => {
                diesel::update(target)
                    .set((dsl::failed_count.eq(dsl::failed_count + 1), dsl::updated_at.eq(now)))
                    .returning(BatchRow::as_returning())
                    .get_result(&mut conn)
                    .await
            }
        }
        .optional()?;

        let Some(mut row) = row else {
            return Ok(None);
        };

        if row.sent_count + row.failed_count >= row.total_count
            && row.status != BatchStatus::Completed.as_str()
        {
            row = diesel::update(dsl::notify_batches.find(id))
                .set(dsl::status.eq(BatchStatus::Completed.as_str()))
                .returning(BatchRow::as_returning())
                .get_result(&mut conn)
                .await?;
        }

        Batch::try_from(row).map(Some)
    }
}
