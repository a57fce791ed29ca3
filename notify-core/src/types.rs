use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque key/value payload carried on notifications and templates.
pub type DataMap = BTreeMap<String, DataValue>;

/// A small tagged union for opaque payload values.
///
/// The engine never interprets these; channel adapters and the template
/// renderer do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<DataValue>),
    Map(DataMap),
}

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&DataMap> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::String(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Number(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Number(value as f64)
    }
}

/// Error returned when a stored string does not name a known enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Kind of notification, used for preference matching.
    NotificationType, "notification type" {
        Transactional => "transactional",
        Marketing => "marketing",
        Alert => "alert",
        Reminder => "reminder",
        System => "system",
    }
);

string_enum!(
    /// Delivery mechanism.
    Channel, "channel" {
        Email => "email",
        Sms => "sms",
        Push => "push",
        Firebase => "firebase",
        Webhook => "webhook",
    }
);

string_enum!(
    Priority, "priority" {
        Low => "low",
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
);

string_enum!(
    /// Lifecycle state of a notification.
    NotificationStatus, "notification status" {
        Pending => "pending",
        Queued => "queued",
        Sending => "sending",
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
        Retrying => "retrying",
        Failed => "failed",
        Cancelled => "cancelled",
        Archived => "archived",
    }
);

string_enum!(
    ProviderHealth, "provider health" {
        Healthy => "healthy",
        Degraded => "degraded",
        Down => "down",
    }
);

string_enum!(
    /// Lifecycle event recorded in the audit trail.
    AuditEvent, "audit event" {
        Created => "created",
        Scheduled => "scheduled",
        Sending => "sending",
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
        Archived => "archived",
        SendFailed => "send_failed",
        RetryScheduled => "retry_scheduled",
        RetryInitiated => "retry_initiated",
        Cancelled => "cancelled",
        Expired => "expired",
    }
);

string_enum!(
    BatchStatus, "batch status" {
        Processing => "processing",
        Completed => "completed",
    }
);

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Default for NotificationType {
    fn default() -> Self {
        NotificationType::Transactional
    }
}

impl NotificationStatus {
    /// Whether `self -> next` is an edge of the delivery state machine.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;

        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Cancelled)
                | (Queued, Sending)
                | (Queued, Cancelled)
                | (Sending, Sent)
                | (Sending, Delivered)
                | (Sending, Retrying)
                | (Sending, Failed)
                | (Retrying, Sending)
                | (Retrying, Retrying)
                | (Retrying, Failed)
                | (Failed, Retrying)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Sent, Archived)
                | (Delivered, Read)
                | (Delivered, Archived)
                | (Read, Archived)
        )
    }

    /// States a delivery attempt may start from.
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            NotificationStatus::Pending | NotificationStatus::Queued | NotificationStatus::Retrying
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NotificationStatus::Failed | NotificationStatus::Cancelled | NotificationStatus::Archived
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub batch_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_device_id: Option<String>,
    pub recipient_webhook: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub content_html: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_data: Option<DataMap>,
    pub channel_data: Option<DataMap>,
    pub channel_provider: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub metadata: Option<DataMap>,
    pub external_id: Option<String>,
    pub provider_response: Option<serde_json::Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// A fresh pending notification with every optional field empty.
    pub fn new(channel: Channel, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id: None,
            notification_type: NotificationType::default(),
            channel,
            priority: Priority::default(),
            status: NotificationStatus::Pending,
            sender_id: None,
            recipient_id: None,
            recipient_email: None,
            recipient_phone: None,
            recipient_device_id: None,
            recipient_webhook: None,
            title: None,
            content: content.into(),
            content_html: None,
            template_id: None,
            template_data: None,
            channel_data: None,
            channel_provider: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            last_error: None,
            scheduled_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            expires_at: None,
            archived_at: None,
            metadata: None,
            external_id: None,
            provider_response: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The recipient address the notification's channel delivers to.
    pub fn recipient_address(&self) -> Option<&str> {
        let address = match self.channel {
            Channel::Email => self.recipient_email.as_deref(),
            Channel::Sms => self.recipient_phone.as_deref(),
            Channel::Push | Channel::Firebase => self.recipient_device_id.as_deref(),
            Channel::Webhook => self.recipient_webhook.as_deref(),
        };
        address.filter(|a| !a.trim().is_empty())
    }

    pub fn channel_value(&self, key: &str) -> Option<&DataValue> {
        self.channel_data.as_ref().and_then(|data| data.get(key))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub channel: Option<Channel>,
    pub notification_type: NotificationType,
    pub subject: Option<String>,
    pub body: String,
    pub body_html: Option<String>,
    pub variables: Vec<String>,
    pub is_active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub id: Uuid,
    pub user_id: String,
    pub channel: Channel,
    pub notification_type: NotificationType,
    pub is_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub timezone: Option<String>,
    pub max_per_day: i32,
    pub max_per_week: i32,
    pub max_per_month: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub channel: Channel,
    pub config: serde_json::Value,
    pub health: ProviderHealth,
    pub rate_limit: i32,
    pub usage_count: i32,
    pub usage_window_start: DateTime<Utc>,
    pub priority: i32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, channel: Channel, rate_limit: i32, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            channel,
            config: serde_json::Value::Object(Default::default()),
            health: ProviderHealth::Healthy,
            rate_limit,
            usage_count: 0,
            usage_window_start: now,
            priority: 0,
            last_health_check: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub event: AuditEvent,
    pub attempt: Option<i32>,
    pub provider: Option<String>,
    pub provider_response: Option<serde_json::Value>,
    pub message: Option<String>,
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(notification_id: Uuid, event: AuditEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            event,
            attempt: None,
            provider: None,
            provider_response: None,
            message: None,
            is_error: false,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub total_count: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which counter of a batch a member outcome increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Sent,
    Delivered,
    Failed,
}

impl Batch {
    pub fn new(total_count: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            total_count,
            sent_count: 0,
            delivered_count: 0,
            failed_count: 0,
            status: BatchStatus::Processing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one member outcome. A member delivered synchronously counts as
    /// both sent and delivered.
    pub fn record(&mut self, outcome: BatchOutcome, now: DateTime<Utc>) {
        match outcome {
            BatchOutcome::Sent => self.sent_count += 1,
            BatchOutcome::Delivered => self.delivered_count += 1,
            BatchOutcome::Failed => self.failed_count += 1,
        }
        if self.sent_count + self.failed_count >= self.total_count {
            self.status = BatchStatus::Completed;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_machine_edges() {
        use NotificationStatus::*;

        assert!(Pending.can_transition_to(Sending));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Sending.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Failed));
        assert!(Sent.can_transition_to(Archived));

        assert!(!Sending.can_transition_to(Cancelled));
        assert!(!Retrying.can_transition_to(Cancelled));
        assert!(!Sent.can_transition_to(Sending));
        assert!(!Cancelled.can_transition_to(Sending));
        assert!(!Pending.can_transition_to(Sent));
        assert!(!Archived.can_transition_to(Read));
    }

    #[test]
    fn test_every_status_round_trips_through_its_name() {
        for status in NotificationStatus::ALL {
            assert_eq!(status.as_str().parse::<NotificationStatus>().unwrap(), *status);
        }
        assert!("bogus".parse::<Channel>().is_err());
    }

    #[test]
    fn test_recipient_address_follows_channel() {
        let mut n = Notification::new(Channel::Sms, "hi", Utc::now());
        n.recipient_email = Some("a@b.com".to_string());
        assert_eq!(n.recipient_address(), None);

        n.recipient_phone = Some("  ".to_string());
        assert_eq!(n.recipient_address(), None);

        n.recipient_phone = Some("+15550100".to_string());
        assert_eq!(n.recipient_address(), Some("+15550100"));
    }

    #[test]
    fn test_data_value_untagged_json() {
        let json = serde_json::json!({"name": "Ann", "count": 2, "tags": ["a"], "nested": {"ok": true}});
        let map: DataMap = serde_json::from_value(json).unwrap();
        assert_eq!(map["name"].as_str(), Some("Ann"));
        assert_eq!(map["count"].as_u64(), Some(2));
        assert!(matches!(map["tags"], DataValue::List(_)));
        assert!(map["nested"].as_map().is_some());
    }

    #[test]
    fn test_batch_completes_when_all_members_settle() {
        let now = Utc::now();
        let mut batch = Batch::new(2, now);
        batch.record(BatchOutcome::Sent, now);
        assert_eq!(batch.status, BatchStatus::Processing);
        batch.record(BatchOutcome::Failed, now);
        assert_eq!(batch.status, BatchStatus::Completed);
    }
}
