use chrono::{DateTime, Utc};
use notify_core::{Batch, Channel, DataMap, Notification, NotificationType, Priority};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intent to deliver one notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub channel: Channel,
    #[serde(default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_device_id: Option<String>,
    pub recipient_webhook: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    pub content_html: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_data: Option<DataMap>,
    pub channel_data: Option<DataMap>,
    /// Pin delivery to a named provider instead of first-healthy fallback.
    pub channel_provider: Option<String>,
    pub max_retries: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<DataMap>,
}

impl SendRequest {
    pub fn new(channel: Channel, content: impl Into<String>) -> Self {
        Self {
            channel,
            notification_type: NotificationType::default(),
            priority: Priority::default(),
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
            max_retries: None,
            expires_at: None,
            metadata: None,
        }
    }

    pub(crate) fn into_notification(self, default_max_retries: i32, now: DateTime<Utc>) -> Notification {
        let mut n = Notification::new(self.channel, self.content, now);
        n.notification_type = self.notification_type;
        n.priority = self.priority;
        n.sender_id = self.sender_id;
        n.recipient_id = self.recipient_id;
        n.recipient_email = self.recipient_email;
        n.recipient_phone = self.recipient_phone;
        n.recipient_device_id = self.recipient_device_id;
        n.recipient_webhook = self.recipient_webhook;
        n.title = self.title;
        n.content_html = self.content_html;
        n.template_id = self.template_id;
        n.template_data = self.template_data;
        n.channel_data = self.channel_data;
        n.channel_provider = self.channel_provider.filter(|p| !p.is_empty());
        n.max_retries = self.max_retries.unwrap_or(default_max_retries).max(0);
        n.expires_at = self.expires_at;
        n.metadata = self.metadata;
        n
    }
}

/// Per-recipient addressing for a batch send. Set fields replace the
/// corresponding fields of the batch's shared request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRecipient {
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_device_id: Option<String>,
    pub recipient_webhook: Option<String>,
    pub channel_data: Option<DataMap>,
}

impl BatchRecipient {
    pub(crate) fn apply_to(self, base: &SendRequest) -> SendRequest {
        let mut request = base.clone();
        request.recipient_id = self.recipient_id.or(request.recipient_id);
        request.recipient_email = self.recipient_email.or(request.recipient_email);
        request.recipient_phone = self.recipient_phone.or(request.recipient_phone);
        request.recipient_device_id = self.recipient_device_id.or(request.recipient_device_id);
        request.recipient_webhook = self.recipient_webhook.or(request.recipient_webhook);
        request.channel_data = self.channel_data.or(request.channel_data);
        request
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub request: SendRequest,
    pub recipients: Vec<BatchRecipient>,
}

/// A recipient the batch did not accept, by index into `recipients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecipient {
    pub index: usize,
    pub recipient_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch: Batch,
    pub notifications: Vec<Notification>,
    pub rejected: Vec<RejectedRecipient>,
}

/// Send rendered from a stored template. Fields left `None` fall back to the
/// template's own channel and type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSendRequest {
    pub template_id: Option<Uuid>,
    pub template_name: Option<String>,
    #[serde(default)]
    pub data: DataMap,
    pub channel: Option<Channel>,
    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub priority: Priority,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_device_id: Option<String>,
    pub recipient_webhook: Option<String>,
    pub channel_data: Option<DataMap>,
    pub channel_provider: Option<String>,
    pub max_retries: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<DataMap>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_recipient_overrides_only_set_fields() {
        let mut base = SendRequest::new(Channel::Email, "Your itinerary is ready");
        base.recipient_email = Some("fallback@example.com".to_string());
        base.recipient_id = Some("shared".to_string());

        let request = BatchRecipient {
            recipient_id: Some("u7".to_string()),
            ..Default::default()
        }
        .apply_to(&base);

        assert_eq!(request.recipient_id.as_deref(), Some("u7"));
        assert_eq!(request.recipient_email.as_deref(), Some("fallback@example.com"));
        assert_eq!(request.content, "Your itinerary is ready");
    }

    #[test]
    fn test_into_notification_defaults() {
        let mut request = SendRequest::new(Channel::Sms, "Gate B12");
        request.channel_provider = Some(String::new());
        let n = request.into_notification(3, Utc::now());
        assert_eq!(n.max_retries, 3);
        assert_eq!(n.channel_provider, None);
        assert_eq!(n.version, 0);
    }
}
