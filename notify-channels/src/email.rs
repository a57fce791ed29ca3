use async_trait::async_trait;
use notify_core::config::DeliveryConfig;
use notify_core::{Channel, Notification, Priority};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ChannelError;
use crate::provider::{
    require_recipient, transport_failure, ChannelProvider, ProviderCapabilities, SendResult,
};

const RESEND_API_URL: &str = "https://api.resend.com/emails";
pub const PROVIDER_NAME: &str = "resend";

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Wraps plain text in a minimal HTML document for clients that only render HTML.
fn fallback_html(subject: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"></head>
<body style="font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="font-size: 22px;">{}</h1>
    <p style="white-space: pre-line;">{}</p>
</body>
</html>"#,
        html_escape(subject),
        html_escape(body)
    )
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

pub struct EmailProvider {
    client: Option<Arc<reqwest::Client>>,
    api_key: Option<String>,
    from_email: Option<String>,
}

impl EmailProvider {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let (client, api_key, from_email) = match (&config.resend_api_key, &config.resend_from_email)
        {
            (Some(api_key), Some(from_email)) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

                tracing::info!("Resend email provider initialized");
                (
                    Some(Arc::new(client)),
                    Some(api_key.clone()),
                    Some(from_email.clone()),
                )
            }
            _ => {
                tracing::warn!("Email provider unavailable (missing Resend configuration)");
                (None, None, None)
            }
        };

        Ok(Self {
            client,
            api_key,
            from_email,
        })
    }

    fn subject(notification: &Notification) -> String {
        notification
            .title
            .clone()
            .or_else(|| {
                notification
                    .channel_value("subject")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Notification".to_string())
    }
}

#[async_trait]
impl ChannelProvider for EmailProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> Result<SendResult, ChannelError> {
        let (client, api_key, default_from) =
            match (&self.client, &self.api_key, &self.from_email) {
                (Some(c), Some(k), Some(f)) => (c, k, f),
                _ => return Err(ChannelError::NotConfigured(PROVIDER_NAME.to_string())),
            };

        let to = require_recipient(notification, Channel::Email)?;
        let subject = Self::subject(notification);
        let from = notification
            .channel_value("from")
            .and_then(|v| v.as_str())
            .unwrap_or(default_from);

        let text = (!notification.content.is_empty()).then(|| notification.content.clone());
        let html = notification
            .content_html
            .clone()
            .unwrap_or_else(|| fallback_html(&subject, &notification.content));

        let request = ResendEmailRequest {
            from: from.to_string(),
            to: vec![to.to_string()],
            subject,
            html,
            text,
            reply_to: notification
                .channel_value("reply_to")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };

        let response = match client
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(transport_failure(PROVIDER_NAME, e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Ok(SendResult::failed(format!(
                "Resend API returned error status {}: {}",
                status, body
            ))
            .with_response(serde_json::json!({ "status": status.as_u16(), "body": body })));
        }

        match response.json::<ResendEmailResponse>().await {
            Ok(parsed) => {
                tracing::debug!(
                    notification_id = %notification.id,
                    email_id = %parsed.id,
                    "Email accepted by Resend"
                );
                Ok(SendResult::sent(
                    Some(parsed.id.clone()),
                    Some(serde_json::json!({ "id": parsed.id })),
                ))
            }
            // Accepted but unreadable: the mail is out, only the id is lost.
            Err(e) => {
                tracing::warn!("Failed to parse Resend API response: {}", e);
                Ok(SendResult::sent(None, None))
            }
        }
    }

    fn validate(&self, notification: &Notification) -> Result<(), ChannelError> {
        let to = require_recipient(notification, Channel::Email)?;
        if !to.contains('@') {
            return Err(ChannelError::Validation(format!(
                "invalid email address: {}",
                to
            )));
        }
        let has_html = notification
            .content_html
            .as_deref()
            .map_or(false, |h| !h.trim().is_empty());
        if notification.content.trim().is_empty() && !has_html {
            return Err(ChannelError::Validation(
                "email requires content or content_html".to_string(),
            ));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.client.is_none() {
            return Err(ChannelError::NotConfigured(PROVIDER_NAME.to_string()));
        }
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batch: false,
            max_batch_size: 1,
            rate_limit_per_minute: 600,
            supported_priorities: Priority::ALL.to_vec(),
            supports_rich_content: true,
            supports_attachments: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notify_core::DataValue;

    fn unconfigured() -> EmailProvider {
        EmailProvider::new(&DeliveryConfig::default()).unwrap()
    }

    fn email(to: &str, content: &str) -> Notification {
        let mut n = Notification::new(Channel::Email, content, Utc::now());
        n.recipient_email = Some(to.to_string());
        n
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<b>Tom & 'Jerry'</b>"),
            "&lt;b&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_validate_requires_at_sign() {
        let provider = unconfigured();
        assert!(provider.validate(&email("ann@example.com", "hi")).is_ok());
        assert!(matches!(
            provider.validate(&email("ann.example.com", "hi")),
            Err(ChannelError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_accepts_html_only_body() {
        let provider = unconfigured();
        let mut n = email("ann@example.com", "");
        assert!(provider.validate(&n).is_err());

        n.content_html = Some("<p>hi</p>".to_string());
        assert!(provider.validate(&n).is_ok());
    }

    #[test]
    fn test_subject_prefers_title_then_channel_data() {
        let mut n = email("ann@example.com", "hi");
        assert_eq!(EmailProvider::subject(&n), "Notification");

        n.channel_data = Some([("subject".to_string(), DataValue::from("From data"))].into());
        assert_eq!(EmailProvider::subject(&n), "From data");

        n.title = Some("Your trip".to_string());
        assert_eq!(EmailProvider::subject(&n), "Your trip");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_refuses_to_send() {
        let provider = unconfigured();
        assert!(provider.health_check().await.is_err());
        assert!(matches!(
            provider.send(&email("ann@example.com", "hi")).await,
            Err(ChannelError::NotConfigured(_))
        ));
    }
}
