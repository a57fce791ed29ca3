//! The dispatch engine.
//!
//! Accepting work (`send`, `schedule`, `send_batch`, `retry` and the
//! sweeps) only validates, persists, audits and enqueues a notification id.
//! Delivery happens in [`DispatchEngine::deliver`], run by the worker pool.
//!
//! Every status change goes through [`DispatchEngine::transition`], which
//! re-reads the row, checks the edge and writes with compare-and-swap on
//! `version`. Entering `sending` is therefore a lease: of two racing
//! attempts only one can win it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use notify_channels::{ChannelProvider, ProviderManager, SendResult};
use notify_core::config::DispatchConfig;
use notify_core::{
    AuditEntry, AuditEvent, Batch, BatchOutcome, BatchStatus, Channel, Clock, DispatchError,
    DispatchResult, Notification, NotifyContext, NotificationStatus, Repositories,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditDetail, AuditLog};
use crate::preferences::PreferenceService;
use crate::queue::{delivery_queue, DeliveryHandler, DeliveryQueue, DeliveryReceiver};
use crate::request::{BatchRequest, BatchResult, RejectedRecipient, SendRequest, TemplateSendRequest};
use crate::templates::TemplateService;

/// Rows fetched per scheduler sweep.
const SWEEP_LIMIT: i64 = 100;

pub const EXPIRED_ERROR: &str = "notification expired";

/// Delay before retry number `retry_count` (1-based): `base * 2^(n-1)`,
/// capped at `max`.
pub fn retry_delay(config: &DispatchConfig, retry_count: i32) -> Duration {
    let exponent = (retry_count.max(1) - 1) as u32;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let secs = config
        .base_retry_delay_secs
        .saturating_mul(factor)
        .min(config.max_retry_delay_secs);
    Duration::seconds(secs.min(i64::MAX as u64) as i64)
}

fn required_recipient(request: &SendRequest) -> Option<&str> {
    let address = match request.channel {
        Channel::Email => request.recipient_email.as_deref(),
        Channel::Sms => request.recipient_phone.as_deref(),
        Channel::Push | Channel::Firebase => request.recipient_device_id.as_deref(),
        Channel::Webhook => request.recipient_webhook.as_deref(),
    };
    address.filter(|a| !a.trim().is_empty())
}

/// Why a delivery attempt did not succeed.
struct AttemptFailure {
    provider: Option<String>,
    error: String,
    response: Option<serde_json::Value>,
}

pub struct DispatchEngine {
    repos: Repositories,
    providers: Arc<ProviderManager>,
    templates: TemplateService,
    preferences: PreferenceService,
    audit: AuditLog,
    queue: DeliveryQueue,
    /// Ids sitting in the queue, so sweeps do not enqueue them twice.
    queued_ids: Mutex<HashSet<Uuid>>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl DispatchEngine {
    /// Build the engine and the receiving end of its delivery queue. Hand
    /// the receiver to a [`crate::queue::WorkerPool`].
    pub fn new(
        ctx: &NotifyContext,
        providers: Arc<ProviderManager>,
    ) -> DispatchResult<(Self, DeliveryReceiver)> {
        let repos = ctx.repositories.clone();
        let clock = ctx.clock.clone();
        let config = ctx.config.dispatch.clone();
        let (queue, receiver) = delivery_queue(config.queue_capacity);

        let engine = Self {
            templates: TemplateService::new(
                repos.templates.clone(),
                repos.notifications.clone(),
                clock.clone(),
            )?,
            preferences: PreferenceService::new(
                repos.preferences.clone(),
                repos.notifications.clone(),
                clock.clone(),
            ),
            audit: AuditLog::new(repos.audit.clone(), clock.clone()),
            repos,
            providers,
            queue,
            queued_ids: Mutex::new(HashSet::new()),
            clock,
            config,
        };
        Ok((engine, receiver))
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    pub fn preferences(&self) -> &PreferenceService {
        &self.preferences
    }

    pub fn providers(&self) -> &Arc<ProviderManager> {
        &self.providers
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    // ---- accepting work ----

    pub async fn send(&self, request: SendRequest) -> DispatchResult<Notification> {
        self.admit(&request).await?;

        let notification = request.into_notification(self.config.default_max_retries, self.clock.now());
        self.repos.notifications.insert_notification(&notification).await?;
        self.audit
            .record(notification.id, AuditEvent::Created, AuditDetail::default())
            .await;

        tracing::info!(
            notification_id = %notification.id,
            channel = %notification.channel,
            "Notification accepted"
        );
        self.enqueue(notification.id).await;
        Ok(notification)
    }

    pub async fn schedule(
        &self,
        request: SendRequest,
        at: DateTime<Utc>,
    ) -> DispatchResult<Notification> {
        self.admit(&request).await?;

        let mut notification =
            request.into_notification(self.config.default_max_retries, self.clock.now());
        notification.status = NotificationStatus::Queued;
        notification.scheduled_at = Some(at);
        self.repos.notifications.insert_notification(&notification).await?;
        self.audit
            .record(
                notification.id,
                AuditEvent::Scheduled,
                AuditDetail::message(format!("scheduled for {}", at.to_rfc3339())),
            )
            .await;

        tracing::info!(notification_id = %notification.id, %at, "Notification scheduled");
        Ok(notification)
    }

    pub async fn send_batch(&self, batch_request: BatchRequest) -> DispatchResult<BatchResult> {
        if batch_request.recipients.is_empty() {
            return Err(DispatchError::Validation("batch has no recipients".to_string()));
        }

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for (index, recipient) in batch_request.recipients.into_iter().enumerate() {
            let request = recipient.apply_to(&batch_request.request);
            match self.admit(&request).await {
                Ok(()) => accepted.push(request),
                Err(DispatchError::Store(e)) => return Err(DispatchError::Store(e)),
                Err(e) => rejected.push(RejectedRecipient {
                    index,
                    recipient_id: request.recipient_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        let now = self.clock.now();
        let mut batch = Batch::new(accepted.len() as i32, now);
        if accepted.is_empty() {
            batch.status = BatchStatus::Completed;
        }
        self.repos.batches.insert_batch(&batch).await?;

        let mut notifications = Vec::with_capacity(accepted.len());
        for request in accepted {
            let mut notification = request.into_notification(self.config.default_max_retries, now);
            notification.batch_id = Some(batch.id);
            self.repos.notifications.insert_notification(&notification).await?;
            self.audit
                .record(
                    notification.id,
                    AuditEvent::Created,
                    AuditDetail::message(format!("batch {}", batch.id)),
                )
                .await;
            notifications.push(notification);
        }
        for notification in &notifications {
            self.enqueue(notification.id).await;
        }

        tracing::info!(
            batch_id = %batch.id,
            accepted = notifications.len(),
            rejected = rejected.len(),
            "Batch accepted"
        );
        Ok(BatchResult {
            batch,
            notifications,
            rejected,
        })
    }

    pub async fn send_from_template(
        &self,
        request: TemplateSendRequest,
    ) -> DispatchResult<Notification> {
        let template = self
            .templates
            .resolve(request.template_id, request.template_name.as_deref())
            .await?;
        let channel = request.channel.or(template.channel).ok_or_else(|| {
            DispatchError::Validation(format!("template {} has no channel", template.name))
        })?;
        let rendered = self.templates.render(&template, &request.data)?;

        let mut send = SendRequest::new(channel, rendered.text);
        send.notification_type = request
            .notification_type
            .unwrap_or(template.notification_type);
        send.priority = request.priority;
        send.sender_id = request.sender_id;
        send.recipient_id = request.recipient_id;
        send.recipient_email = request.recipient_email;
        send.recipient_phone = request.recipient_phone;
        send.recipient_device_id = request.recipient_device_id;
        send.recipient_webhook = request.recipient_webhook;
        send.title = rendered.subject;
        send.content_html = rendered.html;
        send.template_id = Some(template.id);
        send.template_data = Some(request.data);
        send.channel_data = request.channel_data;
        send.channel_provider = request.channel_provider;
        send.max_retries = request.max_retries;
        send.expires_at = request.expires_at;
        send.metadata = request.metadata;

        match request.scheduled_at {
            Some(at) => self.schedule(send, at).await,
            None => self.send(send).await,
        }
    }

    /// Only `pending` and `queued` notifications can be cancelled.
    pub async fn cancel(&self, id: Uuid) -> DispatchResult<Notification> {
        let current = self.load(id).await?;
        if !matches!(
            current.status,
            NotificationStatus::Pending | NotificationStatus::Queued
        ) {
            return Err(DispatchError::CannotCancel(current.status));
        }

        let cancelled = self
            .transition(id, NotificationStatus::Cancelled, |_| {})
            .await?;
        self.queued_ids.lock().remove(&id);
        self.audit
            .record(id, AuditEvent::Cancelled, AuditDetail::default())
            .await;

        tracing::info!(notification_id = %id, "Notification cancelled");
        Ok(cancelled)
    }

    /// Manual retry of a `failed` or `retrying` notification with a fresh
    /// retry budget.
    /// Rejected while an attempt holds the `sending` lease.
    pub async fn retry(&self, id: Uuid) -> DispatchResult<Notification> {
        let notification = self
            .transition_where(
                id,
                NotificationStatus::Retrying,
                |from| matches!(from, NotificationStatus::Failed | NotificationStatus::Retrying),
                |n| {
                    n.retry_count = 0;
                    n.next_retry_at = None;
                    n.last_error = None;
                },
            )
            .await?;
        self.audit
            .record(
                id,
                AuditEvent::RetryInitiated,
                AuditDetail::message("manual retry"),
            )
            .await;

        tracing::info!(notification_id = %id, "Manual retry initiated");
        self.enqueue(id).await;
        Ok(notification)
    }

    pub async fn get_status(&self, id: Uuid) -> DispatchResult<Notification> {
        self.load(id).await
    }

    pub async fn get_audit_trail(&self, id: Uuid) -> DispatchResult<Vec<AuditEntry>> {
        self.load(id).await?;
        self.audit.trail(id).await
    }

    pub async fn get_batch(&self, id: Uuid) -> DispatchResult<Batch> {
        self.repos
            .batches
            .get_batch(id)
            .await?
            .ok_or(DispatchError::BatchNotFound(id))
    }

    /// Delivery receipt from a provider callback.
    pub async fn mark_delivered(
        &self,
        id: Uuid,
        external_id: Option<String>,
    ) -> DispatchResult<Notification> {
        let now = self.clock.now();
        let notification = self
            .transition(id, NotificationStatus::Delivered, |n| {
                n.delivered_at = Some(now);
                if external_id.is_some() {
                    n.external_id = external_id;
                }
            })
            .await?;
        self.audit
            .record(id, AuditEvent::Delivered, AuditDetail::default())
            .await;
        self.record_batch(&notification, BatchOutcome::Delivered).await;
        Ok(notification)
    }

    pub async fn mark_read(&self, id: Uuid) -> DispatchResult<Notification> {
        let now = self.clock.now();
        let notification = self
            .transition(id, NotificationStatus::Read, |n| n.read_at = Some(now))
            .await?;
        self.audit
            .record(id, AuditEvent::Read, AuditDetail::default())
            .await;
        Ok(notification)
    }

    pub async fn archive(&self, id: Uuid) -> DispatchResult<Notification> {
        let now = self.clock.now();
        let notification = self
            .transition(id, NotificationStatus::Archived, |n| n.archived_at = Some(now))
            .await?;
        self.audit
            .record(id, AuditEvent::Archived, AuditDetail::default())
            .await;
        Ok(notification)
    }

    // ---- sweeps ----

    /// Enqueue `queued` notifications whose time has come.
    pub async fn process_scheduled(&self) -> DispatchResult<usize> {
        let due = self
            .repos
            .notifications
            .due_scheduled(self.clock.now(), SWEEP_LIMIT)
            .await?;

        let mut enqueued = 0;
        for notification in due {
            if self.enqueue(notification.id).await {
                enqueued += 1;
            }
        }
        if enqueued > 0 {
            tracing::debug!(enqueued, "Scheduled notifications due");
        }
        Ok(enqueued)
    }

    /// Enqueue `retrying` notifications whose backoff has elapsed.
    pub async fn process_retries(&self) -> DispatchResult<usize> {
        let due = self
            .repos
            .notifications
            .due_retries(self.clock.now(), SWEEP_LIMIT)
            .await?;

        let mut enqueued = 0;
        for notification in due {
            if self.queued_ids.lock().contains(&notification.id) {
                continue;
            }
            self.audit
                .record(
                    notification.id,
                    AuditEvent::RetryInitiated,
                    AuditDetail::attempt(notification.retry_count + 1),
                )
                .await;
            if self.enqueue(notification.id).await {
                enqueued += 1;
            }
        }
        if enqueued > 0 {
            tracing::debug!(enqueued, "Retries due");
        }
        Ok(enqueued)
    }

    /// Re-enqueue `pending` notifications older than the grace period that
    /// are not waiting in the queue, e.g. after a restart.
    pub async fn process_pending(&self) -> DispatchResult<usize> {
        let grace = Duration::seconds(self.config.pending_grace_secs.min(i64::MAX as u64) as i64);
        let stale = self
            .repos
            .notifications
            .stale_pending(self.clock.now() - grace, SWEEP_LIMIT)
            .await?;

        let mut enqueued = 0;
        for notification in stale {
            if self.enqueue(notification.id).await {
                enqueued += 1;
            }
        }
        if enqueued > 0 {
            tracing::warn!(enqueued, "Re-enqueued stalled pending notifications");
        }
        Ok(enqueued)
    }

    // ---- delivery ----

    /// One delivery attempt. Outcomes land on the notification and in the
    /// audit trail; nothing is returned.
    pub async fn deliver(&self, id: Uuid) {
        self.queued_ids.lock().remove(&id);

        let notification = match self.repos.notifications.get_notification(id).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                tracing::warn!(notification_id = %id, "Dropping delivery for unknown notification");
                return;
            }
            Err(e) => {
                tracing::error!(notification_id = %id, "Failed to load notification: {}", e);
                return;
            }
        };
        if !notification.status.is_dispatchable() {
            tracing::debug!(notification_id = %id, status = %notification.status, "Not dispatchable, skipping");
            return;
        }

        let notification = match self.transition(id, NotificationStatus::Sending, |_| {}).await {
            Ok(n) => n,
            Err(DispatchError::ConcurrentModification(_)) | Err(DispatchError::InvalidTransition { .. }) => {
                tracing::debug!(notification_id = %id, "Lost delivery lease to another attempt");
                return;
            }
            Err(e) => {
                tracing::error!(notification_id = %id, "Failed to start delivery: {}", e);
                return;
            }
        };

        if notification
            .expires_at
            .map_or(false, |at| at <= self.clock.now())
        {
            self.expire(notification).await;
            return;
        }

        let attempt = notification.retry_count + 1;
        self.audit
            .record(id, AuditEvent::Sending, AuditDetail::attempt(attempt))
            .await;

        let outcome = self.attempt(&notification).await;
        let result = match outcome {
            Ok((provider, result)) => self.record_success(notification, &provider, result).await,
            Err(failure) => self.record_failure(notification, failure).await,
        };
        if let Err(e) = result {
            tracing::error!(notification_id = %id, "Failed to record delivery outcome: {}", e);
        }
    }

    async fn attempt(
        &self,
        notification: &Notification,
    ) -> Result<(String, SendResult), AttemptFailure> {
        let provider: Arc<dyn ChannelProvider> = self
            .providers
            .select(notification.channel, notification.channel_provider.as_deref())
            .await
            .map_err(|e| AttemptFailure {
                provider: notification.channel_provider.clone(),
                error: e.to_string(),
                response: None,
            })?;
        let name = provider.name().to_string();

        if !self.providers.check_rate_limit(&name) {
            tracing::warn!(provider = %name, notification_id = %notification.id, "Provider over rate limit, sending anyway");
        }
        self.providers.increment_usage(&name);

        let provider_name = name.clone();
        let failure = move |error: String, response: Option<serde_json::Value>| AttemptFailure {
            provider: Some(provider_name.clone()),
            error,
            response,
        };

        provider
            .validate(notification)
            .map_err(|e| failure(e.to_string(), None))?;

        tracing::debug!(notification_id = %notification.id, provider = %name, "Sending");
        match provider.send(notification).await {
            Ok(result) if result.success => Ok((name, result)),
            Ok(result) => {
                let error = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "provider reported failure".to_string());
                Err(failure(error, result.provider_response))
            }
            Err(e) => Err(failure(e.to_string(), None)),
        }
    }

    async fn record_success(
        &self,
        notification: Notification,
        provider: &str,
        result: SendResult,
    ) -> DispatchResult<()> {
        let id = notification.id;
        let now = self.clock.now();
        let delivered = result.status == NotificationStatus::Delivered;
        let status = if delivered {
            NotificationStatus::Delivered
        } else {
            NotificationStatus::Sent
        };
        let response = result.provider_response.clone();

        let updated = self
            .transition(id, status, |n| {
                n.sent_at = Some(now);
                if delivered {
                    n.delivered_at = Some(now);
                }
                n.external_id = result.external_id;
                n.provider_response = result.provider_response;
                n.last_error = None;
                n.next_retry_at = None;
            })
            .await?;

        self.audit
            .record(
                id,
                AuditEvent::Sent,
                AuditDetail::attempt(notification.retry_count + 1)
                    .with_provider(provider)
                    .with_response(response),
            )
            .await;
        self.record_batch(&updated, BatchOutcome::Sent).await;
        if delivered {
            self.audit
                .record(id, AuditEvent::Delivered, AuditDetail::default().with_provider(provider))
                .await;
            self.record_batch(&updated, BatchOutcome::Delivered).await;
        }

        tracing::info!(notification_id = %id, provider, %status, "Notification sent");
        Ok(())
    }

    async fn record_failure(
        &self,
        notification: Notification,
        failure: AttemptFailure,
    ) -> DispatchResult<()> {
        let id = notification.id;
        let now = self.clock.now();
        let attempt = notification.retry_count + 1;
        let will_retry = notification.retry_count < notification.max_retries;
        let error = failure.error.clone();

        let mut detail = AuditDetail::error(attempt, failure.error.clone())
            .with_response(failure.response.clone());
        if let Some(provider) = &failure.provider {
            detail = detail.with_provider(provider.clone());
        }

        if will_retry {
            let config = &self.config;
            let updated = self
                .transition(id, NotificationStatus::Retrying, |n| {
                    n.retry_count += 1;
                    n.next_retry_at = Some(now + retry_delay(config, n.retry_count));
                    n.last_error = Some(failure.error);
                    n.failed_at = Some(now);
                    n.provider_response = failure.response;
                })
                .await?;

            self.audit.record(id, AuditEvent::SendFailed, detail).await;
            if let Some(at) = updated.next_retry_at {
                self.audit
                    .record(
                        id,
                        AuditEvent::RetryScheduled,
                        AuditDetail::message(format!(
                            "retry {} of {} at {}",
                            updated.retry_count,
                            updated.max_retries,
                            at.to_rfc3339()
                        )),
                    )
                    .await;
            }
            tracing::warn!(
                notification_id = %id,
                attempt,
                retry_count = updated.retry_count,
                "Delivery failed, retry scheduled: {}",
                error
            );
        } else {
            let updated = self
                .transition(id, NotificationStatus::Failed, |n| {
                    n.last_error = Some(failure.error);
                    n.failed_at = Some(now);
                    n.next_retry_at = None;
                    n.provider_response = failure.response;
                })
                .await?;

            self.audit.record(id, AuditEvent::SendFailed, detail).await;
            self.record_batch(&updated, BatchOutcome::Failed).await;
            tracing::warn!(notification_id = %id, attempt, "Delivery failed permanently: {}", error);
        }
        Ok(())
    }

    async fn expire(&self, notification: Notification) {
        let id = notification.id;
        let now = self.clock.now();
        match self
            .transition(id, NotificationStatus::Failed, |n| {
                n.last_error = Some(EXPIRED_ERROR.to_string());
                n.failed_at = Some(now);
                n.next_retry_at = None;
            })
            .await
        {
            Ok(updated) => {
                self.audit
                    .record(id, AuditEvent::Expired, AuditDetail::message(EXPIRED_ERROR))
                    .await;
                self.record_batch(&updated, BatchOutcome::Failed).await;
                tracing::info!(notification_id = %id, "Notification expired before delivery");
            }
            Err(e) => tracing::error!(notification_id = %id, "Failed to expire notification: {}", e),
        }
    }

    // ---- helpers ----

    /// Validation and preference checks shared by every accepting path.
    async fn admit(&self, request: &SendRequest) -> DispatchResult<()> {
        if required_recipient(request).is_none() {
            return Err(DispatchError::RecipientRequired(request.channel));
        }
        let has_html = request
            .content_html
            .as_deref()
            .map_or(false, |h| !h.trim().is_empty());
        if request.content.trim().is_empty() && !has_html {
            return Err(DispatchError::Validation("content is required".to_string()));
        }
        if request.max_retries.map_or(false, |m| m < 0) {
            return Err(DispatchError::Validation(
                "max_retries cannot be negative".to_string(),
            ));
        }

        if let Some(user_id) = request.recipient_id.as_deref().filter(|u| !u.is_empty()) {
            let decision = self
                .preferences
                .can_send(user_id, request.channel, request.notification_type)
                .await?;
            if !decision.allowed {
                let reason = decision.reason.unwrap_or_else(|| "blocked".to_string());
                tracing::info!(user_id, channel = %request.channel, %reason, "Send blocked by preference");
                return Err(DispatchError::PreferenceBlocked(reason));
            }
        }
        Ok(())
    }

    async fn load(&self, id: Uuid) -> DispatchResult<Notification> {
        self.repos
            .notifications
            .get_notification(id)
            .await?
            .ok_or(DispatchError::NotificationNotFound(id))
    }

    /// Re-read, check the edge, apply `mutate`, then compare-and-swap.
    async fn transition<F>(
        &self,
        id: Uuid,
        to: NotificationStatus,
        mutate: F,
    ) -> DispatchResult<Notification>
    where
        F: FnOnce(&mut Notification) + Send,
    {
        self.transition_where(id, to, |_| true, mutate).await
    }

    /// Like `transition`, but only from source states `accept` allows. The
    /// check is made against the row the CAS write is based on.
    async fn transition_where<A, F>(
        &self,
        id: Uuid,
        to: NotificationStatus,
        accept: A,
        mutate: F,
    ) -> DispatchResult<Notification>
    where
        A: Fn(NotificationStatus) -> bool + Send,
        F: FnOnce(&mut Notification) + Send,
    {
        let mut notification = self.load(id).await?;
        let from = notification.status;
        if !accept(from) || !from.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition { from, to });
        }

        notification.status = to;
        notification.updated_at = self.clock.now();
        mutate(&mut notification);

        if !self.repos.notifications.update_notification(&notification).await? {
            return Err(DispatchError::ConcurrentModification(id));
        }
        notification.version += 1;

        tracing::debug!(notification_id = %id, %from, %to, "Status transition");
        Ok(notification)
    }

    /// Returns false when the id is already waiting in the queue or the
    /// queue is closed.
    async fn enqueue(&self, id: Uuid) -> bool {
        if !self.queued_ids.lock().insert(id) {
            return false;
        }
        match self.queue.enqueue(id).await {
            Ok(()) => true,
            Err(e) => {
                self.queued_ids.lock().remove(&id);
                tracing::error!(notification_id = %id, "Failed to enqueue delivery: {}", e);
                false
            }
        }
    }

    async fn record_batch(&self, notification: &Notification, outcome: BatchOutcome) {
        let Some(batch_id) = notification.batch_id else {
            return;
        };
        match self
            .repos
            .batches
            .record_batch_outcome(batch_id, outcome, self.clock.now())
            .await
        {
            Ok(Some(batch)) if batch.status == BatchStatus::Completed => {
                tracing::debug!(%batch_id, "Batch completed");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(%batch_id, "Failed to update batch counters: {}", e),
        }
    }
}

#[async_trait]
impl DeliveryHandler for DispatchEngine {
    async fn deliver(&self, id: Uuid) {
        DispatchEngine::deliver(self, id).await
    }
}
