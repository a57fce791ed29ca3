//! Per-user delivery preferences: opt-out, quiet hours and frequency caps.
//!
//! The check is advisory. It runs once when a notification is accepted and
//! is not repeated at delivery time, so two concurrent sends for the same
//! user can both pass a cap that only one of them fits under.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use notify_core::store::{NotificationRepository, PreferenceRepository};
use notify_core::{
    Channel, Clock, DispatchError, DispatchResult, NotificationType, Preference,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const REASON_DISABLED: &str = "disabled by user";
pub const REASON_QUIET_HOURS: &str = "quiet hours active";
pub const REASON_DAILY_LIMIT: &str = "daily limit reached";
pub const REASON_WEEKLY_LIMIT: &str = "weekly limit reached";
pub const REASON_MONTHLY_LIMIT: &str = "monthly limit reached";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PreferenceDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Upsert payload. Caps of 0 mean unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    pub user_id: String,
    pub channel: Channel,
    pub notification_type: NotificationType,
    pub is_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub max_per_day: i32,
    #[serde(default)]
    pub max_per_week: i32,
    #[serde(default)]
    pub max_per_month: i32,
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// `[start, end)` when `start <= end`, otherwise the window wraps midnight.
pub fn in_quiet_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Monday 00:00 UTC of the ISO week containing `now`.
fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) - Duration::days(now.weekday().num_days_from_monday() as i64)
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) - Duration::days(now.day0() as i64)
}

fn local_minute(now: DateTime<Utc>, timezone: Option<&str>) -> NaiveTime {
    let local = match timezone.filter(|tz| !tz.is_empty()) {
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => now.with_timezone(&tz).time(),
            Err(_) => {
                tracing::warn!(timezone = name, "Invalid preference timezone, using UTC");
                now.time()
            }
        },
        None => now.time(),
    };
    NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or(local)
}

pub struct PreferenceService {
    preferences: Arc<dyn PreferenceRepository>,
    notifications: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
}

impl PreferenceService {
    pub fn new(
        preferences: Arc<dyn PreferenceRepository>,
        notifications: Arc<dyn NotificationRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            preferences,
            notifications,
            clock,
        }
    }

    /// First failing rule wins: opt-out, quiet hours, then daily, weekly and
    /// monthly caps. No stored preference means allowed.
    pub async fn can_send(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> DispatchResult<PreferenceDecision> {
        let Some(pref) = self
            .preferences
            .get_preference(user_id, channel, notification_type)
            .await?
        else {
            return Ok(PreferenceDecision::allow());
        };

        if !pref.is_enabled {
            return Ok(PreferenceDecision::deny(REASON_DISABLED));
        }

        let now = self.clock.now();
        if self.quiet_hours_active(&pref, now) {
            return Ok(PreferenceDecision::deny(REASON_QUIET_HOURS));
        }

        let caps = [
            (pref.max_per_day, start_of_day(now), REASON_DAILY_LIMIT),
            (pref.max_per_week, start_of_week(now), REASON_WEEKLY_LIMIT),
            (pref.max_per_month, start_of_month(now), REASON_MONTHLY_LIMIT),
        ];
        for (cap, since, reason) in caps {
            if cap <= 0 {
                continue;
            }
            let sent = self
                .notifications
                .count_sent_since(user_id, channel, notification_type, since)
                .await?;
            if sent >= cap as i64 {
                tracing::debug!(user_id, %channel, sent, cap, "Frequency cap reached");
                return Ok(PreferenceDecision::deny(reason));
            }
        }

        Ok(PreferenceDecision::allow())
    }

    fn quiet_hours_active(&self, pref: &Preference, now: DateTime<Utc>) -> bool {
        let (Some(start), Some(end)) = (&pref.quiet_hours_start, &pref.quiet_hours_end) else {
            return false;
        };
        match (parse_hhmm(start), parse_hhmm(end)) {
            (Some(start), Some(end)) => {
                in_quiet_window(local_minute(now, pref.timezone.as_deref()), start, end)
            }
            _ => {
                tracing::warn!(user_id = %pref.user_id, %start, %end, "Unparseable quiet hours ignored");
                false
            }
        }
    }

    pub async fn upsert_preference(&self, update: PreferenceUpdate) -> DispatchResult<Preference> {
        if update.user_id.trim().is_empty() {
            return Err(DispatchError::Validation("user_id is required".to_string()));
        }
        for value in [&update.quiet_hours_start, &update.quiet_hours_end]
            .into_iter()
            .flatten()
        {
            if parse_hhmm(value).is_none() {
                return Err(DispatchError::Validation(format!(
                    "quiet hours must be HH:MM, got {}",
                    value
                )));
            }
        }
        if let Some(tz) = update.timezone.as_deref().filter(|tz| !tz.is_empty()) {
            if tz.parse::<Tz>().is_err() {
                return Err(DispatchError::Validation(format!("unknown timezone {}", tz)));
            }
        }
        if update.max_per_day < 0 || update.max_per_week < 0 || update.max_per_month < 0 {
            return Err(DispatchError::Validation(
                "frequency caps cannot be negative".to_string(),
            ));
        }

        let now = self.clock.now();
        let preference = Preference {
            id: Uuid::new_v4(),
            user_id: update.user_id,
            channel: update.channel,
            notification_type: update.notification_type,
            is_enabled: update.is_enabled,
            quiet_hours_start: update.quiet_hours_start,
            quiet_hours_end: update.quiet_hours_end,
            timezone: update.timezone,
            max_per_day: update.max_per_day,
            max_per_week: update.max_per_week,
            max_per_month: update.max_per_month,
            created_at: now,
            updated_at: now,
        };
        Ok(self.preferences.upsert_preference(&preference).await?)
    }

    pub async fn get_preferences(&self, user_id: &str) -> DispatchResult<Vec<Preference>> {
        Ok(self.preferences.list_preferences(user_id).await?)
    }

    pub async fn delete_preference(
        &self,
        user_id: &str,
        channel: Channel,
        notification_type: NotificationType,
    ) -> DispatchResult<bool> {
        Ok(self
            .preferences
            .delete_preference(user_id, channel, notification_type)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use notify_core::{ManualClock, MemoryStore, Notification, NotificationStatus};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn update(user: &str) -> PreferenceUpdate {
        PreferenceUpdate {
            user_id: user.to_string(),
            channel: Channel::Email,
            notification_type: NotificationType::Marketing,
            is_enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: None,
            max_per_day: 0,
            max_per_week: 0,
            max_per_month: 0,
        }
    }

    fn service_at(now: DateTime<Utc>) -> (PreferenceService, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let service = PreferenceService::new(store.clone(), store.clone(), clock.clone());
        (service, store, clock)
    }

    #[test]
    fn test_quiet_window_wraps_midnight() {
        let (start, end) = (hm(22, 0), hm(8, 0));
        assert!(in_quiet_window(hm(23, 0), start, end));
        assert!(in_quiet_window(hm(3, 0), start, end));
        assert!(!in_quiet_window(hm(12, 0), start, end));
        assert!(!in_quiet_window(hm(8, 0), start, end));
        assert!(in_quiet_window(hm(22, 0), start, end));
    }

    #[test]
    fn test_quiet_window_same_day() {
        let (start, end) = (hm(12, 0), hm(14, 0));
        assert!(in_quiet_window(hm(13, 59), start, end));
        assert!(!in_quiet_window(hm(14, 0), start, end));
        assert!(!in_quiet_window(hm(11, 59), start, end));
    }

    #[test]
    fn test_window_starts() {
        // Thursday
        let now = Utc.with_ymd_and_hms(2024, 6, 13, 15, 30, 0).unwrap();
        assert_eq!(start_of_day(now), Utc.with_ymd_and_hms(2024, 6, 13, 0, 0, 0).unwrap());
        assert_eq!(start_of_week(now), Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap());
        assert_eq!(start_of_month(now), Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_local_minute_falls_back_to_utc() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 23, 45, 30).unwrap();
        assert_eq!(local_minute(now, Some("Not/AZone")), hm(23, 45));
        assert_eq!(local_minute(now, Some("Europe/Paris")), hm(0, 45));
    }

    #[tokio::test]
    async fn test_no_preference_allows() {
        let (service, _, _) = service_at(Utc::now());
        let decision = service
            .can_send("u1", Channel::Sms, NotificationType::Alert)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_disabled_preference_denies() {
        let (service, _, _) = service_at(Utc::now());
        service
            .upsert_preference(PreferenceUpdate {
                is_enabled: false,
                ..update("u1")
            })
            .await
            .unwrap();

        let decision = service
            .can_send("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap();
        assert_eq!(decision, PreferenceDecision::deny(REASON_DISABLED));
    }

    #[tokio::test]
    async fn test_quiet_hours_in_user_timezone() {
        // 21:30 UTC is 23:30 in Paris during summer time.
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 21, 30, 0).unwrap();
        let (service, _, clock) = service_at(now);
        service
            .upsert_preference(PreferenceUpdate {
                quiet_hours_start: Some("22:00".to_string()),
                quiet_hours_end: Some("08:00".to_string()),
                timezone: Some("Europe/Paris".to_string()),
                ..update("u1")
            })
            .await
            .unwrap();

        let decision = service
            .can_send("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap();
        assert_eq!(decision.reason.as_deref(), Some(REASON_QUIET_HOURS));

        clock.set(Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap());
        assert!(service
            .can_send("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_daily_cap() {
        let now = Utc.with_ymd_and_hms(2024, 6, 13, 15, 0, 0).unwrap();
        let (service, store, _) = service_at(now);
        service
            .upsert_preference(PreferenceUpdate {
                max_per_day: 2,
                ..update("u1")
            })
            .await
            .unwrap();

        for i in 0..3 {
            let decision = service
                .can_send("u1", Channel::Email, NotificationType::Marketing)
                .await
                .unwrap();
            if i < 2 {
                assert!(decision.allowed, "send {} should be allowed", i);
            } else {
                assert_eq!(decision.reason.as_deref(), Some(REASON_DAILY_LIMIT));
                break;
            }

            let mut n = Notification::new(Channel::Email, "deal", now);
            n.recipient_id = Some("u1".to_string());
            n.notification_type = NotificationType::Marketing;
            n.status = NotificationStatus::Sent;
            n.sent_at = Some(now);
            store.insert_notification(&n).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_yesterday_does_not_count_toward_daily_cap() {
        let now = Utc.with_ymd_and_hms(2024, 6, 13, 1, 0, 0).unwrap();
        let (service, store, _) = service_at(now);
        service
            .upsert_preference(PreferenceUpdate {
                max_per_day: 1,
                max_per_week: 2,
                ..update("u1")
            })
            .await
            .unwrap();

        let mut old = Notification::new(Channel::Email, "deal", now - Duration::hours(2));
        old.recipient_id = Some("u1".to_string());
        old.notification_type = NotificationType::Marketing;
        old.status = NotificationStatus::Delivered;
        old.sent_at = Some(old.created_at);
        store.insert_notification(&old).await.unwrap();

        assert!(service
            .can_send("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap()
            .allowed);

        let mut today = old.clone();
        today.id = Uuid::new_v4();
        today.created_at = now;
        today.sent_at = Some(now);
        store.insert_notification(&today).await.unwrap();

        let decision = service
            .can_send("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap();
        assert_eq!(decision.reason.as_deref(), Some(REASON_DAILY_LIMIT));
    }

    #[tokio::test]
    async fn test_caps_bucket_by_send_time() {
        let now = Utc.with_ymd_and_hms(2024, 6, 13, 9, 0, 0).unwrap();
        let (service, store, _) = service_at(now);
        service
            .upsert_preference(PreferenceUpdate {
                max_per_day: 1,
                ..update("u1")
            })
            .await
            .unwrap();

        // Queued yesterday, sent and then read today.
        let mut n = Notification::new(Channel::Email, "deal", now - Duration::hours(12));
        n.recipient_id = Some("u1".to_string());
        n.notification_type = NotificationType::Marketing;
        n.status = NotificationStatus::Read;
        n.sent_at = Some(now - Duration::hours(1));
        store.insert_notification(&n).await.unwrap();

        let decision = service
            .can_send("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap();
        assert_eq!(decision.reason.as_deref(), Some(REASON_DAILY_LIMIT));

        // Accepted but never sent does not count.
        let mut other = Notification::new(Channel::Email, "deal", now);
        other.recipient_id = Some("u2".to_string());
        other.notification_type = NotificationType::Marketing;
        store.insert_notification(&other).await.unwrap();
        service
            .upsert_preference(PreferenceUpdate {
                max_per_day: 1,
                ..update("u2")
            })
            .await
            .unwrap();
        assert!(service
            .can_send("u2", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_upsert_validates_fields() {
        let (service, _, _) = service_at(Utc::now());
        let bad_time = service
            .upsert_preference(PreferenceUpdate {
                quiet_hours_start: Some("25:99".to_string()),
                ..update("u1")
            })
            .await;
        assert!(matches!(bad_time, Err(DispatchError::Validation(_))));

        let bad_tz = service
            .upsert_preference(PreferenceUpdate {
                timezone: Some("Mars/Olympus".to_string()),
                ..update("u1")
            })
            .await;
        assert!(matches!(bad_tz, Err(DispatchError::Validation(_))));

        service.upsert_preference(update("u1")).await.unwrap();
        assert_eq!(service.get_preferences("u1").await.unwrap().len(), 1);
        assert!(service
            .delete_preference("u1", Channel::Email, NotificationType::Marketing)
            .await
            .unwrap());
    }
}
