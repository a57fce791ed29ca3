use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    notify_notifications (id) {
        id -> Uuid,
        batch_id -> Nullable<Uuid>,
        notification_type -> Text,
        channel -> Text,
        priority -> Text,
        status -> Text,
        sender_id -> Nullable<Text>,
        recipient_id -> Nullable<Text>,
        recipient_email -> Nullable<Text>,
        recipient_phone -> Nullable<Text>,
        recipient_device_id -> Nullable<Text>,
        recipient_webhook -> Nullable<Text>,
        title -> Nullable<Text>,
        content -> Text,
        content_html -> Nullable<Text>,
        template_id -> Nullable<Uuid>,
        template_data -> Nullable<Jsonb>,
        channel_data -> Nullable<Jsonb>,
        channel_provider -> Nullable<Text>,
        retry_count -> Integer,
        max_retries -> Integer,
        next_retry_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
        scheduled_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        read_at -> Nullable<Timestamptz>,
        failed_at -> Nullable<Timestamptz>,
        expires_at -> Nullable<Timestamptz>,
        archived_at -> Nullable<Timestamptz>,
        metadata -> Nullable<Jsonb>,
        external_id -> Nullable<Text>,
        provider_response -> Nullable<Jsonb>,
        version -> BigInt,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notify_templates (id) {
        id -> Uuid,
        name -> Text,
        description -> Nullable<Text>,
        channel -> Nullable<Text>,
        notification_type -> Text,
        subject -> Nullable<Text>,
        body -> Text,
        body_html -> Nullable<Text>,
        variables -> Jsonb,
        is_active -> Bool,
        version -> Integer,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notify_preferences (id) {
        id -> Uuid,
        user_id -> Text,
        channel -> Text,
        notification_type -> Text,
        is_enabled -> Bool,
        quiet_hours_start -> Nullable<Text>,
        quiet_hours_end -> Nullable<Text>,
        timezone -> Nullable<Text>,
        max_per_day -> Integer,
        max_per_week -> Integer,
        max_per_month -> Integer,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notify_audit_entries (id) {
        id -> Uuid,
        seq -> BigInt,
        notification_id -> Uuid,
        event -> Text,
        attempt -> Nullable<Integer>,
        provider -> Nullable<Text>,
        provider_response -> Nullable<Jsonb>,
        message -> Nullable<Text>,
        is_error -> Bool,
        created_at -> Timestamptz,
    }
}

table! {
    notify_provider_configs (name) {
        name -> Text,
        channel -> Text,
        config -> Jsonb,
        health -> Text,
        rate_limit -> Integer,
        usage_count -> Integer,
        usage_window_start -> Timestamptz,
        priority -> Integer,
        last_health_check -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notify_batches (id) {
        id -> Uuid,
        total_count -> Integer,
        sent_count -> Integer,
        delivered_count -> Integer,
        failed_count -> Integer,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(
    notify_notifications,
    notify_templates,
    notify_preferences,
    notify_audit_entries,
    notify_provider_configs,
    notify_batches,
);
