use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side record stored at `subscriber:{email}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    pub email: String,
    pub subscribed_at: i64,
    /// Reserved for double opt-in; always false today.
    #[serde(default)]
    pub confirmed: bool,
}

/// Side record stored at `webhook:{url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord {
    pub url: String,
    #[serde(default)]
    pub subscribed_at: Option<i64>,
    #[serde(default)]
    pub last_notified: Option<i64>,
    #[serde(default)]
    pub failure_count: u32,
}

impl WebhookRecord {
    pub fn new(url: String, now_ms: i64) -> Self {
        Self {
            url,
            subscribed_at: Some(now_ms),
            last_notified: None,
            failure_count: 0,
        }
    }
}

/// The post announced by a newsletter or webhook broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// JSON body POSTed to webhook subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    NewPost {
        post: PostSummary,
    },
    WebhookSubscribed {
        message: String,
        #[serde(rename = "subscribedAt")]
        subscribed_at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn welcome(now: DateTime<Utc>) -> Self {
        Notification::WebhookSubscribed {
            message: "Thanks for subscribing! You will receive notifications when new posts are published."
                .to_string(),
            subscribed_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Error,
}

/// Outcome of one webhook delivery attempt, as reported by `/test-webhook`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub url: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
    pub results: Vec<DeliveryResult>,
}

impl NotifyReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }
}
