//! Webhook fan-out with consecutive-failure eviction.
//!
//! Each subscribed URL gets one POST per broadcast. The outcome is written to
//! the URL's record: success resets `failureCount` and stamps `lastNotified`,
//! failure bumps `failureCount` and clears `lastNotified`. A URL whose count
//! reaches [`FAILURE_THRESHOLD`] is dropped from the subscriber set for good.

use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::store::{get_json, keys, set_json, SharedStore, StoreError};
use crate::types::{DeliveryResult, DeliveryStatus, Notification, NotifyReport, WebhookRecord};

pub const FAILURE_THRESHOLD: u32 = 5;
pub const RECORD_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

const MAX_IN_FLIGHT: usize = 8;
const DETAIL_CHARS: usize = 200;

/// Result of a single POST, before it is recorded.
#[derive(Debug)]
pub enum Attempt {
    Accepted { status: u16, body: String },
    Rejected { status: u16, body: String },
    Failed(String),
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        matches!(self, Attempt::Accepted { .. })
    }

    fn into_result(self, url: &str) -> DeliveryResult {
        let (status, status_code, response, error) = match self {
            Attempt::Accepted { status, body } => {
                (DeliveryStatus::Success, Some(status), Some(body), None)
            }
            Attempt::Rejected { status, body } => {
                (DeliveryStatus::Error, Some(status), None, Some(body))
            }
            Attempt::Failed(message) => (DeliveryStatus::Error, None, None, Some(message)),
        };
        DeliveryResult {
            url: url.to_string(),
            status,
            status_code,
            response,
            error,
        }
    }
}

/// What happened to a subscription after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retained { failure_count: u32 },
    Removed { failure_count: u32 },
}

#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    store: SharedStore,
    user_agent: String,
}

impl WebhookNotifier {
    /// `client` must already carry the outbound timeout.
    pub fn new(client: reqwest::Client, store: SharedStore, user_agent: String) -> Self {
        Self {
            client,
            store,
            user_agent,
        }
    }

    /// Deliver `payload` to every currently subscribed webhook.
    pub async fn broadcast(&self, payload: &Notification) -> Result<NotifyReport, StoreError> {
        let urls = self.store.smembers(keys::WEBHOOK_SUBSCRIBERS).await?;
        Ok(self.notify(&urls, payload).await)
    }

    /// Deliver `payload` to each URL independently. Failures are recorded
    /// against the URL and never propagate.
    pub async fn notify(&self, urls: &[String], payload: &Notification) -> NotifyReport {
        let results: Vec<DeliveryResult> = stream::iter(urls.iter().cloned())
            .map(|url| async move { self.deliver(&url, payload).await })
            .buffer_unordered(MAX_IN_FLIGHT)
            .collect()
            .await;

        let delivered = results.iter().filter(|r| r.is_success()).count();
        NotifyReport {
            delivered,
            failed: results.len() - delivered,
            results,
        }
    }

    async fn deliver(&self, url: &str, payload: &Notification) -> DeliveryResult {
        let attempt = self.post(url, payload).await;

        if attempt.is_success() {
            info!(url, "Webhook notification sent");
            if let Err(e) = self.record_success(url).await {
                warn!(url, error = %e, "Failed to record webhook success");
            }
        } else {
            match self.record_failure(url).await {
                Ok(FailureOutcome::Retained { failure_count }) => {
                    warn!(url, failure_count, attempt = ?attempt, "Webhook notification failed");
                }
                Ok(FailureOutcome::Removed { .. }) => {}
                Err(e) => warn!(url, error = %e, "Failed to record webhook failure"),
            }
        }

        attempt.into_result(url)
    }

    /// POST `payload` once. Timeouts and connection errors come back as
    /// [`Attempt::Failed`].
    pub async fn post(&self, url: &str, payload: &Notification) -> Attempt {
        let resp = match self
            .client
            .post(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .json(payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Attempt::Failed(truncate(&e.to_string())),
        };

        let status = resp.status();
        let body = truncate(&resp.text().await.unwrap_or_default());
        if status.is_success() {
            Attempt::Accepted {
                status: status.as_u16(),
                body,
            }
        } else {
            Attempt::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }

    pub async fn record_success(&self, url: &str) -> Result<(), StoreError> {
        let key = keys::webhook(url);
        let previous = self.load(&key).await;
        let record = WebhookRecord {
            url: url.to_string(),
            subscribed_at: previous.and_then(|r| r.subscribed_at),
            last_notified: Some(Utc::now().timestamp_millis()),
            failure_count: 0,
        };
        set_json(self.store.as_ref(), &key, &record, Some(RECORD_TTL)).await
    }

    /// Stamp `lastNotified` after a welcome notification. The record keeps no
    /// expiry, like a fresh subscription, and is only written while the URL
    /// is still subscribed. Returns whether anything was written.
    pub async fn record_welcome(&self, url: &str) -> Result<bool, StoreError> {
        if !self.store.sismember(keys::WEBHOOK_SUBSCRIBERS, url).await? {
            return Ok(false);
        }
        let key = keys::webhook(url);
        let now = Utc::now().timestamp_millis();
        let previous = self.load(&key).await;
        let record = WebhookRecord {
            url: url.to_string(),
            subscribed_at: previous.and_then(|r| r.subscribed_at).or(Some(now)),
            last_notified: Some(now),
            failure_count: 0,
        };
        set_json(self.store.as_ref(), &key, &record, None).await?;
        Ok(true)
    }

    pub async fn record_failure(&self, url: &str) -> Result<FailureOutcome, StoreError> {
        let key = keys::webhook(url);
        let previous = self.load(&key).await;
        let failure_count = previous.as_ref().map_or(0, |r| r.failure_count) + 1;

        if failure_count >= FAILURE_THRESHOLD {
            warn!(url, failure_count, "Removing webhook after repeated failures");
            self.store.srem(keys::WEBHOOK_SUBSCRIBERS, url).await?;
            self.store.del(&key).await?;
            return Ok(FailureOutcome::Removed { failure_count });
        }

        let record = WebhookRecord {
            url: url.to_string(),
            subscribed_at: previous.and_then(|r| r.subscribed_at),
            last_notified: None,
            failure_count,
        };
        set_json(self.store.as_ref(), &key, &record, Some(RECORD_TTL)).await?;
        Ok(FailureOutcome::Retained { failure_count })
    }

    /// A missing or unreadable record counts as a fresh one.
    async fn load(&self, key: &str) -> Option<WebhookRecord> {
        match get_json::<WebhookRecord>(self.store.as_ref(), key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "Ignoring unreadable webhook record");
                None
            }
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(DETAIL_CHARS).collect()
}
