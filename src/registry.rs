use chrono::Utc;
use tracing::info;

use crate::error::AppError;
use crate::store::{keys, set_json, SharedStore};
use crate::types::{EmailRecord, WebhookRecord};
use crate::validation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribed {
    /// Normalized email or URL.
    pub identity: String,
    pub already_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribed {
    pub identity: String,
    pub was_present: bool,
}

/// Email and webhook subscriber sets. Input is validated and normalized
/// before the store is touched.
#[derive(Clone)]
pub struct Registry {
    store: SharedStore,
}

impl Registry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn subscribe_email(&self, raw: &str) -> Result<Subscribed, AppError> {
        let email = validation::normalize_email(raw)?;

        if self.store.sismember(keys::EMAIL_SUBSCRIBERS, &email).await? {
            return Ok(Subscribed {
                identity: email,
                already_exists: true,
            });
        }

        self.store.sadd(keys::EMAIL_SUBSCRIBERS, &email).await?;
        let record = EmailRecord {
            email: email.clone(),
            subscribed_at: Utc::now().timestamp_millis(),
            confirmed: false,
        };
        set_json(self.store.as_ref(), &keys::subscriber(&email), &record, None).await?;

        info!(email = %email, "New subscriber");
        Ok(Subscribed {
            identity: email,
            already_exists: false,
        })
    }

    pub async fn unsubscribe_email(&self, raw: &str) -> Result<Unsubscribed, AppError> {
        let email = validation::email_identity(raw)?;

        let was_present = self.store.srem(keys::EMAIL_SUBSCRIBERS, &email).await?;
        self.store.del(&keys::subscriber(&email)).await?;

        if was_present {
            info!(email = %email, "Removed subscriber");
        }
        Ok(Unsubscribed {
            identity: email,
            was_present,
        })
    }

    pub async fn subscribe_webhook(&self, raw: &str) -> Result<Subscribed, AppError> {
        let url = validation::normalize_webhook_url(raw)?;

        if self.store.sismember(keys::WEBHOOK_SUBSCRIBERS, &url).await? {
            return Ok(Subscribed {
                identity: url,
                already_exists: true,
            });
        }

        self.store.sadd(keys::WEBHOOK_SUBSCRIBERS, &url).await?;
        let record = WebhookRecord::new(url.clone(), Utc::now().timestamp_millis());
        set_json(self.store.as_ref(), &keys::webhook(&url), &record, None).await?;

        info!(url = %url, "New webhook subscriber");
        Ok(Subscribed {
            identity: url,
            already_exists: false,
        })
    }

    pub async fn unsubscribe_webhook(&self, raw: &str) -> Result<Unsubscribed, AppError> {
        let url = validation::webhook_identity(raw)?;

        let was_present = self.store.srem(keys::WEBHOOK_SUBSCRIBERS, &url).await?;
        self.store.del(&keys::webhook(&url)).await?;

        if was_present {
            info!(url = %url, "Removed webhook");
        }
        Ok(Unsubscribed {
            identity: url,
            was_present,
        })
    }
}
