//! New-post broadcast: one email per subscriber, then the webhook fan-out.

use std::sync::Arc;

use htmlescape::encode_minimal;
use serde::Serialize;
use tracing::{error, info};
use url::form_urlencoded::byte_serialize;

use crate::error::AppError;
use crate::mailer::{Email, Mailer};
use crate::notifier::WebhookNotifier;
use crate::store::{keys, SharedStore};
use crate::types::{Notification, NotifyReport, PostSummary};

/// Recipients are processed in groups of this size.
const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterReport {
    pub sent: usize,
    pub errors: usize,
    pub total: usize,
    pub webhooks_notified: usize,
    pub webhook_errors: usize,
    pub total_webhooks: usize,
}

/// Sender identity and links used in outgoing emails.
#[derive(Debug, Clone)]
pub struct Templates {
    pub from: String,
    pub site_url: String,
}

impl Templates {
    fn unsubscribe_link(&self, recipient: &str) -> String {
        let email: String = byte_serialize(recipient.as_bytes()).collect();
        format!("{}/unsubscribe?email={email}", self.site_url)
    }

    pub fn new_post(&self, post: &PostSummary, recipient: &str) -> Email {
        let unsubscribe = self.unsubscribe_link(recipient);
        let title = encode_minimal(&post.title);
        let description = post
            .description
            .as_deref()
            .map(|d| {
                format!(
                    r#"<p style="color: #666; font-size: 16px; margin: 20px 0;">{}</p>"#,
                    encode_minimal(d)
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
  </head>
  <body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #000; margin-top: 0; font-size: 24px;">New Post: {title}</h1>
    {description}
    <a href="{url}" style="display: inline-block; background-color: #000; color: #fff; padding: 12px 24px; text-decoration: none; border-radius: 4px; margin: 20px 0;">Read the post</a>
    <hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
    <p style="color: #999; font-size: 12px; margin: 0;">
      You're receiving this because you subscribed to updates from this blog.<br>
      <a href="{unsubscribe_html}" style="color: #999;">Unsubscribe</a>
    </p>
  </body>
</html>
"#,
            url = encode_minimal(&post.url),
            unsubscribe_html = encode_minimal(&unsubscribe),
        );

        let text = format!(
            "New Post: {}\n\n{}\n\nRead the post: {}\n\n---\nYou're receiving this because you subscribed to updates from this blog.\nUnsubscribe: {unsubscribe}",
            post.title,
            post.description.as_deref().unwrap_or_default(),
            post.url,
        );

        Email {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: format!("New Post: {}", post.title),
            html,
            text,
        }
    }

    pub fn welcome(&self, recipient: &str) -> Email {
        let unsubscribe = self.unsubscribe_link(recipient);
        let site = encode_minimal(&self.site_url);
        let html = format!(
            r#"<!DOCTYPE html>
<html>
  <body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #000; margin-top: 0; font-size: 24px;">Thanks for subscribing!</h1>
    <p>You will get an email whenever a new post is published on <a href="{site}">{site}</a>.</p>
    <p style="color: #999; font-size: 12px;"><a href="{unsubscribe_html}" style="color: #999;">Unsubscribe</a></p>
  </body>
</html>
"#,
            unsubscribe_html = encode_minimal(&unsubscribe),
        );
        let text = format!(
            "Thanks for subscribing!\n\nYou will get an email whenever a new post is published on {}.\n\nUnsubscribe: {unsubscribe}",
            self.site_url,
        );

        Email {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: "Thanks for subscribing".to_string(),
            html,
            text,
        }
    }
}

#[derive(Clone)]
pub struct Newsletter {
    store: SharedStore,
    mailer: Option<Arc<dyn Mailer>>,
    notifier: WebhookNotifier,
    templates: Templates,
}

impl Newsletter {
    pub fn new(
        store: SharedStore,
        mailer: Option<Arc<dyn Mailer>>,
        notifier: WebhookNotifier,
        templates: Templates,
    ) -> Self {
        Self {
            store,
            mailer,
            notifier,
            templates,
        }
    }

    pub async fn send(&self, post: PostSummary) -> Result<NewsletterReport, AppError> {
        let subscribers = self.store.smembers(keys::EMAIL_SUBSCRIBERS).await?;
        let webhooks = self.store.smembers(keys::WEBHOOK_SUBSCRIBERS).await?;

        if subscribers.is_empty() && webhooks.is_empty() {
            return Ok(NewsletterReport::default());
        }

        let (sent, errors) = self.send_emails(&post, &subscribers).await?;
        info!(sent, errors, "Newsletter emails sent");

        let notified = self
            .notifier
            .notify(&webhooks, &Notification::NewPost { post })
            .await;
        info!(
            notified = notified.delivered,
            errors = notified.failed,
            "Newsletter webhooks notified"
        );

        Ok(NewsletterReport {
            sent,
            errors,
            total: subscribers.len(),
            webhooks_notified: notified.delivered,
            webhook_errors: notified.failed,
            total_webhooks: webhooks.len(),
        })
    }

    /// Webhook-only broadcast used to check subscriber endpoints.
    pub async fn test_webhooks(&self, post: PostSummary) -> Result<NotifyReport, AppError> {
        Ok(self
            .notifier
            .broadcast(&Notification::NewPost { post })
            .await?)
    }

    async fn send_emails(
        &self,
        post: &PostSummary,
        subscribers: &[String],
    ) -> Result<(usize, usize), AppError> {
        if subscribers.is_empty() {
            return Ok((0, 0));
        }
        let mailer = self
            .mailer
            .as_ref()
            .ok_or(AppError::NotConfigured("Email provider"))?;

        let mut sent = 0;
        let mut errors = 0;
        for batch in subscribers.chunks(BATCH_SIZE) {
            for recipient in batch {
                match mailer.send(&self.templates.new_post(post, recipient)).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        error!(recipient = %recipient, error = %e, "Failed to send newsletter email");
                        errors += 1;
                    }
                }
            }
        }

        Ok((sent, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::testing::RecordingMailer;
    use crate::store::{KvStore, MemoryStore};
    use crate::test_support::{self, WebhookPeer};
    use axum::http::StatusCode;
    use chrono::Utc;

    fn templates() -> Templates {
        Templates {
            from: "Blog <blog@example.com>".into(),
            site_url: "https://blog.example".into(),
        }
    }

    fn post() -> PostSummary {
        PostSummary {
            title: "Rust & <Friends>".into(),
            url: "https://blog.example/posts/rust".into(),
            description: Some("A tour".into()),
            published_at: Utc::now(),
        }
    }

    fn newsletter(store: &Arc<MemoryStore>, mailer: Option<Arc<dyn Mailer>>) -> Newsletter {
        let notifier =
            WebhookNotifier::new(test_support::client(), store.clone(), "test-agent".into());
        Newsletter::new(store.clone(), mailer, notifier, templates())
    }

    #[test]
    fn new_post_email_is_personalized_and_escaped() {
        let email = templates().new_post(&post(), "a+b@example.com");

        assert_eq!(email.to, "a+b@example.com");
        assert_eq!(email.subject, "New Post: Rust & <Friends>");
        assert!(email.html.contains("New Post: Rust &amp; &lt;Friends&gt;"));
        assert!(email.html.contains("A tour"));
        assert!(email
            .text
            .contains("Unsubscribe: https://blog.example/unsubscribe?email=a%2Bb%40example.com"));
        assert!(email.text.contains("Read the post: https://blog.example/posts/rust"));
    }

    #[test]
    fn description_is_optional() {
        let mut post = post();
        post.description = None;
        let email = templates().new_post(&post, "r@example.com");
        assert!(!email.html.contains("font-size: 16px"));
    }

    #[tokio::test]
    async fn nobody_to_notify() {
        let store = Arc::new(MemoryStore::new());
        let report = newsletter(&store, None).send(post()).await.unwrap();

        assert_eq!(report.sent, 0);
        assert_eq!(report.webhooks_notified, 0);
    }

    #[tokio::test]
    async fn emails_and_webhooks_are_counted_separately() {
        let store = Arc::new(MemoryStore::new());
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            store.sadd(keys::EMAIL_SUBSCRIBERS, email).await.unwrap();
        }
        let peer = WebhookPeer::spawn(StatusCode::OK).await;
        store
            .sadd(keys::WEBHOOK_SUBSCRIBERS, &peer.url)
            .await
            .unwrap();
        let mailer = Arc::new(RecordingMailer::failing_for(&["b@example.com"]));

        let report = newsletter(&store, Some(mailer.clone()))
            .send(post())
            .await
            .unwrap();

        assert_eq!((report.sent, report.errors, report.total), (2, 1, 3));
        assert_eq!(
            (report.webhooks_notified, report.webhook_errors, report.total_webhooks),
            (1, 0, 1)
        );
        let sent = mailer.sent.lock().await;
        let mut recipients: Vec<_> = sent.iter().map(|e| e.to.as_str()).collect();
        recipients.sort();
        assert_eq!(recipients, ["a@example.com", "c@example.com"]);
        assert_eq!(peer.hits().await[0].body["post"]["title"], "Rust & <Friends>");
    }

    #[tokio::test]
    async fn every_subscriber_is_reached_across_batches() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..(BATCH_SIZE * 2 + 3) {
            store
                .sadd(keys::EMAIL_SUBSCRIBERS, &format!("reader{i}@example.com"))
                .await
                .unwrap();
        }
        let mailer = Arc::new(RecordingMailer::default());

        let report = newsletter(&store, Some(mailer.clone()))
            .send(post())
            .await
            .unwrap();

        assert_eq!(report.sent, 103);
        assert_eq!(mailer.sent.lock().await.len(), 103);
    }

    #[tokio::test]
    async fn subscribers_without_a_mailer_is_a_configuration_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .sadd(keys::EMAIL_SUBSCRIBERS, "a@example.com")
            .await
            .unwrap();

        let err = newsletter(&store, None).send(post()).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
    }
}
