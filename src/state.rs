use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::counters::Counters;
use crate::mailer::{Mailer, ResendMailer};
use crate::newsletter::{Newsletter, Templates};
use crate::notifier::WebhookNotifier;
use crate::oauth::OAuthProxy;
use crate::registry::Registry;
use crate::store::{MemoryStore, RedisStore, SharedStore};

/// Shared handles for request handlers. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Registry,
    pub counters: Counters,
    pub notifier: WebhookNotifier,
    pub newsletter: Newsletter,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub templates: Templates,
    pub oauth: Option<Arc<OAuthProxy>>,
}

impl AppState {
    pub async fn initialize(settings: Settings) -> Result<Self> {
        let store: SharedStore = match &settings.redis_url {
            Some(url) => Arc::new(
                RedisStore::connect(url)
                    .await
                    .context("failed to connect to Redis")?,
            ),
            None => Arc::new(MemoryStore::new()),
        };

        let client = reqwest::Client::builder()
            .timeout(settings.webhook_timeout())
            .build()
            .context("failed to build HTTP client")?;

        let mailer = settings.resend_api_key.as_deref().map(|key| {
            Arc::new(ResendMailer::new(client.clone(), &settings.resend_api_url, key))
                as Arc<dyn Mailer>
        });

        Ok(Self::assemble(settings, store, client, mailer))
    }

    pub fn assemble(
        settings: Settings,
        store: SharedStore,
        client: reqwest::Client,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Self {
        let notifier = WebhookNotifier::new(
            client.clone(),
            store.clone(),
            settings.webhook_user_agent.clone(),
        );
        let templates = Templates {
            from: settings.from_address(),
            site_url: settings.site_url().to_string(),
        };
        let newsletter = Newsletter::new(
            store.clone(),
            mailer.clone(),
            notifier.clone(),
            templates.clone(),
        );
        let oauth = OAuthProxy::from_settings(client, &settings).map(Arc::new);

        Self {
            registry: Registry::new(store.clone()),
            counters: Counters::new(store),
            notifier,
            newsletter,
            mailer,
            templates,
            oauth,
            settings: Arc::new(settings),
        }
    }
}
