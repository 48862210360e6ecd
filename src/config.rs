use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use tracing::{info, warn};

/// Runtime settings, read from environment variables (`PORT`, `REDIS_URL`,
/// `RESEND_API_KEY`, ...). Every field has a default; optional integrations
/// stay disabled when their variables are unset or blank.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    pub redis_url: Option<String>,

    pub resend_api_key: Option<String>,
    pub resend_api_url: String,
    pub resend_from_email: String,
    pub resend_from_name: String,
    pub site_url: String,
    pub welcome_email: bool,

    pub newsletter_auth_token: Option<String>,

    pub webhook_timeout_secs: u64,
    pub webhook_user_agent: String,

    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    pub github_oauth_url: String,
    pub oauth_scope: String,
    pub cms_auth_callback_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            redis_url: None,
            resend_api_key: None,
            resend_api_url: "https://api.resend.com".into(),
            resend_from_email: "blog@localhost".into(),
            resend_from_name: "Blog".into(),
            site_url: "http://localhost:4321".into(),
            welcome_email: false,
            newsletter_auth_token: None,
            webhook_timeout_secs: 10,
            webhook_user_agent: concat!("blog-backend/", env!("CARGO_PKG_VERSION")).into(),
            github_client_id: None,
            github_client_secret: None,
            github_oauth_url: "https://github.com".into(),
            oauth_scope: "repo".into(),
            cms_auth_callback_url: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Self::from_env(Environment::default())?;
        settings.log_summary();
        Ok(settings)
    }

    fn from_env(env: Environment) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;
        Ok(settings.trimmed())
    }

    fn trimmed(mut self) -> Self {
        for value in [
            &mut self.redis_url,
            &mut self.resend_api_key,
            &mut self.newsletter_auth_token,
            &mut self.github_client_id,
            &mut self.github_client_secret,
            &mut self.cms_auth_callback_url,
        ] {
            *value = value
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        for value in [
            &mut self.host,
            &mut self.resend_api_url,
            &mut self.resend_from_email,
            &mut self.resend_from_name,
            &mut self.site_url,
            &mut self.webhook_user_agent,
            &mut self.github_oauth_url,
            &mut self.oauth_scope,
        ] {
            *value = value.trim().to_string();
        }
        self
    }

    fn log_summary(&self) {
        info!(host = %self.host, port = self.port, "Loaded settings");
        if self.redis_url.is_none() {
            warn!("REDIS_URL not set, using the in-memory store; data will not survive restarts");
        }
        if self.resend_api_key.is_none() {
            warn!("RESEND_API_KEY not set, newsletter emails are disabled");
        }
        if self.newsletter_auth_token.is_none() {
            warn!("NEWSLETTER_AUTH_TOKEN not set, broadcast endpoints will reject every request");
        }
        if self.github_client_id.is_none() || self.github_client_secret.is_none() {
            warn!("GITHUB_CLIENT_ID/GITHUB_CLIENT_SECRET not set, OAuth proxy is disabled");
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn site_url(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }

    pub fn from_address(&self) -> String {
        format!("{} <{}>", self.resend_from_name, self.resend_from_email)
    }

    pub fn cms_callback_url(&self) -> String {
        self.cms_auth_callback_url
            .clone()
            .unwrap_or_else(|| format!("{}/auth", self.site_url()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Settings {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_env(Environment::default().source(Some(source))).unwrap()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = from_vars(&[]);
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.webhook_timeout(), Duration::from_secs(10));
        assert_eq!(settings.redis_url, None);
        assert!(!settings.welcome_email);
        assert!(settings.webhook_user_agent.starts_with("blog-backend/"));
        assert_eq!(settings.cms_callback_url(), "http://localhost:4321/auth");
    }

    #[test]
    fn environment_overrides_and_blanks() {
        let settings = from_vars(&[
            ("PORT", "8080"),
            ("REDIS_URL", "redis://cache:6379"),
            ("RESEND_API_KEY", "   "),
            ("NEWSLETTER_AUTH_TOKEN", " 0123 "),
            ("WELCOME_EMAIL", "true"),
            ("SITE_URL", "https://blog.example/"),
            ("RESEND_FROM_NAME", "The Blog"),
        ]);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(settings.resend_api_key, None);
        assert_eq!(settings.newsletter_auth_token.as_deref(), Some("0123"));
        assert!(settings.welcome_email);
        assert_eq!(settings.site_url(), "https://blog.example");
        assert_eq!(settings.cms_callback_url(), "https://blog.example/auth");
        assert_eq!(settings.from_address(), "The Blog <blog@localhost>");
    }
}
