//! GitHub OAuth proxy for the CMS login flow.
//!
//! `/auth` without a `code` sends the browser to GitHub's authorize page with
//! a signed `state`; GitHub redirects back to `/auth?code&state`, the code is
//! exchanged server-side and the browser lands on the CMS callback with the
//! token attached.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::auth::StateSigner;
use crate::config::Settings;

const STATE_MAX_AGE_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid or expired state")]
    InvalidState,

    #[error("{0}")]
    Provider(String),

    #[error("token exchange failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider response carried no access token")]
    MissingToken,

    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct OAuthProxy {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    provider_url: String,
    default_scope: String,
    callback_url: String,
    signer: StateSigner,
}

impl OAuthProxy {
    /// `None` when the GitHub app credentials are not configured.
    pub fn from_settings(client: reqwest::Client, settings: &Settings) -> Option<Self> {
        let client_id = settings.github_client_id.clone()?;
        let client_secret = settings.github_client_secret.clone()?;
        Some(Self {
            client,
            signer: StateSigner::new(
                client_secret.as_bytes(),
                Duration::minutes(STATE_MAX_AGE_MINUTES),
            ),
            client_id,
            client_secret,
            provider_url: settings.github_oauth_url.trim_end_matches('/').to_string(),
            default_scope: settings.oauth_scope.clone(),
            callback_url: settings.cms_callback_url(),
        })
    }

    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, OAuthError> {
        let mut url = Url::parse(&format!("{}/login/oauth/authorize", self.provider_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", scope.unwrap_or(&self.default_scope))
            .append_pair("state", &self.signer.issue(now));
        Ok(url.into())
    }

    pub fn check_state(&self, state: Option<&str>, now: DateTime<Utc>) -> Result<(), OAuthError> {
        match state {
            Some(state) if self.signer.verify(state, now) => Ok(()),
            _ => Err(OAuthError::InvalidState),
        }
    }

    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<String, OAuthError> {
        let url = format!("{}/login/oauth/access_token", self.provider_url);
        let body = TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            code,
            redirect_uri,
        };

        let data: TokenResponse = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = data.error {
            return Err(OAuthError::Provider(data.error_description.unwrap_or(error)));
        }
        let token = data.access_token.ok_or(OAuthError::MissingToken)?;
        info!("Exchanged OAuth code for access token");
        Ok(token)
    }

    pub fn completion_url(&self, token: &str) -> Result<String, OAuthError> {
        let mut url = Url::parse(&self.callback_url)?;
        url.query_pairs_mut()
            .append_pair("token", token)
            .append_pair("provider", "github");
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    fn settings(provider_url: &str) -> Settings {
        Settings {
            github_client_id: Some("client-123".into()),
            github_client_secret: Some("shh".into()),
            github_oauth_url: provider_url.into(),
            ..test_support::settings()
        }
    }

    async fn spawn_github(response: Value) -> String {
        let router = Router::new().route(
            "/login/oauth/access_token",
            post(move |Json(body): Json<Value>| {
                let response = response.clone();
                async move {
                    assert_eq!(body["client_id"], "client-123");
                    assert_eq!(body["client_secret"], "shh");
                    Json(response)
                }
            }),
        );
        format!("http://{}", test_support::serve(router).await)
    }

    #[test]
    fn disabled_without_credentials() {
        assert!(OAuthProxy::from_settings(test_support::client(), &test_support::settings())
            .is_none());
    }

    #[test]
    fn authorize_url_carries_a_verifiable_state() {
        let proxy =
            OAuthProxy::from_settings(test_support::client(), &settings("https://github.com"))
                .unwrap();
        let now = Utc::now();

        let url = Url::parse(
            &proxy
                .authorize_url("https://cms.example/auth", None, now)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(url.path(), "/login/oauth/authorize");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "https://cms.example/auth");
        assert_eq!(params["scope"], "repo");

        assert!(proxy.check_state(Some(params["state"].as_str()), now).is_ok());
        assert!(matches!(
            proxy.check_state(None, now),
            Err(OAuthError::InvalidState)
        ));
    }

    #[tokio::test]
    async fn exchange_returns_token() {
        let base = spawn_github(json!({ "access_token": "gho_abc", "token_type": "bearer" })).await;
        let proxy = OAuthProxy::from_settings(test_support::client(), &settings(&base)).unwrap();

        let token = proxy.exchange("code-1", "https://cms.example/auth").await.unwrap();
        assert_eq!(token, "gho_abc");
        assert_eq!(
            proxy.completion_url(&token).unwrap(),
            "https://blog.example/auth?token=gho_abc&provider=github"
        );
    }

    #[tokio::test]
    async fn provider_errors_prefer_description() {
        let base = spawn_github(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        }))
        .await;
        let proxy = OAuthProxy::from_settings(test_support::client(), &settings(&base)).unwrap();

        let err = proxy.exchange("stale", "https://cms.example/auth").await.unwrap_err();
        assert_eq!(err.to_string(), "The code passed is incorrect or expired.");
    }
}
