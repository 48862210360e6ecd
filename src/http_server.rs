use std::time::Duration;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, HOST, LOCATION},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::auth;
use crate::background::spawn_logged;
use crate::counters;
use crate::error::AppError;
use crate::notifier::WebhookNotifier;
use crate::state::AppState;
use crate::store::StoreError;
use crate::types::{Notification, PostSummary};
use crate::validation::{self, ValidationError};

const X_VIEWER_ID: HeaderName = HeaderName::from_static("x-viewer-id");
const X_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, X_VIEWER_ID, X_AUTH_TOKEN])
        .expose_headers([X_VIEWER_ID])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/subscribe-webhook", post(subscribe_webhook))
        .route("/unsubscribe-webhook", post(unsubscribe_webhook))
        .route("/send-newsletter", post(send_newsletter))
        .route("/test-webhook", post(test_webhook))
        .route("/views/{slug}", get(get_views).post(record_view))
        .route("/viewers/{slug}", get(get_viewers).post(touch_viewer))
        .route("/auth", get(oauth))
        .route("/health", get(health))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}

/// Bind `HOST:PORT` and serve until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let address = format!("{}:{}", state.settings.host, state.settings.port);
    let app = router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ─── Request bodies ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EmailRequest {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookRequest {
    #[serde(default)]
    webhook_url: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PostRequest {
    post_title: Option<String>,
    post_url: Option<String>,
    post_description: Option<String>,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
struct AuthQuery {
    code: Option<String>,
    state: Option<String>,
    scope: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn authorize(state: &AppState, headers: &HeaderMap, query: &TokenQuery) -> Result<(), AppError> {
    let presented = headers
        .get(X_AUTH_TOKEN)
        .and_then(|v| v.to_str().ok())
        .or(query.token.as_deref());

    match (state.settings.newsletter_auth_token.as_deref(), presented) {
        (Some(expected), Some(presented)) if auth::verify_shared_secret(expected, presented) => {
            Ok(())
        }
        _ => {
            warn!("Rejected request with missing or invalid auth token");
            Err(AppError::Unauthorized)
        }
    }
}

// ─── Subscriptions ──────────────────────────────────────────────────────────

async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let outcome = state
        .registry
        .subscribe_email(req.email.as_deref().unwrap_or_default())
        .await?;

    if outcome.already_exists {
        return Ok(Json(json!({
            "success": true,
            "alreadySubscribed": true,
            "message": "Email already subscribed"
        })));
    }

    if state.settings.welcome_email {
        if let Some(mailer) = state.mailer.clone() {
            let email = state.templates.welcome(&outcome.identity);
            spawn_logged("welcome email", async move { mailer.send(&email).await });
        }
    }

    Ok(Json(json!({
        "success": true,
        "alreadySubscribed": false,
        "message": "Successfully subscribed"
    })))
}

async fn unsubscribe(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let outcome = state
        .registry
        .unsubscribe_email(req.email.as_deref().unwrap_or_default())
        .await?;

    let message = if outcome.was_present {
        "Successfully unsubscribed"
    } else {
        "Email was not subscribed"
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn subscribe_webhook(
    State(state): State<AppState>,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let outcome = state
        .registry
        .subscribe_webhook(req.webhook_url.as_deref().unwrap_or_default())
        .await?;

    if outcome.already_exists {
        return Ok(Json(json!({
            "success": true,
            "alreadySubscribed": true,
            "message": "Webhook URL already subscribed"
        })));
    }

    spawn_logged(
        "welcome webhook",
        send_welcome_webhook(state.notifier.clone(), outcome.identity),
    );

    Ok(Json(json!({
        "success": true,
        "alreadySubscribed": false,
        "message": "Successfully subscribed webhook"
    })))
}

/// A failed welcome is only logged; it does not count against the webhook.
async fn send_welcome_webhook(notifier: WebhookNotifier, url: String) -> Result<(), StoreError> {
    let attempt = notifier.post(&url, &Notification::welcome(Utc::now())).await;
    if attempt.is_success() {
        info!(url = %url, "Welcome notification sent");
        if !notifier.record_welcome(&url).await? {
            info!(url = %url, "Webhook unsubscribed before welcome was recorded");
        }
        Ok(())
    } else {
        warn!(url = %url, attempt = ?attempt, "Welcome notification failed");
        Ok(())
    }
}

async fn unsubscribe_webhook(
    State(state): State<AppState>,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let outcome = state
        .registry
        .unsubscribe_webhook(req.webhook_url.as_deref().unwrap_or_default())
        .await?;

    let message = if outcome.was_present {
        "Successfully unsubscribed webhook"
    } else {
        "Webhook URL was not subscribed"
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

// ─── Broadcasts ─────────────────────────────────────────────────────────────

async fn send_newsletter(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TokenQuery>, QueryRejection>,
    payload: Result<Json<PostRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    authorize(&state, &headers, &query)?;
    let Json(req) = payload?;

    let (Some(title), Some(url)) = (non_empty(req.post_title), non_empty(req.post_url)) else {
        return Err(ValidationError::MissingPostFields.into());
    };
    let post = PostSummary {
        title,
        url,
        description: non_empty(req.post_description),
        published_at: Utc::now(),
    };

    info!(title = %post.title, "Sending newsletter");
    let report = state.newsletter.send(post).await?;

    if report.total == 0 && report.total_webhooks == 0 {
        return Ok(Json(json!({
            "success": true,
            "message": "No subscribers to notify",
            "sent": 0,
            "webhooksNotified": 0
        })));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Newsletter sent",
        "sent": report.sent,
        "errors": report.errors,
        "total": report.total,
        "webhooksNotified": report.webhooks_notified,
        "webhookErrors": report.webhook_errors,
        "totalWebhooks": report.total_webhooks
    })))
}

/// Body is optional here; absent fields fall back to a placeholder post.
async fn test_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TokenQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    authorize(&state, &headers, &query)?;
    let req: PostRequest = if body.iter().all(u8::is_ascii_whitespace) {
        PostRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedPayload(e.to_string()))?
    };

    let post = PostSummary {
        title: non_empty(req.post_title)
            .unwrap_or_else(|| "Test Post - Webhook Notification".to_string()),
        url: non_empty(req.post_url)
            .unwrap_or_else(|| format!("{}/posts/test", state.settings.site_url())),
        description: Some(
            non_empty(req.post_description)
                .unwrap_or_else(|| "This is a test webhook notification".to_string()),
        ),
        published_at: Utc::now(),
    };

    let report = state.newsletter.test_webhooks(post).await?;
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "Webhook test completed"
    );

    if report.total() == 0 {
        return Ok(Json(json!({
            "success": true,
            "message": "No webhook subscribers to notify",
            "webhooksNotified": 0
        })));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Webhook test completed",
        "webhooksNotified": report.delivered,
        "webhookErrors": report.failed,
        "totalWebhooks": report.total(),
        "results": report.results
    })))
}

// ─── Counters ───────────────────────────────────────────────────────────────

async fn get_views(
    State(state): State<AppState>,
    slug: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(slug) = slug?;
    let slug = validation::validate_slug(&slug)?;
    let count = state.counters.views(slug).await?;
    Ok((
        [(CACHE_CONTROL, "public, max-age=30")],
        Json(json!({ "count": count })),
    )
        .into_response())
}

async fn record_view(
    State(state): State<AppState>,
    slug: Result<Path<String>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let Path(slug) = slug?;
    let slug = validation::validate_slug(&slug)?;
    let count = state.counters.record_view(slug).await?;
    Ok(Json(json!({ "count": count })))
}

async fn get_viewers(
    State(state): State<AppState>,
    slug: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(slug) = slug?;
    let slug = validation::validate_slug(&slug)?;
    let count = state.counters.active_viewers(slug).await?;
    Ok((
        [(CACHE_CONTROL, "no-cache")],
        Json(json!({ "count": count })),
    )
        .into_response())
}

async fn touch_viewer(
    State(state): State<AppState>,
    slug: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Path(slug) = slug?;
    let slug = validation::validate_slug(&slug)?;
    let viewer_id = match headers.get(X_VIEWER_ID) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ValidationError::InvalidViewerId)?;
            validation::validate_viewer_id(raw)?.to_string()
        }
        None => counters::new_viewer_id(),
    };
    let header = HeaderValue::from_str(&viewer_id).map_err(|_| ValidationError::InvalidViewerId)?;

    let count = state.counters.touch_viewer(slug, &viewer_id).await?;
    Ok((
        [
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (X_VIEWER_ID, header),
        ],
        Json(json!({ "count": count, "viewerId": viewer_id })),
    )
        .into_response())
}

// ─── OAuth ──────────────────────────────────────────────────────────────────

fn redirect(location: &str) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(location)
        .map_err(|e| AppError::MalformedPayload(format!("invalid redirect target: {e}")))?;
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}

async fn oauth(
    State(state): State<AppState>,
    query: Result<Query<AuthQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Query(query) = query?;
    let proxy = state.oauth.as_ref().ok_or(AppError::NotConfigured("OAuth"))?;

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let redirect_uri = match headers.get(HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("{proto}://{host}/auth"),
        None => format!("{}/auth", state.settings.site_url()),
    };
    let now = Utc::now();

    let Some(code) = query.code.as_deref() else {
        let target = proxy.authorize_url(&redirect_uri, query.scope.as_deref(), now)?;
        return redirect(&target);
    };

    proxy.check_state(query.state.as_deref(), now)?;
    let token = proxy.exchange(code, &redirect_uri).await?;
    redirect(&proxy.completion_url(&token)?)
}

// ─── Misc ───────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
