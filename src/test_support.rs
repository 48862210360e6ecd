// Test helpers for talking to local peers:
// - every peer binds 127.0.0.1:0 so tests can run in parallel
// - the client has a short timeout and skips proxies
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::config::Settings;

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("build test http client")
}

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}/hook")
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub user_agent: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct PeerState {
    status: StatusCode,
    hits: Arc<Mutex<Vec<Hit>>>,
}

/// Webhook subscriber that answers every POST with a fixed status.
pub struct WebhookPeer {
    pub url: String,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl WebhookPeer {
    pub async fn spawn(status: StatusCode) -> Self {
        let hits: Arc<Mutex<Vec<Hit>>> = Arc::default();
        let router = Router::new()
            .route("/hook", post(record_hit))
            .with_state(PeerState {
                status,
                hits: hits.clone(),
            });
        let addr = serve(router).await;
        Self {
            url: format!("http://{addr}/hook"),
            hits,
        }
    }

    pub async fn hits(&self) -> Vec<Hit> {
        self.hits.lock().await.clone()
    }

    /// Background sends are never joined, so poll for them.
    pub async fn wait_for_hits(&self, count: usize) -> Vec<Hit> {
        for _ in 0..100 {
            let hits = self.hits().await;
            if hits.len() >= count {
                return hits;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.hits().await
    }
}

async fn record_hit(
    State(state): State<PeerState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, &'static str) {
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.hits.lock().await.push(Hit { user_agent, body });
    (state.status, "ok")
}

pub fn settings() -> Settings {
    Settings {
        newsletter_auth_token: Some("test-token".into()),
        webhook_timeout_secs: 2,
        site_url: "https://blog.example".into(),
        ..Settings::default()
    }
}
