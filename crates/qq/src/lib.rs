use async_trait::async_trait;
use mozi_delivery::{Channel, DeliveryResult, OutboundPayload};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Cached app access token, refreshed lazily once it's within its expiry window.
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Sends outbound text through the QQ bot "send to user" API, fetching and
/// caching an app access token from `app_id`/`app_secret` as needed.
#[derive(Clone)]
pub struct QqChannel {
    app_id: String,
    app_secret: String,
    api_base: String,
    client: Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl QqChannel {
    pub fn new(app_id: String, app_secret: String) -> Self {
        Self {
            app_id,
            app_secret,
            api_base: "https://api.sgroup.qq.com".to_string(),
            client: Client::new(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let resp = self
            .client
            .post("https://bots.qq.com/app/getAppAccessToken")
            .json(&json!({
                "appId": self.app_id,
                "clientSecret": self.app_secret,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = resp.json().await?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("access token missing from QQ token response"))?
            .to_string();
        let expires_in: u64 = body
            .get("expires_in")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(7200);

        *guard = Some(CachedToken {
            value: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        });
        Ok(token)
    }
}

#[async_trait]
impl Channel for QqChannel {
    fn id(&self) -> &str {
        mozi_core::channel::CHANNEL_QQ
    }

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => return DeliveryResult::failed(self.id(), e.to_string()),
        };

        let url = format!("{}/v2/users/{}/messages", self.api_base, chat_id);
        let body = json!({ "content": payload.text, "msg_type": 0 });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("QQBot {}", token))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let parsed: serde_json::Value = r.json().await.unwrap_or_default();
                let message_id = parsed
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                info!(chat_id, "qq outbound sent");
                DeliveryResult::ok(self.id(), message_id)
            }
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                warn!(%status, body = %body, "qq outbound failed");
                DeliveryResult::failed(self.id(), format!("http {status}: {body}"))
            }
            Err(e) => {
                warn!(error = %e, "qq outbound network error");
                DeliveryResult::failed(self.id(), e.to_string())
            }
        }
    }
}
