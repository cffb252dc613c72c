use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use mozi_delivery::{Channel, DeliveryResult, OutboundPayload};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Sends outbound text via a Feishu (Lark) custom-bot webhook. Feishu signs
/// by using `"{timestamp}\n{secret}"` as the HMAC key over an empty message,
/// unlike DingTalk's timestamp+sign query string.
#[derive(Clone)]
pub struct FeishuChannel {
    webhook_url: String,
    secret: Option<String>,
    client: Client,
    retry_jitter_ms: u64,
}

impl FeishuChannel {
    pub fn new(webhook_url: String, secret: Option<String>) -> Self {
        Self {
            webhook_url,
            secret,
            client: Client::new(),
            retry_jitter_ms: 250,
        }
    }

    fn jitter_delay(&self, attempt: u32) -> StdDuration {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let jitter = (seed ^ ((attempt as u64) << 7)) % (self.retry_jitter_ms + 1);
        StdDuration::from_millis(jitter)
    }

    fn timestamp_and_sign(&self) -> (u64, Option<String>) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let Some(secret) = &self.secret else {
            return (timestamp, None);
        };
        let key = format!("{}\n{}", timestamp, secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(b"");
        let sign = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        (timestamp, Some(sign))
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn id(&self) -> &str {
        mozi_core::channel::CHANNEL_FEISHU
    }

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
        let (timestamp, sign) = self.timestamp_and_sign();
        let mut body = json!({
            "msg_type": "text",
            "content": { "text": payload.text },
        });
        if let Some(sign) = sign {
            body["timestamp"] = json!(timestamp.to_string());
            body["sign"] = json!(sign);
        }

        let mut delay = Duration::from_secs(1);
        for attempt in 1..=3u32 {
            let resp = self.client.post(&self.webhook_url).json(&body).send().await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let parsed: serde_json::Value = r.json().await.unwrap_or_default();
                    let code = parsed.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
                    if code == 0 {
                        info!(chat_id, attempt, "feishu outbound sent");
                        return DeliveryResult::ok(self.id(), None);
                    }
                    let msg = parsed
                        .get("msg")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown feishu error")
                        .to_string();
                    warn!(attempt, code, msg = %msg, "feishu outbound rejected");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), msg);
                    }
                }
                Ok(r) => {
                    let status = r.status();
                    warn!(attempt, %status, "feishu outbound failed");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), format!("http {status}"));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "feishu outbound network error");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), e.to_string());
                    }
                }
            }

            sleep(delay + self.jitter_delay(attempt)).await;
            delay *= 2;
        }

        DeliveryResult::failed(self.id(), "failed to deliver feishu message after retries")
    }
}
