use async_trait::async_trait;
use mozi_delivery::{Channel, DeliveryResult, OutboundPayload};
use reqwest::Client;
use serde_json::json;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Sends outbound text via a WeCom (Enterprise WeChat) group-robot webhook.
/// Unlike DingTalk/Feishu, WeCom's robot webhook needs no request signature.
#[derive(Clone)]
pub struct WecomChannel {
    webhook_url: String,
    client: Client,
    retry_jitter_ms: u64,
}

impl WecomChannel {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
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
}

#[async_trait]
impl Channel for WecomChannel {
    fn id(&self) -> &str {
        mozi_core::channel::CHANNEL_WECOM
    }

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
        let body = json!({
            "msgtype": "text",
            "text": {
                "content": payload.text,
                "mentioned_list": [chat_id],
            },
        });

        let mut delay = Duration::from_secs(1);
        for attempt in 1..=3u32 {
            let resp = self.client.post(&self.webhook_url).json(&body).send().await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let parsed: serde_json::Value = r.json().await.unwrap_or_default();
                    let errcode = parsed.get("errcode").and_then(|v| v.as_i64()).unwrap_or(0);
                    if errcode == 0 {
                        info!(chat_id, attempt, "wecom outbound sent");
                        return DeliveryResult::ok(self.id(), None);
                    }
                    let errmsg = parsed
                        .get("errmsg")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown wecom error")
                        .to_string();
                    warn!(attempt, errcode, errmsg = %errmsg, "wecom outbound rejected");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), errmsg);
                    }
                }
                Ok(r) => {
                    let status = r.status();
                    warn!(attempt, %status, "wecom outbound failed");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), format!("http {status}"));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "wecom outbound network error");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), e.to_string());
                    }
                }
            }

            sleep(delay + self.jitter_delay(attempt)).await;
            delay *= 2;
        }

        DeliveryResult::failed(self.id(), "failed to deliver wecom message after retries")
    }
}
