use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use mozi_core::channel::ChannelAdapter;
use mozi_core::types::{Message, Role};
use mozi_delivery::{Channel, DeliveryResult, OutboundPayload};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Sends outbound text via a DingTalk custom-robot webhook, with the
/// standard timestamp+HMAC signature appended when a secret is configured.
#[derive(Clone)]
pub struct DingtalkChannel {
    webhook_url: String,
    secret: Option<String>,
    client: Client,
    retry_jitter_ms: u64,
}

impl DingtalkChannel {
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

    fn signed_url(&self) -> String {
        let Some(secret) = &self.secret else {
            return self.webhook_url.clone();
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let string_to_sign = format!("{}\n{}", timestamp, secret);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        let encoded_sign = urlencoding_encode(&signature);

        format!(
            "{}{}timestamp={}&sign={}",
            self.webhook_url,
            if self.webhook_url.contains('?') { '&' } else { '?' },
            timestamp,
            encoded_sign
        )
    }
}

fn urlencoding_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl Channel for DingtalkChannel {
    fn id(&self) -> &str {
        mozi_core::channel::CHANNEL_DINGTALK
    }

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
        let body = json!({
            "msgtype": "text",
            "text": { "content": payload.text },
            "at": { "atUserIds": [chat_id] },
        });

        let mut delay = Duration::from_secs(1);
        for attempt in 1..=3u32 {
            let resp = self.client.post(self.signed_url()).json(&body).send().await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let parsed: serde_json::Value = r.json().await.unwrap_or_default();
                    let errcode = parsed.get("errcode").and_then(|v| v.as_i64()).unwrap_or(0);
                    if errcode == 0 {
                        info!(chat_id, attempt, "dingtalk outbound sent");
                        return DeliveryResult::ok(self.id(), None);
                    }
                    let errmsg = parsed
                        .get("errmsg")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown dingtalk error")
                        .to_string();
                    warn!(attempt, errcode, errmsg = %errmsg, "dingtalk outbound rejected");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), errmsg);
                    }
                }
                Ok(r) => {
                    let status = r.status();
                    warn!(attempt, %status, "dingtalk outbound failed");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), format!("http {status}"));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "dingtalk outbound network error");
                    if attempt == 3 {
                        return DeliveryResult::failed(self.id(), e.to_string());
                    }
                }
            }

            sleep(delay + self.jitter_delay(attempt)).await;
            delay *= 2;
        }

        DeliveryResult::failed(self.id(), "failed to deliver dingtalk message after retries")
    }
}

impl DingtalkChannel {
    /// Wraps a DingTalk custom-robot callback body into a bus `Message`.
    /// No further inbound parsing (mentions, cards, etc.) is attempted.
    pub fn wrap_inbound(&self, body: &serde_json::Value) -> Message {
        let content = body
            .get("text")
            .and_then(|t| t.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        let sender_id = body
            .get("senderId")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let mut msg = Message::new(self.id(), &format!("dingtalk:{sender_id}"), Role::User, content);
        msg.sender_id = sender_id;
        msg
    }
}

#[async_trait]
impl ChannelAdapter for DingtalkChannel {
    fn channel_name(&self) -> &str {
        self.id()
    }

    async fn start(&self) -> anyhow::Result<()> {
        // Inbound arrives via mozi-server's webhook route, not a polled
        // connection; nothing to run in the background.
        Ok(())
    }
}
