use async_trait::async_trait;
use mozi_delivery::{Channel, DeliveryResult, OutboundPayload};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// In-process delivery channel for the webchat widget served by `mozi-server`.
/// There is no external HTTP call here: each connected WebSocket session
/// registers its `chat_id` with an unbounded sender, and `send_message`
/// forwards a JSON frame straight onto it.
#[derive(Clone, Default)]
pub struct WebchatChannel {
    sinks: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl WebchatChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-connected client. Returns the receiving half the
    /// server's WebSocket task should forward to the socket.
    pub async fn connect(&self, chat_id: impl Into<String>) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.write().await.insert(chat_id.into(), tx);
        rx
    }

    pub async fn disconnect(&self, chat_id: &str) {
        self.sinks.write().await.remove(chat_id);
    }
}

#[async_trait]
impl Channel for WebchatChannel {
    fn id(&self) -> &str {
        mozi_core::channel::CHANNEL_WEBCHAT
    }

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
        let sinks = self.sinks.read().await;
        let Some(sender) = sinks.get(chat_id) else {
            warn!(chat_id, "webchat outbound dropped: no connected session");
            return DeliveryResult::failed(self.id(), format!("no connected webchat session for {chat_id}"));
        };

        let frame = json!({
            "text": payload.text,
            "mediaUrls": payload.media_urls,
            "replyToId": payload.reply_to_id,
        });

        match sender.send(frame.to_string()) {
            Ok(()) => DeliveryResult::ok(self.id(), None),
            Err(_) => DeliveryResult::failed(self.id(), "webchat session closed"),
        }
    }
}
