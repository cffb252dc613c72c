use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A delivery destination. Serialised form is `"channel:to"` — the `to`
/// portion may itself contain colons, so parsing only splits on the first one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub channel: String,
    pub to: String,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl Target {
    pub fn new(channel: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            to: to.into(),
            account_id: None,
        }
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.channel, self.to)
    }
}

/// One message to hand to a channel's `sendMessage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub text: String,
    #[serde(default)]
    pub media_urls: Option<Vec<String>>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media_urls: None,
            reply_to_id: None,
        }
    }
}

/// Outcome of one attempted delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub channel: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_details: Option<String>,
}

impl DeliveryResult {
    pub fn aborted(channel: &str) -> Self {
        Self {
            success: false,
            channel: channel.to_string(),
            message_id: None,
            error: Some("Aborted".to_string()),
            error_details: None,
        }
    }

    pub fn failed(channel: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.to_string(),
            message_id: None,
            error: Some(error.into()),
            error_details: None,
        }
    }

    pub fn ok(channel: &str, message_id: Option<String>) -> Self {
        Self {
            success: true,
            channel: channel.to_string(),
            message_id,
            error: None,
            error_details: None,
        }
    }
}

/// Cooperative cancellation token checked between payloads of a `deliverMany`
/// call. Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn fire(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options shared by `deliverOne`/`deliverMany`/`deliverOutbound`.
#[derive(Debug, Clone, Default)]
pub struct DeliverOptions {
    pub best_effort: bool,
    pub abort_signal: Option<AbortSignal>,
}

impl DeliverOptions {
    pub fn best_effort() -> Self {
        Self {
            best_effort: true,
            abort_signal: None,
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.abort_signal.as_ref().is_some_and(AbortSignal::is_fired)
    }
}
