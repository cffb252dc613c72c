use crate::types::{DeliveryResult, OutboundPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The contract every IM-channel adapter implements. The registry treats
/// channels as opaque; a failing send must return `Ok(DeliveryResult)` with
/// `success:false` rather than an `Err` — errors never cross this boundary
/// for best-effort callers (spec §4.D).
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> &str;

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult;
}

/// Lookup of channel handlers by id, plus the `last` sentinel resolution
/// rule (always resolves to a configured default, never a per-session
/// last-used lookup — see spec §9 open questions).
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
    default_channel: Option<String>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_channel(mut self, id: Option<String>) -> Self {
        self.default_channel = id;
        self
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.id().to_string(), channel);
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(id).cloned()
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn list_all(&self) -> Vec<Arc<dyn Channel>> {
        self.channels.values().cloned().collect()
    }

    /// Resolves the `last` sentinel to the configured default channel id.
    /// Any other id passes through unchanged.
    pub fn resolve_channel_id(&self, id: &str) -> Option<String> {
        if id == mozi_core::channel::CHANNEL_LAST {
            self.default_channel.clone()
        } else {
            Some(id.to_string())
        }
    }

    pub fn default_channel(&self) -> Option<&str> {
        self.default_channel.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubChannel {
        id: String,
        result: DeliveryResult,
    }

    #[async_trait]
    impl Channel for StubChannel {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send_message(&self, _chat_id: &str, _payload: &OutboundPayload) -> DeliveryResult {
            self.result.clone()
        }
    }

    #[test]
    fn resolves_last_sentinel_to_default() {
        let registry = ChannelRegistry::new().with_default_channel(Some("dingtalk".to_string()));
        assert_eq!(registry.resolve_channel_id("last"), Some("dingtalk".to_string()));
        assert_eq!(registry.resolve_channel_id("feishu"), Some("feishu".to_string()));
    }

    #[test]
    fn unresolved_last_without_default_is_none() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.resolve_channel_id("last"), None);
    }

    #[test]
    fn registers_and_looks_up_channels() {
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(StubChannel {
            id: "dingtalk".to_string(),
            result: DeliveryResult::ok("dingtalk", Some("m-1".to_string())),
        }));
        assert!(registry.is_available("dingtalk"));
        assert!(!registry.is_available("feishu"));
        assert_eq!(registry.list_all().len(), 1);
    }
}
