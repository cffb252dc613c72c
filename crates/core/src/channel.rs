use async_trait::async_trait;

/// Recognised channel ids — the closed set this gateway bridges to.
pub const CHANNEL_DINGTALK: &str = "dingtalk";
pub const CHANNEL_FEISHU: &str = "feishu";
pub const CHANNEL_QQ: &str = "qq";
pub const CHANNEL_WECOM: &str = "wecom";
pub const CHANNEL_WEBCHAT: &str = "webchat";

/// Sentinel channel id meaning "resolve to whatever channel the context
/// last used". The cron executor only ever resolves it to a configured
/// default (see `mozi_delivery`); a true per-session lookup is future work.
pub const CHANNEL_LAST: &str = "last";

/// All channel ids this gateway can natively deliver to, sentinel excluded.
pub fn native_supported_channels() -> &'static [&'static str] {
    &[
        CHANNEL_DINGTALK,
        CHANNEL_FEISHU,
        CHANNEL_QQ,
        CHANNEL_WECOM,
        CHANNEL_WEBCHAT,
    ]
}

/// Channel ids that may prefix a `session_key` of the form `"<channel>:<id>"`.
/// Same closed set as `native_supported_channels`; kept as a separate name
/// because callers reason about it from the session-key-parsing angle.
pub fn target_personal_channels() -> &'static [&'static str] {
    native_supported_channels()
}

pub fn is_native_channel_supported(id: &str) -> bool {
    native_supported_channels().contains(&id)
}

/// Standardized interface for all channel adapters (DingTalk, Feishu, etc.).
/// Each adapter runs as a Tokio task, consuming inbound messages from its
/// platform and publishing them to the MessageBus, while subscribing to
/// outbound messages.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel identifier (e.g., "dingtalk", "webchat").
    fn channel_name(&self) -> &str;

    /// Start the adapter. This should spawn the necessary inbound/outbound tasks.
    /// Typically blocks or runs until the adapter is stopped.
    async fn start(&self) -> anyhow::Result<()>;

    /// Quick health check — verify the adapter connection is alive.
    async fn health_check(&self) -> bool {
        true // default: assume healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_set_excludes_sentinel() {
        assert!(!native_supported_channels().contains(&CHANNEL_LAST));
    }

    #[test]
    fn recognises_all_five_channels() {
        for id in ["dingtalk", "feishu", "qq", "wecom", "webchat"] {
            assert!(is_native_channel_supported(id));
        }
        assert!(!is_native_channel_supported("telegram"));
    }
}
