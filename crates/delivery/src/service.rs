use crate::channel::ChannelRegistry;
use crate::error::DeliveryError;
use crate::types::{DeliverOptions, DeliveryResult, OutboundPayload, Target};
use std::sync::Arc;
use tracing::warn;

/// Accepts a target + payload list and dispatches through the [`ChannelRegistry`]
/// with best-effort or stop-on-first-failure semantics and cooperative
/// cancellation (spec §4.E).
pub struct DeliveryService {
    registry: Arc<ChannelRegistry>,
}

impl DeliveryService {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    /// Parses `"channel:to"` into a [`Target`]. The `last` sentinel always
    /// returns `None` — the caller must resolve it externally first.
    pub fn parse_target(&self, raw: &str, fallback_channel: Option<&str>) -> Option<Target> {
        if raw == mozi_core::channel::CHANNEL_LAST {
            return None;
        }

        if let Some((channel, to)) = raw.split_once(':') {
            if channel.is_empty() || to.is_empty() {
                return None;
            }
            return Some(Target::new(channel, to));
        }

        // No colon: treat the whole string as the `to` part, using the fallback channel.
        let channel = fallback_channel?;
        if raw.is_empty() {
            return None;
        }
        Some(Target::new(channel, raw))
    }

    pub async fn deliver_one(
        &self,
        target: &Target,
        payload: &OutboundPayload,
        opts: &DeliverOptions,
    ) -> Result<DeliveryResult, DeliveryError> {
        let Some(channel) = self.registry.get_channel(&target.channel) else {
            if opts.best_effort {
                return Ok(DeliveryResult::failed(
                    &target.channel,
                    format!("channel not found: {}", target.channel),
                ));
            }
            return Err(DeliveryError::ChannelNotFound(target.channel.clone()));
        };

        let result = channel.send_message(&target.to, payload).await;

        if !result.success && !opts.best_effort {
            return Err(DeliveryError::DeliveryFailed(
                result.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(result)
    }

    /// Iterates payloads sequentially, stopping at the first failure unless
    /// `bestEffort`. Each iteration checks `abortSignal` first; if fired, a
    /// single synthetic `"Aborted"` result is appended and iteration stops.
    pub async fn deliver_many(
        &self,
        target: &Target,
        payloads: &[OutboundPayload],
        opts: &DeliverOptions,
    ) -> Result<Vec<DeliveryResult>, DeliveryError> {
        let mut results = Vec::with_capacity(payloads.len());

        for payload in payloads {
            if opts.is_aborted() {
                results.push(DeliveryResult::aborted(&target.channel));
                return Ok(results);
            }

            match self.deliver_one(target, payload, opts).await {
                Ok(result) => {
                    let failed = !result.success;
                    results.push(result);
                    if failed && !opts.best_effort {
                        return Ok(results);
                    }
                }
                Err(err) => {
                    if opts.best_effort {
                        warn!(error = %err, "delivery failed in best-effort mode, continuing");
                        results.push(DeliveryResult::failed(&target.channel, err.to_string()));
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Ok(results)
    }

    /// Empty `payloads` yields `[]` without touching the registry.
    pub async fn deliver_outbound(
        &self,
        channel: &str,
        to: &str,
        payloads: &[OutboundPayload],
        best_effort: bool,
        abort_signal: Option<crate::types::AbortSignal>,
    ) -> Result<Vec<DeliveryResult>, DeliveryError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let target = Target::new(channel, to);
        let opts = DeliverOptions {
            best_effort,
            abort_signal,
        };
        self.deliver_many(&target, payloads, &opts).await
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use async_trait::async_trait;

    struct ScriptedChannel {
        id: String,
        calls: std::sync::Mutex<Vec<String>>,
        always_fail: bool,
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
            self.calls.lock().unwrap().push(payload.text.clone());
            if self.always_fail {
                DeliveryResult::failed(&self.id, "simulated failure")
            } else {
                DeliveryResult::ok(&self.id, Some(format!("m-{}-{}", chat_id, payload.text)))
            }
        }
    }

    fn registry_with(channel: Arc<dyn Channel>) -> Arc<ChannelRegistry> {
        let mut r = ChannelRegistry::new();
        r.register(channel);
        Arc::new(r)
    }

    #[tokio::test]
    async fn delivery_ordering_is_sequential() {
        let chan = Arc::new(ScriptedChannel {
            id: "dingtalk".to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
            always_fail: false,
        });
        let service = DeliveryService::new(registry_with(chan.clone()));
        let target = Target::new("dingtalk", "u1");
        let payloads = vec![
            OutboundPayload::text("p1"),
            OutboundPayload::text("p2"),
            OutboundPayload::text("p3"),
        ];
        let results = service
            .deliver_many(&target, &payloads, &DeliverOptions::best_effort())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(*chan.calls.lock().unwrap(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn abort_mid_batch_appends_single_aborted_result() {
        let chan = Arc::new(ScriptedChannel {
            id: "dingtalk".to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
            always_fail: false,
        });
        let service = DeliveryService::new(registry_with(chan));
        let target = Target::new("dingtalk", "u1");
        let payloads = vec![
            OutboundPayload::text("p1"),
            OutboundPayload::text("p2"),
            OutboundPayload::text("p3"),
        ];
        let signal = crate::types::AbortSignal::new();
        let opts = DeliverOptions {
            best_effort: true,
            abort_signal: Some(signal.clone()),
        };

        // Fire the signal after the first payload would have been sent.
        signal.fire();

        let results = service.deliver_many(&target, &payloads, &opts).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Aborted"));
    }

    #[tokio::test]
    async fn best_effort_all_failing_returns_full_length() {
        let chan = Arc::new(ScriptedChannel {
            id: "dingtalk".to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
            always_fail: true,
        });
        let service = DeliveryService::new(registry_with(chan));
        let target = Target::new("dingtalk", "u1");
        let payloads = vec![OutboundPayload::text("p1"), OutboundPayload::text("p2")];
        let results = service
            .deliver_many(&target, &payloads, &DeliverOptions::best_effort())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn stop_on_first_failure_without_best_effort() {
        let chan = Arc::new(ScriptedChannel {
            id: "dingtalk".to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
            always_fail: true,
        });
        let service = DeliveryService::new(registry_with(chan));
        let target = Target::new("dingtalk", "u1");
        let payloads = vec![OutboundPayload::text("p1"), OutboundPayload::text("p2")];
        let err = service
            .deliver_many(&target, &payloads, &DeliverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::DeliveryFailed(_)));
    }

    #[tokio::test]
    async fn empty_payloads_short_circuits() {
        let chan = Arc::new(ScriptedChannel {
            id: "dingtalk".to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
            always_fail: false,
        });
        let service = DeliveryService::new(registry_with(chan));
        let results = service
            .deliver_outbound("dingtalk", "u1", &[], true, None)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn parse_target_splits_on_first_colon() {
        let service = DeliveryService::new(Arc::new(ChannelRegistry::new()));
        let t = service.parse_target("dingtalk:u1:thread7", None).unwrap();
        assert_eq!(t.channel, "dingtalk");
        assert_eq!(t.to, "u1:thread7");
    }

    #[test]
    fn parse_target_last_sentinel_returns_none() {
        let service = DeliveryService::new(Arc::new(ChannelRegistry::new()));
        assert!(service.parse_target("last", Some("dingtalk")).is_none());
    }
}
