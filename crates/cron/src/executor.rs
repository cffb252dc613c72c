use crate::types::{Job, Payload, RunStatus};
use async_trait::async_trait;
use mozi_delivery::{DeliveryService, OutboundPayload};
use std::sync::Arc;
use tracing::{info, warn};

/// Request shape handed to the model-turn callback (spec §6).
#[derive(Debug, Clone)]
pub struct AgentTurnRequest {
    pub message: String,
    pub session_key: String,
    pub model: Option<String>,
    pub timeout_seconds: Option<u32>,
}

/// Response shape returned by the model-turn callback.
#[derive(Debug, Clone)]
pub struct AgentTurnResponse {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

/// The external model-turn callback, supplied once at executor construction.
/// A callback returning `Err` is treated the same as `success:false` — the
/// executor records the error and skips delivery.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: AgentTurnRequest) -> anyhow::Result<AgentTurnResponse>;
}

#[derive(Debug, Clone)]
pub struct JobExecution {
    pub status: RunStatus,
    pub summary: Option<String>,
    pub output_text: Option<String>,
    pub error: Option<String>,
}

impl JobExecution {
    fn ok(summary: impl Into<String>, output_text: Option<String>) -> Self {
        Self {
            status: RunStatus::Ok,
            summary: Some(summary.into()),
            output_text,
            error: None,
        }
    }

    fn error(error: impl Into<String>, output_text: Option<String>) -> Self {
        Self {
            status: RunStatus::Error,
            summary: None,
            output_text,
            error: Some(error.into()),
        }
    }

    fn skipped(summary: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Skipped,
            summary: Some(summary.into()),
            output_text: None,
            error: None,
        }
    }
}

/// Runs a single job's payload: dispatches on payload kind to either a
/// no-op event log or the agent-turn callback, then hands successful output
/// to delivery (spec §4.F).
pub struct Executor {
    agent_executor: Option<Arc<dyn AgentExecutor>>,
    delivery: Arc<DeliveryService>,
}

impl Executor {
    pub fn new(agent_executor: Option<Arc<dyn AgentExecutor>>, delivery: Arc<DeliveryService>) -> Self {
        Self {
            agent_executor,
            delivery,
        }
    }

    pub async fn execute_job(&self, job: &Job) -> JobExecution {
        match &job.payload {
            Payload::SystemEvent { message } => {
                info!(job_id = %job.id, %message, "system event executed");
                JobExecution::ok("System event executed", None)
            }
            Payload::AgentTurn {
                message,
                model,
                timeout_seconds,
                deliver,
                channel,
                to,
            } => {
                self.execute_agent_turn(
                    job,
                    message,
                    model.as_deref(),
                    *timeout_seconds,
                    deliver.unwrap_or(false),
                    channel.as_deref(),
                    to.as_deref(),
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_agent_turn(
        &self,
        job: &Job,
        message: &str,
        model: Option<&str>,
        timeout_seconds: Option<u32>,
        deliver: bool,
        channel: Option<&str>,
        to: Option<&str>,
    ) -> JobExecution {
        let Some(agent_executor) = &self.agent_executor else {
            return JobExecution::skipped("No agent executor configured");
        };

        let request = AgentTurnRequest {
            message: message.to_string(),
            session_key: format!("cron:{}", job.id),
            model: model.map(str::to_string),
            timeout_seconds,
        };

        let response = match agent_executor.execute(request).await {
            Ok(response) => response,
            Err(e) => return JobExecution::error(e.to_string(), None),
        };

        if !response.success {
            return JobExecution::error(
                response.error.unwrap_or_else(|| "agent turn failed".to_string()),
                Some(response.output),
            );
        }

        if deliver {
            if let Some(to) = to {
                self.attempt_delivery(channel, to, &response.output).await;
            }
        }

        let summary: String = response.output.chars().take(200).collect();
        JobExecution::ok(summary, Some(response.output))
    }

    async fn attempt_delivery(&self, channel: Option<&str>, to: &str, output: &str) {
        let requested = channel.unwrap_or(mozi_core::channel::CHANNEL_LAST);
        let registry = self.delivery.registry();
        let Some(resolved) = registry.resolve_channel_id(requested) else {
            warn!(channel = requested, "cron delivery skipped: channel unresolved");
            return;
        };
        if !registry.is_available(&resolved) {
            warn!(channel = %resolved, "cron delivery skipped: channel unavailable");
            return;
        }

        let payload = OutboundPayload::text(output);
        if let Err(e) = self
            .delivery
            .deliver_outbound(&resolved, to, std::slice::from_ref(&payload), true, None)
            .await
        {
            warn!(error = %e, "cron delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobState, Schedule};
    use async_trait::async_trait;
    use mozi_delivery::{Channel, ChannelRegistry, DeliveryResult};
    use std::sync::Mutex;

    fn job_with_payload(payload: Payload) -> Job {
        Job {
            id: "j1".to_string(),
            name: "job".to_string(),
            enabled: true,
            schedule: Schedule::Every { every_ms: 60_000 },
            payload,
            created_at_ms: 0,
            updated_at_ms: 0,
            state: JobState::default(),
        }
    }

    struct StubAgent {
        response: anyhow::Result<AgentTurnResponse>,
    }

    #[async_trait]
    impl AgentExecutor for StubAgent {
        async fn execute(&self, _request: AgentTurnRequest) -> anyhow::Result<AgentTurnResponse> {
            match &self.response {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(anyhow::anyhow!(e.to_string())),
            }
        }
    }

    struct RecordingChannel {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn id(&self) -> &str {
            "dingtalk"
        }

        async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
            self.calls
                .lock()
                .unwrap()
                .push((chat_id.to_string(), payload.text.clone()));
            DeliveryResult::ok("dingtalk", Some("m-42".to_string()))
        }
    }

    fn delivery_with(channel: Arc<RecordingChannel>) -> Arc<DeliveryService> {
        let mut registry = ChannelRegistry::new();
        registry.register(channel);
        Arc::new(DeliveryService::new(Arc::new(registry)))
    }

    #[tokio::test]
    async fn system_event_is_side_effect_free() {
        let job = job_with_payload(Payload::SystemEvent {
            message: "hello".to_string(),
        });
        let channel = Arc::new(RecordingChannel {
            calls: Mutex::new(Vec::new()),
        });
        let executor = Executor::new(None, delivery_with(channel.clone()));
        let result = executor.execute_job(&job).await;
        assert_eq!(result.status, RunStatus::Ok);
        assert!(channel.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn agent_turn_without_executor_is_skipped() {
        let job = job_with_payload(Payload::AgentTurn {
            message: "hi".to_string(),
            model: None,
            timeout_seconds: None,
            deliver: Some(false),
            channel: None,
            to: None,
        });
        let channel = Arc::new(RecordingChannel {
            calls: Mutex::new(Vec::new()),
        });
        let executor = Executor::new(None, delivery_with(channel));
        let result = executor.execute_job(&job).await;
        assert_eq!(result.status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn successful_agent_turn_delivers_output() {
        let job = job_with_payload(Payload::AgentTurn {
            message: "weather?".to_string(),
            model: None,
            timeout_seconds: None,
            deliver: Some(true),
            channel: Some("dingtalk".to_string()),
            to: Some("u1".to_string()),
        });
        let channel = Arc::new(RecordingChannel {
            calls: Mutex::new(Vec::new()),
        });
        let agent = Arc::new(StubAgent {
            response: Ok(AgentTurnResponse {
                success: true,
                output: "The weather is sunny today!".to_string(),
                error: None,
            }),
        });
        let executor = Executor::new(Some(agent), delivery_with(channel.clone()));
        let result = executor.execute_job(&job).await;
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.output_text.as_deref(), Some("The weather is sunny today!"));
        let calls = channel.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("u1".to_string(), "The weather is sunny today!".to_string()));
    }

    #[tokio::test]
    async fn agent_failure_suppresses_delivery() {
        let job = job_with_payload(Payload::AgentTurn {
            message: "weather?".to_string(),
            model: None,
            timeout_seconds: None,
            deliver: Some(true),
            channel: Some("dingtalk".to_string()),
            to: Some("u1".to_string()),
        });
        let channel = Arc::new(RecordingChannel {
            calls: Mutex::new(Vec::new()),
        });
        let agent = Arc::new(StubAgent {
            response: Ok(AgentTurnResponse {
                success: false,
                output: String::new(),
                error: Some("Model unavailable".to_string()),
            }),
        });
        let executor = Executor::new(Some(agent), delivery_with(channel.clone()));
        let result = executor.execute_job(&job).await;
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.error.as_deref(), Some("Model unavailable"));
        assert!(channel.calls.lock().unwrap().is_empty());
    }
}
