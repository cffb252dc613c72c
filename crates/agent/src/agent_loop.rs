use crate::context::ContextBuilder;
use crate::session::SessionManager;
use async_trait::async_trait;
use mozi_core::config::AppConfig;
use mozi_cron::{AgentExecutor, AgentTurnRequest, AgentTurnResponse};
use mozi_providers::{GenerationOptions, LLMProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Number of LLM retry attempts on transient provider errors.
const LLM_RETRIES: usize = 3;

/// Single-turn model runner implementing the `agentExecutor` contract a
/// `mozi_cron::Executor` calls out to: one message in, one reply out, no
/// tool-calling loop. Conversation history for the job's session is read
/// back and appended to before the call, then the turn is recorded.
pub struct AgentRunner {
    config: AppConfig,
    provider: Arc<dyn LLMProvider>,
    context_builder: ContextBuilder,
    sessions: SessionManager,
}

impl AgentRunner {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn LLMProvider>,
        context_builder: ContextBuilder,
        sessions: SessionManager,
    ) -> Self {
        Self {
            config,
            provider,
            context_builder,
            sessions,
        }
    }

    async fn call_llm_with_retry(
        &self,
        request: &AgentTurnRequest,
        options: &GenerationOptions,
    ) -> Result<mozi_providers::GenerationResponse, String> {
        let history = self
            .sessions
            .history(&request.session_key)
            .await
            .unwrap_or_default();
        let messages = self.context_builder.build(&history, &request.message);

        let mut last_error = String::new();
        for attempt in 0..LLM_RETRIES {
            match self.provider.chat(&messages, &[], options).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < LLM_RETRIES - 1 {
                        let delay = Duration::from_millis(1000 * (1 << attempt));
                        warn!(
                            attempt = attempt + 1,
                            max = LLM_RETRIES,
                            delay_ms = delay.as_millis() as u64,
                            "LLM call failed, retrying: {}",
                            last_error
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl AgentExecutor for AgentRunner {
    async fn execute(&self, request: AgentTurnRequest) -> anyhow::Result<AgentTurnResponse> {
        info!(session = %request.session_key, "running cron agent turn");

        let options = GenerationOptions {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.agents.default.model.clone()),
            max_tokens: Some(self.config.agents.default.max_tokens),
            temperature: Some(self.config.agents.default.temperature),
        };

        let timeout = Duration::from_secs(request.timeout_seconds.unwrap_or(60) as u64);
        let call = self.call_llm_with_retry(&request, &options);

        let response = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!(session = %request.session_key, "provider call failed: {}", e);
                return Ok(AgentTurnResponse {
                    success: false,
                    output: String::new(),
                    error: Some(e),
                });
            }
            Err(_) => {
                warn!(session = %request.session_key, "agent turn timed out");
                return Ok(AgentTurnResponse {
                    success: false,
                    output: String::new(),
                    error: Some(format!("agent turn timed out after {}s", timeout.as_secs())),
                });
            }
        };

        if let Err(e) = self
            .sessions
            .record_turn(&request.session_key, &request.message, &response.content)
            .await
        {
            warn!(session = %request.session_key, "failed to persist cron turn: {}", e);
        }

        Ok(AgentTurnResponse {
            success: true,
            output: response.content,
            error: None,
        })
    }
}
