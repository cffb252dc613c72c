use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAIProvider;
use crate::LLMProvider;
use mozi_core::config::AppConfig;
use std::sync::Arc;

/// Create the appropriate LLM provider based on the application config.
/// Checks providers in order: OpenAI-compatible → Anthropic.
pub fn create_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn LLMProvider>> {
    if let Some(openai_cfg) = &config.providers.openai {
        Ok(Arc::new(OpenAIProvider::new(
            openai_cfg.api_key.clone(),
            openai_cfg.api_base.clone(),
        )))
    } else if let Some(anthropic_cfg) = &config.providers.anthropic {
        Ok(Arc::new(AnthropicProvider::new(
            anthropic_cfg.api_key.clone(),
        )))
    } else {
        anyhow::bail!("No LLM provider configured. Set providers.openai or providers.anthropic.");
    }
}
