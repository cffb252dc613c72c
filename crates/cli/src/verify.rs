use anyhow::Result;
use reqwest::Client;
use serde_json::json;

/// Verify an LLM provider API key by making a minimal chat completion request.
pub async fn verify_api_key(provider: &str, api_key: &str, api_base: Option<&str>) -> Result<String> {
    let client = Client::new();

    let (url, headers, body) = match provider {
        "openai" => {
            let base = api_base.unwrap_or("https://api.openai.com/v1");
            let url = format!("{}/chat/completions", base);
            let body = json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "Say 'ok' in one word"}],
                "max_tokens": 5
            });
            (url, vec![("Authorization", format!("Bearer {}", api_key))], body)
        }
        "anthropic" => {
            let url = "https://api.anthropic.com/v1/messages".to_string();
            let body = json!({
                "model": "claude-3-haiku-20240307",
                "max_tokens": 5,
                "messages": [{"role": "user", "content": "Say 'ok' in one word"}]
            });
            (
                url,
                vec![
                    ("x-api-key", api_key.to_string()),
                    ("anthropic-version", "2023-06-01".to_string()),
                ],
                body,
            )
        }
        _ => {
            return Err(anyhow::anyhow!("Unknown provider: {}", provider));
        }
    };

    let mut req = client.post(&url).json(&body);
    for (key, value) in &headers {
        req = req.header(*key, value);
    }

    let res = req.send().await?;
    let status = res.status();

    if status.is_success() {
        Ok(format!("{} API key is valid (HTTP {})", provider, status))
    } else {
        let body = res.text().await.unwrap_or_default();
        Err(anyhow::anyhow!(
            "{} API key verification failed (HTTP {}): {}",
            provider,
            status,
            &body[..body.len().min(200)]
        ))
    }
}
