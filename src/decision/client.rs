//! Language-model transport (§6 External Interfaces). Two wire formats:
//! OpenAI-compatible chat completions and Anthropic messages.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

#[async_trait]
pub trait LmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f64, max_tokens: u32) -> anyhow::Result<String>;
}

/// `base_url` ending in `#` disables the `/chat/completions` suffix, letting
/// callers point at a full URL of their own (§6).
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self { client: Client::new(), base_url, api_key, model }
    }

    fn endpoint(&self) -> String {
        if let Some(stripped) = self.base_url.strip_suffix('#') {
            stripped.to_string()
        } else {
            format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl LmClient for OpenAiCompatibleClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f64, max_tokens: u32) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("lm call failed: {status} {text}");
        }

        let value: serde_json::Value = resp.json().await?;
        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| anyhow::anyhow!("lm response missing choices[0]"))?;

        if let Some(finish_reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            if finish_reason == "length" {
                eprintln!("{{\"domain\":\"decision\",\"level\":\"warn\",\"event\":\"lm_truncated\",\"finish_reason\":\"length\"}}");
            }
        }

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("lm response missing message.content"))?;

        Ok(content.to_string())
    }
}

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self { client: Client::new(), base_url, api_key, model }
    }
}

#[async_trait]
impl LmClient for AnthropicClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f64, max_tokens: u32) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "system": system_prompt,
            "messages": [
                {"role": "user", "content": user_prompt},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("lm call failed: {status} {text}");
        }

        let value: serde_json::Value = resp.json().await?;

        if let Some(stop_reason) = value.get("stop_reason").and_then(|v| v.as_str()) {
            if stop_reason == "max_tokens" {
                eprintln!("{{\"domain\":\"decision\",\"level\":\"warn\",\"event\":\"lm_truncated\",\"stop_reason\":\"max_tokens\"}}");
            }
        }

        let text = value
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|block| block.get("text"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("lm response missing content[0].text"))?;

        Ok(text.to_string())
    }
}

/// Lets callers pick a provider at runtime (§6) and hand the scheduler a
/// single concrete `C: LmClient` type param instead of one per provider.
#[async_trait]
impl LmClient for Box<dyn LmClient> {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f64, max_tokens: u32) -> anyhow::Result<String> {
        (**self).complete(system_prompt, user_prompt, temperature, max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_chat_completions_by_default() {
        let c = OpenAiCompatibleClient::new("https://api.example.com/v1".into(), "key".into(), "gpt".into());
        assert_eq!(c.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn trailing_hash_disables_suffix() {
        let c = OpenAiCompatibleClient::new("https://api.example.com/v1/custom#".into(), "key".into(), "gpt".into());
        assert_eq!(c.endpoint(), "https://api.example.com/v1/custom");
    }
}
