//! LLM text completion providers.
//!
//! Modeled as an enum over Gemini, OpenAI-compatible, and Disabled. Every
//! call is wrapped in a hard timeout; callers treat any error as a signal to
//! degrade to their pre-LLM result, never as a request failure.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::config::LlmConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub enum LlmProvider {
    Gemini {
        client: reqwest::Client,
        api_key: String,
        model: String,
        timeout: Duration,
    },
    OpenAi {
        client: reqwest::Client,
        api_key: String,
        model: String,
        timeout: Duration,
    },
    Disabled,
}

impl LlmProvider {
    /// Build from config. Any LLM-dependent feature (rerank, rewrite,
    /// summarize) needs a provider; missing keys disable it with a warning.
    pub fn from_config(config: &LlmConfig, client: &reqwest::Client) -> Self {
        let wants_llm = config.enabled || config.enable_rewrite || config.summarize_on_index;
        if !wants_llm {
            return LlmProvider::Disabled;
        }

        let Some(api_key) = config.api_key.clone().filter(|key| !key.is_empty()) else {
            tracing::warn!("LLM features requested but LLM_API_KEY is not set; LLM disabled");
            return LlmProvider::Disabled;
        };

        let timeout = Duration::from_millis(config.timeout_ms);
        match config.provider.as_str() {
            "gemini" => LlmProvider::Gemini {
                client: client.clone(),
                api_key,
                model: config.model.clone(),
                timeout,
            },
            "openai" => LlmProvider::OpenAi {
                client: client.clone(),
                api_key,
                model: config.model.clone(),
                timeout,
            },
            other => {
                tracing::warn!("Unknown LLM provider {other:?}; LLM disabled");
                LlmProvider::Disabled
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, LlmProvider::Disabled)
    }

    pub fn default_model(&self) -> Option<&str> {
        match self {
            LlmProvider::Gemini { model, .. } | LlmProvider::OpenAi { model, .. } => Some(model),
            LlmProvider::Disabled => None,
        }
    }

    /// One prompt in, plain text out, bounded by the hard per-call timeout.
    /// Returns the latency alongside the text.
    pub async fn complete_text(
        &self,
        prompt: &str,
        model_override: Option<&str>,
    ) -> Result<(String, u64)> {
        let started = std::time::Instant::now();
        let raw = match self {
            LlmProvider::Disabled => anyhow::bail!("LLM provider is disabled"),
            LlmProvider::Gemini {
                client,
                api_key,
                model,
                timeout,
            } => {
                let model = model_override.unwrap_or(model.as_str());
                tokio::time::timeout(*timeout, call_gemini(client, api_key, model, prompt))
                    .await
                    .context("LLM call timed out")??
            }
            LlmProvider::OpenAi {
                client,
                api_key,
                model,
                timeout,
            } => {
                let model = model_override.unwrap_or(model.as_str());
                tokio::time::timeout(*timeout, call_openai(client, api_key, model, prompt))
                    .await
                    .context("LLM call timed out")??
            }
        };

        let text = strip_code_fences(&raw);
        if text.is_empty() {
            anyhow::bail!("LLM response was empty");
        }
        Ok((text, started.elapsed().as_millis() as u64))
    }
}

async fn call_gemini(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> Result<String> {
    let url = format!("{GEMINI_BASE_URL}/models/{model}:generateContent");
    let body = json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": { "temperature": 0.1, "maxOutputTokens": 512 },
    });

    let resp = client
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await
        .context("Failed to call Gemini API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Gemini API returned {status}: {body}");
    }

    let body: GeminiResponse = resp.json().await.context("Failed to parse Gemini response")?;
    let text = body
        .candidates
        .into_iter()
        .flat_map(|candidate| candidate.content.parts)
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        anyhow::bail!("Gemini response did not include text");
    }
    Ok(text)
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

async fn call_openai(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> Result<String> {
    let url = format!("{OPENAI_BASE_URL}/v1/chat/completions");
    let req = OpenAiChatRequest {
        model: model.to_string(),
        messages: vec![OpenAiMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }],
        temperature: 0.1,
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI chat response")?;
    body.choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .context("OpenAI response had no choices")
}

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

/// Strip a wrapping markdown fence and trailing per-line whitespace.
fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() >= 3 && lines[lines.len() - 1].starts_with("```") {
            return lines[1..lines.len() - 1]
                .iter()
                .map(|line| line.trim_end())
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
        }
        text = text.trim_start_matches('`');
    }
    text.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            enabled,
            api_key: api_key.map(str::to_string),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_disabled_without_features() {
        let provider = LlmProvider::from_config(&config(false, Some("key")), &reqwest::Client::new());
        assert!(!provider.is_enabled());
    }

    #[test]
    fn test_disabled_without_api_key() {
        let provider = LlmProvider::from_config(&config(true, None), &reqwest::Client::new());
        assert!(!provider.is_enabled());
    }

    #[test]
    fn test_enabled_with_key() {
        let provider = LlmProvider::from_config(&config(true, Some("key")), &reqwest::Client::new());
        assert!(provider.is_enabled());
        assert_eq!(provider.default_model(), Some("gemini-2.5-flash"));
    }

    #[tokio::test]
    async fn test_disabled_complete_text_errors() {
        let result = LlmProvider::Disabled.complete_text("prompt", None).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_strip_code_fences() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn test_gemini_response_parsing() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(
            parsed.candidates[0].content.parts[0].text.as_deref(),
            Some("hello")
        );
    }
}
