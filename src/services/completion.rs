//! OpenRouter chat-completions client
//!
//! Production [`CompletionService`]. Single request/response, automatic
//! retry with exponential backoff on rate limits.

use super::CompletionService;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;

const SYSTEM_PROMPT: &str =
    "You are an automated remediation engineer. Follow the output format in the request exactly.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

pub struct OpenRouterCompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenRouterCompletion {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model,
            max_tokens: 8192,
        })
    }
}

/// Extract a retry-after hint from a rate-limit response body, if present.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    for word in text_lower[pos..].split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word
            .trim_matches(|c: char| !c.is_numeric())
            .parse::<u64>()
        {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

#[async_trait]
impl CompletionService for OpenRouterCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut retry_count = 0;
        loop {
            let response = self
                .client
                .post(OPENROUTER_URL)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!("failed to parse completion response: {}", e)
                })?;
                let content = parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(anyhow::anyhow!("completion response was empty"));
                }
                return Ok(content);
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = parse_retry_after(&text)
                    .unwrap_or(INITIAL_BACKOFF_SECS << (retry_count - 1));
                warn!(wait, attempt = retry_count, "completion service rate limited");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            return Err(anyhow::anyhow!(
                "completion service error {}: {}",
                status,
                crate::util::truncate(&text, 200)
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_extracts_seconds() {
        assert_eq!(parse_retry_after("please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("Retry in 5s"), Some(5));
    }

    #[test]
    fn test_parse_retry_after_rejects_nonsense() {
        assert_eq!(parse_retry_after("no hint here"), None);
        assert_eq!(parse_retry_after("retry after 9000 seconds"), None);
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "test-model".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 16,
            stream: false,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"test-model\""));
        assert!(json.contains("\"stream\":false"));
    }
}
