// Chat-completions translation client
// Any OpenAI-compatible endpoint; the whole batch goes out as one JSON array

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::Translator;
use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::language::language_name;

const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 8000;
const MAX_JITTER_MS: u64 = 250;

const SYSTEM_PROMPT: &str = "You are a translation engine. Output JSON only. No markdown.";

/// Upper bound on the time spent sleeping between `max_retries` retries
pub fn max_backoff(max_retries: u32) -> Duration {
    let mut delay_ms = INITIAL_RETRY_DELAY_MS;
    let mut total_ms = 0;
    for _ in 0..max_retries {
        total_ms += delay_ms + MAX_JITTER_MS;
        delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
    }
    Duration::from_millis(total_ms)
}

/// Primary translation provider
pub struct ApiClient {
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    /// Legacy completions shape
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ApiClient {
    pub fn new(
        url: String,
        api_key: String,
        model: String,
        timeout: Duration,
        max_retries: u32,
    ) -> TranslationResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url,
            api_key,
            model,
            max_retries,
            http_client,
        })
    }

    /// Build from config; `NotConfigured` when the endpoint or key is missing
    pub fn from_config(config: &TranslationConfig) -> TranslationResult<Self> {
        let (Some(url), Some(api_key)) = (config.ai_url.clone(), config.ai_api_key.clone()) else {
            return Err(TranslationError::NotConfigured("ai"));
        };
        Self::new(
            url,
            api_key,
            config.ai_model.clone(),
            Duration::from_millis(config.ai_timeout_ms),
            config.max_retries,
        )
    }

    async fn send_with_retries(&self, request: &ChatCompletionRequest<'_>) -> TranslationResult<String> {
        let mut retry_delay_ms = INITIAL_RETRY_DELAY_MS;
        let mut attempt = 0;

        loop {
            let last_attempt = attempt >= self.max_retries;
            let failure = match self
                .http_client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let err = TranslationError::Status {
                        status: status.as_u16(),
                        body: truncate(&body, 300),
                    };
                    if !is_retryable_status(status.as_u16()) {
                        return Err(err);
                    }
                    err
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect()) {
                        return Err(e.into());
                    }
                    e.into()
                }
            };

            if last_attempt {
                return Err(failure);
            }

            // Exponential backoff with jitter, capped
            let jitter = rand::random::<u64>() % MAX_JITTER_MS;
            warn!(
                "AI translation attempt {} failed: {}. Retrying in {}ms",
                attempt + 1,
                failure,
                retry_delay_ms + jitter
            );
            tokio::time::sleep(Duration::from_millis(retry_delay_ms + jitter)).await;
            retry_delay_ms = (retry_delay_ms * 2).min(MAX_RETRY_DELAY_MS);
            attempt += 1;
        }
    }
}

#[async_trait]
impl Translator for ApiClient {
    fn name(&self) -> &'static str {
        "ai"
    }

    #[instrument(skip(self, texts), fields(model = %self.model, count = texts.len()))]
    async fn translate(&self, texts: &[String], target_lang: &str) -> TranslationResult<Vec<String>> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_prompt(texts, target_lang),
                },
            ],
            temperature: 0.0,
        };

        let body = self.send_with_retries(&request).await?;
        let translations = parse_completion(&body, texts.len())?;

        info!(
            "AI: translated {} texts to {} in {:.2}s",
            texts.len(),
            target_lang,
            start.elapsed().as_secs_f64()
        );
        Ok(translations)
    }
}

/// User prompt asking for a same-length, same-order JSON array
pub fn build_user_prompt(texts: &[String], target_lang: &str) -> String {
    let clean: Vec<String> = texts
        .iter()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let input = serde_json::to_string(&clean).unwrap_or_else(|_| "[]".to_string());

    [
        format!(
            "Translate each input string to {} (language code: {}).",
            language_name(target_lang),
            target_lang
        ),
        "Return ONLY a valid JSON array of strings.".to_string(),
        "Same length and same order as input. No extra keys. No commentary.".to_string(),
        input,
    ]
    .join("\n")
}

/// Extract the translated array from a chat-completions response body
pub fn parse_completion(body: &str, expected: usize) -> TranslationResult<Vec<String>> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| TranslationError::InvalidResponse(format!("not a completion: {}", e)))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.and_then(|m| m.content).or(c.text))
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| TranslationError::InvalidResponse("missing content".to_string()))?;

    let items: Vec<serde_json::Value> = serde_json::from_str(strip_code_fences(&content))
        .map_err(|e| {
            TranslationError::InvalidResponse(format!("content is not a JSON array: {}", e))
        })?;

    if items.len() != expected {
        return Err(TranslationError::LengthMismatch {
            expected,
            actual: items.len(),
        });
    }

    debug!("AI: parsed {} translations", items.len());
    Ok(items
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

/// Drop a surrounding ``` / ```json fence if the model added one anyway
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Skip the language tag on the opening fence
    match rest.find('\n') {
        Some(idx) if !rest[..idx].trim_start().starts_with('[') => rest[idx + 1..].trim(),
        _ => rest.trim(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[test]
    fn test_max_backoff_caps_each_delay() {
        assert_eq!(max_backoff(0), Duration::ZERO);
        assert_eq!(max_backoff(1), Duration::from_millis(750));
        assert_eq!(max_backoff(3), Duration::from_millis(500 + 1000 + 2000 + 3 * 250));
        // 500, 1000, 2000, 4000, then capped at 8000
        assert_eq!(
            max_backoff(6),
            Duration::from_millis(500 + 1000 + 2000 + 4000 + 8000 + 8000 + 6 * 250)
        );
    }

    #[test]
    fn test_parse_completion() {
        let body = completion(r#"["Hola mundo", "Buenos días"]"#);
        assert_eq!(
            parse_completion(&body, 2).unwrap(),
            vec!["Hola mundo".to_string(), "Buenos días".to_string()]
        );
    }

    #[test]
    fn test_parse_completion_legacy_text_and_fences() {
        let body = serde_json::json!({
            "choices": [{"text": "```json\n[\"Bonjour\"]\n```"}]
        })
        .to_string();
        assert_eq!(parse_completion(&body, 1).unwrap(), vec!["Bonjour".to_string()]);
    }

    #[test]
    fn test_parse_completion_stringifies_non_strings() {
        let body = completion(r#"["uno", 2, null, true]"#);
        assert_eq!(
            parse_completion(&body, 4).unwrap(),
            vec!["uno".to_string(), "2".to_string(), String::new(), "true".to_string()]
        );
    }

    #[test]
    fn test_parse_completion_length_mismatch() {
        let body = completion(r#"["only one"]"#);
        assert!(matches!(
            parse_completion(&body, 2),
            Err(TranslationError::LengthMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_parse_completion_rejects_prose() {
        let body = completion("Sure! Here are your translations.");
        assert!(matches!(
            parse_completion(&body, 1),
            Err(TranslationError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#, 1),
            Err(TranslationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_user_prompt() {
        let texts = vec!["Hello   world".to_string(), "Bye".to_string()];
        let prompt = build_user_prompt(&texts, "es");
        let lines: Vec<&str> = prompt.lines().collect();
        assert_eq!(lines[0], "Translate each input string to Spanish (language code: es).");
        assert_eq!(lines[3], r#"["Hello world","Bye"]"#);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("[\"a\"]"), "[\"a\"]");
        assert_eq!(strip_code_fences("```\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_code_fences("```[\"a\"]```"), "[\"a\"]");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn test_not_configured() {
        let config = TranslationConfig::default();
        assert!(matches!(
            ApiClient::from_config(&config),
            Err(TranslationError::NotConfigured("ai"))
        ));
    }
}
