// Google "gtx" fallback translator
// Unofficial keyless endpoint, one GET per text; best effort by nature

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::Translator;
use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};

pub struct GoogleTranslator {
    base_url: String,
    per_text_timeout: Duration,
    http_client: reqwest::Client,
}

impl GoogleTranslator {
    pub fn new(base_url: impl Into<String>, per_text_timeout: Duration) -> TranslationResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(per_text_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            per_text_timeout,
            http_client,
        })
    }

    pub fn from_config(config: &TranslationConfig) -> TranslationResult<Self> {
        Self::new(
            config.fallback_url.clone(),
            Duration::from_millis(config.fallback_timeout_ms),
        )
    }

    fn request_url(&self, text: &str, target_lang: &str) -> String {
        format!(
            "{}?client=gtx&sl=auto&tl={}&dt=t&q={}",
            self.base_url,
            urlencoding::encode(target_lang),
            urlencoding::encode(text)
        )
    }

    async fn translate_one(&self, text: &str, target_lang: &str) -> TranslationResult<String> {
        let response = self
            .http_client
            .get(self.request_url(text, target_lang))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let payload: serde_json::Value = response.json().await?;
        parse_gtx_response(&payload)
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    fn name(&self) -> &'static str {
        "google"
    }

    /// Always returns one entry per input; a text that fails keeps its source
    async fn translate(&self, texts: &[String], target_lang: &str) -> TranslationResult<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                out.push(String::new());
                continue;
            }
            let attempt = tokio::time::timeout(self.per_text_timeout, self.translate_one(text, target_lang))
                .await
                .unwrap_or_else(|_| Err(TranslationError::Timeout(self.per_text_timeout.as_millis() as u64)));
            match attempt {
                Ok(translated) => out.push(translated),
                Err(e) => {
                    warn!("Google: text {} kept untranslated: {}", i, e);
                    out.push(text.clone());
                }
            }
        }
        debug!("Google: translated {} texts to {}", texts.len(), target_lang);
        Ok(out)
    }
}

/// Join the translated segments at `payload[0][i][0]`
pub fn parse_gtx_response(payload: &serde_json::Value) -> TranslationResult<String> {
    let segments = payload
        .get(0)
        .and_then(|v| v.as_array())
        .ok_or_else(|| TranslationError::InvalidResponse("missing segment list".to_string()))?;

    Ok(segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(|s| s.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    /// gtx lookalike that prefixes the text and never answers for "slow"
    async fn serve() -> String {
        let app = Router::new().route(
            "/translate_a/single",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let q = params.get("q").cloned().unwrap_or_default();
                if q == "slow" {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                let tl = params.get("tl").cloned().unwrap_or_default();
                Json(json!([[[format!("{}:{}", tl, q), q, null, null, 10]], null, "en"]))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/translate_a/single", addr)
    }

    #[test]
    fn test_parse_gtx_response_joins_segments() {
        let payload = json!([
            [["Hola mundo. ", "Hello world. ", null, null, 10], ["¿Cómo estás?", "How are you?", null, null, 10]],
            null,
            "en"
        ]);
        assert_eq!(parse_gtx_response(&payload).unwrap(), "Hola mundo. ¿Cómo estás?");
    }

    #[test]
    fn test_parse_gtx_response_rejects_unexpected_shape() {
        assert!(parse_gtx_response(&json!({"error": "nope"})).is_err());
        assert!(parse_gtx_response(&json!([null])).is_err());
    }

    #[test]
    fn test_request_url_encodes_text() {
        let google = GoogleTranslator::new("https://example.test/translate_a/single", Duration::from_secs(1)).unwrap();
        assert_eq!(
            google.request_url("Hi & bye?", "pt"),
            "https://example.test/translate_a/single?client=gtx&sl=auto&tl=pt&dt=t&q=Hi%20%26%20bye%3F"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_keeps_source() {
        // Port 9 on localhost: connection refused, no network needed
        let google = GoogleTranslator::new("http://127.0.0.1:9/translate_a/single", Duration::from_millis(500)).unwrap();
        let texts = vec!["Hello".to_string(), "  ".to_string(), "World".to_string()];
        let out = google.translate(&texts, "es").await.unwrap();
        assert_eq!(out, vec!["Hello".to_string(), String::new(), "World".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_text_times_out_alone() {
        let google = GoogleTranslator::new(serve().await, Duration::from_millis(300)).unwrap();
        let texts = vec!["Hello".to_string(), "slow".to_string(), "World".to_string()];
        let out = google.translate(&texts, "es").await.unwrap();
        assert_eq!(out, vec!["es:Hello".to_string(), "slow".to_string(), "es:World".to_string()]);
    }
}
