// Translation Service Module
// Batch translation through a primary provider with a fallback behind it

pub mod api_client;
pub mod google;

pub use api_client::ApiClient;
pub use google::GoogleTranslator;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::TranslationOutcome;
use crate::middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::utils::Metrics;

/// External batch translator: same length and order out as in
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn translate(&self, texts: &[String], target_lang: &str) -> TranslationResult<Vec<String>>;
}

/// Primary provider, then fallback, then the source text.
///
/// Never fails: every path yields exactly one string per input.
pub struct TranslationChain {
    primary: Option<Arc<dyn Translator>>,
    fallback: Option<Arc<dyn Translator>>,
    breaker: CircuitBreaker,
    primary_timeout: Duration,
    fallback_timeout_per_text: Duration,
    metrics: Option<Metrics>,
}

impl TranslationChain {
    pub fn new(
        primary: Option<Arc<dyn Translator>>,
        fallback: Option<Arc<dyn Translator>>,
        config: &TranslationConfig,
    ) -> Self {
        // Every attempt plus the backoff sleeps between them
        let primary_timeout = Duration::from_millis(config.ai_timeout_ms) * (config.max_retries + 1)
            + api_client::max_backoff(config.max_retries);

        Self {
            primary,
            fallback,
            breaker: CircuitBreaker::new("ai", CircuitBreakerConfig::from(config)),
            primary_timeout,
            fallback_timeout_per_text: Duration::from_millis(config.fallback_timeout_ms),
            metrics: None,
        }
    }

    /// Wire up the configured providers: the AI client when its endpoint and
    /// key are set, Google gtx unless disabled
    pub fn from_config(config: &TranslationConfig) -> TranslationResult<Self> {
        let primary: Option<Arc<dyn Translator>> = match ApiClient::from_config(config) {
            Ok(client) => Some(Arc::new(client)),
            Err(TranslationError::NotConfigured(_)) => {
                info!("AI translation not configured, using fallback provider only");
                None
            }
            Err(e) => return Err(e),
        };
        let fallback: Option<Arc<dyn Translator>> = if config.fallback_enabled {
            Some(Arc::new(GoogleTranslator::from_config(config)?))
        } else {
            None
        };
        Ok(Self::new(primary, fallback, config))
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// Translate `texts` into `target_lang`.
    ///
    /// Empty source strings always map to empty translations, so bubbles
    /// whose OCR failed stay textless whatever a provider returns.
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> (Vec<String>, TranslationOutcome) {
        let start = Instant::now();

        if texts.iter().all(|t| t.trim().is_empty()) {
            return (vec![String::new(); texts.len()], TranslationOutcome::Empty);
        }

        let (mut translated, outcome) = self.run_providers(texts, target_lang).await;

        for (out, src) in translated.iter_mut().zip(texts) {
            if src.trim().is_empty() {
                out.clear();
            }
        }

        if let Some(ref m) = self.metrics {
            m.record_translation(outcome, start.elapsed());
        }
        debug!("Translation outcome {:?} in {:?}", outcome, start.elapsed());
        (translated, outcome)
    }

    async fn run_providers(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> (Vec<String>, TranslationOutcome) {
        if let Some(primary) = &self.primary {
            if self.breaker.allow_request() {
                match self.call(primary.as_ref(), texts, target_lang, self.primary_timeout).await {
                    Ok(out) => {
                        self.breaker.record_success();
                        return (out, TranslationOutcome::Primary);
                    }
                    Err(e) => {
                        warn!("Primary translator '{}' failed: {}", primary.name(), e);
                        if self.breaker.record_failure() {
                            if let Some(ref m) = self.metrics {
                                m.record_circuit_breaker_trip();
                            }
                        }
                    }
                }
            } else {
                debug!("Circuit open for '{}', skipping to fallback", primary.name());
            }
        }

        if let Some(fallback) = &self.fallback {
            // Providers bound each text themselves; one extra slot absorbs overhead
            let budget = self.fallback_timeout_per_text * (texts.len() as u32 + 1);
            match self.call(fallback.as_ref(), texts, target_lang, budget).await {
                Ok(out) => return (out, TranslationOutcome::Fallback),
                Err(e) => warn!("Fallback translator '{}' failed: {}", fallback.name(), e),
            }
        }

        warn!("No translation available, rendering {} source texts", texts.len());
        (texts.to_vec(), TranslationOutcome::Untranslated)
    }

    /// One provider call under a timeout, with the length contract enforced
    async fn call(
        &self,
        translator: &dyn Translator,
        texts: &[String],
        target_lang: &str,
        budget: Duration,
    ) -> TranslationResult<Vec<String>> {
        let out = tokio::time::timeout(budget, translator.translate(texts, target_lang))
            .await
            .map_err(|_| TranslationError::Timeout(budget.as_millis() as u64))??;

        if out.len() != texts.len() {
            return Err(TranslationError::LengthMismatch {
                expected: texts.len(),
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upper-cases every text, optionally dropping the last element
    struct Shout {
        drop_last: bool,
        calls: AtomicUsize,
    }

    impl Shout {
        fn new(drop_last: bool) -> Arc<Self> {
            Arc::new(Self { drop_last, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Translator for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        async fn translate(&self, texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out: Vec<String> = texts.iter().map(|t| t.to_uppercase()).collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    struct Failing;

    #[async_trait]
    impl Translator for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn translate(&self, _texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            Err(TranslationError::Status { status: 503, body: "down".to_string() })
        }
    }

    struct Hanging;

    #[async_trait]
    impl Translator for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn translate(&self, _texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    /// Labels each text with a suffix, ignoring case
    struct Suffix(&'static str);

    #[async_trait]
    impl Translator for Suffix {
        fn name(&self) -> &'static str {
            "suffix"
        }

        async fn translate(&self, texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            Ok(texts.iter().map(|t| format!("{}{}", t, self.0)).collect())
        }
    }

    /// Gives up on "stuck" after the per-text timeout and keeps its source.
    /// Other texts are upper-cased just under the deadline. Every request
    /// also pays a little overhead outside the deadline.
    struct PerTextDeadline {
        per_text: Duration,
    }

    #[async_trait]
    impl Translator for PerTextDeadline {
        fn name(&self) -> &'static str {
            "per-text"
        }

        async fn translate(&self, texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if text == "stuck" {
                    tokio::time::sleep(self.per_text).await;
                    out.push(text.clone());
                } else {
                    tokio::time::sleep(self.per_text - Duration::from_millis(50)).await;
                    out.push(text.to_uppercase());
                }
            }
            Ok(out)
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn chain(primary: Option<Arc<dyn Translator>>, fallback: Option<Arc<dyn Translator>>) -> TranslationChain {
        TranslationChain::new(primary, fallback, &TranslationConfig::default())
    }

    #[tokio::test]
    async fn test_primary_success() {
        let c = chain(Some(Shout::new(false)), Some(Arc::new(Suffix("-fb"))));
        let (out, outcome) = c.translate_batch(&texts(&["hello", "world"]), "es").await;
        assert_eq!(out, texts(&["HELLO", "WORLD"]));
        assert_eq!(outcome, TranslationOutcome::Primary);
    }

    #[tokio::test]
    async fn test_length_mismatch_uses_fallback() {
        let c = chain(Some(Shout::new(true)), Some(Arc::new(Suffix("-fb"))));
        let (out, outcome) = c.translate_batch(&texts(&["a", "b", "c"]), "es").await;
        assert_eq!(out, texts(&["a-fb", "b-fb", "c-fb"]));
        assert_eq!(outcome, TranslationOutcome::Fallback);
    }

    #[tokio::test]
    async fn test_length_mismatch_without_fallback_keeps_source() {
        let c = chain(Some(Shout::new(true)), None);
        let input = texts(&["Hello world", "Bye"]);
        let (out, outcome) = c.translate_batch(&input, "es").await;
        assert_eq!(out, input);
        assert_eq!(outcome, TranslationOutcome::Untranslated);
    }

    #[tokio::test]
    async fn test_both_fail_keeps_source() {
        let c = chain(Some(Arc::new(Failing)), Some(Arc::new(Failing)));
        let input = texts(&["one", "two"]);
        let (out, outcome) = c.translate_batch(&input, "fr").await;
        assert_eq!(out, input);
        assert_eq!(outcome, TranslationOutcome::Untranslated);
    }

    #[tokio::test]
    async fn test_unconfigured_primary_goes_to_fallback() {
        let c = chain(None, Some(Arc::new(Suffix("!"))));
        let (out, outcome) = c.translate_batch(&texts(&["hi"]), "de").await;
        assert_eq!(out, texts(&["hi!"]));
        assert_eq!(outcome, TranslationOutcome::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_timeout_uses_fallback() {
        let c = chain(Some(Arc::new(Hanging)), Some(Arc::new(Suffix("-fb"))));
        let (out, outcome) = c.translate_batch(&texts(&["x"]), "es").await;
        assert_eq!(out, texts(&["x-fb"]));
        assert_eq!(outcome, TranslationOutcome::Fallback);
    }

    #[tokio::test]
    async fn test_empty_sources_stay_empty() {
        let c = chain(Some(Arc::new(Suffix("?"))), None);
        let (out, _) = c.translate_batch(&texts(&["hello", "", "bye"]), "es").await;
        assert_eq!(out, texts(&["hello?", "", "bye?"]));

        let primary = Shout::new(false);
        let c = chain(Some(primary.clone()), None);
        let (out, outcome) = c.translate_batch(&texts(&["", " "]), "es").await;
        assert_eq!(out, texts(&["", ""]));
        assert_eq!(outcome, TranslationOutcome::Empty);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_primary() {
        let config = TranslationConfig {
            breaker_failure_threshold: 2,
            ..TranslationConfig::default()
        };
        let metrics = Metrics::new();
        let c = TranslationChain::new(Some(Arc::new(Failing)), Some(Arc::new(Suffix("-fb"))), &config)
            .with_metrics(metrics.clone());

        for _ in 0..3 {
            let (_, outcome) = c.translate_batch(&texts(&["a"]), "es").await;
            assert_eq!(outcome, TranslationOutcome::Fallback);
        }
        let stats = c.breaker_stats();
        assert_eq!(stats.total_failures, 2, "third batch must not reach the primary");
        assert_eq!(metrics.snapshot().circuit_breaker_trips, 1);
        assert_eq!(metrics.snapshot().translations_fallback, 3);
    }

    #[test]
    fn test_primary_timeout_covers_retries_and_backoff() {
        let config = TranslationConfig {
            ai_timeout_ms: 1000,
            max_retries: 2,
            ..TranslationConfig::default()
        };
        let c = TranslationChain::new(None, None, &config);
        // 3 attempts + (500 + 250) + (1000 + 250) of backoff
        assert_eq!(c.primary_timeout, Duration::from_millis(3000 + 750 + 1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fallback_text_keeps_finished_translations() {
        let config = TranslationConfig {
            fallback_timeout_ms: 1000,
            ..TranslationConfig::default()
        };
        let fallback = Arc::new(PerTextDeadline { per_text: Duration::from_millis(1000) });
        let c = TranslationChain::new(Some(Arc::new(Failing)), Some(fallback), &config);

        let (out, outcome) = c.translate_batch(&texts(&["hello", "stuck"]), "es").await;
        assert_eq!(out, texts(&["HELLO", "stuck"]));
        assert_eq!(outcome, TranslationOutcome::Fallback);
    }
}
