use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::{PipelineReport, TranslationOutcome};

/// Most recent samples kept per timing series; older ones are dropped
pub const SAMPLE_WINDOW: usize = 1024;

/// Pipeline stages timed per invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmentation,
    Ocr,
    Translation,
    Rendering,
}

/// Process-wide metrics collector.
///
/// Thread-safe and cheap to clone; never read by the pipeline itself.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Images
    images_processed: AtomicUsize,
    images_passthrough: AtomicUsize,
    bubbles_detected: AtomicUsize,

    // OCR
    ocr_failures: AtomicUsize,
    ocr_timeouts: AtomicUsize,

    // Translation
    translations_primary: AtomicUsize,
    translations_fallback: AtomicUsize,
    translations_untranslated: AtomicUsize,
    translation_latency_ms: RwLock<VecDeque<u64>>,

    // Rendering
    bubbles_rendered: AtomicUsize,
    render_overflows: AtomicUsize,

    // Stage durations
    segmentation_ms: RwLock<VecDeque<u64>>,
    ocr_ms: RwLock<VecDeque<u64>>,
    translation_ms: RwLock<VecDeque<u64>>,
    rendering_ms: RwLock<VecDeque<u64>>,

    endpoint_counters: DashMap<String, AtomicUsize>,
    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                images_processed: AtomicUsize::new(0),
                images_passthrough: AtomicUsize::new(0),
                bubbles_detected: AtomicUsize::new(0),
                ocr_failures: AtomicUsize::new(0),
                ocr_timeouts: AtomicUsize::new(0),
                translations_primary: AtomicUsize::new(0),
                translations_fallback: AtomicUsize::new(0),
                translations_untranslated: AtomicUsize::new(0),
                translation_latency_ms: RwLock::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
                bubbles_rendered: AtomicUsize::new(0),
                render_overflows: AtomicUsize::new(0),
                segmentation_ms: RwLock::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
                ocr_ms: RwLock::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
                translation_ms: RwLock::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
                rendering_ms: RwLock::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
                endpoint_counters: DashMap::new(),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// Fold one finished invocation into the counters
    pub fn record_report(&self, report: &PipelineReport) {
        self.inner.images_processed.fetch_add(1, Ordering::Relaxed);
        if report.passthrough {
            self.inner.images_passthrough.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.bubbles_detected.fetch_add(report.bubbles, Ordering::Relaxed);
        self.inner.bubbles_rendered.fetch_add(report.rendered, Ordering::Relaxed);
        self.inner.render_overflows.fetch_add(report.overflows, Ordering::Relaxed);
    }

    pub fn record_ocr_failure(&self, timed_out: bool) {
        self.inner.ocr_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.inner.ocr_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_translation(&self, outcome: TranslationOutcome, duration: Duration) {
        let counter = match outcome {
            TranslationOutcome::Primary => &self.inner.translations_primary,
            TranslationOutcome::Fallback => &self.inner.translations_fallback,
            TranslationOutcome::Untranslated => &self.inner.translations_untranslated,
            TranslationOutcome::Empty => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        push_sample(&self.inner.translation_latency_ms, duration);
    }

    pub fn record_stage_duration(&self, stage: Stage, duration: Duration) {
        let slot = match stage {
            Stage::Segmentation => &self.inner.segmentation_ms,
            Stage::Ocr => &self.inner.ocr_ms,
            Stage::Translation => &self.inner.translation_ms,
            Stage::Rendering => &self.inner.rendering_ms,
        };
        push_sample(slot, duration);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner.endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.translation_latency_ms.read();
        let translation_latency_avg_ms = avg(&latency);
        let translation_latency_p95_ms = percentile(&latency, 0.95);
        drop(latency);

        let mut endpoints: Vec<(String, usize)> = self
            .inner
            .endpoint_counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        endpoints.sort();

        MetricsSnapshot {
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            images_passthrough: self.inner.images_passthrough.load(Ordering::Relaxed),
            bubbles_detected: self.inner.bubbles_detected.load(Ordering::Relaxed),
            bubbles_rendered: self.inner.bubbles_rendered.load(Ordering::Relaxed),
            ocr_failures: self.inner.ocr_failures.load(Ordering::Relaxed),
            ocr_timeouts: self.inner.ocr_timeouts.load(Ordering::Relaxed),
            translations_primary: self.inner.translations_primary.load(Ordering::Relaxed),
            translations_fallback: self.inner.translations_fallback.load(Ordering::Relaxed),
            translations_untranslated: self.inner.translations_untranslated.load(Ordering::Relaxed),
            translation_latency_avg_ms,
            translation_latency_p95_ms,
            render_overflows: self.inner.render_overflows.load(Ordering::Relaxed),
            segmentation_avg_ms: avg(&self.inner.segmentation_ms.read()),
            ocr_avg_ms: avg(&self.inner.ocr_ms.read()),
            translation_avg_ms: avg(&self.inner.translation_ms.read()),
            rendering_avg_ms: avg(&self.inner.rendering_ms.read()),
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            endpoints,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            r#"# HELP images_processed_total Images run through the pipeline
# TYPE images_processed_total counter
images_processed_total {}

# HELP images_passthrough_total Images returned unchanged because no bubble was found
# TYPE images_passthrough_total counter
images_passthrough_total {}

# HELP bubbles_detected_total Bubbles that survived extraction
# TYPE bubbles_detected_total counter
bubbles_detected_total {}

# HELP bubbles_rendered_total Bubbles with translated text drawn
# TYPE bubbles_rendered_total counter
bubbles_rendered_total {}

# HELP ocr_failures_total Bubbles whose OCR failed (including timeouts)
# TYPE ocr_failures_total counter
ocr_failures_total {}
ocr_timeouts_total {}

# HELP translations_total Translation batches by provider outcome
# TYPE translations_total counter
translations_total{{outcome="primary"}} {}
translations_total{{outcome="fallback"}} {}
translations_total{{outcome="untranslated"}} {}

# HELP translation_latency_avg_ms Average translation batch latency
# TYPE translation_latency_avg_ms gauge
translation_latency_avg_ms {}

# HELP render_overflows_total Bubbles drawn at the minimum font size without fitting
# TYPE render_overflows_total counter
render_overflows_total {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms{{stage="segmentation"}} {}
stage_avg_duration_ms{{stage="ocr"}} {}
stage_avg_duration_ms{{stage="translation"}} {}
stage_avg_duration_ms{{stage="rendering"}} {}

# HELP circuit_breaker_trips_total Times the primary provider circuit opened
# TYPE circuit_breaker_trips_total counter
circuit_breaker_trips_total {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {}
"#,
            s.images_processed,
            s.images_passthrough,
            s.bubbles_detected,
            s.bubbles_rendered,
            s.ocr_failures,
            s.ocr_timeouts,
            s.translations_primary,
            s.translations_fallback,
            s.translations_untranslated,
            s.translation_latency_avg_ms,
            s.render_overflows,
            s.segmentation_avg_ms,
            s.ocr_avg_ms,
            s.translation_avg_ms,
            s.rendering_avg_ms,
            s.circuit_breaker_trips,
            s.uptime_seconds,
        );

        if !s.endpoints.is_empty() {
            out.push_str("\n# HELP http_requests_total Requests per endpoint\n# TYPE http_requests_total counter\n");
            for (endpoint, count) in &s.endpoints {
                out.push_str(&format!("http_requests_total{{endpoint=\"{}\"}} {}\n", endpoint, count));
            }
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub images_processed: usize,
    pub images_passthrough: usize,
    pub bubbles_detected: usize,
    pub bubbles_rendered: usize,
    pub ocr_failures: usize,
    pub ocr_timeouts: usize,
    pub translations_primary: usize,
    pub translations_fallback: usize,
    pub translations_untranslated: usize,
    pub translation_latency_avg_ms: u64,
    pub translation_latency_p95_ms: u64,
    pub render_overflows: usize,
    pub segmentation_avg_ms: u64,
    pub ocr_avg_ms: u64,
    pub translation_avg_ms: u64,
    pub rendering_avg_ms: u64,
    pub circuit_breaker_trips: usize,
    pub endpoints: Vec<(String, usize)>,
    pub uptime_seconds: u64,
}

fn push_sample(slot: &RwLock<VecDeque<u64>>, duration: Duration) {
    let mut window = slot.write();
    if window.len() >= SAMPLE_WINDOW {
        window.pop_front();
    }
    window.push_back(duration.as_millis() as u64);
}

fn percentile(values: &VecDeque<u64>, p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
