// Bubble Translator: end-to-end workflow for one screenshot
//
// decode -> segment -> extract -> OCR (concurrent, bounded) -> translate (one
// batch) -> fill + draw -> PNG. Only decode, encode and task failures escape;
// every other stage degrades per bubble or per batch.

use anyhow::{Context, Result};
use futures::future::join_all;
use image::RgbaImage;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::core::config::{Config, OcrConfig};
use crate::core::errors::{OcrError, OcrResult, PipelineError, PipelineResult};
use crate::core::types::{Bubble, PipelineReport, TextBlock};
use crate::middleware::CircuitBreakerStats;
use crate::services::extraction::RegionExtractor;
use crate::services::layout::TextLayoutEngine;
use crate::services::ocr::{preprocess_crop, recognize_block, OcrEngine, TesseractOcr};
use crate::services::rendering::{BubbleRenderer, CosmicTextRenderer, RenderOutcome, TextRenderer};
use crate::services::segmentation::BubbleSegmenter;
use crate::services::translation::TranslationChain;
use crate::utils::image_ops::{crop_bubble, decode_image_async, encode_png_async};
use crate::utils::{Metrics, Stage};

/// Translates the chat bubbles of a screenshot in place.
///
/// Holds no per-image state: concurrent calls share only the collaborators
/// (OCR engine, translation chain, font system) and the metrics sink.
pub struct BubbleTranslator {
    config: Arc<Config>,
    segmenter: BubbleSegmenter,
    extractor: RegionExtractor,
    ocr: Arc<dyn OcrEngine>,
    translator: Arc<TranslationChain>,
    renderer: BubbleRenderer,
    ocr_permits: Arc<Semaphore>,
    metrics: Option<Metrics>,
}

impl BubbleTranslator {
    pub fn new(
        config: Arc<Config>,
        ocr: Arc<dyn OcrEngine>,
        translator: TranslationChain,
        text: Arc<dyn TextRenderer>,
    ) -> Self {
        Self {
            segmenter: BubbleSegmenter::new(config.segmentation.clone()),
            extractor: RegionExtractor::new(config.extraction.clone()),
            renderer: BubbleRenderer::new(TextLayoutEngine::new(config.layout.clone()), text),
            ocr_permits: Arc::new(Semaphore::new(config.ocr.concurrency)),
            translator: Arc::new(translator),
            ocr,
            config,
            metrics: None,
        }
    }

    /// Production wiring: tesseract, configured translation providers and
    /// the cosmic-text font system
    #[instrument(skip(config, metrics))]
    pub fn from_config(config: Arc<Config>, metrics: Metrics) -> Result<Self> {
        let ocr = Arc::new(TesseractOcr::from_config(&config.ocr));
        let translator = TranslationChain::from_config(&config.translation)
            .context("Failed to initialize translation providers")?
            .with_metrics(metrics.clone());
        let text = Arc::new(
            CosmicTextRenderer::new(&config.rendering).context("Failed to initialize font system")?,
        );

        info!(
            "✓ Ready (ocr: {} x{}, ai: {}, fallback: {})",
            config.ocr.program,
            config.ocr.concurrency,
            if config.ai_configured() { "on" } else { "off" },
            if config.translation.fallback_enabled { "on" } else { "off" }
        );

        Ok(Self::new(config, ocr, translator, text).with_metrics(metrics))
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Health of the primary translation provider
    pub fn translation_breaker(&self) -> CircuitBreakerStats {
        self.translator.breaker_stats()
    }

    /// Translate every detected bubble of `image_bytes` into `target_lang`
    /// and return the result as PNG
    pub async fn translate_bubbles(&self, image_bytes: &[u8], target_lang: &str) -> PipelineResult<Vec<u8>> {
        self.translate_bubbles_with_report(image_bytes, target_lang)
            .await
            .map(|(png, _)| png)
    }

    #[instrument(skip(self, image_bytes), fields(bytes = image_bytes.len()))]
    pub async fn translate_bubbles_with_report(
        &self,
        image_bytes: &[u8],
        target_lang: &str,
    ) -> PipelineResult<(Vec<u8>, PipelineReport)> {
        let start_time = Instant::now();
        let img = decode_image_async(Arc::from(image_bytes)).await?;

        let mut report = PipelineReport {
            width: img.width(),
            height: img.height(),
            ..PipelineReport::default()
        };

        // Segmentation + extraction
        let t = Instant::now();
        let segmenter = self.segmenter.clone();
        let extractor = self.extractor.clone();
        let (img, sample, candidate_regions, bubbles) = tokio::task::spawn_blocking(move || {
            let segmentation = segmenter.segment(&img);
            let bubbles = extractor.extract(
                &segmentation.rects,
                segmenter.scale(),
                img.width(),
                img.height(),
            );
            (img, segmentation.sample, segmentation.rects.len(), bubbles)
        })
        .await
        .map_err(|e| PipelineError::join("segmentation", e))?;
        self.record_stage(Stage::Segmentation, t.elapsed());

        report.candidate_regions = candidate_regions;
        report.bubbles = bubbles.len();

        if bubbles.is_empty() {
            debug!("No bubbles found, passing image through");
            report.passthrough = true;
            let png = encode_png_async(img).await?;
            self.finish(&report, start_time.elapsed());
            return Ok((png, report));
        }

        // OCR
        let t = Instant::now();
        let (img, crops) = Self::preprocess(img, bubbles.clone(), self.config.ocr.clone()).await?;
        let recognized = join_all(
            crops
                .into_iter()
                .enumerate()
                .map(|(index, crop)| self.recognize_bubble(index, crop)),
        )
        .await;
        self.record_stage(Stage::Ocr, t.elapsed());

        report.ocr_failures = recognized.iter().filter(|(_, failed)| *failed).count();
        let mut blocks: Vec<TextBlock> = recognized.into_iter().map(|(block, _)| block).collect();

        // Translation
        let t = Instant::now();
        let sources: Vec<String> = blocks.iter().map(|b| b.source_text.clone()).collect();
        let (translated, outcome) = self.translator.translate_batch(&sources, target_lang).await;
        for (block, text) in blocks.iter_mut().zip(translated) {
            block.translated_text = text;
        }
        report.translation = Some(outcome);
        self.record_stage(Stage::Translation, t.elapsed());

        // Rendering
        let t = Instant::now();
        let renderer = self.renderer.clone();
        let scale = self.segmenter.scale();
        let (img, outcomes) = tokio::task::spawn_blocking(move || {
            let mut canvas = img;
            let outcomes: Vec<RenderOutcome> = bubbles
                .iter()
                .zip(&blocks)
                .map(|(bubble, block)| renderer.render(&mut canvas, &sample, scale, bubble, block))
                .collect();
            (canvas, outcomes)
        })
        .await
        .map_err(|e| PipelineError::join("rendering", e))?;
        self.record_stage(Stage::Rendering, t.elapsed());

        for outcome in &outcomes {
            if let RenderOutcome::Drawn { overflow, .. } = outcome {
                report.rendered += 1;
                if *overflow {
                    report.overflows += 1;
                }
            }
        }

        let png = encode_png_async(img).await?;
        self.finish(&report, start_time.elapsed());
        Ok((png, report))
    }

    /// Crop and preprocess every bubble on the blocking pool, in parallel
    async fn preprocess(
        img: RgbaImage,
        bubbles: Vec<Bubble>,
        ocr_config: OcrConfig,
    ) -> PipelineResult<(RgbaImage, Vec<OcrResult<Vec<u8>>>)> {
        tokio::task::spawn_blocking(move || {
            let crops: Vec<OcrResult<Vec<u8>>> = bubbles
                .par_iter()
                .map(|bubble| preprocess_crop(&crop_bubble(&img, bubble), &ocr_config))
                .collect();
            (img, crops)
        })
        .await
        .map_err(|e| PipelineError::join("preprocess", e))
    }

    /// OCR one bubble; failures yield an empty block flagged as failed
    async fn recognize_bubble(&self, index: usize, crop: OcrResult<Vec<u8>>) -> (TextBlock, bool) {
        let result = match crop {
            Ok(png) => {
                // The semaphore is never closed
                let _permit = self.ocr_permits.acquire().await.ok();
                recognize_block(self.ocr.as_ref(), &png, &self.config.ocr).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(block) => {
                debug!("Bubble {}: {:?} (hint {})", index, block.source_text, block.line_height_hint);
                (block, false)
            }
            Err(e) => {
                warn!("OCR failed for bubble {}: {}", index, e);
                if let Some(ref m) = self.metrics {
                    m.record_ocr_failure(matches!(e, OcrError::Timeout(_)));
                }
                let block = TextBlock {
                    line_height_hint: self.config.ocr.default_line_height,
                    ..TextBlock::default()
                };
                (block, true)
            }
        }
    }

    fn record_stage(&self, stage: Stage, duration: Duration) {
        if let Some(ref m) = self.metrics {
            m.record_stage_duration(stage, duration);
        }
    }

    fn finish(&self, report: &PipelineReport, elapsed: Duration) {
        if let Some(ref m) = self.metrics {
            m.record_report(report);
        }
        info!(
            "Translated {}x{}: {} regions, {} bubbles, {} OCR failures, {} rendered ({} overflow), translation {:?} in {:.0}ms",
            report.width,
            report.height,
            report.candidate_regions,
            report.bubbles,
            report.ocr_failures,
            report.rendered,
            report.overflows,
            report.translation,
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{TranslationError, TranslationResult};
    use crate::core::types::{OcrLine, OcrOutput, TranslationOutcome};
    use crate::services::rendering::tests::BlockRenderer;
    use crate::services::translation::Translator;
    use crate::utils::image_ops::{decode_image, encode_png};
    use async_trait::async_trait;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BEIGE: Rgba<u8> = Rgba([200, 190, 150, 255]);
    const DARK: Rgba<u8> = Rgba([30, 30, 40, 255]);

    fn recognized(text: &str, line_height: f32) -> OcrOutput {
        OcrOutput {
            text: text.to_string(),
            lines: vec![OcrLine { height: line_height }],
        }
    }

    /// Answers the same text for every crop
    struct FixedOcr {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl FixedOcr {
        fn new(text: &'static str) -> Arc<Self> {
            Arc::new(Self { text, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl OcrEngine for FixedOcr {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn recognize(&self, _image_png: &[u8], _language_hint: &str) -> OcrResult<OcrOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(recognized(self.text, 30.0))
        }
    }

    /// Picks its answer from the preprocessed crop height
    struct ByHeightOcr;

    #[async_trait]
    impl OcrEngine for ByHeightOcr {
        fn name(&self) -> &'static str {
            "by-height"
        }

        async fn recognize(&self, image_png: &[u8], _language_hint: &str) -> OcrResult<OcrOutput> {
            let height = image::load_from_memory(image_png)?.height();
            match height {
                h if h < 460 => Ok(recognized("Hello", 40.0)),
                h if h < 545 => Ok(recognized("World", 40.0)),
                _ => Err(OcrError::EngineFailed { status: 1, stderr: "no text".to_string() }),
            }
        }
    }

    /// Taller crops take longer, so the first bubble finishes last
    #[derive(Default)]
    struct SlowTallOcr {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: parking_lot::Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl OcrEngine for SlowTallOcr {
        fn name(&self) -> &'static str {
            "slow-tall"
        }

        async fn recognize(&self, image_png: &[u8], _language_hint: &str) -> OcrResult<OcrOutput> {
            let height = image::load_from_memory(image_png)?.height();
            let text = match height {
                h if h >= 545 => "One",
                h if h >= 460 => "Two",
                _ => "Three",
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(height as u64 * 10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.completed.lock().push(text);
            Ok(recognized(text, 40.0))
        }
    }

    struct Dictionary(&'static [(&'static str, &'static str)]);

    #[async_trait]
    impl Translator for Dictionary {
        fn name(&self) -> &'static str {
            "dictionary"
        }

        async fn translate(&self, texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            Ok(texts
                .iter()
                .map(|t| {
                    self.0
                        .iter()
                        .find(|(from, _)| from == t)
                        .map(|(_, to)| to.to_string())
                        .unwrap_or_else(|| t.clone())
                })
                .collect())
        }
    }

    /// Always answers one element short
    struct Truncating;

    #[async_trait]
    impl Translator for Truncating {
        fn name(&self) -> &'static str {
            "truncating"
        }

        async fn translate(&self, texts: &[String], _target_lang: &str) -> TranslationResult<Vec<String>> {
            if texts.is_empty() {
                return Err(TranslationError::InvalidResponse("empty".to_string()));
            }
            Ok(texts[1..].to_vec())
        }
    }

    fn translator(
        ocr: Arc<dyn OcrEngine>,
        provider: Arc<dyn Translator>,
        text: Arc<BlockRenderer>,
    ) -> BubbleTranslator {
        translator_with(Config::default(), ocr, provider, text)
    }

    fn translator_with(
        config: Config,
        ocr: Arc<dyn OcrEngine>,
        provider: Arc<dyn Translator>,
        text: Arc<BlockRenderer>,
    ) -> BubbleTranslator {
        let config = Arc::new(config);
        let chain = TranslationChain::new(Some(provider), None, &config.translation);
        BubbleTranslator::new(config, ocr, chain, text)
    }

    fn fill(img: &mut RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba<u8>) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, color);
            }
        }
    }

    fn close_to_beige(p: &Rgba<u8>) -> bool {
        p.0.iter().zip(BEIGE.0).all(|(a, b)| (*a as i16 - b as i16).abs() <= 2)
    }

    /// 800x400 dark screenshot with one 600x200 beige bubble and a dark mark
    /// inside it
    fn single_bubble_png() -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(800, 400, DARK);
        fill(&mut img, 100, 100, 700, 300, BEIGE);
        fill(&mut img, 200, 150, 300, 160, DARK);
        encode_png(&img).unwrap()
    }

    #[tokio::test]
    async fn test_no_bubbles_passthrough() {
        let mut img = RgbaImage::from_pixel(64, 48, DARK);
        fill(&mut img, 10, 10, 40, 30, Rgba([255, 255, 255, 255]));
        img.put_pixel(50, 40, Rgba([200, 0, 0, 255]));

        let ocr = FixedOcr::new("unused");
        let t = translator(ocr.clone(), Arc::new(Dictionary(&[])), Arc::new(BlockRenderer::default()));
        let (png, report) = t
            .translate_bubbles_with_report(&encode_png(&img).unwrap(), "es")
            .await
            .unwrap();

        assert!(report.passthrough);
        assert_eq!(report.bubbles, 0);
        assert_eq!(report.translation, None);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(decode_image(&png).unwrap(), img);
    }

    #[tokio::test]
    async fn test_undecodable_input_is_an_error() {
        let t = translator(FixedOcr::new("x"), Arc::new(Dictionary(&[])), Arc::new(BlockRenderer::default()));
        let result = t.translate_bubbles(b"GIF89a but not really", "es").await;
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[tokio::test]
    async fn test_hello_world_scenario() {
        let renderer = Arc::new(BlockRenderer::default());
        let metrics = Metrics::new();
        let t = translator(
            FixedOcr::new("Hello world"),
            Arc::new(Dictionary(&[("Hello world", "Hola mundo")])),
            renderer.clone(),
        )
        .with_metrics(metrics.clone());

        let (png, report) = t.translate_bubbles_with_report(&single_bubble_png(), "es").await.unwrap();

        assert_eq!(report.bubbles, 1);
        assert_eq!(report.rendered, 1);
        assert_eq!(report.translation, Some(TranslationOutcome::Primary));

        let drawn = renderer.drawn.lock();
        assert_eq!(drawn.len(), 1);
        let (ref line, _, _, size) = drawn[0];
        assert_eq!(line, "Hola mundo");
        assert!((12.0..=84.0).contains(&size));

        // The mark was erased with the bubble fill
        let out = decode_image(&png).unwrap();
        assert!(close_to_beige(out.get_pixel(250, 155)));
        assert_eq!(metrics.snapshot().bubbles_rendered, 1);
        assert_eq!(metrics.snapshot().images_processed, 1);
    }

    #[tokio::test]
    async fn test_length_mismatch_renders_source() {
        let renderer = Arc::new(BlockRenderer::default());
        let t = translator(FixedOcr::new("Hello world"), Arc::new(Truncating), renderer.clone());

        let (_, report) = t.translate_bubbles_with_report(&single_bubble_png(), "es").await.unwrap();

        assert_eq!(report.translation, Some(TranslationOutcome::Untranslated));
        let drawn = renderer.drawn.lock();
        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].0, "Hello world");
    }

    #[tokio::test]
    async fn test_close_rectangles_merge_into_one_bubble() {
        let mut img = RgbaImage::from_pixel(1400, 400, DARK);
        // 16px apart at full size, 4px in the sample
        fill(&mut img, 40, 40, 640, 240, BEIGE);
        fill(&mut img, 656, 40, 1256, 240, BEIGE);

        let ocr = FixedOcr::new("Hi");
        let t = translator(ocr.clone(), Arc::new(Dictionary(&[])), Arc::new(BlockRenderer::default()));
        let (_, report) = t
            .translate_bubbles_with_report(&encode_png(&img).unwrap(), "es")
            .await
            .unwrap();

        assert_eq!(report.candidate_regions, 2);
        assert_eq!(report.bubbles, 1);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ocr_failure_leaves_bubble_filled_and_textless() {
        let mut img = RgbaImage::from_pixel(1000, 1000, DARK);
        for (top, height) in [(40, 200), (340, 240), (680, 280)] {
            fill(&mut img, 100, top, 900, top + height, BEIGE);
            fill(&mut img, 150, top + 30, 260, top + 40, DARK);
        }

        let renderer = Arc::new(BlockRenderer::default());
        let t = translator(
            Arc::new(ByHeightOcr),
            Arc::new(Dictionary(&[("Hello", "Hola"), ("World", "Mundo")])),
            renderer.clone(),
        );
        let (png, report) = t
            .translate_bubbles_with_report(&encode_png(&img).unwrap(), "es")
            .await
            .unwrap();

        assert_eq!(report.bubbles, 3);
        assert_eq!(report.ocr_failures, 1);
        assert_eq!(report.rendered, 2);

        let texts: Vec<String> = renderer.drawn.lock().iter().map(|d| d.0.clone()).collect();
        assert_eq!(texts, vec!["Hola".to_string(), "Mundo".to_string()]);

        let out = decode_image(&png).unwrap();
        // Third bubble (rows 680..960 before inset): one flat color, mark gone
        let reference = *out.get_pixel(500, 820);
        assert!(close_to_beige(&reference));
        for y in 700..940 {
            for x in 120..880 {
                assert_eq!(*out.get_pixel(x, y), reference, "pixel ({}, {})", x, y);
            }
        }
        // Mark in the first bubble erased too
        assert!(close_to_beige(out.get_pixel(200, 75)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ocr_results_follow_bubble_order() {
        let mut img = RgbaImage::from_pixel(1000, 1000, DARK);
        // Tallest bubble on top
        for (top, height) in [(40, 280), (380, 240), (680, 200)] {
            fill(&mut img, 100, top, 900, top + height, BEIGE);
        }

        let mut config = Config::default();
        config.ocr.concurrency = 3;
        let ocr = Arc::new(SlowTallOcr::default());
        let renderer = Arc::new(BlockRenderer::default());
        let t = translator_with(
            config,
            ocr.clone(),
            Arc::new(Dictionary(&[("One", "Uno"), ("Two", "Dos"), ("Three", "Tres")])),
            renderer.clone(),
        );

        let (_, report) = t
            .translate_bubbles_with_report(&encode_png(&img).unwrap(), "es")
            .await
            .unwrap();

        assert_eq!(report.bubbles, 3);
        assert_eq!(report.rendered, 3);
        assert_eq!(ocr.max_in_flight.load(Ordering::SeqCst), 3);
        assert_eq!(*ocr.completed.lock(), vec!["Three", "Two", "One"]);

        let texts: Vec<String> = renderer.drawn.lock().iter().map(|d| d.0.clone()).collect();
        assert_eq!(texts, vec!["Uno".to_string(), "Dos".to_string(), "Tres".to_string()]);
        // Drawn top to bottom
        let ys: Vec<i32> = renderer.drawn.lock().iter().map(|d| d.2).collect();
        assert!(ys.windows(2).all(|w| w[0] < w[1]), "{:?}", ys);
    }
}
