use crate::core::errors::ConfigError;
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    /// Maximum accepted upload size in bytes
    pub body_limit: usize,
    /// Timeout for downloading an image by URL
    pub fetch_timeout_ms: u64,
}

/// Pixel classification and connected-component filtering.
///
/// Thresholds are fitted to one family of beige, solid-fill chat bubbles;
/// a different bubble style needs recalibration, hence everything lives here.
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Downscale factor applied before classification (0.25 = quarter size)
    pub scale: f32,
    pub min_luminance: f32,
    pub min_red: u8,
    pub min_green: u8,
    pub min_blue: u8,
    /// Channels all above this are treated as white UI chrome
    pub white_cutoff: u8,
    /// Required `r - b` difference (beige bias)
    pub min_red_blue_gap: i16,
    pub min_area: usize,
    pub min_width: u32,
    pub min_height: u32,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

/// Merging and full-resolution mapping of candidate regions
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Dilation (downscaled px) used when testing rectangles for overlap
    pub merge_margin: i64,
    pub min_inset: u32,
    pub inset_ratio: f32,
    /// Bubbles must be strictly wider than this after inset
    pub min_bubble_width: u32,
    /// Bubbles must be strictly taller than this after inset
    pub min_bubble_height: u32,
}

/// OCR collaborator configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Tesseract executable
    pub program: String,
    /// Tesseract language hint (e.g. "eng", "eng+rus")
    pub language: String,
    /// Width crops are resized to before recognition
    pub working_width: u32,
    /// When false, crops narrower than `working_width` are left as-is
    pub allow_enlarge: bool,
    pub timeout_ms: u64,
    /// Maximum bubbles recognized concurrently
    pub concurrency: usize,
    /// Line height assumed when the engine reports no line boxes
    pub default_line_height: u32,
}

/// Translation providers configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    /// OpenAI-compatible chat completions endpoint
    pub ai_url: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_timeout_ms: u64,
    pub max_retries: u32,
    /// Google gtx endpoint used as fallback provider
    pub fallback_url: String,
    pub fallback_enabled: bool,
    /// Per-text timeout for the fallback provider
    pub fallback_timeout_ms: u64,
    /// Consecutive primary failures before the breaker opens
    pub breaker_failure_threshold: usize,
    pub breaker_cooldown_secs: u64,
}

/// Font-size search and padding
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub min_padding: u32,
    pub padding_ratio: f32,
    /// Multiplier from OCR line height (working space) to output font size
    pub hint_scale: f32,
    pub min_start_size: u32,
    pub max_height_ratio: f32,
    pub floor_size: u32,
    pub line_height_factor: f32,
}

/// Text rendering configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    /// Font family name drawn with (bold weight)
    pub font_family: String,
    /// Optional font file loaded before system fonts
    pub font_path: Option<String>,
    pub load_system_fonts: bool,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub segmentation: SegmentationConfig,
    pub extraction: ExtractionConfig,
    pub ocr: OcrConfig,
    pub translation: TranslationConfig,
    pub layout: LayoutConfig,
    pub rendering: RenderingConfig,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            scale: 0.25,
            min_luminance: 120.0,
            min_red: 150,
            min_green: 140,
            min_blue: 90,
            white_cutoff: 245,
            min_red_blue_gap: 30,
            min_area: 1500,
            min_width: 120,
            min_height: 40,
            min_aspect: 1.2,
            max_aspect: 12.0,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            merge_margin: 10,
            min_inset: 8,
            inset_ratio: 0.05,
            min_bubble_width: 80,
            min_bubble_height: 30,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            language: "eng".to_string(),
            working_width: 1800,
            allow_enlarge: true,
            timeout_ms: 30_000,
            concurrency: std::cmp::max(num_cpus::get() / 2, 1),
            default_line_height: 18,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            ai_url: None,
            ai_api_key: None,
            ai_model: "llama3-70b-8192".to_string(),
            ai_timeout_ms: 20_000,
            max_retries: 2,
            fallback_url: "https://translate.googleapis.com/translate_a/single".to_string(),
            fallback_enabled: true,
            fallback_timeout_ms: 12_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_padding: 10,
            padding_ratio: 0.08,
            hint_scale: 0.81,
            min_start_size: 18,
            max_height_ratio: 0.70,
            floor_size: 12,
            line_height_factor: 1.15,
        }
    }
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_path: None,
            load_system_fonts: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            log_level: Level::INFO,
            body_limit: 32 * 1024 * 1024,
            fetch_timeout_ms: 15_000,
        }
    }
}

/// Documented defaults, without reading the environment
impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            segmentation: SegmentationConfig::default(),
            extraction: ExtractionConfig::default(),
            ocr: OcrConfig::default(),
            translation: TranslationConfig::default(),
            layout: LayoutConfig::default(),
            rendering: RenderingConfig::default(),
        }
    }
}

/// Read an environment variable and parse it, falling back to `default`
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Self {
        let d = Config::default();

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(d.server.log_level);

        // PORT first, then the platform-provided name
        let port = env_opt("PORT")
            .or_else(|| env_opt("SERVER_PORT"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.server.port);

        Self {
            server: ServerConfig {
                port,
                host: env::var("SERVER_HOST").unwrap_or(d.server.host),
                log_level,
                body_limit: env_or("BODY_LIMIT_BYTES", d.server.body_limit),
                fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", d.server.fetch_timeout_ms),
            },
            segmentation: SegmentationConfig {
                scale: env_or("SEG_SCALE", d.segmentation.scale),
                min_luminance: env_or("SEG_MIN_LUMINANCE", d.segmentation.min_luminance),
                min_red: env_or("SEG_MIN_RED", d.segmentation.min_red),
                min_green: env_or("SEG_MIN_GREEN", d.segmentation.min_green),
                min_blue: env_or("SEG_MIN_BLUE", d.segmentation.min_blue),
                white_cutoff: env_or("SEG_WHITE_CUTOFF", d.segmentation.white_cutoff),
                min_red_blue_gap: env_or("SEG_MIN_RED_BLUE_GAP", d.segmentation.min_red_blue_gap),
                min_area: env_or("SEG_MIN_AREA", d.segmentation.min_area),
                min_width: env_or("SEG_MIN_WIDTH", d.segmentation.min_width),
                min_height: env_or("SEG_MIN_HEIGHT", d.segmentation.min_height),
                min_aspect: env_or("SEG_MIN_ASPECT", d.segmentation.min_aspect),
                max_aspect: env_or("SEG_MAX_ASPECT", d.segmentation.max_aspect),
            },
            extraction: ExtractionConfig {
                merge_margin: env_or("MERGE_MARGIN", d.extraction.merge_margin),
                min_inset: env_or("BUBBLE_MIN_INSET", d.extraction.min_inset),
                inset_ratio: env_or("BUBBLE_INSET_RATIO", d.extraction.inset_ratio),
                min_bubble_width: env_or("BUBBLE_MIN_WIDTH", d.extraction.min_bubble_width),
                min_bubble_height: env_or("BUBBLE_MIN_HEIGHT", d.extraction.min_bubble_height),
            },
            ocr: OcrConfig {
                program: env::var("OCR_PROGRAM").unwrap_or(d.ocr.program),
                language: env::var("OCR_LANGUAGE").unwrap_or(d.ocr.language),
                working_width: env_or("OCR_WORKING_WIDTH", d.ocr.working_width),
                allow_enlarge: env_or("OCR_ALLOW_ENLARGE", d.ocr.allow_enlarge),
                timeout_ms: env_or("OCR_TIMEOUT_MS", d.ocr.timeout_ms),
                concurrency: env_or("OCR_CONCURRENCY", d.ocr.concurrency),
                default_line_height: env_or("OCR_DEFAULT_LINE_HEIGHT", d.ocr.default_line_height),
            },
            translation: TranslationConfig {
                ai_url: env_opt("AI_TRANSLATE_URL"),
                ai_api_key: env_opt("AI_API_KEY"),
                ai_model: env::var("AI_MODEL").unwrap_or(d.translation.ai_model),
                ai_timeout_ms: env_or("AI_TIMEOUT_MS", d.translation.ai_timeout_ms),
                max_retries: env_or("AI_MAX_RETRIES", d.translation.max_retries),
                fallback_url: env::var("FALLBACK_TRANSLATE_URL")
                    .unwrap_or(d.translation.fallback_url),
                fallback_enabled: env_or("FALLBACK_TRANSLATE_ENABLED", d.translation.fallback_enabled),
                fallback_timeout_ms: env_or("FALLBACK_TIMEOUT_MS", d.translation.fallback_timeout_ms),
                breaker_failure_threshold: env_or(
                    "BREAKER_FAILURE_THRESHOLD",
                    d.translation.breaker_failure_threshold,
                ),
                breaker_cooldown_secs: env_or("BREAKER_COOLDOWN_SECS", d.translation.breaker_cooldown_secs),
            },
            layout: LayoutConfig {
                min_padding: env_or("LAYOUT_MIN_PADDING", d.layout.min_padding),
                padding_ratio: env_or("LAYOUT_PADDING_RATIO", d.layout.padding_ratio),
                hint_scale: env_or("LAYOUT_HINT_SCALE", d.layout.hint_scale),
                min_start_size: env_or("LAYOUT_MIN_START_SIZE", d.layout.min_start_size),
                max_height_ratio: env_or("LAYOUT_MAX_HEIGHT_RATIO", d.layout.max_height_ratio),
                floor_size: env_or("LAYOUT_FLOOR_SIZE", d.layout.floor_size),
                line_height_factor: env_or("LAYOUT_LINE_HEIGHT_FACTOR", d.layout.line_height_factor),
            },
            rendering: RenderingConfig {
                font_family: env::var("FONT_FAMILY").unwrap_or(d.rendering.font_family),
                font_path: env_opt("FONT_PATH"),
                load_system_fonts: env_or("LOAD_SYSTEM_FONTS", d.rendering.load_system_fonts),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let seg = &self.segmentation;
        if !(seg.scale > 0.0 && seg.scale <= 1.0) {
            return Err(ConfigError::InvalidScale(seg.scale));
        }
        if !(seg.min_aspect > 0.0 && seg.min_aspect <= seg.max_aspect) {
            return Err(ConfigError::InvalidSegmentationConfig(format!(
                "aspect range must satisfy 0 < min <= max, got [{}, {}]",
                seg.min_aspect, seg.max_aspect
            )));
        }

        let ext = &self.extraction;
        if ext.merge_margin < 0 {
            return Err(ConfigError::InvalidExtractionConfig(format!(
                "merge_margin must be >= 0, got {}",
                ext.merge_margin
            )));
        }
        if !(0.0..0.5).contains(&ext.inset_ratio) {
            return Err(ConfigError::InvalidExtractionConfig(format!(
                "inset_ratio must be in [0.0, 0.5), got {}",
                ext.inset_ratio
            )));
        }

        if self.ocr.working_width == 0 {
            return Err(ConfigError::InvalidOcrConfig(
                "working_width must be > 0".to_string(),
            ));
        }
        if self.ocr.concurrency == 0 {
            return Err(ConfigError::InvalidOcrConfig(
                "concurrency must be > 0".to_string(),
            ));
        }
        if self.ocr.timeout_ms == 0 {
            return Err(ConfigError::InvalidOcrConfig(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.translation.ai_timeout_ms == 0 || self.translation.fallback_timeout_ms == 0 {
            return Err(ConfigError::InvalidTranslationConfig(
                "timeouts must be > 0".to_string(),
            ));
        }
        if self.translation.breaker_failure_threshold == 0 {
            return Err(ConfigError::InvalidTranslationConfig(
                "breaker_failure_threshold must be > 0".to_string(),
            ));
        }

        let layout = &self.layout;
        if layout.floor_size == 0 || layout.floor_size > layout.min_start_size {
            return Err(ConfigError::InvalidLayoutConfig(format!(
                "floor_size must be in 1..={}, got {}",
                layout.min_start_size, layout.floor_size
            )));
        }
        if layout.line_height_factor < 1.0 {
            return Err(ConfigError::InvalidLayoutConfig(format!(
                "line_height_factor must be >= 1.0, got {}",
                layout.line_height_factor
            )));
        }
        if !(0.0..=1.0).contains(&layout.max_height_ratio) || layout.max_height_ratio == 0.0 {
            return Err(ConfigError::InvalidLayoutConfig(format!(
                "max_height_ratio must be in (0.0, 1.0], got {}",
                layout.max_height_ratio
            )));
        }

        Ok(())
    }

    /// Whether the primary AI provider has both endpoint and key
    pub fn ai_configured(&self) -> bool {
        self.translation.ai_url.is_some() && self.translation.ai_api_key.is_some()
    }
}
