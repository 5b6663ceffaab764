// OCR Service Module - bubble crop preprocessing and text recognition
// Default engine shells out to the tesseract CLI and parses its TSV report

use async_trait::async_trait;
use image::{imageops, DynamicImage, GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::core::config::OcrConfig;
use crate::core::errors::{OcrError, OcrResult};
use crate::core::types::{OcrLine, OcrOutput, TextBlock};

/// TSV row level for a text line (page=1, block=2, paragraph=3, line=4, word=5)
const TSV_LEVEL_LINE: i32 = 4;
const TSV_LEVEL_WORD: i32 = 5;

/// External text recognizer
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognize text in an encoded image
    async fn recognize(&self, image_png: &[u8], language_hint: &str) -> OcrResult<OcrOutput>;
}

/// Tesseract CLI engine: image on stdin, TSV on stdout
pub struct TesseractOcr {
    program: String,
}

impl TesseractOcr {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.program.clone())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, image_png: &[u8], language_hint: &str) -> OcrResult<OcrOutput> {
        let mut child = Command::new(&self.program)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(language_hint)
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OcrError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_png)
                .await
                .map_err(|source| OcrError::SpawnFailed {
                    program: self.program.clone(),
                    source,
                })?;
            // Closing stdin signals end of image
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| OcrError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_tsv(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse a tesseract TSV report into text and per-line heights.
///
/// Words are joined with spaces and lines with newlines, in report order.
pub fn parse_tsv(tsv: &str) -> OcrResult<OcrOutput> {
    let mut rows = tsv.lines();
    match rows.next() {
        Some(header) if header.starts_with("level") => {}
        Some(other) => {
            return Err(OcrError::InvalidOutput(format!(
                "unexpected TSV header: {:.60}",
                other
            )))
        }
        // Tesseract prints nothing at all for some blank inputs
        None => return Ok(OcrOutput::default()),
    }

    let mut lines = Vec::new();
    let mut text_lines: Vec<String> = Vec::new();
    let mut current_key: Option<(i32, i32, i32, i32)> = None;

    for row in rows {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 11 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);

        if level == TSV_LEVEL_LINE {
            let height: f32 = cols[9].parse().unwrap_or(0.0);
            lines.push(OcrLine { height });
            continue;
        }
        if level != TSV_LEVEL_WORD {
            continue;
        }

        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let word = cols.get(11).map(|s| s.trim()).unwrap_or("");
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        match text_lines.last_mut() {
            Some(line) if current_key == Some(key) => {
                line.push(' ');
                line.push_str(word);
            }
            _ => {
                text_lines.push(word.to_string());
                current_key = Some(key);
            }
        }
    }

    Ok(OcrOutput {
        text: text_lines.join("\n"),
        lines,
    })
}

/// Prepare a bubble crop for recognition.
///
/// Resizes to the working width (aspect preserved), converts to grayscale,
/// stretches contrast to the full range, sharpens and encodes as PNG.
pub fn preprocess_crop(crop: &RgbaImage, config: &OcrConfig) -> OcrResult<Vec<u8>> {
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return Err(OcrError::InvalidOutput(format!("empty crop {}x{}", w, h)));
    }

    let target_w = config.working_width;
    let resized = if target_w != w && (config.allow_enlarge || w > target_w) {
        let target_h = ((h as f64 * target_w as f64 / w as f64).round() as u32).max(1);
        imageops::resize(crop, target_w, target_h, imageops::FilterType::Lanczos3)
    } else {
        crop.clone()
    };

    let mut gray = DynamicImage::ImageRgba8(resized).to_luma8();
    stretch_contrast(&mut gray);
    let sharpened = imageops::unsharpen(&gray, 1.0, 2);

    let mut png_bytes = Vec::new();
    DynamicImage::ImageLuma8(sharpened).write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;
    Ok(png_bytes)
}

/// Linear min/max stretch to 0..=255; flat images are left alone
fn stretch_contrast(gray: &mut GrayImage) {
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo {
        return;
    }
    let range = (hi - lo) as u32;
    for p in gray.pixels_mut() {
        p[0] = (((p[0] - lo) as u32 * 255 + range / 2) / range) as u8;
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c,
            '\u{00C0}'..='\u{024F}' |  // Latin-1 supplement letters, Latin Extended A/B
            '\u{0370}'..='\u{03FF}' |  // Greek
            '\u{0400}'..='\u{04FF}' |  // Cyrillic
            '\u{3040}'..='\u{30FF}' |  // Hiragana, Katakana
            '\u{4E00}'..='\u{9FFF}' |  // CJK Unified Ideographs
            '\u{AC00}'..='\u{D7AF}'    // Hangul
        )
        || matches!(c, ' ' | '.' | ',' | '!' | '?' | ':' | ';' | '(' | ')' | '-' | '"' | '\'')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize raw OCR text: collapse whitespace, drop characters outside the
/// allow-list, collapse again and trim
pub fn sanitize_text(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    let filtered: String = collapsed.chars().filter(|&c| is_allowed_char(c)).collect();
    collapse_whitespace(&filtered)
}

/// Median line height (upper median for even counts); `default` when no
/// line reports a positive height
pub fn line_height_hint(lines: &[OcrLine], default: u32) -> u32 {
    let mut heights: Vec<f32> = lines
        .iter()
        .map(|l| l.height)
        .filter(|h| h.is_finite() && *h > 0.0)
        .collect();
    if heights.is_empty() {
        return default;
    }
    heights.sort_by(|a, b| a.total_cmp(b));
    heights[heights.len() / 2].round() as u32
}

/// Recognize one preprocessed crop under the configured timeout and turn the
/// result into a `TextBlock` (translation still empty)
#[instrument(skip(engine, image_png, config), fields(engine = engine.name(), bytes = image_png.len()))]
pub async fn recognize_block(
    engine: &dyn OcrEngine,
    image_png: &[u8],
    config: &OcrConfig,
) -> OcrResult<TextBlock> {
    let budget = Duration::from_millis(config.timeout_ms);
    let output = tokio::time::timeout(budget, engine.recognize(image_png, &config.language))
        .await
        .map_err(|_| {
            warn!("OCR exceeded {}ms", config.timeout_ms);
            OcrError::Timeout(config.timeout_ms)
        })??;

    let source_text = sanitize_text(&output.text);
    let line_height_hint = line_height_hint(&output.lines, config.default_line_height);
    debug!(
        "OCR: {} chars, {} lines, hint={}",
        source_text.chars().count(),
        output.lines.len(),
        line_height_hint
    );

    Ok(TextBlock {
        source_text,
        line_height_hint,
        translated_text: String::new(),
    })
}
