// Text layout: fit translated text into a bubble
//
// Pure geometry over a width oracle, so the search can be exercised without
// loading any font.

use tracing::debug;

use crate::core::config::LayoutConfig;
use crate::core::types::Bubble;

/// Width oracle for a single line of text at a given pixel size
pub trait TextMeasure: Send + Sync {
    fn line_width(&self, text: &str, font_size: f32) -> f32;
}

/// One wrapped line with its top-left draw position
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub font_size: u32,
    pub line_height: u32,
    pub lines: Vec<PlacedLine>,
    /// Text still taller than the usable area at the final size
    pub overflow: bool,
    /// Number of size decrements taken by the search
    pub iterations: u32,
}

/// Padded drawing area inside a bubble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBox {
    pub pad: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct TextLayoutEngine {
    config: LayoutConfig,
}

impl TextLayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn content_box(&self, bubble: &Bubble) -> ContentBox {
        let c = &self.config;
        let pad = c.min_padding.max(floor_mul(bubble.w.min(bubble.h), c.padding_ratio));
        ContentBox {
            pad,
            width: bubble.w.saturating_sub(pad * 2).max(10),
            height: bubble.h.saturating_sub(pad * 2).max(10),
        }
    }

    /// Upper bound of the font-size search, derived from the OCR line height
    pub fn start_size(&self, line_height_hint: u32, bubble_h: u32) -> u32 {
        let c = &self.config;
        let from_hint = (line_height_hint as f32 * c.hint_scale).round() as u32;
        let cap = floor_mul(bubble_h, c.max_height_ratio);
        from_hint.max(c.min_start_size).min(cap).max(c.floor_size)
    }

    pub fn line_height(&self, font_size: u32) -> u32 {
        floor_mul(font_size, self.config.line_height_factor)
    }

    /// Layout `text` inside `bubble`; `None` when there is nothing to draw
    pub fn layout<M: TextMeasure + ?Sized>(
        &self,
        bubble: &Bubble,
        text: &str,
        line_height_hint: u32,
        measure: &M,
    ) -> Option<TextLayout> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let content = self.content_box(bubble);
        let max_w = content.width as f32;
        let mut font_size = self.start_size(line_height_hint, bubble.h);
        let mut iterations = 0;

        let mut lines = wrap_text(text, font_size as f32, max_w, measure);
        while self.block_height(lines.len(), font_size) > content.height
            && font_size > self.config.floor_size
        {
            font_size -= 1;
            iterations += 1;
            lines = wrap_text(text, font_size as f32, max_w, measure);
        }

        let line_height = self.line_height(font_size);
        let total_h = self.block_height(lines.len(), font_size);
        let overflow = total_h > content.height;
        if overflow {
            debug!(
                "Layout overflow: {} lines at {}px need {}px, have {}px",
                lines.len(),
                font_size,
                total_h,
                content.height
            );
        }

        let start_y = (bubble.y + content.pad) as i64
            + ((content.height as i64 - total_h as i64) / 2).max(0);
        let placed = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let width = measure.line_width(&line, font_size as f32);
                let slack = ((max_w - width) / 2.0).floor().max(0.0) as i64;
                PlacedLine {
                    x: ((bubble.x + content.pad) as i64 + slack) as i32,
                    y: (start_y + i as i64 * line_height as i64) as i32,
                    text: line,
                    width,
                }
            })
            .collect();

        Some(TextLayout {
            font_size,
            line_height,
            lines: placed,
            overflow,
            iterations,
        })
    }

    fn block_height(&self, line_count: usize, font_size: u32) -> u32 {
        line_count as u32 * self.line_height(font_size)
    }
}

/// `floor(v × k)`, tolerant of ratios like 0.7 that f32 cannot represent
fn floor_mul(v: u32, k: f32) -> u32 {
    (v as f64 * k as f64 + 1e-4).floor() as u32
}

/// Greedy word wrap: a word joins the current line when the joined line
/// fits or the line is still empty, so an overlong word gets a line of its own
pub fn wrap_text<M: TextMeasure + ?Sized>(
    text: &str,
    font_size: f32,
    max_width: f32,
    measure: &M,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if measure.line_width(&candidate, font_size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Monospace approximation: every char advances `ratio × font_size`
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvance(pub f32);

impl TextMeasure for FixedAdvance {
    fn line_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * font_size * self.0
    }
}
