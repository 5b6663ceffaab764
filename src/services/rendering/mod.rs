use cosmic_text::{
    fontdb, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, Shaping, SwashCache,
    Weight as CosmicWeight, Wrap,
};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::config::RenderingConfig;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{Bubble, TextBlock};
use crate::services::layout::{TextLayoutEngine, TextMeasure};

pub const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Draws single lines of bold text onto a canvas
pub trait TextRenderer: TextMeasure {
    /// Draw `text` with its line box's top-left corner at (x, y)
    fn draw_line(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, font_size: f32, color: Rgba<u8>);
}

struct FontState {
    font_system: FontSystem,
    swash_cache: SwashCache,
}

/// Text renderer using cosmic-text shaping and swash rasterization.
///
/// One font system is shared by every request; the lock is held for the
/// duration of a single shape or draw call.
pub struct CosmicTextRenderer {
    state: Mutex<FontState>,
    family: String,
}

impl CosmicTextRenderer {
    pub fn new(config: &RenderingConfig) -> RenderingResult<Self> {
        let mut db = fontdb::Database::new();

        if let Some(path) = &config.font_path {
            db.load_font_file(path)
                .map_err(|e| RenderingError::FontLoad(format!("{}: {}", path, e)))?;
            debug!("Font: loaded {}", path);
        }
        if config.load_system_fonts {
            db.load_system_fonts();
        }
        if db.len() == 0 {
            return Err(RenderingError::FontLoad(
                "no fonts available; set FONT_PATH or enable LOAD_SYSTEM_FONTS".to_string(),
            ));
        }

        info!("Renderer initialized: {} font faces, family '{}'", db.len(), config.font_family);

        Ok(Self {
            state: Mutex::new(FontState {
                font_system: FontSystem::new_with_locale_and_db("en-US".to_string(), db),
                swash_cache: SwashCache::new(),
            }),
            family: config.font_family.clone(),
        })
    }

    /// Shape one unwrapped line at `font_size`
    fn shape(&self, font_system: &mut FontSystem, text: &str, font_size: f32) -> Buffer {
        let metrics = Metrics::new(font_size, (font_size * 1.15).floor());
        let mut buffer = Buffer::new(font_system, metrics);
        buffer.set_size(font_system, None, None);
        buffer.set_wrap(font_system, Wrap::None);

        let attrs = Attrs::new()
            .family(Family::Name(&self.family))
            .weight(CosmicWeight::BOLD);
        buffer.set_text(font_system, text, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(font_system, false);
        buffer
    }
}

impl TextMeasure for CosmicTextRenderer {
    fn line_width(&self, text: &str, font_size: f32) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        let mut state = self.state.lock();
        let buffer = self.shape(&mut state.font_system, text, font_size);
        buffer
            .layout_runs()
            .map(|run| run.line_w)
            .fold(0.0f32, f32::max)
    }
}

impl TextRenderer for CosmicTextRenderer {
    fn draw_line(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, font_size: f32, color: Rgba<u8>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let buffer = self.shape(&mut state.font_system, text, font_size);
        let cosmic_color = CosmicColor::rgba(color[0], color[1], color[2], color[3]);

        let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
        buffer.draw(
            &mut state.font_system,
            &mut state.swash_cache,
            cosmic_color,
            |px, py, w, h, pixel_color| {
                let alpha = pixel_color.a() as f32 / 255.0;
                if alpha <= 0.0 {
                    return;
                }
                for dy in 0..h as i32 {
                    for dx in 0..w as i32 {
                        let (ix, iy) = (x + px + dx, y + py + dy);
                        if ix < 0 || iy < 0 || ix >= cw || iy >= ch {
                            continue;
                        }
                        let existing = canvas.get_pixel_mut(ix as u32, iy as u32);
                        let inv = 1.0 - alpha;
                        existing[0] = (pixel_color.r() as f32 * alpha + existing[0] as f32 * inv) as u8;
                        existing[1] = (pixel_color.g() as f32 * alpha + existing[1] as f32 * inv) as u8;
                        existing[2] = (pixel_color.b() as f32 * alpha + existing[2] as f32 * inv) as u8;
                        existing[3] = existing[3].max(pixel_color.a());
                    }
                }
            },
        );
    }
}

/// Background color for a bubble: the downscaled sample at the bubble center
pub fn sample_background(sample: &RgbaImage, bubble: &Bubble, scale: f32) -> Rgba<u8> {
    let (cx, cy) = bubble.center();
    let s = scale as f64;
    let max_x = sample.width().saturating_sub(1) as f64;
    let max_y = sample.height().saturating_sub(1) as f64;
    let sx = (cx as f64 * s).floor().clamp(0.0, max_x) as u32;
    let sy = (cy as f64 * s).floor().clamp(0.0, max_y) as u32;
    let p = sample.get_pixel(sx, sy);
    Rgba([p[0], p[1], p[2], 255])
}

/// Flat-fill the bubble rectangle, clipped to the canvas
pub fn fill_bubble(canvas: &mut RgbaImage, bubble: &Bubble, color: Rgba<u8>) {
    let x1 = (bubble.x + bubble.w).min(canvas.width());
    let y1 = (bubble.y + bubble.h).min(canvas.height());
    for y in bubble.y..y1 {
        for x in bubble.x..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Background filled, nothing to draw
    Skipped,
    Drawn { font_size: u32, lines: usize, overflow: bool },
}

/// Erases a bubble and draws its translation, centered and fitted
#[derive(Clone)]
pub struct BubbleRenderer {
    layout: TextLayoutEngine,
    text: Arc<dyn TextRenderer>,
}

impl BubbleRenderer {
    pub fn new(layout: TextLayoutEngine, text: Arc<dyn TextRenderer>) -> Self {
        Self { layout, text }
    }

    pub fn render(
        &self,
        canvas: &mut RgbaImage,
        sample: &RgbaImage,
        scale: f32,
        bubble: &Bubble,
        block: &TextBlock,
    ) -> RenderOutcome {
        let background = sample_background(sample, bubble, scale);
        fill_bubble(canvas, bubble, background);

        let Some(layout) = self.layout.layout(
            bubble,
            &block.translated_text,
            block.line_height_hint,
            self.text.as_ref(),
        ) else {
            return RenderOutcome::Skipped;
        };

        for line in &layout.lines {
            self.text
                .draw_line(canvas, &line.text, line.x, line.y, layout.font_size as f32, TEXT_COLOR);
        }

        RenderOutcome::Drawn {
            font_size: layout.font_size,
            lines: layout.lines.len(),
            overflow: layout.overflow,
        }
    }
}
