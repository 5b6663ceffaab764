// Data model shared by the pipeline stages

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box of a connected component, in downscaled space.
///
/// Corners are inclusive: a single pixel at (3, 4) has `min_x == max_x == 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// Number of pixels accumulated into this box
    pub area: usize,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Whether `other` overlaps this box after dilating it by `margin` pixels
    pub fn overlaps_dilated(&self, other: &Rect, margin: i64) -> bool {
        let ax0 = self.min_x as i64 - margin;
        let ay0 = self.min_y as i64 - margin;
        let ax1 = self.max_x as i64 + margin;
        let ay1 = self.max_y as i64 + margin;

        !((other.max_x as i64) < ax0
            || (other.min_x as i64) > ax1
            || (other.max_y as i64) < ay0
            || (other.min_y as i64) > ay1)
    }

    /// Grow this box to cover `other`, summing the pixel areas
    pub fn absorb(&mut self, other: &Rect) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
        self.area += other.area;
    }
}

/// A detected bubble in full-resolution coordinates (post-inset).
///
/// `w` and `h` are always positive; the extractor drops anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bubble {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Bubble {
    /// Center point in full-resolution coordinates
    pub fn center(&self) -> (f32, f32) {
        (self.x as f32 + self.w as f32 / 2.0, self.y as f32 + self.h as f32 / 2.0)
    }
}

/// Text associated with a bubble by index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub source_text: String,
    /// Median OCR line height in the preprocessed working space
    pub line_height_hint: u32,
    pub translated_text: String,
}

/// One recognized line reported by the OCR engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub height: f32,
}

/// Raw OCR collaborator output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub lines: Vec<OcrLine>,
}

/// Output of the segmentation stage.
///
/// The downscaled sample is kept alive until rendering so that background
/// colors can be read without touching the full-resolution source again.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub sample: RgbaImage,
    pub rects: Vec<Rect>,
}

/// Outcome of one batch translation, for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationOutcome {
    Primary,
    Fallback,
    /// Both providers failed; source text is rendered untranslated
    Untranslated,
    /// Nothing to translate
    Empty,
}

/// Per-invocation summary, logged at the end of `translate_bubbles`
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub width: u32,
    pub height: u32,
    pub candidate_regions: usize,
    pub bubbles: usize,
    pub ocr_failures: usize,
    pub rendered: usize,
    pub overflows: usize,
    pub passthrough: bool,
    pub translation: Option<TranslationOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Rect {
        Rect { min_x, min_y, max_x, max_y, area: 1 }
    }

    #[test]
    fn test_rect_dimensions_inclusive() {
        let r = rect(3, 4, 3, 4);
        assert_eq!(r.width(), 1);
        assert_eq!(r.height(), 1);
    }

    #[test]
    fn test_overlaps_dilated() {
        let a = rect(0, 0, 10, 10);
        assert!(a.overlaps_dilated(&rect(20, 0, 30, 10), 10));
        assert!(!a.overlaps_dilated(&rect(21, 0, 30, 10), 10));
        assert!(!a.overlaps_dilated(&rect(20, 0, 30, 10), 0));
        assert!(a.overlaps_dilated(&rect(5, 5, 6, 6), 0));
    }

    #[test]
    fn test_absorb_sums_area() {
        let mut a = Rect { min_x: 0, min_y: 0, max_x: 10, max_y: 10, area: 100 };
        a.absorb(&Rect { min_x: 5, min_y: 12, max_x: 30, max_y: 20, area: 50 });
        assert_eq!((a.min_x, a.min_y, a.max_x, a.max_y), (0, 0, 30, 20));
        assert_eq!(a.area, 150);
    }
}
