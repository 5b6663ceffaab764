// Bubble segmentation by pixel color and connected components
//
// Works on a downscaled copy of the screenshot: every pixel is classified with
// a cheap color predicate, then 4-connected components are grown by BFS and
// filtered by size and aspect ratio.

use image::{imageops, RgbaImage};
use std::collections::VecDeque;
use tracing::{debug, instrument};

use crate::core::config::SegmentationConfig;
use crate::core::types::{Rect, Segmentation};

/// Locates candidate bubble-fill regions in downscaled space
#[derive(Debug, Clone)]
pub struct BubbleSegmenter {
    config: SegmentationConfig,
}

impl BubbleSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn scale(&self) -> f32 {
        self.config.scale
    }

    /// Dimensions of the downscaled sample for a `width`x`height` source
    pub fn sample_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let sw = ((width as f32 * self.config.scale).floor() as u32).max(1);
        let sh = ((height as f32 * self.config.scale).floor() as u32).max(1);
        (sw, sh)
    }

    /// Downscale the source for classification and background sampling
    pub fn downscale(&self, source: &RgbaImage) -> RgbaImage {
        let (sw, sh) = self.sample_dimensions(source.width(), source.height());
        if (sw, sh) == source.dimensions() {
            return source.clone();
        }
        imageops::resize(source, sw, sh, imageops::FilterType::Triangle)
    }

    /// Bubble-fill color predicate: bright, warm (beige) and not UI white
    pub fn is_bubble_fill(&self, r: u8, g: u8, b: u8) -> bool {
        let c = &self.config;
        let luminance = 0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32;
        if luminance < c.min_luminance {
            return false;
        }
        if r < c.min_red || g < c.min_green || b < c.min_blue {
            return false;
        }
        if r > c.white_cutoff && g > c.white_cutoff && b > c.white_cutoff {
            return false;
        }
        (r as i16 - b as i16) >= c.min_red_blue_gap
    }

    /// Downscale `source` and segment it
    #[instrument(skip(self, source), fields(width = source.width(), height = source.height()))]
    pub fn segment(&self, source: &RgbaImage) -> Segmentation {
        let sample = self.downscale(source);
        let rects = self.find_regions(&sample);
        debug!(
            "Segmentation: {}x{} sample, {} candidate regions",
            sample.width(),
            sample.height(),
            rects.len()
        );
        Segmentation { sample, rects }
    }

    /// Flood-fill every bubble-colored component of `sample` and keep the
    /// ones that pass the size and aspect filters.
    ///
    /// Scan order is row-major, so the output is deterministic for a given
    /// buffer.
    pub fn find_regions(&self, sample: &RgbaImage) -> Vec<Rect> {
        let (sw, sh) = sample.dimensions();
        let (sw_us, sh_us) = (sw as usize, sh as usize);

        let fill: Vec<bool> = sample
            .pixels()
            .map(|p| self.is_bubble_fill(p[0], p[1], p[2]))
            .collect();
        let mut seen = vec![false; sw_us * sh_us];
        let mut queue: VecDeque<(u32, u32)> = VecDeque::new();
        let mut rects = Vec::new();

        for y in 0..sh {
            for x in 0..sw {
                let start = y as usize * sw_us + x as usize;
                if seen[start] || !fill[start] {
                    continue;
                }

                seen[start] = true;
                queue.push_back((x, y));
                let mut rect = Rect { min_x: x, min_y: y, max_x: x, max_y: y, area: 0 };

                while let Some((cx, cy)) = queue.pop_front() {
                    rect.area += 1;
                    rect.min_x = rect.min_x.min(cx);
                    rect.min_y = rect.min_y.min(cy);
                    rect.max_x = rect.max_x.max(cx);
                    rect.max_y = rect.max_y.max(cy);

                    let neighbors = [
                        (cx.checked_add(1), Some(cy)),
                        (cx.checked_sub(1), Some(cy)),
                        (Some(cx), cy.checked_add(1)),
                        (Some(cx), cy.checked_sub(1)),
                    ];
                    for (nx, ny) in neighbors {
                        let (Some(nx), Some(ny)) = (nx, ny) else { continue };
                        if nx >= sw || ny >= sh {
                            continue;
                        }
                        let ni = ny as usize * sw_us + nx as usize;
                        if seen[ni] || !fill[ni] {
                            continue;
                        }
                        seen[ni] = true;
                        queue.push_back((nx, ny));
                    }
                }

                if self.keep_region(&rect) {
                    rects.push(rect);
                }
            }
        }

        rects
    }

    /// Size and aspect filter; rejects icons, UI furniture and slivers
    fn keep_region(&self, rect: &Rect) -> bool {
        let c = &self.config;
        let (w, h) = (rect.width(), rect.height());
        if rect.area < c.min_area || w < c.min_width || h < c.min_height {
            return false;
        }
        let aspect = w as f32 / h as f32;
        (c.min_aspect..=c.max_aspect).contains(&aspect)
    }
}
