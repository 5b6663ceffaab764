// Region extraction: merge candidate rectangles and map them to bubbles
//
// Runs entirely on bounding boxes, so it is cheap compared to segmentation.

use tracing::debug;

use crate::core::config::ExtractionConfig;
use crate::core::types::{Bubble, Rect};

/// Turns segmentation output into the final, ordered bubble list
#[derive(Debug, Clone)]
pub struct RegionExtractor {
    config: ExtractionConfig,
}

impl RegionExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Greedy single-pass union of rectangles whose dilated bounds overlap.
    ///
    /// Input is sorted by `(min_y, min_x)` first (remaining fields break ties),
    /// so the result depends only on the set of rectangles, not their order.
    pub fn merge(&self, rects: &[Rect]) -> Vec<Rect> {
        let mut sorted = rects.to_vec();
        sorted.sort_by_key(|r| (r.min_y, r.min_x, r.max_y, r.max_x, r.area));

        let mut merged: Vec<Rect> = Vec::with_capacity(sorted.len());
        for rect in &sorted {
            match merged
                .iter_mut()
                .find(|m| m.overlaps_dilated(rect, self.config.merge_margin))
            {
                Some(existing) => existing.absorb(rect),
                None => merged.push(*rect),
            }
        }
        merged
    }

    /// Map a downscaled box to full resolution and apply the inward inset.
    ///
    /// Returns `None` when the inset bubble is too small to hold text.
    pub fn to_bubble(&self, rect: &Rect, scale: f32, width: u32, height: u32) -> Option<Bubble> {
        if width == 0 || height == 0 {
            return None;
        }
        let s = scale as f64;

        let x0 = ((rect.min_x as f64 / s).floor() as u32).min(width - 1);
        let y0 = ((rect.min_y as f64 / s).floor() as u32).min(height - 1);
        let x1 = (((rect.max_x + 1) as f64 / s).ceil() as u32).min(width);
        let y1 = (((rect.max_y + 1) as f64 / s).ceil() as u32).min(height);

        let w = x1.saturating_sub(x0);
        let h = y1.saturating_sub(y0);

        let inset = self
            .config
            .min_inset
            .max((w.min(h) as f32 * self.config.inset_ratio).floor() as u32);

        let bubble = Bubble {
            x: x0 + inset,
            y: y0 + inset,
            w: w.saturating_sub(inset * 2),
            h: h.saturating_sub(inset * 2),
        };

        if bubble.w > self.config.min_bubble_width && bubble.h > self.config.min_bubble_height {
            Some(bubble)
        } else {
            None
        }
    }

    /// Merge, map, filter and order: top-to-bottom, then left-to-right
    pub fn extract(&self, rects: &[Rect], scale: f32, width: u32, height: u32) -> Vec<Bubble> {
        let merged = self.merge(rects);

        let mut bubbles: Vec<Bubble> = merged
            .iter()
            .filter_map(|r| self.to_bubble(r, scale, width, height))
            .collect();
        bubbles.sort_by_key(|b| (b.y, b.x));

        debug!(
            "Extraction: {} rects -> {} merged -> {} bubbles",
            rects.len(),
            merged.len(),
            bubbles.len()
        );
        bubbles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> RegionExtractor {
        RegionExtractor::new(ExtractionConfig::default())
    }

    fn rect(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Rect {
        Rect {
            min_x,
            min_y,
            max_x,
            max_y,
            area: ((max_x - min_x + 1) * (max_y - min_y + 1)) as usize,
        }
    }

    #[test]
    fn test_nearby_rects_merge() {
        let e = extractor();
        let a = rect(10, 10, 200, 60);
        // 8px gap: within the 10px dilation
        let b = rect(10, 69, 200, 120);
        let merged = e.merge(&[a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].min_y, merged[0].max_y), (10, 120));
        assert_eq!(merged[0].area, a.area + b.area);
    }

    #[test]
    fn test_distant_rects_stay_apart() {
        let e = extractor();
        let merged = e.merge(&[rect(10, 10, 200, 60), rect(10, 100, 200, 150)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_order_insensitive() {
        let e = extractor();
        let rects = vec![
            rect(10, 10, 200, 60),
            rect(205, 20, 300, 70),
            rect(10, 300, 150, 360),
            rect(400, 5, 520, 50),
            rect(160, 355, 260, 400),
        ];
        let mut expected = e.merge(&rects);
        expected.sort_by_key(|r| (r.min_y, r.min_x));

        let mut reversed = rects.clone();
        reversed.reverse();
        let mut rotated = rects.clone();
        rotated.rotate_left(2);

        for shuffled in [reversed, rotated] {
            let mut got = e.merge(&shuffled);
            got.sort_by_key(|r| (r.min_y, r.min_x));
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_mapping_and_inset() {
        let e = extractor();
        // 150x50 downscaled -> 600x200 full resolution at 0.25
        let bubble = e.to_bubble(&rect(10, 20, 159, 69), 0.25, 2000, 1000).unwrap();
        // inset = max(8, floor(0.05 * 200)) = 10
        assert_eq!(bubble, Bubble { x: 50, y: 90, w: 580, h: 180 });
    }

    #[test]
    fn test_mapping_clamped_to_image() {
        let e = extractor();
        let bubble = e.to_bubble(&rect(0, 0, 149, 49), 0.25, 500, 150).unwrap();
        // x1 clamped to 500, y1 to 150; inset = max(8, floor(0.05 * 150)) = 8
        assert_eq!(bubble, Bubble { x: 8, y: 8, w: 484, h: 134 });
    }

    #[test]
    fn test_small_bubbles_dropped() {
        let e = extractor();
        // 24x10 downscaled -> 96x40; after 8px inset -> 80x24, not > 80
        assert!(e.to_bubble(&rect(0, 0, 23, 9), 0.25, 1000, 1000).is_none());
    }

    #[test]
    fn test_extract_sorted_and_sized() {
        let e = extractor();
        let rects = vec![
            rect(10, 300, 200, 360),
            rect(250, 10, 400, 60),
            rect(10, 10, 200, 60),
            rect(0, 500, 10, 505),
        ];
        let bubbles = e.extract(&rects, 0.25, 2000, 3000);
        assert_eq!(bubbles.len(), 3);
        for pair in bubbles.windows(2) {
            assert!((pair[0].y, pair[0].x) <= (pair[1].y, pair[1].x));
        }
        assert!(bubbles.iter().all(|b| b.w > 80 && b.h > 30));
        // inset = max(8, floor(0.05 * 204)) = 10
        assert_eq!((bubbles[0].x, bubbles[0].y), (50, 50));
        assert_eq!(bubbles[1].x, 1010);
    }
}
