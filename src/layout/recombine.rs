//! Uniform downscaling and long-strip recombination.
//!
//! Scaling pages to 50% would otherwise double the page count; recombining
//! re-stacks the smaller pages into strips no taller than the original
//! page height.

use image::RgbImage;
use log::debug;
use rayon::prelude::*;

use super::{FlushPolicy, HeightPacker, scale_image};

/// Scales every page by `factor`, preserving each page's aspect ratio.
/// Output order matches input order.
pub fn scale_pages(pages: Vec<RgbImage>, factor: f64) -> Vec<RgbImage> {
    pages
        .par_iter()
        .map(|page| scale_image(page, factor))
        .collect()
}

/// Re-stacks pages into strips: a strip is closed when adding the next page
/// would exceed `recombine_height` and the strip already holds something.
/// A single page taller than `recombine_height` becomes its own strip.
pub fn recombine(pages: Vec<RgbImage>, recombine_height: u32) -> Vec<RgbImage> {
    if pages.is_empty() {
        return Vec::new();
    }

    let input_count = pages.len();
    let mut packer = HeightPacker::new(recombine_height, FlushPolicy::WouldExceed);
    for page in pages {
        packer.push(page);
    }
    let strips = packer.finish();

    debug!(
        "  Re-combined {} scaled pages into {} long strips.",
        input_count,
        strips.len()
    );
    strips
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn halves_are_restacked_into_full_pages() {
        let pages: Vec<RgbImage> = (0..5)
            .map(|_| RgbImage::from_pixel(100, 200, Rgb([1, 2, 3])))
            .collect();
        let scaled = scale_pages(pages, 0.5);
        assert!(scaled.iter().all(|p| p.dimensions() == (50, 100)));

        let strips = recombine(scaled, 200);
        let heights: Vec<u32> = strips.iter().map(|s| s.height()).collect();
        assert_eq!(heights, vec![200, 200, 100]);
        assert!(strips.iter().all(|s| s.width() == 50));
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(recombine(Vec::new(), 100).is_empty());
    }
}
