//! Fill-the-gap page composition and plain width normalisation.

use image::RgbImage;
use log::{debug, trace};
use std::path::PathBuf;

use super::{FlushPolicy, HeightPacker, load_rgb, resize_to_width};

/// Composes the images at `paths` into pages exactly `target_height` tall
/// (the last page may be shorter), all `target_width` wide.
///
/// Images are decoded one at a time and scaled to `target_width` first.
/// Undecodable images are skipped. Rows are never duplicated or dropped:
/// the sum of page heights equals the sum of the width-normalised inputs.
pub fn compose(paths: &[PathBuf], target_width: u32, target_height: u32) -> Vec<RgbImage> {
    let mut packer = HeightPacker::new(target_height, FlushPolicy::FillExact);

    for path in paths {
        let Some(image) = load_rgb(path) else {
            continue;
        };
        packer.push(resize_to_width(image, target_width));
    }

    let pages = packer.finish();
    debug!("  Processed into {} pages in memory.", pages.len());
    pages
}

/// Scales each image to `target_width`, with no recombination.
pub fn resize_only(paths: &[PathBuf], target_width: u32) -> Vec<RgbImage> {
    let mut output = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        if let Some(image) = load_rgb(path) {
            output.push(resize_to_width(image, target_width));
            trace!("    Resized image {}/{} in memory.", i + 1, paths.len());
        }
    }
    debug!("  Resized {} pages in memory.", output.len());
    output
}
