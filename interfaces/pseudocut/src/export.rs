//! Refinement gate and annotation encoding for discovered masks.

use image::DynamicImage;

use crate::coco::CocoBuilder;
use crate::discover::Discovery;
use crate::{metric, refine, GridMask};

/// Agreement with the raw spectral mask below which a refinement is
/// considered to have diverged and its round is dropped.
pub const REFINE_AGREEMENT_IOU: f32 = 0.5;

/// Refine, filter and encode one image's discovered masks into `builder`.
///
/// Each round's working-resolution map is sharpened against the working
/// image, hole-filled at the 0.5 level, discarded when the refined mask
/// disagrees with the raw one beyond [`REFINE_AGREEMENT_IOU`], resized to the
/// original image dimensions and recorded. Returns the number of annotations
/// accepted; rounds rejected upstream arrive all-zero and are dropped here.
pub fn export_rounds(
    discovery: &Discovery,
    working_image: &DynamicImage,
    original_size: (u32, u32),
    image_id: u32,
    builder: &mut CocoBuilder,
) -> usize {
    let (width, height) = discovery.size;
    let mut accepted = 0;
    for raw in &discovery.masks {
        let refined = refine::smooth(working_image, raw);
        let refined_mask = refine::fill_holes(&GridMask::from_map(&refined, width, height, 0.5));
        if metric::overlap_ratio_maps(raw, &refined_mask.to_f32()) < REFINE_AGREEMENT_IOU {
            continue;
        }
        let full_resolution = resize_mask(&refined_mask, original_size);
        if builder.add_annotation(image_id, &full_resolution).is_some() {
            accepted += 1;
        }
    }
    accepted
}

/// Nearest-neighbor resize of a binary mask to the target (width, height).
fn resize_mask(mask: &GridMask, target: (u32, u32)) -> GridMask {
    let mut gray = image::GrayImage::new(mask.width() as u32, mask.height() as u32);
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            let value = if mask.get(x, y) { 255 } else { 0 };
            gray.put_pixel(x as u32, y as u32, image::Luma([value]));
        }
    }
    let resized = image::imageops::resize(
        &gray,
        target.0,
        target.1,
        image::imageops::FilterType::Nearest,
    );
    GridMask::from_data(
        target.0 as usize,
        target.1 as usize,
        resized.pixels().map(|p| p.0[0] > 127).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coco;
    use image::RgbImage;

    fn block_discovery(size: usize) -> Discovery {
        // One crisp square object in the top-left quadrant.
        let mut map = vec![0f32; size * size];
        for y in 2..size / 2 {
            for x in 2..size / 2 {
                map[y * size + x] = 1.0;
            }
        }
        Discovery {
            masks: vec![map, vec![0f32; size * size]],
            eigenvector_maps: vec![vec![0f32; size * size]; 2],
            size: (size, size),
        }
    }

    fn matching_image(size: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, y| {
            let inside = (2..size / 2).contains(&x) && (2..size / 2).contains(&y);
            image::Rgb(if inside { [220, 40, 40] } else { [30, 30, 30] })
        }))
    }

    #[test]
    fn crisp_masks_survive_refinement_and_zero_rounds_do_not() {
        let discovery = block_discovery(32);
        let image = matching_image(32);
        let mut builder = CocoBuilder::new();
        let image_id = builder.add_image("toy.jpg", 64, 64);
        let accepted = export_rounds(&discovery, &image, (64, 64), image_id, &mut builder);
        assert_eq!(accepted, 1);
        let document = builder.finish();
        assert_eq!(document.annotations.len(), 1);
        let annotation = &document.annotations[0];
        // The mask was resized 2x; the area scales by roughly 4.
        let expected = (32 / 2 - 2) * (32 / 2 - 2) * 4;
        let actual = annotation.area as i64;
        assert!((actual - expected as i64).abs() < expected as i64 / 4);
        assert_eq!(coco::area(&annotation.segmentation), annotation.area);
    }

    #[test]
    fn mask_resizing_is_nearest_neighbor() {
        let mut mask = GridMask::new(2, 2);
        mask.set(0, 0, true);
        let resized = resize_mask(&mask, (4, 4));
        assert!(resized.get(0, 0));
        assert!(resized.get(1, 1));
        assert!(!resized.get(2, 2));
        assert_eq!(resized.count_ones(), 4);
    }
}
