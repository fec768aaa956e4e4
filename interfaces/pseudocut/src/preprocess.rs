//! Image preparation ahead of feature extraction.

use image::{DynamicImage, RgbImage};
use palette::{FromColor, Lab, LinSrgb, Srgb};

/// Tile grid side for local histogram equalization.
const TILES: usize = 8;
/// Relative clip limit applied to each tile histogram.
const CLIP_LIMIT: f32 = 1.5;
/// Histogram resolution over the lightness range.
const BINS: usize = 256;

/// Contrast-enhance an image by equalizing lightness locally in Lab space.
///
/// The image is converted to Lab, the L channel is run through CLAHE
/// (per-tile clipped histogram equalization, bilinearly blended between tile
/// centers) and the result converted back to sRGB. Chroma is untouched, so
/// colors keep their hue while low-contrast texture becomes visible to the
/// backbone. Images smaller than the tile grid are returned unchanged.
pub fn enhance_contrast(image: &DynamicImage) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    if width < TILES || height < TILES {
        return image.clone();
    }

    let lab: Vec<Lab> = rgb
        .pixels()
        .map(|p| {
            let srgb = Srgb::new(
                p.0[0] as f32 / 255.0,
                p.0[1] as f32 / 255.0,
                p.0[2] as f32 / 255.0,
            );
            Lab::from_color(srgb.into_linear())
        })
        .collect();

    let equalized = equalize_lightness(&lab, width, height);

    let out = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let i = y as usize * width + x as usize;
        let mut pixel = lab[i];
        pixel.l = equalized[i];
        let srgb: Srgb = Srgb::from_linear(LinSrgb::from_color(pixel));
        image::Rgb([
            (srgb.red.clamp(0.0, 1.0) * 255.0).round() as u8,
            (srgb.green.clamp(0.0, 1.0) * 255.0).round() as u8,
            (srgb.blue.clamp(0.0, 1.0) * 255.0).round() as u8,
        ])
    });
    DynamicImage::ImageRgb8(out)
}

fn bin_of(l: f32) -> usize {
    ((l / 100.0 * (BINS - 1) as f32).round() as isize).clamp(0, BINS as isize - 1) as usize
}

/// CLAHE over the L channel (0..100).
fn equalize_lightness(lab: &[Lab], width: usize, height: usize) -> Vec<f32> {
    let tile_w = width.div_ceil(TILES);
    let tile_h = height.div_ceil(TILES);

    // One clipped-histogram CDF mapping per tile.
    let mut mappings = vec![[0f32; BINS]; TILES * TILES];
    for ty in 0..TILES {
        for tx in 0..TILES {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut histogram = [0u32; BINS];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[bin_of(lab[y * width + x].l)] += 1;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }

            // Clip and redistribute the excess uniformly.
            let limit = ((CLIP_LIMIT * count as f32 / BINS as f32).ceil() as u32).max(1);
            let mut excess = 0u32;
            for h in histogram.iter_mut() {
                if *h > limit {
                    excess += *h - limit;
                    *h = limit;
                }
            }
            let bonus = excess / BINS as u32;
            let remainder = (excess % BINS as u32) as usize;
            let step = if remainder > 0 { BINS / remainder } else { BINS };
            for (bin, h) in histogram.iter_mut().enumerate() {
                *h += bonus;
                if remainder > 0 && bin % step == 0 && bin / step < remainder {
                    *h += 1;
                }
            }

            let mapping = &mut mappings[ty * TILES + tx];
            let mut cumulative = 0u32;
            for (bin, &h) in histogram.iter().enumerate() {
                cumulative += h;
                mapping[bin] = cumulative as f32 / count as f32 * 100.0;
            }
        }
    }

    // Blend the four surrounding tile mappings per pixel.
    let mut out = vec![0f32; width * height];
    for y in 0..height {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = (fy.floor().max(0.0) as usize).min(TILES - 1);
        let ty1 = (ty0 + 1).min(TILES - 1);
        let wy = (fy - ty0 as f32).clamp(0.0, 1.0);
        for x in 0..width {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = (fx.floor().max(0.0) as usize).min(TILES - 1);
            let tx1 = (tx0 + 1).min(TILES - 1);
            let wx = (fx - tx0 as f32).clamp(0.0, 1.0);

            let bin = bin_of(lab[y * width + x].l);
            let top = mappings[ty0 * TILES + tx0][bin] * (1.0 - wx)
                + mappings[ty0 * TILES + tx1][bin] * wx;
            let bottom = mappings[ty1 * TILES + tx0][bin] * (1.0 - wx)
                + mappings[ty1 * TILES + tx1][bin] * wx;
            out[y * width + x] = top * (1.0 - wy) + bottom * wy;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhancement_preserves_dimensions() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(32, 24, |x, y| {
            image::Rgb([(x * 3) as u8, (y * 5) as u8, 128])
        }));
        let enhanced = enhance_contrast(&image);
        assert_eq!(enhanced.width(), 32);
        assert_eq!(enhanced.height(), 24);
    }

    #[test]
    fn flat_images_stay_flat() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, image::Rgb([90; 3])));
        let enhanced = enhance_contrast(&image).to_rgb8();
        let first = enhanced.get_pixel(0, 0);
        for pixel in enhanced.pixels() {
            for c in 0..3 {
                assert!((pixel.0[c] as i32 - first.0[c] as i32).abs() <= 2);
            }
        }
    }

    #[test]
    fn enhancement_is_deterministic_and_not_identity() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(60 + (x + y) % 32) as u8; 3])
        }));
        let first = enhance_contrast(&image).to_rgb8();
        let second = enhance_contrast(&image).to_rgb8();
        assert_eq!(first, second);
        assert_ne!(first, image.to_rgb8());
    }

    #[test]
    fn tiny_images_pass_through() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30])));
        let enhanced = enhance_contrast(&image);
        assert_eq!(enhanced.to_rgb8(), image.to_rgb8());
    }
}
