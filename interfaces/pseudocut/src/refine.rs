//! Pixel-level mask refinement from image edge cues.

use image::DynamicImage;

use crate::GridMask;

/// Neighborhood radius of the bilateral kernel, in pixels.
const RADIUS: i32 = 4;
/// Spatial falloff of the kernel.
const SPATIAL_SIGMA: f32 = 3.0;
/// Color falloff of the kernel, in 0..255 channel units.
const RANGE_SIGMA: f32 = 14.0;
/// Smoothing iterations.
const PASSES: usize = 3;

/// Sharpen a coarse mask against image edges.
///
/// Runs an iterated joint bilateral filter over the mask, weighting each
/// neighbor by spatial distance and by color distance in the guide image, so
/// mask probability flows along homogeneous regions and stops at edges.
/// `coarse` is a row-major map matching the image dimensions; the result is a
/// probability map in [0, 1].
pub fn smooth(image: &DynamicImage, coarse: &[f32]) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    debug_assert_eq!(coarse.len(), width * height, "mask/image size mismatch");

    let pixels = rgb.as_raw();
    let mut prob: Vec<f32> = coarse.iter().map(|v| v.clamp(0.0, 1.0)).collect();

    // Spatial weights are fixed across passes.
    let mut kernel = Vec::new();
    for dy in -RADIUS..=RADIUS {
        for dx in -RADIUS..=RADIUS {
            let dist2 = (dx * dx + dy * dy) as f32;
            kernel.push((dx, dy, (-dist2 / (2.0 * SPATIAL_SIGMA * SPATIAL_SIGMA)).exp()));
        }
    }
    let inv_range = 1.0 / (2.0 * RANGE_SIGMA * RANGE_SIGMA);

    for _ in 0..PASSES {
        let mut next = vec![0f32; prob.len()];
        for y in 0..height {
            for x in 0..width {
                let center = &pixels[(y * width + x) * 3..(y * width + x) * 3 + 3];
                let mut numerator = 0.0f32;
                let mut denominator = 0.0f32;
                for &(dx, dy, spatial) in &kernel {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    let neighbor = &pixels[(ny * width + nx) * 3..(ny * width + nx) * 3 + 3];
                    let mut color2 = 0.0f32;
                    for c in 0..3 {
                        let d = center[c] as f32 - neighbor[c] as f32;
                        color2 += d * d;
                    }
                    let weight = spatial * (-color2 * inv_range).exp();
                    numerator += weight * prob[ny * width + nx];
                    denominator += weight;
                }
                // The center pixel always contributes, so the denominator is
                // strictly positive.
                next[y * width + x] = numerator / denominator;
            }
        }
        prob = next;
    }
    prob
}

/// Close interior holes of a mask: background cells unreachable from the
/// border become foreground.
pub fn fill_holes(mask: &GridMask) -> GridMask {
    let (width, height) = (mask.width(), mask.height());
    if width == 0 || height == 0 {
        return mask.clone();
    }
    let mut outside = GridMask::new(width, height);
    let mut stack = Vec::new();
    for x in 0..width {
        for y in [0, height - 1] {
            if !mask.get(x, y) && !outside.get(x, y) {
                outside.set(x, y, true);
                stack.push((x, y));
            }
        }
    }
    for y in 0..height {
        for x in [0, width - 1] {
            if !mask.get(x, y) && !outside.get(x, y) {
                outside.set(x, y, true);
                stack.push((x, y));
            }
        }
    }
    while let Some((x, y)) = stack.pop() {
        let mut visit = |nx: usize, ny: usize| {
            if !mask.get(nx, ny) && !outside.get(nx, ny) {
                outside.set(nx, ny, true);
                stack.push((nx, ny));
            }
        };
        if x > 0 {
            visit(x - 1, y);
        }
        if x + 1 < width {
            visit(x + 1, y);
        }
        if y > 0 {
            visit(x, y - 1);
        }
        if y + 1 < height {
            visit(x, y + 1);
        }
    }

    let data = (0..width * height)
        .map(|i| {
            let (x, y) = (i % width, i / width);
            mask.get(x, y) || !outside.get(x, y)
        })
        .collect();
    GridMask::from_data(width, height, data)
}
