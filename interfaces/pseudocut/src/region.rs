//! Seed-anchored connected-region extraction.

use std::collections::VecDeque;

use crate::GridMask;

/// The connected foreground component containing the seed patch.
pub struct DetectedRegion {
    /// Patch-resolution mask of the component.
    pub component: GridMask,
    /// Component bounds in image pixels, as (x0, y0, x1, y1). All zero when
    /// the component is empty.
    pub bbox: (u32, u32, u32, u32),
}

/// Grow the 4-connected foreground component containing `seed`.
///
/// Foreground patches not connected to the seed are excluded, so the result
/// is exactly one region. `scale` is the pixel extent of one patch as
/// (vertical, horizontal); `image_size` is the working image's (width,
/// height) and clamps the reported bounds. A seed that carries the background
/// label yields an empty component, which the caller's degeneracy check then
/// discards.
pub fn detect_box(
    bipartition: &GridMask,
    seed: usize,
    scale: (usize, usize),
    image_size: (u32, u32),
) -> DetectedRegion {
    let (width, height) = (bipartition.width(), bipartition.height());
    let mut component = GridMask::new(width, height);

    let (seed_y, seed_x) = (seed / width, seed % width);
    if bipartition.get(seed_x, seed_y) {
        let mut queue = VecDeque::new();
        component.set(seed_x, seed_y, true);
        queue.push_back((seed_x, seed_y));
        while let Some((x, y)) = queue.pop_front() {
            let mut visit = |nx: usize, ny: usize| {
                if bipartition.get(nx, ny) && !component.get(nx, ny) {
                    component.set(nx, ny, true);
                    queue.push_back((nx, ny));
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
    }

    DetectedRegion {
        bbox: pixel_bounds(&component, scale, image_size),
        component,
    }
}

fn pixel_bounds(
    component: &GridMask,
    scale: (usize, usize),
    image_size: (u32, u32),
) -> (u32, u32, u32, u32) {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for y in 0..component.height() {
        for x in 0..component.width() {
            if !component.get(x, y) {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    match bounds {
        None => (0, 0, 0, 0),
        Some((x0, y0, x1, y1)) => {
            let (sy, sx) = scale;
            (
                ((x0 * sx) as u32).min(image_size.0),
                ((y0 * sy) as u32).min(image_size.1),
                (((x1 + 1) * sx) as u32).min(image_size.0),
                (((y1 + 1) * sy) as u32).min(image_size.1),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&[u8]]) -> GridMask {
        let height = rows.len();
        let width = rows[0].len();
        let data = rows.iter().flat_map(|r| r.iter().map(|&v| v != 0)).collect();
        GridMask::from_data(width, height, data)
    }

    #[test]
    fn only_the_seed_component_survives() {
        let partition = mask_from_rows(&[
            &[1, 1, 0, 0],
            &[0, 0, 0, 0],
            &[0, 0, 1, 1],
        ]);
        // Seed in the top-left blob.
        let region = detect_box(&partition, 0, (8, 8), (32, 24));
        assert_eq!(region.component.count_ones(), 2);
        assert!(region.component.get(0, 0));
        assert!(region.component.get(1, 0));
        assert!(!region.component.get(2, 2));
        assert_eq!(region.bbox, (0, 0, 16, 8));
    }

    #[test]
    fn background_seed_yields_empty_region() {
        let partition = mask_from_rows(&[
            &[1, 0],
            &[0, 0],
        ]);
        let region = detect_box(&partition, 3, (8, 8), (16, 16));
        assert_eq!(region.component.count_ones(), 0);
        assert_eq!(region.bbox, (0, 0, 0, 0));
    }

    #[test]
    fn diagonal_blobs_are_not_connected() {
        let partition = mask_from_rows(&[
            &[1, 0],
            &[0, 1],
        ]);
        let region = detect_box(&partition, 0, (8, 8), (16, 16));
        assert_eq!(region.component.count_ones(), 1);
    }
}
