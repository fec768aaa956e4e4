//! COCO-style annotation documents and run-length mask encoding.
//!
//! Masks are encoded column-major with the compact ASCII `counts` string used
//! by the standard detection tooling, so chunk outputs can be consumed by any
//! COCO-compatible loader.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::GridMask;

/// Dataset-level metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Free-form dataset description.
    pub description: String,
    /// Project url.
    pub url: String,
    /// Schema version.
    pub version: String,
    /// Year of creation.
    pub year: i32,
    /// Who produced the dataset.
    pub contributor: String,
    /// Creation timestamp.
    pub date_created: String,
}

/// License entry referenced by image records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    /// License id.
    pub id: u32,
    /// Human-readable name.
    pub name: String,
    /// License url.
    pub url: String,
}

/// Category entry. This pipeline emits a single "foreground" category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Category id.
    pub id: u32,
    /// Category name.
    pub name: String,
    /// Parent category name.
    pub supercategory: String,
}

/// One source image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Image id, unique within one document.
    pub id: u32,
    /// File name within the dataset directory.
    pub file_name: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Capture or processing timestamp.
    pub date_captured: String,
    /// License id.
    pub license: u32,
    /// Mirror url, if any.
    pub coco_url: String,
    /// Mirror url, if any.
    pub flickr_url: String,
}

/// One accepted pseudo-mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Annotation id, unique within one document.
    pub id: u32,
    /// The image this mask belongs to.
    pub image_id: u32,
    /// Category id; always the foreground category.
    pub category_id: u32,
    /// Whether the region is a crowd; always 0 here.
    pub iscrowd: u32,
    /// Foreground area in pixels.
    pub area: u64,
    /// Bounding box as [x, y, width, height].
    pub bbox: [f64; 4],
    /// Run-length encoded region.
    pub segmentation: Rle,
    /// Mask width in pixels.
    pub width: u32,
    /// Mask height in pixels.
    pub height: u32,
}

/// A complete annotation document for one chunk of images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoDocument {
    /// Dataset metadata.
    pub info: Info,
    /// Available licenses.
    pub licenses: Vec<License>,
    /// Category list.
    pub categories: Vec<Category>,
    /// Image records.
    pub images: Vec<ImageRecord>,
    /// Annotation records.
    pub annotations: Vec<AnnotationRecord>,
}

/// A compressed run-length encoded binary mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rle {
    /// Mask dimensions as [height, width].
    pub size: [u32; 2],
    /// Compressed run counts.
    pub counts: String,
}

/// Id of the single foreground category.
pub const FOREGROUND_CATEGORY: u32 = 1;

/// Encode a mask column-major into a compressed RLE.
pub fn encode(mask: &GridMask) -> Rle {
    let (width, height) = (mask.width() as u32, mask.height() as u32);
    let mut counts = Vec::new();
    let mut current = false;
    let mut run = 0u32;
    for x in 0..mask.width() {
        for y in 0..mask.height() {
            let v = mask.get(x, y);
            if v != current {
                counts.push(run);
                run = 0;
                current = v;
            }
            run += 1;
        }
    }
    counts.push(run);
    Rle {
        size: [height, width],
        counts: compress_counts(&counts),
    }
}

/// Decode an RLE back to a column-major {0, 1} buffer of length h * w.
pub fn decode(rle: &Rle) -> Vec<u8> {
    let total = (rle.size[0] as usize) * (rle.size[1] as usize);
    let mut mask = vec![0u8; total];
    let mut index = 0usize;
    let mut value = 0u8;
    for count in decompress_counts(&rle.counts) {
        let end = (index + count as usize).min(total);
        for slot in &mut mask[index..end] {
            *slot = value;
        }
        index = end;
        value = 1 - value;
    }
    mask
}

/// Foreground area of an RLE mask: the sum of the odd-indexed runs.
pub fn area(rle: &Rle) -> u64 {
    decompress_counts(&rle.counts)
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, &c)| c as u64)
        .sum()
}

/// Bounding box [x, y, width, height] of an RLE mask. All zero when empty.
pub fn to_bbox(rle: &Rle) -> [f64; 4] {
    let h = rle.size[0] as usize;
    if h == 0 {
        return [0.0; 4];
    }
    let counts = decompress_counts(&rle.counts);
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    let mut position = 0usize;
    for (i, &count) in counts.iter().enumerate() {
        let count = count as usize;
        if i % 2 == 1 && count > 0 {
            let start = position;
            let end = position + count - 1;
            let (x0, y0) = (start / h, start % h);
            let (x1, y1) = (end / h, end % h);
            // A run crossing columns spans every row.
            let (lo_y, hi_y) = if x0 != x1 { (0, h - 1) } else { (y0.min(y1), y0.max(y1)) };
            bounds = Some(match bounds {
                None => (x0, lo_y, x1, hi_y),
                Some((bx0, by0, bx1, by1)) => {
                    (bx0.min(x0), by0.min(lo_y), bx1.max(x1), by1.max(hi_y))
                }
            });
        }
        position += count;
    }
    match bounds {
        None => [0.0; 4],
        Some((x0, y0, x1, y1)) => [
            x0 as f64,
            y0 as f64,
            (x1 - x0 + 1) as f64,
            (y1 - y0 + 1) as f64,
        ],
    }
}

/// Pack run counts into the compact ASCII form: 5 bits per character with a
/// continuation flag, runs past the second stored as deltas.
fn compress_counts(counts: &[u32]) -> String {
    let mut out = String::new();
    for i in 0..counts.len() {
        let mut x = counts[i] as i64;
        if i > 2 {
            x -= counts[i - 2] as i64;
        }
        let mut more = true;
        while more {
            let mut c = (x & 0x1f) as u8;
            x >>= 5;
            more = if c & 0x10 != 0 { x != -1 } else { x != 0 };
            if more {
                c |= 0x20;
            }
            out.push((c + 48) as char);
        }
    }
    out
}

fn decompress_counts(encoded: &str) -> Vec<u32> {
    let bytes = encoded.as_bytes();
    let mut counts: Vec<u32> = Vec::new();
    let mut position = 0usize;
    while position < bytes.len() {
        let mut x = 0i64;
        let mut shift = 0u32;
        loop {
            let c = bytes[position] as i64 - 48;
            x |= (c & 0x1f) << shift;
            position += 1;
            shift += 5;
            if c & 0x20 == 0 {
                if c & 0x10 != 0 {
                    x |= -1i64 << shift;
                }
                break;
            }
        }
        if counts.len() > 2 {
            x += counts[counts.len() - 2] as i64;
        }
        counts.push(x as u32);
    }
    counts
}

/// Chunk-scoped assembler for one [`CocoDocument`].
///
/// Created fresh per chunk and consumed by [`finish`](CocoBuilder::finish),
/// so no annotation state outlives its chunk.
pub struct CocoBuilder {
    images: Vec<ImageRecord>,
    annotations: Vec<AnnotationRecord>,
    next_image_id: u32,
    next_annotation_id: u32,
}

impl CocoBuilder {
    /// An empty builder with fresh id counters.
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            annotations: Vec::new(),
            next_image_id: 1,
            next_annotation_id: 1,
        }
    }

    /// Record a source image, returning its id.
    pub fn add_image(&mut self, file_name: &str, width: u32, height: u32) -> u32 {
        let id = self.next_image_id;
        self.next_image_id += 1;
        self.images.push(ImageRecord {
            id,
            file_name: file_name.to_owned(),
            width,
            height,
            date_captured: timestamp(),
            license: 1,
            coco_url: String::new(),
            flickr_url: String::new(),
        });
        id
    }

    /// Encode a mask as an annotation of `image_id`.
    ///
    /// Returns the annotation id, or `None` when the mask's area is below one
    /// pixel and nothing was recorded.
    pub fn add_annotation(&mut self, image_id: u32, mask: &GridMask) -> Option<u32> {
        let rle = encode(mask);
        let area = area(&rle);
        if area < 1 {
            return None;
        }
        let bbox = to_bbox(&rle);
        let id = self.next_annotation_id;
        self.next_annotation_id += 1;
        self.annotations.push(AnnotationRecord {
            id,
            image_id,
            category_id: FOREGROUND_CATEGORY,
            iscrowd: 0,
            area,
            bbox,
            segmentation: rle,
            width: mask.width() as u32,
            height: mask.height() as u32,
        });
        Some(id)
    }

    /// Number of images recorded so far.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of annotations recorded so far.
    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// Assemble the final document.
    pub fn finish(self) -> CocoDocument {
        CocoDocument {
            info: Info {
                description: "pseudo-masks from spectral patch grouping".to_owned(),
                url: String::new(),
                version: "1.0".to_owned(),
                year: 2024,
                contributor: "pseudocut".to_owned(),
                date_created: timestamp(),
            },
            licenses: vec![License {
                id: 1,
                name: "Apache License".to_owned(),
                url: String::new(),
            }],
            categories: vec![Category {
                id: FOREGROUND_CATEGORY,
                name: "fg".to_owned(),
                supercategory: "fg".to_owned(),
            }],
            images: self.images,
            annotations: self.annotations,
        }
    }
}

impl Default for CocoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
