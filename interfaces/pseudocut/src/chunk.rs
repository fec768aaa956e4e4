//! Checkpointed chunk iteration over an image directory.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use rdino::DinoFeatures;

use crate::coco::{CocoBuilder, CocoDocument};
use crate::discover::{self, DiscoverOptions};
use crate::error::Result;
use crate::{export, preprocess};

/// Name of the file recording the last completed chunk index.
const CHECKPOINT_FILE: &str = "checkpoint.txt";

/// Options for a chunked pseudo-mask generation run.
pub struct RunOptions {
    /// Directory of input images.
    pub dataset_dir: PathBuf,
    /// Directory receiving chunk documents and the checkpoint file.
    pub out_dir: PathBuf,
    /// Number of images per chunk.
    pub chunk_size: usize,
    /// Process only this chunk, for sharding a dataset across jobs. The
    /// checkpoint file is neither consulted nor written in that mode.
    pub job_index: Option<u64>,
    /// Discovery parameters shared by every image.
    pub discover: DiscoverOptions,
}

impl RunOptions {
    /// Options with default discovery parameters and 1000-image chunks.
    pub fn new(dataset_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            out_dir: out_dir.into(),
            chunk_size: 1000,
            job_index: None,
            discover: DiscoverOptions::default(),
        }
    }
}

/// Totals accumulated over a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    /// Chunks completed in this invocation.
    pub chunks: usize,
    /// Images successfully processed.
    pub images: usize,
    /// Annotations accepted.
    pub annotations: usize,
    /// Images skipped after an error.
    pub skipped: usize,
}

/// Process every pending chunk of the dataset directory.
///
/// Chunks at or below the checkpoint marker are skipped, so a restarted run
/// resumes exactly after the last chunk whose document reached disk. Failures
/// inside one image are logged and skip only that image; failures writing the
/// chunk document or the checkpoint abort the run.
pub fn run(backbone: &DinoFeatures, options: &RunOptions) -> Result<RunSummary> {
    fs::create_dir_all(&options.out_dir)?;
    let chunks = list_chunks(&options.dataset_dir, options.chunk_size)?;
    let completed = read_checkpoint(&options.out_dir)?;
    let mut summary = RunSummary::default();

    for (index, files) in chunks.iter().enumerate() {
        match options.job_index {
            Some(job) => {
                if index as u64 != job {
                    continue;
                }
            }
            None => {
                if completed.is_some_and(|done| index as u64 <= done) {
                    continue;
                }
            }
        }
        tracing::info!("processing chunk {index} ({} images)", files.len());

        let document = process_chunk(backbone, files, &options.discover, &mut summary)?;
        let path = options
            .out_dir
            .join(format!("pseudo_masks_chunk_{index}.json"));
        let file = fs::File::create(&path)?;
        serde_json::to_writer(file, &document)?;
        if options.job_index.is_none() {
            write_checkpoint(&options.out_dir, index as u64)?;
        }
        summary.chunks += 1;

        tracing::info!(
            "wrote {} ({} images, {} annotations)",
            path.display(),
            document.images.len(),
            document.annotations.len(),
        );
    }
    Ok(summary)
}

/// Process one chunk into a self-contained annotation document.
fn process_chunk(
    backbone: &DinoFeatures,
    files: &[PathBuf],
    options: &DiscoverOptions,
    summary: &mut RunSummary,
) -> Result<CocoDocument> {
    let mut builder = CocoBuilder::new();
    for path in files {
        match process_image(backbone, path, options, &mut builder) {
            Ok(accepted) => {
                summary.images += 1;
                summary.annotations += accepted;
            }
            Err(error) => {
                summary.skipped += 1;
                tracing::warn!("skipping {}: {error}", path.display());
            }
        }
    }
    Ok(builder.finish())
}

/// Run the full pipeline for one image, recording its accepted masks.
fn process_image(
    backbone: &DinoFeatures,
    path: &Path,
    options: &DiscoverOptions,
    builder: &mut CocoBuilder,
) -> Result<usize> {
    let image = image::open(path)?;
    let original_size = (image.width(), image.height());

    let enhanced = preprocess::enhance_contrast(&image);
    let features = backbone.patch_features(&enhanced)?;
    let dims = (features.grid_height(), features.grid_width());
    let working = features.image();
    let image_size = (working.height() as usize, working.width() as usize);

    let discovery = discover::discover_objects(features.features(), dims, image_size, options)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let image_id = builder.add_image(&file_name, original_size.0, original_size.1);
    Ok(export::export_rounds(
        &discovery,
        working,
        original_size,
        image_id,
        builder,
    ))
}

/// The dataset's files, naturally sorted and split into fixed-size chunks.
///
/// Natural ordering keeps numbered files in numeric order, so chunk
/// boundaries are stable across runs and machines.
pub fn list_chunks(dir: &Path, chunk_size: usize) -> Result<Vec<Vec<PathBuf>>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| {
        let a = a.file_name().map(|n| n.to_string_lossy().into_owned());
        let b = b.file_name().map(|n| n.to_string_lossy().into_owned());
        natural_cmp(
            a.as_deref().unwrap_or(""),
            b.as_deref().unwrap_or(""),
        )
    });
    Ok(files
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// The last completed chunk index, or `None` when no checkpoint exists.
pub fn read_checkpoint(out_dir: &Path) -> Result<Option<u64>> {
    let path = out_dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    match contents.trim().parse() {
        Ok(index) => Ok(Some(index)),
        Err(_) => {
            tracing::warn!("ignoring malformed checkpoint {}", path.display());
            Ok(None)
        }
    }
}

/// Durably record `chunk` as the last completed chunk index.
pub fn write_checkpoint(out_dir: &Path, chunk: u64) -> Result<()> {
    fs::write(out_dir.join(CHECKPOINT_FILE), chunk.to_string())?;
    Ok(())
}

/// Digit-aware file name ordering: embedded numbers compare by value, other
/// characters byte-wise.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.as_bytes();
    let mut right = b.as_bytes();
    loop {
        match (left.first(), right.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&x), Some(&y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let (ln, lrest) = take_digits(left);
                    let (rn, rrest) = take_digits(right);
                    match compare_numeric(ln, rn) {
                        Ordering::Equal => {
                            left = lrest;
                            right = rrest;
                        }
                        other => return other,
                    }
                } else {
                    match x.cmp(&y) {
                        Ordering::Equal => {
                            left = &left[1..];
                            right = &right[1..];
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

fn take_digits(bytes: &[u8]) -> (&[u8], &[u8]) {
    let end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    bytes.split_at(end)
}

/// Compare digit runs of arbitrary length by numeric value.
fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(digits: &[u8]) -> &[u8] {
    let start = digits
        .iter()
        .position(|&b| b != b'0')
        .unwrap_or(digits.len());
    &digits[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pseudocut-{label}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn checkpoint_round_trips_and_skips_completed_chunks() {
        let dir = scratch_dir("checkpoint");
        assert_eq!(read_checkpoint(&dir).unwrap(), None);
        write_checkpoint(&dir, 3).unwrap();
        let marker = read_checkpoint(&dir).unwrap();
        assert_eq!(marker, Some(3));
        // The driver's skip rule: everything at or below the marker is done.
        let pending: Vec<u64> = (0..6)
            .filter(|&i| !marker.is_some_and(|done| i <= done))
            .collect();
        assert_eq!(pending, vec![4, 5]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_checkpoints_are_ignored() {
        let dir = scratch_dir("badcheckpoint");
        fs::write(dir.join(CHECKPOINT_FILE), "not a number").unwrap();
        assert_eq!(read_checkpoint(&dir).unwrap(), None);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn chunks_are_naturally_ordered() {
        let dir = scratch_dir("chunks");
        for name in ["img_10.jpg", "img_2.jpg", "img_1.jpg", "extra.jpg"] {
            fs::write(dir.join(name), b"x").unwrap();
        }
        let chunks = list_chunks(&dir, 3).unwrap();
        let names: Vec<String> = chunks
            .iter()
            .flatten()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["extra.jpg", "img_1.jpg", "img_2.jpg", "img_10.jpg"]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn natural_ordering_handles_zeros_and_long_numbers() {
        assert_eq!(natural_cmp("a2", "a10"), Ordering::Less);
        assert_eq!(natural_cmp("a02", "a2"), Ordering::Equal);
        assert_eq!(
            natural_cmp("99999999999999999998", "99999999999999999999"),
            Ordering::Less
        );
        assert_eq!(natural_cmp("b1", "a9"), Ordering::Greater);
    }
}
