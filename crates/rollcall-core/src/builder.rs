//! Embedding builder: encode every enrollment sample into the descriptor table.

use crate::sample::{SampleName, SAMPLE_EXTENSION};
use crate::table::{DescriptorTable, TableError};
use crate::vision::{FaceEncoder, FaceLocator, VisionError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("image directory {path}: {source}")]
    ImageDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("vision: {0}")]
    Vision(#[from] VisionError),
    #[error("table: {0}")]
    Table(#[from] TableError),
}

/// What happened to each sample file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub encoded: usize,
    pub skipped_name: usize,
    pub skipped_unreadable: usize,
    pub skipped_no_face: usize,
    pub skipped_no_descriptor: usize,
}

impl BuildReport {
    pub fn skipped(&self) -> usize {
        self.skipped_name + self.skipped_unreadable + self.skipped_no_face + self.skipped_no_descriptor
    }
}

/// `.jpg` files in `dir`, sorted by file name.
fn sample_files(dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let io_err = |source| BuildError::ImageDir {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SAMPLE_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Encode the first located face of every sample in `image_dir`.
pub fn build_table(
    image_dir: &Path,
    locator: &mut dyn FaceLocator,
    encoder: &mut dyn FaceEncoder,
) -> Result<(DescriptorTable, BuildReport), BuildError> {
    tracing::info!(dir = %image_dir.display(), "encoding faces from dataset");

    let mut table = DescriptorTable::default();
    let mut report = BuildReport::default();

    for path in sample_files(image_dir)? {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        let Some(sample) = SampleName::parse(file_name) else {
            tracing::warn!(file = %path.display(), "skipping file with unexpected name format");
            report.skipped_name += 1;
            continue;
        };

        let image = match image::open(&path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable image");
                report.skipped_unreadable += 1;
                continue;
            }
        };

        let faces = locator.locate(&image)?;
        let Some(first) = faces.first() else {
            tracing::warn!(file = %path.display(), "no face found; skipping");
            report.skipped_no_face += 1;
            continue;
        };

        let descriptor = encoder
            .encode(&image, std::slice::from_ref(first))?
            .into_iter()
            .next()
            .flatten();

        match descriptor {
            Some(d) => {
                table.push(sample.name, d);
                report.encoded += 1;
            }
            None => {
                tracing::warn!(file = %path.display(), "no descriptor computable; skipping");
                report.skipped_no_descriptor += 1;
            }
        }
    }

    tracing::info!(
        encoded = report.encoded,
        skipped = report.skipped(),
        identities = table.identity_count(),
        "encoding complete"
    );
    Ok((table, report))
}

/// Build the table from `image_dir` and overwrite `table_path` with it.
pub fn build_and_save(
    image_dir: &Path,
    table_path: &Path,
    locator: &mut dyn FaceLocator,
    encoder: &mut dyn FaceEncoder,
) -> Result<BuildReport, BuildError> {
    let (table, report) = build_table(image_dir, locator, encoder)?;
    table.save(table_path)?;
    Ok(report)
}
