//! SeetaFace frontal face locator via the `rustface` crate.

use rollcall_core::{BoundingBox, FaceLocator, VisionError};
use image::GrayImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("locator model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to read locator model {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<LocatorError> for VisionError {
    fn from(e: LocatorError) -> Self {
        match e {
            LocatorError::ModelNotFound(path) => VisionError::ModelNotFound(path),
            other => VisionError::ModelLoad(other.to_string()),
        }
    }
}

/// Detector tuning. Defaults favor webcam-distance frontal faces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatorSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: (u32, u32),
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            min_face_size: 40,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        }
    }
}

pub struct SeetaLocator {
    detector: Box<dyn rustface::Detector>,
}

impl SeetaLocator {
    /// Load a SeetaFace model (e.g. `seeta_fd_frontal_v1.0.bin`).
    pub fn load(model_path: &Path, settings: LocatorSettings) -> Result<Self, LocatorError> {
        let path = model_path.display().to_string();
        if !model_path.exists() {
            return Err(LocatorError::ModelNotFound(path));
        }

        let file = File::open(model_path).map_err(|source| LocatorError::ModelLoad {
            path: path.clone(),
            source,
        })?;
        let model = rustface::read_model(BufReader::new(file)).map_err(|source| LocatorError::ModelLoad {
            path: path.clone(),
            source,
        })?;

        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(settings.min_face_size);
        detector.set_score_thresh(settings.score_thresh);
        detector.set_pyramid_scale_factor(settings.pyramid_scale_factor);
        let (step_x, step_y) = settings.slide_window_step;
        detector.set_slide_window_step(step_x, step_y);

        tracing::info!(path = %path, min_face_size = settings.min_face_size, "loaded SeetaFace model");
        Ok(Self { detector })
    }
}

impl FaceLocator for SeetaLocator {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        let (width, height) = image.dimensions();
        let faces = self
            .detector
            .detect(&rustface::ImageData::new(image.as_raw(), width, height));

        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                BoundingBox {
                    x: bbox.x() as f32,
                    y: bbox.y() as f32,
                    width: bbox.width() as f32,
                    height: bbox.height() as f32,
                    confidence: face.score() as f32,
                }
            })
            .collect())
    }
}
