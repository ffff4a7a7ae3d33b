//! Face descriptor encoder via ONNX Runtime.
//!
//! Any model taking a `1×3×S×S` float image and producing a
//! [`DESCRIPTOR_DIM`]-long vector fits. Grayscale crops are replicated into
//! all three channels.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Descriptor, FaceEncoder, VisionError, DESCRIPTOR_DIM};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-value descriptor, got {got}")]
    OutputDimension { expected: usize, got: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<EncoderError> for VisionError {
    fn from(e: EncoderError) -> Self {
        match e {
            EncoderError::ModelNotFound(path) => VisionError::ModelNotFound(path),
            other => VisionError::Inference(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Side length of the square model input.
    pub input_size: u32,
    /// L2-normalize every descriptor.
    pub normalize: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            normalize: true,
        }
    }
}

pub struct OnnxEncoder {
    session: Session,
    settings: EncoderSettings,
}

impl OnnxEncoder {
    pub fn load(model_path: &Path, settings: EncoderSettings) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            input_size = settings.input_size,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded encoder model"
        );

        Ok(Self { session, settings })
    }

    fn encode_one(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Option<Descriptor>, EncoderError> {
        let Some(crop) = crop_face(image, face, self.settings.input_size) else {
            return Ok(None);
        };
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(EncoderError::OutputDimension {
                expected: DESCRIPTOR_DIM,
                got: raw.len(),
            });
        }

        let mut values = raw.to_vec();
        if self.settings.normalize {
            l2_normalize(&mut values);
        }
        Ok(Some(Descriptor::new(values)))
    }
}

impl FaceEncoder for OnnxEncoder {
    fn encode(&mut self, image: &GrayImage, faces: &[BoundingBox]) -> Result<Vec<Option<Descriptor>>, VisionError> {
        faces
            .iter()
            .map(|face| self.encode_one(image, face).map_err(VisionError::from))
            .collect()
    }
}

/// Crop `face` out of `image` and resize it to `size` × `size`.
///
/// Returns `None` when the box has no area inside the image.
fn crop_face(image: &GrayImage, face: &BoundingBox, size: u32) -> Option<GrayImage> {
    let (x, y, w, h) = face.clamp_to(image.width(), image.height())?;
    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    Some(imageops::resize(&crop, size, size, FilterType::Triangle))
}

/// Square grayscale crop → `1×3×S×S` tensor normalized to roughly [-1, 1].
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in crop.enumerate_pixels() {
        let v = (pixel[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }

    tensor
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}
