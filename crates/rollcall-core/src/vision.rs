//! Capability interfaces for the external face locator and face encoder.

use crate::types::{BoundingBox, Descriptor};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("encoder returned {got} descriptors for {expected} faces")]
    ContractViolation { expected: usize, got: usize },
}

/// Finds zero or more face regions in an image.
pub trait FaceLocator {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Computes one descriptor per face region, in the same order as `faces`.
///
/// `None` marks a region for which no descriptor could be computed.
pub trait FaceEncoder {
    fn encode(
        &mut self,
        image: &GrayImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Option<Descriptor>>, VisionError>;
}

/// A located face paired with its descriptor, if one was computable.
#[derive(Debug, Clone)]
pub struct Detection {
    pub face: BoundingBox,
    pub descriptor: Option<Descriptor>,
}

/// Locate every face in `image` and encode them in one pass.
///
/// Descriptors of the wrong length or with non-finite values are treated as
/// not computable.
pub fn detect_and_encode(
    locator: &mut dyn FaceLocator,
    encoder: &mut dyn FaceEncoder,
    image: &GrayImage,
) -> Result<Vec<Detection>, VisionError> {
    let faces = locator.locate(image)?;
    if faces.is_empty() {
        return Ok(Vec::new());
    }

    let descriptors = encoder.encode(image, &faces)?;
    if descriptors.len() != faces.len() {
        return Err(VisionError::ContractViolation {
            expected: faces.len(),
            got: descriptors.len(),
        });
    }

    Ok(faces
        .into_iter()
        .zip(descriptors)
        .map(|(face, descriptor)| {
            let descriptor = descriptor.filter(|d| {
                let ok = d.is_well_formed();
                if !ok {
                    tracing::warn!(len = d.len(), "encoder returned a malformed descriptor; dropping it");
                }
                ok
            });
            Detection { face, descriptor }
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scripted locator/encoder used across the crate's tests.

    use super::*;
    use std::collections::VecDeque;

    /// Returns queued box lists, one per call; empty once exhausted.
    #[derive(Default)]
    pub struct ScriptedLocator {
        pub frames: VecDeque<Vec<BoundingBox>>,
        pub calls: usize,
    }

    impl ScriptedLocator {
        pub fn new(frames: Vec<Vec<BoundingBox>>) -> Self {
            Self { frames: frames.into(), calls: 0 }
        }
    }

    impl FaceLocator for ScriptedLocator {
        fn locate(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
            self.calls += 1;
            Ok(self.frames.pop_front().unwrap_or_default())
        }
    }

    /// Encodes a box as a descriptor whose first value is the box's `x`.
    /// Boxes with negative `x` are reported as not computable.
    #[derive(Default)]
    pub struct XEncoder;

    impl FaceEncoder for XEncoder {
        fn encode(
            &mut self,
            _image: &GrayImage,
            faces: &[BoundingBox],
        ) -> Result<Vec<Option<Descriptor>>, VisionError> {
            Ok(faces
                .iter()
                .map(|f| {
                    (f.x >= 0.0).then(|| {
                        let mut d = Descriptor::zeros();
                        d.values[0] = f.x;
                        d
                    })
                })
                .collect())
        }
    }

    pub fn face_at(x: f32, size: f32) -> BoundingBox {
        BoundingBox { x, y: 0.0, width: size, height: size, confidence: 1.0 }
    }
}
