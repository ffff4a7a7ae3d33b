//! rollcall-vision — concrete face locator and encoder.
//!
//! [`SeetaLocator`] finds frontal faces with the SeetaFace cascade;
//! [`OnnxEncoder`] turns each face crop into a descriptor with an ONNX model.

pub mod encoder;
pub mod locator;

pub use encoder::{EncoderError, EncoderSettings, OnnxEncoder, DEFAULT_INPUT_SIZE};
pub use locator::{LocatorError, LocatorSettings, SeetaLocator};
