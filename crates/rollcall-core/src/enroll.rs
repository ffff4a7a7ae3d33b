//! Enrollment capture: save cropped face samples for one identity.

use crate::capture::{read_frame, Backoff, FrameSource};
use crate::sample::Identity;
use crate::vision::{FaceLocator, VisionError};
use image::imageops;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SAMPLES: u32 = 30;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 100;
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("image directory {path}: {source}")]
    ImageDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write sample {path}: {source}")]
    WriteSample {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("face locator: {0}")]
    Vision(#[from] VisionError),
}

#[derive(Debug, Clone)]
pub struct EnrollOptions {
    /// Stop after this many samples.
    pub samples: u32,
    /// Ignore faces smaller than this on either side, in pixels.
    pub min_face_size: u32,
    /// Pause between frames.
    pub interval: Duration,
}

impl Default for EnrollOptions {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            interval: DEFAULT_CAPTURE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollSummary {
    pub saved: u32,
    /// True when the operator stopped capture before the target was reached.
    pub cancelled: bool,
    pub files: Vec<PathBuf>,
}

/// Capture face samples for `identity` into `image_dir` until `options.samples`
/// are saved or `stop` is set.
///
/// Every located face of sufficient size in a frame becomes one sample; the
/// count never exceeds the target.
pub fn capture_samples<F: FrameSource>(
    source: &mut F,
    locator: &mut dyn FaceLocator,
    identity: &Identity,
    image_dir: &Path,
    options: &EnrollOptions,
    stop: &AtomicBool,
) -> Result<EnrollSummary, EnrollError> {
    fs::create_dir_all(image_dir).map_err(|source| EnrollError::ImageDir {
        path: image_dir.display().to_string(),
        source,
    })?;

    tracing::info!(
        id = %identity.id,
        name = %identity.name,
        target = options.samples,
        dir = %image_dir.display(),
        "starting face capture; look at the camera"
    );

    let mut backoff = Backoff::default();
    let mut files = Vec::new();
    let mut saved = 0u32;

    while saved < options.samples {
        let Some(frame) = read_frame(source, &mut backoff, stop) else {
            break;
        };

        let faces = locator.locate(&frame)?;
        for face in faces {
            if face.width < options.min_face_size as f32 || face.height < options.min_face_size as f32 {
                tracing::trace!(width = face.width, height = face.height, "face below minimum size");
                continue;
            }
            let Some((x, y, w, h)) = face.clamp_to(frame.width(), frame.height()) else {
                continue;
            };

            saved += 1;
            let path = image_dir.join(identity.sample(saved).file_name());
            let crop = imageops::crop_imm(&frame, x, y, w, h).to_image();
            crop.save(&path).map_err(|source| EnrollError::WriteSample {
                path: path.display().to_string(),
                source,
            })?;
            tracing::debug!(sample = saved, path = %path.display(), "saved face sample");
            files.push(path);

            if saved >= options.samples {
                break;
            }
        }

        if saved < options.samples && !options.interval.is_zero() {
            std::thread::sleep(options.interval);
        }
    }

    let cancelled = saved < options.samples && stop.load(Ordering::Relaxed);
    tracing::info!(saved, name = %identity.name, cancelled, "face capture finished");

    Ok(EnrollSummary {
        saved,
        cancelled,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fakes::ScriptedFrames;
    use crate::sample::SampleName;
    use crate::vision::fakes::{face_at, ScriptedLocator};

    fn options(samples: u32) -> EnrollOptions {
        EnrollOptions {
            samples,
            min_face_size: 10,
            interval: Duration::ZERO,
        }
    }

    fn alice() -> Identity {
        Identity::new("1", "Alice").unwrap()
    }

    #[test]
    fn test_saves_named_samples_until_target() {
        let dir = tempfile::tempdir().unwrap();
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(10, &stop);
        let mut locator = ScriptedLocator::new(vec![vec![face_at(0.0, 20.0)]; 10]);

        let summary =
            capture_samples(&mut frames, &mut locator, &alice(), dir.path(), &options(3), &stop).unwrap();

        assert_eq!(summary.saved, 3);
        assert!(!summary.cancelled);
        for n in 1..=3 {
            let path = dir.path().join(format!("1.Alice.{n}.jpg"));
            assert!(path.exists(), "missing {}", path.display());
            let img = image::open(&path).unwrap();
            assert_eq!((img.width(), img.height()), (20, 20));
        }
        assert_eq!(locator.calls, 3);
    }

    #[test]
    fn test_never_exceeds_target_with_many_faces() {
        let dir = tempfile::tempdir().unwrap();
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(5, &stop);
        let crowd = vec![face_at(0.0, 12.0), face_at(20.0, 12.0), face_at(40.0, 12.0)];
        let mut locator = ScriptedLocator::new(vec![crowd.clone(), crowd]);

        let summary =
            capture_samples(&mut frames, &mut locator, &alice(), dir.path(), &options(4), &stop).unwrap();

        assert_eq!(summary.saved, 4);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
        let indices: Vec<_> = summary
            .files
            .iter()
            .map(|p| SampleName::parse(p.file_name().unwrap().to_str().unwrap()).unwrap().index.unwrap())
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_small_faces_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(2, &stop);
        let mut locator = ScriptedLocator::new(vec![vec![face_at(0.0, 5.0)], vec![face_at(0.0, 5.0)]]);

        let summary =
            capture_samples(&mut frames, &mut locator, &alice(), dir.path(), &options(2), &stop).unwrap();

        assert_eq!(summary.saved, 0);
        assert!(summary.cancelled);
    }

    #[test]
    fn test_cancel_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let stop = AtomicBool::new(false);
        // One good frame, then the script runs dry and raises the stop flag.
        let mut frames = ScriptedFrames::frames(1, &stop);
        let mut locator = ScriptedLocator::new(vec![vec![face_at(0.0, 20.0)]]);

        let summary =
            capture_samples(&mut frames, &mut locator, &alice(), dir.path(), &options(30), &stop).unwrap();

        assert_eq!(summary.saved, 1);
        assert!(summary.cancelled);
    }

    #[test]
    fn test_creates_image_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ImagesAttendance");
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(1, &stop);
        let mut locator = ScriptedLocator::new(vec![vec![face_at(0.0, 20.0)]]);

        capture_samples(&mut frames, &mut locator, &alice(), &nested, &options(1), &stop).unwrap();
        assert!(nested.join("1.Alice.1.jpg").exists());
    }
}
