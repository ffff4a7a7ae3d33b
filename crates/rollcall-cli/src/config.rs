//! Runtime configuration.
//!
//! Built in layers: defaults, then an optional TOML file, then `ROLLCALL_*`
//! environment variables, then command-line flags.

use anyhow::{bail, Context, Result};
use rollcall_core::enroll::EnrollOptions;
use rollcall_core::{DedupScope, DEFAULT_MATCH_THRESHOLD};
use rollcall_vision::{EncoderSettings, LocatorSettings, DEFAULT_INPUT_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "ROLLCALL_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path, or "auto" to probe /dev/video0..3.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Flip frames left-to-right so the preview behaves like a mirror.
    pub mirror: bool,
    /// Directory holding enrollment samples.
    pub image_dir: PathBuf,
    /// Descriptor table written by `build` and read by `run`.
    pub table_path: PathBuf,
    /// Attendance CSV.
    pub log_path: PathBuf,
    /// SeetaFace frontal detector model.
    pub locator_model: PathBuf,
    /// ONNX descriptor model.
    pub encoder_model: PathBuf,
    /// Nearest-neighbor distance must be strictly below this.
    pub match_threshold: f32,
    pub samples_per_identity: u32,
    pub capture_interval_ms: u64,
    /// Smallest face side accepted during enrollment, in pixels.
    pub min_face_size: u32,
    /// Smallest face the detector searches for, in pixels.
    pub locator_min_face_size: u32,
    pub dedup_scope: DedupScope,
    pub encoder_input_size: u32,
    pub encoder_normalize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "auto".to_string(),
            camera_width: 640,
            camera_height: 480,
            mirror: true,
            image_dir: PathBuf::from("ImagesAttendance"),
            table_path: PathBuf::from("face_encodings.json"),
            log_path: PathBuf::from("Attendance_Log.csv"),
            locator_model: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            encoder_model: PathBuf::from("models/face_encoder.onnx"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            samples_per_identity: 30,
            capture_interval_ms: 100,
            min_face_size: 100,
            locator_min_face_size: 40,
            dedup_scope: DedupScope::Session,
            encoder_input_size: DEFAULT_INPUT_SIZE,
            encoder_normalize: true,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub camera_device: Option<String>,
    pub image_dir: Option<PathBuf>,
    pub table_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub samples_per_identity: Option<u32>,
    pub dedup_scope: Option<DedupScope>,
}

impl Config {
    /// Resolve the full layered configuration from the process environment.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        Self::load_with(config_path, overrides, |key| std::env::var(key).ok())
    }

    /// As [`Config::load`], reading environment variables through `env`.
    pub fn load_with(
        config_path: Option<&Path>,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = config_path.map(Path::to_path_buf).or_else(|| env(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env(&env);
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. Keys left out keep their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(env, "ROLLCALL_CAMERA_WIDTH", &mut self.camera_width);
        env_parse(env, "ROLLCALL_CAMERA_HEIGHT", &mut self.camera_height);
        env_bool(env, "ROLLCALL_MIRROR", &mut self.mirror);
        env_path(env, "ROLLCALL_IMAGE_DIR", &mut self.image_dir);
        env_path(env, "ROLLCALL_TABLE_PATH", &mut self.table_path);
        env_path(env, "ROLLCALL_LOG_PATH", &mut self.log_path);
        env_path(env, "ROLLCALL_LOCATOR_MODEL", &mut self.locator_model);
        env_path(env, "ROLLCALL_ENCODER_MODEL", &mut self.encoder_model);
        env_parse(env, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(env, "ROLLCALL_SAMPLES_PER_IDENTITY", &mut self.samples_per_identity);
        env_parse(env, "ROLLCALL_CAPTURE_INTERVAL_MS", &mut self.capture_interval_ms);
        env_parse(env, "ROLLCALL_MIN_FACE_SIZE", &mut self.min_face_size);
        env_parse(env, "ROLLCALL_LOCATOR_MIN_FACE_SIZE", &mut self.locator_min_face_size);
        env_parse(env, "ROLLCALL_DEDUP_SCOPE", &mut self.dedup_scope);
        env_parse(env, "ROLLCALL_ENCODER_INPUT_SIZE", &mut self.encoder_input_size);
        env_bool(env, "ROLLCALL_ENCODER_NORMALIZE", &mut self.encoder_normalize);
    }

    fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(v) = &o.camera_device {
            self.camera_device = v.clone();
        }
        if let Some(v) = &o.image_dir {
            self.image_dir = v.clone();
        }
        if let Some(v) = &o.table_path {
            self.table_path = v.clone();
        }
        if let Some(v) = &o.log_path {
            self.log_path = v.clone();
        }
        if let Some(v) = o.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = o.samples_per_identity {
            self.samples_per_identity = v;
        }
        if let Some(v) = o.dedup_scope {
            self.dedup_scope = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            bail!("match_threshold must be a positive number, got {}", self.match_threshold);
        }
        if self.samples_per_identity == 0 {
            bail!("samples_per_identity must be at least 1");
        }
        if self.encoder_input_size == 0 {
            bail!("encoder_input_size must be at least 1");
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            bail!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera_width,
                self.camera_height
            );
        }
        if self.locator_min_face_size < 20 {
            bail!("locator_min_face_size must be at least 20, got {}", self.locator_min_face_size);
        }
        if self.camera_device.trim().is_empty() {
            bail!("camera_device must not be empty");
        }
        Ok(())
    }

    pub fn enroll_options(&self) -> EnrollOptions {
        EnrollOptions {
            samples: self.samples_per_identity,
            min_face_size: self.min_face_size,
            interval: Duration::from_millis(self.capture_interval_ms),
        }
    }

    pub fn locator_settings(&self) -> LocatorSettings {
        LocatorSettings {
            min_face_size: self.locator_min_face_size,
            ..LocatorSettings::default()
        }
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            input_size: self.encoder_input_size,
            normalize: self.encoder_normalize,
        }
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = env(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment value"),
    }
}

fn env_path(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut PathBuf) {
    if let Some(v) = env(key) {
        *slot = PathBuf::from(v);
    }
}

fn env_bool(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(v) = env(key) {
        *slot = !matches!(v.trim(), "0" | "false" | "no" | "off");
    }
}
