use facegate_core::LabelPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pipeline configuration: TOML file, then `FACEGATE_*` environment
/// overrides, then defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Camera path (`/dev/video0`) or bare index (`0`).
    pub camera_device: String,
    /// Root for the training corpus, label map and classifier model.
    pub data_dir: PathBuf,
    /// SCRFD ONNX model; defaults to `<data_dir>/models/det_10g.onnx`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_model: Option<PathBuf>,
    /// A face is recognised only when its confidence is strictly above this.
    pub confidence_threshold: i32,
    /// Classifier distance that maps to confidence 0.
    pub max_distance: f64,
    /// Frames that reuse cached results between fresh detections.
    pub frame_skip: u32,
    pub initial_countdown_secs: u64,
    pub pose_countdown_secs: u64,
    pub samples_per_pose: usize,
    /// Side of the square grayscale training samples.
    pub sample_size: u32,
    pub display_max_width: u32,
    pub display_width: u32,
    pub display_height: u32,
    /// Hold a pose countdown while no face is in view.
    pub pause_countdown_without_face: bool,
    pub label_policy: LabelPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            data_dir: default_data_dir(),
            detector_model: None,
            confidence_threshold: 80,
            max_distance: 250.0,
            frame_skip: 1,
            initial_countdown_secs: 10,
            pose_countdown_secs: 10,
            samples_per_pose: 2,
            sample_size: 200,
            display_max_width: 400,
            display_width: 400,
            display_height: 300,
            pause_countdown_without_face: true,
            label_policy: LabelPolicy::SmallestUnused,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or from the default location if it exists, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = default_config_path();
        let path = match path {
            Some(p) => Some(p),
            None => Some(default_path.as_path()).filter(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "loaded config file");
                config
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `FACEGATE_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEGATE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_DETECTOR_MODEL") {
            self.detector_model = Some(PathBuf::from(v));
        }
        override_parsed(&lookup, "FACEGATE_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        override_parsed(&lookup, "FACEGATE_MAX_DISTANCE", &mut self.max_distance);
        override_parsed(&lookup, "FACEGATE_FRAME_SKIP", &mut self.frame_skip);
        override_parsed(
            &lookup,
            "FACEGATE_INITIAL_COUNTDOWN_SECS",
            &mut self.initial_countdown_secs,
        );
        override_parsed(&lookup, "FACEGATE_POSE_COUNTDOWN_SECS", &mut self.pose_countdown_secs);
        override_parsed(&lookup, "FACEGATE_SAMPLES_PER_POSE", &mut self.samples_per_pose);
        override_parsed(&lookup, "FACEGATE_SAMPLE_SIZE", &mut self.sample_size);
        override_parsed(&lookup, "FACEGATE_LABEL_POLICY", &mut self.label_policy);
        if let Some(v) = lookup("FACEGATE_PAUSE_COUNTDOWN") {
            self.pause_countdown_without_face = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_distance.is_nan() || self.max_distance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_distance must be positive, got {}",
                self.max_distance
            )));
        }
        if self.samples_per_pose == 0 {
            return Err(ConfigError::Invalid("samples_per_pose must be at least 1".into()));
        }
        if self.sample_size == 0 || self.display_width == 0 || self.display_height == 0 {
            return Err(ConfigError::Invalid("image sizes must be non-zero".into()));
        }
        if self.camera_device.trim().is_empty() {
            return Err(ConfigError::Invalid("camera_device is empty".into()));
        }
        Ok(())
    }

    /// Directory holding the per-label sample directories, label map and model.
    pub fn training_dir(&self) -> PathBuf {
        self.data_dir.join("training_data")
    }

    pub fn label_map_path(&self) -> PathBuf {
        self.training_dir().join("label_id_map.json")
    }

    pub fn model_path(&self) -> PathBuf {
        self.training_dir().join("trained_model.json")
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.detector_model
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models").join("det_10g.onnx"))
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("facegate")
}

pub fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("facegate").join("config.toml")
}
