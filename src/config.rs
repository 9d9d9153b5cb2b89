//! YAML configuration file. Every field has a default, so an empty file is valid.

use crate::capture::CaptureConfig;
use crate::detect::{ClassMap, DetectionLoopConfig, OnnxDetectorConfig, DEFAULT_CAPACITY, MAX_DETECTIONS};
use crate::error::ConfigError;
use crate::generate::GeneratorConfig;
use crate::output::WindowConfig;
use crate::shader::AdapterKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    /// Use a still image instead of the camera.
    pub image: Option<PathBuf>,
    pub detection: DetectionSection,
    pub shader: ShaderSection,
    pub generator: GeneratorConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    /// Start with detection running.
    pub enabled: bool,
    pub model_path: PathBuf,
    /// One class name per line, indexed by model class id. COCO names when unset.
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub threads: usize,
    pub capacity: usize,
    pub interval_ms: u64,
    pub min_confidence: f32,
    /// Label to class id; unmapped labels get `default_class`.
    pub classes: BTreeMap<String, i32>,
    pub default_class: i32,
}

impl Default for DetectionSection {
    fn default() -> Self {
        let detector = OnnxDetectorConfig::default();
        Self {
            enabled: true,
            model_path: detector.model_path,
            labels_path: None,
            input_size: detector.input_size,
            score_threshold: detector.score_threshold,
            iou_threshold: detector.iou_threshold,
            threads: detector.threads,
            capacity: DEFAULT_CAPACITY,
            interval_ms: 100,
            min_confidence: 0.0,
            classes: BTreeMap::new(),
            default_class: 0,
        }
    }
}

impl DetectionSection {
    pub fn loop_config(&self) -> DetectionLoopConfig {
        let mut classes = ClassMap::with_default(self.default_class);
        for (label, id) in &self.classes {
            classes.insert(label.clone(), *id);
        }
        DetectionLoopConfig {
            interval: Duration::from_millis(self.interval_ms),
            min_confidence: self.min_confidence,
            capacity: self.capacity,
            classes,
        }
    }

    pub fn detector_config(&self) -> Result<OnnxDetectorConfig, ConfigError> {
        let mut detector = OnnxDetectorConfig {
            model_path: self.model_path.clone(),
            input_size: self.input_size,
            score_threshold: self.score_threshold,
            iou_threshold: self.iou_threshold,
            threads: self.threads,
            ..Default::default()
        };
        if let Some(path) = &self.labels_path {
            detector.labels = read_labels(path)?;
        }
        Ok(detector)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderSection {
    /// Fragment shader loaded at startup and watched for changes.
    pub path: Option<PathBuf>,
    pub adapter: AdapterKind,
    /// Instruction file; saving it sends a generation request.
    pub prompt_file: Option<PathBuf>,
}

fn read_labels(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let labels: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(ConfigError::Invalid(format!("{} contains no labels", path.display())));
    }
    Ok(labels)
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = &self.detection;
        if detection.capacity == 0 || detection.capacity > MAX_DETECTIONS {
            return Err(ConfigError::Invalid(format!(
                "detection.capacity must be between 1 and {}, got {}",
                MAX_DETECTIONS, detection.capacity
            )));
        }
        if detection.interval_ms == 0 {
            return Err(ConfigError::Invalid("detection.interval_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&detection.min_confidence) {
            return Err(ConfigError::Invalid("detection.min_confidence must be within [0, 1]".into()));
        }
        if detection.input_size == 0 {
            return Err(ConfigError::Invalid("detection.input_size must be positive".into()));
        }
        Ok(())
    }
}
