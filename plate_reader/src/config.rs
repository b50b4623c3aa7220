//! TOML configuration for the two networks and the request pipeline.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;
use crate::plate_detection::plate_extractor::Rectification;
use crate::plate_detection::yolo_processor::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::plate_detection::yolo_processor::DEFAULT_GLYPH_NMS_THRESHOLD;
use crate::plate_detection::yolo_processor::DEFAULT_PLATE_NMS_THRESHOLD;
use crate::plate_detection::Script;

/// A Darknet (config, weights) pair and its optional `.names` vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub config: PathBuf,
    pub weights: PathBuf,
    #[serde(default)]
    pub names: Option<PathBuf>,
    /// IoU above which a lower-scored box is suppressed.
    pub nms_threshold: f32,
}

impl ModelConfig {
    pub fn plate_default() -> Self {
        Self {
            config: PathBuf::from("weights/detection/yolov3-detection.cfg"),
            weights: PathBuf::from("weights/detection/yolov3-detection_final.weights"),
            names: None,
            nms_threshold: DEFAULT_PLATE_NMS_THRESHOLD,
        }
    }

    pub fn glyph_default() -> Self {
        Self {
            config: PathBuf::from("weights/ocr/yolov3-ocr.cfg"),
            weights: PathBuf::from("weights/ocr/yolov3-ocr_final.weights"),
            names: Some(PathBuf::from("weights/ocr/yolov3-ocr.names")),
            nms_threshold: DEFAULT_GLYPH_NMS_THRESHOLD,
        }
    }

    /// Every file the model needs, in load order.
    pub fn files(&self) -> Vec<&Path> {
        let mut files = vec![self.config.as_path(), self.weights.as_path()];
        if let Some(names) = &self.names {
            files.push(names.as_path());
        }
        files
    }
}

/// Per-request defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub confidence: f32,
    pub script: Script,
    pub rectification: Rectification,
    pub use_gpu: bool,
    /// Every n-th video frame is examined.
    pub video_sample_every: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            script: Script::Latin,
            rectification: Rectification::Crop,
            use_gpu: false,
            video_sample_every: 10,
        }
    }
}

/// Secondary OCR engine used when the glyph network finds nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub enabled: bool,
    /// Directory holding `*.traineddata`.
    pub tessdata: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "ModelConfig::plate_default")]
    pub detection: ModelConfig,
    #[serde(default = "ModelConfig::glyph_default")]
    pub ocr: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub fallback: FallbackSettings,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            detection: ModelConfig::plate_default(),
            ocr: ModelConfig::glyph_default(),
            pipeline: PipelineSettings::default(),
            fallback: FallbackSettings::default(),
        }
    }
}

impl ReaderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ReaderConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("pipeline.confidence", self.pipeline.confidence)?;
        check_unit("detection.nms_threshold", self.detection.nms_threshold)?;
        check_unit("ocr.nms_threshold", self.ocr.nms_threshold)?;
        if let Rectification::Perspective { width, height } = self.pipeline.rectification {
            if width <= 0 || height <= 0 {
                return Err(ConfigError::InvalidPlateSize { width, height });
            }
        }
        Ok(())
    }
}

fn check_unit(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_yields_deployed_defaults() {
        let config: ReaderConfig = toml::from_str("").unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.pipeline.confidence, 0.3);
        assert_eq!(config.pipeline.video_sample_every, 10);
        assert!(config.detection.nms_threshold > config.ocr.nms_threshold);
    }

    #[test]
    fn tables_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[ocr]
config = "models/ocr.cfg"
weights = "models/ocr.weights"
names = "models/ocr.names"
nms_threshold = 0.35

[pipeline]
confidence = 0.5
script = "ara"
use_gpu = true

[pipeline.rectification]
perspective = {{ width = 240, height = 60 }}
"#
        )
        .unwrap();

        let config = ReaderConfig::load(file.path()).unwrap();
        assert_eq!(config.ocr.config, PathBuf::from("models/ocr.cfg"));
        assert_eq!(config.ocr.nms_threshold, 0.35);
        assert_eq!(config.detection, ModelConfig::plate_default());
        assert_eq!(config.pipeline.script, Script::Arabic);
        assert_eq!(
            config.pipeline.rectification,
            Rectification::Perspective {
                width: 240,
                height: 60
            }
        );
        assert!(config.pipeline.use_gpu);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nconfidence = 1.5").unwrap();

        let err = ReaderConfig::load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "pipeline.confidence",
                ..
            }
        ));
    }

    #[test]
    fn model_files_include_names() {
        assert_eq!(ModelConfig::glyph_default().files().len(), 3);
        assert_eq!(ModelConfig::plate_default().files().len(), 2);
    }

    #[test]
    fn degenerate_perspective_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[pipeline.rectification]\nperspective = {{ width = 240, height = 0 }}\n"
        )
        .unwrap();

        assert!(matches!(
            ReaderConfig::load(file.path()),
            Err(ConfigError::InvalidPlateSize {
                width: 240,
                height: 0
            })
        ));

        let mut config = ReaderConfig::default();
        config.pipeline.rectification = Rectification::Perspective {
            width: -1,
            height: 60,
        };
        assert!(config.validate().is_err());
    }
}
