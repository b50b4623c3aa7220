use std::fs;
use std::path::Path;
use std::sync::Mutex;

use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::CV_32F;
use opencv::dnn::blob_from_image;
use opencv::dnn::read_net_from_darknet;
use opencv::dnn::Net;
use opencv::dnn::DNN_BACKEND_CUDA;
use opencv::dnn::DNN_BACKEND_OPENCV;
use opencv::dnn::DNN_TARGET_CPU;
use opencv::dnn::DNN_TARGET_CUDA;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use opencv::prelude::NetTrait;
use opencv::prelude::NetTraitConst;
use tracing::debug;
use tracing::info;

use super::yolo_processor::RawOutput;
use super::yolo_processor::YoloProcessor;
use super::DetectionResult;
use super::Vocabulary;
use crate::config::ModelConfig;
use crate::error::DetectorError;
use crate::error::ModelLoadError;

/// Which of the two networks a model plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelRole {
    Plate,
    Glyph,
}

impl ModelRole {
    pub fn name(&self) -> &'static str {
        match self {
            ModelRole::Plate => "plate",
            ModelRole::Glyph => "glyph",
        }
    }
}

/// Network geometry read from a Darknet `.cfg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DarknetLayout {
    pub input_width: i32,
    pub input_height: i32,
    pub classes: usize,
}

impl DarknetLayout {
    /// `width`/`height` come from `[net]`, `classes` from the last `[yolo]` or `[region]`.
    pub fn parse(cfg: &str) -> Result<Self, String> {
        let mut section = String::new();
        let mut width = None;
        let mut height = None;
        let mut classes = None;

        for line in cfg.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_ascii_lowercase();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match (section.as_str(), key) {
                ("net" | "network", "width") => width = Some(parse_positive(key, value)?),
                ("net" | "network", "height") => height = Some(parse_positive(key, value)?),
                ("yolo" | "region", "classes") => classes = Some(parse_positive(key, value)?),
                _ => {}
            }
        }

        Ok(Self {
            input_width: width.ok_or("missing [net] width")? as i32,
            input_height: height.ok_or("missing [net] height")? as i32,
            classes: classes.ok_or("no [yolo] or [region] layer declares classes")?,
        })
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(format!("{key}={value} is not a positive integer")),
    }
}

/// Immutable facts about a loaded network.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelDescriptor {
    pub role: ModelRole,
    pub layout: DarknetLayout,
    pub vocabulary: Vocabulary,
}

impl ModelDescriptor {
    pub fn input_size(&self) -> Size {
        Size::new(self.layout.input_width, self.layout.input_height)
    }
}

/// Read-only inference over one frame.
pub trait Network: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;
    fn forward(&self, frame: &Mat) -> Result<Vec<RawOutput>, DetectorError>;
}

/// A Darknet YOLO network run through OpenCV DNN.
pub struct DarknetNetwork {
    // `Net::forward` mutates internal buffers, so calls are serialized.
    classifier: Mutex<Net>,
    descriptor: ModelDescriptor,
}

impl DarknetNetwork {
    pub fn load(
        role: ModelRole,
        model: &ModelConfig,
        use_gpu: bool,
    ) -> Result<Self, ModelLoadError> {
        require_file(role, &model.config)?;
        require_file(role, &model.weights)?;

        let cfg = read_text(&model.config)?;
        let layout = DarknetLayout::parse(&cfg).map_err(|reason| ModelLoadError::Config {
            path: model.config.clone(),
            reason,
        })?;
        let vocabulary = load_vocabulary(role, model.names.as_deref(), layout.classes)?;

        info!(
            "Loading {} network {} ({}x{}, {} classes)",
            role.name(),
            model.weights.display(),
            layout.input_width,
            layout.input_height,
            layout.classes
        );
        let network_error = |source| ModelLoadError::Network {
            path: model.weights.clone(),
            source,
        };
        let mut classifier = read_net_from_darknet(
            &model.config.to_string_lossy(),
            &model.weights.to_string_lossy(),
        )
        .map_err(network_error)?;
        if classifier.empty().map_err(network_error)? {
            return Err(ModelLoadError::Config {
                path: model.config.clone(),
                reason: "network has no layers".to_string(),
            });
        }

        if use_gpu {
            classifier
                .set_preferable_backend(DNN_BACKEND_CUDA)
                .map_err(network_error)?;
            classifier
                .set_preferable_target(DNN_TARGET_CUDA)
                .map_err(network_error)?;
        } else {
            classifier
                .set_preferable_backend(DNN_BACKEND_OPENCV)
                .map_err(network_error)?;
            classifier
                .set_preferable_target(DNN_TARGET_CPU)
                .map_err(network_error)?;
        }

        Ok(Self {
            classifier: Mutex::new(classifier),
            descriptor: ModelDescriptor {
                role,
                layout,
                vocabulary,
            },
        })
    }
}

impl Network for DarknetNetwork {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn forward(&self, frame: &Mat) -> Result<Vec<RawOutput>, DetectorError> {
        let blob = blob_from_image(
            frame,
            1.0 / 255.0,
            self.descriptor.input_size(),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        let mut output_values = Vector::<Mat>::default();
        {
            let mut classifier = self
                .classifier
                .lock()
                .map_err(|_| DetectorError::Poisoned)?;
            classifier.set_input(&blob, "", 1.0, Scalar::default())?;
            let output_names = classifier.get_unconnected_out_layers_names()?;
            classifier.forward(&mut output_values, &output_names)?;
        }

        let mut outputs = Vec::with_capacity(output_values.len());
        for layer in output_values.iter() {
            let data = layer.data_typed::<f32>()?.to_vec();
            outputs.push(RawOutput::from_objectness_scaled(layer.cols() as usize, data)?);
        }
        Ok(outputs)
    }
}

/// One detection stage: a network plus its suppression threshold.
pub struct ObjectDetector<N> {
    network: N,
    nms_threshold: f32,
}

impl<N: Network> ObjectDetector<N> {
    pub fn new(network: N, nms_threshold: f32) -> Self {
        Self {
            network,
            nms_threshold,
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        self.network.descriptor()
    }

    pub fn detect(&self, image: &Mat, confidence: f32) -> Result<DetectionResult, DetectorError> {
        if image.empty() {
            return Err(DetectorError::EmptyFrame);
        }
        let outputs = self.network.forward(image)?;
        debug!(
            "{} network produced {} output layers",
            self.descriptor().role.name(),
            outputs.len()
        );

        let processor = YoloProcessor::new(confidence, self.nms_threshold);
        Ok(processor.post_process(&outputs, image.cols(), image.rows()))
    }
}

fn require_file(role: ModelRole, path: &Path) -> Result<(), ModelLoadError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ModelLoadError::MissingFile {
            role: role.name(),
            path: path.to_path_buf(),
        })
    }
}

fn read_text(path: &Path) -> Result<String, ModelLoadError> {
    fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_vocabulary(
    role: ModelRole,
    names: Option<&Path>,
    classes: usize,
) -> Result<Vocabulary, ModelLoadError> {
    let Some(path) = names else {
        return match role {
            ModelRole::Plate => Ok(std::iter::repeat("plate").take(classes).collect()),
            ModelRole::Glyph => Err(ModelLoadError::MissingVocabulary { role: role.name() }),
        };
    };

    require_file(role, path)?;
    // Line n names class n - 1, so a blank line in the middle cannot be skipped.
    let content = read_text(path)?;
    let mut labels = Vec::new();
    for (index, line) in content.trim_end().lines().enumerate() {
        let label = line.trim();
        if label.is_empty() {
            return Err(ModelLoadError::BlankLabel {
                path: path.to_path_buf(),
                line: index + 1,
            });
        }
        labels.push(label.to_string());
    }
    let vocabulary = Vocabulary::new(labels);
    if vocabulary.len() != classes {
        return Err(ModelLoadError::VocabularyMismatch {
            path: path.to_path_buf(),
            expected: classes,
            found: vocabulary.len(),
        });
    }
    Ok(vocabulary)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const OCR_CFG: &str = "\
[net]
# Testing
batch=1
width=416
height=416
channels=3

[convolutional]
filters=123

[yolo]
mask = 6,7,8
classes=21

[yolo]
mask = 0,1,2
classes=36
";

    #[test]
    fn layout_reads_net_size_and_last_yolo_classes() {
        let layout = DarknetLayout::parse(OCR_CFG).unwrap();
        assert_eq!(
            layout,
            DarknetLayout {
                input_width: 416,
                input_height: 416,
                classes: 36,
            }
        );
    }

    #[test]
    fn layout_requires_input_size() {
        let err = DarknetLayout::parse("[net]\nheight=416\n[yolo]\nclasses=1\n").unwrap_err();
        assert!(err.contains("width"));
    }

    #[test]
    fn layout_rejects_zero_classes() {
        assert!(DarknetLayout::parse("[net]\nwidth=8\nheight=8\n[region]\nclasses=0\n").is_err());
    }

    #[test]
    fn missing_weights_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("ocr.cfg");
        fs::write(&config, OCR_CFG).unwrap();
        let model = ModelConfig {
            config,
            weights: dir.path().join("ocr.weights"),
            names: None,
            nms_threshold: 0.4,
        };

        let err = DarknetNetwork::load(ModelRole::Glyph, &model, false)
            .err()
            .unwrap();
        assert!(matches!(err, ModelLoadError::MissingFile { role: "glyph", .. }));
    }

    #[test]
    fn glyph_vocabulary_is_required() {
        let err = load_vocabulary(ModelRole::Glyph, None, 3).unwrap_err();
        assert!(matches!(err, ModelLoadError::MissingVocabulary { .. }));
    }

    #[test]
    fn plate_vocabulary_defaults_to_plate_label() {
        let vocabulary = load_vocabulary(ModelRole::Plate, None, 1).unwrap();
        assert_eq!(vocabulary.label(0), Some("plate"));
    }

    #[test]
    fn vocabulary_must_match_class_count() {
        let mut names = tempfile::NamedTempFile::new().unwrap();
        writeln!(names, "0\n1\n2\n\n").unwrap();

        let vocabulary = load_vocabulary(ModelRole::Glyph, Some(names.path()), 3).unwrap();
        assert_eq!(vocabulary.label(2), Some("2"));

        let err = load_vocabulary(ModelRole::Glyph, Some(names.path()), 4).unwrap_err();
        assert!(matches!(
            err,
            ModelLoadError::VocabularyMismatch {
                expected: 4,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn blank_label_inside_vocabulary_is_rejected() {
        let mut names = tempfile::NamedTempFile::new().unwrap();
        writeln!(names, "0\n\n2\n3").unwrap();

        let err = load_vocabulary(ModelRole::Glyph, Some(names.path()), 3).unwrap_err();
        assert!(matches!(err, ModelLoadError::BlankLabel { line: 2, .. }));
    }
}
