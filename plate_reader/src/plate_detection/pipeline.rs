//! The request pipeline: plate detection, extraction, glyph reading and shaping.
//!
//! A [`PlateRecognizer`] is built once, owns both networks and is shared by
//! every request. Each call runs to completion on the calling thread; the
//! networks serialize their own forward passes.

use opencv::prelude::Mat;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::bounding_box_render::BoundingBoxRender;
use super::dnn_ocr::DnnOcrReader;
use super::object_detector::DarknetNetwork;
use super::object_detector::ModelRole;
use super::object_detector::Network;
use super::object_detector::ObjectDetector;
use super::plate_extractor::PlateExtractor;
use super::script_shaper::ScriptShaper;
use super::DetectionResult;
use super::PlateImage;
use super::RecognizedText;
use super::Script;
use crate::config::FallbackSettings;
use crate::config::PipelineSettings;
use crate::config::ReaderConfig;
use crate::error::FallbackError;
use crate::error::FrameError;
use crate::error::ModelLoadError;
use crate::error::PipelineError;
use crate::metrics;

/// Secondary OCR consulted when the glyph network finds no glyph at all.
pub trait FallbackReader: Send + Sync {
    fn read_text(&self, plate: &Mat, script: Script) -> Result<String, FallbackError>;
}

/// Per-request knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequestOptions {
    pub confidence: f32,
    pub script: Script,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlateStatus {
    PlatesFound,
    NoPlate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextStatus {
    TextFound,
    NoText,
}

/// Where the recognized text came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextSource {
    Glyphs,
    Fallback,
    None,
}

/// Outcome of the plate stage on one frame.
pub struct PlateDetection {
    pub annotated: Mat,
    pub plates: Vec<PlateImage>,
    pub detections: DetectionResult,
}

impl PlateDetection {
    pub fn status(&self) -> PlateStatus {
        if self.plates.is_empty() {
            PlateStatus::NoPlate
        } else {
            PlateStatus::PlatesFound
        }
    }
}

/// Outcome of the glyph stage on one plate image.
pub struct PlateReading {
    pub annotated: Mat,
    pub text: RecognizedText,
    pub glyphs: DetectionResult,
    pub source: TextSource,
}

impl PlateReading {
    pub fn status(&self) -> TextStatus {
        if self.text.is_empty() {
            TextStatus::NoText
        } else {
            TextStatus::TextFound
        }
    }
}

/// Both stages over one frame: one reading per extracted plate.
pub struct PlateRecognition {
    pub detection: PlateDetection,
    pub readings: Vec<PlateReading>,
}

/// First sampled video frame holding a plate.
pub struct VideoHit {
    pub frame_index: usize,
    pub frame: Mat,
    pub detection: PlateDetection,
}

pub struct VideoScan {
    pub frames_examined: usize,
    pub hit: Option<VideoHit>,
}

pub struct PlateRecognizer<N = DarknetNetwork> {
    plates: ObjectDetector<N>,
    reader: DnnOcrReader<N>,
    extractor: PlateExtractor,
    shaper: ScriptShaper,
    render: BoundingBoxRender,
    fallback: Option<Box<dyn FallbackReader>>,
    settings: PipelineSettings,
}

impl PlateRecognizer<DarknetNetwork> {
    /// Loads both Darknet models. Any missing or malformed file is fatal.
    pub fn load(config: &ReaderConfig) -> Result<Self, ModelLoadError> {
        let use_gpu = config.pipeline.use_gpu;
        let plates = DarknetNetwork::load(ModelRole::Plate, &config.detection, use_gpu)?;
        let glyphs = DarknetNetwork::load(ModelRole::Glyph, &config.ocr, use_gpu)?;

        let mut recognizer = Self::new(
            ObjectDetector::new(plates, config.detection.nms_threshold),
            ObjectDetector::new(glyphs, config.ocr.nms_threshold),
            config.pipeline.clone(),
        );
        recognizer.fallback = configured_fallback(&config.fallback);
        Ok(recognizer)
    }
}

impl<N: Network> PlateRecognizer<N> {
    pub fn new(
        plates: ObjectDetector<N>,
        glyphs: ObjectDetector<N>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            plates,
            reader: DnnOcrReader::new(glyphs),
            extractor: PlateExtractor::new(settings.rectification),
            shaper: ScriptShaper,
            render: BoundingBoxRender::default(),
            fallback: None,
            settings,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn FallbackReader>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Request options taken from the configured defaults.
    pub fn default_options(&self) -> RequestOptions {
        RequestOptions {
            confidence: self.settings.confidence,
            script: self.settings.script,
        }
    }

    /// Finds plates in a frame and crops each one out.
    pub fn detect_plates(
        &self,
        frame: &Mat,
        confidence: f32,
    ) -> Result<PlateDetection, PipelineError> {
        let detections = {
            let _timer = metrics::time_stage(metrics::STAGE_PLATE_DETECTION);
            self.plates.detect(frame, confidence)?
        };
        let plates = {
            let _timer = metrics::time_stage(metrics::STAGE_EXTRACTION);
            self.extractor.extract(frame, &detections)?
        };
        let annotated = self.render.render_plates(frame, &detections.candidates)?;

        info!("Detected {} plate(s)", plates.len());
        Ok(PlateDetection {
            annotated,
            plates,
            detections,
        })
    }

    /// Reads the text on a single plate image.
    pub fn read_plate(
        &self,
        plate: &Mat,
        options: RequestOptions,
    ) -> Result<PlateReading, PipelineError> {
        let reading = {
            let _timer = metrics::time_stage(metrics::STAGE_GLYPH_DETECTION);
            self.reader.read(plate, options.confidence)?
        };

        let (logical, source) = if !reading.text.is_empty() {
            (reading.text, TextSource::Glyphs)
        } else if reading.glyphs.is_empty() {
            match self.fallback_text(plate, options.script) {
                Some(text) => (text, TextSource::Fallback),
                None => (String::new(), TextSource::None),
            }
        } else {
            (String::new(), TextSource::None)
        };

        let text = self.shape(logical, options.script);
        info!("Plate read as {:?} ({:?})", text.display, source);
        Ok(PlateReading {
            annotated: reading.annotated,
            text,
            glyphs: reading.glyphs,
            source,
        })
    }

    /// Detects every plate in the frame and reads each one.
    pub fn recognize(
        &self,
        frame: &Mat,
        options: RequestOptions,
    ) -> Result<PlateRecognition, PipelineError> {
        let detection = self.detect_plates(frame, options.confidence)?;
        let readings = detection
            .plates
            .iter()
            .map(|plate| self.read_plate(&plate.image, options))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PlateRecognition {
            detection,
            readings,
        })
    }

    /// Runs plate detection over sampled frames, stopping at the first plate.
    pub fn scan_frames<I>(&self, frames: I, confidence: f32) -> Result<VideoScan, PipelineError>
    where
        I: IntoIterator<Item = Result<(usize, Mat), FrameError>>,
    {
        let mut frames_examined = 0;
        for sampled in frames {
            let (frame_index, frame) = sampled?;
            frames_examined += 1;

            let detection = self.detect_plates(&frame, confidence)?;
            if !detection.plates.is_empty() {
                info!("Plate found in video frame {}", frame_index);
                return Ok(VideoScan {
                    frames_examined,
                    hit: Some(VideoHit {
                        frame_index,
                        frame,
                        detection,
                    }),
                });
            }
            debug!("No plate in video frame {}", frame_index);
        }
        Ok(VideoScan {
            frames_examined,
            hit: None,
        })
    }

    fn fallback_text(&self, plate: &Mat, script: Script) -> Option<String> {
        let fallback = self.fallback.as_ref()?;
        let _timer = metrics::time_stage(metrics::STAGE_FALLBACK);
        match fallback.read_text(plate, script) {
            Ok(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Err(error) => {
                warn!("Fallback OCR failed: {}", error);
                None
            }
        }
    }

    /// Shapes for display; a shaping failure keeps the unshaped text.
    fn shape(&self, logical: String, script: Script) -> RecognizedText {
        let _timer = metrics::time_stage(metrics::STAGE_SHAPING);
        let display = match self.shaper.shape(&logical, script) {
            Ok(display) => display,
            Err(error) => {
                warn!("Shaping {:?} as {} failed: {}", logical, script, error);
                metrics::record_shaping_fallback();
                logical.clone()
            }
        };
        RecognizedText {
            logical,
            display,
            script,
        }
    }
}

#[cfg(feature = "tesseract")]
fn configured_fallback(settings: &FallbackSettings) -> Option<Box<dyn FallbackReader>> {
    use super::tesseract_fallback::TesseractReader;

    if !settings.enabled {
        return None;
    }
    info!("Tesseract fallback enabled");
    Some(Box::new(TesseractReader::new(settings.tessdata.clone())))
}

#[cfg(not(feature = "tesseract"))]
fn configured_fallback(settings: &FallbackSettings) -> Option<Box<dyn FallbackReader>> {
    if settings.enabled {
        warn!("Fallback OCR requested but plate_reader was built without the tesseract feature");
    }
    None
}
