//! JSON response documents handed to the request layer.
//!
//! Images are embedded as base64 JPEG strings when requested, mirroring the
//! fields the web client consumes (`original_image`, `detection_image`,
//! `plate_image`, `segmented_image`).

use std::fmt::Display;

use opencv::prelude::Mat;
use serde::Serialize;

use crate::metrics;
use crate::plate_detection::frame_source::encode_base64_jpeg;
use crate::plate_detection::pipeline::PlateDetection;
use crate::plate_detection::pipeline::PlateReading;
use crate::plate_detection::pipeline::PlateRecognition;
use crate::plate_detection::pipeline::PlateStatus;
use crate::plate_detection::pipeline::TextSource;
use crate::plate_detection::pipeline::TextStatus;
use crate::plate_detection::pipeline::VideoScan;
use crate::plate_detection::BoundingBox;
use crate::plate_detection::Script;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    NoPlateDetected,
    NoTextDetected,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::NoPlateDetected => "no_plate_detected",
            Status::NoTextDetected => "no_text_detected",
            Status::Error => "error",
        }
    }
}

impl From<PlateStatus> for Status {
    fn from(status: PlateStatus) -> Self {
        match status {
            PlateStatus::PlatesFound => Status::Success,
            PlateStatus::NoPlate => Status::NoPlateDetected,
        }
    }
}

impl From<TextStatus> for Status {
    fn from(status: TextStatus) -> Self {
        match status {
            TextStatus::TextFound => Status::Success,
            TextStatus::NoText => Status::NoTextDetected,
        }
    }
}

/// Whether response documents carry base64 images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Images {
    Embed,
    Omit,
}

impl Images {
    fn encode(&self, image: &Mat) -> opencv::Result<Option<String>> {
        match self {
            Images::Embed => encode_base64_jpeg(image).map(Some),
            Images::Omit => Ok(None),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlateEntry {
    pub plate_index: usize,
    pub region: BoundingBox,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub status: Status,
    pub detection: Vec<PlateEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_image: Option<String>,
}

impl DetectResponse {
    pub fn new(original: &Mat, detection: &PlateDetection, images: Images) -> opencv::Result<Self> {
        let response = Self {
            status: Status::from(detection.status()),
            detection: plate_entries(detection, images)?,
            original_image: images.encode(original)?,
            detection_image: images.encode(&detection.annotated)?,
        };
        metrics::record_outcome("detect", response.status.as_str());
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub status: Status,
    /// Display form: shaped and reordered for right-to-left scripts.
    pub plate_text: String,
    pub logical_text: String,
    pub lang: Script,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmented_image: Option<String>,
}

impl OcrResponse {
    pub fn new(reading: &PlateReading, images: Images) -> opencv::Result<Self> {
        let response = from_reading(Status::from(reading.status()), reading, images)?;
        metrics::record_outcome("ocr", response.status.as_str());
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
pub struct RecognizedPlate {
    #[serde(flatten)]
    pub plate: PlateEntry,
    #[serde(flatten)]
    pub reading: OcrResponse,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub status: Status,
    pub plates: Vec<RecognizedPlate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_image: Option<String>,
}

impl RecognizeResponse {
    pub fn new(
        original: &Mat,
        recognition: &PlateRecognition,
        images: Images,
    ) -> opencv::Result<Self> {
        let detection = &recognition.detection;
        let status = if detection.plates.is_empty() {
            Status::NoPlateDetected
        } else if recognition.readings.iter().all(|reading| reading.text.is_empty()) {
            Status::NoTextDetected
        } else {
            Status::Success
        };
        let mut plates = Vec::with_capacity(recognition.readings.len());
        for (plate, reading) in plate_entries(detection, images)?
            .into_iter()
            .zip(&recognition.readings)
        {
            plates.push(RecognizedPlate {
                plate,
                reading: from_reading(Status::from(reading.status()), reading, images)?,
            });
        }

        let response = Self {
            status,
            plates,
            original_image: images.encode(original)?,
            detection_image: images.encode(&detection.annotated)?,
        };
        metrics::record_outcome("recognize", response.status.as_str());
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub status: Status,
    pub frames_examined: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<usize>,
    pub detection: Vec<PlateEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_image: Option<String>,
}

impl VideoResponse {
    pub fn new(scan: &VideoScan, images: Images) -> opencv::Result<Self> {
        let response = match &scan.hit {
            Some(hit) => Self {
                status: Status::Success,
                frames_examined: scan.frames_examined,
                frame_index: Some(hit.frame_index),
                detection: plate_entries(&hit.detection, images)?,
                original_image: images.encode(&hit.frame)?,
                detection_image: images.encode(&hit.detection.annotated)?,
            },
            None => Self {
                status: Status::NoPlateDetected,
                frames_examined: scan.frames_examined,
                frame_index: None,
                detection: Vec::new(),
                original_image: None,
                detection_image: None,
            },
        };
        metrics::record_outcome("video", response.status.as_str());
        Ok(response)
    }
}

/// A request that failed; never conflated with an empty result.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: Status,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(operation: &str, error: &dyn Display) -> Self {
        metrics::record_outcome(operation, Status::Error.as_str());
        Self {
            status: Status::Error,
            message: error.to_string(),
        }
    }
}

fn plate_entries(detection: &PlateDetection, images: Images) -> opencv::Result<Vec<PlateEntry>> {
    detection
        .plates
        .iter()
        .enumerate()
        .map(|(plate_index, plate)| {
            Ok(PlateEntry {
                plate_index,
                region: plate.region,
                score: plate.score,
                plate_image: images.encode(&plate.image)?,
            })
        })
        .collect()
}

fn from_reading(
    status: Status,
    reading: &PlateReading,
    images: Images,
) -> opencv::Result<OcrResponse> {
    Ok(OcrResponse {
        status,
        plate_text: reading.text.display.clone(),
        logical_text: reading.text.logical.clone(),
        lang: reading.text.script,
        source: match reading.source {
            TextSource::Glyphs => "glyphs",
            TextSource::Fallback => "fallback",
            TextSource::None => "none",
        },
        segmented_image: images.encode(&reading.annotated)?,
    })
}
