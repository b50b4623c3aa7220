pub mod bounding_box_render;
pub mod dnn_ocr;
pub mod frame_source;
pub mod object_detector;
pub mod pipeline;
pub mod plate_extractor;
pub mod script_shaper;
#[cfg(feature = "tesseract")]
pub mod tesseract_fallback;
pub mod video_reader;
pub mod yolo_processor;

use std::fmt;
use std::str::FromStr;

use opencv::core::Rect;
use opencv::prelude::Mat;
use serde::Deserialize;
use serde::Serialize;

/// Axis-aligned box in pixel coordinates of the frame it was decoded against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn center_x(&self) -> f32 {
        self.x as f32 + self.width as f32 / 2.0
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        let intersection = (x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64;
        let union = self.area() + other.area() - intersection;
        if union > 0 {
            intersection as f32 / union as f32
        } else {
            0.0
        }
    }

    /// Clips the box to a `width` x `height` frame. `None` when nothing is left.
    pub fn clamp_to(&self, width: i32, height: i32) -> Option<BoundingBox> {
        let left = self.x.clamp(0, width);
        let top = self.y.clamp(0, height);
        let right = self.right().clamp(0, width);
        let bottom = self.bottom().clamp(0, height);

        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox::new(left, top, right - left, bottom - top))
    }

    pub fn fits_within(&self, width: i32, height: i32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width > 0
            && self.height > 0
            && self.right() <= width
            && self.bottom() <= height
    }
}

impl From<BoundingBox> for Rect {
    fn from(bbox: BoundingBox) -> Self {
        Rect::new(bbox.x, bbox.y, bbox.width, bbox.height)
    }
}

/// A single proposed detection prior to suppression.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub score: f32,
    pub class_id: usize,
}

impl Candidate {
    pub fn new(bbox: BoundingBox, score: f32, class_id: usize) -> Self {
        Self {
            bbox,
            score,
            class_id,
        }
    }
}

/// Candidates that survived suppression, highest score first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    pub candidates: Vec<Candidate>,
}

impl DetectionResult {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }
}

/// Ordered class id -> label mapping, fixed once a model is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<String>,
}

impl Vocabulary {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// A crop of a parent frame. Owns its pixels, not the parent.
pub struct PlateImage {
    pub image: Mat,
    pub region: BoundingBox,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    #[default]
    #[serde(alias = "eng", alias = "ltr")]
    Latin,
    #[serde(alias = "ara", alias = "ar", alias = "rtl")]
    Arabic,
}

impl Script {
    pub fn is_right_to_left(&self) -> bool {
        matches!(self, Script::Arabic)
    }

    /// Tesseract language code for the script.
    pub fn language_code(&self) -> &'static str {
        match self {
            Script::Latin => "eng",
            Script::Arabic => "ara",
        }
    }
}

impl FromStr for Script {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eng" | "ltr" | "latin" => Ok(Script::Latin),
            "ara" | "ar" | "rtl" | "arabic" => Ok(Script::Arabic),
            other => Err(format!("unknown script tag '{other}', expected eng or ara")),
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.language_code())
    }
}

/// Text read off one plate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecognizedText {
    /// Labels concatenated in left-to-right physical order.
    pub logical: String,
    /// `logical` after script shaping, ready for display.
    pub display: String,
    pub script: Script,
}

impl RecognizedText {
    pub fn is_empty(&self) -> bool {
        self.logical.is_empty()
    }
}
