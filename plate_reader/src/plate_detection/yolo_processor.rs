use std::cmp::Ordering;

use tracing::debug;

use super::BoundingBox;
use super::Candidate;
use super::DetectionResult;
use crate::error::DetectorError;

/// Values before the class scores in a YOLO output row: cx, cy, w, h, objectness.
const YOLO_ROW_HEADER: usize = 5;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_PLATE_NMS_THRESHOLD: f32 = 0.45;
pub const DEFAULT_GLYPH_NMS_THRESHOLD: f32 = 0.4;

/// One output layer of a YOLO network, row-major `rows x cols`.
///
/// Each row is `[cx, cy, w, h, objectness, class probabilities...]` with the
/// class probabilities conditional on an object being present, so the score
/// of a class is `objectness * probability`. OpenCV's Darknet layers emit
/// class columns already multiplied by objectness; those go through
/// [`RawOutput::from_objectness_scaled`].
#[derive(Clone, Debug, PartialEq)]
pub struct RawOutput {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl RawOutput {
    pub fn new(cols: usize, data: Vec<f32>) -> Result<Self, DetectorError> {
        if cols <= YOLO_ROW_HEADER {
            return Err(DetectorError::MalformedOutput { cols });
        }
        if data.len() % cols != 0 {
            return Err(DetectorError::RaggedOutput {
                len: data.len(),
                cols,
            });
        }
        Ok(Self {
            rows: data.len() / cols,
            cols,
            data,
        })
    }

    /// Builds an output from rows whose class columns already include objectness.
    pub fn from_objectness_scaled(
        cols: usize,
        mut data: Vec<f32>,
    ) -> Result<Self, DetectorError> {
        if cols <= YOLO_ROW_HEADER {
            return Err(DetectorError::MalformedOutput { cols });
        }
        for row in data.chunks_exact_mut(cols) {
            let objectness = row[4];
            for score in &mut row[YOLO_ROW_HEADER..] {
                *score = if objectness > 0.0 {
                    (*score / objectness).min(1.0)
                } else {
                    0.0
                };
            }
        }
        Self::new(cols, data)
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, DetectorError> {
        let cols = rows.first().map(Vec::len).unwrap_or(YOLO_ROW_HEADER + 1);
        if let Some(bad) = rows.iter().find(|row| row.len() != cols) {
            return Err(DetectorError::RaggedOutput {
                len: bad.len(),
                cols,
            });
        }
        Self::new(cols, rows.concat())
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.cols)
    }
}

/// Box decoding and non-max suppression, shared by the plate and glyph stages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloProcessor {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for YoloProcessor {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_PLATE_NMS_THRESHOLD,
        }
    }
}

impl YoloProcessor {
    pub fn new(confidence_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            nms_threshold,
        }
    }

    /// Turns raw rows into candidates in pixel space of a `frame_width` x `frame_height` frame.
    pub fn decode(
        &self,
        outputs: &[RawOutput],
        frame_width: i32,
        frame_height: i32,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for output in outputs {
            for row in output.rows() {
                let objectness = row[4];
                let (class_id, class_score) = best_class(&row[YOLO_ROW_HEADER..]);
                let score = objectness * class_score;
                if !(score >= self.confidence_threshold) {
                    continue;
                }

                let center_x = row[0] * frame_width as f32;
                let center_y = row[1] * frame_height as f32;
                let width = row[2] * frame_width as f32;
                let height = row[3] * frame_height as f32;
                let unclamped = BoundingBox::new(
                    (center_x - width / 2.0).round() as i32,
                    (center_y - height / 2.0).round() as i32,
                    width.round() as i32,
                    height.round() as i32,
                );

                match unclamped.clamp_to(frame_width, frame_height) {
                    Some(bbox) => candidates.push(Candidate::new(bbox, score, class_id)),
                    None => debug!("Dropping degenerate box {:?}", unclamped),
                }
            }
        }

        candidates
    }

    /// Greedy class-agnostic suppression; equal scores keep detection order.
    pub fn suppress(&self, mut candidates: Vec<Candidate>) -> DetectionResult {
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let overlaps = kept
                .iter()
                .any(|best| best.bbox.iou(&candidate.bbox) > self.nms_threshold);
            if !overlaps {
                kept.push(candidate);
            }
        }

        DetectionResult::new(kept)
    }

    pub fn post_process(
        &self,
        outputs: &[RawOutput],
        frame_width: i32,
        frame_height: i32,
    ) -> DetectionResult {
        let candidates = self.decode(outputs, frame_width, frame_height);
        let decoded = candidates.len();
        let result = self.suppress(candidates);
        debug!(
            "Decoded {} candidates, {} survived suppression",
            decoded,
            result.len()
        );
        result
    }
}

fn best_class(scores: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::MIN);
    for (class_id, &score) in scores.iter().enumerate() {
        if score > best.1 {
            best = (class_id, score);
        }
    }
    best
}
