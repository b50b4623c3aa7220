use std::cmp::Ordering;

use opencv::prelude::Mat;
use tracing::debug;
use tracing::warn;

use super::bounding_box_render::BoundingBoxRender;
use super::object_detector::Network;
use super::object_detector::ObjectDetector;
use super::Candidate;
use super::DetectionResult;
use super::Vocabulary;
use crate::error::PipelineError;

/// Glyphs found on one plate, in reading order.
pub struct GlyphReading {
    pub glyphs: DetectionResult,
    pub text: String,
    pub annotated: Mat,
}

/// Second detection stage: every character on the plate is a class of the glyph network.
pub struct DnnOcrReader<N> {
    detector: ObjectDetector<N>,
    render: BoundingBoxRender,
}

impl<N: Network> DnnOcrReader<N> {
    pub fn new(detector: ObjectDetector<N>) -> Self {
        Self {
            detector,
            render: BoundingBoxRender::default(),
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.detector.descriptor().vocabulary
    }

    pub fn read(&self, plate: &Mat, confidence: f32) -> Result<GlyphReading, PipelineError> {
        let detections = self.detector.detect(plate, confidence)?;
        let glyphs = order_glyphs(&detections.candidates);
        let text = assemble_text(&glyphs, self.vocabulary());
        debug!("Read {} glyphs as {:?}", glyphs.len(), text);

        let annotated = self.render.render_glyphs(plate, &glyphs, self.vocabulary())?;
        Ok(GlyphReading {
            glyphs: DetectionResult::new(glyphs),
            text,
            annotated,
        })
    }
}

/// Sorts glyphs left to right by horizontal center.
///
/// The result depends only on the set of glyphs, never on the order the
/// network emitted them in: ties fall back to the top edge, class and score.
pub fn order_glyphs(glyphs: &[Candidate]) -> Vec<Candidate> {
    let mut ordered = glyphs.to_vec();
    ordered.sort_by(|a, b| {
        a.bbox
            .center_x()
            .partial_cmp(&b.bbox.center_x())
            .unwrap_or(Ordering::Equal)
            .then(a.bbox.y.cmp(&b.bbox.y))
            .then(a.class_id.cmp(&b.class_id))
            .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
    ordered
}

/// Concatenates the labels of already ordered glyphs, without separator.
pub fn assemble_text(ordered: &[Candidate], vocabulary: &Vocabulary) -> String {
    let mut text = String::new();
    for glyph in ordered {
        match vocabulary.label(glyph.class_id) {
            Some(label) => text.push_str(label),
            None => warn!(
                "Glyph class {} is outside the {}-label vocabulary",
                glyph.class_id,
                vocabulary.len()
            ),
        }
    }
    text
}
