use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_PLAIN;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use super::Candidate;
use super::Vocabulary;

const HEADER_HEIGHT_PX: i32 = 20;

/// Draws detections onto a copy of an image. Presentation only.
pub struct BoundingBoxRender {
    box_color: Scalar,
    header_color: Scalar,
    text_color: Scalar,
    thickness_px: i32,
}

impl Default for BoundingBoxRender {
    fn default() -> Self {
        Self {
            box_color: Scalar::from((0.0, 255.0, 0.0)),
            header_color: Scalar::from((255.0, 0.0, 0.0)),
            text_color: Scalar::from((255.0, 255.0, 255.0)),
            thickness_px: 2,
        }
    }
}

impl BoundingBoxRender {
    /// Plate boxes with a `plate <score>` header above each one.
    pub fn render_plates(&self, frame: &Mat, plates: &[Candidate]) -> opencv::Result<Mat> {
        let mut image = frame.try_clone()?;
        for plate in plates {
            let label = format!("plate {:.2}", plate.score);
            self.draw_labelled_box(&mut image, plate, &label, 1.2)?;
        }
        Ok(image)
    }

    /// Glyph boxes labelled with the character each one was read as.
    pub fn render_glyphs(
        &self,
        plate: &Mat,
        glyphs: &[Candidate],
        vocabulary: &Vocabulary,
    ) -> opencv::Result<Mat> {
        let mut image = plate.try_clone()?;
        for glyph in glyphs {
            let label = vocabulary.label(glyph.class_id).unwrap_or("?");
            self.draw_labelled_box(&mut image, glyph, label, 0.9)?;
        }
        Ok(image)
    }

    fn draw_labelled_box(
        &self,
        image: &mut Mat,
        candidate: &Candidate,
        label: &str,
        font_scale: f64,
    ) -> opencv::Result<()> {
        let bbox = candidate.bbox;
        rectangle(
            image,
            Rect::from(bbox),
            self.box_color,
            self.thickness_px,
            LineTypes::LINE_4 as i32,
            0,
        )?;

        // Header sits above the box, or inside it when the box touches the top edge.
        let header_top = if bbox.y >= HEADER_HEIGHT_PX {
            bbox.y - HEADER_HEIGHT_PX
        } else {
            bbox.y
        };
        let header_width = bbox.width.min(image.cols() - bbox.x).max(1);
        let header = Rect::new(bbox.x, header_top, header_width, HEADER_HEIGHT_PX);
        rectangle(
            image,
            header,
            self.header_color,
            -1,
            LineTypes::LINE_4 as i32,
            0,
        )?;
        put_text(
            image,
            label,
            Point::new(bbox.x + 2, header_top + HEADER_HEIGHT_PX - 4),
            FONT_HERSHEY_PLAIN,
            font_scale,
            self.text_color,
            1,
            LINE_8,
            false,
        )
    }
}
