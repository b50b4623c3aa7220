use opencv::core::Point;
use opencv::core::Point2f;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::BORDER_CONSTANT;
use opencv::core::BORDER_DEFAULT;
use opencv::imgproc::approx_poly_dp;
use opencv::imgproc::arc_length;
use opencv::imgproc::canny;
use opencv::imgproc::contour_area;
use opencv::imgproc::cvt_color;
use opencv::imgproc::find_contours;
use opencv::imgproc::gaussian_blur;
use opencv::imgproc::get_perspective_transform;
use opencv::imgproc::warp_perspective;
use opencv::imgproc::CHAIN_APPROX_SIMPLE;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::imgproc::INTER_LINEAR;
use opencv::imgproc::RETR_EXTERNAL;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::DetectionResult;
use super::PlateImage;

/// Smallest share of the crop a quadrilateral must cover to be trusted as the plate outline.
const MIN_QUAD_COVERAGE: f64 = 0.3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rectification {
    /// Axis-aligned crop of the detected box.
    #[default]
    Crop,
    /// Warp the plate outline found inside the box to a fixed size.
    Perspective { width: i32, height: i32 },
}

pub struct PlateExtractor {
    rectification: Rectification,
}

impl PlateExtractor {
    pub fn new(rectification: Rectification) -> Self {
        Self { rectification }
    }

    /// One plate image per surviving detection, each clipped to the frame.
    pub fn extract(
        &self,
        frame: &Mat,
        detections: &DetectionResult,
    ) -> opencv::Result<Vec<PlateImage>> {
        let mut plates = Vec::with_capacity(detections.len());
        for detection in detections.iter() {
            let Some(region) = detection.bbox.clamp_to(frame.cols(), frame.rows()) else {
                debug!("Plate box {:?} lies outside the frame", detection.bbox);
                continue;
            };

            let cropped = frame.apply_1(Rect::from(region))?.try_clone()?;
            let image = match self.rectification {
                Rectification::Crop => cropped,
                Rectification::Perspective { width, height } => {
                    reshape_plate(&cropped, Size::new(width, height))?
                }
            };

            plates.push(PlateImage {
                image,
                region,
                score: detection.score,
            });
        }
        Ok(plates)
    }
}

fn reshape_plate(cropped: &Mat, output_size: Size) -> opencv::Result<Mat> {
    let Some(outline) = find_plate_outline(cropped)? else {
        debug!("No plate outline found, keeping axis-aligned crop");
        return cropped.try_clone();
    };

    let mut target = Vector::<Point2f>::default();
    target.push(Point2f::new(0.0, 0.0));
    target.push(Point2f::new(output_size.width as f32 - 1.0, 0.0));
    target.push(Point2f::new(
        output_size.width as f32 - 1.0,
        output_size.height as f32 - 1.0,
    ));
    target.push(Point2f::new(0.0, output_size.height as f32 - 1.0));

    let source: Vector<Point2f> = order_corners(outline).into_iter().collect();
    let perspective = get_perspective_transform(&source, &target, 0)?;
    let mut output = Mat::default();
    warp_perspective(
        cropped,
        &mut output,
        &perspective,
        output_size,
        INTER_LINEAR,
        BORDER_CONSTANT,
        Scalar::default(),
    )?;
    Ok(output)
}

/// Largest four-corner contour covering enough of the crop.
fn find_plate_outline(cropped: &Mat) -> opencv::Result<Option<[Point2f; 4]>> {
    let mut grey = Mat::default();
    cvt_color(cropped, &mut grey, COLOR_BGR2GRAY, 0)?;
    let mut blurred = Mat::default();
    gaussian_blur(
        &grey,
        &mut blurred,
        Size::new(5, 5),
        0.0,
        0.0,
        BORDER_DEFAULT,
    )?;
    let mut edges = Mat::default();
    canny(&blurred, &mut edges, 50.0, 150.0, 3, false)?;

    let mut contours = Vector::<Vector<Point>>::default();
    find_contours(
        &edges,
        &mut contours,
        RETR_EXTERNAL,
        CHAIN_APPROX_SIMPLE,
        Point::default(),
    )?;

    let min_area = cropped.cols() as f64 * cropped.rows() as f64 * MIN_QUAD_COVERAGE;
    let mut best: Option<(f64, [Point2f; 4])> = None;
    for contour in contours.iter() {
        let mut polygon = Vector::<Point>::default();
        let epsilon = 0.02 * arc_length(&contour, true)?;
        approx_poly_dp(&contour, &mut polygon, epsilon, true)?;
        if polygon.len() != 4 {
            continue;
        }

        let area = contour_area(&polygon, false)?;
        if area < min_area || best.map_or(false, |(best_area, _)| best_area >= area) {
            continue;
        }
        let mut corners = [Point2f::default(); 4];
        for (corner, point) in corners.iter_mut().zip(polygon.iter()) {
            *corner = Point2f::new(point.x as f32, point.y as f32);
        }
        best = Some((area, corners));
    }

    Ok(best.map(|(_, corners)| corners))
}

/// Orders four corners as top-left, top-right, bottom-right, bottom-left.
fn order_corners(corners: [Point2f; 4]) -> [Point2f; 4] {
    let pick = |key: fn(&Point2f) -> f32, largest: bool| {
        let mut best = corners[0];
        for corner in &corners[1..] {
            let better = if largest {
                key(corner) > key(&best)
            } else {
                key(corner) < key(&best)
            };
            if better {
                best = *corner;
            }
        }
        best
    };

    let sum: fn(&Point2f) -> f32 = |p| p.x + p.y;
    let diff: fn(&Point2f) -> f32 = |p| p.y - p.x;
    [pick(sum, false), pick(diff, false), pick(sum, true), pick(diff, true)]
}
