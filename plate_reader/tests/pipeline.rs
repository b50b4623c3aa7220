use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use opencv::core::Scalar;
use opencv::core::CV_8UC3;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use plate_reader::config::ModelConfig;
use plate_reader::config::PipelineSettings;
use plate_reader::config::ReaderConfig;
use plate_reader::error::DetectorError;
use plate_reader::error::FallbackError;
use plate_reader::error::FrameError;
use plate_reader::error::ModelLoadError;
use plate_reader::error::PipelineError;
use plate_reader::metrics;
use plate_reader::plate_detection::object_detector::DarknetLayout;
use plate_reader::plate_detection::object_detector::DarknetNetwork;
use plate_reader::plate_detection::object_detector::ModelDescriptor;
use plate_reader::plate_detection::object_detector::ModelRole;
use plate_reader::plate_detection::object_detector::Network;
use plate_reader::plate_detection::object_detector::ObjectDetector;
use plate_reader::plate_detection::pipeline::FallbackReader;
use plate_reader::plate_detection::pipeline::PlateRecognizer;
use plate_reader::plate_detection::pipeline::PlateStatus;
use plate_reader::plate_detection::pipeline::RequestOptions;
use plate_reader::plate_detection::pipeline::TextSource;
use plate_reader::plate_detection::pipeline::TextStatus;
use plate_reader::plate_detection::yolo_processor::RawOutput;
use plate_reader::plate_detection::BoundingBox;
use plate_reader::plate_detection::Script;
use plate_reader::plate_detection::Vocabulary;

const FRAME_WIDTH: i32 = 480;
const FRAME_HEIGHT: i32 = 200;

/// Replays canned output layers, one set per forward pass; the last set repeats.
struct ScriptedNetwork {
    descriptor: ModelDescriptor,
    passes: Mutex<VecDeque<Vec<RawOutput>>>,
}

impl ScriptedNetwork {
    fn new(role: ModelRole, vocabulary: Vocabulary, passes: Vec<Vec<RawOutput>>) -> Self {
        Self {
            descriptor: ModelDescriptor {
                role,
                layout: DarknetLayout {
                    input_width: 416,
                    input_height: 416,
                    classes: vocabulary.len(),
                },
                vocabulary,
            },
            passes: Mutex::new(passes.into()),
        }
    }
}

impl Network for ScriptedNetwork {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn forward(&self, _frame: &Mat) -> Result<Vec<RawOutput>, DetectorError> {
        let mut passes = self.passes.lock().map_err(|_| DetectorError::Poisoned)?;
        let outputs = if passes.len() > 1 {
            passes.pop_front().unwrap_or_default()
        } else {
            passes.front().cloned().unwrap_or_default()
        };
        Ok(outputs)
    }
}

struct CountingFallback {
    calls: Arc<AtomicUsize>,
    answer: Result<String, String>,
}

impl FallbackReader for CountingFallback {
    fn read_text(&self, _plate: &Mat, _script: Script) -> Result<String, FallbackError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone().map_err(FallbackError::Engine)
    }
}

fn frame() -> Mat {
    Mat::new_rows_cols_with_default(
        FRAME_HEIGHT,
        FRAME_WIDTH,
        CV_8UC3,
        Scalar::new(40.0, 40.0, 40.0, 0.0),
    )
    .unwrap()
}

/// A YOLO row with a one-hot class score.
fn row(
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    objectness: f32,
    class_id: usize,
    classes: usize,
) -> Vec<f32> {
    let mut values = vec![cx, cy, w, h, objectness];
    values.extend((0..classes).map(|class| if class == class_id { 1.0 } else { 0.0 }));
    values
}

/// One plate covering the middle of the frame: a 240x60 crop.
fn plate_pass() -> Vec<RawOutput> {
    vec![RawOutput::from_rows(&[row(0.5, 0.5, 0.5, 0.3, 0.9, 0, 1)]).unwrap()]
}

fn empty_pass() -> Vec<RawOutput> {
    vec![RawOutput::from_rows(&[row(0.5, 0.5, 0.5, 0.3, 0.1, 0, 1)]).unwrap()]
}

fn digits() -> Vocabulary {
    (0..10).map(|digit| digit.to_string()).collect()
}

/// Glyphs on a 240 pixel wide plate, listed out of reading order.
fn glyph_pass(vocabulary_len: usize) -> Vec<RawOutput> {
    let centers = [120.0, 20.0, 200.0, 60.0, 160.0, 100.0];
    let labels = [4, 1, 7, 2, 6, 3];
    let rows: Vec<Vec<f32>> = centers
        .iter()
        .zip(labels)
        .map(|(x, label)| {
            row(x / 240.0, 0.5, 10.0 / 240.0, 0.8, 0.95, label, vocabulary_len)
        })
        .collect();
    vec![RawOutput::from_rows(&rows).unwrap()]
}

fn recognizer(
    plates: Vec<Vec<RawOutput>>,
    glyphs: Vec<Vec<RawOutput>>,
    vocabulary: Vocabulary,
) -> PlateRecognizer<ScriptedNetwork> {
    let plate_network =
        ScriptedNetwork::new(ModelRole::Plate, ["plate"].into_iter().collect(), plates);
    let glyph_network = ScriptedNetwork::new(ModelRole::Glyph, vocabulary, glyphs);
    PlateRecognizer::new(
        ObjectDetector::new(plate_network, 0.45),
        ObjectDetector::new(glyph_network, 0.4),
        PipelineSettings::default(),
    )
}

fn latin() -> RequestOptions {
    RequestOptions {
        confidence: 0.3,
        script: Script::Latin,
    }
}

#[test]
fn frame_without_plate_is_not_an_error() {
    let recognizer = recognizer(vec![empty_pass()], vec![glyph_pass(10)], digits());

    let recognition = recognizer.recognize(&frame(), latin()).unwrap();
    assert_eq!(recognition.detection.status(), PlateStatus::NoPlate);
    assert!(recognition.readings.is_empty());
    assert_eq!(
        (recognition.detection.annotated.cols(), recognition.detection.annotated.rows()),
        (FRAME_WIDTH, FRAME_HEIGHT)
    );
}

#[test]
fn plate_is_cropped_and_read_left_to_right() {
    let recognizer = recognizer(vec![plate_pass()], vec![glyph_pass(10)], digits());

    let recognition = recognizer.recognize(&frame(), latin()).unwrap();
    let detection = &recognition.detection;
    assert_eq!(detection.status(), PlateStatus::PlatesFound);
    assert_eq!(detection.plates.len(), 1);
    assert_eq!(detection.plates[0].region, BoundingBox::new(120, 70, 240, 60));

    let reading = &recognition.readings[0];
    assert_eq!(reading.status(), TextStatus::TextFound);
    assert_eq!(reading.source, TextSource::Glyphs);
    assert_eq!(reading.text.logical, "123467");
    assert_eq!(reading.text.display, "123467");
    assert_eq!(reading.glyphs.len(), 6);
}

#[test]
fn plate_without_glyphs_has_no_text() {
    let recognizer = recognizer(vec![plate_pass()], vec![vec![]], digits());

    let recognition = recognizer.recognize(&frame(), latin()).unwrap();
    let reading = &recognition.readings[0];
    assert_eq!(reading.status(), TextStatus::NoText);
    assert_eq!(reading.source, TextSource::None);
    assert!(reading.text.is_empty());
}

#[test]
fn unsupported_arabic_text_is_returned_unshaped() {
    let mut labels: Vec<String> = (0..10).map(|digit| digit.to_string()).collect();
    labels[4] = "\u{E000}".to_string();
    let recognizer = recognizer(
        vec![plate_pass()],
        vec![glyph_pass(10)],
        Vocabulary::new(labels),
    );
    let before = metrics::shaping_fallback_count();

    let reading = recognizer
        .read_plate(
            &frame(),
            RequestOptions {
                confidence: 0.3,
                script: Script::Arabic,
            },
        )
        .unwrap();

    assert_eq!(reading.text.logical, "123\u{E000}67");
    assert_eq!(reading.text.display, reading.text.logical);
    assert_eq!(reading.text.script, Script::Arabic);
    assert!(metrics::shaping_fallback_count() > before);
}

#[test]
fn arabic_text_is_shaped_for_display() {
    // Every glyph reads as beh, which joins on both sides.
    let recognizer = recognizer(
        vec![plate_pass()],
        vec![glyph_pass(10)],
        std::iter::repeat("\u{0628}").take(10).collect(),
    );

    let reading = recognizer
        .read_plate(
            &frame(),
            RequestOptions {
                confidence: 0.3,
                script: Script::Arabic,
            },
        )
        .unwrap();

    assert_eq!(reading.text.logical, "\u{0628}".repeat(6));
    assert_ne!(reading.text.display, reading.text.logical);
    assert_eq!(reading.text.display.chars().count(), 6);
}

#[test]
fn fallback_runs_only_without_glyphs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fallback = || {
        Box::new(CountingFallback {
            calls: calls.clone(),
            answer: Ok(" AB 12\n".to_string()),
        })
    };

    let with_glyphs = recognizer(vec![plate_pass()], vec![glyph_pass(10)], digits())
        .with_fallback(fallback());
    let reading = with_glyphs.read_plate(&frame(), latin()).unwrap();
    assert_eq!(reading.source, TextSource::Glyphs);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let without_glyphs =
        recognizer(vec![plate_pass()], vec![vec![]], digits()).with_fallback(fallback());
    let reading = without_glyphs.read_plate(&frame(), latin()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(reading.source, TextSource::Fallback);
    assert_eq!(reading.text.logical, "AB 12");
    assert_eq!(reading.status(), TextStatus::TextFound);
}

#[test]
fn failing_fallback_means_no_text() {
    let calls = Arc::new(AtomicUsize::new(0));
    let recognizer = recognizer(vec![plate_pass()], vec![vec![]], digits()).with_fallback(
        Box::new(CountingFallback {
            calls: calls.clone(),
            answer: Err("engine unavailable".to_string()),
        }),
    );

    let reading = recognizer.read_plate(&frame(), latin()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(reading.status(), TextStatus::NoText);
    assert_eq!(reading.source, TextSource::None);
}

#[test]
fn empty_frame_is_a_detector_error() {
    let recognizer = recognizer(vec![plate_pass()], vec![glyph_pass(10)], digits());

    let result = recognizer.detect_plates(&Mat::default(), 0.3);
    assert!(matches!(
        result,
        Err(PipelineError::Detector(DetectorError::EmptyFrame))
    ));
}

#[test]
fn video_scan_stops_at_first_plate() {
    let recognizer = recognizer(
        vec![empty_pass(), empty_pass(), plate_pass(), plate_pass()],
        vec![glyph_pass(10)],
        digits(),
    );
    let frames = [1, 11, 21, 31]
        .into_iter()
        .map(|index: usize| Ok::<_, FrameError>((index, frame())));

    let scan = recognizer.scan_frames(frames, 0.3).unwrap();
    assert_eq!(scan.frames_examined, 3);
    let hit = scan.hit.unwrap();
    assert_eq!(hit.frame_index, 21);
    assert_eq!(hit.detection.plates.len(), 1);
}

#[test]
fn video_scan_without_plate_examines_every_frame() {
    let recognizer = recognizer(vec![empty_pass()], vec![glyph_pass(10)], digits());
    let frames = [1, 11, 21]
        .into_iter()
        .map(|index: usize| Ok::<_, FrameError>((index, frame())));

    let scan = recognizer.scan_frames(frames, 0.3).unwrap();
    assert_eq!(scan.frames_examined, 3);
    assert!(scan.hit.is_none());
}

#[test]
fn video_decode_failure_aborts_scan() {
    let recognizer = recognizer(vec![empty_pass()], vec![glyph_pass(10)], digits());
    let frames = vec![Ok((1, frame())), Err(FrameError::Undecodable)];

    assert!(matches!(
        recognizer.scan_frames(frames, 0.3),
        Err(PipelineError::Frame(FrameError::Undecodable))
    ));
}

#[test]
fn missing_model_files_fail_loading() {
    let dir = tempfile::tempdir().unwrap();
    let missing = ModelConfig {
        config: dir.path().join("yolov3-detection.cfg"),
        weights: dir.path().join("yolov3-detection_final.weights"),
        names: None,
        nms_threshold: 0.45,
    };

    let result = DarknetNetwork::load(ModelRole::Plate, &missing, false);
    assert!(matches!(
        result,
        Err(ModelLoadError::MissingFile { role: "plate", ref path }) if *path == missing.config
    ));

    let config = ReaderConfig {
        detection: missing,
        ..ReaderConfig::default()
    };
    assert!(PlateRecognizer::load(&config).is_err());
}

#[test]
fn glyph_vocabulary_must_match_declared_classes() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("yolov3-ocr.cfg");
    let weights = dir.path().join("yolov3-ocr_final.weights");
    let names: PathBuf = dir.path().join("yolov3-ocr.names");
    std::fs::write(&cfg, "[net]\nwidth=416\nheight=416\n\n[yolo]\nclasses=3\n").unwrap();
    std::fs::write(&weights, [0u8; 16]).unwrap();
    std::fs::write(&names, "0\n1\n").unwrap();

    let model = ModelConfig {
        config: cfg,
        weights,
        names: Some(names),
        nms_threshold: 0.4,
    };
    assert!(matches!(
        DarknetNetwork::load(ModelRole::Glyph, &model, false),
        Err(ModelLoadError::VocabularyMismatch {
            expected: 3,
            found: 2,
            ..
        })
    ));
}
