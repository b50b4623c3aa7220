//! Process-wide Prometheus metrics, registered once on first use.

use lazy_static::lazy_static;
use prometheus::register_histogram_vec;
use prometheus::register_int_counter;
use prometheus::register_int_counter_vec;
use prometheus::Encoder;
use prometheus::HistogramTimer;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::TextEncoder;

pub const STAGE_PLATE_DETECTION: &str = "plate_detection";
pub const STAGE_EXTRACTION: &str = "plate_extraction";
pub const STAGE_GLYPH_DETECTION: &str = "glyph_detection";
pub const STAGE_SHAPING: &str = "shaping";
pub const STAGE_FALLBACK: &str = "fallback_ocr";

lazy_static! {
    static ref STAGE_SECONDS: HistogramVec = register_histogram_vec!(
        "plate_reader_stage_seconds",
        "Wall time spent in each pipeline stage",
        &["stage"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("stage histogram registers once");
    static ref REQUEST_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "plate_reader_requests_total",
        "Requests by operation and outcome status",
        &["operation", "status"]
    )
    .expect("outcome counter registers once");
    static ref SHAPING_FALLBACKS: IntCounter = register_int_counter!(
        "plate_reader_shaping_fallbacks_total",
        "Recognized texts returned unshaped because shaping failed"
    )
    .expect("shaping counter registers once");
}

/// Starts timing a stage; the duration is recorded when the timer drops.
pub fn time_stage(stage: &str) -> HistogramTimer {
    STAGE_SECONDS.with_label_values(&[stage]).start_timer()
}

pub fn record_outcome(operation: &str, status: &str) {
    REQUEST_OUTCOMES
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_shaping_fallback() {
    SHAPING_FALLBACKS.inc();
}

pub fn outcome_count(operation: &str, status: &str) -> u64 {
    REQUEST_OUTCOMES
        .with_label_values(&[operation, status])
        .get()
}

pub fn shaping_fallback_count() -> u64 {
    SHAPING_FALLBACKS.get()
}

/// Text exposition of everything in the default registry.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|error| prometheus::Error::Msg(error.to_string()))
}
