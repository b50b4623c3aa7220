use std::path::PathBuf;

use thiserror::Error;

/// Raised while loading a (config, weights) pair. Fatal at startup.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("{role} model file is missing: {path}")]
    MissingFile { role: &'static str, path: PathBuf },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed network config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
    #[error("OpenCV rejected network {path}: {source}")]
    Network {
        path: PathBuf,
        #[source]
        source: opencv::Error,
    },
    #[error("vocabulary {path} has a blank label on line {line}")]
    BlankLabel { path: PathBuf, line: usize },
    #[error("{role} model requires a label vocabulary")]
    MissingVocabulary { role: &'static str },
    #[error("vocabulary {path} has {found} labels but the network declares {expected} classes")]
    VocabularyMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

/// The input image could not be turned into a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("image payload is empty")]
    Empty,
    #[error("image could not be decoded")]
    Undecodable,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot open video {0}")]
    VideoOpen(String),
    #[error("OpenCV error while reading frame: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Inference failed. Aborts the request, never retried.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("network output row has {cols} values, expected at least 6")]
    MalformedOutput { cols: usize },
    #[error("network output holds {len} values, not a multiple of row width {cols}")]
    RaggedOutput { len: usize, cols: usize },
    #[error("network handle lock was poisoned")]
    Poisoned,
    #[error("frame is empty")]
    EmptyFrame,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShapingError {
    #[error("unsupported character {ch:?} (U+{code:04X}) at position {position}")]
    Unsupported {
        ch: char,
        code: u32,
        position: usize,
    },
}

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("fallback OCR engine failed: {0}")]
    Engine(String),
    #[error("cannot prepare plate image: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Per-request failure surfaced to the caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame decode failure: {0}")]
    Frame(#[from] FrameError),
    #[error("detector failure: {0}")]
    Detector(#[from] DetectorError),
    #[error("image processing failure: {0}")]
    Imaging(#[from] opencv::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f32 },
    #[error("perspective plate size must be positive, got {width}x{height}")]
    InvalidPlateSize { width: i32, height: i32 },
}
