use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use opencv::core::Vector;
use opencv::imgcodecs::imwrite;
use opencv::prelude::Mat;
use serde::Serialize;
use serde_json::json;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plate_reader::config::ModelConfig;
use plate_reader::config::ReaderConfig;
use plate_reader::error::FrameError;
use plate_reader::error::PipelineError;
use plate_reader::metrics;
use plate_reader::plate_detection::frame_source::decode_base64_image;
use plate_reader::plate_detection::frame_source::read_image_file;
use plate_reader::plate_detection::pipeline::PlateDetection;
use plate_reader::plate_detection::pipeline::PlateReading;
use plate_reader::plate_detection::pipeline::PlateRecognizer;
use plate_reader::plate_detection::pipeline::RequestOptions;
use plate_reader::plate_detection::video_reader::VideoReader;
use plate_reader::plate_detection::Script;
use plate_reader::report::DetectResponse;
use plate_reader::report::ErrorResponse;
use plate_reader::report::Images;
use plate_reader::report::OcrResponse;
use plate_reader::report::RecognizeResponse;
use plate_reader::report::VideoResponse;

/// License plate detection and recognition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration; built-in defaults when omitted.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Confidence threshold (0.0 - 1.0), overrides the configuration.
    #[arg(long, value_name = "THRESHOLD", global = true)]
    confidence: Option<f32>,

    /// Run inference on the CUDA backend.
    #[arg(long, global = true)]
    gpu: bool,

    /// Print the Prometheus exposition to stderr before exiting.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate plates in a photograph.
    Detect(ImageArgs),
    /// Read the text on an already cropped plate image.
    Ocr {
        #[command(flatten)]
        image: ImageArgs,
        /// Script of the plate text: eng or ara.
        #[arg(long, value_name = "LANG")]
        lang: Option<Script>,
    },
    /// Locate every plate in a photograph and read it.
    Recognize {
        #[command(flatten)]
        image: ImageArgs,
        #[arg(long, value_name = "LANG")]
        lang: Option<Script>,
    },
    /// Scan a video for the first sampled frame holding a plate.
    Video {
        #[arg(value_name = "VIDEO")]
        input: PathBuf,
        /// Examine every n-th frame.
        #[arg(long, value_name = "N")]
        every: Option<usize>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Report which model files are present.
    CheckModels,
}

#[derive(Args, Debug)]
struct ImageArgs {
    /// Image file, or a file holding a base64 payload with --base64.
    #[arg(value_name = "IMAGE")]
    input: PathBuf,

    #[arg(long)]
    base64: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Directory receiving annotated images and crops as JPEG.
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Leave base64 images out of the JSON response.
    #[arg(long)]
    no_images: bool,
}

impl OutputArgs {
    fn images(&self) -> Images {
        if self.no_images {
            Images::Omit
        } else {
            Images::Embed
        }
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let code = match &cli.command {
        Command::CheckModels => check_models(&config)?,
        command => {
            let recognizer = PlateRecognizer::load(&config).context("cannot load models")?;
            info!("Models loaded");
            run_request(&recognizer, command)?
        }
    };

    if cli.metrics {
        eprintln!("{}", metrics::gather_text()?);
    }
    Ok(code)
}

fn load_config(cli: &Cli) -> Result<ReaderConfig> {
    let mut config = match &cli.config {
        Some(path) => ReaderConfig::load(path)?,
        None => ReaderConfig::default(),
    };
    if let Some(confidence) = cli.confidence {
        config.pipeline.confidence = confidence;
    }
    if cli.gpu {
        config.pipeline.use_gpu = true;
    }
    config.validate()?;
    Ok(config)
}

fn run_request(recognizer: &PlateRecognizer, command: &Command) -> Result<ExitCode> {
    let defaults = recognizer.default_options();
    let options = |lang: &Option<Script>| RequestOptions {
        confidence: defaults.confidence,
        script: lang.unwrap_or(defaults.script),
    };

    let (operation, outcome) = match command {
        Command::Detect(image) => ("detect", detect(recognizer, image, defaults.confidence)),
        Command::Ocr { image, lang } => ("ocr", ocr(recognizer, image, options(lang))),
        Command::Recognize { image, lang } => {
            ("recognize", recognize(recognizer, image, options(lang)))
        }
        Command::Video {
            input,
            every,
            output,
        } => {
            let every = every.unwrap_or(recognizer.settings().video_sample_every);
            ("video", video(recognizer, input, every, output, defaults.confidence))
        }
        Command::CheckModels => unreachable!("handled before models are loaded"),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(RequestFailure::Pipeline(failure)) => {
            error!("{} request failed: {}", operation, failure);
            print_json(&ErrorResponse::new(operation, &failure))?;
            Ok(ExitCode::FAILURE)
        }
        Err(RequestFailure::Other(failure)) => Err(failure),
    }
}

/// Pipeline failures become error documents; anything else aborts the process.
enum RequestFailure {
    Pipeline(PipelineError),
    Other(anyhow::Error),
}

impl From<PipelineError> for RequestFailure {
    fn from(error: PipelineError) -> Self {
        RequestFailure::Pipeline(error)
    }
}

impl From<FrameError> for RequestFailure {
    fn from(error: FrameError) -> Self {
        RequestFailure::Pipeline(error.into())
    }
}

impl From<opencv::Error> for RequestFailure {
    fn from(error: opencv::Error) -> Self {
        RequestFailure::Pipeline(error.into())
    }
}

fn fail(error: impl Into<anyhow::Error>) -> RequestFailure {
    RequestFailure::Other(error.into())
}

fn read_input(image: &ImageArgs) -> Result<Mat, RequestFailure> {
    let frame = if image.base64 {
        let payload = fs::read_to_string(&image.input).map_err(FrameError::from)?;
        decode_base64_image(&payload)?
    } else {
        read_image_file(&image.input)?
    };
    Ok(frame)
}

fn detect(
    recognizer: &PlateRecognizer,
    image: &ImageArgs,
    confidence: f32,
) -> Result<(), RequestFailure> {
    let frame = read_input(image)?;
    let detection = recognizer.detect_plates(&frame, confidence)?;

    if let Some(dir) = &image.output.out_dir {
        write_detection(dir, "", &frame, &detection).map_err(fail)?;
    }
    let response = DetectResponse::new(&frame, &detection, image.output.images())?;
    print_json(&response).map_err(fail)
}

fn ocr(
    recognizer: &PlateRecognizer,
    image: &ImageArgs,
    options: RequestOptions,
) -> Result<(), RequestFailure> {
    let plate = read_input(image)?;
    let reading = recognizer.read_plate(&plate, options)?;

    if let Some(dir) = &image.output.out_dir {
        write_reading(dir, "plate", &reading).map_err(fail)?;
    }
    let response = OcrResponse::new(&reading, image.output.images())?;
    print_json(&response).map_err(fail)
}

fn recognize(
    recognizer: &PlateRecognizer,
    image: &ImageArgs,
    options: RequestOptions,
) -> Result<(), RequestFailure> {
    let frame = read_input(image)?;
    let recognition = recognizer.recognize(&frame, options)?;

    if let Some(dir) = &image.output.out_dir {
        write_detection(dir, "", &frame, &recognition.detection).map_err(fail)?;
        for (index, reading) in recognition.readings.iter().enumerate() {
            write_reading(dir, &format!("plate_{index}"), reading).map_err(fail)?;
        }
    }
    let response = RecognizeResponse::new(&frame, &recognition, image.output.images())?;
    print_json(&response).map_err(fail)
}

fn video(
    recognizer: &PlateRecognizer,
    input: &Path,
    every: usize,
    output: &OutputArgs,
    confidence: f32,
) -> Result<(), RequestFailure> {
    let frames = VideoReader::from_file(input, every)?;
    let scan = recognizer.scan_frames(frames, confidence)?;

    if let (Some(dir), Some(hit)) = (&output.out_dir, &scan.hit) {
        let prefix = format!("video_{}_", hit.frame_index);
        write_detection(dir, &prefix, &hit.frame, &hit.detection).map_err(fail)?;
    }
    let response = VideoResponse::new(&scan, output.images())?;
    print_json(&response).map_err(fail)
}

fn write_detection(
    dir: &Path,
    prefix: &str,
    frame: &Mat,
    detection: &PlateDetection,
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    write_jpeg(&dir.join(format!("{prefix}original.jpg")), frame)?;
    write_jpeg(&dir.join(format!("{prefix}car_detection.jpg")), &detection.annotated)?;
    for (index, plate) in detection.plates.iter().enumerate() {
        write_jpeg(&dir.join(format!("{prefix}plate_{index}.jpg")), &plate.image)?;
    }
    Ok(())
}

fn write_reading(dir: &Path, stem: &str, reading: &PlateReading) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    write_jpeg(&dir.join(format!("{stem}_segmented.jpg")), &reading.annotated)
}

fn write_jpeg(path: &Path, image: &Mat) -> Result<()> {
    let written = imwrite(&path.to_string_lossy(), image, &Vector::<i32>::new())?;
    anyhow::ensure!(written, "OpenCV could not write {}", path.display());
    Ok(())
}

fn check_models(config: &ReaderConfig) -> Result<ExitCode> {
    let report = |model: &ModelConfig| {
        model
            .files()
            .into_iter()
            .map(|path| (path.display().to_string(), json!(path.is_file())))
            .collect::<serde_json::Map<_, _>>()
    };
    let ready = config
        .detection
        .files()
        .into_iter()
        .chain(config.ocr.files())
        .all(Path::is_file);

    print_json(&json!({
        "detection": report(&config.detection),
        "ocr": report(&config.ocr),
        "ready": ready,
    }))?;
    Ok(if ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
