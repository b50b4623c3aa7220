//! Decoding uploaded images into BGR frames.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use opencv::core::Vector;
use opencv::imgcodecs::imdecode;
use opencv::imgcodecs::imencode;
use opencv::imgcodecs::IMREAD_COLOR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use crate::error::FrameError;

/// Decodes an encoded image (JPEG, PNG, ...) held in memory.
pub fn decode_image(bytes: &[u8]) -> Result<Mat, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let buffer = Vector::<u8>::from_slice(bytes);
    let frame = imdecode(&buffer, IMREAD_COLOR)?;
    if frame.empty() {
        return Err(FrameError::Undecodable);
    }
    Ok(frame)
}

pub fn read_image_file(path: &Path) -> Result<Mat, FrameError> {
    let bytes = std::fs::read(path)?;
    decode_image(&bytes)
}

/// Decodes a base64 image, with or without a `data:image/...;base64,` header.
pub fn decode_base64_image(payload: &str) -> Result<Mat, FrameError> {
    let encoded = match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    };
    let encoded: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(encoded)?;
    decode_image(&bytes)
}

/// JPEG bytes of a frame.
pub fn encode_jpeg(frame: &Mat) -> opencv::Result<Vec<u8>> {
    let mut buffer = Vector::<u8>::new();
    imencode(".jpg", frame, &mut buffer, &Vector::<i32>::new())?;
    Ok(buffer.to_vec())
}

pub fn encode_base64_jpeg(frame: &Mat) -> opencv::Result<String> {
    Ok(STANDARD.encode(encode_jpeg(frame)?))
}

#[cfg(test)]
mod tests {
    use opencv::core::Scalar;
    use opencv::core::CV_8UC3;

    use super::*;

    fn sample_frame() -> Mat {
        Mat::new_rows_cols_with_default(24, 40, CV_8UC3, Scalar::new(10.0, 120.0, 200.0, 0.0))
            .unwrap()
    }

    #[test]
    fn base64_with_data_url_header_decodes() {
        let encoded = encode_base64_jpeg(&sample_frame()).unwrap();
        let payload = format!("data:image/jpeg;base64,{encoded}");

        let frame = decode_base64_image(&payload).unwrap();
        assert_eq!((frame.cols(), frame.rows()), (40, 24));
    }

    #[test]
    fn bare_base64_decodes() {
        let encoded = encode_base64_jpeg(&sample_frame()).unwrap();
        assert!(decode_base64_image(&encoded).is_ok());
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(FrameError::Undecodable) | Err(FrameError::OpenCv(_))
        ));
        assert!(matches!(decode_image(&[]), Err(FrameError::Empty)));
        assert!(matches!(
            decode_base64_image("data:image/png;base64,@@@"),
            Err(FrameError::Base64(_))
        ));
    }

    #[test]
    fn image_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        std::fs::write(&path, encode_jpeg(&sample_frame()).unwrap()).unwrap();

        let frame = read_image_file(&path).unwrap();
        assert_eq!((frame.cols(), frame.rows()), (40, 24));
        assert!(matches!(
            read_image_file(&dir.path().join("missing.jpg")),
            Err(FrameError::Io(_))
        ));
    }
}
