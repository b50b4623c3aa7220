use std::io::Write;
use std::path::Path;

use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::VideoCaptureTrait;
use opencv::prelude::VideoCaptureTraitConst;
use opencv::videoio::VideoCapture;
use opencv::videoio::CAP_ANY;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::FrameError;

/// Reads every `sample_every`-th frame of a video, starting with the first.
///
/// Frame indices are 1-based, so sampling every 10 frames yields frames
/// 1, 11, 21 and so on.
pub struct VideoReader {
    capture: VideoCapture,
    sample_every: usize,
    frame_index: usize,
    // Uploaded videos are spooled to disk; the file lives as long as the capture.
    _spool: Option<NamedTempFile>,
}

impl VideoReader {
    pub fn from_file(path: &Path, sample_every: usize) -> Result<Self, FrameError> {
        let location = path.to_string_lossy().into_owned();
        let capture = VideoCapture::from_file(&location, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(FrameError::VideoOpen(location));
        }
        Ok(Self {
            capture,
            sample_every: sample_every.max(1),
            frame_index: 0,
            _spool: None,
        })
    }

    /// Opens an in-memory video by writing it to a temporary file first.
    pub fn from_bytes(bytes: &[u8], sample_every: usize) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let mut spool = tempfile::Builder::new()
            .prefix("plate_reader_")
            .suffix(".mp4")
            .tempfile()?;
        spool.write_all(bytes)?;
        spool.flush()?;

        let mut reader = Self::from_file(spool.path(), sample_every)?;
        reader._spool = Some(spool);
        Ok(reader)
    }

    fn grab_next(&mut self) -> Result<Option<Mat>, FrameError> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

impl Iterator for VideoReader {
    type Item = Result<(usize, Mat), FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = match self.grab_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Video exhausted after {} frames", self.frame_index);
                    return None;
                }
                Err(error) => return Some(Err(error)),
            };
            if (self.frame_index - 1) % self.sample_every == 0 {
                return Some(Ok((self.frame_index, frame)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = VideoReader::from_file(&dir.path().join("nothing.mp4"), 10);
        assert!(matches!(
            result,
            Err(FrameError::VideoOpen(_)) | Err(FrameError::OpenCv(_))
        ));
    }

    #[test]
    fn empty_upload_is_rejected() {
        assert!(matches!(
            VideoReader::from_bytes(&[], 10),
            Err(FrameError::Empty)
        ));
    }

    #[test]
    fn garbage_upload_cannot_be_opened() {
        assert!(VideoReader::from_bytes(b"not a video container", 10).is_err());
    }
}
