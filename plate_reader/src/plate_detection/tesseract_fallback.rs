use std::ffi::CString;
use std::path::PathBuf;

use leptess::tesseract::TessApi;
use opencv::imgproc::cvt_color;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use tracing::debug;

use super::pipeline::FallbackReader;
use super::Script;
use crate::error::FallbackError;

// Single text line.
const PAGE_SEGMENTATION_MODE: &str = "7";

/// Tesseract over the whole plate image, in the language of the requested script.
pub struct TesseractReader {
    tessdata: Option<PathBuf>,
}

impl TesseractReader {
    pub fn new(tessdata: Option<PathBuf>) -> Self {
        Self { tessdata }
    }

    fn engine(&self, script: Script) -> Result<TessApi, FallbackError> {
        let data_path = self
            .tessdata
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());
        let mut api = TessApi::new(data_path.as_deref(), script.language_code())
            .map_err(|error| FallbackError::Engine(format!("{error:?}")))?;

        let name = engine_string("tessedit_pageseg_mode")?;
        let value = engine_string(PAGE_SEGMENTATION_MODE)?;
        api.raw
            .set_variable(&name, &value)
            .map_err(|error| FallbackError::Engine(format!("{error:?}")))?;
        Ok(api)
    }
}

impl FallbackReader for TesseractReader {
    fn read_text(&self, plate: &Mat, script: Script) -> Result<String, FallbackError> {
        let mut grey = Mat::default();
        cvt_color(plate, &mut grey, COLOR_BGR2GRAY, 0)?;
        let grey = if grey.is_continuous() {
            grey
        } else {
            grey.try_clone()?
        };

        let mut api = self.engine(script)?;
        let cols = grey.cols();
        let rows = grey.rows();
        api.raw
            .set_image(grey.data_bytes()?, cols, rows, 1, cols)
            .map_err(|error| FallbackError::Engine(format!("{error:?}")))?;
        let text = api
            .get_utf8_text()
            .map_err(|error| FallbackError::Engine(error.to_string()))?;

        debug!("Tesseract ({}) read {:?}", script, text.trim());
        Ok(text.trim().to_string())
    }
}

fn engine_string(value: &str) -> Result<CString, FallbackError> {
    CString::new(value).map_err(|error| FallbackError::Engine(error.to_string()))
}
