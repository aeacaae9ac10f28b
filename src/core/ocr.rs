//! Text extraction contract.
//!
//! An extractor is constructed once and shared by every comparison; engines
//! that are expensive to load do so in their constructor, never per call.

use crate::config::{OcrConfig, OcrEngine};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One recognized piece of text with the polygon it was found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub polygon: Vec<Point>,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, polygon: Vec<Point>) -> Self {
        Self {
            text: text.into(),
            polygon,
        }
    }
}

/// Fragments in detection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub fragments: Vec<TextFragment>,
}

impl ExtractedText {
    pub fn new(fragments: Vec<TextFragment>) -> Self {
        Self { fragments }
    }

    /// Fragment texts joined with single spaces, geometry dropped.
    pub fn joined(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Text extraction is disabled")]
    Disabled,

    #[error("Failed to initialize OCR engine: {0}")]
    Init(String),

    #[error("Failed to run OCR: {0}")]
    Recognition(String),

    #[error("OCR engine is no longer running")]
    EngineStopped,
}

impl ExtractionError {
    pub fn code(&self) -> &'static str {
        "extraction_failed"
    }
}

/// Image to ordered text fragments.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, image: &DynamicImage) -> Result<ExtractedText, ExtractionError>;
}

/// Used when no OCR engine is configured: every call fails, so text scores
/// come back absent while visual scoring proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledExtractor;

impl TextExtractor for DisabledExtractor {
    fn name(&self) -> &str {
        "disabled"
    }

    fn extract(&self, _image: &DynamicImage) -> Result<ExtractedText, ExtractionError> {
        Err(ExtractionError::Disabled)
    }
}

/// Builds the extractor named by `[ocr].engine`.
pub fn build_extractor(config: &OcrConfig) -> Result<Arc<dyn TextExtractor>, ExtractionError> {
    match config.engine {
        OcrEngine::Disabled => Ok(Arc::new(DisabledExtractor)),
        #[cfg(feature = "tesseract")]
        OcrEngine::Tesseract => Ok(Arc::new(super::tesseract::TesseractExtractor::new(config)?)),
        #[cfg(not(feature = "tesseract"))]
        OcrEngine::Tesseract => Err(ExtractionError::Init(
            "this build does not include the tesseract feature".to_string(),
        )),
    }
}
