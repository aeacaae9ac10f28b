#![allow(dead_code)]

use docmatch::config::Config;
use docmatch::core::batch::BatchComparator;
use docmatch::core::ocr::{ExtractedText, ExtractionError, TextExtractor, TextFragment};
use image::{DynamicImage, ImageBuffer, Rgb};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stand-in OCR engine: looks up canned words by the image's top-left pixel.
pub struct MarkerExtractor {
    texts: HashMap<[u8; 3], Vec<&'static str>>,
}

impl MarkerExtractor {
    pub fn new(entries: &[([u8; 3], &[&'static str])]) -> Self {
        Self {
            texts: entries
                .iter()
                .map(|(key, words)| (*key, words.to_vec()))
                .collect(),
        }
    }
}

impl TextExtractor for MarkerExtractor {
    fn name(&self) -> &str {
        "marker"
    }

    fn extract(&self, image: &DynamicImage) -> Result<ExtractedText, ExtractionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ExtractionError::Recognition("empty image".to_string()));
        }
        let key = image.to_rgb8().get_pixel(0, 0).0;
        let words = self
            .texts
            .get(&key)
            .ok_or_else(|| ExtractionError::Recognition(format!("no text for {:?}", key)))?;
        Ok(ExtractedText::new(
            words
                .iter()
                .map(|w| TextFragment::new(*w, Vec::new()))
                .collect(),
        ))
    }
}

/// Synthetic page: marker pixels in the corner, coarse dark/light blocks
/// whose arrangement depends on `phase`.
pub fn page(marker: [u8; 3], width: u32, height: u32, phase: u32) -> DynamicImage {
    let (cell_w, cell_h) = ((width / 4).max(1), (height / 4).max(1));
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        if x < 2 && y < 2 {
            Rgb(marker)
        } else if ((x / cell_w + y / cell_h + phase) % 3) == 0 {
            Rgb([20, 20, 20])
        } else {
            Rgb([235, 235, 235])
        }
    }))
}

pub fn save_png(image: &DynamicImage, dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn comparator(config: &Config, extractor: MarkerExtractor) -> BatchComparator {
    BatchComparator::from_config(config, Arc::new(extractor)).unwrap()
}

pub const QUERY: [u8; 3] = [10, 200, 30];
pub const NEAR: [u8; 3] = [11, 201, 31];
pub const FAR: [u8; 3] = [12, 202, 32];

/// The extractor used across scenarios: the query reads "HELLO WORLD", the
/// near-duplicate "HELLO WORLD!!", and the unrelated page something else.
pub fn hello_extractor() -> MarkerExtractor {
    MarkerExtractor::new(&[
        (QUERY, &["HELLO", "WORLD"]),
        (NEAR, &["HELLO", "WORLD!!"]),
        (FAR, &["INVOICE", "2024", "TOTAL"]),
    ])
}
