//! Tesseract-backed text extraction.
//!
//! The engine is loaded once, on a dedicated worker thread that owns it for
//! the extractor's lifetime. Requests are queued to that thread; dropping the
//! extractor closes the queue and joins the worker, releasing the engine.

use super::ocr::{ExtractedText, ExtractionError, Point, TextExtractor, TextFragment};
use crate::config::OcrConfig;
use image::{DynamicImage, GenericImageView, ImageFormat};
use leptess::{LepTess, Variable};
use std::io::Cursor;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Fully automatic page segmentation.
const PAGE_SEGMENTATION_MODE: &str = "3";

struct Job {
    png: Vec<u8>,
    reply: mpsc::Sender<Result<ExtractedText, ExtractionError>>,
}

pub struct TesseractExtractor {
    jobs: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl TesseractExtractor {
    /// Starts the worker and waits until the engine has loaded its language
    /// data, so a misconfigured engine fails here rather than on first use.
    pub fn new(config: &OcrConfig) -> Result<Self, ExtractionError> {
        let language = config.language.clone();
        let datapath = config
            .datapath
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), ExtractionError>>();

        let worker = thread::Builder::new()
            .name("tesseract".to_string())
            .spawn(move || {
                let mut engine = match init_engine(datapath.as_deref(), &language) {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        engine
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                log::info!("Tesseract engine ready (language '{}')", language);

                for job in jobs_rx {
                    let result = recognize(&mut engine, &job.png);
                    let _ = job.reply.send(result);
                }
                log::debug!("Tesseract worker shutting down");
            })
            .map_err(|e| ExtractionError::Init(format!("failed to spawn worker: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                jobs: Some(jobs_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(ExtractionError::EngineStopped)
            }
        }
    }
}

fn init_engine(datapath: Option<&str>, language: &str) -> Result<LepTess, ExtractionError> {
    let mut engine = LepTess::new(datapath, language).map_err(|e| {
        ExtractionError::Init(format!(
            "language '{}': {}. Make sure tesseract language data is installed",
            language, e
        ))
    })?;
    engine
        .set_variable(Variable::TesseditPagesegMode, PAGE_SEGMENTATION_MODE)
        .map_err(|e| ExtractionError::Init(format!("failed to set PSM: {}", e)))?;
    Ok(engine)
}

fn recognize(engine: &mut LepTess, png: &[u8]) -> Result<ExtractedText, ExtractionError> {
    engine
        .set_image_from_mem(png)
        .map_err(|e| ExtractionError::Recognition(format!("failed to load image: {}", e)))?;

    // No boxes means no text, not an error
    let boxes = match engine.get_component_boxes(leptess::capi::TessPageIteratorLevel_RIL_WORD, true)
    {
        Some(boxes) => boxes,
        None => return Ok(ExtractedText::default()),
    };

    let mut fragments = Vec::new();
    for bbox in &boxes {
        let geom = bbox.get_geometry();
        engine.set_rectangle(geom.x, geom.y, geom.w, geom.h);

        let text = engine.get_utf8_text().unwrap_or_default().trim().to_string();
        if text.is_empty() {
            continue;
        }

        let (x, y, w, h) = (geom.x as f32, geom.y as f32, geom.w as f32, geom.h as f32);
        fragments.push(TextFragment::new(
            text,
            vec![
                Point { x, y },
                Point { x: x + w, y },
                Point { x: x + w, y: y + h },
                Point { x, y: y + h },
            ],
        ));
    }

    Ok(ExtractedText::new(fragments))
}

impl TextExtractor for TesseractExtractor {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn extract(&self, image: &DynamicImage) -> Result<ExtractedText, ExtractionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractionError::Recognition(format!(
                "image dimensions must be non-zero (got {}x{})",
                width, height
            )));
        }

        // leptess expects encoded image data
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| ExtractionError::Recognition(format!("failed to encode image: {}", e)))?;

        let jobs = self.jobs.as_ref().ok_or(ExtractionError::EngineStopped)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        jobs.send(Job {
            png: png.into_inner(),
            reply: reply_tx,
        })
        .map_err(|_| ExtractionError::EngineStopped)?;

        reply_rx.recv().map_err(|_| ExtractionError::EngineStopped)?
    }
}

impl Drop for TesseractExtractor {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Tesseract worker panicked");
            }
        }
    }
}
