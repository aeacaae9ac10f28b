//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. The default location is
//! `<config_dir>/docmatch/docmatch.toml`.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image_hasher::HashAlg;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub hash: HashConfig,
    pub fetch: FetchConfig,
    pub batch: BatchConfig,
    pub scoring: ScoringConfig,
    pub ocr: OcrConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Mean,
    Gradient,
    VertGradient,
    Blockhash,
}

impl From<HashAlgorithm> for HashAlg {
    fn from(alg: HashAlgorithm) -> Self {
        match alg {
            HashAlgorithm::Mean => HashAlg::Mean,
            HashAlgorithm::Gradient => HashAlg::Gradient,
            HashAlgorithm::VertGradient => HashAlg::VertGradient,
            HashAlgorithm::Blockhash => HashAlg::Blockhash,
        }
    }
}

/// Interpolation used when resizing a candidate to the query's dimensions.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HashConfig {
    pub algorithm: HashAlgorithm,
    /// Mean hash over DCT coefficients is the classic pHash.
    pub dct: bool,
    pub width: u32,
    pub height: u32,
    pub filter: ResizeFilter,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Mean,
            dct: true,
            width: 8,
            height: 8,
            filter: ResizeFilter::Triangle,
        }
    }
}

impl HashConfig {
    pub fn bit_len(&self) -> u32 {
        self.width * self.height
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub retry_once: bool,
    pub max_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            retry_once: true,
            max_bytes: 32 * 1024 * 1024,
            user_agent: format!("docmatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ScoringConfig {
    pub visual_weight: f64,
    pub text_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            visual_weight: 0.5,
            text_weight: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngine {
    #[default]
    Disabled,
    Tesseract,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OcrConfig {
    pub engine: OcrEngine,
    pub language: String,
    pub datapath: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngine::Disabled,
            language: "eng".to_string(),
            datapath: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
    /// Whether HTTP callers may name files on this host as candidates.
    pub allow_local_candidates: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5001".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
            allow_local_candidates: false,
        }
    }
}

/// `<config_dir>/docmatch/docmatch.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docmatch").join("docmatch.toml"))
}

/// Loads configuration from `path`, or from the default location when `path`
/// is `None`. A missing default file yields the defaults; a missing explicit
/// file is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => parse_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => parse_file(&path)?,
            _ => Config::default(),
        },
    };
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn validate(config: &Config) -> Result<()> {
    if config.hash.width == 0 || config.hash.height == 0 {
        anyhow::bail!("hash.width and hash.height must be > 0");
    }
    if config.hash.dct && config.hash.algorithm == HashAlgorithm::Blockhash {
        anyhow::bail!("hash.dct cannot be combined with the blockhash algorithm");
    }

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be > 0");
    }
    if config.fetch.max_bytes == 0 {
        anyhow::bail!("fetch.max_bytes must be > 0");
    }

    if config.batch.concurrency == 0 {
        anyhow::bail!("batch.concurrency must be > 0");
    }

    let ScoringConfig {
        visual_weight,
        text_weight,
    } = config.scoring;
    if !(visual_weight.is_finite() && text_weight.is_finite())
        || visual_weight < 0.0
        || text_weight < 0.0
    {
        anyhow::bail!("scoring weights must be finite and >= 0");
    }
    if visual_weight + text_weight == 0.0 {
        anyhow::bail!("scoring.visual_weight and scoring.text_weight cannot both be 0");
    }

    Ok(())
}
