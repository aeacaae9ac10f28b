use crate::config::HashConfig;
use image::DynamicImage;
use image_hasher::{Hasher, HasherConfig, ImageHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Incompatible fingerprints: {left} bits vs {right} bits")]
    IncompatibleFingerprint { left: u32, right: u32 },

    #[error("Hasher produced {actual_bytes} bytes, which cannot hold {expected_bits} bits")]
    UnexpectedHashSize { expected_bits: u32, actual_bytes: usize },
}

impl HashError {
    pub fn code(&self) -> &'static str {
        "incompatible_fingerprint"
    }
}

/// Perceptual fingerprint of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    hash: ImageHash,
    bits: u32,
}

impl Fingerprint {
    /// Number of meaningful bits; the packed byte form may carry padding.
    pub fn bit_len(&self) -> u32 {
        self.bits
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.hash.as_bytes()
    }

    pub fn to_base64(&self) -> String {
        self.hash.to_base64()
    }
}

/// Computes fingerprints and the distance between them.
pub struct PerceptualHasher {
    hasher: Hasher,
    bits: u32,
}

impl PerceptualHasher {
    pub fn new(config: &HashConfig) -> Result<Self, HashError> {
        let mut hasher_config = HasherConfig::new()
            .hash_alg(config.algorithm.into())
            .hash_size(config.width, config.height);
        if config.dct {
            hasher_config = hasher_config.preproc_dct();
        }

        let hasher = Self {
            hasher: hasher_config.to_hasher(),
            bits: config.bit_len(),
        };
        hasher.verify_bit_len()?;
        Ok(hasher)
    }

    /// Similarity is normalized by the configured bit count, so the packed
    /// output must hold exactly that many bits plus less than a byte of
    /// padding. Checked once against a probe image.
    fn verify_bit_len(&self) -> Result<(), HashError> {
        let probe = DynamicImage::new_luma8(32, 32);
        let actual_bytes = self.hasher.hash_image(&probe).as_bytes().len();
        let capacity = actual_bytes as u64 * 8;
        let expected = u64::from(self.bits);
        if capacity < expected || capacity - expected >= 8 {
            return Err(HashError::UnexpectedHashSize {
                expected_bits: self.bits,
                actual_bytes,
            });
        }
        Ok(())
    }

    pub fn bit_len(&self) -> u32 {
        self.bits
    }

    pub fn hash(&self, image: &DynamicImage) -> Fingerprint {
        Fingerprint {
            hash: self.hasher.hash_image(image),
            bits: self.bits,
        }
    }

    /// Hamming distance between two fingerprints of equal length.
    pub fn distance(a: &Fingerprint, b: &Fingerprint) -> Result<u32, HashError> {
        if a.bits != b.bits || a.as_bytes().len() != b.as_bytes().len() {
            return Err(HashError::IncompatibleFingerprint {
                left: a.bits,
                right: b.bits,
            });
        }
        Ok(a.hash.dist(&b.hash))
    }

    /// `1 - distance / bit_len`, in [0, 1].
    pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> Result<f64, HashError> {
        let distance = Self::distance(a, b)?;
        Ok(1.0 - f64::from(distance) / f64::from(a.bits))
    }
}
