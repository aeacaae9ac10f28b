pub mod batch;
pub mod compare;
pub mod fetch;
pub mod hash;
pub mod image;
pub mod ocr;
pub mod scanner;
#[cfg(feature = "tesseract")]
pub mod tesseract;
pub mod text;

pub use batch::{BatchComparator, BatchResult, CancelHandle, ComparisonResult, CompareError};
pub use compare::{Scores, SimilarityScorer};
pub use fetch::{CandidateFetcher, CandidateRef};
pub use hash::{Fingerprint, PerceptualHasher};
pub use self::image::ImageNormalizer;
pub use ocr::{ExtractedText, TextExtractor, TextFragment};
pub use text::TextSimilarityScorer;
