use crate::config::{Config, ScoringConfig};
use crate::core::hash::{HashError, PerceptualHasher};
use crate::core::image::{ImageError, ImageNormalizer};
use crate::core::ocr::{ExtractionError, TextExtractor};
use crate::core::text::{TextScore, TextSimilarityScorer};
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Why a sub-score is missing from an otherwise scored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    TextExtractionFailed,
    VisualScoringFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialFailure {
    pub reason: PartialReason,
    pub message: String,
}

/// Sub-scores for one query/candidate pair. Either sub-score may be absent;
/// the matching `*_failure` field then says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scores {
    pub visual_similarity: Option<f64>,
    pub text_similarity: Option<f64>,
    pub edit_distance: Option<usize>,
    /// Weighted mean of the sub-scores that are present.
    pub combined: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_failure: Option<PartialFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_failure: Option<PartialFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_fingerprint: Option<String>,
    /// Candidate dimensions before normalization.
    pub candidate_width: u32,
    pub candidate_height: u32,
}

#[derive(Debug, Error)]
enum VisualError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Hash(#[from] HashError),
}

#[derive(Debug, Error)]
enum TextError {
    #[error("query: {0}")]
    Query(#[source] ExtractionError),

    #[error("candidate: {0}")]
    Candidate(#[source] ExtractionError),
}

struct Visual {
    similarity: f64,
    query_fingerprint: String,
    candidate_fingerprint: String,
}

/// Compares one query image with one candidate image.
pub struct SimilarityScorer {
    extractor: Arc<dyn TextExtractor>,
    hasher: PerceptualHasher,
    normalizer: ImageNormalizer,
    text: TextSimilarityScorer,
    weights: ScoringConfig,
}

impl SimilarityScorer {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        hasher: PerceptualHasher,
        normalizer: ImageNormalizer,
        weights: ScoringConfig,
    ) -> Self {
        Self {
            extractor,
            hasher,
            normalizer,
            text: TextSimilarityScorer::new(),
            weights,
        }
    }

    pub fn from_config(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self, HashError> {
        Ok(Self::new(
            extractor,
            PerceptualHasher::new(&config.hash)?,
            ImageNormalizer::new(config.hash.filter.into()),
            config.scoring,
        ))
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    /// Text and visual scoring run side by side; a failure in one leaves the
    /// other intact.
    ///
    /// Fingerprint distance is symmetric, so swapping two images of equal
    /// size gives the same visual similarity. For mismatched sizes it may
    /// differ, since the candidate is always resized to the query's
    /// dimensions before hashing.
    pub fn compare(&self, query: &DynamicImage, candidate: &DynamicImage) -> Scores {
        let (text, visual) = rayon::join(
            || self.score_text(query, candidate),
            || self.score_visual(query, candidate),
        );

        let (text_score, text_failure) = match text {
            Ok(score) => (Some(score), None),
            Err(e) => {
                log::debug!("Text scoring skipped: {}", e);
                (
                    None,
                    Some(PartialFailure {
                        reason: PartialReason::TextExtractionFailed,
                        message: e.to_string(),
                    }),
                )
            }
        };

        let (visual, visual_failure) = match visual {
            Ok(visual) => (Some(visual), None),
            Err(e) => {
                if let VisualError::Hash(hash_err) = &e {
                    log::error!("Fingerprint configuration fault: {}", hash_err);
                } else {
                    log::warn!("Visual scoring failed: {}", e);
                }
                (
                    None,
                    Some(PartialFailure {
                        reason: PartialReason::VisualScoringFailed,
                        message: e.to_string(),
                    }),
                )
            }
        };

        let visual_similarity = visual.as_ref().map(|v| v.similarity);
        let text_similarity = text_score.map(|t| t.similarity);
        let (candidate_width, candidate_height) = candidate.dimensions();

        Scores {
            visual_similarity,
            text_similarity,
            edit_distance: text_score.map(|t| t.distance),
            combined: self.combine(visual_similarity, text_similarity),
            visual_failure,
            text_failure,
            query_fingerprint: visual.as_ref().map(|v| v.query_fingerprint.clone()),
            candidate_fingerprint: visual.map(|v| v.candidate_fingerprint),
            candidate_width,
            candidate_height,
        }
    }

    fn score_text(
        &self,
        query: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<TextScore, TextError> {
        let (query_text, candidate_text) = rayon::join(
            || self.extractor.extract(query),
            || self.extractor.extract(candidate),
        );
        let query_text = query_text.map_err(TextError::Query)?;
        let candidate_text = candidate_text.map_err(TextError::Candidate)?;

        let (a, b) = (query_text.joined(), candidate_text.joined());
        log::debug!("Query text: {:?}, candidate text: {:?}", a, b);
        Ok(self.text.score(&a, &b))
    }

    fn score_visual(
        &self,
        query: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<Visual, VisualError> {
        let normalized = self.normalizer.normalize(query, candidate)?;
        let query_fp = self.hasher.hash(query);
        let candidate_fp = self.hasher.hash(&normalized);
        let similarity = PerceptualHasher::similarity(&query_fp, &candidate_fp)?;

        Ok(Visual {
            similarity,
            query_fingerprint: query_fp.to_base64(),
            candidate_fingerprint: candidate_fp.to_base64(),
        })
    }

    fn combine(&self, visual: Option<f64>, text: Option<f64>) -> Option<f64> {
        let parts = [
            (visual, self.weights.visual_weight),
            (text, self.weights.text_weight),
        ];
        let (sum, weight) = parts
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
            .fold((0.0, 0.0), |(sum, total), (s, w)| (sum + s, total + w));

        if weight > 0.0 {
            Some(sum / weight)
        } else {
            None
        }
    }
}
