use serde::Serialize;

/// Edit-distance comparison of two OCR transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextScore {
    /// `1 - distance / max(len_a, len_b)`, in [0, 1].
    pub similarity: f64,
    /// Levenshtein distance in characters.
    pub distance: usize,
}

/// Case-insensitive Levenshtein similarity between two strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSimilarityScorer;

impl TextSimilarityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, text_a: &str, text_b: &str) -> TextScore {
        let a = text_a.to_lowercase();
        let b = text_b.to_lowercase();

        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return TextScore {
                similarity: 1.0,
                distance: 0,
            };
        }

        let distance = strsim::levenshtein(&a, &b);
        TextScore {
            similarity: 1.0 - distance as f64 / longest as f64,
            distance,
        }
    }
}
