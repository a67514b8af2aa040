//! Conflicting evidence detection.
//!
//! Flags pairs of chunks from different sources that talk about the same
//! thing (keyword overlap) but disagree by negation or by the numbers they
//! quote. The Writer surfaces these as notes under a section.

use serde::{Deserialize, Serialize};

use super::collaborators::EvidenceChunk;
use super::text::{keyword_overlap, keywords};

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "neither", "without", "lack", "lacks", "doesn't", "don't", "isn't",
    "aren't", "wasn't", "weren't", "won't", "cannot", "can't",
];

/// Two chunks that appear to disagree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contradiction {
    /// Index of the first chunk in the input slice.
    pub first: usize,
    pub second: usize,
    pub first_source: String,
    pub second_source: String,
    pub kind: ContradictionKind,
    /// 0.0-1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// One source asserts what the other negates.
    Negation,
    /// Same subject, materially different figures.
    NumericDisagreement,
}

#[derive(Debug, Clone)]
pub struct ContradictionDetector {
    /// Minimum keyword overlap before two chunks are compared at all.
    min_overlap: f64,
    /// Relative difference above which two figures disagree.
    numeric_tolerance: f64,
}

impl ContradictionDetector {
    pub fn new() -> Self {
        Self {
            min_overlap: 0.3,
            numeric_tolerance: 0.1,
        }
    }

    /// Compare every cross-source pair of chunks.
    pub fn detect(&self, chunks: &[EvidenceChunk]) -> Vec<Contradiction> {
        let prepared: Vec<(Vec<String>, bool, Vec<f64>)> = chunks
            .iter()
            .map(|c| (keywords(&c.text), has_negation(&c.text), numbers(&c.text)))
            .collect();

        let mut found = Vec::new();
        for i in 0..chunks.len() {
            for j in (i + 1)..chunks.len() {
                if chunks[i].source_url == chunks[j].source_url {
                    continue;
                }
                let (words_a, neg_a, nums_a) = &prepared[i];
                let (words_b, neg_b, nums_b) = &prepared[j];
                let overlap = keyword_overlap(words_a, words_b);
                if overlap < self.min_overlap {
                    continue;
                }

                let kind = if neg_a != neg_b && overlap > 0.4 {
                    Some((ContradictionKind::Negation, overlap * 0.8))
                } else if self.numbers_disagree(nums_a, nums_b) {
                    Some((ContradictionKind::NumericDisagreement, overlap * 0.6))
                } else {
                    None
                };

                if let Some((kind, confidence)) = kind {
                    found.push(Contradiction {
                        first: i,
                        second: j,
                        first_source: chunks[i].source_url.clone(),
                        second_source: chunks[j].source_url.clone(),
                        kind,
                        confidence,
                    });
                }
            }
        }
        found
    }

    fn numbers_disagree(&self, a: &[f64], b: &[f64]) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        // Any shared figure means the sources can agree on something.
        let shares_figure = a
            .iter()
            .any(|x| b.iter().any(|y| (x - y).abs() <= f64::EPSILON));
        if shares_figure {
            return false;
        }
        a.iter().any(|x| {
            b.iter()
                .any(|y| (x - y).abs() / x.abs().max(1.0) > self.numeric_tolerance)
        })
    }
}

impl Default for ContradictionDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn has_negation(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|w| NEGATIONS.contains(&w))
}

fn numbers(text: &str) -> Vec<f64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|s| s.trim_matches('.'))
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(url: &str, text: &str) -> EvidenceChunk {
        EvidenceChunk {
            text: text.into(),
            source_url: url.into(),
            title: "t".into(),
            offset: 0,
        }
    }

    #[test]
    fn test_detect_negation() {
        let chunks = vec![
            chunk(
                "https://a",
                "Prompt caching significantly reduces latency in LLM applications",
            ),
            chunk(
                "https://b",
                "Prompt caching does not significantly reduce latency in LLM applications",
            ),
        ];
        let found = ContradictionDetector::new().detect(&chunks);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ContradictionKind::Negation);
        assert_eq!(found[0].second_source, "https://b");
    }

    #[test]
    fn test_detect_numeric_disagreement() {
        let chunks = vec![
            chunk("https://a", "Prompt caching cuts inference cost by 90 percent"),
            chunk("https://b", "Prompt caching cuts inference cost by 50 percent"),
        ];
        let found = ContradictionDetector::new().detect(&chunks);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ContradictionKind::NumericDisagreement);
    }

    #[test]
    fn test_same_source_is_ignored() {
        let chunks = vec![
            chunk("https://a", "Caching is effective for repeated prompts"),
            chunk("https://a", "Caching is not effective for repeated prompts"),
        ];
        assert!(ContradictionDetector::new().detect(&chunks).is_empty());
    }

    #[test]
    fn test_unrelated_chunks() {
        let chunks = vec![
            chunk("https://a", "The sky is blue"),
            chunk("https://b", "Python is a programming language"),
        ];
        assert!(ContradictionDetector::new().detect(&chunks).is_empty());
    }

    #[test]
    fn test_numbers_ignore_sentence_periods() {
        assert_eq!(numbers("Released in 2021. Costs 4.5 dollars."), vec![2021.0, 4.5]);
    }
}
