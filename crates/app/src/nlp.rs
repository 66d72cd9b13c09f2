//! Built-in language collaborators used when no NLP service is wired in.
//!
//! [`BagOfWordsScorer`] stands in for an embedding model with a token cosine;
//! [`RuleBasedExtractor`] recognises the same entity classes an NER model
//! would (time, date, person, organization, location) with a handful of
//! regular expressions.

use regex::Regex;
use voxline_domain::command::Variables;
use voxline_domain::template::similarity::token_cosine;

use crate::ports::{EntityExtractor, ExtractionError, SemanticScorer};

/// Word-count cosine similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BagOfWordsScorer;

impl SemanticScorer for BagOfWordsScorer {
    fn similarity(&self, text: &str, pattern: &str) -> f64 {
        token_cosine(text, pattern)
    }
}

/// Regex-based entity recogniser.
///
/// Variables are keyed by the lower-cased entity class. Only the first
/// occurrence of each class is kept.
#[derive(Debug, Clone)]
pub struct RuleBasedExtractor {
    rules: Vec<(&'static str, Regex)>,
}

impl RuleBasedExtractor {
    /// Compile the built-in rules.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if a rule fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        let rules = [
            (
                "time",
                r"(?i)\b(\d{1,2}(?::\d{2})?\s?(?:am|pm)|\d{1,2}:\d{2}|noon|midnight)\b",
            ),
            (
                "date",
                r"(?i)\b(today|tomorrow|tonight|(?:next\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)|\d{4}-\d{2}-\d{2}|(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2}(?:st|nd|rd|th)?)\b",
            ),
            (
                "person",
                r"\b(?:[Cc]all|[Tt]ext|[Mm]essage|[Rr]emind|[Tt]ell|[Ee]mail|[Aa]sk)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)?)\b",
            ),
            (
                "organization",
                r"\b([A-Z][A-Za-z&]*(?:\s[A-Z][A-Za-z&]*)*\s(?:Inc|Corp|Ltd|LLC|Company|Bank|University))\b",
            ),
            (
                "location",
                r"\b(?:in|at|to|from|near)\s+((?:the\s)?[A-Z][a-z]+(?:\s[A-Z][a-z]+)*)\b",
            ),
        ];
        let rules = rules
            .into_iter()
            .map(|(class, pattern)| Regex::new(pattern).map(|re| (class, re)))
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }
}

impl EntityExtractor for RuleBasedExtractor {
    fn extract(&self, text: &str, _pattern: &str) -> Result<Variables, ExtractionError> {
        let mut variables = Variables::new();
        for (class, rule) in &self.rules {
            if let Some(value) = rule.captures(text).and_then(|caps| caps.get(1)) {
                variables.insert((*class).to_string(), value.as_str().to_string());
            }
        }
        Ok(variables)
    }
}
