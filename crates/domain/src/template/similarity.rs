//! String similarity measures used to score input against template patterns.
//!
//! All scores are in `0.0..=1.0`, where `1.0` means identical.

use std::collections::HashMap;

/// Lowercased word tokens with surrounding punctuation (including `{}`) removed.
#[must_use]
pub fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

/// Levenshtein distance over `char`s.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Edit distance normalised by the longer string, case-insensitive.
///
/// Two empty strings are identical.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

/// Cosine similarity of the word-count vectors of both strings.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn token_cosine(a: &str, b: &str) -> f64 {
    let count = |text: &str| {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for token in tokens(text) {
            *counts.entry(token).or_default() += 1;
        }
        counts
    };
    let left = count(a);
    let right = count(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let dot: usize = left
        .iter()
        .filter_map(|(token, n)| right.get(token).map(|m| n * m))
        .sum();
    let norm = |counts: &HashMap<String, usize>| {
        (counts.values().map(|n| n * n).sum::<usize>() as f64).sqrt()
    };
    dot as f64 / (norm(&left) * norm(&right))
}

/// Mean of a semantic score and an edit-distance ratio.
#[must_use]
pub fn combined_score(semantic: f64, edit: f64) -> f64 {
    (semantic.clamp(0.0, 1.0) + edit.clamp(0.0, 1.0)) / 2.0
}
