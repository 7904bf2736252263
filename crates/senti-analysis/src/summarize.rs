//! Extractive summaries (TextRank over sentence word overlap) and the
//! deterministic first-sentence fallback.

use std::collections::HashSet;

use senti_core::text::content_words;
use thiserror::Error;
use tracing::debug;

pub const FALLBACK_MAX_CHARS: usize = 120;
pub const SUMMARY_WORD_COUNT: usize = 30;

const MIN_SENTENCES: usize = 3;
const DAMPING: f64 = 0.85;
const MAX_ITERATIONS: usize = 100;
const CONVERGENCE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SummaryError {
    #[error("need at least {MIN_SENTENCES} sentences to rank, found {0}")]
    TooFewSentences(usize),
    #[error("no rankable words in input")]
    NoContent,
    #[error("ranking produced an empty summary")]
    Empty,
}

/// First `.`-delimited segment, or the first 120 characters when the text
/// has no usable segment.
pub fn fallback_summary(text: &str) -> String {
    let text = text.trim();
    if text.contains('.') {
        let first = text.split('.').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    text.chars().take(FALLBACK_MAX_CHARS).collect()
}

pub(crate) fn summarize_or_fallback(text: &str) -> String {
    match extractive_summary(text, SUMMARY_WORD_COUNT) {
        Ok(summary) if !summary.trim().is_empty() => summary,
        Ok(_) => fallback_summary(text),
        Err(err) => {
            debug!(reason = %err, "extractive summary unavailable, using first sentence");
            fallback_summary(text)
        }
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = idx + c.len_utf8();
            sentences.push(text[start..end].trim());
            start = end;
        }
    }
    sentences.push(text[start..].trim());
    sentences.retain(|s| !s.is_empty());
    sentences
}

fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let overlap = a.intersection(b).count() as f64;
    if overlap == 0.0 {
        return 0.0;
    }
    let norm = (a.len() as f64).ln() + (b.len() as f64).ln();
    if norm <= f64::EPSILON {
        overlap
    } else {
        overlap / norm
    }
}

fn rank(weights: &[Vec<f64>]) -> Vec<f64> {
    let n = weights.len();
    let out_weight: Vec<f64> = weights.iter().map(|row| row.iter().sum()).collect();
    let mut scores = vec![1.0 / n as f64; n];

    for _ in 0..MAX_ITERATIONS {
        let next: Vec<f64> = (0..n)
            .map(|i| {
                let inbound: f64 = (0..n)
                    .filter(|&j| out_weight[j] > 0.0)
                    .map(|j| weights[j][i] / out_weight[j] * scores[j])
                    .sum();
                (1.0 - DAMPING) / n as f64 + DAMPING * inbound
            })
            .collect();
        let delta = next
            .iter()
            .zip(&scores)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        scores = next;
        if delta < CONVERGENCE {
            break;
        }
    }
    scores
}

/// Highest-ranked sentences, in original order, totalling close to
/// `word_count` words.
pub fn extractive_summary(text: &str, word_count: usize) -> Result<String, SummaryError> {
    let sentences = split_sentences(text);
    if sentences.len() < MIN_SENTENCES {
        return Err(SummaryError::TooFewSentences(sentences.len()));
    }

    let bags: Vec<HashSet<String>> = sentences
        .iter()
        .map(|s| content_words(s).into_iter().collect())
        .collect();
    if bags.iter().all(HashSet::is_empty) {
        return Err(SummaryError::NoContent);
    }

    let weights: Vec<Vec<f64>> = bags
        .iter()
        .enumerate()
        .map(|(i, a)| {
            bags.iter()
                .enumerate()
                .map(|(j, b)| if i == j { 0.0 } else { similarity(a, b) })
                .collect()
        })
        .collect();
    let scores = rank(&weights);

    let mut order: Vec<usize> = (0..sentences.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    // Stop once another sentence would move us further from the target.
    let mut picked = Vec::new();
    let mut length = 0usize;
    for idx in order {
        let words = sentences[idx].split_whitespace().count();
        let current_gap = word_count.abs_diff(length);
        let next_gap = word_count.abs_diff(length + words);
        if next_gap > current_gap {
            break;
        }
        picked.push(idx);
        length += words;
    }

    picked.sort_unstable();
    let summary = picked
        .into_iter()
        .map(|idx| sentences[idx])
        .collect::<Vec<_>>()
        .join(" ");
    if summary.is_empty() {
        return Err(SummaryError::Empty);
    }
    Ok(summary)
}
