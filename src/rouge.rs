use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lowercased alphanumeric tokens.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn f1(overlap: usize, candidate: usize, reference: usize) -> f64 {
    if overlap == 0 || candidate == 0 || reference == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / candidate as f64;
    let recall = overlap as f64 / reference as f64;
    2.0 * precision * recall / (precision + recall)
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

pub fn rouge_n(candidate: &[String], reference: &[String], n: usize) -> f64 {
    let cand = ngram_counts(candidate, n);
    let refs = ngram_counts(reference, n);
    let overlap: usize = cand
        .iter()
        .map(|(gram, &c)| c.min(refs.get(gram).copied().unwrap_or(0)))
        .sum();
    f1(overlap, cand.values().sum(), refs.values().sum())
}

pub fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

pub fn rouge_l(candidate: &[String], reference: &[String]) -> f64 {
    f1(lcs_len(candidate, reference), candidate.len(), reference.len())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    pub rouge_l: f64,
}

impl RougeScores {
    pub fn score(candidate: &str, reference: &str) -> Self {
        let cand = tokens(candidate);
        let refs = tokens(reference);
        Self {
            rouge1: rouge_n(&cand, &refs, 1),
            rouge2: rouge_n(&cand, &refs, 2),
            rouge_l: rouge_l(&cand, &refs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RougeTotals {
    sum: RougeScores,
    count: usize,
}

impl RougeTotals {
    pub fn add(&mut self, scores: &RougeScores) {
        self.sum.rouge1 += scores.rouge1;
        self.sum.rouge2 += scores.rouge2;
        self.sum.rouge_l += scores.rouge_l;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<RougeScores> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(RougeScores {
            rouge1: self.sum.rouge1 / n,
            rouge2: self.sum.rouge2 / n,
            rouge_l: self.sum.rouge_l / n,
        })
    }
}
