use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub text: String,
    pub summary: String,
}

impl SummaryRecord {
    pub fn new(text: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    text: Option<String>,
    summary: Option<String>,
}

pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<SummaryRecord>, DataError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DataError::MissingFile(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let records = match extension.as_str() {
        "csv" => load_csv(path)?,
        "jsonl" | "json" => load_jsonl(path)?,
        other => return Err(DataError::UnsupportedFormat(other.to_string())),
    };

    tracing::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

fn load_csv(path: &Path) -> Result<Vec<SummaryRecord>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    for column in ["text", "summary"] {
        if !headers.iter().any(|h| h.trim() == column) {
            return Err(DataError::MissingColumn {
                column,
                path: path.to_path_buf(),
            });
        }
    }

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let raw: RawRecord = row?;
        records.push(SummaryRecord {
            text: raw.text.unwrap_or_default(),
            summary: raw.summary.unwrap_or_default(),
        });
    }
    Ok(records)
}

fn load_jsonl(path: &Path) -> Result<Vec<SummaryRecord>, DataError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawRecord = serde_json::from_str(&line)?;
        let text = raw.text.ok_or_else(|| DataError::MissingColumn {
            column: "text",
            path: path.to_path_buf(),
        })?;
        let summary = raw.summary.ok_or_else(|| DataError::MissingColumn {
            column: "summary",
            path: path.to_path_buf(),
        })?;
        records.push(SummaryRecord { text, summary });
    }
    Ok(records)
}

/// Removes records without a summary (or without text to summarise).
pub fn drop_empty_summaries(records: Vec<SummaryRecord>) -> Vec<SummaryRecord> {
    let before = records.len();
    let kept: Vec<SummaryRecord> = records
        .into_iter()
        .filter(|r| !r.summary.trim().is_empty() && !r.text.trim().is_empty())
        .collect();
    if kept.len() < before {
        tracing::info!("Dropped {} records with empty fields", before - kept.len());
    }
    kept
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitConfig {
    pub valid_pct: f64,
    pub test_pct: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            valid_pct: 0.1,
            test_pct: 0.1,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        let in_range = |p: f64| (0.0..=1.0).contains(&p);
        if !in_range(self.valid_pct) || !in_range(self.test_pct) {
            return Err(DataError::InvalidSplit(format!(
                "percentages must be within [0, 1], got valid={} test={}",
                self.valid_pct, self.test_pct
            )));
        }
        if self.valid_pct + self.test_pct > 1.0 {
            return Err(DataError::InvalidSplit(format!(
                "valid_pct + test_pct exceeds 1 ({})",
                self.valid_pct + self.test_pct
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Splits {
    pub train: Vec<SummaryRecord>,
    pub valid: Vec<SummaryRecord>,
    pub test: Vec<SummaryRecord>,
}

/// Shuffles with a seeded RNG and cuts into disjoint test/valid/train parts.
pub fn split(mut records: Vec<SummaryRecord>, config: &SplitConfig) -> Result<Splits, DataError> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    records.shuffle(&mut rng);

    let total = records.len();
    let n_test = ((total as f64) * config.test_pct).round() as usize;
    let n_valid = (((total as f64) * config.valid_pct).round() as usize).min(total - n_test);

    let mut rest = records.split_off(n_test.min(total));
    let test = records;
    let train = rest.split_off(n_valid);
    let valid = rest;

    tracing::info!(
        "Split {} records: {} train, {} valid, {} test",
        total,
        train.len(),
        valid.len(),
        test.len()
    );

    Ok(Splits { train, valid, test })
}

/// Seeded subsample of at most `n` records.
pub fn sample_rows(mut records: Vec<SummaryRecord>, n: usize, seed: u64) -> Vec<SummaryRecord> {
    if records.len() <= n {
        return records;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    records.truncate(n);
    records
}
