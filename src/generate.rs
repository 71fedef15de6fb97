use anyhow::{Context, Result};
use rust_bert::pipelines::common::{ModelResource, ModelType};
use rust_bert::pipelines::summarization::{SummarizationConfig, SummarizationModel};
use rust_bert::resources::LocalResource;
use serde::{Deserialize, Serialize};
use tch::Device;

use crate::artifact::Artifact;
use crate::dataset::SummaryRecord;
use crate::rouge::{RougeScores, RougeTotals};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub num_beams: i64,
    pub max_length: i64,
    pub min_length: i64,
    pub length_penalty: f64,
    pub no_repeat_ngram_size: i64,
    pub early_stopping: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            num_beams: 4,
            max_length: 130,
            min_length: 30,
            length_penalty: 2.0,
            no_repeat_ngram_size: 3,
            early_stopping: true,
        }
    }
}

/// Beam-search summariser over an exported artifact.
pub struct SummaryGenerator {
    model: SummarizationModel,
}

impl SummaryGenerator {
    pub fn from_artifact(
        artifact: &Artifact,
        settings: GenerationSettings,
        device: Device,
    ) -> Result<Self> {
        let local = |path: &std::path::Path| LocalResource::from(path.to_path_buf());
        let config = SummarizationConfig {
            model_type: ModelType::Bart,
            model_resource: ModelResource::Torch(Box::new(local(&artifact.files.weights))),
            config_resource: Box::new(local(&artifact.files.config)),
            vocab_resource: Box::new(local(&artifact.files.vocab)),
            merges_resource: Some(Box::new(local(&artifact.files.merges))),
            num_beams: settings.num_beams,
            max_length: Some(settings.max_length),
            min_length: settings.min_length,
            length_penalty: settings.length_penalty,
            no_repeat_ngram_size: settings.no_repeat_ngram_size,
            early_stopping: settings.early_stopping,
            device,
            ..Default::default()
        };
        let model = SummarizationModel::new(config).with_context(|| {
            format!(
                "failed to load summarisation model from {}",
                artifact.dir.display()
            )
        })?;
        tracing::info!(
            "Generator ready ({} beams, max_length {})",
            settings.num_beams,
            settings.max_length
        );
        Ok(Self { model })
    }

    pub fn summarize<S: AsRef<str> + Send + Sync>(&self, texts: &[S]) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.model.summarize(texts)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewedExample {
    pub text: String,
    pub reference: String,
    pub generated: String,
    pub rouge: RougeScores,
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

/// Generates summaries for the first `n` records and prints them next to the
/// reference summaries.
pub fn review(
    generator: &SummaryGenerator,
    records: &[SummaryRecord],
    n: usize,
) -> Result<Vec<ReviewedExample>> {
    let chosen: Vec<&SummaryRecord> = records.iter().take(n).collect();
    let texts: Vec<&str> = chosen.iter().map(|r| r.text.as_str()).collect();
    let generated = generator.summarize(&texts)?;

    let mut totals = RougeTotals::default();
    let mut reviewed = Vec::with_capacity(chosen.len());
    for (i, (record, generated)) in chosen.into_iter().zip(generated).enumerate() {
        let rouge = RougeScores::score(&generated, &record.summary);
        totals.add(&rouge);

        println!("=== Example {} ===", i + 1);
        println!("Text:      {}", excerpt(&record.text, 300));
        println!("Reference: {}", record.summary);
        println!("Generated: {}", generated);
        println!(
            "ROUGE-1 {:.3}  ROUGE-2 {:.3}  ROUGE-L {:.3}\n",
            rouge.rouge1, rouge.rouge2, rouge.rouge_l
        );

        reviewed.push(ReviewedExample {
            text: record.text.clone(),
            reference: record.summary.clone(),
            generated,
            rouge,
        });
    }

    if let Some(mean) = totals.mean() {
        tracing::info!(
            "Mean over {} examples: ROUGE-1 {:.3} ROUGE-2 {:.3} ROUGE-L {:.3}",
            reviewed.len(),
            mean.rouge1,
            mean.rouge2,
            mean.rouge_l
        );
    }
    Ok(reviewed)
}
