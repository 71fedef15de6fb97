use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::artifact::Artifact;
use crate::config::TrainConfig;
use crate::dataset;
use crate::generate::{self, SummaryGenerator};
use crate::lr_finder::LrFinderConfig;
use crate::model::PretrainedBart;
use crate::pipeline::{self, ModelSource};

#[derive(Parser, Debug)]
#[command(name = "bartsum", version, about = "Fine-tune BART for abstractive summarisation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune, export, then review held-out examples
    Train(TrainArgs),
    /// Sweep learning rates and print suggestions
    LrFind(LrFindArgs),
    /// Summarise with an exported model
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    #[arg(long, value_enum, default_value = "bart-large-cnn")]
    pub pretrained: PretrainedBart,

    /// Directory with config.json, vocab.json, merges.txt and rust_model.ot
    #[arg(long)]
    pub model_dir: Option<PathBuf>,
}

impl ModelArgs {
    pub fn source(&self) -> ModelSource {
        match &self.model_dir {
            Some(dir) => ModelSource::Local(dir.clone()),
            None => ModelSource::Pretrained(self.pretrained),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// CSV or JSONL file with `text` and `summary` columns
    #[arg(long)]
    pub data: PathBuf,

    /// JSON training config; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub max_source_len: Option<usize>,

    #[arg(long)]
    pub max_target_len: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub train_sample: Option<usize>,
}

impl DataArgs {
    pub fn train_config(&self) -> Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_file(path)?,
            None => TrainConfig::default(),
        };
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.max_source_len {
            config.max_source_len = v;
        }
        if let Some(v) = self.max_target_len {
            config.max_target_len = v;
        }
        if let Some(v) = self.seed {
            config.split.seed = v;
        }
        if self.train_sample.is_some() {
            config.train_sample = self.train_sample;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value = "models/bart-summarizer")]
    pub output: PathBuf,

    /// Number of test examples to summarise after export
    #[arg(long, default_value_t = 2)]
    pub show: usize,
}

#[derive(Args, Debug)]
pub struct LrFindArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value_t = 100)]
    pub num_it: usize,

    #[arg(long, default_value_t = 1e-7)]
    pub start_lr: f64,

    #[arg(long, default_value_t = 10.0)]
    pub end_lr: f64,

    /// Write the sweep as JSON
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SummarizeArgs {
    #[arg(long, default_value = "models/bart-summarizer")]
    pub artifact: PathBuf,

    #[arg(long, conflicts_with = "data")]
    pub text: Option<String>,

    /// Review the test split of this dataset (split with the artifact's config)
    #[arg(long)]
    pub data: Option<PathBuf>,

    #[arg(long, default_value_t = 2)]
    pub show: usize,

    #[arg(long)]
    pub num_beams: Option<i64>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::LrFind(args) => run_lr_find(args),
            Commands::Summarize(args) => run_summarize(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = args.data.train_config()?;
    tracing::info!(
        "Training on {} for {} epoch(s) over {} stage(s)",
        args.data.data.display(),
        config.total_epochs(),
        config.stages.len()
    );

    let outcome = pipeline::train(&args.data.data, &args.model.source(), &config, &args.output)?;
    println!("Model exported to {}", outcome.artifact.dir.display());

    if args.show > 0 && !outcome.splits.test.is_empty() {
        pipeline::review_artifact(&outcome.artifact.dir, &outcome.splits.test, args.show)?;
    }
    Ok(())
}

fn run_lr_find(args: LrFindArgs) -> Result<()> {
    let config = args.data.train_config()?;
    let finder = LrFinderConfig {
        start_lr: args.start_lr,
        end_lr: args.end_lr,
        num_it: args.num_it,
        ..LrFinderConfig::default()
    };
    let (sweep, suggestion) =
        pipeline::find_lr(&args.data.data, &args.model.source(), &config, &finder)?;

    if let Some(path) = &args.out {
        std::fs::write(path, serde_json::to_string_pretty(&sweep)?)?;
        tracing::info!("Wrote sweep to {}", path.display());
    }
    match suggestion {
        Some(s) => println!("lr_min: {:.2e}  lr_steep: {:.2e}", s.lr_min, s.lr_steep),
        None => println!("Not enough iterations to suggest a learning rate"),
    }
    Ok(())
}

fn run_summarize(args: SummarizeArgs) -> Result<()> {
    let artifact = Artifact::open(&args.artifact)?;
    let mut settings = artifact.manifest.generation.clone();
    if let Some(beams) = args.num_beams {
        settings.num_beams = beams;
    }
    let generator = SummaryGenerator::from_artifact(&artifact, settings, pipeline::device())?;

    if let Some(text) = &args.text {
        for summary in generator.summarize(&[text.as_str()])? {
            println!("{}", summary);
        }
        return Ok(());
    }

    let data = args
        .data
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("either --text or --data is required"))?;
    let records = dataset::drop_empty_summaries(dataset::load_records(data)?);
    let splits = dataset::split(records, &artifact.manifest.train_config.split)?;
    generate::review(&generator, &splits.test, args.show)?;
    Ok(())
}
