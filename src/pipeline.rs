use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tch::Device;

use crate::artifact::{self, Artifact, ArtifactManifest};
use crate::batch::{DataLoader, Seq2SeqTransform};
use crate::config::TrainConfig;
use crate::dataset::{self, Splits};
use crate::error::DataError;
use crate::generate::{self, ReviewedExample, SummaryGenerator};
use crate::lr_finder::{self, LrFinderConfig, LrSuggestion, LrSweep};
use crate::model::{CheckpointFiles, PretrainedBart, Summarizer};
use crate::tokenizer::SummaryTokenizer;
use crate::trainer::Trainer;

/// Where the starting weights come from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Pretrained(PretrainedBart),
    Local(PathBuf),
}

impl ModelSource {
    pub fn resolve(&self) -> Result<CheckpointFiles> {
        match self {
            ModelSource::Pretrained(name) => CheckpointFiles::download(*name),
            ModelSource::Local(dir) => {
                let files = CheckpointFiles::in_dir(dir);
                if let Some(file) = files.missing() {
                    return Err(DataError::IncompleteArtifact {
                        dir: dir.clone(),
                        file,
                    }
                    .into());
                }
                Ok(files)
            }
        }
    }
}

pub fn device() -> Device {
    let device = Device::cuda_if_available();
    tracing::info!("Using device {:?}", device);
    device
}

/// Load, filter, split and optionally subsample the training partition.
pub fn load_splits(data: &Path, config: &TrainConfig) -> Result<Splits> {
    let records = dataset::drop_empty_summaries(dataset::load_records(data)?);
    if records.is_empty() {
        return Err(DataError::Empty.into());
    }
    let mut splits = dataset::split(records, &config.split)?;
    if let Some(n) = config.train_sample {
        splits.train = dataset::sample_rows(splits.train, n, config.split.seed);
        tracing::info!("Training on a sample of {} records", splits.train.len());
    }
    Ok(splits)
}

pub fn build_loaders(
    splits: &Splits,
    tokenizer: &SummaryTokenizer,
    config: &TrainConfig,
    device: Device,
) -> Result<(DataLoader, DataLoader)> {
    let transform = Seq2SeqTransform {
        max_source_len: config.max_source_len,
        max_target_len: config.max_target_len,
    };
    let special = tokenizer.special_ids();
    let train = transform
        .apply_all(tokenizer, &splits.train)
        .context("failed to tokenize training split")?;
    let valid = transform
        .apply_all(tokenizer, &splits.valid)
        .context("failed to tokenize validation split")?;
    tracing::info!("Tokenized {} train / {} valid examples", train.len(), valid.len());

    Ok((
        DataLoader::new(train, config.batch_size, true, config.split.seed, special, device),
        DataLoader::new(valid, config.batch_size, false, config.split.seed, special, device),
    ))
}

pub struct TrainOutcome {
    pub artifact: Artifact,
    pub splits: Splits,
}

/// Full fine-tuning run: data, staged training, export.
pub fn train(
    data: &Path,
    source: &ModelSource,
    config: &TrainConfig,
    output: &Path,
) -> Result<TrainOutcome> {
    config.validate()?;
    let device = device();

    let splits = load_splits(data, config)?;
    let files = source.resolve()?;
    let tokenizer = SummaryTokenizer::from_vocab_merges(&files.vocab, &files.merges)?;
    let (train_loader, valid_loader) = build_loaders(&splits, &tokenizer, config, device)?;

    let summarizer = Summarizer::load(files, device)?;
    let special = tokenizer.special_ids();
    let mut trainer = Trainer::new(summarizer, special.pad, config.weight_decay, config.grad_clip)?;
    trainer.fit_stages(&config.stages, &train_loader, &valid_loader)?;

    let (summarizer, history) = trainer.into_parts();
    let manifest = ArtifactManifest::new(config, special, history);
    let artifact = artifact::export(&summarizer, &manifest, output)?;

    Ok(TrainOutcome { artifact, splits })
}

/// Sweeps learning rates with the first stage's freeze point applied.
pub fn find_lr(
    data: &Path,
    source: &ModelSource,
    config: &TrainConfig,
    finder: &LrFinderConfig,
) -> Result<(LrSweep, Option<LrSuggestion>)> {
    config.validate()?;
    let device = device();

    let splits = load_splits(data, config)?;
    let files = source.resolve()?;
    let tokenizer = SummaryTokenizer::from_vocab_merges(&files.vocab, &files.merges)?;
    let (train_loader, _) = build_loaders(&splits, &tokenizer, config, device)?;

    let mut summarizer = Summarizer::load(files, device)?;
    match config.stages.first().and_then(|s| s.freeze_to) {
        Some(n) => summarizer.freeze_to(n),
        None => summarizer.unfreeze(),
    }
    let mut trainer = Trainer::new(
        summarizer,
        tokenizer.special_ids().pad,
        config.weight_decay,
        config.grad_clip,
    )?;
    let sweep = lr_finder::find_lr(&mut trainer, &train_loader, finder)?;
    let suggestion = lr_finder::suggest(&sweep);
    Ok((sweep, suggestion))
}

/// Reloads an exported artifact and reviews `n` held-out records.
pub fn review_artifact(
    artifact_dir: &Path,
    records: &[dataset::SummaryRecord],
    n: usize,
) -> Result<Vec<ReviewedExample>> {
    let artifact = Artifact::open(artifact_dir)?;
    let settings = artifact.manifest.generation.clone();
    let generator = SummaryGenerator::from_artifact(&artifact, settings, device())?;
    generate::review(&generator, records, n)
}
