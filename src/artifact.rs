use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::TrainConfig;
use crate::error::DataError;
use crate::generate::GenerationSettings;
use crate::model::{CheckpointFiles, Summarizer, CONFIG_FILE, MERGES_FILE, VOCAB_FILE, WEIGHTS_FILE};
use crate::tokenizer::SpecialIds;
use crate::trainer::EpochRecord;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Everything besides the weights needed to rebuild the data pipeline and
/// run generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub max_source_len: usize,
    pub max_target_len: usize,
    pub special_ids: SpecialIds,
    pub generation: GenerationSettings,
    pub history: Vec<EpochRecord>,
    pub train_config: TrainConfig,
}

impl ArtifactManifest {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn new(config: &TrainConfig, special_ids: SpecialIds, history: Vec<EpochRecord>) -> Self {
        Self {
            format_version: Self::FORMAT_VERSION,
            max_source_len: config.max_source_len,
            max_target_len: config.max_target_len,
            special_ids,
            generation: config.generation.clone(),
            history,
            train_config: config.clone(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DataError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// A trained model directory: checkpoint files plus the manifest.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub dir: PathBuf,
    pub files: CheckpointFiles,
    pub manifest: ArtifactManifest,
}

impl Artifact {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DataError> {
        let dir = dir.as_ref().to_path_buf();
        let files = CheckpointFiles::in_dir(&dir);
        if let Some(file) = files.missing() {
            return Err(DataError::IncompleteArtifact { dir, file });
        }
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(DataError::IncompleteArtifact {
                dir,
                file: MANIFEST_FILE,
            });
        }
        let manifest = ArtifactManifest::load(&manifest_path)?;
        Ok(Self {
            dir,
            files,
            manifest,
        })
    }
}

fn copy_into(src: &Path, dir: &Path, name: &str) -> Result<()> {
    let dst = dir.join(name);
    if src != dst {
        fs::copy(src, &dst)
            .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    }
    Ok(())
}

/// Writes weights, tokenizer files, model config and manifest to `dir`.
pub fn export(
    summarizer: &Summarizer,
    manifest: &ArtifactManifest,
    dir: impl AsRef<Path>,
) -> Result<Artifact> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let source = summarizer.files();
    copy_into(&source.config, dir, CONFIG_FILE)?;
    copy_into(&source.vocab, dir, VOCAB_FILE)?;
    copy_into(&source.merges, dir, MERGES_FILE)?;
    summarizer.save_weights(dir.join(WEIGHTS_FILE))?;
    manifest.save(dir.join(MANIFEST_FILE))?;

    tracing::info!("Exported trained model to {}", dir.display());
    Ok(Artifact::open(dir)?)
}
