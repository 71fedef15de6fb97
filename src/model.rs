use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use rust_bert::bart::{
    BartConfig, BartConfigResources, BartForConditionalGeneration, BartMergesResources,
    BartModelResources, BartVocabResources,
};
use rust_bert::resources::{RemoteResource, ResourceProvider};
use serde::{Deserialize, Serialize};
use tch::{nn, Device, Tensor};

use crate::batch::Batch;

pub const CONFIG_FILE: &str = "config.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MERGES_FILE: &str = "merges.txt";
pub const WEIGHTS_FILE: &str = "rust_model.ot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum PretrainedBart {
    BartLarge,
    BartLargeCnn,
    #[value(name = "distilbart-cnn-6-6")]
    DistilbartCnn66,
    #[value(name = "distilbart-cnn-12-6")]
    DistilbartCnn126,
}

/// Remote `(name, url)` pairs for one named checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointResources {
    pub config: (&'static str, &'static str),
    pub vocab: (&'static str, &'static str),
    pub merges: (&'static str, &'static str),
    pub weights: (&'static str, &'static str),
}

impl PretrainedBart {
    pub fn resources(self) -> CheckpointResources {
        match self {
            PretrainedBart::BartLarge => CheckpointResources {
                config: BartConfigResources::BART,
                vocab: BartVocabResources::BART,
                merges: BartMergesResources::BART,
                weights: BartModelResources::BART,
            },
            PretrainedBart::BartLargeCnn => CheckpointResources {
                config: BartConfigResources::BART_CNN,
                vocab: BartVocabResources::BART_CNN,
                merges: BartMergesResources::BART_CNN,
                weights: BartModelResources::BART_CNN,
            },
            PretrainedBart::DistilbartCnn66 => CheckpointResources {
                config: BartConfigResources::DISTILBART_CNN_6_6,
                vocab: BartVocabResources::DISTILBART_CNN_6_6,
                merges: BartMergesResources::DISTILBART_CNN_6_6,
                weights: BartModelResources::DISTILBART_CNN_6_6,
            },
            PretrainedBart::DistilbartCnn126 => CheckpointResources {
                config: BartConfigResources::DISTILBART_CNN_12_6,
                vocab: BartVocabResources::DISTILBART_CNN_12_6,
                merges: BartMergesResources::DISTILBART_CNN_12_6,
                weights: BartModelResources::DISTILBART_CNN_12_6,
            },
        }
    }
}

/// Local paths of the four files that make up a BART checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFiles {
    pub config: PathBuf,
    pub vocab: PathBuf,
    pub merges: PathBuf,
    pub weights: PathBuf,
}

impl CheckpointFiles {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            config: dir.join(CONFIG_FILE),
            vocab: dir.join(VOCAB_FILE),
            merges: dir.join(MERGES_FILE),
            weights: dir.join(WEIGHTS_FILE),
        }
    }

    pub fn missing(&self) -> Option<&'static str> {
        [
            (&self.config, CONFIG_FILE),
            (&self.vocab, VOCAB_FILE),
            (&self.merges, MERGES_FILE),
            (&self.weights, WEIGHTS_FILE),
        ]
        .into_iter()
        .find(|(path, _)| !path.exists())
        .map(|(_, name)| name)
    }

    /// Downloads (or reuses the cached copy of) a named checkpoint.
    pub fn download(pretrained: PretrainedBart) -> Result<Self> {
        let resources = pretrained.resources();
        let fetch = |resource: (&str, &str)| -> Result<PathBuf> {
            RemoteResource::from_pretrained(resource)
                .get_local_path()
                .with_context(|| format!("failed to fetch {}", resource.0))
        };
        tracing::info!("Resolving pretrained checkpoint {:?}", pretrained);
        Ok(Self {
            config: fetch(resources.config)?,
            vocab: fetch(resources.vocab)?,
            merges: fetch(resources.merges)?,
            weights: fetch(resources.weights)?,
        })
    }
}

/// Layer groups used for progressive unfreezing, ordered input to output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamGroup {
    Encoder,
    Decoder,
    Head,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 3] = [ParamGroup::Encoder, ParamGroup::Decoder, ParamGroup::Head];

    pub fn of(name: &str) -> ParamGroup {
        if name.starts_with("model.encoder.") {
            ParamGroup::Encoder
        } else if name.starts_with("model.decoder.") {
            ParamGroup::Decoder
        } else {
            ParamGroup::Head
        }
    }

    /// Groups left trainable by `freeze_to(n)`: the last `n`.
    pub fn trainable_under(n: usize) -> &'static [ParamGroup] {
        &Self::ALL[Self::ALL.len().saturating_sub(n)..]
    }
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamGroup::Encoder => "encoder",
            ParamGroup::Decoder => "decoder",
            ParamGroup::Head => "head",
        };
        f.write_str(name)
    }
}

/// Pretrained BART with its variable store.
pub struct Summarizer {
    pub vs: nn::VarStore,
    model: BartForConditionalGeneration,
    files: CheckpointFiles,
    // Names created as trainable; buffers such as `final_logits_bias` stay frozen.
    trainable: HashSet<String>,
}

impl Summarizer {
    pub fn load(files: CheckpointFiles, device: Device) -> Result<Self> {
        let raw = std::fs::read_to_string(&files.config)
            .with_context(|| format!("failed to read {}", files.config.display()))?;
        let config: BartConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", files.config.display()))?;

        let mut vs = nn::VarStore::new(device);
        let model = BartForConditionalGeneration::new(vs.root(), &config);
        vs.load(&files.weights)
            .with_context(|| format!("failed to load weights {}", files.weights.display()))?;

        tracing::info!(
            "Loaded BART ({} encoder / {} decoder layers, d_model {}) on {:?}",
            config.encoder_layers,
            config.decoder_layers,
            config.d_model,
            device
        );

        let trainable = vs
            .variables()
            .into_iter()
            .filter(|(_, var)| var.requires_grad())
            .map(|(name, _)| name)
            .collect();

        Ok(Self {
            vs,
            model,
            files,
            trainable,
        })
    }

    pub fn files(&self) -> &CheckpointFiles {
        &self.files
    }

    /// Returns `[batch, target_len, vocab]` logits.
    pub fn forward_t(&self, batch: &Batch, train: bool) -> Tensor {
        self.model
            .forward_t(
                Some(&batch.input_ids),
                Some(&batch.attention_mask),
                None,
                Some(&batch.decoder_input_ids),
                Some(&batch.decoder_attention_mask),
                None,
                train,
            )
            .decoder_output
    }

    pub fn freeze_to(&mut self, n: usize) {
        let groups = ParamGroup::trainable_under(n);
        for (name, var) in self.vs.variables() {
            if self.is_trainable(&name) {
                let _ = var.set_requires_grad(groups.contains(&ParamGroup::of(&name)));
            }
        }
        let names: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
        tracing::info!(
            "Training groups [{}] ({} parameters)",
            names.join(", "),
            self.trainable_parameter_count()
        );
    }

    /// Whether `name` belongs to the parameters the optimizer may update.
    pub fn is_trainable(&self, name: &str) -> bool {
        self.trainable.contains(name)
    }

    pub fn unfreeze(&mut self) {
        self.freeze_to(ParamGroup::ALL.len());
    }

    pub fn trainable_parameter_count(&self) -> i64 {
        self.vs
            .variables()
            .values()
            .filter(|t| t.requires_grad())
            .map(|t| t.numel() as i64)
            .sum()
    }

    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.vs
            .save(path)
            .with_context(|| format!("failed to save weights to {}", path.display()))
    }
}
