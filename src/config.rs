use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::SplitConfig;
use crate::generate::GenerationSettings;

/// One progressive-unfreezing stage. `freeze_to: None` trains every group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub freeze_to: Option<usize>,
    pub epochs: usize,
    pub lr_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub max_source_len: usize,
    pub max_target_len: usize,
    pub batch_size: usize,
    pub split: SplitConfig,
    pub train_sample: Option<usize>,
    pub weight_decay: f64,
    pub grad_clip: f64,
    pub stages: Vec<Stage>,
    pub generation: GenerationSettings,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_source_len: 256,
            max_target_len: 130,
            batch_size: 2,
            split: SplitConfig::default(),
            train_sample: None,
            weight_decay: 0.01,
            grad_clip: 1.0,
            stages: vec![
                Stage {
                    freeze_to: Some(1),
                    epochs: 1,
                    lr_max: 4e-5,
                },
                Stage {
                    freeze_to: Some(2),
                    epochs: 1,
                    lr_max: 2e-5,
                },
                Stage {
                    freeze_to: None,
                    epochs: 2,
                    lr_max: 1e-5,
                },
            ],
            generation: GenerationSettings::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: TrainConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_source_len < 3 || self.max_target_len < 3 {
            anyhow::bail!("sequence lengths must leave room for <s> and </s>");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        if self.stages.is_empty() {
            anyhow::bail!("at least one training stage is required");
        }
        for stage in &self.stages {
            if stage.lr_max <= 0.0 {
                anyhow::bail!("stage learning rate must be positive, got {}", stage.lr_max);
            }
            if stage.freeze_to == Some(0) {
                anyhow::bail!("freeze_to must be at least 1");
            }
        }
        self.split.validate()?;
        Ok(())
    }

    pub fn total_epochs(&self) -> usize {
        self.stages.iter().map(|s| s.epochs).sum()
    }
}
