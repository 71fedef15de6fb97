use std::time::Instant;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tch::nn::{self, OptimizerConfig};
use tch::Tensor;

use crate::batch::{Batch, DataLoader};
use crate::config::Stage;
use crate::loss::Seq2SeqLoss;
use crate::model::Summarizer;
use crate::schedule::OneCycle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochRecord {
    pub stage: usize,
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: Option<f64>,
    pub lr_max: f64,
    pub seconds: f64,
}

pub struct Trainer {
    summarizer: Summarizer,
    optimizer: nn::Optimizer,
    loss: Seq2SeqLoss,
    weight_decay: f64,
    grad_clip: f64,
    history: Vec<EpochRecord>,
    // Epochs trained across every stage; seeds the per-epoch shuffle.
    epochs_run: usize,
}

fn build_optimizer(summarizer: &Summarizer, weight_decay: f64) -> Result<nn::Optimizer> {
    Ok(nn::AdamW::default()
        .beta1(0.9)
        .beta2(0.999)
        .wd(weight_decay)
        .build(&summarizer.vs, 1e-5)?)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {bar:30.green/black} {pos}/{len} [{elapsed}<{eta}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl Trainer {
    pub fn new(
        summarizer: Summarizer,
        pad_id: i64,
        weight_decay: f64,
        grad_clip: f64,
    ) -> Result<Self> {
        let optimizer = build_optimizer(&summarizer, weight_decay)?;
        Ok(Self {
            summarizer,
            optimizer,
            loss: Seq2SeqLoss::new(pad_id),
            weight_decay,
            grad_clip,
            history: Vec::new(),
            epochs_run: 0,
        })
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    pub fn into_parts(self) -> (Summarizer, Vec<EpochRecord>) {
        (self.summarizer, self.history)
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.optimizer.set_lr(lr);
    }

    /// Drops optimizer moments, e.g. after weights were restored.
    pub fn reset_optimizer(&mut self) -> Result<()> {
        self.optimizer = build_optimizer(&self.summarizer, self.weight_decay)?;
        Ok(())
    }

    /// Rescales defined gradients so their global L2 norm is at most
    /// `grad_clip`. Returns the norm measured before clipping.
    pub fn clip_gradients(&self) -> f64 {
        let grads: Vec<Tensor> = self
            .summarizer
            .vs
            .trainable_variables()
            .iter()
            .map(|v| v.grad())
            .filter(|g| g.defined())
            .collect();
        if grads.is_empty() {
            return 0.0;
        }
        tch::no_grad(|| {
            let norms: Vec<Tensor> = grads.iter().map(|g| g.norm()).collect();
            let norm = Tensor::stack(&norms, 0).norm().double_value(&[]);
            if self.grad_clip > 0.0 && norm > self.grad_clip {
                let scale = self.grad_clip / (norm + 1e-6);
                for grad in &grads {
                    let _ = grad.shallow_clone().mul_scalar_(scale);
                }
            }
            norm
        })
    }

    pub fn compute_loss(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let logits = self.summarizer.forward_t(batch, train);
        self.loss.compute(&logits, &batch.labels)
    }

    pub fn train_step(&mut self, batch: &Batch) -> Result<f64> {
        let value = self.step(batch)?;
        if !value.is_finite() {
            anyhow::bail!("non-finite loss encountered: {}", value);
        }
        Ok(value)
    }

    /// One optimizer step that reports a non-finite loss instead of failing.
    pub(crate) fn step(&mut self, batch: &Batch) -> Result<f64> {
        let loss = self.compute_loss(batch, true)?;
        let value = loss.double_value(&[]);
        if !value.is_finite() {
            return Ok(value);
        }

        self.optimizer.zero_grad();
        loss.backward();
        self.clip_gradients();
        self.optimizer.step();

        Ok(value)
    }

    /// Mean loss over the loader, weighted by batch size.
    pub fn validate(&self, loader: &DataLoader) -> Result<Option<f64>> {
        if loader.is_empty() {
            return Ok(None);
        }
        let mut total = 0.0;
        let mut rows = 0i64;
        for batch in loader.batches(0) {
            let batch = batch?;
            let loss = tch::no_grad(|| self.compute_loss(&batch, false))?;
            total += loss.double_value(&[]) * batch.size() as f64;
            rows += batch.size();
        }
        Ok(Some(total / rows.max(1) as f64))
    }

    pub fn fit_one_cycle(
        &mut self,
        stage: usize,
        epochs: usize,
        lr_max: f64,
        train: &DataLoader,
        valid: &DataLoader,
    ) -> Result<()> {
        if train.is_empty() {
            anyhow::bail!("no training examples");
        }
        let schedule = OneCycle::new(lr_max);
        let per_epoch = train.num_batches();
        let total_steps = epochs * per_epoch;
        let mut step = 0usize;

        for epoch in 0..epochs {
            let start = Instant::now();
            let shuffle_epoch = self.epochs_run;
            let pb = ProgressBar::new(per_epoch as u64);
            pb.set_style(progress_style());

            let mut epoch_loss = 0.0;
            let mut count = 0usize;
            for batch in train.batches(shuffle_epoch) {
                let lr = schedule.lr_at(step, total_steps);
                self.set_lr(lr);
                let loss = self.train_step(&batch?)?;
                epoch_loss += loss;
                count += 1;
                step += 1;
                pb.inc(1);
                pb.set_message(format!("loss {:.4} lr {:.2e}", loss, lr));
            }
            pb.finish_and_clear();

            let train_loss = epoch_loss / count.max(1) as f64;
            let valid_loss = self.validate(valid)?;
            let record = EpochRecord {
                stage,
                epoch,
                train_loss,
                valid_loss,
                lr_max,
                seconds: start.elapsed().as_secs_f64(),
            };
            match record.valid_loss {
                Some(v) => tracing::info!(
                    "Stage {} epoch {}: train_loss {:.4} valid_loss {:.4} ({:.0}s)",
                    stage + 1,
                    epoch + 1,
                    record.train_loss,
                    v,
                    record.seconds
                ),
                None => tracing::info!(
                    "Stage {} epoch {}: train_loss {:.4} ({:.0}s)",
                    stage + 1,
                    epoch + 1,
                    record.train_loss,
                    record.seconds
                ),
            }
            self.history.push(record);
            self.epochs_run += 1;
        }
        Ok(())
    }

    /// Runs each stage in order, applying its freeze point first.
    pub fn fit_stages(
        &mut self,
        stages: &[Stage],
        train: &DataLoader,
        valid: &DataLoader,
    ) -> Result<()> {
        for (i, stage) in stages.iter().enumerate() {
            match stage.freeze_to {
                Some(n) => self.summarizer.freeze_to(n),
                None => self.summarizer.unfreeze(),
            }
            tracing::info!(
                "Stage {}/{}: {} epoch(s) at lr_max {:.1e}",
                i + 1,
                stages.len(),
                stage.epochs,
                stage.lr_max
            );
            self.fit_one_cycle(i, stage.epochs, stage.lr_max, train, valid)?;
        }
        Ok(())
    }
}
