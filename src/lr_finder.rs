use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tch::Tensor;

use crate::batch::DataLoader;
use crate::schedule::exp_interp;
use crate::trainer::Trainer;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LrFinderConfig {
    pub start_lr: f64,
    pub end_lr: f64,
    pub num_it: usize,
    pub beta: f64,
    pub stop_div: f64,
}

impl Default for LrFinderConfig {
    fn default() -> Self {
        Self {
            start_lr: 1e-7,
            end_lr: 10.0,
            num_it: 100,
            beta: 0.98,
            stop_div: 4.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LrSweep {
    pub lrs: Vec<f64>,
    pub losses: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrSuggestion {
    pub lr_min: f64,
    pub lr_steep: f64,
}

/// Bias-corrected exponential moving average, as plotted by the sweep.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedLoss {
    beta: f64,
    avg: f64,
    count: i32,
}

impl SmoothedLoss {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            avg: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, loss: f64) -> f64 {
        self.count += 1;
        self.avg = self.beta * self.avg + (1.0 - self.beta) * loss;
        self.avg / (1.0 - self.beta.powi(self.count))
    }
}

/// `lr_min`: learning rate at the lowest loss divided by ten.
/// `lr_steep`: learning rate where the loss falls fastest.
pub fn suggest(sweep: &LrSweep) -> Option<LrSuggestion> {
    let n = sweep.lrs.len().min(sweep.losses.len());
    if n < 2 {
        return None;
    }
    let lrs = &sweep.lrs[..n];
    let losses = &sweep.losses[..n];

    let min_idx = losses
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))?
        .0;

    let steep_idx = (1..n)
        .filter(|&i| losses[i].is_finite() && losses[i - 1].is_finite())
        .min_by(|&a, &b| {
            let grad = |i: usize| (losses[i] - losses[i - 1]) / (lrs[i].ln() - lrs[i - 1].ln());
            grad(a).total_cmp(&grad(b))
        })?;

    Some(LrSuggestion {
        lr_min: lrs[min_idx] / 10.0,
        lr_steep: lrs[steep_idx],
    })
}

/// Sweeps the learning rate exponentially over training batches, then puts
/// the weights back as they were.
pub fn find_lr(
    trainer: &mut Trainer,
    loader: &DataLoader,
    config: &LrFinderConfig,
) -> Result<LrSweep> {
    if loader.is_empty() {
        anyhow::bail!("learning-rate sweep needs at least one training batch");
    }

    let snapshot: Vec<(String, Tensor)> = tch::no_grad(|| {
        trainer
            .summarizer()
            .vs
            .variables()
            .into_iter()
            .map(|(name, var)| (name, var.copy()))
            .collect()
    });

    let pb = ProgressBar::new(config.num_it as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  lr-find {bar:30.cyan/black} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut sweep = LrSweep::default();
    let mut smoothed = SmoothedLoss::new(config.beta);
    let mut best = f64::INFINITY;
    let mut it = 0usize;
    let mut epoch = 0usize;

    'sweep: while it < config.num_it {
        for batch in loader.batches(epoch) {
            if it >= config.num_it {
                break 'sweep;
            }
            let pct = it as f64 / (config.num_it.max(2) - 1) as f64;
            let lr = exp_interp(config.start_lr, config.end_lr, pct);
            trainer.set_lr(lr);

            let loss = trainer.step(&batch?)?;
            let smooth = smoothed.update(loss);
            sweep.lrs.push(lr);
            sweep.losses.push(smooth);
            pb.inc(1);
            pb.set_message(format!("lr {:.2e} loss {:.4}", lr, smooth));
            it += 1;

            if smooth < best {
                best = smooth;
            }
            if !smooth.is_finite() || smooth > config.stop_div * best {
                tracing::info!("Loss diverged at lr {:.2e}, stopping sweep", lr);
                break 'sweep;
            }
        }
        epoch += 1;
    }
    pb.finish_and_clear();

    let mut variables = trainer.summarizer().vs.variables();
    tch::no_grad(|| {
        for (name, saved) in &snapshot {
            if let Some(var) = variables.get_mut(name) {
                var.copy_(saved);
            }
        }
    });
    trainer.reset_optimizer()?;

    Ok(sweep)
}
