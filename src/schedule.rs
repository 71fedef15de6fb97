use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    let pct = pct.clamp(0.0, 1.0);
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

/// One-cycle learning-rate policy: cosine warm-up to `lr_max`, then cosine
/// annealing to `lr_max / (div * final_div)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneCycle {
    pub lr_max: f64,
    pub div: f64,
    pub final_div: f64,
    pub pct_start: f64,
}

impl OneCycle {
    pub fn new(lr_max: f64) -> Self {
        Self {
            lr_max,
            div: 25.0,
            final_div: 1e5,
            pct_start: 0.25,
        }
    }

    pub fn start_lr(&self) -> f64 {
        self.lr_max / self.div
    }

    pub fn final_lr(&self) -> f64 {
        self.lr_max / (self.div * self.final_div)
    }

    /// Learning rate at `step` of `total` steps.
    pub fn lr_at(&self, step: usize, total: usize) -> f64 {
        if total <= 1 {
            return self.lr_max;
        }
        let pct = step as f64 / (total - 1) as f64;
        if pct < self.pct_start {
            cosine_anneal(self.start_lr(), self.lr_max, pct / self.pct_start)
        } else {
            let span = (1.0 - self.pct_start).max(f64::EPSILON);
            cosine_anneal(self.lr_max, self.final_lr(), (pct - self.pct_start) / span)
        }
    }
}

/// Exponential interpolation between `start` and `end` used by the LR sweep.
pub fn exp_interp(start: f64, end: f64, pct: f64) -> f64 {
    start * (end / start).powf(pct.clamp(0.0, 1.0))
}
