use anyhow::Result;
use tch::{Kind, Reduction, Tensor};

/// Cross-entropy summed over target tokens and divided by the number of
/// non-padding targets.
pub struct Seq2SeqLoss {
    pad_id: i64,
}

impl Seq2SeqLoss {
    pub fn new(pad_id: i64) -> Self {
        Self { pad_id }
    }

    /// `logits`: `[batch, len, vocab]`, `labels`: `[batch, len]`.
    pub fn compute(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let vocab = *logits
            .size()
            .last()
            .ok_or_else(|| anyhow::anyhow!("logits must have a vocabulary dimension"))?;

        let summed = logits
            .to_kind(Kind::Float)
            .reshape([-1, vocab])
            .f_cross_entropy_loss::<Tensor>(
                &labels.reshape([-1]),
                None,
                Reduction::Sum,
                self.pad_id,
                0.0,
            )?;
        let targets = labels.ne(self.pad_id).sum(Kind::Float).clamp_min(1.0);
        Ok(summed / targets)
    }
}
