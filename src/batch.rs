use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tch::{Device, Tensor};

use crate::dataset::SummaryRecord;
use crate::tokenizer::{SpecialIds, SummaryTokenizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub labels: Vec<i64>,
}

/// Source text and target summary lengths for one dataset.
#[derive(Debug, Clone, Copy)]
pub struct Seq2SeqTransform {
    pub max_source_len: usize,
    pub max_target_len: usize,
}

impl Seq2SeqTransform {
    pub fn apply(
        &self,
        tokenizer: &SummaryTokenizer,
        record: &SummaryRecord,
    ) -> Result<TokenizedExample> {
        let source = tokenizer.encode(&record.text, self.max_source_len)?;
        let target = tokenizer.encode(&record.summary, self.max_target_len)?;
        Ok(TokenizedExample {
            input_ids: source.ids,
            attention_mask: source.attention_mask,
            labels: target.ids,
        })
    }

    pub fn apply_all(
        &self,
        tokenizer: &SummaryTokenizer,
        records: &[SummaryRecord],
    ) -> Result<Vec<TokenizedExample>> {
        records
            .par_iter()
            .map(|record| self.apply(tokenizer, record))
            .collect()
    }
}

/// Decoder inputs: `labels` shifted one step right behind `decoder_start`.
/// Any position that would read a label equal to `-100` gets `pad` instead.
pub fn shift_tokens_right(labels: &[i64], pad: i64, decoder_start: i64) -> Vec<i64> {
    if labels.is_empty() {
        return Vec::new();
    }
    let mut shifted = Vec::with_capacity(labels.len());
    shifted.push(decoder_start);
    shifted.extend(
        labels[..labels.len() - 1]
            .iter()
            .map(|&id| if id == -100 { pad } else { id }),
    );
    shifted
}

pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub decoder_input_ids: Tensor,
    pub decoder_attention_mask: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn collate(
        examples: &[&TokenizedExample],
        special: SpecialIds,
        device: Device,
    ) -> Result<Self> {
        let first = examples
            .first()
            .ok_or_else(|| anyhow::anyhow!("cannot collate an empty batch"))?;
        let rows = examples.len() as i64;
        let src_len = first.input_ids.len() as i64;
        let tgt_len = first.labels.len() as i64;

        let mut input_ids = Vec::with_capacity((rows * src_len) as usize);
        let mut attention_mask = Vec::with_capacity((rows * src_len) as usize);
        let mut decoder_input_ids = Vec::with_capacity((rows * tgt_len) as usize);
        let mut labels = Vec::with_capacity((rows * tgt_len) as usize);

        for example in examples {
            if example.input_ids.len() as i64 != src_len || example.labels.len() as i64 != tgt_len {
                anyhow::bail!("examples in a batch must share sequence lengths");
            }
            input_ids.extend_from_slice(&example.input_ids);
            attention_mask.extend_from_slice(&example.attention_mask);
            decoder_input_ids.extend(shift_tokens_right(&example.labels, special.pad, special.eos));
            labels.extend_from_slice(&example.labels);
        }

        let decoder_attention_mask: Vec<i64> = decoder_input_ids
            .iter()
            .map(|&id| i64::from(id != special.pad))
            .collect();

        let to_tensor = |data: &[i64], len: i64| -> Result<Tensor> {
            Ok(Tensor::f_from_slice(data)?.view([rows, len]).to_device(device))
        };

        Ok(Self {
            input_ids: to_tensor(&input_ids, src_len)?,
            attention_mask: to_tensor(&attention_mask, src_len)?,
            decoder_input_ids: to_tensor(&decoder_input_ids, tgt_len)?,
            decoder_attention_mask: to_tensor(&decoder_attention_mask, tgt_len)?,
            labels: to_tensor(&labels, tgt_len)?,
        })
    }

    pub fn size(&self) -> i64 {
        self.input_ids.size()[0]
    }
}

pub struct DataLoader {
    examples: Vec<TokenizedExample>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    special: SpecialIds,
    device: Device,
}

impl DataLoader {
    pub fn new(
        examples: Vec<TokenizedExample>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
        special: SpecialIds,
        device: Device,
    ) -> Self {
        Self {
            examples,
            batch_size: batch_size.max(1),
            shuffle,
            seed,
            special,
            device,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        (self.examples.len() + self.batch_size - 1) / self.batch_size
    }

    /// Example order for `epoch`; reshuffled per epoch when shuffling.
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn batches(&self, epoch: usize) -> impl Iterator<Item = Result<Batch>> + '_ {
        let order = self.order(epoch);
        let chunks: Vec<Vec<usize>> = order.chunks(self.batch_size).map(|c| c.to_vec()).collect();
        chunks.into_iter().map(move |indices| {
            let examples: Vec<&TokenizedExample> =
                indices.iter().map(|&i| &self.examples[i]).collect();
            Batch::collate(&examples, self.special, self.device)
        })
    }
}
