#![allow(dead_code)]

use std::fs;
use std::path::Path;

use anyhow::Result;
use bartsum::batch::{DataLoader, Seq2SeqTransform};
use bartsum::model::CheckpointFiles;
use bartsum::tokenizer::SummaryTokenizer;
use bartsum::{Summarizer, SummaryRecord};
use rust_bert::bart::{BartConfig, BartForConditionalGeneration};
use tch::{nn, Device, Tensor};

/// A two-layer BART small enough to train on CPU in a test.
pub const TINY_BART_CONFIG: &str = r#"{
    "vocab_size": 40,
    "d_model": 16,
    "encoder_layers": 1,
    "decoder_layers": 1,
    "num_hidden_layers": 1,
    "encoder_attention_heads": 2,
    "decoder_attention_heads": 2,
    "encoder_ffn_dim": 32,
    "decoder_ffn_dim": 32,
    "max_position_embeddings": 64,
    "dropout": 0.0,
    "attention_dropout": 0.0,
    "activation_dropout": 0.0,
    "encoder_layerdrop": 0.0,
    "decoder_layerdrop": 0.0,
    "init_std": 0.02,
    "pad_token_id": 1,
    "bos_token_id": 0,
    "eos_token_id": 2,
    "decoder_start_token_id": 2,
    "normalize_embedding": true,
    "static_position_embeddings": false,
    "scale_embedding": false,
    "is_encoder_decoder": true
}"#;

pub const MAX_SOURCE_LEN: usize = 16;
pub const MAX_TARGET_LEN: usize = 8;

/// Writes a byte-level vocabulary (specials, `a`..`z`, `Ġ`, three merges and
/// `<mask>`) and its merges into `dir`.
pub fn write_tokenizer_files(dir: &Path) -> Result<CheckpointFiles> {
    let files = CheckpointFiles::in_dir(dir);

    let mut vocab = serde_json::Map::new();
    for (i, token) in ["<s>", "<pad>", "</s>", "<unk>"].iter().enumerate() {
        vocab.insert(token.to_string(), (i as u64).into());
    }
    let mut next = 4u64;
    for c in ('a'..='z').chain(['Ġ']) {
        vocab.insert(c.to_string(), next.into());
        next += 1;
    }
    for token in ["he", "ll", "Ġw", "<mask>"] {
        vocab.insert(token.to_string(), next.into());
        next += 1;
    }

    fs::write(&files.vocab, serde_json::to_string(&vocab)?)?;
    fs::write(&files.merges, "#version: 0.2\nh e\nl l\nĠ w\n")?;
    Ok(files)
}

pub fn create_tokenizer(dir: &Path) -> Result<SummaryTokenizer> {
    let files = write_tokenizer_files(dir)?;
    SummaryTokenizer::from_vocab_merges(&files.vocab, &files.merges)
}

/// Writes a complete checkpoint directory holding freshly initialised weights.
pub fn write_tiny_checkpoint(dir: &Path) -> Result<CheckpointFiles> {
    let files = write_tokenizer_files(dir)?;
    fs::write(&files.config, TINY_BART_CONFIG)?;

    tch::manual_seed(7);
    let config: BartConfig = serde_json::from_str(TINY_BART_CONFIG)?;
    let vs = nn::VarStore::new(Device::Cpu);
    let _model = BartForConditionalGeneration::new(vs.root(), &config);
    vs.save(&files.weights)?;
    Ok(files)
}

pub fn load_tiny_summarizer(dir: &Path) -> Result<Summarizer> {
    let files = write_tiny_checkpoint(dir)?;
    Summarizer::load(files, Device::Cpu)
}

pub fn records() -> Vec<SummaryRecord> {
    [
        ("hello world hello world", "hello"),
        ("the world is wide", "wide world"),
        ("quick brown fox jumps", "fox jumps"),
        ("lazy dogs sleep all day", "dogs sleep"),
        ("hello there general", "hello there"),
    ]
    .iter()
    .map(|(text, summary)| SummaryRecord::new(*text, *summary))
    .collect()
}

pub fn loader(tokenizer: &SummaryTokenizer, shuffle: bool) -> Result<DataLoader> {
    let transform = Seq2SeqTransform {
        max_source_len: MAX_SOURCE_LEN,
        max_target_len: MAX_TARGET_LEN,
    };
    let examples = transform.apply_all(tokenizer, &records())?;
    Ok(DataLoader::new(
        examples,
        2,
        shuffle,
        42,
        tokenizer.special_ids(),
        Device::Cpu,
    ))
}

/// Deep copies of every variable, keyed by name.
pub fn snapshot(summarizer: &Summarizer) -> Vec<(String, Tensor)> {
    let mut vars: Vec<(String, Tensor)> = summarizer
        .vs
        .variables()
        .into_iter()
        .map(|(name, var)| (name, var.detach().copy()))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}
