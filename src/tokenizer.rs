use std::path::Path;

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::{
    AddedToken, DecoderWrapper, ModelWrapper, NormalizerWrapper, PostProcessorWrapper, PreTokenizerWrapper,
    Tokenizer, TokenizerBuilder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialIds {
    pub bos: i64,
    pub pad: i64,
    pub eos: i64,
    pub unk: i64,
}

impl Default for SpecialIds {
    fn default() -> Self {
        Self {
            bos: 0,
            pad: 1,
            eos: 2,
            unk: 3,
        }
    }
}

/// BART's control tokens; only those present in the vocabulary are registered.
const SPECIAL_TOKENS: [&str; 5] = ["<s>", "<pad>", "</s>", "<unk>", "<mask>"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl Encoded {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// Byte-level BPE tokenizer for BART checkpoints.
#[derive(Clone)]
pub struct SummaryTokenizer {
    tokenizer: Tokenizer,
    special: SpecialIds,
}

impl SummaryTokenizer {
    pub fn from_vocab_merges(vocab: impl AsRef<Path>, merges: impl AsRef<Path>) -> Result<Self> {
        let vocab = vocab.as_ref().to_string_lossy().into_owned();
        let merges = merges.as_ref().to_string_lossy().into_owned();

        let bpe = BPE::from_file(&vocab, &merges)
            .unk_token("<unk>".to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load BPE from {}: {}", vocab, e))?;

        let tokenizer = TokenizerBuilder::<
            ModelWrapper,
            NormalizerWrapper,
            PreTokenizerWrapper,
            PostProcessorWrapper,
            DecoderWrapper,
        >::new()
        .with_model(bpe.into())
        .with_normalizer(None)
        .with_pre_tokenizer(Some(PreTokenizerWrapper::ByteLevel(
            ByteLevel::default().add_prefix_space(false),
        )))
        .with_post_processor(None)
        .with_decoder(Some(DecoderWrapper::ByteLevel(ByteLevel::default())))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build tokenizer: {}", e))?;

        Ok(Self::wrap(tokenizer.into()))
    }

    fn wrap(mut tokenizer: Tokenizer) -> Self {
        let specials: Vec<AddedToken> = SPECIAL_TOKENS
            .iter()
            .filter(|token| tokenizer.token_to_id(token).is_some())
            .map(|&token| AddedToken::from(token, true))
            .collect();
        tokenizer.add_special_tokens(&specials);

        let defaults = SpecialIds::default();
        let lookup = |token: &str, fallback: i64| {
            tokenizer
                .token_to_id(token)
                .map(i64::from)
                .unwrap_or(fallback)
        };
        let special = SpecialIds {
            bos: lookup("<s>", defaults.bos),
            pad: lookup("<pad>", defaults.pad),
            eos: lookup("</s>", defaults.eos),
            unk: lookup("<unk>", defaults.unk),
        };
        tracing::debug!(
            "Tokenizer vocabulary size: {}, special ids: {:?}",
            tokenizer.get_vocab_size(false),
            special
        );
        Self { tokenizer, special }
    }

    pub fn special_ids(&self) -> SpecialIds {
        self.special
    }

    pub fn get_vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(false)
    }

    /// Raw sub-word ids with no special tokens.
    pub fn tokenize(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Failed to encode: {}", e))?;
        Ok(encoding.get_ids().iter().map(|&id| id as i64).collect())
    }

    /// `<s> ids </s>` truncated and padded to exactly `max_len`.
    pub fn encode(&self, text: &str, max_len: usize) -> Result<Encoded> {
        if max_len < 2 {
            anyhow::bail!("max_len must fit <s> and </s>, got {}", max_len);
        }
        let mut body = self.tokenize(text)?;
        body.truncate(max_len - 2);

        let mut ids = Vec::with_capacity(max_len);
        ids.push(self.special.bos);
        ids.extend(body);
        ids.push(self.special.eos);

        let real = ids.len();
        ids.resize(max_len, self.special.pad);
        let mut attention_mask = vec![1; real];
        attention_mask.resize(max_len, 0);

        Ok(Encoded {
            ids,
            attention_mask,
        })
    }

    pub fn encode_batch(&self, texts: &[&str], max_len: usize) -> Result<Vec<Encoded>> {
        texts
            .par_iter()
            .map(|text| self.encode(text, max_len))
            .collect()
    }

    pub fn decode(&self, ids: &[i64]) -> Result<String> {
        let special = self.special;
        let ids: Vec<u32> = ids
            .iter()
            .filter(|&&id| id >= 0)
            .filter(|&&id| ![special.bos, special.eos, special.pad, special.unk].contains(&id))
            .map(|&id| id as u32)
            .collect();
        let decoded = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| anyhow::anyhow!("Failed to decode: {}", e))?;
        Ok(decoded.trim().to_string())
    }
}
