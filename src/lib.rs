pub mod artifact;
pub mod batch;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod generate;
pub mod loss;
pub mod lr_finder;
pub mod model;
pub mod pipeline;
pub mod rouge;
pub mod schedule;
pub mod tokenizer;
pub mod trainer;

pub use artifact::{Artifact, ArtifactManifest};
pub use batch::{Batch, DataLoader, Seq2SeqTransform, TokenizedExample};
pub use config::{Stage, TrainConfig};
pub use dataset::{SplitConfig, Splits, SummaryRecord};
pub use error::DataError;
pub use generate::{GenerationSettings, SummaryGenerator};
pub use loss::Seq2SeqLoss;
pub use model::{CheckpointFiles, ParamGroup, PretrainedBart, Summarizer};
pub use tokenizer::SummaryTokenizer;
pub use trainer::Trainer;
