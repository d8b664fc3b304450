//! Classical text generation engine.
//!
//! This crate provides a complete trigram generation pipeline:
//! - A byte-pair-encoding subword tokenizer with reserved special tokens
//! - A corpus indexer inserting sentence, paragraph and document markers
//! - A trigram language model with optional Laplace or interpolated smoothing
//! - Seeded top-k / temperature sampling, streamed or to completion
//! - A versioned binary artifact holding everything needed to generate
//!
//! Training happens once, offline; a loaded [`ModelBundle`] is immutable and
//! can be shared between threads.

/// Error types of every stage.
pub mod error;

/// Boundary normalization of raw text into marker-delimited token streams.
pub mod indexer;

/// Corpus loading and path helpers.
pub mod io;

/// Trigram model, sampling and generation.
pub mod model;

/// Subword tokenizer and vocabulary.
pub mod tokenizer;

pub use error::{BundleError, GenerationError, ModelError, TokenizerError};
pub use indexer::{BoundaryRules, Indexer};
pub use model::bundle::{BundleStats, ModelBundle, TrainingOptions};
pub use model::distribution::Distribution;
pub use model::generator::{GenerationOutput, GenerationStream, Generator, StopReason, TokenEvent};
pub use model::params::GenerationParams;
pub use model::trigram_model::{Context, Smoothing, TrigramModel};
pub use tokenizer::special::Special;
pub use tokenizer::{TokenId, Tokenizer, TrainingConfig};
