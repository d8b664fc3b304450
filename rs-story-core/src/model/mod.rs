//! Language model and generation.
//!
//! This module provides:
//! - Raw transition counts (`State`)
//! - Normalized next-token distributions with top-k and temperature (`Distribution`)
//! - The smoothed trigram model with backoff (`TrigramModel`)
//! - The persisted artifact bundling tokenizer and model (`ModelBundle`)
//! - Sampling parameters (`GenerationParams`)
//! - A high-level generation interface (`Generator`)

/// Probability distributions over next tokens.
///
/// Sorted by token id, with top-k filtering, temperature scaling and
/// single-draw sampling.
pub mod distribution;

/// Trigram counts, smoothing and the backoff chain.
pub mod trigram_model;

/// Model artifact: training pipeline, save and load.
pub mod bundle;

/// Sampling parameters and their validation.
pub mod params;

/// Lazy and eager generation over a shared model.
pub mod generator;

/// Occurrence counts of one context.
///
/// Not exposed publicly.
mod state;
