use std::io;

use thiserror::Error;

use crate::tokenizer::TokenId;

/// Errors raised while training, loading or using a tokenizer.
#[derive(Debug, Error)]
pub enum TokenizerError {
	/// Training needs at least one word.
	#[error("cannot train a tokenizer on an empty corpus")]
	EmptyCorpus,

	/// Decoding met an id that the vocabulary does not contain.
	#[error("unknown token id: {0}")]
	UnknownTokenId(TokenId),

	/// A persisted vocabulary or merge list does not hold together.
	#[error("corrupt vocabulary: {0}")]
	CorruptVocabulary(String),
}

/// Errors raised by the trigram language model.
#[derive(Debug, Error)]
pub enum ModelError {
	/// No level of the backoff chain has any probability mass.
	#[error("no usable distribution for the current context")]
	ExhaustedContext,

	/// Smoothing parameters are out of range.
	#[error("invalid smoothing: {0}")]
	InvalidSmoothing(String),

	/// Evaluation needs at least three tokens.
	#[error("sequence too short: {0} tokens, need at least 3")]
	SequenceTooShort(usize),

	/// Two partial models disagree on the vocabulary they count over.
	#[error("vocabulary size mismatch: {0} vs {1}")]
	VocabularyMismatch(usize, usize),
}

/// Errors raised before or during a generation request.
///
/// Configuration errors are always reported before any token is produced.
#[derive(Debug, Error)]
pub enum GenerationError {
	#[error("prefix must not be empty")]
	EmptyPrefix,

	#[error("temperature must be strictly positive, got {0}")]
	InvalidTemperature(f64),

	#[error("top_k must be at least 1, got {0}")]
	InvalidTopK(usize),

	#[error("max_length must be at most {limit}, got {value}")]
	MaxLengthTooLarge { value: usize, limit: usize },

	#[error(transparent)]
	Tokenizer(#[from] TokenizerError),
}

impl GenerationError {
	/// True for errors caused by the caller's parameters rather than the model.
	pub fn is_configuration(&self) -> bool {
		!matches!(self, Self::Tokenizer(_))
	}
}

/// Errors raised while building, saving or loading a model bundle.
#[derive(Debug, Error)]
pub enum BundleError {
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),

	#[error("corrupt model artifact: {0}")]
	Corrupt(String),

	#[error("serialization failed: {0}")]
	Encode(#[from] postcard::Error),

	#[error(transparent)]
	Tokenizer(#[from] TokenizerError),

	#[error(transparent)]
	Model(#[from] ModelError),
}
