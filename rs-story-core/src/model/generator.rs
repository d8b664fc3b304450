use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use rand::Rng;
use serde::Serialize;

use crate::error::{GenerationError, TokenizerError};
use crate::model::bundle::ModelBundle;
use crate::model::params::GenerationParams;
use crate::model::trigram_model::Context;
use crate::tokenizer::special::Special;
use crate::tokenizer::TokenId;

/// High-level text generator over a shared, read-only model.
///
/// # Responsibilities
/// - Validate generation parameters before producing any token
/// - Encode the prefix with the corpus boundary rules
/// - Run the sampling loop, lazily ([`GenerationStream`]) or to completion
///
/// Cloning is cheap: clones share the same [`ModelBundle`], so one generator
/// can serve many concurrent requests without locking.
#[derive(Clone, Debug)]
pub struct Generator {
	model: Arc<ModelBundle>,
}

/// One generated token.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenEvent {
	pub id: TokenId,
	/// Surface text of the token; special tokens render as their literal.
	pub text: String,
	pub is_special: bool,
}

/// Why a generation ended.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
	/// `<EOT>` was sampled.
	EndOfText,
	/// `max_length` tokens were produced.
	MaxLength,
	/// The model had no probability mass for the current context.
	ExhaustedContext,
	/// The deadline passed between two steps.
	Deadline,
}

/// Result of a completed generation.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOutput {
	/// Decoded continuation, without the prefix. Markers stay literal.
	pub generated_text: String,
	/// Number of generated tokens, special tokens included.
	pub token_count: usize,
	pub stopped_at_eot: bool,
	pub tokens: Vec<TokenId>,
	pub stop_reason: StopReason,
}

impl GenerationOutput {
	/// The continuation with every boundary marker removed.
	///
	/// # Errors
	/// `UnknownTokenId` when `model` is not the bundle that produced the output.
	pub fn plain_text(&self, model: &ModelBundle) -> Result<String, TokenizerError> {
		model.tokenizer().decode_plain(&self.tokens)
	}
}

impl Generator {
	pub fn new(model: Arc<ModelBundle>) -> Self {
		Self { model }
	}

	pub fn model(&self) -> &ModelBundle {
		&self.model
	}

	/// Starts a lazy generation: each call to `next` samples one token.
	///
	/// # Errors
	/// Configuration errors (`InvalidTemperature`, `InvalidTopK`, `EmptyPrefix`)
	/// are returned here, before the first token.
	pub fn stream<R: Rng>(
		&self,
		prefix: &str,
		params: &GenerationParams,
		rng: R,
	) -> Result<GenerationStream<R>, GenerationError> {
		params.validate()?;
		if prefix.trim().is_empty() {
			return Err(GenerationError::EmptyPrefix);
		}

		let prompt = self.model.encode_prompt(prefix);
		debug!("prefix {:?} encoded to {} token(s)", prefix, prompt.len());

		Ok(GenerationStream {
			model: Arc::clone(&self.model),
			params: params.clone(),
			rng,
			context: Context::from_tail(&prompt),
			generated: Vec::new(),
			deadline: None,
			stop: None,
		})
	}

	/// Generates a full continuation of `prefix`.
	///
	/// With a seeded `rng`, the output is identical across runs.
	pub fn generate<R: Rng>(
		&self,
		prefix: &str,
		params: &GenerationParams,
		rng: R,
	) -> Result<GenerationOutput, GenerationError> {
		self.stream(prefix, params, rng)?.finish()
	}
}

/// A generation in progress.
///
/// Holds the rolling two-token context and the tokens produced so far.
/// Iteration ends once a [`StopReason`] is set and never resumes.
#[derive(Debug)]
pub struct GenerationStream<R> {
	model: Arc<ModelBundle>,
	params: GenerationParams,
	rng: R,
	context: Context,
	generated: Vec<TokenId>,
	deadline: Option<Instant>,
	stop: Option<StopReason>,
}

impl<R: Rng> GenerationStream<R> {
	/// Aborts the generation at the first step started after `deadline`.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);
		self
	}

	/// `None` while the stream can still produce tokens.
	pub fn stop_reason(&self) -> Option<StopReason> {
		self.stop
	}

	pub fn generated(&self) -> &[TokenId] {
		&self.generated
	}

	pub fn token_count(&self) -> usize {
		self.generated.len()
	}

	/// Runs the stream to its end and decodes what it produced.
	pub fn finish(mut self) -> Result<GenerationOutput, GenerationError> {
		while self.next().is_some() {}
		let stop_reason = self.stop.unwrap_or(StopReason::MaxLength);
		let generated_text = self.model.tokenizer().decode(&self.generated)?;

		Ok(GenerationOutput {
			generated_text,
			token_count: self.generated.len(),
			stopped_at_eot: stop_reason == StopReason::EndOfText,
			tokens: self.generated,
			stop_reason,
		})
	}

	fn halt(&mut self, reason: StopReason) -> Option<TokenEvent> {
		debug!("generation stopped after {} token(s): {:?}", self.generated.len(), reason);
		self.stop = Some(reason);
		None
	}
}

impl<R: Rng> Iterator for GenerationStream<R> {
	type Item = TokenEvent;

	fn next(&mut self) -> Option<TokenEvent> {
		if self.stop.is_some() {
			return None;
		}
		if self.generated.len() >= self.params.max_length {
			return self.halt(StopReason::MaxLength);
		}
		if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			warn!("generation deadline reached after {} token(s)", self.generated.len());
			return self.halt(StopReason::Deadline);
		}

		let Ok(distribution) = self.model.model().distribution(self.context) else {
			return self.halt(StopReason::ExhaustedContext);
		};
		let candidates = distribution.top_k(self.params.top_k).with_temperature(self.params.temperature);
		let Some(id) = candidates.sample(&mut self.rng) else {
			return self.halt(StopReason::ExhaustedContext);
		};

		self.generated.push(id);
		self.context = self.context.push(id);

		let special = Special::from_id(id);
		if special.is_some_and(Special::is_terminal) {
			self.stop = Some(StopReason::EndOfText);
		}
		// Sampled ids are always inside the vocabulary of a loaded bundle
		let text = self.model.tokenizer().render_token(id).unwrap_or_default();
		Some(TokenEvent { id, text, is_special: special.is_some() })
	}
}

impl<R: Rng> FusedIterator for GenerationStream<R> {}
