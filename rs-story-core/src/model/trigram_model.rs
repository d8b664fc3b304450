use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use log::info;
use serde::{Deserialize, Serialize};

use super::distribution::Distribution;
use super::state::State;
use crate::error::ModelError;
use crate::tokenizer::TokenId;

/// Below this many tokens, training stays on the calling thread.
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// Floor applied to probabilities when computing perplexity.
const PROBABILITY_FLOOR: f64 = 1e-10;

/// How counts are turned into next-token probabilities.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub enum Smoothing {
	/// Maximum likelihood over observed continuations only.
	#[default]
	None,
	/// Adds the constant to every count and normalizes over the whole vocabulary.
	Laplace(f64),
	/// Jelinek-Mercer mixture of unigram, bigram and trigram estimates.
	/// Weights must sum to 1.
	Interpolated { unigram: f64, bigram: f64, trigram: f64 },
}

impl Smoothing {
	pub fn validate(&self) -> Result<(), ModelError> {
		match *self {
			Smoothing::None => Ok(()),
			Smoothing::Laplace(k) if k.is_finite() && k > 0.0 => Ok(()),
			Smoothing::Laplace(k) => Err(ModelError::InvalidSmoothing(format!("laplace constant must be > 0, got {k}"))),
			Smoothing::Interpolated { unigram, bigram, trigram } => {
				let weights = [unigram, bigram, trigram];
				if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
					return Err(ModelError::InvalidSmoothing("interpolation weights must be non-negative".to_owned()));
				}
				let sum: f64 = weights.iter().sum();
				if (sum - 1.0).abs() > 1e-6 {
					return Err(ModelError::InvalidSmoothing(format!("interpolation weights must sum to 1, got {sum}")));
				}
				Ok(())
			}
		}
	}
}

/// Tokens available to condition the next prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Context {
	Empty,
	One(TokenId),
	Two(TokenId, TokenId),
}

impl Context {
	/// Context made of the last (up to) two tokens of `tokens`.
	pub fn from_tail(tokens: &[TokenId]) -> Self {
		match tokens {
			[] => Context::Empty,
			[b] => Context::One(*b),
			[.., a, b] => Context::Two(*a, *b),
		}
	}

	/// Slides the window forward by one token.
	pub fn push(self, next: TokenId) -> Self {
		match self {
			Context::Empty => Context::One(next),
			Context::One(b) | Context::Two(_, b) => Context::Two(b, next),
		}
	}
}

/// Order-3 language model over token ids.
///
/// # Responsibilities
/// - Count unigrams, bigrams and trigrams over a token stream
/// - Expose the conditional next-token distribution of a two-token context
/// - Back off to shorter contexts when a context was never observed
/// - Merge with another model counted over the same vocabulary
///
/// The model is immutable once trained and can be shared freely between
/// threads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrigramModel {
	vocab_size: usize,
	smoothing: Smoothing,
	/// (A, B) -> continuations C
	trigrams: HashMap<(TokenId, TokenId), State>,
	/// B -> continuations C
	bigrams: HashMap<TokenId, State>,
	/// Marginal token counts; `total` is the corpus length.
	unigrams: State,
}

impl TrigramModel {
	/// Creates an empty model over a vocabulary of `vocab_size` tokens.
	///
	/// # Errors
	/// Returns an error if the smoothing parameters are invalid.
	pub fn new(vocab_size: usize, smoothing: Smoothing) -> Result<Self, ModelError> {
		smoothing.validate()?;
		Ok(Self {
			vocab_size,
			smoothing,
			trigrams: HashMap::new(),
			bigrams: HashMap::new(),
			unigrams: State::default(),
		})
	}

	/// Counts every window of the token stream.
	pub fn train(tokens: &[TokenId], vocab_size: usize, smoothing: Smoothing) -> Result<Self, ModelError> {
		let mut model = Self::new(vocab_size, smoothing)?;
		model.count_windows(tokens, tokens.len());
		model.log_summary();
		Ok(model)
	}

	/// Same as [`TrigramModel::train`], splitting the stream between `threads`
	/// workers and merging their partial models.
	///
	/// Windows that straddle two chunks are counted by the chunk they start in,
	/// so the result is identical to sequential training.
	pub fn train_parallel(
		tokens: &[TokenId],
		vocab_size: usize,
		smoothing: Smoothing,
		threads: usize,
	) -> Result<Self, ModelError> {
		if threads <= 1 || tokens.len() < PARALLEL_THRESHOLD {
			return Self::train(tokens, vocab_size, smoothing);
		}

		let empty = Self::new(vocab_size, smoothing)?;
		let chunk_size = tokens.len().div_ceil(threads);
		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for start in (0..tokens.len()).step_by(chunk_size) {
				let tx = tx.clone();
				let mut partial = empty.clone();
				let starts = chunk_size.min(tokens.len() - start);
				let window = &tokens[start..(start + starts + 2).min(tokens.len())];
				scope.spawn(move || {
					partial.count_windows(window, starts);
					let _ = tx.send(partial);
				});
			}
		});
		drop(tx);

		let mut model = empty;
		for partial in rx.iter() {
			model.merge(&partial)?;
		}
		model.log_summary();
		Ok(model)
	}

	/// Counts the n-grams starting at the first `starts` positions of `tokens`.
	fn count_windows(&mut self, tokens: &[TokenId], starts: usize) {
		for i in 0..starts {
			let a = tokens[i];
			self.unigrams.add_transition(a);
			if let Some(&b) = tokens.get(i + 1) {
				self.bigrams.entry(a).or_default().add_transition(b);
				if let Some(&c) = tokens.get(i + 2) {
					self.trigrams.entry((a, b)).or_default().add_transition(c);
				}
			}
		}
	}

	fn log_summary(&self) {
		info!(
			"trigram: tokens={} vocabulary={} trigram contexts={} bigram contexts={}",
			self.total_tokens(),
			self.vocab_size,
			self.trigrams.len(),
			self.bigrams.len()
		);
	}

	/// Merges another model into this one by summing all counts.
	///
	/// # Errors
	/// Returns an error if the models count over different vocabularies.
	pub fn merge(&mut self, other: &Self) -> Result<(), ModelError> {
		if self.vocab_size != other.vocab_size {
			return Err(ModelError::VocabularyMismatch(self.vocab_size, other.vocab_size));
		}

		for (context, state) in &other.trigrams {
			self.trigrams.entry(*context).or_default().merge(state);
		}
		for (context, state) in &other.bigrams {
			self.bigrams.entry(*context).or_default().merge(state);
		}
		self.unigrams.merge(&other.unigrams);
		Ok(())
	}

	/// Next-token distribution for the context `(a, b)`.
	///
	/// - Unsmoothed: observed continuations only; empty if `(a, b)` was never seen
	/// - Laplace: every vocabulary token, uniform if `(a, b)` was never seen
	/// - Interpolated: every token seen in training
	pub fn next_token_distribution(&self, a: TokenId, b: TokenId) -> Distribution {
		let trigram = self.trigrams.get(&(a, b));
		match self.smoothing {
			Smoothing::None => trigram.map(|state| Distribution::from_weights(state.probabilities())).unwrap_or_default(),
			Smoothing::Laplace(k) => {
				let total = trigram.map_or(0, State::total) as f64;
				let denominator = total + k * self.vocab_size as f64;
				Distribution::from_weights((0..self.vocab_size as TokenId).map(|c| {
					let count = trigram.map_or(0, |state| state.count(c)) as f64;
					(c, (count + k) / denominator)
				}))
			}
			Smoothing::Interpolated { unigram, bigram, trigram: trigram_weight } => {
				let bigram_state = self.bigrams.get(&b);
				let total_tokens = self.unigrams.total() as f64;
				Distribution::from_weights(self.unigrams.transitions().map(|(c, count)| {
					let p_uni = count as f64 / total_tokens;
					// Continuations never seen after `b` fall back to the unigram estimate
					let p_bi = match bigram_state {
						Some(state) if state.count(c) > 0 => state.count(c) as f64 / state.total() as f64,
						_ => p_uni,
					};
					let p_tri = trigram.map_or(0.0, |state| {
						state.count(c) as f64 / state.total() as f64
					});
					(c, trigram_weight * p_tri + bigram * p_bi + unigram * p_uni)
				}))
			}
		}
	}

	/// Distribution for `context`, backing off trigram → bigram → unigram.
	///
	/// # Errors
	/// Returns `ModelError::ExhaustedContext` when no level has any mass,
	/// which only happens for a model trained on nothing.
	pub fn distribution(&self, context: Context) -> Result<Distribution, ModelError> {
		let candidates = match context {
			Context::Two(a, b) => [Some(self.next_token_distribution(a, b)), Some(self.bigram_distribution(b))],
			Context::One(b) => [Some(self.bigram_distribution(b)), None],
			Context::Empty => [None, None],
		};

		candidates
			.into_iter()
			.flatten()
			.chain(std::iter::once_with(|| self.unigram_distribution()))
			.find(|distribution| !distribution.is_empty())
			.ok_or(ModelError::ExhaustedContext)
	}

	fn bigram_distribution(&self, b: TokenId) -> Distribution {
		self.bigrams
			.get(&b)
			.map(|state| Distribution::from_weights(state.probabilities()))
			.unwrap_or_default()
	}

	fn unigram_distribution(&self) -> Distribution {
		Distribution::from_weights(self.unigrams.probabilities())
	}

	/// Perplexity of `tokens` under the backoff distribution. Lower is better.
	///
	/// # Errors
	/// Returns an error for sequences shorter than three tokens or a model
	/// trained on nothing.
	pub fn perplexity(&self, tokens: &[TokenId]) -> Result<f64, ModelError> {
		if tokens.len() < 3 {
			return Err(ModelError::SequenceTooShort(tokens.len()));
		}

		let mut log_sum = 0.0;
		let mut cache: HashMap<(TokenId, TokenId), Distribution> = HashMap::new();
		for window in tokens.windows(3) {
			let (a, b, c) = (window[0], window[1], window[2]);
			let distribution = match cache.entry((a, b)) {
				Entry::Occupied(entry) => entry.into_mut(),
				Entry::Vacant(entry) => entry.insert(self.distribution(Context::Two(a, b))?),
			};
			log_sum += distribution.probability(c).max(PROBABILITY_FLOOR).ln();
		}

		let windows = (tokens.len() - 2) as f64;
		Ok((-log_sum / windows).exp())
	}

	/// Number of times `c` followed `(a, b)`.
	pub fn count(&self, a: TokenId, b: TokenId, c: TokenId) -> u64 {
		self.trigrams.get(&(a, b)).map_or(0, |state| state.count(c))
	}

	/// Sum of counts over all continuations of `(a, b)`.
	pub fn context_count(&self, a: TokenId, b: TokenId) -> u64 {
		self.trigrams.get(&(a, b)).map_or(0, State::total)
	}

	/// Number of distinct two-token contexts observed.
	pub fn context_len(&self) -> usize {
		self.trigrams.len()
	}

	pub fn total_tokens(&self) -> u64 {
		self.unigrams.total()
	}

	pub fn vocab_size(&self) -> usize {
		self.vocab_size
	}

	pub fn smoothing(&self) -> Smoothing {
		self.smoothing
	}

	/// True if every stored id is below `vocab_size` and every cached total
	/// matches its counts.
	pub(crate) fn is_consistent(&self) -> bool {
		let in_range = |id: TokenId| (id as usize) < self.vocab_size;
		let state_ok = |state: &State| state.is_consistent() && state.transitions().all(|(next, _)| in_range(next));

		self.smoothing.validate().is_ok()
			&& state_ok(&self.unigrams)
			&& self.bigrams.iter().all(|(&b, state)| in_range(b) && state_ok(state))
			&& self
				.trigrams
				.iter()
				.all(|(&(a, b), state)| in_range(a) && in_range(b) && state_ok(state))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// a=10 b=11 c=12 d=13
	const SEQUENCE: [TokenId; 9] = [10, 11, 12, 10, 11, 12, 10, 11, 13];

	fn model(smoothing: Smoothing) -> TrigramModel {
		TrigramModel::train(&SEQUENCE, 20, smoothing).unwrap()
	}

	#[test]
	fn counts_sliding_windows() {
		let model = model(Smoothing::None);
		assert_eq!(model.count(10, 11, 12), 2);
		assert_eq!(model.count(10, 11, 13), 1);
		assert_eq!(model.context_count(10, 11), 3);
		assert_eq!(model.total_tokens(), 9);
		assert!(model.is_consistent());
	}

	#[test]
	fn maximum_likelihood_distribution() {
		let distribution = model(Smoothing::None).next_token_distribution(10, 11);
		assert_eq!(distribution.len(), 2);
		assert!((distribution.probability(12) - 2.0 / 3.0).abs() < 1e-9);
		assert!((distribution.probability(13) - 1.0 / 3.0).abs() < 1e-9);
	}

	#[test]
	fn unseen_context_is_empty_without_smoothing() {
		assert!(model(Smoothing::None).next_token_distribution(13, 10).is_empty());
	}

	#[test]
	fn laplace_spreads_mass_over_vocabulary() {
		let model = model(Smoothing::Laplace(1.0));
		let distribution = model.next_token_distribution(10, 11);
		assert_eq!(distribution.len(), 20);
		assert!((distribution.total() - 1.0).abs() < 1e-9);
		// (2 + 1) / (3 + 20)
		assert!((distribution.probability(12) - 3.0 / 23.0).abs() < 1e-9);

		let unseen = model.next_token_distribution(13, 10);
		assert!((unseen.probability(0) - 1.0 / 20.0).abs() < 1e-9);
	}

	#[test]
	fn interpolation_mixes_all_levels() {
		let model = model(Smoothing::Interpolated { unigram: 0.1, bigram: 0.3, trigram: 0.6 });
		let distribution = model.next_token_distribution(10, 11);
		assert!((distribution.total() - 1.0).abs() < 1e-9);
		assert!(distribution.probability(12) > distribution.probability(13));
		assert!(distribution.probability(10) > 0.0);
	}

	#[test]
	fn interpolation_uses_unigram_for_unseen_bigram_continuation() {
		let model = model(Smoothing::Interpolated { unigram: 0.1, bigram: 0.3, trigram: 0.6 });
		let distribution = model.next_token_distribution(10, 11);
		// 10 never follows 11: raw 0.1 * 3/9 + 0.3 * 3/9 = 0.4/3, out of a raw total of 1.2
		assert!((distribution.probability(10) - 1.0 / 9.0).abs() < 1e-12);
		assert!((distribution.probability(11) - 1.0 / 9.0).abs() < 1e-12);
		// 12: 0.1 * 2/9 + 0.3 * 2/3 + 0.6 * 2/3 = 5.6/9
		assert!((distribution.probability(12) - 14.0 / 27.0).abs() < 1e-12);
		assert!((distribution.probability(13) - 7.0 / 27.0).abs() < 1e-12);
	}

	#[test]
	fn invalid_smoothing_is_rejected() {
		assert!(TrigramModel::new(10, Smoothing::Laplace(0.0)).is_err());
		let skewed = Smoothing::Interpolated { unigram: 0.5, bigram: 0.5, trigram: 0.5 };
		assert!(matches!(TrigramModel::new(10, skewed), Err(ModelError::InvalidSmoothing(_))));
	}

	#[test]
	fn backoff_uses_bigram_then_unigram() {
		let model = model(Smoothing::None);
		// (13, 11) never seen; 11 is always followed by 12 or 13
		let distribution = model.distribution(Context::Two(13, 11)).unwrap();
		assert!((distribution.probability(12) - 2.0 / 3.0).abs() < 1e-9);

		let unigram = model.distribution(Context::Empty).unwrap();
		assert!((unigram.probability(10) - 3.0 / 9.0).abs() < 1e-9);

		// 13 is the last token, so it has no bigram continuation
		let fallback = model.distribution(Context::One(13)).unwrap();
		assert_eq!(fallback, unigram);
	}

	#[test]
	fn empty_model_exhausts_context() {
		let model = TrigramModel::train(&[], 20, Smoothing::None).unwrap();
		assert!(matches!(model.distribution(Context::Two(1, 2)), Err(ModelError::ExhaustedContext)));
	}

	#[test]
	fn context_from_tail() {
		assert_eq!(Context::from_tail(&[]), Context::Empty);
		assert_eq!(Context::from_tail(&[4]), Context::One(4));
		assert_eq!(Context::from_tail(&[1, 2, 3]), Context::Two(2, 3));
		assert_eq!(Context::Empty.push(1).push(2).push(3), Context::Two(2, 3));
	}

	#[test]
	fn parallel_training_matches_sequential() {
		let tokens: Vec<TokenId> = (0..200_000u32).map(|i| (i * 7 + i / 13) % 50).collect();
		let sequential = TrigramModel::train(&tokens, 50, Smoothing::None).unwrap();
		let parallel = TrigramModel::train_parallel(&tokens, 50, Smoothing::None, 6).unwrap();
		assert_eq!(sequential, parallel);
	}

	#[test]
	fn merge_rejects_other_vocabularies() {
		let mut left = TrigramModel::new(10, Smoothing::None).unwrap();
		let right = TrigramModel::new(11, Smoothing::None).unwrap();
		assert!(left.merge(&right).is_err());
	}

	#[test]
	fn perplexity_prefers_training_text() {
		let model = model(Smoothing::None);
		let seen = model.perplexity(&SEQUENCE).unwrap();
		let shuffled = model.perplexity(&[13, 12, 11, 10, 13, 12]).unwrap();
		assert!(seen < shuffled);
		assert!(model.perplexity(&[1, 2]).is_err());
	}
}
