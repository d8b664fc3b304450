use std::cmp::Ordering;

use rand::Rng;

use crate::tokenizer::TokenId;

/// Normalized probability distribution over next tokens.
///
/// # Invariants
/// - Entries are sorted by ascending token id, one entry per id
/// - Every probability is finite and strictly positive
/// - Probabilities sum to 1 (within rounding) unless the distribution is empty
///
/// The fixed id order makes sampling reproducible for a given random source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Distribution {
	entries: Vec<(TokenId, f64)>,
}

impl Distribution {
	/// Builds a distribution from unnormalized weights.
	///
	/// Non-positive or non-finite weights are dropped; duplicate ids add up.
	pub fn from_weights<I>(weights: I) -> Self
	where
		I: IntoIterator<Item = (TokenId, f64)>,
	{
		let mut entries: Vec<(TokenId, f64)> = weights
			.into_iter()
			.filter(|(_, weight)| weight.is_finite() && *weight > 0.0)
			.collect();
		entries.sort_by_key(|(id, _)| *id);
		entries.dedup_by(|later, kept| {
			if later.0 == kept.0 {
				kept.1 += later.1;
				true
			} else {
				false
			}
		});

		let total: f64 = entries.iter().map(|(_, weight)| weight).sum();
		if total <= 0.0 || !total.is_finite() {
			return Self::default();
		}
		for (_, weight) in &mut entries {
			*weight /= total;
		}
		Self { entries }
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn entries(&self) -> &[(TokenId, f64)] {
		&self.entries
	}

	pub fn probability(&self, id: TokenId) -> f64 {
		self.entries
			.binary_search_by_key(&id, |(entry, _)| *entry)
			.map(|index| self.entries[index].1)
			.unwrap_or(0.0)
	}

	pub fn total(&self) -> f64 {
		self.entries.iter().map(|(_, p)| p).sum()
	}

	/// Highest probability entry; ties go to the smaller id.
	pub fn most_likely(&self) -> Option<(TokenId, f64)> {
		self.entries.iter().copied().min_by(rank)
	}

	/// Keeps the `k` most likely tokens (ties broken by ascending id) and
	/// renormalizes. A `k` larger than the support keeps everything.
	pub fn top_k(&self, k: usize) -> Self {
		if k >= self.entries.len() {
			return self.clone();
		}
		let mut ranked = self.entries.clone();
		ranked.sort_by(rank);
		ranked.truncate(k);
		Self::from_weights(ranked)
	}

	/// Rescales every probability `p` to `p^(1/temperature)` and renormalizes.
	///
	/// Computed relative to the largest probability so that small
	/// temperatures do not underflow.
	pub fn with_temperature(&self, temperature: f64) -> Self {
		debug_assert!(temperature > 0.0);
		let Some((_, max)) = self.most_likely() else {
			return Self::default();
		};
		let log_max = max.ln();
		Self::from_weights(
			self.entries
				.iter()
				.map(|&(id, p)| (id, ((p.ln() - log_max) / temperature).exp())),
		)
	}

	/// Draws one token with a single uniform sample from `rng`.
	///
	/// Returns `None` only for an empty distribution.
	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TokenId> {
		let (last, _) = *self.entries.last()?;
		let coin: f64 = rng.random();
		let mut cdf = 0.0;
		for &(id, p) in &self.entries {
			cdf += p;
			if coin < cdf {
				return Some(id);
			}
		}
		// Rounding left the cumulative sum just under the draw
		Some(last)
	}
}

/// Orders by descending probability, then ascending id.
fn rank(a: &(TokenId, f64), b: &(TokenId, f64)) -> Ordering {
	b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
