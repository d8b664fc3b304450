use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tokenizer::TokenId;

/// Observed continuations of one context.
///
/// A `State` is a node of the Markov chain: outgoing edges are the next tokens
/// seen after the context, weighted by how often they were seen.
///
/// ## Invariants
/// - `total` equals the sum of all transition counts
/// - Each transition count is strictly positive
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct State {
	/// Next token -> occurrence count.
	/// Example: { 17 => 42, 9 => 3 }
	transitions: HashMap<TokenId, u64>,
	/// Cached sum of `transitions`.
	total: u64,
}

impl State {
	/// Records one occurrence of `next`.
	pub fn add_transition(&mut self, next: TokenId) {
		self.add_transitions(next, 1);
	}

	fn add_transitions(&mut self, next: TokenId, occurrences: u64) {
		*self.transitions.entry(next).or_insert(0) += occurrences;
		self.total += occurrences;
	}

	pub fn count(&self, next: TokenId) -> u64 {
		self.transitions.get(&next).copied().unwrap_or(0)
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	/// Iterates `(next, count)` in unspecified order.
	pub fn transitions(&self) -> impl Iterator<Item = (TokenId, u64)> + '_ {
		self.transitions.iter().map(|(&next, &count)| (next, count))
	}

	/// Maximum-likelihood probabilities of the observed continuations.
	pub fn probabilities(&self) -> impl Iterator<Item = (TokenId, f64)> + '_ {
		let total = self.total as f64;
		self.transitions().map(move |(next, count)| (next, count as f64 / total))
	}

	/// Adds every count of `other` to this state.
	///
	/// Used to combine partial models built in parallel.
	pub fn merge(&mut self, other: &Self) {
		for (next, occurrences) in other.transitions() {
			self.add_transitions(next, occurrences);
		}
	}

	/// True if the cached total matches the transitions.
	pub(crate) fn is_consistent(&self) -> bool {
		self.transitions.values().all(|&count| count > 0) && self.transitions.values().sum::<u64>() == self.total
	}
}
