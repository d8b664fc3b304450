//! Subword tokenizer learned by iterative pair merging.
//!
//! Text is cut into words on whitespace (special markers such as `<EOS>` are
//! kept whole), every word becomes its characters followed by `</w>`, and the
//! learned merge rules are applied by rank until none fits.

use std::collections::HashMap;
use std::iter;

use serde::{Deserialize, Serialize};

use crate::error::TokenizerError;

pub mod special;
pub mod vocabulary;
mod trainer;

use special::{Special, END_OF_WORD, END_OF_WORD_ID, UNKNOWN_ID};
pub use trainer::TrainingConfig;
use vocabulary::Vocabulary;

/// Identifier of a token in a [`Vocabulary`].
pub type TokenId = u32;

/// A learned `(left, right) -> merged` rule.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MergeRule {
	pub left: TokenId,
	pub right: TokenId,
	pub merged: TokenId,
}

/// One unit of pre-tokenized text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
	Word(&'a str),
	Special(Special),
}

/// Pair-merge tokenizer.
///
/// # Invariants
/// - `merges` is in learned order; rank = index
/// - Every id referenced by a rule belongs to `vocabulary`
/// - `ranks` is derived from `merges` and never persisted
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(try_from = "TokenizerParts", into = "TokenizerParts")]
pub struct Tokenizer {
	vocabulary: Vocabulary,
	merges: Vec<MergeRule>,
	ranks: HashMap<(TokenId, TokenId), usize>,
}

/// Persisted form of a [`Tokenizer`].
#[derive(Serialize, Deserialize)]
struct TokenizerParts {
	vocabulary: Vocabulary,
	merges: Vec<MergeRule>,
}

impl Tokenizer {
	/// Learns a tokenizer from `corpus` until the vocabulary holds
	/// `target_vocab_size` tokens or no pair occurs more than once.
	///
	/// # Errors
	/// Returns `TokenizerError::EmptyCorpus` if the corpus holds no word.
	pub fn train(corpus: &str, target_vocab_size: usize) -> Result<Self, TokenizerError> {
		Self::train_with(corpus, &TrainingConfig { target_vocab_size, ..TrainingConfig::default() })
	}

	/// Same as [`Tokenizer::train`] with explicit threading.
	///
	/// The result does not depend on `config.threads`.
	pub fn train_with(corpus: &str, config: &TrainingConfig) -> Result<Self, TokenizerError> {
		let (vocabulary, merges) = trainer::train(corpus, config)?;
		Ok(Self::from_parts(vocabulary, merges))
	}

	fn from_parts(vocabulary: Vocabulary, merges: Vec<MergeRule>) -> Self {
		let mut ranks = HashMap::with_capacity(merges.len());
		for (rank, rule) in merges.iter().enumerate() {
			ranks.entry((rule.left, rule.right)).or_insert(rank);
		}
		Self { vocabulary, merges, ranks }
	}

	pub fn vocabulary(&self) -> &Vocabulary {
		&self.vocabulary
	}

	/// Merge rules in learned order.
	pub fn merges(&self) -> &[MergeRule] {
		&self.merges
	}

	pub fn vocab_size(&self) -> usize {
		self.vocabulary.len()
	}

	/// Encodes arbitrary text. Never fails: characters outside the vocabulary
	/// map to `<UNK>`.
	pub fn encode(&self, text: &str) -> Vec<TokenId> {
		let mut ids = Vec::new();
		for segment in segment(text) {
			match segment {
				Segment::Special(special) => ids.push(special.id()),
				Segment::Word(word) => {
					let mut symbols = self.word_symbols(word);
					self.apply_merges(&mut symbols);
					ids.extend(symbols);
				}
			}
		}
		ids
	}

	/// Base symbols of `word`, closed by `</w>`.
	fn word_symbols(&self, word: &str) -> Vec<TokenId> {
		let mut buffer = [0u8; 4];
		word.chars()
			.map(|c| self.vocabulary.id(c.encode_utf8(&mut buffer)).unwrap_or(UNKNOWN_ID))
			.chain(iter::once(END_OF_WORD_ID))
			.collect()
	}

	/// Applies merges by rank until no rule matches an adjacent pair.
	fn apply_merges(&self, symbols: &mut Vec<TokenId>) {
		loop {
			let best = symbols
				.windows(2)
				.filter_map(|pair| self.ranks.get(&(pair[0], pair[1])).copied())
				.min();

			let Some(rule) = best.and_then(|rank| self.merges.get(rank)) else {
				break;
			};
			merge_pair(symbols, rule);
		}
	}

	/// Decodes ids into text.
	///
	/// `</w>` becomes a space and special markers appear as their literal,
	/// separated from surrounding words by single spaces.
	///
	/// # Errors
	/// Returns `TokenizerError::UnknownTokenId` for an id outside the vocabulary.
	pub fn decode(&self, ids: &[TokenId]) -> Result<String, TokenizerError> {
		self.render(ids, true)
	}

	/// Decodes ids into text, dropping special markers.
	pub fn decode_plain(&self, ids: &[TokenId]) -> Result<String, TokenizerError> {
		self.render(ids, false)
	}

	fn render(&self, ids: &[TokenId], keep_markers: bool) -> Result<String, TokenizerError> {
		let mut text = String::new();
		for &id in ids {
			let token = self.vocabulary.token(id).ok_or(TokenizerError::UnknownTokenId(id))?;
			if self.vocabulary.is_special(id) {
				if !keep_markers {
					continue;
				}
				if !text.is_empty() && !text.ends_with(' ') {
					text.push(' ');
				}
				text.push_str(token);
				text.push(' ');
			} else {
				push_piece(&mut text, token);
			}
		}
		Ok(text.trim().to_owned())
	}

	/// Display text of a single token, as a streaming consumer sees it.
	pub fn render_token(&self, id: TokenId) -> Result<String, TokenizerError> {
		let token = self.vocabulary.token(id).ok_or(TokenizerError::UnknownTokenId(id))?;
		if self.vocabulary.is_special(id) {
			return Ok(token.to_owned());
		}
		let mut text = String::new();
		push_piece(&mut text, token);
		Ok(text)
	}
}

fn push_piece(text: &mut String, token: &str) {
	match token.strip_suffix(END_OF_WORD) {
		Some(stem) => {
			text.push_str(stem);
			text.push(' ');
		}
		None => text.push_str(token),
	}
}

/// Replaces every non-overlapping `(left, right)` occurrence, scanning left to right.
pub(crate) fn merge_pair(symbols: &mut Vec<TokenId>, rule: &MergeRule) {
	let len = symbols.len();
	let mut read = 0;
	let mut write = 0;
	while read < len {
		if read + 1 < len && symbols[read] == rule.left && symbols[read + 1] == rule.right {
			symbols[write] = rule.merged;
			read += 2;
		} else {
			symbols[write] = symbols[read];
			read += 1;
		}
		write += 1;
	}
	symbols.truncate(write);
}

/// Splits text into words and whole special markers, in one pass.
pub(crate) fn segment(text: &str) -> Vec<Segment<'_>> {
	let mut segments = Vec::new();
	let mut start = 0;
	let mut cursor = 0;
	while let Some(offset) = text[cursor..].find('<') {
		let pos = cursor + offset;
		let special = Special::ALL.into_iter().find(|special| text[pos..].starts_with(special.literal()));
		match special {
			Some(special) => {
				segments.extend(text[start..pos].split_whitespace().map(Segment::Word));
				segments.push(Segment::Special(special));
				start = pos + special.literal().len();
				cursor = start;
			}
			// '<' is one byte, so the next byte starts a char
			None => cursor = pos + 1,
		}
	}
	segments.extend(text[start..].split_whitespace().map(Segment::Word));
	segments
}

impl TryFrom<TokenizerParts> for Tokenizer {
	type Error = TokenizerError;

	fn try_from(parts: TokenizerParts) -> Result<Self, Self::Error> {
		let vocabulary = &parts.vocabulary;
		for rule in &parts.merges {
			let (Some(left), Some(right), Some(merged)) =
				(vocabulary.token(rule.left), vocabulary.token(rule.right), vocabulary.token(rule.merged))
			else {
				return Err(TokenizerError::CorruptVocabulary(format!("merge rule {rule:?} references unknown ids")));
			};
			if merged.len() != left.len() + right.len() || !merged.starts_with(left) || !merged.ends_with(right) {
				return Err(TokenizerError::CorruptVocabulary(format!("merge rule {left:?} + {right:?} -> {merged:?}")));
			}
		}
		Ok(Self::from_parts(parts.vocabulary, parts.merges))
	}
}

impl From<Tokenizer> for TokenizerParts {
	fn from(tokenizer: Tokenizer) -> Self {
		Self { vocabulary: tokenizer.vocabulary, merges: tokenizer.merges }
	}
}
