use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::special::{Special, END_OF_WORD, END_OF_WORD_ID, RESERVED, UNKNOWN, UNKNOWN_ID};
use super::TokenId;
use crate::error::TokenizerError;

/// Bidirectional mapping between token strings and dense ids.
///
/// # Invariants
/// - Ids are dense: `0..len()`
/// - Every token string is unique
/// - The reserved ids (`<UNK>`, `<EOS>`, `<EOP>`, `<EOT>`, `</w>`) always
///   occupy `0..RESERVED`
///
/// Persisted as the ordered list of token strings; the inverse map is rebuilt
/// (and validated) on load.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
	tokens: Vec<String>,
	ids: HashMap<String, TokenId>,
}

impl Vocabulary {
	/// Creates a vocabulary holding only the reserved tokens.
	pub(crate) fn with_reserved() -> Self {
		let mut vocabulary = Self { tokens: Vec::new(), ids: HashMap::new() };
		vocabulary.insert(UNKNOWN);
		for special in Special::ALL {
			vocabulary.insert(special.literal());
		}
		vocabulary.insert(END_OF_WORD);
		vocabulary
	}

	/// Returns the id of `token`, adding it if it is new.
	pub(crate) fn insert(&mut self, token: &str) -> TokenId {
		if let Some(&id) = self.ids.get(token) {
			return id;
		}
		let id = self.tokens.len() as TokenId;
		self.tokens.push(token.to_owned());
		self.ids.insert(token.to_owned(), id);
		id
	}

	pub fn id(&self, token: &str) -> Option<TokenId> {
		self.ids.get(token).copied()
	}

	pub fn token(&self, id: TokenId) -> Option<&str> {
		self.tokens.get(id as usize).map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	pub fn contains_id(&self, id: TokenId) -> bool {
		(id as usize) < self.tokens.len()
	}

	/// True for `<EOS>`, `<EOP>` and `<EOT>`.
	pub fn is_special(&self, id: TokenId) -> bool {
		Special::from_id(id).is_some()
	}

	/// Iterates `(id, token)` in id order.
	pub fn iter(&self) -> impl Iterator<Item = (TokenId, &str)> {
		self.tokens.iter().enumerate().map(|(id, token)| (id as TokenId, token.as_str()))
	}
}

impl TryFrom<Vec<String>> for Vocabulary {
	type Error = TokenizerError;

	fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
		let reserved = Self::with_reserved();
		if tokens.len() < RESERVED || tokens[..RESERVED] != reserved.tokens[..] {
			return Err(TokenizerError::CorruptVocabulary("reserved tokens missing or out of order".to_owned()));
		}

		let mut ids = HashMap::with_capacity(tokens.len());
		for (id, token) in tokens.iter().enumerate() {
			if ids.insert(token.clone(), id as TokenId).is_some() {
				return Err(TokenizerError::CorruptVocabulary(format!("duplicate token {token:?}")));
			}
		}
		debug_assert_eq!(ids.get(UNKNOWN), Some(&UNKNOWN_ID));
		debug_assert_eq!(ids.get(END_OF_WORD), Some(&END_OF_WORD_ID));

		Ok(Self { tokens, ids })
	}
}

impl From<Vocabulary> for Vec<String> {
	fn from(vocabulary: Vocabulary) -> Self {
		vocabulary.tokens
	}
}
