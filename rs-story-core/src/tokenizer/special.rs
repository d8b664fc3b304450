use serde::{Deserialize, Serialize};

use super::TokenId;

/// Literal used for characters that never appeared in the training corpus.
pub const UNKNOWN: &str = "<UNK>";

/// Literal closing every word during segmentation. Rendered as a space.
pub const END_OF_WORD: &str = "</w>";

pub const UNKNOWN_ID: TokenId = 0;
pub const END_OF_WORD_ID: TokenId = 4;

/// Number of ids reserved at the start of every vocabulary.
pub const RESERVED: usize = 5;

/// Structural boundary markers.
///
/// They are counted by the language model like any other token but the
/// generator inspects them: `<EOT>` ends a generation, `<EOS>` and `<EOP>`
/// only matter for display.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Special {
	/// End of sentence
	Eos,
	/// End of paragraph
	Eop,
	/// End of text
	Eot,
}

impl Special {
	pub const ALL: [Special; 3] = [Special::Eos, Special::Eop, Special::Eot];

	pub fn literal(self) -> &'static str {
		match self {
			Special::Eos => "<EOS>",
			Special::Eop => "<EOP>",
			Special::Eot => "<EOT>",
		}
	}

	pub fn from_literal(literal: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|special| special.literal() == literal)
	}

	/// Fixed id of the marker in every vocabulary.
	pub fn id(self) -> TokenId {
		match self {
			Special::Eos => 1,
			Special::Eop => 2,
			Special::Eot => 3,
		}
	}

	pub fn from_id(id: TokenId) -> Option<Self> {
		Self::ALL.into_iter().find(|special| special.id() == id)
	}

	/// Whether sampling this marker terminates a generation.
	pub fn is_terminal(self) -> bool {
		self == Special::Eot
	}
}
