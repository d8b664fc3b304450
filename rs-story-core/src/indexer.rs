//! Turns a raw corpus into the flat token stream the language model learns from.
//!
//! Boundaries found in the raw text are rewritten as special markers before
//! encoding:
//! - a sentence terminator becomes `<EOS>` (the character itself is consumed)
//! - a blank line between two text lines becomes `<EOP>`
//! - the document separator and the end of the corpus become `<EOT>`
//!
//! Markers already present in the corpus are kept. A marker that would not
//! close anything (`<EOS>` right after another marker, `<EOP>` after `<EOP>` or
//! `<EOT>`, repeated `<EOT>`) is dropped, and `<EOP>` right before `<EOT>` is
//! absorbed by it.

use serde::{Deserialize, Serialize};

use crate::tokenizer::special::Special;
use crate::tokenizer::{segment, Segment, TokenId, Tokenizer};

/// Characters that map deterministically to boundary markers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BoundaryRules {
	/// Each of these ends a sentence.
	pub sentence_terminators: Vec<char>,
	/// Separates two documents inside one corpus.
	pub document_separator: char,
}

impl Default for BoundaryRules {
	fn default() -> Self {
		Self {
			// Latin and Urdu/Arabic full stops and question marks
			sentence_terminators: vec!['.', '!', '?', '۔', '؟'],
			document_separator: '\u{000C}',
		}
	}
}

/// Item of an annotated text.
#[derive(Clone, Debug, PartialEq)]
enum Piece {
	Word(String),
	Marker(Special),
}

/// Corpus indexer.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Indexer {
	rules: BoundaryRules,
}

impl Indexer {
	pub fn new(rules: BoundaryRules) -> Self {
		Self { rules }
	}

	pub fn rules(&self) -> &BoundaryRules {
		&self.rules
	}

	/// Rewrites boundaries as markers; every document is closed with `<EOT>`.
	///
	/// Example: `"Once. Then\n\nEnd"` → `"Once <EOS> Then <EOP> End <EOT>"`
	pub fn normalize(&self, corpus: &str) -> String {
		render(&self.annotate(corpus, true))
	}

	/// Same as [`Indexer::normalize`] but leaves the last document open.
	///
	/// Used on generation prefixes, which continue the text.
	pub fn normalize_fragment(&self, text: &str) -> String {
		render(&self.annotate(text, false))
	}

	/// Encodes the whole corpus into a single token stream.
	pub fn index(&self, corpus: &str, tokenizer: &Tokenizer) -> Vec<TokenId> {
		tokenizer.encode(&self.normalize(corpus))
	}

	/// Encodes several documents, each closed by `<EOT>`, in order.
	pub fn index_documents<S: AsRef<str>>(&self, documents: &[S], tokenizer: &Tokenizer) -> Vec<TokenId> {
		documents
			.iter()
			.flat_map(|document| self.index(document.as_ref(), tokenizer))
			.collect()
	}

	fn annotate(&self, text: &str, close_last: bool) -> Vec<Piece> {
		let mut pieces = Vec::new();
		let documents: Vec<&str> = text.split(self.rules.document_separator).collect();
		let last = documents.len().saturating_sub(1);

		for (index, document) in documents.iter().enumerate() {
			let mut paragraph_break = false;
			for line in document.lines() {
				if line.trim().is_empty() {
					paragraph_break = true;
					continue;
				}
				if paragraph_break {
					push_marker(&mut pieces, Special::Eop);
					paragraph_break = false;
				}
				self.push_line(&mut pieces, line);
			}

			if close_last || index < last {
				push_marker(&mut pieces, Special::Eot);
			}
		}
		pieces
	}

	fn push_line(&self, pieces: &mut Vec<Piece>, line: &str) {
		let mut marked = String::with_capacity(line.len());
		for c in line.chars() {
			if self.rules.sentence_terminators.contains(&c) {
				marked.push(' ');
				marked.push_str(Special::Eos.literal());
				marked.push(' ');
			} else {
				marked.push(c);
			}
		}

		for segment in segment(&marked) {
			match segment {
				Segment::Word(word) => pieces.push(Piece::Word(word.to_owned())),
				Segment::Special(special) => push_marker(pieces, special),
			}
		}
	}
}

fn push_marker(pieces: &mut Vec<Piece>, special: Special) {
	let previous = match pieces.last() {
		None => return,
		Some(Piece::Word(_)) => None,
		Some(Piece::Marker(marker)) => Some(*marker),
	};

	match (special, previous) {
		(Special::Eos, Some(_)) => {}
		(Special::Eop, Some(Special::Eop | Special::Eot)) => {}
		(Special::Eot, Some(Special::Eot)) => {}
		(Special::Eot, Some(Special::Eop)) => {
			pieces.pop();
			push_marker(pieces, Special::Eot);
		}
		_ => pieces.push(Piece::Marker(special)),
	}
}

fn render(pieces: &[Piece]) -> String {
	pieces
		.iter()
		.map(|piece| match piece {
			Piece::Word(word) => word.as_str(),
			Piece::Marker(special) => special.literal(),
		})
		.collect::<Vec<_>>()
		.join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn indexer() -> Indexer {
		Indexer::default()
	}

	#[test]
	fn sentences_paragraphs_and_documents() {
		let corpus = "Once upon a time. They left!\n\nThe end.\u{000C}Another story";
		assert_eq!(
			indexer().normalize(corpus),
			"Once upon a time <EOS> They left <EOS> <EOP> The end <EOS> <EOT> Another story <EOT>"
		);
	}

	#[test]
	fn urdu_full_stop_ends_a_sentence() {
		assert_eq!(indexer().normalize("ایک دن۔ پھر"), "ایک دن <EOS> پھر <EOT>");
	}

	#[test]
	fn existing_markers_are_kept_and_not_repeated() {
		let corpus = "a b <EOS> c. <EOT>";
		assert_eq!(indexer().normalize(corpus), "a b <EOS> c <EOS> <EOT>");
	}

	#[test]
	fn repeated_terminators_collapse() {
		assert_eq!(indexer().normalize("wait... what?!"), "wait <EOS> what <EOS> <EOT>");
	}

	#[test]
	fn trailing_blank_lines_do_not_leave_a_paragraph_marker() {
		assert_eq!(indexer().normalize("a b\n\n\n"), "a b <EOT>");
		assert_eq!(indexer().normalize("a\n\nb\n\n"), "a <EOP> b <EOT>");
	}

	#[test]
	fn empty_documents_produce_nothing() {
		assert_eq!(indexer().normalize(""), "");
		assert_eq!(indexer().normalize("\u{000C}\u{000C}a"), "a <EOT>");
	}

	#[test]
	fn fragments_stay_open() {
		assert_eq!(indexer().normalize_fragment("a b. c"), "a b <EOS> c");
	}

	#[test]
	fn index_encodes_markers_as_special_ids() {
		let corpus = "a b c. a b d";
		let tokenizer = Tokenizer::train(&indexer().normalize(corpus), 100).unwrap();
		let ids = indexer().index(corpus, &tokenizer);
		assert_eq!(ids.last(), Some(&Special::Eot.id()));
		assert!(ids.contains(&Special::Eos.id()));
	}

	#[test]
	fn each_document_is_closed() {
		let documents = ["a b", "c d"];
		let tokenizer = Tokenizer::train("a b c d", 100).unwrap();
		let ids = indexer().index_documents(&documents, &tokenizer);
		let closes = ids.iter().filter(|&&id| id == Special::Eot.id()).count();
		assert_eq!(closes, 2);
	}
}
