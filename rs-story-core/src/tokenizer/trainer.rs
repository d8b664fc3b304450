use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc;
use std::thread;

use log::{debug, info};

use super::special::END_OF_WORD_ID;
use super::vocabulary::Vocabulary;
use super::{merge_pair, segment, MergeRule, Segment, TokenId};
use crate::error::TokenizerError;

/// Below this many distinct words, pair counting stays on the calling thread.
const PARALLEL_THRESHOLD: usize = 2048;

type Pair = (TokenId, TokenId);

/// Tokenizer training parameters.
#[derive(Clone, Debug)]
pub struct TrainingConfig {
	/// Vocabulary size at which merging stops (reserved tokens included).
	pub target_vocab_size: usize,

	/// Worker threads used to count pairs. `0` or `1` counts sequentially.
	pub threads: usize,
}

impl Default for TrainingConfig {
	fn default() -> Self {
		Self { target_vocab_size: 250, threads: num_cpus::get() }
	}
}

/// A distinct word of the corpus under the current segmentation.
struct Word {
	symbols: Vec<TokenId>,
	count: u64,
}

/// Learns the vocabulary and the ordered merge rules from `corpus`.
pub(super) fn train(corpus: &str, config: &TrainingConfig) -> Result<(Vocabulary, Vec<MergeRule>), TokenizerError> {
	// Sorted so that ids and counting order never depend on hashing
	let mut frequencies: BTreeMap<&str, u64> = BTreeMap::new();
	for segment in segment(corpus) {
		if let Segment::Word(word) = segment {
			*frequencies.entry(word).or_insert(0) += 1;
		}
	}
	if frequencies.is_empty() {
		return Err(TokenizerError::EmptyCorpus);
	}

	let mut vocabulary = Vocabulary::with_reserved();
	let alphabet: BTreeSet<char> = frequencies.keys().flat_map(|word| word.chars()).collect();
	let mut buffer = [0u8; 4];
	for c in &alphabet {
		vocabulary.insert(c.encode_utf8(&mut buffer));
	}

	let mut words: Vec<Word> = frequencies
		.iter()
		.map(|(word, &count)| {
			let mut symbols: Vec<TokenId> = word
				.chars()
				.filter_map(|c| vocabulary.id(c.encode_utf8(&mut buffer)))
				.collect();
			symbols.push(END_OF_WORD_ID);
			Word { symbols, count }
		})
		.collect();

	info!(
		"tokenizer: {} distinct words, alphabet of {} symbols, target vocabulary {}",
		words.len(),
		alphabet.len(),
		config.target_vocab_size
	);

	let mut merges = Vec::new();
	while vocabulary.len() < config.target_vocab_size {
		let counts = count_pairs(&words, config.threads);
		let Some((pair, count)) = best_pair(&counts, &vocabulary) else {
			break;
		};
		if count < 2 {
			break;
		}

		let merged_token = format!(
			"{}{}",
			vocabulary.token(pair.0).unwrap_or_default(),
			vocabulary.token(pair.1).unwrap_or_default()
		);
		let rule = MergeRule { left: pair.0, right: pair.1, merged: vocabulary.insert(&merged_token) };
		debug!("merge {:>4}: {:?} (count={})", merges.len() + 1, merged_token, count);

		apply_rule(&mut words, &rule, config.threads);
		merges.push(rule);
	}

	info!("tokenizer: {} merges learned, vocabulary size {}", merges.len(), vocabulary.len());
	Ok((vocabulary, merges))
}

/// Highest count first; ties go to the smallest `(left, right)` token strings.
fn best_pair(counts: &HashMap<Pair, u64>, vocabulary: &Vocabulary) -> Option<(Pair, u64)> {
	counts
		.iter()
		.min_by(|(a, count_a), (b, count_b)| {
			count_b.cmp(count_a).then_with(|| compare_pair_strings(**a, **b, vocabulary))
		})
		.map(|(&pair, &count)| (pair, count))
}

fn compare_pair_strings(a: Pair, b: Pair, vocabulary: &Vocabulary) -> Ordering {
	let text = |id| token_text(vocabulary, id);
	text(a.0).cmp(text(b.0)).then_with(|| text(a.1).cmp(text(b.1)))
}

fn token_text(vocabulary: &Vocabulary, id: TokenId) -> &str {
	vocabulary.token(id).unwrap_or_default()
}

fn count_chunk(words: &[Word]) -> HashMap<Pair, u64> {
	let mut counts = HashMap::new();
	for word in words {
		for pair in word.symbols.windows(2) {
			*counts.entry((pair[0], pair[1])).or_insert(0) += word.count;
		}
	}
	counts
}

/// Counts adjacent pairs, sharding the words across threads.
///
/// Partial counts are summed, so the result matches a sequential count.
fn count_pairs(words: &[Word], threads: usize) -> HashMap<Pair, u64> {
	if threads <= 1 || words.len() < PARALLEL_THRESHOLD {
		return count_chunk(words);
	}

	let chunk_size = words.len().div_ceil(threads);
	let (tx, rx) = mpsc::channel();
	thread::scope(|scope| {
		for chunk in words.chunks(chunk_size) {
			let tx = tx.clone();
			scope.spawn(move || {
				let _ = tx.send(count_chunk(chunk));
			});
		}
	});
	drop(tx);

	let mut counts = HashMap::new();
	for partial in rx.iter() {
		for (pair, count) in partial {
			*counts.entry(pair).or_insert(0) += count;
		}
	}
	counts
}

fn apply_rule(words: &mut [Word], rule: &MergeRule, threads: usize) {
	if threads <= 1 || words.len() < PARALLEL_THRESHOLD {
		words.iter_mut().for_each(|word| merge_pair(&mut word.symbols, rule));
		return;
	}

	let chunk_size = words.len().div_ceil(threads);
	thread::scope(|scope| {
		for chunk in words.chunks_mut(chunk_size) {
			scope.spawn(move || chunk.iter_mut().for_each(|word| merge_pair(&mut word.symbols, rule)));
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(target_vocab_size: usize, threads: usize) -> TrainingConfig {
		TrainingConfig { target_vocab_size, threads }
	}

	fn merged_strings(vocabulary: &Vocabulary, merges: &[MergeRule]) -> Vec<String> {
		merges
			.iter()
			.map(|rule| vocabulary.token(rule.merged).unwrap_or_default().to_owned())
			.collect()
	}

	#[test]
	fn empty_corpus_fails() {
		assert!(matches!(train("   \n ", &config(100, 1)), Err(TokenizerError::EmptyCorpus)));
		assert!(matches!(train("<EOS><EOT>", &config(100, 1)), Err(TokenizerError::EmptyCorpus)));
	}

	#[test]
	fn alphabet_follows_reserved_ids_in_character_order() {
		let (vocabulary, merges) = train("ba ab", &config(0, 1)).unwrap();
		assert!(merges.is_empty());
		assert_eq!(vocabulary.token(5), Some("a"));
		assert_eq!(vocabulary.token(6), Some("b"));
	}

	#[test]
	fn ties_break_on_smallest_pair_strings() {
		// Every adjacent pair occurs twice
		let (vocabulary, merges) = train("ab cd ab cd", &config(12, 1)).unwrap();
		let learned = merged_strings(&vocabulary, &merges);
		assert_eq!(learned[0], "ab");
	}

	#[test]
	fn stops_when_no_pair_repeats() {
		let (_, merges) = train("abc", &config(1000, 1)).unwrap();
		assert!(merges.is_empty());
	}

	#[test]
	fn stops_at_target_size() {
		let corpus = "aaaa bbbb aaaa bbbb abab abab";
		let (vocabulary, _) = train(corpus, &config(10, 1)).unwrap();
		assert_eq!(vocabulary.len(), 10);
	}

	#[test]
	fn threaded_counting_matches_sequential() {
		// Enough distinct words to cross the parallel threshold
		let corpus: String = (0..3000).map(|i| format!("w{} x{} ", i, i % 13)).collect();
		let (vocab_seq, merges_seq) = train(&corpus, &config(80, 1)).unwrap();
		let (vocab_par, merges_par) = train(&corpus, &config(80, 4)).unwrap();
		assert_eq!(merges_seq, merges_par);
		assert_eq!(vocab_seq, vocab_par);
	}
}
