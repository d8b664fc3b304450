use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::trigram_model::{Smoothing, TrigramModel};
use crate::error::BundleError;
use crate::indexer::{BoundaryRules, Indexer};
use crate::io::{build_output_path, read_documents};
use crate::tokenizer::{TokenId, Tokenizer, TrainingConfig};

/// Version written into every artifact; loading any other version fails.
pub const FORMAT_VERSION: u32 = 1;

/// Everything needed to train a bundle from raw text.
#[derive(Clone, Debug, Default)]
pub struct TrainingOptions {
	pub tokenizer: TrainingConfig,
	pub smoothing: Smoothing,
	pub boundaries: BoundaryRules,
}

/// Summary figures of a loaded bundle.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundleStats {
	pub vocab_size: usize,
	pub merges: usize,
	pub trigram_contexts: usize,
	pub total_tokens: u64,
}

/// The persisted model artifact: tokenizer, boundary rules and trigram counts.
///
/// Built once by training, loaded once at startup and never mutated after.
/// Serialized with `postcard`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelBundle {
	version: u32,
	tokenizer: Tokenizer,
	indexer: Indexer,
	model: TrigramModel,
}

impl ModelBundle {
	/// Runs the whole pipeline: boundary normalization, tokenizer training,
	/// indexing and trigram counting.
	///
	/// # Errors
	/// Fails on an empty corpus or invalid smoothing parameters.
	pub fn train<S: AsRef<str>>(documents: &[S], options: &TrainingOptions) -> Result<Self, BundleError> {
		let indexer = Indexer::new(options.boundaries.clone());
		let normalized = documents
			.iter()
			.map(|document| indexer.normalize(document.as_ref()))
			.collect::<Vec<_>>()
			.join(" ");

		let tokenizer = Tokenizer::train_with(&normalized, &options.tokenizer)?;
		let tokens = indexer.index_documents(documents, &tokenizer);
		let model = TrigramModel::train_parallel(
			&tokens,
			tokenizer.vocab_size(),
			options.smoothing,
			options.tokenizer.threads,
		)?;

		Ok(Self { version: FORMAT_VERSION, tokenizer, indexer, model })
	}

	/// Trains from a corpus file (or a directory of `.txt` documents) and
	/// writes the artifact next to it with a `.bin` extension.
	///
	/// Example: `data/stories.txt` → `data/stories.bin`
	pub fn train_from_file<P: AsRef<Path>>(
		corpus_path: P,
		options: &TrainingOptions,
	) -> Result<(Self, PathBuf), BundleError> {
		let output = build_output_path(&corpus_path, "bin")?;
		let documents = read_documents(&corpus_path)?;
		info!("read {} document(s) from {}", documents.len(), corpus_path.as_ref().display());

		let bundle = Self::train(&documents, options)?;
		bundle.save(&output)?;
		Ok((bundle, output))
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BundleError> {
		let bytes = postcard::to_stdvec(self)?;
		fs::write(&path, &bytes)?;
		info!("saved model ({} bytes) to {}", bytes.len(), path.as_ref().display());
		Ok(())
	}

	/// Loads and validates an artifact.
	///
	/// # Errors
	/// - `BundleError::Io` if the file cannot be read
	/// - `BundleError::Corrupt` if it does not decode or its parts disagree
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BundleError> {
		let bytes = fs::read(&path)?;
		let bundle: Self = postcard::from_bytes(&bytes).map_err(|e| BundleError::Corrupt(e.to_string()))?;

		if bundle.version != FORMAT_VERSION {
			return Err(BundleError::Corrupt(format!(
				"format version {} (expected {FORMAT_VERSION})",
				bundle.version
			)));
		}
		if bundle.model.vocab_size() != bundle.tokenizer.vocab_size() {
			return Err(BundleError::Corrupt(format!(
				"model counts over {} tokens, tokenizer has {}",
				bundle.model.vocab_size(),
				bundle.tokenizer.vocab_size()
			)));
		}
		if !bundle.model.is_consistent() {
			return Err(BundleError::Corrupt("trigram counts reference unknown tokens".to_owned()));
		}

		info!("loaded model from {}: {:?}", path.as_ref().display(), bundle.stats());
		Ok(bundle)
	}

	pub fn tokenizer(&self) -> &Tokenizer {
		&self.tokenizer
	}

	pub fn indexer(&self) -> &Indexer {
		&self.indexer
	}

	pub fn model(&self) -> &TrigramModel {
		&self.model
	}

	/// Encodes a generation prefix with the same boundary rules as the corpus.
	pub fn encode_prompt(&self, text: &str) -> Vec<TokenId> {
		self.tokenizer.encode(&self.indexer.normalize_fragment(text))
	}

	/// Indexes held-out text and returns its perplexity.
	pub fn perplexity(&self, corpus: &str) -> Result<f64, BundleError> {
		let tokens = self.indexer.index(corpus, &self.tokenizer);
		Ok(self.model.perplexity(&tokens)?)
	}

	pub fn stats(&self) -> BundleStats {
		BundleStats {
			vocab_size: self.tokenizer.vocab_size(),
			merges: self.tokenizer.merges().len(),
			trigram_contexts: self.model.context_len(),
			total_tokens: self.model.total_tokens(),
		}
	}
}
