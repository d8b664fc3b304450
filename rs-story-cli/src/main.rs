use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use rs_story_core::io::read_documents;
use rs_story_core::model::params::{DEFAULT_MAX_LENGTH, DEFAULT_TEMPERATURE, DEFAULT_TOP_K};
use rs_story_core::{GenerationParams, Generator, ModelBundle, Smoothing, TrainingConfig, TrainingOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and sample trigram story models", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Train a model from a text file or a directory of `.txt` files
	Train(TrainArgs),
	/// Continue a prefix with a trained model
	Generate(GenerateArgs),
	/// Print the size of a trained model
	Info {
		#[arg(short = 'm', long, value_name = "PATH")]
		model: PathBuf,
	},
	/// Evaluate a trained model on held-out text
	Perplexity {
		#[arg(short = 'm', long, value_name = "PATH")]
		model: PathBuf,
		corpus: PathBuf,
	},
}

#[derive(Args, Debug)]
struct TrainArgs {
	corpus: PathBuf,

	/// Defaults to the corpus path with a `.bin` extension
	#[arg(short, long, value_name = "PATH")]
	output: Option<PathBuf>,

	#[arg(long, value_name = "SIZE", default_value_t = 250)]
	vocab_size: usize,

	/// Add-k smoothing constant
	#[arg(long, value_name = "K", conflicts_with = "interpolate")]
	laplace: Option<f64>,

	/// Unigram, bigram and trigram interpolation weights
	#[arg(long, value_name = "U,B,T", value_delimiter = ',', num_args = 3)]
	interpolate: Option<Vec<f64>>,

	/// Worker threads; all cores by default
	#[arg(long, value_name = "N")]
	threads: Option<usize>,
}

impl TrainArgs {
	fn options(&self) -> TrainingOptions {
		let smoothing = match (self.laplace, self.interpolate.as_deref()) {
			(Some(k), _) => Smoothing::Laplace(k),
			(None, Some(&[unigram, bigram, trigram])) => Smoothing::Interpolated { unigram, bigram, trigram },
			_ => Smoothing::None,
		};
		let mut tokenizer = TrainingConfig { target_vocab_size: self.vocab_size, ..TrainingConfig::default() };
		if let Some(threads) = self.threads {
			tokenizer.threads = threads.max(1);
		}
		TrainingOptions { tokenizer, smoothing, ..TrainingOptions::default() }
	}
}

#[derive(Args, Debug)]
struct GenerateArgs {
	#[arg(short = 'm', long, value_name = "PATH")]
	model: PathBuf,

	#[arg(short, long)]
	prefix: String,

	#[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
	max_length: usize,

	#[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
	temperature: f64,

	#[arg(long, default_value_t = DEFAULT_TOP_K)]
	top_k: usize,

	/// Fixed seed for reproducible output
	#[arg(long)]
	seed: Option<u64>,

	/// Drop <EOS>/<EOP>/<EOT> markers from the output
	#[arg(long)]
	plain: bool,
}

fn train(args: &TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
	let options = args.options();
	let (bundle, output) = match &args.output {
		Some(output) => {
			let documents = read_documents(&args.corpus)?;
			let bundle = ModelBundle::train(&documents, &options)?;
			bundle.save(output)?;
			(bundle, output.clone())
		}
		None => ModelBundle::train_from_file(&args.corpus, &options)?,
	};

	let stats = bundle.stats();
	println!("model written to {}", output.display());
	println!("vocabulary: {} tokens ({} merges)", stats.vocab_size, stats.merges);
	println!("trigram contexts: {}, tokens: {}", stats.trigram_contexts, stats.total_tokens);
	Ok(())
}

fn generate(args: &GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
	let generator = Generator::new(Arc::new(ModelBundle::load(&args.model)?));
	let params = GenerationParams { max_length: args.max_length, temperature: args.temperature, top_k: args.top_k };
	let rng = args.seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

	let output = generator.generate(&args.prefix, &params, rng)?;
	info!("{} token(s), stopped: {:?}", output.token_count, output.stop_reason);
	if args.plain {
		println!("{}", output.plain_text(generator.model())?);
	} else {
		println!("{}", output.generated_text);
	}
	Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	match Cli::parse().command {
		Command::Train(args) => train(&args)?,
		Command::Generate(args) => generate(&args)?,
		Command::Info { model } => {
			let bundle = ModelBundle::load(&model)?;
			let stats = bundle.stats();
			println!("vocabulary: {} tokens", stats.vocab_size);
			println!("merges: {}", stats.merges);
			println!("trigram contexts: {}", stats.trigram_contexts);
			println!("training tokens: {}", stats.total_tokens);
			println!("smoothing: {:?}", bundle.model().smoothing());
		}
		Command::Perplexity { model, corpus } => {
			let bundle = ModelBundle::load(&model)?;
			let separator = bundle.indexer().rules().document_separator.to_string();
			let text = read_documents(&corpus)?.join(&separator);
			println!("perplexity: {:.3}", bundle.perplexity(&text)?);
		}
	}

	Ok(())
}
