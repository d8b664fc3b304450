use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rs_story_core::tokenizer::special::{UNKNOWN, UNKNOWN_ID};
use rs_story_core::{
	Context, GenerationError, GenerationParams, Generator, ModelBundle, Smoothing, Special, StopReason, TrainingConfig,
	TrainingOptions,
};

const TOY_CORPUS: &str = "a b c a b c a b d";

const STORIES: &str = "Once upon a time there was a small fox. The fox lived in a forest.\n\n\
	Every day the fox ran to the river! Did the fox like the river? The fox did.\u{0C}\
	A girl had a red kite. The kite flew over the hill.\n\n\
	One day the kite fell in the river. The girl ran to the river.";

fn options(smoothing: Smoothing) -> TrainingOptions {
	TrainingOptions {
		tokenizer: TrainingConfig { target_vocab_size: 120, threads: 2 },
		smoothing,
		..TrainingOptions::default()
	}
}

fn toy_generator() -> Generator {
	let bundle = ModelBundle::train(&[TOY_CORPUS], &options(Smoothing::None)).unwrap();
	Generator::new(Arc::new(bundle))
}

#[test]
fn observed_continuations_become_probabilities() {
	let generator = toy_generator();
	let tokenizer = generator.model().tokenizer();

	let [a] = tokenizer.encode("a")[..] else { panic!("`a` should be a single token") };
	let [b] = tokenizer.encode("b")[..] else { panic!("`b` should be a single token") };
	let [c] = tokenizer.encode("c")[..] else { panic!("`c` should be a single token") };
	// `d` occurs once, so it is never merged with the end-of-word marker
	let d = tokenizer.encode("d")[0];

	let distribution = generator.model().model().next_token_distribution(a, b);
	assert_eq!(distribution.len(), 2);
	assert!((distribution.probability(c) - 2.0 / 3.0).abs() < 1e-9);
	assert!((distribution.probability(d) - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn seeded_generation_is_reproducible() {
	let generator = toy_generator();
	let params = GenerationParams { max_length: 5, temperature: 1.0, top_k: 2 };

	let runs: Vec<_> = (0..3)
		.map(|_| generator.generate("a b", &params, StdRng::seed_from_u64(0x5eed)).unwrap())
		.collect();
	assert_eq!(runs[0], runs[1]);
	assert_eq!(runs[1], runs[2]);
	assert!(runs[0].token_count <= 5);
}

#[test]
fn zero_length_generation_is_empty() {
	let generator = toy_generator();
	let params = GenerationParams { max_length: 0, ..GenerationParams::default() };
	let output = generator.generate("a b", &params, StdRng::seed_from_u64(1)).unwrap();

	assert_eq!(output.generated_text, "");
	assert_eq!(output.token_count, 0);
	assert!(!output.stopped_at_eot);
}

#[test]
fn unseen_characters_decode_as_unknown_once_each() {
	let generator = toy_generator();
	let bundle = generator.model();

	let encoded = bundle.encode_prompt("a z b");
	assert_eq!(encoded.iter().filter(|&&id| id == UNKNOWN_ID).count(), 1);
	let decoded = bundle.tokenizer().decode(&encoded).unwrap();
	assert_eq!(decoded.matches(UNKNOWN).count(), 1);

	let encoded = bundle.encode_prompt("zq a");
	assert_eq!(encoded.iter().filter(|&&id| id == UNKNOWN_ID).count(), 2);
	assert_eq!(bundle.tokenizer().decode(&encoded).unwrap().matches(UNKNOWN).count(), 2);

	// Generation still works from an unknown context
	let params = GenerationParams { max_length: 10, temperature: 1.0, top_k: 2 };
	assert!(generator.generate("z", &params, StdRng::seed_from_u64(4)).is_ok());
}

#[test]
fn generated_ids_stay_in_vocabulary() {
	for smoothing in [
		Smoothing::None,
		Smoothing::Laplace(0.1),
		Smoothing::Interpolated { unigram: 0.2, bigram: 0.3, trigram: 0.5 },
	] {
		let bundle = ModelBundle::train(&[STORIES], &options(smoothing)).unwrap();
		let vocab_size = bundle.tokenizer().vocab_size();
		let generator = Generator::new(Arc::new(bundle));

		for seed in 0..10 {
			let params = GenerationParams { max_length: 60, temperature: 0.8, top_k: 8 };
			let output = generator.generate("the fox", &params, StdRng::seed_from_u64(seed)).unwrap();
			assert!(output.token_count <= 60);
			assert!(output.tokens.iter().all(|&id| (id as usize) < vocab_size));
			if output.stopped_at_eot {
				assert_eq!(output.tokens.last(), Some(&Special::Eot.id()));
				assert!(output.generated_text.ends_with("<EOT>"));
			}
		}
	}
}

#[test]
fn generated_text_excludes_the_prefix() {
	let bundle = ModelBundle::train(&[STORIES], &options(Smoothing::None)).unwrap();
	let generator = Generator::new(Arc::new(bundle));
	let params = GenerationParams { max_length: 1, temperature: 1.0, top_k: 1 };

	let output = generator.generate("Once upon a", &params, StdRng::seed_from_u64(0)).unwrap();
	assert_eq!(output.token_count, 1);
	assert!(!output.generated_text.contains("Once"));
	assert_eq!(output.generated_text, generator.model().tokenizer().decode(&output.tokens).unwrap());
}

#[test]
fn configuration_errors_are_reported_before_generation() {
	let generator = toy_generator();
	let rng = || StdRng::seed_from_u64(0);

	let error = generator
		.generate("a", &GenerationParams { temperature: -1.0, ..GenerationParams::default() }, rng())
		.unwrap_err();
	assert!(matches!(error, GenerationError::InvalidTemperature(_)));
	assert!(error.is_configuration());

	let error = generator.generate("", &GenerationParams::default(), rng()).unwrap_err();
	assert!(matches!(error, GenerationError::EmptyPrefix));
}

#[test]
fn streaming_matches_eager_generation() {
	let bundle = ModelBundle::train(&[STORIES], &options(Smoothing::Laplace(0.5))).unwrap();
	let generator = Generator::new(Arc::new(bundle));
	let params = GenerationParams { max_length: 40, temperature: 0.7, top_k: 4 };

	let mut stream = generator.stream("the kite", &params, StdRng::seed_from_u64(21)).unwrap();
	let texts: Vec<String> = stream.by_ref().map(|event| event.text).collect();
	let reason = stream.stop_reason();
	let eager = generator.generate("the kite", &params, StdRng::seed_from_u64(21)).unwrap();

	assert_eq!(texts.len(), eager.token_count);
	assert_eq!(reason, Some(eager.stop_reason));
	assert!(matches!(reason, Some(StopReason::MaxLength | StopReason::EndOfText)));
}

#[test]
fn prefix_sets_the_starting_context() {
	let generator = toy_generator();
	let tokenizer = generator.model().tokenizer();
	let prompt = generator.model().encode_prompt("a b");

	assert_eq!(prompt, tokenizer.encode("a b"));
	assert_eq!(Context::from_tail(&prompt), Context::Two(prompt[0], prompt[1]));
	// A fragment is never closed with <EOT>
	assert!(!prompt.contains(&Special::Eot.id()));
}
