use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_cors::Cors;
use actix_web::error::InternalError;
use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::web::Bytes;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, ResponseError};
use clap::Parser;
use futures_util::stream;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rs_story_core::model::params::{DEFAULT_MAX_LENGTH, DEFAULT_TEMPERATURE, DEFAULT_TOP_K};
use rs_story_core::{
	BundleStats, GenerationError, GenerationOutput, GenerationParams, GenerationStream, Generator, ModelBundle,
	StopReason,
};

/// Service configuration, from flags or environment.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "HTTP service for the trigram story generator")]
struct Config {
	/// Model artifact produced by `rs-story-cli train`
	#[arg(long, env = "STORY_MODEL_PATH")]
	model: PathBuf,

	#[arg(long, env = "STORY_HOST", default_value = "127.0.0.1")]
	host: String,

	#[arg(long, env = "STORY_PORT", default_value_t = 5000)]
	port: u16,

	/// Largest `max_length` a request may ask for
	#[arg(long, default_value_t = 1000)]
	max_length_limit: usize,

	/// Per-request generation time limit, in milliseconds
	#[arg(long, default_value_t = 5000)]
	timeout_ms: u64,
}

/// Shared by every worker. The model inside is immutable, so no lock.
struct AppState {
	generator: Generator,
	max_length_limit: usize,
	timeout: Duration,
}

/// Body of `POST /generate` and `POST /generate/stream`
#[derive(Deserialize, Debug)]
struct GenerateRequest {
	prefix: String,
	#[serde(default = "default_max_length")]
	max_length: usize,
	#[serde(default = "default_temperature")]
	temperature: f64,
	#[serde(default = "default_top_k")]
	top_k: usize,
	/// Fixed seed for reproducible output; fresh entropy otherwise
	seed: Option<u64>,
}

fn default_max_length() -> usize {
	DEFAULT_MAX_LENGTH
}

fn default_temperature() -> f64 {
	DEFAULT_TEMPERATURE
}

fn default_top_k() -> usize {
	DEFAULT_TOP_K
}

impl GenerateRequest {
	fn params(&self) -> GenerationParams {
		GenerationParams { max_length: self.max_length, temperature: self.temperature, top_k: self.top_k }
	}

	fn rng(&self) -> StdRng {
		self.seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
	}
}

#[derive(Serialize, Debug)]
struct GenerateResponse {
	generated_text: String,
	token_count: usize,
	stopped_at_eot: bool,
}

impl From<GenerationOutput> for GenerateResponse {
	fn from(output: GenerationOutput) -> Self {
		Self {
			generated_text: output.generated_text,
			token_count: output.token_count,
			stopped_at_eot: output.stopped_at_eot,
		}
	}
}

/// Last line of a streamed generation.
#[derive(Serialize, Debug)]
struct StreamSummary {
	done: bool,
	token_count: usize,
	stopped_at_eot: bool,
	stop_reason: Option<StopReason>,
}

#[derive(Serialize, Debug)]
struct HealthResponse {
	status: &'static str,
	#[serde(flatten)]
	stats: BundleStats,
}

#[derive(Serialize, Debug)]
struct ErrorBody {
	detail: String,
}

#[derive(Debug, Error)]
enum ApiError {
	#[error(transparent)]
	Generation(#[from] GenerationError),

	#[error("generation exceeded the {0} ms time limit")]
	Timeout(u128),

	#[error("generation task failed: {0}")]
	Internal(String),
}

impl ResponseError for ApiError {
	fn status_code(&self) -> StatusCode {
		match self {
			ApiError::Generation(e) if e.is_configuration() => StatusCode::UNPROCESSABLE_ENTITY,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn error_response(&self) -> HttpResponse {
		HttpResponse::build(self.status_code()).json(ErrorBody { detail: self.to_string() })
	}
}

/// Malformed request bodies are configuration errors too.
fn json_config() -> web::JsonConfig {
	web::JsonConfig::default().error_handler(|err, _request| {
		let response = HttpResponse::UnprocessableEntity().json(ErrorBody { detail: err.to_string() });
		InternalError::from_response(err, response).into()
	})
}

/// HTTP POST endpoint `/generate`
///
/// Runs the whole generation on the blocking pool and returns it at once.
#[post("/generate")]
async fn generate(
	state: web::Data<AppState>,
	request: web::Json<GenerateRequest>,
) -> Result<HttpResponse, ApiError> {
	let request = request.into_inner();
	let params = request.params();
	params.validate_with_limit(state.max_length_limit)?;

	let generator = state.generator.clone();
	let deadline = Instant::now() + state.timeout;
	let output = web::block(move || {
		generator
			.stream(&request.prefix, &params, request.rng())
			.and_then(|stream| stream.with_deadline(deadline).finish())
	})
	.await
	.map_err(|e| ApiError::Internal(e.to_string()))??;

	if output.stop_reason == StopReason::Deadline {
		return Err(ApiError::Timeout(state.timeout.as_millis()));
	}
	info!("generated {} token(s), stopped: {:?}", output.token_count, output.stop_reason);
	Ok(HttpResponse::Ok().json(GenerateResponse::from(output)))
}

/// NDJSON body: one line per token event, then a summary line.
struct NdjsonLines {
	events: GenerationStream<StdRng>,
	done: bool,
}

impl Iterator for NdjsonLines {
	type Item = Result<Bytes, serde_json::Error>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}
		let line = match self.events.next() {
			Some(event) => serde_json::to_vec(&event),
			None => {
				self.done = true;
				let stop_reason = self.events.stop_reason();
				serde_json::to_vec(&StreamSummary {
					done: true,
					token_count: self.events.token_count(),
					stopped_at_eot: stop_reason == Some(StopReason::EndOfText),
					stop_reason,
				})
			}
		};
		Some(line.map(|mut bytes| {
			bytes.push(b'\n');
			Bytes::from(bytes)
		}))
	}
}

/// HTTP POST endpoint `/generate/stream`
///
/// Forwards each token as soon as it is sampled. Sampling runs on the
/// blocking pool one line at a time, so workers only move bytes.
#[post("/generate/stream")]
async fn generate_stream(
	state: web::Data<AppState>,
	request: web::Json<GenerateRequest>,
) -> Result<HttpResponse, ApiError> {
	let params = request.params();
	params.validate_with_limit(state.max_length_limit)?;

	let events = state
		.generator
		.stream(&request.prefix, &params, request.rng())?
		.with_deadline(Instant::now() + state.timeout);

	let body = stream::unfold(NdjsonLines { events, done: false }, |lines| async move {
		let (line, lines) = web::block(move || {
			let mut lines = lines;
			(lines.next(), lines)
		})
		.await
		.inspect_err(|e| error!("stream generation task failed: {e}"))
		.ok()?;
		Some((line?, lines))
	});
	Ok(HttpResponse::Ok().content_type("application/x-ndjson").streaming(body))
}

#[get("/health")]
async fn health(state: web::Data<AppState>) -> HttpResponse {
	HttpResponse::Ok().json(HealthResponse { status: "ok", stats: state.generator.model().stats() })
}

fn routes(config: &mut web::ServiceConfig) {
	config.app_data(json_config()).service(generate).service(generate_stream).service(health);
}

/// Main entry point for the server.
///
/// Loads the model once, before binding: a missing or corrupt artifact stops
/// the process instead of serving without a model.
#[actix_web::main]
async fn main() -> io::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let config = Config::parse();

	let bundle = ModelBundle::load(&config.model)
		.map_err(|e| io::Error::other(format!("failed to load {}: {e}", config.model.display())))?;
	let state = web::Data::new(AppState {
		generator: Generator::new(Arc::new(bundle)),
		max_length_limit: config.max_length_limit,
		timeout: Duration::from_millis(config.timeout_ms),
	});

	info!("listening on {}:{}", config.host, config.port);
	HttpServer::new(move || {
		App::new()
			.wrap(Logger::default())
			.wrap(Cors::permissive())
			.app_data(state.clone())
			.configure(routes)
	})
	.bind((config.host.as_str(), config.port))?
	.run()
	.await
}
