use crate::error::GenerationError;

pub const DEFAULT_MAX_LENGTH: usize = 200;
pub const DEFAULT_TEMPERATURE: f64 = 0.4;
pub const DEFAULT_TOP_K: usize = 5;

/// Sampling controls of a generation request.
///
/// # Invariants (checked by [`GenerationParams::validate`])
/// - `temperature` is finite and strictly positive
/// - `top_k >= 1`
///
/// `max_length == 0` is valid and produces an empty continuation.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationParams {
	/// Maximum number of tokens to generate, special tokens included.
	pub max_length: usize,

	/// Below 1 sharpens the distribution, above 1 flattens it.
	pub temperature: f64,

	/// Number of most likely candidates kept at each step.
	pub top_k: usize,
}

impl Default for GenerationParams {
	fn default() -> Self {
		Self { max_length: DEFAULT_MAX_LENGTH, temperature: DEFAULT_TEMPERATURE, top_k: DEFAULT_TOP_K }
	}
}

impl GenerationParams {
	/// # Errors
	/// Returns a configuration error for a non-positive temperature or a zero `top_k`.
	pub fn validate(&self) -> Result<(), GenerationError> {
		if !self.temperature.is_finite() || self.temperature <= 0.0 {
			return Err(GenerationError::InvalidTemperature(self.temperature));
		}
		if self.top_k < 1 {
			return Err(GenerationError::InvalidTopK(self.top_k));
		}
		Ok(())
	}

	/// Validates and additionally caps `max_length`.
	pub fn validate_with_limit(&self, max_length_limit: usize) -> Result<(), GenerationError> {
		self.validate()?;
		if self.max_length > max_length_limit {
			return Err(GenerationError::MaxLengthTooLarge { value: self.max_length, limit: max_length_limit });
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		let params = GenerationParams::default();
		assert_eq!(params.max_length, 200);
		assert_eq!(params.top_k, 5);
		assert!(params.validate().is_ok());
	}

	#[test]
	fn non_positive_temperature_is_rejected() {
		for temperature in [0.0, -0.5, f64::NAN, f64::INFINITY] {
			let params = GenerationParams { temperature, ..GenerationParams::default() };
			assert!(matches!(params.validate(), Err(GenerationError::InvalidTemperature(_))));
		}
	}

	#[test]
	fn zero_top_k_is_rejected() {
		let params = GenerationParams { top_k: 0, ..GenerationParams::default() };
		assert!(matches!(params.validate(), Err(GenerationError::InvalidTopK(0))));
	}

	#[test]
	fn max_length_limit() {
		let params = GenerationParams { max_length: 1001, ..GenerationParams::default() };
		assert!(params.validate().is_ok());
		assert!(matches!(
			params.validate_with_limit(1000),
			Err(GenerationError::MaxLengthTooLarge { value: 1001, limit: 1000 })
		));
	}
}
