
use serde::{Serialize, Deserialize};

use crate::{DigSigProcErr as DSPErr};
use super::AcquisitionResult;

/// Downstream consumer of per-epoch results
pub trait ResultSink {
	fn emit(&mut self, result:&AcquisitionResult) -> Result<(), DSPErr>;
}

/// Three synchronized series with one value per processed epoch
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSink {
	pub code_delay_samples:Vec<usize>,
	pub doppler_hz:Vec<f64>,
	pub peak_magnitude:Vec<f64>,
}

impl SeriesSink {

	pub fn new() -> Self { Self::default() }

	pub fn len(&self) -> usize { self.code_delay_samples.len() }
	pub fn is_empty(&self) -> bool { self.code_delay_samples.is_empty() }

}

impl ResultSink for SeriesSink {
	fn emit(&mut self, result:&AcquisitionResult) -> Result<(), DSPErr> {
		self.code_delay_samples.push(result.code_delay);
		self.doppler_hz.push(result.doppler_hz);
		self.peak_magnitude.push(result.peak_magnitude);
		Ok(())
	}
}

impl ResultSink for Vec<AcquisitionResult> {
	fn emit(&mut self, result:&AcquisitionResult) -> Result<(), DSPErr> {
		self.push(*result);
		Ok(())
	}
}
