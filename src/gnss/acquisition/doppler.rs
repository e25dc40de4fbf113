
use crate::{DigSigProcErr as DSPErr};

/// Doppler step that keeps the worst-case frequency error at a quarter of the
/// coherent integration bandwidth, i.e. 500 [Hz] for a single 1 [ms] code period
pub fn step_for_coherent_integration(coherent_integration_sec:f64) -> f64 {
	1.0 / (2.0 * coherent_integration_sec)
}

/// Upper bound on the number of bins in one search
pub const MAX_DOPPLER_BINS:usize = 4001;

/// Ordered set of carrier frequency offsets to test, symmetric around zero
#[derive(Debug, Clone, PartialEq)]
pub struct DopplerBinBank {
	range_hz:f64,
	step_hz:f64,
	freqs:Vec<f64>,
}

impl DopplerBinBank {

	pub fn new(range_hz:f64, step_hz:f64) -> Result<Self, DSPErr> {
		if !(range_hz.is_finite() && range_hz >= 0.0) {
			return Err(DSPErr::InvalidConfiguration("Doppler search range must be non-negative and finite"));
		}
		if !(step_hz.is_finite() && step_hz > 0.0) {
			return Err(DSPErr::InvalidConfiguration("Doppler bin step must be positive and finite"));
		}

		// The small allowance keeps a range that's an exact multiple of the step from losing its outer bins to rounding
		let half_count_f:f64 = ((range_hz / step_hz) + 1.0e-9).floor();
		if 2.0*half_count_f + 1.0 > MAX_DOPPLER_BINS as f64 {
			return Err(DSPErr::InvalidConfiguration("Doppler search needs too many bins; use a larger step or a smaller range"));
		}
		let half_count:i64 = half_count_f as i64;
		let freqs:Vec<f64> = (-half_count..=half_count).map(|k| (k as f64) * step_hz).collect();

		Ok(Self{ range_hz, step_hz, freqs })
	}

	pub fn from_khz(range_khz:f64, step_hz:f64) -> Result<Self, DSPErr> { Self::new(range_khz * 1.0e3, step_hz) }

	pub fn freqs(&self) -> &[f64] { &self.freqs }
	pub fn len(&self) -> usize { self.freqs.len() }
	pub fn is_empty(&self) -> bool { self.freqs.is_empty() }
	pub fn range_hz(&self) -> f64 { self.range_hz }
	pub fn step_hz(&self) -> f64 { self.step_hz }

}
