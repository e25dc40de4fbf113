
use serde::{Serialize, Deserialize};

use crate::{DigSigProcErr as DSPErr};
use crate::filters::{ScalarFilter, ExponentialFilter};
use super::Measurement;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
	pub code_delay:f64,
	pub doppler_hz:f64,
	pub peak_magnitude:f64,
}

impl Estimate {

	/// Smoothed delay as a whole sample offset inside a code period of `period` samples
	pub fn code_delay_samples(&self, period:usize) -> usize {
		let n:f64 = period.max(1) as f64;
		(self.code_delay.round().rem_euclid(n) as usize) % period.max(1)
	}

}

/// Running estimates of delay, Doppler and peak magnitude, each smoothed independently.
/// The delay lives on a circle of `period` samples, so each new measurement is taken
/// along the shorter way around from the current estimate.
#[derive(Debug, Clone)]
pub struct SmoothingEstimator {
	delay: ExponentialFilter,
	doppler: ExponentialFilter,
	magnitude: ExponentialFilter,
	period: usize,
	updates: usize,
}

impl SmoothingEstimator {

	pub fn new(alpha:f64, period:usize) -> Result<Self, DSPErr> {
		if period == 0 {
			return Err(DSPErr::InvalidConfiguration("Code delay period must be positive"));
		}
		let filter = ExponentialFilter::new(alpha).map_err(DSPErr::InvalidConfiguration)?;
		Ok(Self{ delay: filter, doppler: filter, magnitude: filter, period, updates: 0 })
	}

	pub fn alpha(&self) -> f64 { self.delay.alpha() }
	pub fn period(&self) -> usize { self.period }
	pub fn updates(&self) -> usize { self.updates }

	fn unwrap_delay(&self, code_delay:usize) -> f64 {
		let n:f64 = self.period as f64;
		let m:f64 = code_delay as f64;
		match self.delay.value() {
			Some(est) => est + (m - est + 0.5*n).rem_euclid(n) - 0.5*n,
			None      => m,
		}
	}

	pub fn update(&mut self, m:&Measurement) -> Estimate {
		self.updates += 1;
		let unwrapped:f64 = self.unwrap_delay(m.code_delay);
		Estimate {
			code_delay:     self.delay.apply(unwrapped).rem_euclid(self.period as f64),
			doppler_hz:     self.doppler.apply(m.doppler_hz),
			peak_magnitude: self.magnitude.apply(m.peak_magnitude),
		}
	}

	pub fn estimate(&self) -> Option<Estimate> {
		match (self.delay.value(), self.doppler.value(), self.magnitude.value()) {
			(Some(code_delay), Some(doppler_hz), Some(peak_magnitude)) =>
				Some(Estimate{ code_delay: code_delay.rem_euclid(self.period as f64), doppler_hz, peak_magnitude }),
			_ => None
		}
	}

}
