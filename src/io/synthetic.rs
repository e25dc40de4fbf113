
use std::f64::consts;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use rustfft::num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::{DigSigProcErr as DSPErr, Sample};
use crate::gnss::gps_l1_ca::signal_modulation::CodeReplica;

/// Parameters of a simulated L1 C/A signal: one satellite's code, delayed by a whole number
/// of samples and rotated by a constant Doppler, plus optional complex Gaussian noise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
	pub prn:usize,
	pub fs:f64,
	pub code_shift_samples:usize,
	pub doppler_hz:f64,
	/// Ratio of the unit signal power to the total noise power; `None` is noiseless
	pub snr_db:Option<f64>,
	pub code_periods:usize,
	pub seed:u64,
}

impl Default for SimulationParams {
	fn default() -> Self {
		Self{ prn: 1, fs: 4.0e6, code_shift_samples: 200, doppler_hz: 3.0e3, snr_db: Some(-11.0), code_periods: 40, seed: 0 }
	}
}

pub struct SyntheticSource {
	code:Vec<i8>,
	shift:usize,
	phase_step_rad:f64,
	noise_sigma:f64,
	rng:StdRng,
	idx:usize,
	total_len:usize,
}

impl SyntheticSource {

	pub fn new(params:&SimulationParams) -> Result<Self, DSPErr> {
		let replica = CodeReplica::new(params.prn, params.fs, 1)?;
		Self::from_replica(params, &Arc::new(replica))
	}

	/// Reuses a replica that's already been generated for this PRN and sample rate
	pub fn from_replica(params:&SimulationParams, replica:&Arc<CodeReplica>) -> Result<Self, DSPErr> {
		if replica.prn != params.prn || replica.fs != params.fs {
			return Err(DSPErr::InvalidConfiguration("Replica doesn't match the simulated satellite"));
		}
		if !params.doppler_hz.is_finite() {
			return Err(DSPErr::InvalidConfiguration("Simulated Doppler must be finite"));
		}

		// A replica spanning several code periods just repeats the first one
		let samples_per_code:usize = replica.len() / replica.code_periods;
		let code:Vec<i8> = replica.chips[..samples_per_code].to_vec();

		// Per-component standard deviation so that I and Q together carry the full noise power
		let noise_sigma:f64 = match params.snr_db {
			Some(snr_db) if snr_db.is_finite() => (10.0f64.powf(-snr_db / 10.0) / 2.0).sqrt(),
			Some(_) => return Err(DSPErr::InvalidConfiguration("Simulated SNR must be finite")),
			None    => 0.0,
		};

		Ok(Self{
			shift: params.code_shift_samples % samples_per_code,
			phase_step_rad: (2.0 * consts::PI * params.doppler_hz) / params.fs,
			noise_sigma,
			rng: StdRng::seed_from_u64(params.seed),
			idx: 0,
			total_len: samples_per_code * params.code_periods,
			code,
		})
	}

	pub fn len(&self) -> usize { self.total_len }
	pub fn is_empty(&self) -> bool { self.total_len == 0 }

}

impl Iterator for SyntheticSource {
	type Item = Sample;

	fn next(&mut self) -> Option<Sample> {
		if self.idx >= self.total_len { return None; }

		let n:usize = self.code.len();
		let chip:f64 = self.code[(self.idx + n - self.shift) % n] as f64;
		let phase:f64 = self.phase_step_rad * (self.idx as f64);
		let mut val = Complex{ re: chip * phase.cos(), im: chip * phase.sin() };

		if self.noise_sigma > 0.0 {
			let noise_re:f64 = StandardNormal.sample(&mut self.rng);
			let noise_im:f64 = StandardNormal.sample(&mut self.rng);
			val += Complex{ re: self.noise_sigma * noise_re, im: self.noise_sigma * noise_im };
		}

		let ans = Sample{ val, idx: self.idx };
		self.idx += 1;
		Some(ans)
	}
}
