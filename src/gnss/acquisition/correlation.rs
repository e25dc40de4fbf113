
use std::f64::consts;
use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{FFT, FFTplanner};
use rustfft::num_complex::Complex;

use crate::{DigSigProcErr as DSPErr};
use crate::gnss::gps_l1_ca::signal_modulation::CodeReplica;
use super::doppler::DopplerBinBank;

const ZERO:Complex<f64> = Complex{ re: 0.0, im: 0.0 };

/// Normalized correlation magnitude over (Doppler bin, delay bin).  Every row spans the
/// whole epoch, one cell per sample of delay.
#[derive(Debug, Clone)]
pub struct CorrelationSurface {
	doppler_freqs:Vec<f64>,
	rows:Vec<Vec<f64>>,
}

impl CorrelationSurface {

	pub fn new(doppler_freqs:Vec<f64>, rows:Vec<Vec<f64>>) -> Result<Self, DSPErr> {
		if doppler_freqs.len() != rows.len() {
			return Err(DSPErr::LengthMismatch{ expected: doppler_freqs.len(), found: rows.len() });
		}
		if let Some(first) = rows.first() {
			if let Some(bad) = rows.iter().find(|r| r.len() != first.len()) {
				return Err(DSPErr::LengthMismatch{ expected: first.len(), found: bad.len() });
			}
		}
		Ok(Self{ doppler_freqs, rows })
	}

	pub fn doppler_len(&self) -> usize { self.rows.len() }
	pub fn delay_len(&self) -> usize { self.rows.first().map(|r| r.len()).unwrap_or(0) }

	pub fn doppler_hz(&self, doppler_idx:usize) -> f64 { self.doppler_freqs[doppler_idx] }
	pub fn doppler_freqs(&self) -> &[f64] { &self.doppler_freqs }
	pub fn row(&self, doppler_idx:usize) -> &[f64] { &self.rows[doppler_idx] }
	pub fn get(&self, doppler_idx:usize, delay:usize) -> f64 { self.rows[doppler_idx][delay] }

	/// Every cell as (Doppler index, delay, magnitude), Doppler-major
	pub fn cells<'a>(&'a self) -> impl Iterator<Item=(usize, usize, f64)> + 'a {
		self.rows.iter().enumerate().flat_map(|(d, row)| row.iter().enumerate().map(move |(t, m)| (d, t, *m)))
	}

	pub fn all_finite(&self) -> bool { self.cells().all(|(_, _, m)| m.is_finite()) }

}

/// Parallel code phase search against one code replica.  The replica spectrum is computed
/// once; each call to `search` sweeps every Doppler bin for one epoch.
pub struct CorrelationSearch {
	fs:f64,
	len:usize,
	fft:Arc<dyn FFT<f64>>,
	ifft:Arc<dyn FFT<f64>>,
	local_code_freq_domain:Vec<Complex<f64>>,
	code_energy:f64,
	pool:Option<rayon::ThreadPool>,
}

impl CorrelationSearch {

	/// `worker_threads` bounds the pool that computes Doppler rows; `Some(1)` computes them
	/// inline and `None` uses one thread per core
	pub fn new(replica:&CodeReplica, worker_threads:Option<usize>) -> Result<Self, DSPErr> {
		let len:usize = replica.len();
		if len == 0 {
			return Err(DSPErr::InvalidConfiguration("Code replica is empty"));
		}

		// Forward FFT
		let mut local_code_time_domain:Vec<Complex<f64>> = replica.to_complex();
		let mut fft_out:Vec<Complex<f64>> = vec![ZERO; len];
		let mut planner = FFTplanner::new(false);
		let fft = planner.plan_fft(len);
		fft.process(&mut local_code_time_domain, &mut fft_out);

		let local_code_freq_domain:Vec<Complex<f64>> = fft_out.iter().map(|p| p.conj()).collect();

		let mut inv_planner = FFTplanner::new(true);
		let ifft = inv_planner.plan_fft(len);

		let pool = match worker_threads {
			Some(0) => return Err(DSPErr::InvalidConfiguration("Worker pool needs at least one thread")),
			Some(1) => None,
			Some(n) => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()
				.map_err(|_| DSPErr::Other("Unable to build correlation worker pool"))?),
			None    => Some(rayon::ThreadPoolBuilder::new().build()
				.map_err(|_| DSPErr::Other("Unable to build correlation worker pool"))?),
		};

		Ok(Self{ fs: replica.fs, len, fft, ifft, local_code_freq_domain, code_energy: replica.energy(), pool })
	}

	pub fn len(&self) -> usize { self.len }
	pub fn is_empty(&self) -> bool { self.len == 0 }

	/// Sweeps every Doppler bin over one epoch.  The epoch has to be exactly as long as the
	/// replica and carry nonzero, finite energy.
	pub fn search(&self, signal:&[Complex<f64>], bins:&DopplerBinBank) -> Result<CorrelationSurface, DSPErr> {
		if signal.len() != self.len {
			return Err(DSPErr::LengthMismatch{ expected: self.len, found: signal.len() });
		}

		let signal_energy:f64 = signal.iter().map(|c| c.norm_sqr()).sum();

		// The rows don't depend on each other; collecting them is the barrier before peak detection
		let rows:Vec<Vec<f64>> = match &self.pool {
			Some(pool) => pool.install(|| bins.freqs().par_iter().map(|freq| self.correlate(signal, signal_energy, *freq)).collect()),
			None       => bins.freqs().iter().map(|freq| self.correlate(signal, signal_energy, *freq)).collect(),
		};

		CorrelationSurface::new(bins.freqs().to_vec(), rows)
	}

	fn correlate(&self, signal:&[Complex<f64>], signal_energy:f64, freq:f64) -> Vec<f64> {
		// Wipe the carrier off the input signal
		let phase_step_rad:f64 = (-2.0 * consts::PI * freq) / self.fs;
		let mut doppler_wiped_time_domain:Vec<Complex<f64>> = signal.iter().enumerate()
			.map(|(idx, s)| {
				let phase = phase_step_rad * (idx as f64);
				*s * Complex{ re: phase.cos(), im: phase.sin() }
			}).collect();

		// Run the forward FFT
		let mut fft_out:Vec<Complex<f64>> = vec![ZERO; self.len];
		self.fft.process(&mut doppler_wiped_time_domain, &mut fft_out);

		// Multiplying by the conjugate code spectrum is circular correlation in the time domain
		let mut correlation_freq_domain:Vec<Complex<f64>> = fft_out.iter()
			.zip(self.local_code_freq_domain.iter())
			.map(|(a, b)| a*b)
			.collect();

		let mut ifft_out:Vec<Complex<f64>> = vec![ZERO; self.len];
		self.ifft.process(&mut correlation_freq_domain, &mut ifft_out);

		// The unnormalized inverse FFT carries a factor of len; dividing by the geometric mean of
		// the two energies on top of that bounds the magnitude by one
		let scale:f64 = 1.0 / ((self.len as f64) * (signal_energy * self.code_energy).sqrt());
		ifft_out.iter().map(|c| c.norm() * scale).collect()
	}

}
