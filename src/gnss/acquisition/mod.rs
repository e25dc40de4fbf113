
use std::io::Read;
use std::sync::Arc;

use log::{debug, warn};
use rustfft::num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::{DigSigProcErr as DSPErr};
use crate::gnss::constants::gps;
use crate::gnss::gps_l1_ca::signal_modulation::{self, CodeReplica};
use crate::io::Epoch;

pub mod correlation;
pub mod doppler;
pub mod engine;
pub mod peak;
pub mod sink;
pub mod smoothing;
pub mod streaming;

#[cfg(test)]
mod tests;

use self::correlation::CorrelationSearch;
use self::doppler::DopplerBinBank;
use self::peak::PeakDetector;
use self::smoothing::{Estimate, SmoothingEstimator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
	pub sample_rate_hz:f64,
	pub satellite_id:usize,
	pub smoothing_alpha:f64,
	/// Half-width of the Doppler search
	pub doppler_search_range_khz:f64,
	/// Absent means half the inverse of the coherent integration time
	pub doppler_bin_step_hz:Option<f64>,
	pub code_periods_per_epoch:usize,
	/// Bound on the Doppler-row worker pool; absent means one thread per core
	pub worker_threads:Option<usize>,
	/// Overrides the guard band around the peak used for the reference level, in samples
	pub guard_half_width:Option<usize>,
}

impl Default for AcquisitionConfig {
	fn default() -> Self {
		Self {
			sample_rate_hz: 4.0e6,
			satellite_id: 1,
			smoothing_alpha: 0.05,
			doppler_search_range_khz: 5.0,
			doppler_bin_step_hz: None,
			code_periods_per_epoch: 1,
			worker_threads: None,
			guard_half_width: None,
		}
	}
}

impl AcquisitionConfig {

	pub fn from_reader<R: Read>(reader:R) -> Result<Self, DSPErr> {
		serde_json::from_reader(reader).map_err(|_| DSPErr::Io("Unable to parse acquisition configuration"))
	}

	pub fn validate(&self) -> Result<(), DSPErr> {
		if self.satellite_id < gps::MIN_PRN || self.satellite_id > gps::MAX_PRN {
			return Err(DSPErr::InvalidConfiguration("Satellite ID must be a PRN in the range 1 to 32"));
		}
		if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
			return Err(DSPErr::InvalidConfiguration("Smoothing factor must be in (0, 1]"));
		}
		if self.code_periods_per_epoch == 0 {
			return Err(DSPErr::InvalidConfiguration("An epoch needs at least one code period"));
		}
		if self.worker_threads == Some(0) {
			return Err(DSPErr::InvalidConfiguration("Worker pool needs at least one thread"));
		}

		signal_modulation::samples_per_code(self.sample_rate_hz)?;
		if self.doppler_step_hz() > doppler::step_for_coherent_integration(self.coherent_integration_sec()) * (1.0 + 1.0e-9) {
			return Err(DSPErr::InvalidConfiguration("Doppler bin step is too coarse for the coherent integration time"));
		}
		let bins = DopplerBinBank::from_khz(self.doppler_search_range_khz, self.doppler_step_hz())?;
		if bins.range_hz() >= 0.5 * self.sample_rate_hz {
			return Err(DSPErr::InvalidConfiguration("Doppler search range has to stay below half the sample rate"));
		}

		Ok(())
	}

	pub fn epoch_len(&self) -> Result<usize, DSPErr> {
		Ok(signal_modulation::samples_per_code(self.sample_rate_hz)? * self.code_periods_per_epoch)
	}

	pub fn coherent_integration_sec(&self) -> f64 {
		(self.code_periods_per_epoch as f64) * gps::CODE_PERIOD_SEC
	}

	pub fn doppler_step_hz(&self) -> f64 {
		self.doppler_bin_step_hz.unwrap_or_else(|| doppler::step_for_coherent_integration(self.coherent_integration_sec()))
	}

}

/// Raw result of searching one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
	/// Code phase in samples within one code period
	pub code_delay:usize,
	pub doppler_hz:f64,
	pub peak_magnitude:f64,
	/// Mean magnitude outside the guard band around the peak
	pub reference_level:f64,
	pub confidence:f64,
}

/// Smoothed estimates after one epoch, alongside the raw measurement that produced them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionResult {
	pub prn:usize,
	pub epoch_idx:usize,
	pub sample_idx:usize,
	pub code_delay:usize,
	pub doppler_hz:f64,
	pub peak_magnitude:f64,
	pub confidence:f64,
	pub raw:Measurement,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpochOutcome {
	Result(AcquisitionResult),
	/// The epoch was skipped and the running estimates left untouched
	Anomaly{ prn:usize, epoch_idx:usize, sample_idx:usize, reason:&'static str },
}

/// Detection threshold applied by consumers of the result stream; the acquisition itself
/// reports every epoch regardless
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionPolicy {
	pub confidence_threshold:f64,
}

impl DetectionPolicy {

	pub fn new(confidence_threshold:f64) -> Self { Self{ confidence_threshold } }

	pub fn is_detection(&self, result:&AcquisitionResult) -> bool { result.confidence >= self.confidence_threshold }

}

fn epoch_anomaly(samples:&[Complex<f64>]) -> Option<&'static str> {
	if samples.iter().any(|c| !(c.re.is_finite() && c.im.is_finite())) {
		return Some("Epoch contains non-finite samples");
	}

	let energy:f64 = samples.iter().map(|c| c.norm_sqr()).sum();
	if !energy.is_finite() { Some("Epoch energy overflowed") }
	else if energy <= 0.0  { Some("Epoch carries no energy") }
	else                   { None }
}

/// The per-epoch pipeline for one satellite: correlation search over the Doppler bank,
/// peak detection, then smoothing.  The smoothing state is the only thing carried from one
/// epoch to the next.
pub struct Acquisition {
	config:AcquisitionConfig,
	replica:Arc<CodeReplica>,
	bins:DopplerBinBank,
	search:CorrelationSearch,
	detector:PeakDetector,
	estimator:SmoothingEstimator,
	epochs_seen:usize,
}

impl Acquisition {

	pub fn new(config:AcquisitionConfig) -> Result<Self, DSPErr> {
		config.validate()?;
		let replica = CodeReplica::new(config.satellite_id, config.sample_rate_hz, config.code_periods_per_epoch)?;
		Self::with_replica(config, Arc::new(replica))
	}

	pub fn with_replica(config:AcquisitionConfig, replica:Arc<CodeReplica>) -> Result<Self, DSPErr> {
		config.validate()?;
		if replica.prn != config.satellite_id || replica.fs != config.sample_rate_hz || replica.code_periods != config.code_periods_per_epoch {
			return Err(DSPErr::InvalidConfiguration("Code replica doesn't match the configuration"));
		}

		let bins = DopplerBinBank::from_khz(config.doppler_search_range_khz, config.doppler_step_hz())?;
		let search = CorrelationSearch::new(&replica, config.worker_threads)?;
		let detector = PeakDetector::new(config.guard_half_width.unwrap_or_else(|| peak::default_guard_half_width(config.sample_rate_hz)));
		let estimator = SmoothingEstimator::new(config.smoothing_alpha, signal_modulation::samples_per_code(config.sample_rate_hz)?)?;

		Ok(Self{ config, replica, bins, search, detector, estimator, epochs_seen: 0 })
	}

	pub fn prn(&self) -> usize { self.config.satellite_id }
	pub fn config(&self) -> &AcquisitionConfig { &self.config }
	pub fn replica(&self) -> &Arc<CodeReplica> { &self.replica }
	pub fn bins(&self) -> &DopplerBinBank { &self.bins }
	pub fn epoch_len(&self) -> usize { self.search.len() }
	pub fn samples_per_code(&self) -> usize { self.replica.len() / self.replica.code_periods }
	pub fn epochs_seen(&self) -> usize { self.epochs_seen }
	pub fn estimate(&self) -> Option<Estimate> { self.estimator.estimate() }

	/// Searches one epoch.  A malformed epoch comes back as `EpochOutcome::Anomaly`; an epoch
	/// of the wrong length is a configuration failure and comes back as an error.
	pub fn process_epoch(&mut self, epoch:&Epoch) -> Result<EpochOutcome, DSPErr> {
		if epoch.len() != self.epoch_len() {
			return Err(DSPErr::LengthMismatch{ expected: self.epoch_len(), found: epoch.len() });
		}

		let prn:usize = self.prn();
		let epoch_idx:usize = self.epochs_seen;
		self.epochs_seen += 1;

		let anomaly = |reason:&'static str| {
			warn!("PRN {:02}: skipping epoch {} at sample {}, {}", prn, epoch_idx, epoch.sample_idx, reason);
			EpochOutcome::Anomaly{ prn, epoch_idx, sample_idx: epoch.sample_idx, reason }
		};

		if let Some(reason) = epoch_anomaly(&epoch.samples) {
			return Ok(anomaly(reason));
		}

		let surface = self.search.search(&epoch.samples, &self.bins)?;
		if !surface.all_finite() {
			return Ok(anomaly("Correlation surface isn't finite"));
		}
		// Every code period in the epoch correlates equally, so only the phase within one period is observable
		let mut raw = self.detector.detect(&surface)?;
		raw.code_delay %= self.samples_per_code();

		let est = self.estimator.update(&raw);
		debug!("PRN {:02}: epoch {} raw ({}, {:.1} [Hz], {:.4}, {:.2}) smoothed ({:.1}, {:.1} [Hz], {:.4})", prn, epoch_idx,
			raw.code_delay, raw.doppler_hz, raw.peak_magnitude, raw.confidence, est.code_delay, est.doppler_hz, est.peak_magnitude);

		Ok(EpochOutcome::Result(AcquisitionResult{
			prn,
			epoch_idx,
			sample_idx:     epoch.sample_idx,
			code_delay:     est.code_delay_samples(self.samples_per_code()),
			doppler_hz:     est.doppler_hz,
			peak_magnitude: est.peak_magnitude,
			confidence:     raw.confidence,
			raw,
		}))
	}

}
