
use std::sync::Arc;

use log::{debug, info};
use rustfft::num_complex::Complex;

use crate::{DigSigProcErr as DSPErr, Sample};
use crate::block::{BlockFunctionality, BlockResult};
use crate::gnss::gps_l1_ca::signal_modulation::CodeReplica;
use crate::io::Epoch;
use super::{Acquisition, AcquisitionConfig, EpochOutcome};
use super::engine::EngineState;
use super::smoothing::Estimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineControl {
	Status,
	Stop,
}

/// Push-style host for the acquisition pipeline.  Samples arrive one at a time; once a
/// full epoch has been collected it's searched and the outcome comes back as `Ready`.
pub struct AcquisitionBlock {
	acq:Acquisition,
	state:EngineState,
	buffer:Vec<Complex<f64>>,
	buffer_start_idx:usize,
	last_idx:Option<usize>,
}

impl AcquisitionBlock {

	pub fn new(config:AcquisitionConfig) -> Result<Self, DSPErr> {
		Ok(Self::from_acquisition(Acquisition::new(config)?))
	}

	pub fn with_replica(config:AcquisitionConfig, replica:Arc<CodeReplica>) -> Result<Self, DSPErr> {
		Ok(Self::from_acquisition(Acquisition::with_replica(config, replica)?))
	}

	fn from_acquisition(acq:Acquisition) -> Self {
		info!("PRN {:02}: streaming acquisition running, {} samples per epoch", acq.prn(), acq.epoch_len());
		let buffer = Vec::with_capacity(acq.epoch_len());
		Self{ acq, state: EngineState::Running, buffer, buffer_start_idx: 0, last_idx: None }
	}

	pub fn prn(&self) -> usize { self.acq.prn() }
	pub fn state(&self) -> EngineState { self.state }
	pub fn estimate(&self) -> Option<Estimate> { self.acq.estimate() }

}

impl BlockFunctionality<EngineControl, EngineState, Sample, EpochOutcome> for AcquisitionBlock {

	fn control(&mut self, control:&EngineControl) -> Result<EngineState, DSPErr> {
		match control {
			EngineControl::Status => (),
			EngineControl::Stop   => if self.state != EngineState::Stopped {
				info!("PRN {:02}: streaming acquisition stopped after {} epochs", self.acq.prn(), self.acq.epochs_seen());
				self.buffer.clear();
				self.state = EngineState::Stopped;
			}
		}
		Ok(self.state)
	}

	fn apply(&mut self, s:&Sample) -> BlockResult<EpochOutcome> {
		if self.state != EngineState::Running { return BlockResult::NotReady; }

		match self.last_idx {
			// Repeated or out-of-order samples are dropped
			Some(last) if s.idx <= last => return BlockResult::NotReady,
			Some(last) if s.idx > last + 1 && !self.buffer.is_empty() => {
				debug!("PRN {:02}: gap in sample stream from {} to {}, restarting epoch", self.acq.prn(), last, s.idx);
				self.buffer.clear();
			},
			_ => ()
		}
		self.last_idx = Some(s.idx);

		if self.buffer.is_empty() { self.buffer_start_idx = s.idx; }
		self.buffer.push(s.val);

		if self.buffer.len() < self.acq.epoch_len() { return BlockResult::NotReady; }

		let epoch = Epoch{ sample_idx: self.buffer_start_idx, samples: self.buffer.split_off(0) };
		match self.acq.process_epoch(&epoch) {
			Ok(outcome) => BlockResult::Ready(outcome),
			Err(e)      => BlockResult::Err(e),
		}
	}

}
