
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

use crate::{DigSigProcErr as DSPErr};
use crate::gnss::gps_l1_ca::signal_modulation::CodeReplica;
use crate::io::SampleSource;
use super::{Acquisition, AcquisitionConfig, EpochOutcome};
use super::sink::ResultSink;
use super::smoothing::Estimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
	Idle,
	Running,
	Stopped,
}

/// Requests a stop from outside the thread driving the engine.  The request is honored
/// before the next epoch is pulled, never in the middle of one.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
	pub fn stop(&self) { self.0.store(true, Ordering::SeqCst); }
	pub fn is_stop_requested(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
	pub epochs:usize,
	pub results:usize,
	pub anomalies:usize,
}

/// Owns one acquisition run over one sample source
pub struct AcquisitionEngine<S: SampleSource> {
	config:AcquisitionConfig,
	replica:Option<Arc<CodeReplica>>,
	source:S,
	state:EngineState,
	acq:Option<Acquisition>,
	stop:StopHandle,
	summary:RunSummary,
}

impl<S: SampleSource> AcquisitionEngine<S> {

	pub fn new(config:AcquisitionConfig, source:S) -> Self {
		Self{ config, replica: None, source, state: EngineState::Idle, acq: None, stop: StopHandle::default(), summary: RunSummary::default() }
	}

	/// Uses an existing replica instead of generating one at start
	pub fn with_replica(config:AcquisitionConfig, source:S, replica:Arc<CodeReplica>) -> Self {
		Self{ replica: Some(replica), ..Self::new(config, source) }
	}

	pub fn state(&self) -> EngineState { self.state }
	pub fn config(&self) -> &AcquisitionConfig { &self.config }
	pub fn summary(&self) -> RunSummary { self.summary }
	pub fn stop_handle(&self) -> StopHandle { self.stop.clone() }
	pub fn estimate(&self) -> Option<Estimate> { self.acq.as_ref().and_then(|acq| acq.estimate()) }

	/// Validates the configuration and builds the pipeline.  On failure the engine stays idle.
	pub fn start(&mut self) -> Result<(), DSPErr> {
		if self.state != EngineState::Idle {
			return Err(DSPErr::InvalidState("Engine can only be started once"));
		}

		let acq = match &self.replica {
			Some(replica) => Acquisition::with_replica(self.config.clone(), replica.clone())?,
			None          => Acquisition::new(self.config.clone())?,
		};

		info!("PRN {:02}: acquisition running, {} samples per epoch, {} Doppler bins from {} to {} [Hz]", acq.prn(), acq.epoch_len(),
			acq.bins().len(), -acq.bins().range_hz(), acq.bins().range_hz());

		self.acq = Some(acq);
		self.state = EngineState::Running;
		Ok(())
	}

	pub fn stop(&mut self) {
		self.stop.stop();
		self.transition_to_stopped("stop requested");
	}

	fn transition_to_stopped(&mut self, why:&str) {
		if self.state != EngineState::Stopped {
			info!("PRN {:02}: acquisition stopped ({}) after {} epochs, {} anomalies", self.config.satellite_id, why,
				self.summary.epochs, self.summary.anomalies);
			self.state = EngineState::Stopped;
		}
	}

	/// Pulls and processes one epoch.  `Ok(None)` means the engine has stopped, either
	/// because the source ran out or because a stop was requested.
	pub fn next_outcome(&mut self) -> Result<Option<EpochOutcome>, DSPErr> {
		match self.state {
			EngineState::Idle    => return Err(DSPErr::InvalidState("Engine hasn't been started")),
			EngineState::Stopped => return Ok(None),
			EngineState::Running => (),
		}

		if self.stop.is_stop_requested() {
			self.transition_to_stopped("stop requested");
			return Ok(None);
		}

		let outcome:Result<Option<EpochOutcome>, DSPErr> = match self.acq.as_mut() {
			Some(acq) => match self.source.next_epoch(acq.epoch_len()) {
				Ok(Some(epoch)) => acq.process_epoch(&epoch).map(Some),
				Ok(None)        => Ok(None),
				Err(e)          => Err(e),
			},
			None => Err(DSPErr::InvalidState("Running without an acquisition pipeline")),
		};

		match outcome {
			Ok(Some(o)) => {
				self.summary.epochs += 1;
				match o {
					EpochOutcome::Result(_)     => self.summary.results += 1,
					EpochOutcome::Anomaly{ .. } => self.summary.anomalies += 1,
				}
				Ok(Some(o))
			},
			Ok(None) => {
				self.transition_to_stopped("sample source exhausted");
				Ok(None)
			},
			Err(e) => {
				self.transition_to_stopped("fatal error");
				Err(e)
			}
		}
	}

	/// Starts the engine if needed and drives it until it stops, handing every result to `sink`
	pub fn run(&mut self, sink:&mut dyn ResultSink) -> Result<RunSummary, DSPErr> {
		if self.state == EngineState::Idle {
			self.start()?;
		}

		while let Some(outcome) = self.next_outcome()? {
			if let EpochOutcome::Result(result) = outcome {
				sink.emit(&result)?;
			}
		}

		Ok(self.summary)
	}

}

/// An engine running on the tokio runtime.  Outcomes arrive on `rx_output`, which holds at
/// most one pending outcome, so a slow consumer holds the engine back instead of letting
/// results queue up.
pub struct EngineTask {
	pub rx_output:mpsc::Receiver<EpochOutcome>,
	pub stop:StopHandle,
	pub handle:JoinHandle<Result<RunSummary, DSPErr>>,
}

/// Each epoch is pulled and searched on the blocking pool, so the runtime's own threads stay
/// free for other tasks while the correlation runs
pub fn spawn<S: 'static + SampleSource + Send>(engine:AcquisitionEngine<S>) -> EngineTask {

	let (mut tx_output, rx_output) = mpsc::channel::<EpochOutcome>(1);
	let stop = engine.stop_handle();

	let handle:JoinHandle<Result<RunSummary, DSPErr>> = tokio::spawn(async move {

		let mut owned_engine = engine;
		if owned_engine.state() == EngineState::Idle {
			owned_engine.start()?;
		}

		loop {
			let (returned_engine, step) = task::spawn_blocking(move || {
				let mut eng = owned_engine;
				let step = eng.next_outcome();
				(eng, step)
			}).await.map_err(|_| DSPErr::Other("Engine step failed to complete"))?;
			owned_engine = returned_engine;

			match step? {
				Some(outcome) => if tx_output.send(outcome).await.is_err() {
					// Nobody's listening anymore
					owned_engine.stop();
				},
				None => break
			}
		}

		Ok::<RunSummary, DSPErr>(owned_engine.summary())
	});

	EngineTask{ rx_output, stop, handle }
}

impl EngineTask {

	/// Asks the engine to stop, drains anything still pending and waits for the task
	pub async fn shutdown(self) -> Result<RunSummary, DSPErr> {
		let EngineTask{ mut rx_output, stop, handle } = self;

		stop.stop();
		while rx_output.recv().await.is_some() {}

		handle.await.map_err(|_| DSPErr::Other("Engine task failed to complete"))?
	}

}
