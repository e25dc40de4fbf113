
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use super::engine::{self, AcquisitionEngine, EngineState};
use super::sink::SeriesSink;
use super::streaming::{AcquisitionBlock, EngineControl};
use crate::Sample;
use crate::block::{BlockFunctionality, BlockResult};
use crate::block::fan_out::FanOut;
use crate::gnss::gps_l1_ca::signal_modulation::ReplicaCache;
use crate::io::{BufferedSource, EpochReader, SampleFormat, SampleSource};
use crate::io::synthetic::{SimulationParams, SyntheticSource};

fn config(sample_rate_hz:f64, satellite_id:usize, doppler_search_range_khz:f64, smoothing_alpha:f64) -> AcquisitionConfig {
	AcquisitionConfig{ sample_rate_hz, satellite_id, doppler_search_range_khz, smoothing_alpha, worker_threads: Some(2), ..AcquisitionConfig::default() }
}

fn reader(params:&SimulationParams) -> EpochReader<SyntheticSource> {
	EpochReader::new(SyntheticSource::new(params).unwrap())
}

fn epochs(params:&SimulationParams, len:usize) -> Vec<Epoch> {
	let mut src = reader(params);
	let mut ans = vec![];
	while let Some(epoch) = src.next_epoch(len).unwrap() {
		ans.push(epoch);
	}
	ans
}

#[test]
fn noiseless_signal_gives_exact_delay() {
	let params = SimulationParams{ prn: 5, fs: 4.0e6, code_shift_samples: 1234, doppler_hz: 2300.0, snr_db: None, code_periods: 2, seed: 0 };
	let mut eng = AcquisitionEngine::new(config(4.0e6, 5, 5.0, 1.0), reader(&params));
	let mut results:Vec<AcquisitionResult> = vec![];

	let summary = eng.run(&mut results).unwrap();
	assert_eq!(summary, engine::RunSummary{ epochs: 2, results: 2, anomalies: 0 });
	assert_eq!(eng.state(), EngineState::Stopped);

	for r in results.iter() {
		assert_eq!(r.code_delay, 1234);
		assert_eq!(r.raw.code_delay, 1234);
		assert!((r.doppler_hz - 2300.0).abs() <= 500.0, "Doppler was {}", r.doppler_hz);
		assert!(r.confidence > 10.0);
	}
}

#[test]
fn multi_period_epochs_narrow_the_doppler_step() {
	let cfg = AcquisitionConfig{ code_periods_per_epoch: 4, ..config(4.0e6, 5, 1.0, 1.0) };
	assert!((cfg.coherent_integration_sec() - 4.0e-3).abs() < 1e-12);
	assert_eq!(cfg.doppler_step_hz(), 125.0);

	// 250 Hz sits halfway between bins of a 500 Hz grid, where a 4 ms integration sees nothing
	let params = SimulationParams{ prn: 5, fs: 4.0e6, code_shift_samples: 1234, doppler_hz: 250.0, snr_db: None, code_periods: 8, seed: 0 };
	let mut eng = AcquisitionEngine::new(cfg, reader(&params));
	let mut results:Vec<AcquisitionResult> = vec![];

	let summary = eng.run(&mut results).unwrap();
	assert_eq!(summary, engine::RunSummary{ epochs: 2, results: 2, anomalies: 0 });
	for r in results.iter() {
		assert_eq!(r.code_delay, 1234);
		assert_eq!(r.raw.code_delay, 1234);
		assert_eq!(r.doppler_hz, 250.0);
		assert!(r.peak_magnitude > 0.9, "Peak was {}", r.peak_magnitude);
	}
}

#[test]
fn delay_at_the_code_boundary_converges() {
	let params = SimulationParams{ prn: 6, fs: 4.0e6, code_shift_samples: 1, doppler_hz: 0.0, snr_db: Some(-5.0), code_periods: 20, seed: 11 };
	let mut eng = AcquisitionEngine::new(config(4.0e6, 6, 1.0, 0.3), reader(&params));
	let mut series = SeriesSink::new();
	eng.run(&mut series).unwrap();

	for delay in series.code_delay_samples.iter() {
		assert!(*delay <= 3 || *delay >= 3998, "Delay wandered to {}", delay);
	}
}

#[test]
fn converges_on_noisy_reference_scenario() {
	let params = SimulationParams::default();
	let mut eng = AcquisitionEngine::new(config(4.0e6, 1, 5.0, 0.05), reader(&params));
	let mut series = SeriesSink::new();

	let summary = eng.run(&mut series).unwrap();
	assert_eq!(summary.epochs, 40);
	assert_eq!(summary.anomalies, 0);
	assert_eq!(series.len(), 40);

	let last = series.len() - 1;
	assert!((series.code_delay_samples[last] as i64 - 200).abs() <= 2, "Delay was {}", series.code_delay_samples[last]);
	assert!((series.doppler_hz[last] - 3000.0).abs() <= 500.0, "Doppler was {}", series.doppler_hz[last]);

	let est = eng.estimate().unwrap();
	assert!((est.code_delay - 200.0).abs() <= 2.0);
	assert!(est.peak_magnitude > 0.0 && est.peak_magnitude <= 1.0);
}

#[test]
fn lower_snr_never_raises_the_peak() {
	let mut last_peak = std::f64::INFINITY;
	for snr_db in &[10.0, 0.0, -10.0, -20.0] {
		let params = SimulationParams{ prn: 12, fs: 4.0e6, code_shift_samples: 3100, doppler_hz: 0.0, snr_db: Some(*snr_db), code_periods: 1, seed: 42 };
		let mut acq = Acquisition::new(config(4.0e6, 12, 1.0, 1.0)).unwrap();

		let peak = match acq.process_epoch(&epochs(&params, 4000)[0]).unwrap() {
			EpochOutcome::Result(r) => r.raw.peak_magnitude,
			other => panic!("Unexpected outcome {:?}", other)
		};
		assert!(peak <= last_peak, "Peak rose from {} to {} at {} [dB]", last_peak, peak, snr_db);
		last_peak = peak;
	}
}

#[test]
fn zero_search_range_keeps_full_delay_axis() {
	let acq = Acquisition::new(config(4.0e6, 1, 0.0, 1.0)).unwrap();
	assert_eq!(acq.bins().freqs(), &[0.0]);
	assert_eq!(acq.epoch_len(), 4000);

	let params = SimulationParams{ prn: 1, fs: 4.0e6, code_shift_samples: 17, doppler_hz: 0.0, snr_db: None, code_periods: 1, seed: 0 };
	let surface = correlation::CorrelationSearch::new(acq.replica(), Some(1)).unwrap()
		.search(&epochs(&params, 4000)[0].samples, acq.bins()).unwrap();
	assert_eq!(surface.doppler_len(), 1);
	assert_eq!(surface.delay_len(), 4000);
}

#[test]
fn anomalous_epochs_leave_the_estimate_alone() {
	let params = SimulationParams{ prn: 2, fs: 2.046e6, code_shift_samples: 700, doppler_hz: -500.0, snr_db: None, code_periods: 2, seed: 0 };
	let good = epochs(&params, 2046);
	let mut acq = Acquisition::new(config(2.046e6, 2, 1.0, 0.5)).unwrap();

	assert!(match acq.process_epoch(&good[0]).unwrap() { EpochOutcome::Result(_) => true, _ => false });
	let before = acq.estimate().unwrap();

	let mut nan = good[1].clone();
	nan.samples[10].re = std::f64::NAN;
	let zero = Epoch{ sample_idx: 0, samples: vec![Complex{ re: 0.0, im: 0.0 }; 2046] };
	let infinite = Epoch{ sample_idx: 0, samples: vec![Complex{ re: std::f64::INFINITY, im: 0.0 }; 2046] };

	for bad in &[nan, zero, infinite] {
		match acq.process_epoch(bad).unwrap() {
			EpochOutcome::Anomaly{ prn, .. } => assert_eq!(prn, 2),
			other => panic!("Expected an anomaly, got {:?}", other)
		}
		assert_eq!(acq.estimate(), Some(before));
	}

	// The run carries on afterwards
	match acq.process_epoch(&good[1]).unwrap() {
		EpochOutcome::Result(r) => {
			assert_eq!(r.epoch_idx, 4);
			assert_eq!(r.code_delay, 700);
		},
		other => panic!("Expected a result, got {:?}", other)
	}
}

#[test]
fn engine_counts_anomalies_and_keeps_running() {
	let params = SimulationParams{ prn: 2, fs: 2.046e6, code_shift_samples: 700, doppler_hz: 0.0, snr_db: None, code_periods: 2, seed: 0 };
	let mut samples:Vec<Sample> = SyntheticSource::new(&params).unwrap().collect();
	for s in samples[..2046].iter_mut() {
		s.val = Complex{ re: 0.0, im: 0.0 };
	}

	let mut eng = AcquisitionEngine::new(config(2.046e6, 2, 1.0, 1.0), EpochReader::new(samples.into_iter()));
	let mut series = SeriesSink::new();
	let summary = eng.run(&mut series).unwrap();

	assert_eq!(summary, engine::RunSummary{ epochs: 2, results: 1, anomalies: 1 });
	assert_eq!(series.code_delay_samples, vec![700]);
}

#[test]
fn length_mismatch_is_fatal() {
	let mut acq = Acquisition::new(config(2.046e6, 2, 0.0, 1.0)).unwrap();
	let short = Epoch{ sample_idx: 0, samples: vec![Complex{ re: 1.0, im: 0.0 }; 100] };
	assert_eq!(acq.process_epoch(&short), Err(DSPErr::LengthMismatch{ expected: 2046, found: 100 }));
}

#[test]
fn stop_request_halts_between_epochs() {
	let params = SimulationParams{ prn: 9, fs: 2.046e6, code_shift_samples: 3, doppler_hz: 0.0, snr_db: None, code_periods: 10, seed: 0 };
	let mut eng = AcquisitionEngine::new(config(2.046e6, 9, 0.0, 1.0), reader(&params));
	eng.start().unwrap();
	assert_eq!(eng.state(), EngineState::Running);

	assert!(eng.next_outcome().unwrap().is_some());
	assert!(eng.next_outcome().unwrap().is_some());

	eng.stop_handle().stop();
	assert!(eng.next_outcome().unwrap().is_none());
	assert_eq!(eng.state(), EngineState::Stopped);
	assert_eq!(eng.summary().epochs, 2);

	// Stopped is terminal
	assert!(eng.next_outcome().unwrap().is_none());
	assert!(eng.start().is_err());
}

#[test]
fn bad_configuration_keeps_engine_idle() {
	let params = SimulationParams{ code_periods: 1, ..SimulationParams::default() };

	for bad in vec![
		config(4.0e6, 0, 5.0, 0.05),
		config(4.0e6, 33, 5.0, 0.05),
		config(4.0e6, 1, 5.0, 0.0),
		config(4.0e6, 1, 5.0, 1.5),
		config(4.0e6, 1, -1.0, 0.05),
		config(-4.0e6, 1, 5.0, 0.05),
		config(4.0e6, 1, 2500.0, 0.05),
		AcquisitionConfig{ doppler_bin_step_hz: Some(0.0), ..config(4.0e6, 1, 5.0, 0.05) },
		AcquisitionConfig{ doppler_bin_step_hz: Some(1.0e-6), ..config(4.0e6, 1, 5.0, 0.05) },
		AcquisitionConfig{ doppler_bin_step_hz: Some(500.0), code_periods_per_epoch: 4, ..config(4.0e6, 1, 5.0, 0.05) },
		AcquisitionConfig{ worker_threads: Some(0), ..config(4.0e6, 1, 5.0, 0.05) },
	] {
		let mut eng = AcquisitionEngine::new(bad.clone(), reader(&params));
		assert!(eng.start().is_err(), "Accepted {:?}", bad);
		assert_eq!(eng.state(), EngineState::Idle);
		match eng.next_outcome() {
			Err(DSPErr::InvalidState(_)) => (),
			other => panic!("Expected InvalidState, got {:?}", other)
		}
	}
}

#[test]
fn config_loads_from_json() {
	let json = r#"{ "sample_rate_hz": 2046000.0, "satellite_id": 14, "smoothing_alpha": 0.1, "doppler_search_range_khz": 7.0 }"#;
	let cfg = AcquisitionConfig::from_reader(json.as_bytes()).unwrap();
	assert_eq!(cfg.satellite_id, 14);
	assert_eq!(cfg.doppler_bin_step_hz, None);
	assert_eq!(cfg.doppler_step_hz(), 500.0);
	assert_eq!(cfg.code_periods_per_epoch, 1);
	assert_eq!(cfg.epoch_len(), Ok(2046));
	assert!(cfg.validate().is_ok());

	assert!(AcquisitionConfig::from_reader("not json".as_bytes()).is_err());
}

#[test]
fn several_prns_share_one_stream() {
	let params = SimulationParams{ prn: 3, fs: 2.046e6, code_shift_samples: 500, doppler_hz: -1000.0, snr_db: None, code_periods: 2, seed: 0 };
	let mut cache = ReplicaCache::new();

	let blocks:Vec<AcquisitionBlock> = [3, 9, 17].iter().map(|prn| {
		let cfg = config(2.046e6, *prn, 1.0, 1.0);
		let replica = cache.get(*prn, cfg.sample_rate_hz, cfg.code_periods_per_epoch).unwrap();
		AcquisitionBlock::with_replica(cfg, replica).unwrap()
	}).collect();
	let mut fan:FanOut<EngineControl, EngineState, Sample, EpochOutcome, AcquisitionBlock> = FanOut::from_iter(blocks.into_iter());
	assert_eq!(cache.len(), 3);

	let mut merged:Vec<Vec<EpochOutcome>> = vec![];
	for s in SyntheticSource::new(&params).unwrap() {
		match fan.apply(&s) {
			BlockResult::Ready(v) => merged.push(v),
			BlockResult::NotReady => (),
			BlockResult::Err(e)   => panic!("Fan-out failed: {:?}", e)
		}
	}
	assert_eq!(merged.len(), 2);

	for outcomes in merged.iter() {
		let results:Vec<AcquisitionResult> = outcomes.iter().filter_map(|o| match o {
			EpochOutcome::Result(r) => Some(*r),
			_ => None
		}).collect();
		assert_eq!(results.iter().map(|r| r.prn).collect::<Vec<usize>>(), vec![3, 9, 17]);

		assert_eq!(results[0].code_delay, 500);
		assert_eq!(results[0].doppler_hz, -1000.0);
		assert!(results[0].peak_magnitude > 0.9);
		assert!(results[1].peak_magnitude < 0.3);
		assert!(results[2].peak_magnitude < 0.3);
	}

	assert_eq!(fan.control(&EngineControl::Stop), Ok(vec![EngineState::Stopped; 3]));
}

#[test]
fn read_failure_stops_the_run_with_an_error() {
	struct FailingReader { data:Vec<u8>, pos:usize }

	impl std::io::Read for FailingReader {
		fn read(&mut self, buf:&mut [u8]) -> std::io::Result<usize> {
			if self.pos >= self.data.len() {
				return Err(std::io::Error::new(std::io::ErrorKind::Other, "device went away"));
			}
			let n = buf.len().min(self.data.len() - self.pos);
			buf[..n].copy_from_slice(&self.data[self.pos..(self.pos + n)]);
			self.pos += n;
			Ok(n)
		}
	}

	// Two epochs of f32 IQ, then the reader fails
	let params = SimulationParams{ prn: 8, fs: 2.046e6, code_shift_samples: 77, doppler_hz: 0.0, snr_db: None, code_periods: 2, seed: 0 };
	let mut data:Vec<u8> = vec![];
	for s in SyntheticSource::new(&params).unwrap() {
		data.extend_from_slice(&(s.val.re as f32).to_le_bytes());
		data.extend_from_slice(&(s.val.im as f32).to_le_bytes());
	}
	let src = BufferedSource::new(FailingReader{ data, pos: 0 }, SampleFormat::F32);

	let mut eng = AcquisitionEngine::new(config(2.046e6, 8, 0.0, 1.0), src);
	let mut results:Vec<AcquisitionResult> = vec![];
	assert_eq!(eng.run(&mut results), Err(DSPErr::Io("Sample read failed")));
	assert_eq!(eng.state(), EngineState::Stopped);
	assert_eq!(eng.summary().epochs, 2);
	assert_eq!(results.len(), 2);
	assert_eq!(results[1].code_delay, 77);
}

struct CountingSource<S: SampleSource> {
	inner:S,
	pulled:Arc<AtomicUsize>,
}

impl<S: SampleSource> SampleSource for CountingSource<S> {
	fn next_epoch(&mut self, len:usize) -> Result<Option<Epoch>, DSPErr> {
		let ans = self.inner.next_epoch(len)?;
		if ans.is_some() { self.pulled.fetch_add(1, Ordering::SeqCst); }
		Ok(ans)
	}
}

#[tokio::test(threaded_scheduler)]
async fn async_runner_holds_at_most_one_pending_result() {
	let params = SimulationParams{ prn: 4, fs: 2.046e6, code_shift_samples: 1000, doppler_hz: 0.0, snr_db: None, code_periods: 5, seed: 0 };
	let pulled = Arc::new(AtomicUsize::new(0));
	let src = CountingSource{ inner: reader(&params), pulled: pulled.clone() };

	let mut task = engine::spawn(AcquisitionEngine::new(config(2.046e6, 4, 0.0, 1.0), src));

	// One result waits in the channel and the engine blocks on the next one
	tokio::time::delay_for(Duration::from_millis(300)).await;
	assert!(pulled.load(Ordering::SeqCst) <= 2, "Pulled {} epochs with nobody listening", pulled.load(Ordering::SeqCst));

	let mut delays:Vec<usize> = vec![];
	while let Some(outcome) = task.rx_output.recv().await {
		if let EpochOutcome::Result(r) = outcome { delays.push(r.code_delay); }
	}
	assert_eq!(delays, vec![1000; 5]);

	let summary = task.handle.await.unwrap().unwrap();
	assert_eq!(summary.results, 5);
	assert_eq!(pulled.load(Ordering::SeqCst), 5);
}

#[tokio::test(threaded_scheduler)]
async fn async_runner_shuts_down_early() {
	let params = SimulationParams{ prn: 4, fs: 2.046e6, code_shift_samples: 1000, doppler_hz: 0.0, snr_db: None, code_periods: 50, seed: 0 };
	let mut task = engine::spawn(AcquisitionEngine::new(config(2.046e6, 4, 0.0, 1.0), reader(&params)));

	assert!(task.rx_output.recv().await.is_some());
	let summary = task.shutdown().await.unwrap();
	assert!(summary.epochs >= 1 && summary.epochs < 50, "Processed {} epochs", summary.epochs);
}

#[tokio::test]
async fn async_runner_works_on_a_single_threaded_runtime() {
	let params = SimulationParams{ prn: 4, fs: 2.046e6, code_shift_samples: 900, doppler_hz: 0.0, snr_db: None, code_periods: 6, seed: 0 };
	let mut task = engine::spawn(AcquisitionEngine::new(config(2.046e6, 4, 1.0, 1.0), reader(&params)));

	// The runtime's only thread keeps running other tasks while epochs are searched
	let ticker = tokio::spawn(async {
		for _ in 0..3 {
			tokio::time::delay_for(Duration::from_millis(1)).await;
		}
		true
	});
	assert!(ticker.await.unwrap());

	let mut count:usize = 0;
	while let Some(outcome) = task.rx_output.recv().await {
		if let EpochOutcome::Result(r) = outcome {
			assert_eq!(r.code_delay, 900);
			count += 1;
		}
	}
	assert_eq!(count, 6);
	assert_eq!(task.handle.await.unwrap().unwrap().epochs, 6);
}
