
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;

use clap::{Arg, App, ArgMatches};
use colored::*;
use env_logger::Env;
use l1_acquisition::Sample;
use l1_acquisition::block::{BlockFunctionality, BlockResult};
use l1_acquisition::block::fan_out::FanOut;
use l1_acquisition::gnss::acquisition::{AcquisitionConfig, AcquisitionResult, DetectionPolicy, EpochOutcome};
use l1_acquisition::gnss::acquisition::engine::{AcquisitionEngine, EngineState, StopHandle};
use l1_acquisition::gnss::acquisition::sink::{ResultSink, SeriesSink};
use l1_acquisition::gnss::acquisition::streaming::{AcquisitionBlock, EngineControl};
use l1_acquisition::gnss::gps_l1_ca::signal_modulation::ReplicaCache;
use l1_acquisition::io::{BufferedSource, EpochReader, SampleFormat, SampleSource};
use l1_acquisition::io::synthetic::{SimulationParams, SyntheticSource};

fn parse_opt<T: std::str::FromStr>(matches:&ArgMatches, name:&str, err:&'static str) -> Result<Option<T>, &'static str> {
	match matches.value_of(name) {
		Some(s) => s.parse().map(Some).map_err(|_| err),
		None    => Ok(None),
	}
}

fn report(outcome:&EpochOutcome, fs:f64, policy:&DetectionPolicy, sinks:&mut BTreeMap<usize, SeriesSink>) -> Result<(), &'static str> {
	match outcome {
		EpochOutcome::Result(result) => {
			let time:f64 = result.sample_idx as f64 / fs;
			let result_str = format_result(result);
			if policy.is_detection(result) {
				eprintln!("{:6.3} [sec], PRN {:02} {}", time, result.prn, result_str.green());
			} else {
				eprintln!("{:6.3} [sec], PRN {:02} {}", time, result.prn, result_str.yellow());
			}

			sinks.entry(result.prn).or_insert_with(SeriesSink::new).emit(result).map_err(|_| "Unable to record result")
		},
		EpochOutcome::Anomaly{ prn, sample_idx, reason, .. } => {
			eprintln!("{:6.3} [sec], PRN {:02} {}", *sample_idx as f64 / fs, prn, reason.red());
			Ok(())
		}
	}
}

fn format_result(result:&AcquisitionResult) -> String {
	format!("{:6} [samples], {:9.2} [Hz], {:.6}, {:8.2}", result.code_delay, result.doppler_hz, result.peak_magnitude, result.confidence)
}

fn main() -> Result<(), &'static str> {

	env_logger::init_from_env(Env::default().filter_or("LOG_LEVEL", "info"));

	let matches = App::new("GPS L1 C/A Acquisition")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Takes IQ samples centered on 1575.42 MHz and produces smoothed code delay, Doppler, and peak magnitude for the L1 C/A signal")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename")
			.takes_value(true).conflicts_with("simulate"))
		.arg(Arg::with_name("input_type")
			.short("t").long("type")
			.help("Interleaved IQ sample type; defaults to f32")
			.takes_value(true)
			.possible_values(&["i16", "f32"]))
		.arg(Arg::with_name("skip")
			.long("skip")
			.help("Number of leading samples to discard")
			.takes_value(true))
		.arg(Arg::with_name("simulate")
			.long("simulate")
			.help("Use a simulated signal instead of a file"))
		.arg(Arg::with_name("sim_shift")
			.long("sim_shift")
			.help("Simulated code shift [samples]")
			.takes_value(true))
		.arg(Arg::with_name("sim_doppler_hz")
			.long("sim_doppler_hz")
			.takes_value(true))
		.arg(Arg::with_name("sim_snr_db")
			.long("sim_snr_db")
			.help("Simulated SNR [dB]; omit for a noiseless signal")
			.takes_value(true))
		.arg(Arg::with_name("sim_periods")
			.long("sim_periods")
			.help("Number of simulated code periods")
			.takes_value(true))
		.arg(Arg::with_name("sim_prn")
			.long("sim_prn")
			.takes_value(true))
		.arg(Arg::with_name("seed")
			.long("seed")
			.takes_value(true))
		.arg(Arg::with_name("sample_rate_sps")
			.short("s").long("sample_rate_sps")
			.takes_value(true))
		.arg(Arg::with_name("prn")
			.short("p").long("prn")
			.help("Satellite PRN; repeat to search several at once")
			.takes_value(true).multiple(true).number_of_values(1))
		.arg(Arg::with_name("alpha")
			.short("a").long("alpha")
			.help("Smoothing factor in (0, 1]")
			.takes_value(true))
		.arg(Arg::with_name("doppler_range_khz")
			.short("d").long("doppler_range_khz")
			.takes_value(true))
		.arg(Arg::with_name("doppler_step_hz")
			.long("doppler_step_hz")
			.takes_value(true))
		.arg(Arg::with_name("periods_per_epoch")
			.long("periods_per_epoch")
			.takes_value(true))
		.arg(Arg::with_name("worker_threads")
			.short("w").long("worker_threads")
			.takes_value(true))
		.arg(Arg::with_name("config")
			.short("c").long("config")
			.help("JSON acquisition configuration; command line arguments override its fields")
			.takes_value(true))
		.arg(Arg::with_name("threshold")
			.long("threshold")
			.help("Confidence above which a result counts as a detection")
			.takes_value(true))
		.get_matches();

	// Build the configuration, starting from a JSON file if there is one
	let mut config:AcquisitionConfig = match matches.value_of("config") {
		Some(fname) => {
			let file = File::open(fname).map_err(|_| "Unable to open configuration file")?;
			AcquisitionConfig::from_reader(BufReader::new(file)).map_err(|_| "Unable to parse configuration file")?
		},
		None => AcquisitionConfig::default()
	};
	if let Some(fs) = parse_opt(&matches, "sample_rate_sps", "Unable to parse sample rate as an f64")? { config.sample_rate_hz = fs; }
	if let Some(alpha) = parse_opt(&matches, "alpha", "Unable to parse smoothing factor")? { config.smoothing_alpha = alpha; }
	if let Some(range) = parse_opt(&matches, "doppler_range_khz", "Unable to parse Doppler range")? { config.doppler_search_range_khz = range; }
	if let Some(step) = parse_opt(&matches, "doppler_step_hz", "Unable to parse Doppler step")? { config.doppler_bin_step_hz = Some(step); }
	if let Some(periods) = parse_opt(&matches, "periods_per_epoch", "Unable to parse code periods per epoch")? { config.code_periods_per_epoch = periods; }
	if let Some(n) = parse_opt(&matches, "worker_threads", "Unable to parse worker thread count")? { config.worker_threads = Some(n); }

	let prns:Vec<usize> = match matches.values_of("prn") {
		Some(values) => values.map(|s| s.parse().map_err(|_| "Unable to parse PRN")).collect::<Result<Vec<usize>, &'static str>>()?,
		None => vec![config.satellite_id]
	};
	config.satellite_id = prns[0];

	let fs:f64 = config.sample_rate_hz;
	let policy = DetectionPolicy::new(parse_opt(&matches, "threshold", "Unable to parse threshold")?.unwrap_or(10.0));

	// Open the sample source
	let mut cache = ReplicaCache::new();
	let mut src:Box<dyn SampleSource + Send> = match (matches.value_of("filename"), matches.is_present("simulate")) {
		(Some(fname), _) => {
			let format:SampleFormat = parse_opt(&matches, "input_type", "Unable to parse input type")?.unwrap_or_default();
			let skip:usize = parse_opt(&matches, "skip", "Unable to parse number of samples to skip")?.unwrap_or(0);
			eprintln!("Decoding {} at {} [samples/sec], skipping {} samples", &fname, &fs, skip);
			Box::new(BufferedSource::open(fname, format, skip).map_err(|_| "Unable to open input file")?)
		},
		(None, true) => {
			let defaults = SimulationParams::default();
			let params = SimulationParams {
				prn:                parse_opt(&matches, "sim_prn", "Unable to parse simulated PRN")?.unwrap_or(prns[0]),
				fs,
				code_shift_samples: parse_opt(&matches, "sim_shift", "Unable to parse simulated code shift")?.unwrap_or(defaults.code_shift_samples),
				doppler_hz:         parse_opt(&matches, "sim_doppler_hz", "Unable to parse simulated Doppler")?.unwrap_or(defaults.doppler_hz),
				snr_db:             parse_opt(&matches, "sim_snr_db", "Unable to parse simulated SNR")?,
				code_periods:       parse_opt(&matches, "sim_periods", "Unable to parse number of simulated code periods")?.unwrap_or(defaults.code_periods),
				seed:               parse_opt(&matches, "seed", "Unable to parse seed")?.unwrap_or(defaults.seed),
			};
			eprintln!("Simulating PRN {:02} at {} [samples/sec]: {} [samples] shift, {} [Hz] Doppler, {:?} [dB] SNR", params.prn, &fs,
				params.code_shift_samples, params.doppler_hz, params.snr_db);
			let replica = cache.get(params.prn, fs, 1).map_err(|_| "Unable to generate simulated signal")?;
			Box::new(EpochReader::new(SyntheticSource::from_replica(&params, &replica).map_err(|_| "Unable to set up simulated signal")?))
		},
		(None, false) => return Err("Provide either an input filename or --simulate")
	};

	let stop = StopHandle::default();
	let mut sinks:BTreeMap<usize, SeriesSink> = BTreeMap::new();

	if prns.len() == 1 {
		let replica = cache.get(config.satellite_id, fs, config.code_periods_per_epoch).map_err(|_| "Invalid acquisition configuration")?;
		let mut engine = AcquisitionEngine::with_replica(config, src, replica);

		let engine_stop = engine.stop_handle();
		ctrlc::set_handler(move || engine_stop.stop()).map_err(|_| "Unable to set Ctrl-C handler")?;

		engine.start().map_err(|_| "Invalid acquisition configuration")?;
		while let Some(outcome) = engine.next_outcome().map_err(|_| "Acquisition failed")? {
			report(&outcome, fs, &policy, &mut sinks)?;
		}

		let summary = engine.summary();
		eprintln!("Processed {} epochs, {} anomalies", summary.epochs, summary.anomalies);

		// Output data in JSON format
		let series = sinks.remove(&prns[0]).unwrap_or_default();
		println!("{}", serde_json::to_string_pretty(&series).map_err(|_| "Unable to serialize results")?);
	} else {
		let blocks:Vec<AcquisitionBlock> = prns.iter().map(|prn| {
			let cfg = AcquisitionConfig{ satellite_id: *prn, ..config.clone() };
			let replica = cache.get(*prn, fs, cfg.code_periods_per_epoch)?;
			AcquisitionBlock::with_replica(cfg, replica)
		}).collect::<Result<Vec<AcquisitionBlock>, _>>().map_err(|_| "Invalid acquisition configuration")?;
		let mut fan:FanOut<EngineControl, EngineState, Sample, EpochOutcome, AcquisitionBlock> = FanOut::from_iter(blocks.into_iter());

		let handler_stop = stop.clone();
		ctrlc::set_handler(move || handler_stop.stop()).map_err(|_| "Unable to set Ctrl-C handler")?;

		let epoch_len:usize = config.epoch_len().map_err(|_| "Invalid acquisition configuration")?;
		'outer: while let Some(epoch) = src.next_epoch(epoch_len).map_err(|_| "Unable to read samples")? {
			if stop.is_stop_requested() {
				fan.control(&EngineControl::Stop).map_err(|_| "Unable to stop acquisition")?;
				break;
			}

			for (i, val) in epoch.samples.iter().enumerate() {
				match fan.apply(&Sample{ val: *val, idx: epoch.sample_idx + i }) {
					BlockResult::Ready(outcomes) => for outcome in outcomes.iter() {
						report(outcome, fs, &policy, &mut sinks)?;
					},
					BlockResult::NotReady => (),
					BlockResult::Err(e) => {
						eprintln!("{}", format!("Acquisition failed: {:?}", e).red());
						break 'outer;
					}
				}
			}
		}

		// Output data in JSON format
		println!("{}", serde_json::to_string_pretty(&sinks).map_err(|_| "Unable to serialize results")?);
	}

	Ok(())

}
