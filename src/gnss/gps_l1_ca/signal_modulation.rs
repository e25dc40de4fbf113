
use std::collections::HashMap;
use std::sync::Arc;

use rustfft::num_complex::Complex;

use crate::{DigSigProcErr as DSPErr};
use crate::gnss::constants::gps;

// G2 output taps for each PRN, given in IS-GPS-200K, Table 3-Ia (1-based register stages)
const G2_TAPS:[(usize, usize); 32] = [
	(2, 6),  (3, 7),  (4, 8),  (5, 9),  (1, 9),  (2, 10), (1, 8),  (2, 9),	// PRN 01-08
	(3, 10), (2, 3),  (3, 4),  (5, 6),  (6, 7),  (7, 8),  (8, 9),  (9, 10),	// PRN 09-16
	(1, 4),  (2, 5),  (3, 6),  (4, 7),  (5, 8),  (6, 9),  (1, 3),  (4, 6),	// PRN 17-24
	(5, 7),  (6, 8),  (7, 9),  (8, 10), (1, 6),  (2, 7),  (3, 8),  (4, 9),	// PRN 25-32
];

/// The 1023-chip C/A code for a PRN, with logic 0 mapped to +1 and logic 1 mapped to -1
pub fn prn_int(prn:usize) -> Result<Vec<i8>, DSPErr> {
	if prn < gps::MIN_PRN || prn > gps::MAX_PRN {
		return Err(DSPErr::InvalidConfiguration("PRN must be in the range 1 to 32"));
	}

	let (tap_a, tap_b) = G2_TAPS[prn - 1];

	// G1 = 1 + x^3 + x^10, G2 = 1 + x^2 + x^3 + x^6 + x^8 + x^9 + x^10, both start as all ones
	let mut g1 = [true; 10];
	let mut g2 = [true; 10];

	Ok((0..gps::CODE_LENGTH).map(|_| {
		let chip:bool = g1[9] ^ g2[tap_a - 1] ^ g2[tap_b - 1];

		let fb1:bool = g1[2] ^ g1[9];
		let fb2:bool = g2[1] ^ g2[2] ^ g2[5] ^ g2[7] ^ g2[8] ^ g2[9];
		g1.rotate_right(1);
		g2.rotate_right(1);
		g1[0] = fb1;
		g2[0] = fb2;

		if chip { -1 } else { 1 }
	}).collect())
}

/// Number of samples in one code period.  The code period has to land on a whole number
/// of samples or the replica wouldn't line up with an epoch.
pub fn samples_per_code(fs:f64) -> Result<usize, DSPErr> {
	if !(fs.is_finite() && fs > 0.0) {
		return Err(DSPErr::InvalidConfiguration("Sample rate must be positive and finite"));
	}

	let exact:f64 = fs * gps::CODE_PERIOD_SEC;
	let rounded:f64 = exact.round();
	if rounded < 1.0 {
		Err(DSPErr::InvalidConfiguration("Sample rate yields a zero-length epoch"))
	} else if (exact - rounded).abs() > 1.0e-6 {
		Err(DSPErr::InvalidConfiguration("Code period isn't a whole number of samples at this sample rate"))
	} else {
		Ok(rounded as usize)
	}
}

/// The C/A code resampled to `fs` and tiled over `code_periods` code periods
pub fn prn_int_sampled(prn:usize, fs:f64, code_periods:usize) -> Result<Vec<i8>, DSPErr> {
	if code_periods == 0 {
		return Err(DSPErr::InvalidConfiguration("An epoch needs at least one code period"));
	}

	let code = prn_int(prn)?;
	let samples_per_code:usize = samples_per_code(fs)?;

	let one_period:Vec<i8> = (0..samples_per_code).map(|i| {
		let code_value_idx:usize = (((i as f64) * gps::CHIP_RATE_HZ) / fs) as usize;
		if code_value_idx >= gps::CODE_LENGTH { code[gps::CODE_LENGTH-1] } else { code[code_value_idx] }
	}).collect();

	Ok((0..(samples_per_code * code_periods)).map(|i| one_period[i % samples_per_code]).collect())
}

/// Local code replica for one satellite, sampled and tiled to exactly one epoch
#[derive(Debug, Clone)]
pub struct CodeReplica {
	pub prn:usize,
	pub fs:f64,
	pub code_periods:usize,
	pub chips:Vec<i8>,
}

impl CodeReplica {

	pub fn new(prn:usize, fs:f64, code_periods:usize) -> Result<Self, DSPErr> {
		let chips = prn_int_sampled(prn, fs, code_periods)?;
		Ok(Self{ prn, fs, code_periods, chips })
	}

	pub fn len(&self) -> usize { self.chips.len() }
	pub fn is_empty(&self) -> bool { self.chips.is_empty() }

	pub fn energy(&self) -> f64 { self.chips.iter().map(|c| (*c as f64)*(*c as f64)).sum() }

	pub fn to_complex(&self) -> Vec<Complex<f64>> {
		self.chips.iter().map(|c| Complex{ re: *c as f64, im: 0.0 }).collect()
	}

}

/// Hands out shared replicas keyed by (PRN, sample rate, code periods) so that several
/// consumers of the same signal don't regenerate it
#[derive(Debug, Default)]
pub struct ReplicaCache {
	replicas: HashMap<(usize, u64, usize), Arc<CodeReplica>>,
}

impl ReplicaCache {

	pub fn new() -> Self { Self::default() }

	pub fn get(&mut self, prn:usize, fs:f64, code_periods:usize) -> Result<Arc<CodeReplica>, DSPErr> {
		let key = (prn, fs.to_bits(), code_periods);
		if let Some(replica) = self.replicas.get(&key) {
			return Ok(replica.clone());
		}

		let replica = Arc::new(CodeReplica::new(prn, fs, code_periods)?);
		self.replicas.insert(key, replica.clone());
		Ok(replica)
	}

	pub fn len(&self) -> usize { self.replicas.len() }
	pub fn is_empty(&self) -> bool { self.replicas.is_empty() }

}
