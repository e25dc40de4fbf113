
use crate::{DigSigProcErr as DSPErr};
use crate::gnss::constants::gps;
use super::Measurement;
use super::correlation::CorrelationSurface;

/// One chip of correlation triangle on either side of the peak plus a sample of margin
pub fn default_guard_half_width(fs:f64) -> usize {
	(fs / gps::CHIP_RATE_HZ).ceil() as usize + 1
}

fn circular_distance(a:usize, b:usize, n:usize) -> usize {
	let d:usize = if a > b { a - b } else { b - a };
	d.min(n - d)
}

/// Locates the global maximum of a correlation surface and measures it against the mean
/// level of every cell outside the guard band around the peak delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakDetector {
	guard_half_width:usize,
}

impl PeakDetector {

	pub fn new(guard_half_width:usize) -> Self { Self{ guard_half_width } }

	pub fn guard_half_width(&self) -> usize { self.guard_half_width }

	pub fn detect(&self, surface:&CorrelationSurface) -> Result<Measurement, DSPErr> {
		let n:usize = surface.delay_len();
		if n == 0 || surface.doppler_len() == 0 {
			return Err(DSPErr::Other("Correlation surface is empty"));
		}

		// Ties go to the first cell seen, i.e. the lowest Doppler bin and then the lowest delay
		let (doppler_idx, code_delay, peak_magnitude) = surface.cells()
			.fold((0, 0, surface.get(0, 0)), |best, cell| if cell.2 > best.2 { cell } else { best });

		// The guard band is a range of delays and applies to every Doppler row, since the
		// neighboring bins see the same code alignment
		let (sum, count) = surface.cells()
			.filter(|(_, t, _)| circular_distance(*t, code_delay, n) > self.guard_half_width)
			.fold((0.0, 0usize), |(sum, count), (_, _, m)| (sum + m, count + 1));

		let reference_level:f64 = if count > 0 { sum / (count as f64) } else { 0.0 };
		let confidence:f64 = if reference_level > 0.0 { peak_magnitude / reference_level } else { std::f64::INFINITY };

		Ok(Measurement{ code_delay, doppler_hz: surface.doppler_hz(doppler_idx), peak_magnitude, reference_level, confidence })
	}

}
