
use rustfft::num_complex::Complex;

pub mod block;

pub mod filters;
pub mod io;
pub mod gnss;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
	pub val: Complex<f64>,
	pub idx: usize,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DigSigProcErr {
	InvalidConfiguration(&'static str),
	LengthMismatch{ expected:usize, found:usize },
	InvalidState(&'static str),
	Io(&'static str),
	Other(&'static str),
}
