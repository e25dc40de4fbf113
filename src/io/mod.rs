
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt};
use rustfft::num_complex::Complex;

use crate::{DigSigProcErr as DSPErr, Sample};

pub mod synthetic;

/// A block of contiguous samples, tagged with the stream index of its first sample
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
	pub sample_idx:usize,
	pub samples:Vec<Complex<f64>>,
}

impl Epoch {
	pub fn len(&self) -> usize { self.samples.len() }
	pub fn is_empty(&self) -> bool { self.samples.is_empty() }
}

/// Pull interface to a sample stream.  `Ok(None)` signals the end of the stream, which
/// includes the case where fewer than `len` samples remain.
pub trait SampleSource {
	fn next_epoch(&mut self, len:usize) -> Result<Option<Epoch>, DSPErr>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
	fn next_epoch(&mut self, len:usize) -> Result<Option<Epoch>, DSPErr> { (**self).next_epoch(len) }
}

/// Chunks any sample iterator into epochs
pub struct EpochReader<I: Iterator<Item=Sample>> {
	src:I,
}

impl<I: Iterator<Item=Sample>> EpochReader<I> {

	pub fn new(src:I) -> Self { Self{ src } }

	pub fn into_inner(self) -> I { self.src }

}

impl<I: Iterator<Item=Sample>> SampleSource for EpochReader<I> {

	fn next_epoch(&mut self, len:usize) -> Result<Option<Epoch>, DSPErr> {
		let mut samples:Vec<Complex<f64>> = Vec::with_capacity(len);
		let mut sample_idx:Option<usize> = None;

		while samples.len() < len {
			match self.src.next() {
				Some(s) => {
					sample_idx.get_or_insert(s.idx);
					samples.push(s.val);
				},
				None => return Ok(None)
			}
		}

		Ok(Some(Epoch{ sample_idx: sample_idx.unwrap_or(0), samples }))
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
	/// Interleaved little-endian i16 I and Q
	I16,
	/// Interleaved little-endian f32 I and Q
	F32,
}

impl Default for SampleFormat {
	fn default() -> Self { Self::F32 }
}

impl SampleFormat {
	pub fn bytes_per_sample(&self) -> usize {
		match self {
			Self::I16 => 4,
			Self::F32 => 8,
		}
	}
}

impl FromStr for SampleFormat {
	type Err = DSPErr;

	fn from_str(s:&str) -> Result<Self, DSPErr> {
		match s {
			"i16" => Ok(Self::I16),
			"f32" => Ok(Self::F32),
			_     => Err(DSPErr::InvalidConfiguration("Sample format must be i16 or f32")),
		}
	}
}

/// Recorded IQ replay.  Yields samples until the reader runs dry; a trailing partial
/// sample is dropped.  A read failure also ends the stream but is kept, and pulling
/// epochs reports it instead of a clean end of stream.
pub struct BufferedSource<R: Read> {
	src: R,
	format: SampleFormat,
	idx: usize,
	done: bool,
	error: Option<DSPErr>,
}

impl<R: Read> BufferedSource<R> {

	pub fn new(src:R, format:SampleFormat) -> Self {
		Self{ src, format, idx: 0, done: false, error: None }
	}

	/// The read failure that ended the stream, if any
	pub fn error(&self) -> Option<DSPErr> { self.error }

	/// Discards the first `n` samples; indices keep counting from the start of the stream
	pub fn skip_samples(&mut self, n:usize) -> Result<(), DSPErr> {
		let n_bytes:u64 = (n * self.format.bytes_per_sample()) as u64;
		let skipped:u64 = io::copy(&mut self.src.by_ref().take(n_bytes), &mut io::sink()).map_err(|_| DSPErr::Io("Unable to skip samples"))?;
		if skipped < n_bytes {
			self.done = true;
		}
		self.idx += n;
		Ok(())
	}

	fn read_sample(&mut self) -> io::Result<Complex<f64>> {
		match self.format {
			SampleFormat::I16 => {
				let re = self.src.read_i16::<LittleEndian>()?;
				let im = self.src.read_i16::<LittleEndian>()?;
				Ok(Complex{ re: re as f64, im: im as f64 })
			},
			SampleFormat::F32 => {
				let re = self.src.read_f32::<LittleEndian>()?;
				let im = self.src.read_f32::<LittleEndian>()?;
				Ok(Complex{ re: re as f64, im: im as f64 })
			},
		}
	}

}

impl BufferedSource<BufReader<File>> {

	pub fn open<P: AsRef<Path>>(path:P, format:SampleFormat, skip:usize) -> Result<Self, DSPErr> {
		let file = File::open(path).map_err(|_| DSPErr::Io("Unable to open sample file"))?;
		let mut src = Self::new(BufReader::new(file), format);
		src.skip_samples(skip)?;
		Ok(src)
	}

}

impl<R: Read> Iterator for BufferedSource<R> {
	type Item = Sample;

	fn next(&mut self) -> Option<Sample> {
		if self.done { return None; }

		match self.read_sample() {
			Ok(val) => {
				let ans = Sample{ val, idx: self.idx };
				self.idx += 1;
				Some(ans)
			},
			Err(e) => {
				if e.kind() != io::ErrorKind::UnexpectedEof {
					log::error!("Sample read failed after {} samples: {}", self.idx, e);
					self.error = Some(DSPErr::Io("Sample read failed"));
				}
				self.done = true;
				None
			}
		}
	}
}

impl<R: Read> SampleSource for BufferedSource<R> {

	fn next_epoch(&mut self, len:usize) -> Result<Option<Epoch>, DSPErr> {
		let sample_idx:usize = self.idx;
		let mut samples:Vec<Complex<f64>> = Vec::with_capacity(len);

		while samples.len() < len {
			match self.next() {
				Some(s) => samples.push(s.val),
				None    => return match self.error {
					Some(e) => Err(e),
					None    => Ok(None),
				}
			}
		}

		Ok(Some(Epoch{ sample_idx, samples }))
	}

}
