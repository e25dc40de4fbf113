
use crate::{DigSigProcErr as DSPErr};

pub mod fan_out;

#[derive(Debug)]
pub enum BlockResult<U> {
	NotReady,
	Ready(U),
	Err(DSPErr)
}

impl<U> BlockResult<U> {

	pub fn unwrap(self) -> U {
		match self {
			Self::Ready(u) => u,
			_ => panic!("Called unwrap on something other than BlockResult::Ready")
		}
	}

	pub fn is_ready(&self) -> bool {
		match self {
			Self::Ready(_) => true,
			_ => false
		}
	}

}

// A type that implements BlockFunctionality consumes instances of T and produces
// Ready(U) if an output is ready, NotReady if it needs more input, or Err(_) if the
// operation fails.  The control channel takes a C and answers with a D.
pub trait BlockFunctionality<C: Clone, D, T: Clone, U> {

	fn control(&mut self, control:&C) -> Result<D, DSPErr>;
	fn apply(&mut self, input:&T) -> BlockResult<U>;

}
