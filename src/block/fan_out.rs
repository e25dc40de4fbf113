
use std::marker::PhantomData;

use crate::{DigSigProcErr as DSPErr};
use crate::block::{BlockFunctionality as BlkFunc, BlockResult};

/// Hands every input to each member block and merges whatever they produce.  Used to run
/// several independent acquisitions (one per PRN, for example) over the same sample stream.
pub struct FanOut<C: Clone, D, T: Clone, U, A: BlkFunc<C, D, T, U>> {
	blocks:Vec<A>,
	pc: PhantomData<C>,
	pd: PhantomData<D>,
	pt: PhantomData<T>,
	pu: PhantomData<U>,
}

impl<C: Clone, D, T: Clone, U, A: BlkFunc<C, D, T, U>> FanOut<C, D, T, U, A> {

	pub fn from_iter<I: Iterator<Item=A>>(iter:I) -> Self {
		Self { blocks: iter.collect(), pc: PhantomData, pd: PhantomData, pt: PhantomData, pu: PhantomData }
	}

	pub fn len(&self) -> usize { self.blocks.len() }
	pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

	pub fn blocks(&self) -> &[A] { &self.blocks }

}

impl<C: Clone, D, T: Clone, U, A: BlkFunc<C, D, T, U>> BlkFunc<C, Vec<D>, T, Vec<U>> for FanOut<C, D, T, U, A> {

	// The control input goes to every block; the responses come back in block order
	fn control(&mut self, c:&C) -> Result<Vec<D>, DSPErr> {
		self.blocks.iter_mut().map(|blk| blk.control(c)).collect()
	}

	// Every block sees every input, even after one of them produces an output, so that
	// none of them falls behind.  The first error ends the merge.
	fn apply(&mut self, input:&T) -> BlockResult<Vec<U>> {
		let mut merged:Vec<U> = vec![];
		for blk in self.blocks.iter_mut() {
			match blk.apply(input) {
				BlockResult::NotReady => (),
				BlockResult::Ready(u) => merged.push(u),
				BlockResult::Err(e)   => return BlockResult::Err(e)
			}
		}

		if merged.is_empty() { BlockResult::NotReady      }
		else                 { BlockResult::Ready(merged) }
	}

}
