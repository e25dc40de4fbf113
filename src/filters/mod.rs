
pub trait ScalarFilter {

	fn apply(&mut self, x:f64) -> f64;
	fn initialize(&mut self);

}

/// First-order exponential smoother, `y <- a*x + (1-a)*y`.  The first input after
/// initialization seeds the output directly.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialFilter {
	alpha: f64,
	state: Option<f64>,
}

impl ExponentialFilter {

	pub fn new(alpha:f64) -> Result<Self, &'static str> {
		if alpha > 0.0 && alpha <= 1.0 { Ok(Self{ alpha, state: None }) }
		else                           { Err("Smoothing factor must be in (0, 1]") }
	}

	pub fn alpha(&self) -> f64 { self.alpha }
	pub fn value(&self) -> Option<f64> { self.state }

}

impl ScalarFilter for ExponentialFilter {

	fn apply(&mut self, x:f64) -> f64 {
		let y = match self.state {
			Some(prev) => self.alpha*x + (1.0 - self.alpha)*prev,
			None       => x,
		};
		self.state = Some(y);
		y
	}

	fn initialize(&mut self) {
		self.state = None;
	}

}
