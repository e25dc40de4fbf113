
pub mod gps {

	pub const CODE_LENGTH:usize = 1023;
	pub const CHIP_RATE_HZ:f64 = 1.023e6;
	pub const CODE_PERIOD_SEC:f64 = 1.0e-3;

	pub const MIN_PRN:usize = 1;
	pub const MAX_PRN:usize = 32;

}
