
/// Signal acquisition: the delay/Doppler search that precedes tracking
pub mod acquisition;

pub mod constants;

pub mod gps_l1_ca;
