pub mod observation;
pub mod signal;
pub mod stage;

pub use observation::*;
pub use signal::*;
pub use stage::*;

/// Hours between the anchor and the stage being forecast.
pub const HORIZON_HOURS: i64 = 6;

/// Longest look-back any feature needs.
pub const MAX_LOOKBACK_HOURS: i64 = 168;
