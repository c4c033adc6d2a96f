pub mod interval;
pub mod protocol;
pub mod types;

pub use interval::{minutes_since_midnight, overlaps, TimeWindow};
pub use types::*;
