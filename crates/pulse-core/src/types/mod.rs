//! 공통 값 타입.

pub mod dataset;
pub mod time_range;

pub use dataset::Dataset;
pub use time_range::TimeRange;
