//! 수집 도메인 모델.

pub mod record;

pub use record::{
    FundamentalSnapshot, NormalizedRecord, PriceBar, RecordKey, RecordPayload, RecordTable,
};
