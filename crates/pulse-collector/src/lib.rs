//! Rate-limited ingestion pipeline for StockPulse.
//!
//! 이 crate는 외부 시세 API에서 데이터를 수집해 저장소에 적재하는 구성요소를 제공합니다:
//! - 키별 토큰 버킷 rate limiter (`RateLimiter`)
//! - 지수 backoff 재시도 fetcher (`BackoffFetcher`)
//! - 심볼 단위 ETL 파이프라인 (`IngestionPipeline`)

pub mod config;
pub mod error;
pub mod fetcher;
pub mod limiter;
pub mod pipeline;
pub mod stats;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use fetcher::{BackoffFetcher, FetchError, FetchOutcome, RetryPolicy};
pub use limiter::{AcquireResult, BucketConfig, LimiterError, RateLimitResult, RateLimiter};
pub use pipeline::{
    IngestionJob, IngestionPipeline, JobResult, JobStatus, PipelineConfig, SymbolOutcome,
};
pub use stats::CollectionStats;
