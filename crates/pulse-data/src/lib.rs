//! 외부 데이터 제공자 및 저장소 인터페이스.
//!
//! 이 crate는 수집 파이프라인이 소비하는 두 인터페이스와 구현체를 제공합니다:
//! - HTTP 데이터 제공자 (`HttpDataProvider`) 및 Alpha Vantage 클라이언트
//! - 트랜잭션 단위 upsert 저장소 (`RecordStore`) 및 PostgreSQL / 메모리 구현

pub mod error;
pub mod provider;
pub mod storage;

pub use error::{DataError, Result};

pub use provider::alpha_vantage::AlphaVantageClient;
pub use provider::{DataRequest, HttpDataProvider, ProviderResponse, TransportError};

pub use storage::memory::MemoryRecordStore;
pub use storage::postgres::PgRecordStore;
pub use storage::{RecordStore, StoreTransaction, UpsertOutcome};
