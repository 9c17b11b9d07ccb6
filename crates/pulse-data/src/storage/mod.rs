//! 트랜잭션 단위 레코드 저장소.
//!
//! 수집 파이프라인은 심볼 하나의 레코드를 하나의 트랜잭션으로 적재합니다.
//! 커밋 전에 실패하면 그 심볼의 쓰기는 전부 버려져야 하며,
//! 같은 키의 레코드를 다시 upsert하면 새 행이 생기지 않고 기존 행이 갱신됩니다.
//!
//! - [`postgres::PgRecordStore`]: 운영용 PostgreSQL 저장소
//! - [`memory::MemoryRecordStore`]: 테스트/드라이런용 메모리 저장소

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use pulse_core::NormalizedRecord;
use serde::Serialize;

use crate::error::Result;

/// Upsert 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// 새 행 삽입
    Inserted,
    /// 기존 행 갱신
    Updated,
}

/// 진행 중인 저장소 트랜잭션.
///
/// `commit` 없이 drop되면 모든 쓰기가 폐기됩니다.
#[async_trait]
pub trait StoreTransaction: Send {
    /// `(table, symbol, timestamp)` 키 기준 upsert.
    async fn upsert(&mut self, record: &NormalizedRecord) -> Result<UpsertOutcome>;

    /// 커밋. 실패하면 아무것도 반영되지 않습니다.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// 명시적 롤백.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// 레코드 저장소.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 새 트랜잭션 시작.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}
