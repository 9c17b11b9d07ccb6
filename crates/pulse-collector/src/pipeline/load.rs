//! 적재 (Load).
//!
//! 심볼 하나의 레코드는 하나의 트랜잭션으로 upsert됩니다. 모두 커밋되거나 아무것도
//! 반영되지 않습니다. 커밋 실패와 일시적 저장소 오류는 제한된 횟수만큼 재시도합니다.

use pulse_core::NormalizedRecord;
use pulse_data::{DataError, RecordStore, UpsertOutcome};
use std::time::Duration;
use tracing::{debug, warn};

/// 적재 재시도 정책.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// 적재 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
    pub attempts: u32,
}

/// 적재 실패.
#[derive(Debug)]
pub struct LoadFailure {
    pub attempts: u32,
    pub error: DataError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStage {
    Begin,
    Upsert,
    Commit,
}

/// 레코드 적재.
pub async fn load_records(
    store: &dyn RecordStore,
    records: &[NormalizedRecord],
    policy: &LoadPolicy,
) -> Result<LoadReport, LoadFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match write_once(store, records).await {
            Ok((inserted, updated)) => {
                return Ok(LoadReport {
                    inserted,
                    updated,
                    attempts: attempt,
                })
            }
            Err((stage, error)) => {
                let retryable = stage == WriteStage::Commit || error.is_transient();
                if !retryable || attempt >= max_attempts {
                    return Err(LoadFailure {
                        attempts: attempt,
                        error,
                    });
                }

                warn!(
                    attempt,
                    stage = ?stage,
                    error = %error,
                    delay_ms = policy.retry_delay.as_millis() as u64,
                    "적재 실패, 재시도 예정"
                );
                tokio::time::sleep(policy.retry_delay).await;
                attempt += 1;
            }
        }
    }
}

/// 트랜잭션 1회. 오류 시 명시적으로 롤백합니다.
async fn write_once(
    store: &dyn RecordStore,
    records: &[NormalizedRecord],
) -> Result<(usize, usize), (WriteStage, DataError)> {
    let mut tx = store
        .begin()
        .await
        .map_err(|e| (WriteStage::Begin, e))?;

    let (mut inserted, mut updated) = (0, 0);
    for record in records {
        match tx.upsert(record).await {
            Ok(UpsertOutcome::Inserted) => inserted += 1,
            Ok(UpsertOutcome::Updated) => updated += 1,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "롤백 실패");
                }
                return Err((WriteStage::Upsert, e));
            }
        }
    }

    tx.commit().await.map_err(|e| (WriteStage::Commit, e))?;
    debug!(inserted, updated, "트랜잭션 커밋 완료");

    Ok((inserted, updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pulse_core::{PriceBar, RecordPayload};
    use pulse_data::MemoryRecordStore;
    use rust_decimal_macros::dec;

    fn records(symbol: &str) -> Vec<NormalizedRecord> {
        (2..5)
            .map(|day| {
                NormalizedRecord::on_date(
                    symbol,
                    NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                    RecordPayload::Price(PriceBar {
                        open: dec!(10),
                        high: dec!(12),
                        low: dec!(9),
                        close: dec!(11),
                        volume: 500,
                    }),
                )
                .unwrap()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_commit_failure_is_retried() {
        let store = MemoryRecordStore::new();
        store.fail_next_commits(2).await;

        let report = load_records(&store, &records("IBM"), &LoadPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_commit_failure_gives_up() {
        let store = MemoryRecordStore::new();
        store.fail_commits_for("IBM").await;

        let failure = load_records(&store, &records("IBM"), &LoadPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_upsert_failure_is_not_retried() {
        let store = MemoryRecordStore::new();
        store.fail_upserts_for("IBM").await;

        let failure = load_records(&store, &records("IBM"), &LoadPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(store.rollback_count().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_reload_updates_instead_of_duplicating() {
        let store = MemoryRecordStore::new();
        let policy = LoadPolicy::default();

        let first = load_records(&store, &records("IBM"), &policy).await.unwrap();
        let second = load_records(&store, &records("IBM"), &policy).await.unwrap();

        assert_eq!((first.inserted, first.updated), (3, 0));
        assert_eq!((second.inserted, second.updated), (0, 3));
        assert_eq!(store.len().await, 3);
    }
}
