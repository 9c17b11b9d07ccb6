//! 메모리 레코드 저장소.
//!
//! PostgreSQL과 같은 upsert/트랜잭션 의미를 메모리에서 제공합니다.
//! 드라이런 수집과 파이프라인 테스트에 사용하며, 커밋/업서트 실패를 주입할 수 있습니다.

use async_trait::async_trait;
use pulse_core::{NormalizedRecord, RecordKey};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{RecordStore, StoreTransaction, UpsertOutcome};
use crate::error::{DataError, Result};

#[derive(Default)]
struct Inner {
    rows: BTreeMap<RecordKey, NormalizedRecord>,
    commits: usize,
    rollbacks: usize,
    /// 남은 커밋 실패 횟수 (일시적 오류)
    failing_commits: usize,
    /// 커밋이 항상 실패하는 심볼
    commit_failure_symbols: HashSet<String>,
    /// upsert가 항상 실패하는 심볼
    upsert_failure_symbols: HashSet<String>,
    commit_delay: Option<Duration>,
}

/// 메모리 저장소.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `n`번의 커밋을 일시적 오류로 실패시킵니다.
    pub async fn fail_next_commits(&self, n: usize) {
        self.inner.lock().await.failing_commits = n;
    }

    /// 해당 심볼을 포함한 트랜잭션의 커밋을 항상 실패시킵니다.
    pub async fn fail_commits_for(&self, symbol: &str) {
        self.inner
            .lock()
            .await
            .commit_failure_symbols
            .insert(symbol.to_string());
    }

    /// 해당 심볼의 upsert를 항상 실패시킵니다 (재시도 불가 오류).
    pub async fn fail_upserts_for(&self, symbol: &str) {
        self.inner
            .lock()
            .await
            .upsert_failure_symbols
            .insert(symbol.to_string());
    }

    /// 커밋마다 지연을 추가합니다.
    pub async fn set_commit_delay(&self, delay: Duration) {
        self.inner.lock().await.commit_delay = Some(delay);
    }

    pub async fn get(&self, key: &RecordKey) -> Option<NormalizedRecord> {
        self.inner.lock().await.rows.get(key).cloned()
    }

    /// 저장된 전체 레코드 (키 순).
    pub async fn records(&self) -> Vec<NormalizedRecord> {
        self.inner.lock().await.rows.values().cloned().collect()
    }

    /// 심볼별 레코드.
    pub async fn records_for(&self, symbol: &str) -> Vec<NormalizedRecord> {
        self.inner
            .lock()
            .await
            .rows
            .values()
            .filter(|r| r.symbol() == symbol)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.rows.is_empty()
    }

    pub async fn commit_count(&self) -> usize {
        self.inner.lock().await.commits
    }

    pub async fn rollback_count(&self) -> usize {
        self.inner.lock().await.rollbacks
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged: BTreeMap::new(),
        }))
    }
}

/// 메모리 트랜잭션. 쓰기는 커밋 시점에 한 번에 반영됩니다.
struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    staged: BTreeMap<RecordKey, NormalizedRecord>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn upsert(&mut self, record: &NormalizedRecord) -> Result<UpsertOutcome> {
        let key = record.key();
        let exists = {
            let inner = self.inner.lock().await;
            if inner.upsert_failure_symbols.contains(record.symbol()) {
                return Err(DataError::QueryError(format!(
                    "upsert rejected for {}",
                    record.symbol()
                )));
            }
            inner.rows.contains_key(&key)
        };

        let staged_before = self.staged.insert(key, record.clone()).is_some();
        Ok(if exists || staged_before {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { inner, staged } = *self;

        let delay = inner.lock().await.commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = inner.lock().await;

        if staged
            .keys()
            .any(|k| inner.commit_failure_symbols.contains(&k.symbol))
        {
            inner.rollbacks += 1;
            return Err(DataError::CommitError("commit rejected".to_string()));
        }

        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            inner.rollbacks += 1;
            return Err(DataError::CommitError("transient commit failure".to_string()));
        }

        inner.rows.extend(staged);
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.lock().await.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pulse_core::{PriceBar, RecordPayload};
    use rust_decimal_macros::dec;

    fn record(symbol: &str, day: u32, close: rust_decimal::Decimal) -> NormalizedRecord {
        NormalizedRecord::on_date(
            symbol,
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            RecordPayload::Price(PriceBar {
                open: dec!(100),
                high: dec!(110),
                low: dec!(90),
                close,
                volume: 1_000,
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryRecordStore::new();

        for _ in 0..2 {
            let mut tx = store.begin().await.unwrap();
            tx.upsert(&record("IBM", 2, dec!(105))).await.unwrap();
            tx.upsert(&record("IBM", 3, dec!(106))).await.unwrap();
            tx.commit().await.unwrap();
        }

        assert_eq!(store.len().await, 2);
        assert_eq!(store.commit_count().await, 2);
    }

    #[tokio::test]
    async fn test_upsert_reports_inserted_then_updated() {
        let store = MemoryRecordStore::new();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.upsert(&record("IBM", 2, dec!(105))).await.unwrap(),
            UpsertOutcome::Inserted
        );
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.upsert(&record("IBM", 2, dec!(107))).await.unwrap(),
            UpsertOutcome::Updated
        );
        tx.commit().await.unwrap();

        let stored = store.get(&record("IBM", 2, dec!(100)).key()).await.unwrap();
        match stored.payload() {
            RecordPayload::Price(bar) => assert_eq!(bar.close, dec!(107)),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryRecordStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.upsert(&record("IBM", 2, dec!(105))).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        tx.upsert(&record("IBM", 3, dec!(105))).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.is_empty().await);
        assert_eq!(store.rollback_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let store = MemoryRecordStore::new();
        store.fail_next_commits(1).await;

        let mut tx = store.begin().await.unwrap();
        tx.upsert(&record("IBM", 2, dec!(105))).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.is_empty().await);

        let mut tx = store.begin().await.unwrap();
        tx.upsert(&record("IBM", 2, dec!(105))).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_symbol_failures() {
        let store = MemoryRecordStore::new();
        store.fail_upserts_for("BAD").await;
        store.fail_commits_for("NOPE").await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.upsert(&record("BAD", 2, dec!(105))).await.unwrap_err();
        assert!(!err.is_transient());

        let mut tx = store.begin().await.unwrap();
        tx.upsert(&record("NOPE", 2, dec!(105))).await.unwrap();
        assert!(tx.commit().await.is_err());

        assert!(store.records_for("NOPE").await.is_empty());
    }
}
