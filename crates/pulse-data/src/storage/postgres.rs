//! PostgreSQL 레코드 저장소.
//!
//! 테이블 스키마 (마이그레이션은 배포 도구에서 관리):
//!
//! ```sql
//! CREATE TABLE prices (
//!     symbol      TEXT        NOT NULL,
//!     ts          TIMESTAMPTZ NOT NULL,
//!     open        NUMERIC     NOT NULL,
//!     high        NUMERIC     NOT NULL,
//!     low         NUMERIC     NOT NULL,
//!     close       NUMERIC     NOT NULL,
//!     volume      BIGINT      NOT NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (symbol, ts)
//! );
//!
//! CREATE TABLE fundamentals (
//!     symbol            TEXT        NOT NULL,
//!     ts                TIMESTAMPTZ NOT NULL,
//!     name              TEXT,
//!     sector            TEXT,
//!     market_cap        NUMERIC,
//!     revenue_ttm       NUMERIC,
//!     gross_profit_ttm  NUMERIC,
//!     eps               NUMERIC,
//!     pe_ratio          NUMERIC,
//!     debt_to_equity    NUMERIC,
//!     updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (symbol, ts)
//! );
//! ```

use async_trait::async_trait;
use pulse_core::{FundamentalSnapshot, NormalizedRecord, PriceBar, RecordPayload};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{RecordStore, StoreTransaction, UpsertOutcome};
use crate::error::{DataError, Result};

/// 연결 획득 타임아웃.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL 저장소.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// 연결 풀을 생성합니다.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        info!(max_connections, "데이터베이스 연결 중...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("데이터베이스 연결 완료");
        Ok(Self { pool })
    }

    /// 연결 상태 확인.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx, written: 0 }))
    }
}

/// PostgreSQL 트랜잭션.
///
/// sqlx 트랜잭션은 커밋 없이 drop되면 롤백됩니다.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    written: usize,
}

impl PgStoreTransaction {
    async fn upsert_price(
        &mut self,
        record: &NormalizedRecord,
        bar: &PriceBar,
    ) -> Result<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO prices (symbol, ts, open, high, low, close, volume, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (symbol, ts) DO UPDATE SET
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                volume = EXCLUDED.volume,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(record.symbol())
        .bind(record.timestamp())
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .fetch_one(&mut *self.tx)
        .await?;

        outcome_from_row(&row)
    }

    async fn upsert_fundamental(
        &mut self,
        record: &NormalizedRecord,
        snapshot: &FundamentalSnapshot,
    ) -> Result<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO fundamentals (
                symbol, ts, name, sector, market_cap, revenue_ttm,
                gross_profit_ttm, eps, pe_ratio, debt_to_equity, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (symbol, ts) DO UPDATE SET
                name = EXCLUDED.name,
                sector = EXCLUDED.sector,
                market_cap = EXCLUDED.market_cap,
                revenue_ttm = EXCLUDED.revenue_ttm,
                gross_profit_ttm = EXCLUDED.gross_profit_ttm,
                eps = EXCLUDED.eps,
                pe_ratio = EXCLUDED.pe_ratio,
                debt_to_equity = EXCLUDED.debt_to_equity,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(record.symbol())
        .bind(record.timestamp())
        .bind(&snapshot.name)
        .bind(&snapshot.sector)
        .bind(snapshot.market_cap)
        .bind(snapshot.revenue_ttm)
        .bind(snapshot.gross_profit_ttm)
        .bind(snapshot.eps)
        .bind(snapshot.pe_ratio)
        .bind(snapshot.debt_to_equity)
        .fetch_one(&mut *self.tx)
        .await?;

        outcome_from_row(&row)
    }
}

fn outcome_from_row(row: &sqlx::postgres::PgRow) -> Result<UpsertOutcome> {
    let inserted: bool = row.try_get("inserted")?;
    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self, record), fields(symbol = record.symbol(), table = %record.table()))]
    async fn upsert(&mut self, record: &NormalizedRecord) -> Result<UpsertOutcome> {
        let outcome = match record.payload() {
            RecordPayload::Price(bar) => self.upsert_price(record, bar).await?,
            RecordPayload::Fundamental(snapshot) => {
                self.upsert_fundamental(record, snapshot).await?
            }
        };
        self.written += 1;
        Ok(outcome)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let written = self.written;
        self.tx
            .commit()
            .await
            .map_err(|e| DataError::CommitError(e.to_string()))?;
        debug!(written, "트랜잭션 커밋");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let written = self.written;
        self.tx.rollback().await?;
        debug!(written, "트랜잭션 롤백");
        Ok(())
    }
}
