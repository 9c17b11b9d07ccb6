//! 정규화 레코드.
//!
//! 데이터 제공자 응답(RawRecord)을 변환한 결과로, 저장소에 upsert되는 단위입니다.
//! 모든 레코드는 `(table, symbol, timestamp)` 키 하나에 대응하며,
//! 생성 시점에 검증을 통과한 값만 담습니다.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::error::{RecordError, RecordResult};

/// 레코드 저장 테이블.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordTable {
    /// 일별 시세
    Prices,
    /// 재무 지표 스냅샷
    Fundamentals,
}

impl RecordTable {
    /// 테이블명.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordTable::Prices => "prices",
            RecordTable::Fundamentals => "fundamentals",
        }
    }
}

impl fmt::Display for RecordTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upsert 식별 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    pub table: RecordTable,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
}

/// 일별 시세.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl PriceBar {
    fn validate(&self) -> RecordResult<()> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= Decimal::ZERO {
                return Err(RecordError::NonPositivePrice { field, value });
            }
        }

        if self.volume < 0 {
            return Err(RecordError::NegativeValue {
                field: "volume",
                value: Decimal::from(self.volume),
            });
        }

        if self.low > self.high {
            return Err(RecordError::InconsistentBar(format!(
                "low {} > high {}",
                self.low, self.high
            )));
        }

        for (field, value) in [("open", self.open), ("close", self.close)] {
            if value < self.low || value > self.high {
                return Err(RecordError::InconsistentBar(format!(
                    "{} {} outside [{}, {}]",
                    field, value, self.low, self.high
                )));
            }
        }

        Ok(())
    }
}

/// 재무 지표 스냅샷 (분기 기준).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FundamentalSnapshot {
    /// 회사명
    pub name: Option<String>,
    /// 섹터
    pub sector: Option<String>,
    /// 시가총액
    pub market_cap: Option<Decimal>,
    /// 매출액 (TTM)
    pub revenue_ttm: Option<Decimal>,
    /// 매출총이익 (TTM)
    pub gross_profit_ttm: Option<Decimal>,
    /// 주당순이익
    pub eps: Option<Decimal>,
    /// 주가수익비율
    pub pe_ratio: Option<Decimal>,
    /// 부채비율
    pub debt_to_equity: Option<Decimal>,
}

impl FundamentalSnapshot {
    fn validate(&self) -> RecordResult<()> {
        for (field, value) in [
            ("market_cap", self.market_cap),
            ("revenue_ttm", self.revenue_ttm),
        ] {
            if let Some(value) = value {
                if value < Decimal::ZERO {
                    return Err(RecordError::NegativeValue { field, value });
                }
            }
        }
        Ok(())
    }
}

/// 레코드 본문.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Price(PriceBar),
    Fundamental(FundamentalSnapshot),
}

impl RecordPayload {
    /// 저장 대상 테이블.
    pub fn table(&self) -> RecordTable {
        match self {
            RecordPayload::Price(_) => RecordTable::Prices,
            RecordPayload::Fundamental(_) => RecordTable::Fundamentals,
        }
    }
}

/// 검증이 끝난 정규화 레코드.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    symbol: String,
    timestamp: DateTime<Utc>,
    payload: RecordPayload,
}

impl NormalizedRecord {
    /// 검증 후 레코드 생성.
    ///
    /// 타임스탬프는 1970-01-01 이후, 현재 시각 + 1일 이전이어야 합니다.
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: RecordPayload,
    ) -> RecordResult<Self> {
        Self::validated_at(symbol.into(), timestamp, payload, Utc::now())
    }

    /// 일자 기준 레코드 생성 (00:00 UTC).
    pub fn on_date(
        symbol: impl Into<String>,
        date: NaiveDate,
        payload: RecordPayload,
    ) -> RecordResult<Self> {
        let timestamp = date.and_time(NaiveTime::MIN).and_utc();
        Self::new(symbol, timestamp, payload)
    }

    fn validated_at(
        symbol: String,
        timestamp: DateTime<Utc>,
        payload: RecordPayload,
        now: DateTime<Utc>,
    ) -> RecordResult<Self> {
        if symbol.trim().is_empty() {
            return Err(RecordError::EmptySymbol);
        }

        if timestamp < DateTime::<Utc>::UNIX_EPOCH || timestamp > now + Duration::days(1) {
            return Err(RecordError::TimestampOutOfRange(timestamp));
        }

        match &payload {
            RecordPayload::Price(bar) => bar.validate()?,
            RecordPayload::Fundamental(snapshot) => snapshot.validate()?,
        }

        Ok(Self {
            symbol,
            timestamp,
            payload,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &RecordPayload {
        &self.payload
    }

    pub fn table(&self) -> RecordTable {
        self.payload.table()
    }

    /// Upsert 식별 키.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            table: self.table(),
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
        }
    }
}
