//! 레코드 검증 에러 타입.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// 정규화 레코드 검증 에러.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// 빈 심볼
    #[error("심볼이 비어 있습니다")]
    EmptySymbol,

    /// 잘못된 기간 (시작일이 종료일보다 늦음)
    #[error("잘못된 기간: {start} > {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// 허용 범위를 벗어난 타임스탬프
    #[error("타임스탬프 범위 초과: {0}")]
    TimestampOutOfRange(DateTime<Utc>),

    /// 0 이하의 가격
    #[error("{field} 가격이 0 이하입니다: {value}")]
    NonPositivePrice { field: &'static str, value: Decimal },

    /// 음수가 허용되지 않는 필드
    #[error("{field} 값이 음수입니다: {value}")]
    NegativeValue { field: &'static str, value: Decimal },

    /// 고가/저가 불일치
    #[error("캔들 불일치: {0}")]
    InconsistentBar(String),

    /// 필드 파싱 실패
    #[error("{field} 파싱 실패: {value:?}")]
    Parse { field: String, value: String },

    /// 필수 필드 누락
    #[error("필수 필드 누락: {0}")]
    MissingField(String),
}

/// 레코드 검증 Result 타입.
pub type RecordResult<T> = Result<T, RecordError>;
