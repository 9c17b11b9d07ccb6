//! 데이터 모듈 오류 타입.

use thiserror::Error;

/// 저장소 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 중복 레코드
    #[error("Duplicate record: {0}")]
    DuplicateError(String),

    /// 트랜잭션 충돌 (직렬화 실패, 데드락)
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// 커밋 실패
    #[error("Commit error: {0}")]
    CommitError(String),

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl DataError {
    /// 재시도로 해결될 수 있는 일시적 오류인지 확인.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::ConnectionError(_)
                | DataError::TransactionConflict(_)
                | DataError::CommitError(_)
                | DataError::PoolExhausted
        )
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::PoolClosed => DataError::ConnectionError("pool closed".to_string()),
            sqlx::Error::Io(e) => DataError::ConnectionError(e.to_string()),
            sqlx::Error::Tls(e) => DataError::ConnectionError(e.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL 고유 제약 조건 위반
                    "23505" => DataError::DuplicateError(db_err.message().to_string()),
                    // serialization_failure, deadlock_detected
                    "40001" | "40P01" => {
                        DataError::TransactionConflict(db_err.message().to_string())
                    }
                    _ => DataError::QueryError(db_err.message().to_string()),
                }
            }
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DataError::PoolExhausted.is_transient());
        assert!(DataError::CommitError("connection reset".into()).is_transient());
        assert!(DataError::TransactionConflict("40001".into()).is_transient());
        assert!(!DataError::QueryError("syntax error".into()).is_transient());
        assert!(!DataError::DuplicateError("dup".into()).is_transient());
    }

    #[test]
    fn test_from_sqlx_pool_timeout() {
        let err: DataError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DataError::PoolExhausted));
    }
}
