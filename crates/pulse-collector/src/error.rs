//! 에러 타입 정의.

use thiserror::Error;

/// Collector 에러 타입
///
/// 작업을 시작하기 전에 드러나는 오류만 표현합니다.
/// 심볼 단위 실패는 [`crate::SymbolOutcome`]으로 보고됩니다.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러 (필수 값 누락 등)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 진행 불가능한 요청 (작업 시작 전 거부)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CollectorError::Config("DATABASE_URL missing".to_string());
        assert_eq!(err.to_string(), "Configuration error: DATABASE_URL missing");

        let err = CollectorError::InvalidRequest("cost 6 exceeds capacity 5".to_string());
        assert_eq!(err.to_string(), "Invalid request: cost 6 exceeds capacity 5");
    }
}
