//! HTTP 데이터 제공자 인터페이스.
//!
//! 수집기는 제공자를 이미 연결된 전송 계층으로 취급합니다.
//! 연결 풀링과 TLS는 구현체의 책임입니다.

pub mod alpha_vantage;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 제공자 요청 (엔드포인트 + 쿼리 파라미터).
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    /// 엔드포인트 경로 (예: "query")
    pub endpoint: String,
    /// 쿼리 파라미터 (순서 유지)
    pub params: Vec<(String, String)>,
    /// Rate limiter 토큰 비용
    pub cost: f64,
}

impl DataRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
            cost: 1.0,
        }
    }

    /// 쿼리 파라미터 추가.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// 토큰 비용 지정.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// 파라미터 값 조회.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 제공자 응답.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
    /// 헤더 (이름은 소문자로 정규화)
    pub headers: HashMap<String, String>,
}

impl ProviderResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// 헤더 추가 (테스트 및 어댑터용).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` 헤더 (초 단위 정수만 지원).
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// 연결 수준 전송 오류.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 연결 실패/끊김
    #[error("Connection error: {0}")]
    Connect(String),

    /// 응답 본문 수신 실패
    #[error("Body error: {0}")]
    Body(String),

    /// 요청 자체가 잘못됨 (URL, 헤더 등)
    #[error("Invalid request: {0}")]
    Request(String),
}

impl TransportError {
    /// 재시도 가능한 오류인지 확인.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Request(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_builder() {
            TransportError::Request(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

/// HTTP 데이터 제공자.
#[async_trait]
pub trait HttpDataProvider: Send + Sync {
    /// 제공자 이름 (로그용).
    fn name(&self) -> &str;

    /// 요청 1회 실행.
    ///
    /// HTTP 상태 코드와 관계없이 응답을 받았다면 `Ok`를 반환합니다.
    /// 재시도 판단은 호출자 몫입니다.
    async fn request(&self, request: &DataRequest) -> Result<ProviderResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = DataRequest::new("query")
            .param("function", "OVERVIEW")
            .param("symbol", "IBM")
            .with_cost(2.0);

        assert_eq!(req.get("symbol"), Some("IBM"));
        assert_eq!(req.get("apikey"), None);
        assert_eq!(req.cost, 2.0);
    }

    #[test]
    fn test_response_headers_are_case_insensitive() {
        let resp = ProviderResponse::new(429, "").with_header("Retry-After", "7");
        assert_eq!(resp.header("retry-after"), Some("7"));
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(7)));

        let resp = ProviderResponse::new(429, "").with_header("Retry-After", "soon");
        assert_eq!(resp.retry_after(), None);
    }

    #[test]
    fn test_transport_retryable() {
        assert!(TransportError::Timeout("t".into()).is_retryable());
        assert!(TransportError::Connect("c".into()).is_retryable());
        assert!(!TransportError::Request("bad url".into()).is_retryable());
    }
}
