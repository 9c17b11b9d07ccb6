//! Alpha Vantage REST 클라이언트.
//!
//! # 지원 데이터
//!
//! - `TIME_SERIES_DAILY`: 일봉 시계열
//! - `GLOBAL_QUOTE`: 최신 시세
//! - `OVERVIEW`: 기업 개요 및 재무 지표
//!
//! # 소프트 에러 정규화
//!
//! Alpha Vantage는 오류 상황에서도 HTTP 200을 반환하고 본문에 메시지를 담습니다.
//! 클라이언트는 이를 HTTP 의미로 변환하여 상위 계층이 상태 코드만으로
//! 재시도 여부를 판단할 수 있게 합니다:
//! - `"Error Message"` → 400 (잘못된 심볼/함수, 재시도 불가)
//! - `"Note"`, `"Information"` → 429 (요청 한도 초과, 재시도 가능)
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use pulse_data::AlphaVantageClient;
//! use pulse_data::provider::alpha_vantage;
//!
//! let client = AlphaVantageClient::new("YOUR_API_KEY", Duration::from_secs(10))?;
//! let response = client.request(&alpha_vantage::overview("IBM")).await?;
//! ```

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use pulse_core::{Dataset, TimeRange};
use std::collections::HashMap;
use std::time::Duration;

use super::{DataRequest, HttpDataProvider, ProviderResponse, TransportError};

/// 기본 API URL.
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// 조회 엔드포인트.
pub const QUERY_ENDPOINT: &str = "query";

/// `outputsize=compact`가 반환하는 최근 데이터 포인트 수.
const COMPACT_POINTS: i64 = 100;

/// Alpha Vantage 클라이언트.
#[derive(Clone)]
pub struct AlphaVantageClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageClient {
    /// 새 클라이언트 생성.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Base URL 교체 (프록시, 테스트 서버).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpDataProvider for AlphaVantageClient {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    async fn request(&self, request: &DataRequest) -> Result<ProviderResponse, TransportError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            request.endpoint.trim_start_matches('/')
        );

        tracing::debug!(
            url = %url,
            function = request.get("function").unwrap_or_default(),
            symbol = request.get("symbol").unwrap_or_default(),
            "Alpha Vantage 요청"
        );

        let response = self
            .client
            .get(&url)
            .query(&request.params)
            .query(&[("apikey", self.api_key.as_str())])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        let status = normalize_soft_error(status, &body);

        Ok(ProviderResponse {
            status,
            body,
            headers,
        })
    }
}

/// HTTP 200 본문에 담긴 오류 메시지를 상태 코드로 변환.
pub fn normalize_soft_error(status: u16, body: &str) -> u16 {
    if status != 200 {
        return status;
    }

    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body)
    else {
        return status;
    };

    if map.contains_key("Error Message") {
        tracing::warn!(message = ?map.get("Error Message"), "Alpha Vantage 요청 오류");
        400
    } else if map.contains_key("Note") || map.contains_key("Information") {
        tracing::warn!("Alpha Vantage 요청 한도 초과 응답");
        429
    } else {
        status
    }
}

/// 일봉 시계열 요청.
///
/// 요청 기간이 최근 100일 이내에서 시작하면 `compact`, 그 외에는 `full`을 요청합니다.
pub fn daily_series(symbol: &str, range: &TimeRange, today: NaiveDate) -> DataRequest {
    let compact_start = today - ChronoDuration::days(COMPACT_POINTS);
    let output_size = if range.start() >= compact_start {
        "compact"
    } else {
        "full"
    };

    DataRequest::new(QUERY_ENDPOINT)
        .param("function", Dataset::DailyPrices.function())
        .param("symbol", symbol)
        .param("outputsize", output_size)
}

/// 최신 시세 요청.
pub fn global_quote(symbol: &str) -> DataRequest {
    DataRequest::new(QUERY_ENDPOINT)
        .param("function", Dataset::Quote.function())
        .param("symbol", symbol)
}

/// 기업 개요 요청.
pub fn overview(symbol: &str) -> DataRequest {
    DataRequest::new(QUERY_ENDPOINT)
        .param("function", Dataset::Overview.function())
        .param("symbol", symbol)
}

/// 데이터셋별 요청 생성.
pub fn dataset_request(
    dataset: Dataset,
    symbol: &str,
    range: &TimeRange,
    today: NaiveDate,
) -> DataRequest {
    match dataset {
        Dataset::DailyPrices => daily_series(symbol, range, today),
        Dataset::Quote => global_quote(symbol),
        Dataset::Overview => overview(symbol),
    }
}
