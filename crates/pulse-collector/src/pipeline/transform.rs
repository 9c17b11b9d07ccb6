//! 응답 변환 (Transform).
//!
//! 제공자 응답 본문을 검증된 [`NormalizedRecord`]로 변환합니다.
//! 잘못된 개별 레코드는 사유와 함께 버려지고, 본문 구조 자체가 잘못되었거나
//! 유효한 레코드가 하나도 없으면 심볼 전체가 변환 실패로 처리됩니다.

use chrono::NaiveDate;
use pulse_core::{
    Dataset, FundamentalSnapshot, NormalizedRecord, PriceBar, RecordError, RecordPayload,
    RecordResult, TimeRange,
};
use pulse_data::provider::alpha_vantage;
use pulse_data::DataRequest;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

const DAILY_SERIES_KEY: &str = "Time Series (Daily)";
const GLOBAL_QUOTE_KEY: &str = "Global Quote";

/// 변환 실패 (심볼 단위).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// 본문이 비었거나 JSON이 아님
    #[error("Unparseable payload: {0}")]
    Unparseable(String),

    /// 기대한 구조가 아님
    #[error("Unexpected payload structure: {0}")]
    UnexpectedShape(String),
}

/// 버려진 레코드.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRecord {
    /// 원본 위치 (예: 일자)
    pub reference: String,
    pub reason: String,
}

/// 변환 결과.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub records: Vec<NormalizedRecord>,
    pub dropped: Vec<DroppedRecord>,
}

impl TransformOutput {
    fn drop_record(&mut self, reference: impl Into<String>, reason: impl ToString) {
        let reference = reference.into();
        let reason = reason.to_string();
        tracing::debug!(reference = %reference, reason = %reason, "레코드 제외");
        self.dropped.push(DroppedRecord { reference, reason });
    }

    fn push(&mut self, reference: impl Into<String>, record: RecordResult<NormalizedRecord>) {
        match record {
            Ok(record) => self.records.push(record),
            Err(err) => self.drop_record(reference, err),
        }
    }
}

/// 제공자별 요청/응답 형식.
pub trait SourceFormat: Send + Sync {
    fn name(&self) -> &str;

    /// 데이터셋/심볼/기간에 대한 요청 생성.
    fn plan_request(
        &self,
        dataset: Dataset,
        symbol: &str,
        range: &TimeRange,
        today: NaiveDate,
    ) -> DataRequest;

    /// 응답 본문 변환.
    fn transform(
        &self,
        dataset: Dataset,
        symbol: &str,
        range: &TimeRange,
        payload: &str,
    ) -> Result<TransformOutput, TransformError>;
}

/// Alpha Vantage 응답 형식.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaVantageFormat;

impl SourceFormat for AlphaVantageFormat {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    fn plan_request(
        &self,
        dataset: Dataset,
        symbol: &str,
        range: &TimeRange,
        today: NaiveDate,
    ) -> DataRequest {
        alpha_vantage::dataset_request(dataset, symbol, range, today)
    }

    fn transform(
        &self,
        dataset: Dataset,
        symbol: &str,
        range: &TimeRange,
        payload: &str,
    ) -> Result<TransformOutput, TransformError> {
        let root = parse_object(payload)?;

        match dataset {
            Dataset::DailyPrices => transform_daily(symbol, range, &root),
            Dataset::Quote => transform_quote(symbol, range, &root),
            Dataset::Overview => Ok(transform_overview(symbol, &root)),
        }
    }
}

fn parse_object(payload: &str) -> Result<Map<String, Value>, TransformError> {
    if payload.trim().is_empty() {
        return Err(TransformError::Unparseable("empty body".to_string()));
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TransformError::UnexpectedShape(format!(
            "expected JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(TransformError::Unparseable(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn transform_daily(
    symbol: &str,
    range: &TimeRange,
    root: &Map<String, Value>,
) -> Result<TransformOutput, TransformError> {
    let series = root
        .get(DAILY_SERIES_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| TransformError::UnexpectedShape(format!("missing {:?}", DAILY_SERIES_KEY)))?;

    let mut output = TransformOutput::default();

    for (day, fields) in series {
        let date = match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                output.drop_record(day.as_str(), parse_error("date", day));
                continue;
            }
        };

        if !range.contains(date) {
            continue;
        }

        let record = daily_bar(fields)
            .and_then(|bar| NormalizedRecord::on_date(symbol, date, RecordPayload::Price(bar)));

        output.push(day.as_str(), record);
    }

    Ok(output)
}

fn transform_quote(
    symbol: &str,
    range: &TimeRange,
    root: &Map<String, Value>,
) -> Result<TransformOutput, TransformError> {
    let quote = root
        .get(GLOBAL_QUOTE_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| TransformError::UnexpectedShape(format!("missing {:?}", GLOBAL_QUOTE_KEY)))?;

    let mut output = TransformOutput::default();

    // 알 수 없는 심볼은 빈 객체로 응답됨
    if quote.is_empty() {
        return Ok(output);
    }

    let date = match text(quote, "07. latest trading day") {
        Some(day) => match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                output.drop_record("quote", parse_error("07. latest trading day", day));
                return Ok(output);
            }
        },
        None => {
            output.drop_record(
                "quote",
                RecordError::MissingField("07. latest trading day".to_string()),
            );
            return Ok(output);
        }
    };

    if !range.contains(date) {
        output.drop_record(date.to_string(), format!("{} outside {}", date, range));
        return Ok(output);
    }

    let record = quote_bar(quote)
        .and_then(|bar| NormalizedRecord::on_date(symbol, date, RecordPayload::Price(bar)));
    output.push(date.to_string(), record);

    Ok(output)
}

/// 기업 개요는 `LatestQuarter` 기준 스냅샷 하나가 됩니다 (수집 기간과 무관).
fn transform_overview(symbol: &str, root: &Map<String, Value>) -> TransformOutput {
    let mut output = TransformOutput::default();

    if root.is_empty() {
        return output;
    }

    output.push("overview", overview_record(symbol, root));
    output
}

fn overview_record(symbol: &str, root: &Map<String, Value>) -> RecordResult<NormalizedRecord> {
    let quarter = text(root, "LatestQuarter")
        .ok_or_else(|| RecordError::MissingField("LatestQuarter".to_string()))?;
    let quarter = NaiveDate::parse_from_str(quarter, "%Y-%m-%d")
        .map_err(|_| parse_error("LatestQuarter", quarter))?;

    let snapshot = FundamentalSnapshot {
        name: text(root, "Name").map(str::to_string),
        sector: text(root, "Sector").map(str::to_string),
        market_cap: optional_decimal(root, "MarketCapitalization")?,
        revenue_ttm: optional_decimal(root, "RevenueTTM")?,
        gross_profit_ttm: optional_decimal(root, "GrossProfitTTM")?,
        eps: optional_decimal(root, "EPS")?,
        pe_ratio: optional_decimal(root, "PERatio")?,
        debt_to_equity: optional_decimal(root, "DebtToEquityRatio")?,
    };

    NormalizedRecord::on_date(symbol, quarter, RecordPayload::Fundamental(snapshot))
}

fn daily_bar(fields: &Value) -> RecordResult<PriceBar> {
    let bar = fields
        .as_object()
        .ok_or_else(|| RecordError::MissingField("daily bar".to_string()))?;

    Ok(PriceBar {
        open: required_decimal(bar, "1. open")?,
        high: required_decimal(bar, "2. high")?,
        low: required_decimal(bar, "3. low")?,
        close: required_decimal(bar, "4. close")?,
        volume: required_volume(bar, "5. volume")?,
    })
}

fn quote_bar(quote: &Map<String, Value>) -> RecordResult<PriceBar> {
    Ok(PriceBar {
        open: required_decimal(quote, "02. open")?,
        high: required_decimal(quote, "03. high")?,
        low: required_decimal(quote, "04. low")?,
        close: required_decimal(quote, "05. price")?,
        volume: required_volume(quote, "06. volume")?,
    })
}

fn parse_error(field: &str, value: &str) -> RecordError {
    RecordError::Parse {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// 값이 없음을 뜻하는 문자열 (`"None"`, `"-"`, 빈 문자열)은 `None`.
fn text<'a>(map: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "None" && *v != "-")
}

fn optional_decimal(map: &Map<String, Value>, field: &str) -> RecordResult<Option<Decimal>> {
    match text(map, field) {
        None => Ok(None),
        Some(value) => parse_decimal(field, value).map(Some),
    }
}

fn required_decimal(map: &Map<String, Value>, field: &str) -> RecordResult<Decimal> {
    let value = text(map, field).ok_or_else(|| RecordError::MissingField(field.to_string()))?;
    parse_decimal(field, value)
}

fn parse_decimal(field: &str, value: &str) -> RecordResult<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| parse_error(field, value))
}

fn required_volume(map: &Map<String, Value>, field: &str) -> RecordResult<i64> {
    let value = text(map, field).ok_or_else(|| RecordError::MissingField(field.to_string()))?;
    value.parse::<i64>().map_err(|_| parse_error(field, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::RecordTable;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn january() -> TimeRange {
        TimeRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap()
    }

    const DAILY: &str = r#"{
        "Meta Data": {"2. Symbol": "IBM"},
        "Time Series (Daily)": {
            "2024-02-01": {
                "1. open": "185.0", "2. high": "186.0", "3. low": "183.0",
                "4. close": "184.0", "5. volume": "3000000"
            },
            "2024-01-31": {
                "1. open": "184.0", "2. high": "185.5", "3. low": "183.2",
                "4. close": "183.7", "5. volume": "4122000"
            },
            "2024-01-30": {
                "1. open": "187.0", "2. high": "180.0", "3. low": "186.0",
                "4. close": "186.5", "5. volume": "1000"
            },
            "2024-01-29": {
                "1. open": "187.4", "2. high": "188.0", "3. low": "185.0",
                "4. close": "187.1", "5. volume": "abc"
            },
            "2024-01-26": {
                "1. open": "191.3", "2. high": "192.4", "3. low": "186.2",
                "4. close": "187.4", "5. volume": "9895938"
            }
        }
    }"#;

    #[test]
    fn test_daily_filters_range_and_drops_invalid_bars() {
        let output = AlphaVantageFormat
            .transform(Dataset::DailyPrices, "IBM", &january(), DAILY)
            .unwrap();

        let mut days: Vec<_> = output
            .records
            .iter()
            .map(|r| r.timestamp().date_naive())
            .collect();
        days.sort();
        assert_eq!(days, vec![date(2024, 1, 26), date(2024, 1, 31)]);
        assert!(output.records.iter().all(|r| r.table() == RecordTable::Prices));

        // 1/30: high < low, 1/29: volume 파싱 실패
        assert_eq!(output.dropped.len(), 2);
        assert!(output.dropped.iter().any(|d| d.reference == "2024-01-29"));
    }

    #[test]
    fn test_daily_missing_series_is_unexpected_shape() {
        let err = AlphaVantageFormat
            .transform(Dataset::DailyPrices, "IBM", &january(), r#"{"Meta Data": {}}"#)
            .unwrap_err();
        assert!(matches!(err, TransformError::UnexpectedShape(_)));
    }

    #[test]
    fn test_empty_and_garbage_bodies_are_unparseable() {
        for body in ["", "   ", "<html>oops</html>"] {
            let err = AlphaVantageFormat
                .transform(Dataset::Overview, "IBM", &january(), body)
                .unwrap_err();
            assert!(matches!(err, TransformError::Unparseable(_)), "{:?}", body);
        }

        let err = AlphaVantageFormat
            .transform(Dataset::Overview, "IBM", &january(), "[1, 2]")
            .unwrap_err();
        assert!(matches!(err, TransformError::UnexpectedShape(_)));
    }

    #[test]
    fn test_quote() {
        let body = r#"{"Global Quote": {
            "01. symbol": "IBM", "02. open": "183.00", "03. high": "185.00", "04. low": "182.50",
            "05. price": "184.10", "06. volume": "3500000", "07. latest trading day": "2024-01-19"
        }}"#;

        let output = AlphaVantageFormat
            .transform(Dataset::Quote, "IBM", &january(), body)
            .unwrap();
        assert_eq!(output.records.len(), 1);
        match output.records[0].payload() {
            RecordPayload::Price(bar) => {
                assert_eq!(bar.close, dec!(184.10));
                assert_eq!(bar.volume, 3_500_000);
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let february = TimeRange::single_day(date(2024, 2, 1));
        let output = AlphaVantageFormat
            .transform(Dataset::Quote, "IBM", &february, body)
            .unwrap();
        assert!(output.records.is_empty());
        assert_eq!(output.dropped.len(), 1);
    }

    #[test]
    fn test_unknown_symbol_quote_yields_nothing() {
        let output = AlphaVantageFormat
            .transform(Dataset::Quote, "ZZZZ", &january(), r#"{"Global Quote": {}}"#)
            .unwrap();
        assert!(output.records.is_empty());
        assert!(output.dropped.is_empty());
    }

    #[test]
    fn test_overview_treats_none_as_absent() {
        let body = r#"{
            "Symbol": "IBM",
            "Name": "International Business Machines",
            "Sector": "TECHNOLOGY",
            "MarketCapitalization": "169000000000",
            "RevenueTTM": "61860000000",
            "GrossProfitTTM": "34300000000",
            "EPS": "8.14",
            "PERatio": "None",
            "LatestQuarter": "2023-12-31"
        }"#;

        let output = AlphaVantageFormat
            .transform(Dataset::Overview, "IBM", &january(), body)
            .unwrap();
        assert_eq!(output.records.len(), 1);

        let record = &output.records[0];
        assert_eq!(record.table(), RecordTable::Fundamentals);
        assert_eq!(record.timestamp().date_naive(), date(2023, 12, 31));
        match record.payload() {
            RecordPayload::Fundamental(snapshot) => {
                assert_eq!(snapshot.sector.as_deref(), Some("TECHNOLOGY"));
                assert_eq!(snapshot.eps, Some(dec!(8.14)));
                assert_eq!(snapshot.pe_ratio, None);
                assert_eq!(snapshot.debt_to_equity, None);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_overview_without_quarter_is_dropped() {
        let output = AlphaVantageFormat
            .transform(Dataset::Overview, "IBM", &january(), r#"{"Name": "IBM"}"#)
            .unwrap();
        assert!(output.records.is_empty());
        assert_eq!(output.dropped.len(), 1);
        assert!(output.dropped[0].reason.contains("LatestQuarter"));
    }

    #[test]
    fn test_plan_request_uses_dataset_function() {
        let req = AlphaVantageFormat.plan_request(
            Dataset::DailyPrices,
            "IBM",
            &january(),
            date(2024, 2, 1),
        );
        assert_eq!(req.get("function"), Some("TIME_SERIES_DAILY"));
        assert_eq!(req.get("outputsize"), Some("compact"));
    }
}
