//! 수집 작업 및 결과 타입.

use chrono::{DateTime, Utc};
use pulse_core::{Dataset, TimeRange};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CollectorError, Result};

/// 작업 상태.
///
/// `Pending → Running → Completed | PartiallyFailed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PartiallyFailed | JobStatus::Failed
        )
    }

    /// 심볼별 결과로 최종 상태 결정.
    ///
    /// 빈 배치는 `Completed`입니다.
    pub fn aggregate<'a>(outcomes: impl IntoIterator<Item = &'a SymbolOutcome>) -> Self {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        for outcome in outcomes {
            if outcome.is_success() {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        match (succeeded, failed) {
            (_, 0) => JobStatus::Completed,
            (0, _) => JobStatus::Failed,
            _ => JobStatus::PartiallyFailed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyFailed => "partially_failed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 수집 단위 작업.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionJob {
    id: Uuid,
    symbols: Vec<String>,
    range: TimeRange,
    dataset: Dataset,
    /// 상태 전이 기록 (마지막 값이 현재 상태)
    history: Vec<JobStatus>,
}

impl IngestionJob {
    /// 새 작업 생성.
    ///
    /// 심볼은 공백 제거 후 대문자로 정규화되며, 중복은 처음 나온 것만 남습니다.
    /// 빈 심볼이 있으면 `InvalidRequest`입니다.
    pub fn new<S: AsRef<str>>(
        symbols: impl IntoIterator<Item = S>,
        range: TimeRange,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::new();

        for symbol in symbols {
            let symbol = symbol.as_ref().trim().to_uppercase();
            if symbol.is_empty() {
                return Err(CollectorError::InvalidRequest(
                    "심볼이 비어 있습니다".to_string(),
                ));
            }
            if seen.insert(symbol.clone()) {
                normalized.push(symbol);
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            symbols: normalized,
            range,
            dataset: Dataset::default(),
            history: vec![JobStatus::Pending],
        })
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn status(&self) -> JobStatus {
        self.history
            .last()
            .copied()
            .unwrap_or(JobStatus::Pending)
    }

    /// 지금까지의 상태 전이.
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    /// `Pending → Running`. 이미 시작된 작업이면 무시됩니다.
    pub(crate) fn start(&mut self) {
        if self.status() == JobStatus::Pending {
            self.history.push(JobStatus::Running);
        }
    }

    /// `Running → 종료 상태`. 종료 상태가 아니거나 실행 중이 아니면 무시됩니다.
    pub(crate) fn finish(&mut self, status: JobStatus) {
        if status.is_terminal() && self.status() == JobStatus::Running {
            self.history.push(status);
        }
    }
}

/// Fetch 실패 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailureKind {
    /// 재시도 불가 오류
    Fatal,
    /// 재시도 횟수 소진
    Exhausted,
}

/// 심볼별 결과.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SymbolOutcome {
    Success {
        records: usize,
        inserted: usize,
        updated: usize,
        dropped: usize,
    },
    FetchFailed {
        kind: FetchFailureKind,
        error: String,
    },
    TransformFailed {
        error: String,
        dropped: usize,
    },
    LoadFailed {
        error: String,
        attempts: u32,
    },
    /// 취소/마감으로 완료되지 않음
    Cancelled,
}

impl SymbolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SymbolOutcome::Success { .. })
    }

    /// 실패한 단계 (성공이면 `None`).
    pub fn failed_stage(&self) -> Option<&'static str> {
        match self {
            SymbolOutcome::Success { .. } => None,
            SymbolOutcome::FetchFailed { .. } => Some("fetch"),
            SymbolOutcome::TransformFailed { .. } => Some("transform"),
            SymbolOutcome::LoadFailed { .. } => Some("load"),
            SymbolOutcome::Cancelled => Some("cancelled"),
        }
    }
}

impl fmt::Display for SymbolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolOutcome::Success {
                records,
                inserted,
                updated,
                dropped,
            } => write!(
                f,
                "success ({} records: {} inserted, {} updated, {} dropped)",
                records, inserted, updated, dropped
            ),
            SymbolOutcome::FetchFailed { kind, error } => {
                let kind = match kind {
                    FetchFailureKind::Fatal => "fatal",
                    FetchFailureKind::Exhausted => "exhausted",
                };
                write!(f, "fetch failed ({}): {}", kind, error)
            }
            SymbolOutcome::TransformFailed { error, dropped } => {
                write!(f, "transform failed ({} dropped): {}", dropped, error)
            }
            SymbolOutcome::LoadFailed { error, attempts } => {
                write!(f, "load failed after {} attempts: {}", attempts, error)
            }
            SymbolOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 심볼 하나의 처리 결과.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolResult {
    pub symbol: String,
    #[serde(flatten)]
    pub outcome: SymbolOutcome,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl SymbolResult {
    pub fn new(symbol: impl Into<String>, outcome: SymbolOutcome, elapsed: Duration) -> Self {
        Self {
            symbol: symbol.into(),
            outcome,
            elapsed,
        }
    }
}

/// 작업 결과.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub dataset: Dataset,
    pub range: TimeRange,
    pub status: JobStatus,
    /// 작업 상태 전이 (`Pending → Running → status`)
    pub status_history: Vec<JobStatus>,
    /// 작업의 심볼 순서와 같음
    pub results: Vec<SymbolResult>,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl JobResult {
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.results
            .iter()
            .find(|r| r.symbol == symbol)
            .map(|r| &r.outcome)
    }

    /// 재처리 대상 심볼.
    pub fn failed_symbols(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_success())
            .map(|r| r.symbol.as_str())
            .collect()
    }

    pub fn succeeded_symbols(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.symbol.as_str())
            .collect()
    }
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> TimeRange {
        TimeRange::single_day(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
    }

    fn success() -> SymbolOutcome {
        SymbolOutcome::Success {
            records: 1,
            inserted: 1,
            updated: 0,
            dropped: 0,
        }
    }

    #[test]
    fn test_symbols_are_normalized() {
        let job = IngestionJob::new([" aapl", "MSFT", "Aapl ", "ibm"], range()).unwrap();
        assert_eq!(job.symbols(), &["AAPL", "MSFT", "IBM"]);
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.dataset(), Dataset::DailyPrices);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut job = IngestionJob::new(["AAPL"], range()).unwrap();
        assert!(!job.status().is_terminal());

        // 시작 전 종료는 무시
        job.finish(JobStatus::Completed);
        assert_eq!(job.history(), &[JobStatus::Pending]);

        job.start();
        job.start();
        // 종료 상태가 아닌 값은 무시
        job.finish(JobStatus::Pending);
        assert_eq!(job.status(), JobStatus::Running);

        job.finish(JobStatus::Failed);
        job.finish(JobStatus::Completed);
        assert_eq!(
            job.history(),
            &[JobStatus::Pending, JobStatus::Running, JobStatus::Failed]
        );
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_empty_symbol_is_invalid() {
        let err = IngestionJob::new(["AAPL", "  "], range()).unwrap_err();
        assert!(matches!(err, CollectorError::InvalidRequest(_)));
    }

    #[test]
    fn test_status_aggregation() {
        let transform_failed = SymbolOutcome::TransformFailed {
            error: "no valid records".into(),
            dropped: 3,
        };

        assert_eq!(
            JobStatus::aggregate(Vec::<&SymbolOutcome>::new()),
            JobStatus::Completed
        );
        assert_eq!(
            JobStatus::aggregate([&success(), &success()]),
            JobStatus::Completed
        );
        assert_eq!(
            JobStatus::aggregate([&success(), &transform_failed]),
            JobStatus::PartiallyFailed
        );
        assert_eq!(
            JobStatus::aggregate([&transform_failed, &SymbolOutcome::Cancelled]),
            JobStatus::Failed
        );
    }

    #[test]
    fn test_job_result_serializes_flat_outcome() {
        let result = JobResult {
            job_id: Uuid::nil(),
            dataset: Dataset::Quote,
            range: range(),
            status: JobStatus::PartiallyFailed,
            status_history: vec![
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::PartiallyFailed,
            ],
            results: vec![
                SymbolResult::new("AAPL", success(), Duration::from_millis(15)),
                SymbolResult::new(
                    "ZZZZ",
                    SymbolOutcome::FetchFailed {
                        kind: FetchFailureKind::Fatal,
                        error: "HTTP 400".into(),
                    },
                    Duration::from_millis(3),
                ),
            ],
            started_at: Utc::now(),
            elapsed: Duration::from_millis(20),
        };

        assert_eq!(result.failed_symbols(), vec!["ZZZZ"]);
        assert_eq!(result.succeeded_symbols(), vec!["AAPL"]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "partially_failed");
        assert_eq!(
            json["status_history"],
            serde_json::json!(["pending", "running", "partially_failed"])
        );
        assert_eq!(json["dataset"], "quote");
        assert_eq!(json["elapsed_ms"], 20);
        assert_eq!(json["results"][0]["outcome"], "success");
        assert_eq!(json["results"][1]["kind"], "fatal");
        assert_eq!(json["results"][1]["elapsed_ms"], 3);
    }
}
