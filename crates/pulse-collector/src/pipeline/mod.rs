//! ETL 수집 파이프라인.
//!
//! 심볼마다 Extract(fetch) → Transform → Load 순서로 처리합니다.
//! 심볼 간에는 제한된 병렬도로 동시에 실행되며, 한 심볼의 실패는 배치를 중단하지 않습니다.
//!
//! # 취소
//!
//! 작업 마감 시간이나 외부 취소 토큰이 발동하면 새 fetch 시도와 재시도 대기가 중단됩니다.
//! 이미 시작된 적재는 끝까지 진행되며 커밋된 심볼은 그대로 보존됩니다.
//! 완료되지 못한 심볼은 `Cancelled`로 보고됩니다.

pub mod job;
pub mod load;
pub mod transform;

pub use job::{FetchFailureKind, IngestionJob, JobResult, JobStatus, SymbolOutcome, SymbolResult};
pub use load::{LoadPolicy, LoadReport};
pub use transform::{
    AlphaVantageFormat, DroppedRecord, SourceFormat, TransformError, TransformOutput,
};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use pulse_core::{Dataset, TimeRange};
use pulse_data::{DataRequest, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Instrument};

use crate::error::{CollectorError, Result};
use crate::fetcher::{BackoffFetcher, FetchError};
use crate::stats::CollectionStats;

/// 파이프라인 설정.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// 동시에 처리할 최대 심볼 수
    pub batch_parallelism: usize,
    /// 작업 전체 마감 시간
    pub job_deadline: Option<Duration>,
    pub load: LoadPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_parallelism: 4,
            job_deadline: None,
            load: LoadPolicy::default(),
        }
    }
}

/// 수집 파이프라인.
pub struct IngestionPipeline {
    fetcher: BackoffFetcher,
    store: Arc<dyn RecordStore>,
    format: Arc<dyn SourceFormat>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        fetcher: BackoffFetcher,
        store: Arc<dyn RecordStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            format: Arc::new(AlphaVantageFormat),
            config,
        }
    }

    /// 응답 형식 교체.
    pub fn with_format(mut self, format: Arc<dyn SourceFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 심볼 목록과 기간으로 일봉 수집 작업을 실행합니다.
    pub async fn run_ingestion_job<S: AsRef<str>>(
        &self,
        symbols: impl IntoIterator<Item = S>,
        range: TimeRange,
    ) -> Result<JobResult> {
        let job = IngestionJob::new(symbols, range)?;
        self.run(job, CancellationToken::new()).await
    }

    /// 작업 실행.
    ///
    /// 작업을 시작할 수 없는 설정 오류만 `Err`로 반환하며,
    /// 심볼 단위 실패는 모두 [`JobResult`]에 기록됩니다.
    #[instrument(skip_all, fields(job_id = %job.id(), dataset = %job.dataset()))]
    pub async fn run(&self, mut job: IngestionJob, cancel: CancellationToken) -> Result<JobResult> {
        let requests = self.prepare(&job).await?;

        let job_id = job.id();
        let dataset = job.dataset();
        let range = *job.range();
        let started_at = Utc::now();
        let started = Instant::now();

        job.start();
        info!(
            job_id = %job_id,
            dataset = %dataset,
            range = %range,
            symbols = job.symbols().len(),
            parallelism = self.config.batch_parallelism,
            "수집 작업 시작"
        );

        let job_cancel = cancel.child_token();
        let deadline_timer = self.config.job_deadline.map(|deadline| {
            let token = job_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline_ms = deadline.as_millis() as u64, "작업 마감 시간 초과, 취소 중");
                token.cancel();
            })
        });

        // 심볼마다 결과 슬롯 하나, 정확히 한 번 기록
        let mut slots: Vec<Option<SymbolResult>> = vec![None; requests.len()];

        let completed: Vec<(usize, SymbolResult)> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, (symbol, request))| {
                let cancel = &job_cancel;
                let span = pulse_core::ingest_span!("symbol", job_id, &symbol);
                async move {
                    let result = self
                        .process_symbol(symbol, request, dataset, &range, cancel)
                        .await;
                    (index, result)
                }
                .instrument(span)
            })
            .buffer_unordered(self.config.batch_parallelism)
            .collect()
            .await;

        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        for (index, result) in completed {
            slots[index] = Some(result);
        }

        let results: Vec<SymbolResult> = slots
            .into_iter()
            .zip(job.symbols())
            .map(|(slot, symbol)| {
                slot.unwrap_or_else(|| {
                    SymbolResult::new(symbol.clone(), SymbolOutcome::Cancelled, Duration::ZERO)
                })
            })
            .collect();

        let status = JobStatus::aggregate(results.iter().map(|r| &r.outcome));
        job.finish(status);

        let result = JobResult {
            job_id,
            dataset,
            range,
            status,
            status_history: job.history().to_vec(),
            results,
            started_at,
            elapsed: started.elapsed(),
        };

        CollectionStats::from_job(&result).log_summary(&format!("{} 수집", dataset));

        Ok(result)
    }

    /// 작업 시작 전 검증 및 요청 생성.
    async fn prepare(&self, job: &IngestionJob) -> Result<Vec<(String, DataRequest)>> {
        if self.config.batch_parallelism == 0 {
            return Err(CollectorError::InvalidRequest(
                "batch parallelism must be at least 1".to_string(),
            ));
        }
        if self.fetcher.policy().max_attempts == 0 {
            return Err(CollectorError::InvalidRequest(
                "max attempts must be at least 1".to_string(),
            ));
        }

        let bucket = self
            .fetcher
            .limiter()
            .config_for(self.fetcher.provider_key())
            .await;
        let today = Utc::now().date_naive();

        job.symbols()
            .iter()
            .map(|symbol| -> Result<(String, DataRequest)> {
                let request = self
                    .format
                    .plan_request(job.dataset(), symbol, job.range(), today);
                bucket
                    .check_cost(request.cost)
                    .map_err(|e| CollectorError::InvalidRequest(e.to_string()))?;
                Ok((symbol.clone(), request))
            })
            .collect()
    }

    async fn process_symbol(
        &self,
        symbol: String,
        request: DataRequest,
        dataset: Dataset,
        range: &TimeRange,
        cancel: &CancellationToken,
    ) -> SymbolResult {
        let started = Instant::now();
        let outcome = self
            .extract_transform_load(&symbol, &request, dataset, range, cancel)
            .await;

        match &outcome {
            SymbolOutcome::Success { records, .. } => {
                info!(records, "심볼 수집 완료");
            }
            SymbolOutcome::Cancelled => warn!("심볼 수집 취소"),
            failed => warn!(stage = failed.failed_stage(), error = %failed, "심볼 수집 실패"),
        }

        SymbolResult::new(symbol, outcome, started.elapsed())
    }

    async fn extract_transform_load(
        &self,
        symbol: &str,
        request: &DataRequest,
        dataset: Dataset,
        range: &TimeRange,
        cancel: &CancellationToken,
    ) -> SymbolOutcome {
        // Extract
        let payload = match self.fetcher.fetch_with_cancel(request, cancel).await {
            Ok(outcome) => outcome.payload,
            Err(FetchError::Cancelled) => return SymbolOutcome::Cancelled,
            Err(err @ FetchError::RetryExhausted { .. }) => {
                return SymbolOutcome::FetchFailed {
                    kind: FetchFailureKind::Exhausted,
                    error: err.to_string(),
                }
            }
            Err(err) => {
                return SymbolOutcome::FetchFailed {
                    kind: FetchFailureKind::Fatal,
                    error: err.to_string(),
                }
            }
        };

        // Transform
        let output = match self.format.transform(dataset, symbol, range, &payload) {
            Ok(output) => output,
            Err(err) => {
                return SymbolOutcome::TransformFailed {
                    error: err.to_string(),
                    dropped: 0,
                }
            }
        };

        let dropped = output.dropped.len();
        if output.records.is_empty() {
            return SymbolOutcome::TransformFailed {
                error: "no valid records".to_string(),
                dropped,
            };
        }

        // 적재 시작 전 마지막 취소 확인
        if cancel.is_cancelled() {
            return SymbolOutcome::Cancelled;
        }

        // Load
        match load::load_records(self.store.as_ref(), &output.records, &self.config.load).await {
            Ok(report) => SymbolOutcome::Success {
                records: output.records.len(),
                inserted: report.inserted,
                updated: report.updated,
                dropped,
            },
            Err(failure) => SymbolOutcome::LoadFailed {
                error: failure.error.to_string(),
                attempts: failure.attempts,
            },
        }
    }
}
