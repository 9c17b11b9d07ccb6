//! 수집 통계 구조체.

use serde::Serialize;
use std::time::Duration;

use crate::pipeline::{JobResult, SymbolOutcome};

/// 수집 작업 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    /// 총 심볼 수
    pub total: usize,
    /// 성공 심볼 수
    pub success: usize,
    /// fetch 단계 실패
    pub fetch_failed: usize,
    /// 변환 단계 실패
    pub transform_failed: usize,
    /// 적재 단계 실패
    pub load_failed: usize,
    /// 취소되어 완료되지 않은 심볼
    pub cancelled: usize,
    /// 저장된 총 레코드 수
    pub records: usize,
    pub inserted: usize,
    pub updated: usize,
    /// 검증 실패로 버려진 레코드 수
    pub dropped: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 작업 결과 집계
    pub fn from_job(result: &JobResult) -> Self {
        let mut stats = Self {
            total: result.results.len(),
            elapsed: result.elapsed,
            ..Default::default()
        };

        for symbol in &result.results {
            match &symbol.outcome {
                SymbolOutcome::Success {
                    records,
                    inserted,
                    updated,
                    dropped,
                } => {
                    stats.success += 1;
                    stats.records += records;
                    stats.inserted += inserted;
                    stats.updated += updated;
                    stats.dropped += dropped;
                }
                SymbolOutcome::FetchFailed { .. } => stats.fetch_failed += 1,
                SymbolOutcome::TransformFailed { dropped, .. } => {
                    stats.transform_failed += 1;
                    stats.dropped += dropped;
                }
                SymbolOutcome::LoadFailed { .. } => stats.load_failed += 1,
                SymbolOutcome::Cancelled => stats.cancelled += 1,
            }
        }

        stats
    }

    /// 실패 심볼 수 (취소 포함)
    pub fn errors(&self) -> usize {
        self.fetch_failed + self.transform_failed + self.load_failed + self.cancelled
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success as f64 / self.total as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            success = self.success,
            fetch_failed = self.fetch_failed,
            transform_failed = self.transform_failed,
            load_failed = self.load_failed,
            cancelled = self.cancelled,
            records = self.records,
            inserted = self.inserted,
            updated = self.updated,
            dropped = self.dropped,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}
