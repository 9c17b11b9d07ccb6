//! 수집 기간 타입.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RecordError, RecordResult};

/// 수집 기간 (시작일, 종료일 모두 포함).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeRange {
    /// 새 기간 생성.
    ///
    /// `start > end`이면 [`RecordError::InvalidRange`]를 반환합니다.
    pub fn new(start: NaiveDate, end: NaiveDate) -> RecordResult<Self> {
        if start > end {
            return Err(RecordError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// `today`를 종료일로 하는 최근 `days`일 기간.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let start = today - Duration::days(i64::from(days.saturating_sub(1)));
        Self { start, end: today }
    }

    /// 단일 일자 기간.
    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// 해당 일자가 기간에 포함되는지 확인.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// 기간에 포함된 일수.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_time_range_rejects_inverted_bounds() {
        let err = TimeRange::new(date(2024, 3, 2), date(2024, 3, 1)).unwrap_err();
        assert!(matches!(err, RecordError::InvalidRange { .. }));
    }

    #[test]
    fn test_time_range_contains_is_inclusive() {
        let range = TimeRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        assert!(range.contains(date(2024, 1, 1)));
        assert!(range.contains(date(2024, 1, 31)));
        assert!(!range.contains(date(2024, 2, 1)));
        assert_eq!(range.num_days(), 31);
    }

    #[test]
    fn test_last_days() {
        let range = TimeRange::last_days(date(2024, 1, 10), 10);
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2024, 1, 10));

        // 0일은 단일 일자로 취급
        let range = TimeRange::last_days(date(2024, 1, 10), 0);
        assert_eq!(range, TimeRange::single_day(date(2024, 1, 10)));
    }
}
