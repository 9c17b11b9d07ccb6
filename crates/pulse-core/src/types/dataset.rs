//! 수집 데이터셋 종류.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::RecordTable;

/// 수집 대상 데이터셋.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// 일봉 시계열 (TIME_SERIES_DAILY)
    #[default]
    DailyPrices,
    /// 최신 시세 (GLOBAL_QUOTE)
    Quote,
    /// 기업 개요 및 재무 지표 (OVERVIEW)
    Overview,
}

impl Dataset {
    /// 데이터 제공자 함수명.
    pub fn function(&self) -> &'static str {
        match self {
            Dataset::DailyPrices => "TIME_SERIES_DAILY",
            Dataset::Quote => "GLOBAL_QUOTE",
            Dataset::Overview => "OVERVIEW",
        }
    }

    /// 저장 대상 테이블.
    pub fn table(&self) -> RecordTable {
        match self {
            Dataset::DailyPrices | Dataset::Quote => RecordTable::Prices,
            Dataset::Overview => RecordTable::Fundamentals,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::DailyPrices => write!(f, "daily"),
            Dataset::Quote => write!(f, "quote"),
            Dataset::Overview => write!(f, "overview"),
        }
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "daily_prices" => Ok(Dataset::DailyPrices),
            "quote" => Ok(Dataset::Quote),
            "overview" | "fundamental" => Ok(Dataset::Overview),
            _ => Err(format!("Unknown dataset: {}", s)),
        }
    }
}
