//! # Pulse Core
//!
//! StockPulse 수집 시스템의 핵심 도메인 타입을 제공합니다.
//!
//! 이 크레이트는 수집 파이프라인 전반에서 사용되는 기본 타입을 제공합니다:
//! - 수집 기간 (`TimeRange`)
//! - 데이터셋 종류 (`Dataset`)
//! - 정규화된 레코드 및 upsert 키 (`NormalizedRecord`, `RecordKey`)
//! - 레코드 검증 에러
//! - 로깅 인프라

pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
