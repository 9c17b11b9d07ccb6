//! 환경변수 기반 설정 모듈.

use std::time::Duration;

use crate::error::CollectorError;
use crate::fetcher::RetryPolicy;
use crate::limiter::BucketConfig;
use crate::pipeline::{LoadPolicy, PipelineConfig};
use crate::Result;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 데이터베이스 설정
    pub database: DatabaseConfig,
    /// 데이터 제공자 설정
    pub provider: ProviderConfig,
    /// Rate limit 설정
    pub rate_limit: RateLimitConfig,
    /// 재시도 설정
    pub retry: RetryConfig,
    /// 파이프라인 설정
    pub pipeline: PipelineSettings,
    /// 데몬 모드 설정
    pub daemon: DaemonConfig,
}

/// 데이터베이스 설정
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// 데이터베이스 URL (PostgreSQL 저장소 사용 시 필수)
    pub url: Option<String>,
    /// 풀의 최대 연결 수
    pub max_connections: u32,
}

/// 데이터 제공자 설정
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Alpha Vantage API 키
    pub api_key: Option<String>,
    pub base_url: String,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// Rate limiter 키
    pub key: String,
}

/// Rate limit 설정
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 버킷 용량 (토큰)
    pub capacity: f64,
    /// 초당 리필 토큰 수
    pub refill_per_second: f64,
    /// 시도당 토큰 대기 제한 (초)
    pub acquire_timeout_secs: u64,
}

/// 재시도 설정
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter: bool,
}

/// 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 동시에 처리할 심볼 수
    pub batch_parallelism: usize,
    /// 작업 마감 시간 (초)
    pub job_deadline_secs: Option<u64>,
    /// 적재 최대 시도 횟수
    pub load_max_attempts: u32,
    /// 적재 재시도 간격 (밀리초)
    pub load_retry_delay_ms: u64,
}

/// 데몬 모드 설정
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 작업 실행 주기 (분 단위)
    pub interval_minutes: u64,
}

impl CollectorConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정 로드
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let config = Self {
            database: DatabaseConfig {
                url: env.string("DATABASE_URL"),
                max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 5),
            },
            provider: ProviderConfig {
                api_key: env.string("ALPHA_VANTAGE_API_KEY"),
                base_url: env
                    .string("ALPHA_VANTAGE_BASE_URL")
                    .unwrap_or_else(|| "https://www.alphavantage.co".to_string()),
                request_timeout_secs: env.parse("PROVIDER_REQUEST_TIMEOUT_SECS", 10),
                key: env
                    .string("PROVIDER_KEY")
                    .unwrap_or_else(|| "alpha_vantage".to_string()),
            },
            rate_limit: RateLimitConfig {
                capacity: env.parse("RATE_LIMIT_CAPACITY", 5.0),
                refill_per_second: env.parse("RATE_LIMIT_REFILL_PER_SECOND", 5.0 / 60.0),
                acquire_timeout_secs: env.parse("RATE_LIMIT_ACQUIRE_TIMEOUT_SECS", 30),
            },
            retry: RetryConfig {
                max_attempts: env.parse("FETCH_MAX_ATTEMPTS", 5),
                base_delay_secs: env.parse("FETCH_BASE_DELAY_SECS", 1.0),
                max_delay_secs: env.parse("FETCH_MAX_DELAY_SECS", 60.0),
                jitter: env.bool("FETCH_JITTER", true),
            },
            pipeline: PipelineSettings {
                batch_parallelism: env.parse("PIPELINE_BATCH_PARALLELISM", 4),
                job_deadline_secs: env
                    .string("PIPELINE_JOB_DEADLINE_SECS")
                    .and_then(|v| v.trim().parse().ok()),
                load_max_attempts: env.parse("LOAD_MAX_ATTEMPTS", 3),
                load_retry_delay_ms: env.parse("LOAD_RETRY_DELAY_MS", 200),
            },
            daemon: DaemonConfig {
                interval_minutes: env.parse("DAEMON_INTERVAL_MINUTES", 60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// 진행이 불가능한 설정을 작업 시작 전에 거부
    pub fn validate(&self) -> Result<()> {
        self.bucket_config()
            .validate()
            .map_err(|e| CollectorError::InvalidRequest(e.to_string()))?;

        // 요청 1건 비용(1 토큰)을 용량이 감당해야 함
        self.bucket_config()
            .check_cost(1.0)
            .map_err(|e| CollectorError::InvalidRequest(e.to_string()))?;

        if self.retry.max_attempts == 0 {
            return Err(CollectorError::InvalidRequest(
                "FETCH_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.pipeline.batch_parallelism == 0 {
            return Err(CollectorError::InvalidRequest(
                "PIPELINE_BATCH_PARALLELISM must be at least 1".to_string(),
            ));
        }
        if self.daemon.interval_minutes == 0 {
            return Err(CollectorError::InvalidRequest(
                "DAEMON_INTERVAL_MINUTES must be at least 1".to_string(),
            ));
        }

        // Duration 변환이 가능한 값인지 미리 확인
        self.retry_policy()?;
        self.daemon.interval()?;
        Ok(())
    }

    /// 데이터베이스 URL (없으면 설정 에러)
    pub fn database_url(&self) -> Result<&str> {
        self.database.url.as_deref().ok_or_else(|| {
            CollectorError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })
    }

    /// API 키 (없으면 설정 에러)
    pub fn api_key(&self) -> Result<&str> {
        self.provider.api_key.as_deref().ok_or_else(|| {
            CollectorError::Config(
                "ALPHA_VANTAGE_API_KEY 환경변수가 설정되지 않았습니다".to_string(),
            )
        })
    }

    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig::new(self.rate_limit.capacity, self.rate_limit.refill_per_second)
    }

    /// 재시도 정책. 지연 값이 음수/NaN이거나 너무 크면 `InvalidRequest`.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: secs_to_duration("FETCH_BASE_DELAY_SECS", self.retry.base_delay_secs)?,
            max_delay: secs_to_duration("FETCH_MAX_DELAY_SECS", self.retry.max_delay_secs)?,
            jitter: self.retry.jitter,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_parallelism: self.pipeline.batch_parallelism,
            job_deadline: self.pipeline.job_deadline_secs.map(Duration::from_secs),
            load: LoadPolicy {
                max_attempts: self.pipeline.load_max_attempts,
                retry_delay: Duration::from_millis(self.pipeline.load_retry_delay_ms),
            },
        }
    }
}

impl ProviderConfig {
    /// 요청 타임아웃을 Duration으로 반환
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RateLimitConfig {
    /// 토큰 대기 제한을 Duration으로 반환
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl DaemonConfig {
    /// 작업 실행 주기를 Duration으로 반환
    pub fn interval(&self) -> Result<Duration> {
        self.interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                CollectorError::InvalidRequest(format!(
                    "DAEMON_INTERVAL_MINUTES is too large: {}",
                    self.interval_minutes
                ))
            })
    }
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        CollectorError::InvalidRequest(format!("{} is not a valid delay ({}): {}", name, secs, e))
    })
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// 값을 파싱 (실패 시 기본값 사용)
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// bool 값 파싱
    fn bool(&self, key: &str, default: bool) -> bool {
        self.string(key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(default)
    }
}
