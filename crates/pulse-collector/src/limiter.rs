//! 제공자별 Token Bucket rate limiter.
//!
//! 제공자 키마다 버킷 하나를 두고, 토큰 리필/확인/차감을 버킷 단위 임계 구역에서
//! 한 번에 수행합니다. 동시 요청자가 같은 토큰을 이중으로 소비할 수 없습니다.
//!
//! 리미터는 전역 싱글톤이 아니라 주입되는 컴포넌트입니다.
//! 테스트마다 독립된 인스턴스를 만들 수 있습니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// 부동소수점 누적 오차 허용치.
const TOKEN_EPSILON: f64 = 1e-9;

/// 대기 루프의 최소 sleep 간격.
const MIN_WAIT: Duration = Duration::from_micros(1);

/// Limiter 에러.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    /// 절대 충족될 수 없는 요청 (비용 > 용량 등)
    #[error("Invalid rate limit request: {0}")]
    InvalidRequest(String),
}

/// 버킷 설정.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// 최대 토큰 수
    pub capacity: f64,
    /// 초당 리필 토큰 수
    pub refill_per_second: f64,
}

impl Default for BucketConfig {
    /// Alpha Vantage 무료 요금제: 분당 5회.
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_per_second: 5.0 / 60.0,
        }
    }
}

impl BucketConfig {
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }

    /// 분당 요청 수 기준 설정 (버스트 = 분당 요청 수).
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests as f64, requests as f64 / 60.0)
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        if !(self.capacity.is_finite() && self.capacity > 0.0) {
            return Err(LimiterError::InvalidRequest(format!(
                "capacity must be positive, got {}",
                self.capacity
            )));
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(LimiterError::InvalidRequest(format!(
                "refill rate must be positive, got {}",
                self.refill_per_second
            )));
        }
        Ok(())
    }

    /// 비용이 이 버킷에서 충족 가능한지 확인.
    pub fn check_cost(&self, cost: f64) -> Result<(), LimiterError> {
        if !(cost.is_finite() && cost > 0.0) {
            return Err(LimiterError::InvalidRequest(format!(
                "cost must be positive, got {}",
                cost
            )));
        }
        if cost > self.capacity {
            return Err(LimiterError::InvalidRequest(format!(
                "cost {} exceeds capacity {}",
                cost, self.capacity
            )));
        }
        Ok(())
    }
}

/// Token Bucket 구조체.
#[derive(Debug)]
pub struct TokenBucket {
    /// 현재 토큰 수
    tokens: f64,
    /// 마지막 리필 시간 (monotonic)
    last_refill: Instant,
    config: BucketConfig,
}

impl TokenBucket {
    /// 가득 찬 버킷 생성.
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: now,
            config,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn config(&self) -> BucketConfig {
        self.config
    }

    /// 토큰 리필.
    ///
    /// `now`가 마지막 리필보다 이르면 경과 시간은 0으로 취급합니다.
    pub fn refill_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_second)
            .min(self.config.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// 토큰 소비 시도.
    ///
    /// 성공하면 `Ok(())`, 부족하면 필요한 토큰이 쌓일 때까지의 대기 시간을 반환합니다.
    /// 비용 검증은 호출자 몫입니다.
    pub fn try_acquire_at(&mut self, cost: f64, now: Instant) -> Result<(), Duration> {
        self.refill_at(now);

        if self.tokens + TOKEN_EPSILON >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            Ok(())
        } else {
            let wait_secs = (cost - self.tokens) / self.config.refill_per_second;
            // 나노초 단위 올림: 반환된 시간만큼 기다리면 항상 충족
            Err(Duration::from_nanos((wait_secs * 1e9).ceil() as u64))
        }
    }
}

/// Rate Limit 확인 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitResult {
    /// 요청 허용됨
    Allowed,
    /// Rate limit 초과
    Limited {
        /// 필요한 토큰이 쌓일 때까지 대기 시간
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// 대기형 획득 결과.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireResult {
    pub granted: bool,
    pub waited: Duration,
}

type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Rate Limiter.
///
/// 제공자 키별로 버킷을 관리합니다. 등록되지 않은 키는 기본 설정으로
/// 처음 사용될 때 가득 찬 상태로 생성됩니다.
#[derive(Clone)]
pub struct RateLimiter {
    default_config: BucketConfig,
    buckets: Arc<RwLock<HashMap<String, SharedBucket>>>,
}

impl RateLimiter {
    /// 새 Rate Limiter 생성.
    pub fn new(default_config: BucketConfig) -> Result<Self, LimiterError> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 키별 설정 등록. 기존 버킷은 가득 찬 새 버킷으로 교체됩니다.
    pub async fn register(
        &self,
        key: impl Into<String>,
        config: BucketConfig,
    ) -> Result<(), LimiterError> {
        config.validate()?;
        let bucket = Arc::new(Mutex::new(TokenBucket::new(config, Instant::now())));
        self.buckets.write().await.insert(key.into(), bucket);
        Ok(())
    }

    async fn bucket(&self, key: &str) -> SharedBucket {
        if let Some(bucket) = self.buckets.read().await.get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(TokenBucket::new(
                self.default_config,
                Instant::now(),
            )))
        });
        Arc::clone(bucket)
    }

    /// 비대기 획득.
    pub async fn try_acquire(
        &self,
        key: &str,
        cost: f64,
    ) -> Result<RateLimitResult, LimiterError> {
        let bucket = self.bucket(key).await;
        let mut bucket = bucket.lock().await;
        bucket.config().check_cost(cost)?;

        match bucket.try_acquire_at(cost, Instant::now()) {
            Ok(()) => Ok(RateLimitResult::Allowed),
            Err(retry_after) => Ok(RateLimitResult::Limited { retry_after }),
        }
    }

    /// 대기형 획득.
    ///
    /// 토큰이 쌓일 때까지 대기합니다. `timeout` 안에 충족될 수 없음이 확실해지면
    /// 즉시 `granted: false`를 반환합니다. 대기 중에는 버킷 잠금을 보유하지 않습니다.
    pub async fn acquire_blocking(
        &self,
        key: &str,
        cost: f64,
        timeout: Option<Duration>,
    ) -> Result<AcquireResult, LimiterError> {
        let bucket = self.bucket(key).await;
        let start = Instant::now();
        // 표현할 수 없을 만큼 먼 제한은 제한 없음으로 취급
        let deadline = timeout.and_then(|t| start.checked_add(t));

        loop {
            let wait = {
                let mut guard = bucket.lock().await;
                guard.config().check_cost(cost)?;
                match guard.try_acquire_at(cost, Instant::now()) {
                    Ok(()) => {
                        return Ok(AcquireResult {
                            granted: true,
                            waited: start.elapsed(),
                        })
                    }
                    Err(wait) => wait.max(MIN_WAIT),
                }
            };

            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now.checked_add(wait).map_or(true, |ready| ready > deadline) {
                    tracing::debug!(
                        key,
                        cost,
                        wait_ms = wait.as_millis() as u64,
                        "토큰 대기 시간이 제한을 초과"
                    );
                    return Ok(AcquireResult {
                        granted: false,
                        waited: now - start,
                    });
                }
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// 현재 토큰 수 (버킷이 없으면 `None`).
    pub async fn tokens(&self, key: &str) -> Option<f64> {
        let bucket = self.buckets.read().await.get(key).cloned()?;
        let mut bucket = bucket.lock().await;
        bucket.refill_at(Instant::now());
        Some(bucket.tokens())
    }

    /// 키의 버킷 설정.
    pub async fn config_for(&self, key: &str) -> BucketConfig {
        match self.buckets.read().await.get(key) {
            Some(bucket) => bucket.lock().await.config(),
            None => self.default_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter(capacity: f64, rate: f64) -> RateLimiter {
        RateLimiter::new(BucketConfig::new(capacity, rate)).unwrap()
    }

    #[test]
    fn test_bucket_config_validation() {
        assert!(BucketConfig::default().validate().is_ok());
        assert!(BucketConfig::new(0.0, 1.0).validate().is_err());
        assert!(BucketConfig::new(5.0, 0.0).validate().is_err());
        assert!(BucketConfig::new(f64::NAN, 1.0).validate().is_err());

        let config = BucketConfig::new(5.0, 1.0);
        assert!(config.check_cost(5.0).is_ok());
        assert!(config.check_cost(5.5).is_err());
        assert!(config.check_cost(0.0).is_err());
        assert!(config.check_cost(-1.0).is_err());
    }

    #[test]
    fn test_per_minute() {
        let config = BucketConfig::per_minute(60);
        assert_eq!(config.capacity, 60.0);
        assert!((config.refill_per_second - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited() {
        let limiter = limiter(3.0, 1.0);

        for _ in 0..3 {
            assert!(limiter.try_acquire("av", 1.0).await.unwrap().is_allowed());
        }

        match limiter.try_acquire("av", 1.0).await.unwrap() {
            RateLimitResult::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected Limited, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire("av", 1.0).await.unwrap().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cost_over_capacity_fails_immediately() {
        let limiter = limiter(5.0, 1.0);
        let start = Instant::now();

        let err = limiter
            .acquire_blocking("av", 6.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LimiterError::InvalidRequest(_)));
        assert!(limiter.try_acquire("av", 6.0).await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocking_waits_for_refill() {
        let limiter = limiter(2.0, 0.5);
        limiter.acquire_blocking("av", 2.0, None).await.unwrap();

        let result = limiter.acquire_blocking("av", 1.0, None).await.unwrap();
        assert!(result.granted);
        assert_eq!(result.waited, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocking_timeout_returns_not_granted() {
        let limiter = limiter(1.0, 0.1);
        limiter.acquire_blocking("av", 1.0, None).await.unwrap();

        let result = limiter
            .acquire_blocking("av", 1.0, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!result.granted);

        // 토큰은 소비되지 않아야 함
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire("av", 1.0).await.unwrap().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1.0, 0.01);
        limiter
            .register("slow", BucketConfig::new(2.0, 0.01))
            .await
            .unwrap();

        assert!(limiter.try_acquire("a", 1.0).await.unwrap().is_allowed());
        assert!(!limiter.try_acquire("a", 1.0).await.unwrap().is_allowed());
        assert!(limiter.try_acquire("b", 1.0).await.unwrap().is_allowed());

        assert!(limiter.try_acquire("slow", 2.0).await.unwrap().is_allowed());
        assert_eq!(limiter.config_for("slow").await.capacity, 2.0);
        assert!(limiter.register("bad", BucketConfig::new(0.0, 1.0)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_never_oversubscribe() {
        let limiter = limiter(4.0, 1.0);
        let start = Instant::now();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire_blocking("av", 1.0, None).await.unwrap();
                    Instant::now()
                })
            })
            .collect();

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }

        // 임의 시점 t까지 허용된 누적 비용 ≤ capacity + rate × t
        grants.sort();
        for (i, granted_at) in grants.iter().enumerate() {
            let elapsed = granted_at.duration_since(start).as_secs_f64();
            assert!(
                (i + 1) as f64 <= 4.0 + elapsed + 1e-6,
                "grant {} at {:.3}s oversubscribed",
                i + 1,
                elapsed
            );
        }

        let tokens = limiter.tokens("av").await.unwrap();
        assert!((0.0..=4.0).contains(&tokens));
    }

    proptest! {
        #[test]
        fn prop_bucket_stays_within_bounds(
            capacity in 1.0f64..20.0,
            rate in 0.05f64..10.0,
            ops in prop::collection::vec((0u64..5_000, 0.1f64..1.0), 1..200),
        ) {
            let config = BucketConfig::new(capacity, rate);
            let base = Instant::now();
            let mut bucket = TokenBucket::new(config, base);
            let mut elapsed_ms = 0u64;
            let mut granted = 0.0f64;

            for (advance_ms, fraction) in ops {
                elapsed_ms += advance_ms;
                let cost = (capacity * fraction).max(0.01);
                let now = base + Duration::from_millis(elapsed_ms);

                if bucket.try_acquire_at(cost, now).is_ok() {
                    granted += cost;
                }

                prop_assert!(bucket.tokens() >= 0.0);
                prop_assert!(bucket.tokens() <= capacity + TOKEN_EPSILON);

                let budget = capacity + rate * (elapsed_ms as f64 / 1000.0);
                prop_assert!(granted <= budget + 1e-6);
            }
        }

        #[test]
        fn prop_wait_is_sufficient(
            capacity in 1.0f64..20.0,
            rate in 0.05f64..10.0,
            fraction in 0.1f64..1.0,
        ) {
            let config = BucketConfig::new(capacity, rate);
            let base = Instant::now();
            let mut bucket = TokenBucket::new(config, base);
            let cost = capacity * fraction;

            prop_assert!(bucket.try_acquire_at(capacity, base).is_ok());
            let wait = bucket.try_acquire_at(cost, base).unwrap_err();
            prop_assert!(bucket.try_acquire_at(cost, base + wait).is_ok());
        }
    }
}
