//! 재시도 fetcher.
//!
//! 논리적 요청 하나를 제한된 횟수 안에서 재시도하며 실행합니다.
//! 매 시도 전에 rate limiter 토큰을 대기형으로 획득하고, 실패는 다음과 같이 분류합니다:
//!
//! | 실패 | 분류 |
//! |------|------|
//! | HTTP 429, 5xx | 재시도 |
//! | 연결 오류, 타임아웃 | 재시도 |
//! | 토큰 대기 시간 초과 (backpressure) | 재시도 |
//! | 그 외 HTTP 4xx | 즉시 중단 (`FatalProviderError`) |
//!
//! 시도 *n* (n ≥ 2) 이전 대기 시간은 `base_delay × 2^(n-2)`이며 `max_delay`로 제한됩니다.
//! jitter가 켜져 있으면 `[0, delay)` 범위의 임의 값이 더해집니다.
//!
//! 재시도 루프는 재귀 없이 명시적 상태 기계로 구현됩니다:
//! `Attempting → Waiting → Attempting → … → Terminal`.

use pulse_data::{DataRequest, HttpDataProvider, ProviderResponse, TransportError};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::limiter::{LimiterError, RateLimiter};

/// 재시도 정책.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// jitter 없는 정책 (테스트, 결정적 스케줄).
    pub fn deterministic(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: false,
            ..Default::default()
        }
    }

    /// 시도 `attempt` 이전 기본 대기 시간 (jitter 제외).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(30);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let bound = delay.as_nanos().min(u64::MAX as u128) as u64;
        let extra = rand::thread_rng().gen_range(0..bound);
        delay.saturating_add(Duration::from_nanos(extra))
    }
}

/// 시도 1회 실패 원인.
#[derive(Debug, Clone)]
pub enum AttemptError {
    /// HTTP 오류 응답
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    /// 연결 수준 오류
    Transport(TransportError),
    /// 토큰 대기 시간 초과
    Backpressure { waited: Duration },
}

impl AttemptError {
    fn from_response(response: ProviderResponse) -> Self {
        let retry_after = response.retry_after();
        AttemptError::Http {
            status: response.status,
            body: response.body,
            retry_after,
        }
    }

    /// 재시도 가능 여부.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Http { status, .. } => *status == 429 || *status >= 500,
            AttemptError::Transport(err) => err.is_retryable(),
            AttemptError::Backpressure { .. } => true,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Http { status, .. } => write!(f, "HTTP {}", status),
            AttemptError::Transport(err) => write!(f, "{}", err),
            AttemptError::Backpressure { waited } => {
                write!(f, "rate limiter backpressure after {:?}", waited)
            }
        }
    }
}

/// 시도 결과.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure(String),
    FatalFailure(String),
}

/// 시도 기록 (fetch 1회 동안만 유지).
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub attempt_number: u32,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
    /// 다음 시도 전 대기 시간 (마지막 시도면 `None`)
    pub delay_before_next: Option<Duration>,
}

/// fetch 성공 결과.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub payload: String,
    pub attempts: Vec<FetchAttempt>,
}

/// fetch 실패.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 재시도 불가능한 요청 오류
    #[error("Fatal provider error ({status:?}): {body}")]
    FatalProviderError { status: Option<u16>, body: String },

    /// 재시도 횟수 소진
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: AttemptError,
    },

    /// 취소 또는 작업 마감 시간 초과
    #[error("Fetch cancelled")]
    Cancelled,

    /// 충족 불가능한 요청
    #[error(transparent)]
    InvalidRequest(#[from] LimiterError),
}

enum FetchState {
    Attempting { attempt: u32 },
    Waiting { next_attempt: u32, delay: Duration },
    Terminal(Result<(u16, String), FetchError>),
}

enum AttemptStep {
    Succeeded(ProviderResponse),
    Failed(AttemptError),
    Cancelled,
    Invalid(LimiterError),
}

/// 재시도 fetcher.
#[derive(Clone)]
pub struct BackoffFetcher {
    provider: Arc<dyn HttpDataProvider>,
    limiter: RateLimiter,
    provider_key: String,
    policy: RetryPolicy,
    acquire_timeout: Duration,
}

impl BackoffFetcher {
    /// 새 fetcher 생성. 제공자 이름을 limiter 키로 사용합니다.
    pub fn new(
        provider: Arc<dyn HttpDataProvider>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        let provider_key = provider.name().to_string();
        Self {
            provider,
            limiter,
            provider_key,
            policy,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_provider_key(mut self, key: impl Into<String>) -> Self {
        self.provider_key = key.into();
        self
    }

    /// 시도당 토큰 대기 제한.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_key(&self) -> &str {
        &self.provider_key
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 취소 없이 요청 실행.
    pub async fn fetch(&self, request: &DataRequest) -> Result<FetchOutcome, FetchError> {
        self.fetch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// 요청 실행.
    ///
    /// 취소되면 새 시도를 시작하지 않고, 토큰 대기/재시도 대기/진행 중인 요청을 중단합니다.
    pub async fn fetch_with_cancel(
        &self,
        request: &DataRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let mut attempts: Vec<FetchAttempt> = Vec::new();
        let mut state = FetchState::Attempting { attempt: 1 };

        loop {
            state = match state {
                FetchState::Attempting { attempt } => {
                    if cancel.is_cancelled() {
                        FetchState::Terminal(Err(FetchError::Cancelled))
                    } else {
                        let started_at = Instant::now();
                        let step = self.attempt_once(request, cancel).await;
                        self.next_state(attempt, started_at, step, &mut attempts)
                    }
                }
                FetchState::Waiting {
                    next_attempt,
                    delay,
                } => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => FetchState::Terminal(Err(FetchError::Cancelled)),
                        () = tokio::time::sleep(delay) => FetchState::Attempting {
                            attempt: next_attempt,
                        },
                    }
                }
                FetchState::Terminal(result) => {
                    return result.map(|(status, payload)| FetchOutcome {
                        status,
                        payload,
                        attempts,
                    });
                }
            };
        }
    }

    async fn attempt_once(&self, request: &DataRequest, cancel: &CancellationToken) -> AttemptStep {
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => return AttemptStep::Cancelled,
            acquired = self.limiter.acquire_blocking(
                &self.provider_key,
                request.cost,
                Some(self.acquire_timeout),
            ) => acquired,
        };

        match acquired {
            Ok(result) if result.granted => {}
            Ok(result) => {
                return AttemptStep::Failed(AttemptError::Backpressure {
                    waited: result.waited,
                })
            }
            Err(err) => return AttemptStep::Invalid(err),
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return AttemptStep::Cancelled,
            response = self.provider.request(request) => response,
        };

        match response {
            Ok(response) if response.is_success() => AttemptStep::Succeeded(response),
            Ok(response) => AttemptStep::Failed(AttemptError::from_response(response)),
            Err(err) => AttemptStep::Failed(AttemptError::Transport(err)),
        }
    }

    fn next_state(
        &self,
        attempt: u32,
        started_at: Instant,
        step: AttemptStep,
        attempts: &mut Vec<FetchAttempt>,
    ) -> FetchState {
        let error = match step {
            AttemptStep::Succeeded(response) => {
                attempts.push(FetchAttempt {
                    attempt_number: attempt,
                    started_at,
                    outcome: AttemptOutcome::Success,
                    delay_before_next: None,
                });
                debug!(
                    provider = %self.provider_key,
                    attempt,
                    status = response.status,
                    "요청 성공"
                );
                return FetchState::Terminal(Ok((response.status, response.body)));
            }
            AttemptStep::Cancelled => return FetchState::Terminal(Err(FetchError::Cancelled)),
            AttemptStep::Invalid(err) => {
                return FetchState::Terminal(Err(FetchError::InvalidRequest(err)))
            }
            AttemptStep::Failed(error) => error,
        };

        if !error.is_retryable() {
            attempts.push(FetchAttempt {
                attempt_number: attempt,
                started_at,
                outcome: AttemptOutcome::FatalFailure(error.to_string()),
                delay_before_next: None,
            });
            warn!(provider = %self.provider_key, attempt, error = %error, "재시도 불가 오류");

            let (status, body) = match error {
                AttemptError::Http { status, body, .. } => (Some(status), body),
                other => (None, other.to_string()),
            };
            return FetchState::Terminal(Err(FetchError::FatalProviderError { status, body }));
        }

        if attempt >= self.policy.max_attempts {
            attempts.push(FetchAttempt {
                attempt_number: attempt,
                started_at,
                outcome: AttemptOutcome::RetryableFailure(error.to_string()),
                delay_before_next: None,
            });
            warn!(
                provider = %self.provider_key,
                attempts = attempt,
                error = %error,
                "재시도 횟수 소진"
            );
            return FetchState::Terminal(Err(FetchError::RetryExhausted {
                attempts: attempt,
                last_error: error,
            }));
        }

        let next_attempt = attempt + 1;
        let delay = self.delay_for(next_attempt, &error);
        attempts.push(FetchAttempt {
            attempt_number: attempt,
            started_at,
            outcome: AttemptOutcome::RetryableFailure(error.to_string()),
            delay_before_next: Some(delay),
        });
        warn!(
            provider = %self.provider_key,
            attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "일시적 오류, 재시도 예정"
        );

        FetchState::Waiting {
            next_attempt,
            delay,
        }
    }

    /// 다음 시도 전 대기 시간. 429의 `Retry-After`는 최소 대기 시간으로 반영합니다.
    fn delay_for(&self, next_attempt: u32, error: &AttemptError) -> Duration {
        let delay = self
            .policy
            .with_jitter(self.policy.delay_before(next_attempt));

        match error {
            AttemptError::Http {
                status: 429,
                retry_after: Some(retry_after),
                ..
            } => delay.max((*retry_after).min(self.policy.max_delay)),
            _ => delay,
        }
    }
}
