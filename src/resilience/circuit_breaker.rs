//! 熔断器：CLOSED → OPEN → HALF_OPEN → CLOSED 三态自动机
//!
//! - CLOSED：放行；失败计数达到阈值后转 OPEN 并记录最后失败时间
//! - OPEN：直接返回 `CircuitOpen`，不调用被包装操作；距最后失败超过 `reset_timeout` 后，
//!   下一次调用先转 HALF_OPEN 再作为试探放行
//! - HALF_OPEN：同一时刻只允许一个试探调用；成功转 CLOSED 并清零计数，失败回到 OPEN 并刷新失败时间
//!
//! 状态检查是同步的（std Mutex，锁不跨 await），只有被放行的调用本身会挂起。

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerSection;
use crate::core::PoolError;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// 熔断参数，按下游分别设定
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后熔断（最小为 1）
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSection::default())
    }
}

impl From<&CircuitBreakerSection> for CircuitBreakerConfig {
    fn from(section: &CircuitBreakerSection) -> Self {
        Self {
            failure_threshold: section.failure_threshold,
            reset_timeout: Duration::from_millis(section.reset_timeout_ms),
        }
    }
}

/// 熔断器对外快照
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

/// 单个被包装操作的熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前记录的状态；OPEN → HALF_OPEN 的转换发生在下一次调用时
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_ms_ago: inner
                .last_failure_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// 手动恢复到 CLOSED
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
    }

    /// 在熔断器保护下执行 `operation`；熔断时 `operation` 不会被调用
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        let mut permit = self.acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.settle(true),
            Err(_) => permit.settle(false),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self) -> Result<Permit<'_>, PoolError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() > self.reset_timeout);
                if !cooled_down {
                    return Err(PoolError::CircuitOpen(self.name.clone()));
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(circuit = %self.name, "Circuit breaker half-open, allowing trial call");
                Ok(Permit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(PoolError::CircuitOpen(self.name.clone()));
                }
                inner.trial_in_flight = true;
                Ok(Permit::new(self, true))
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            tracing::info!(circuit = %self.name, "Circuit breaker closed after successful trial");
        } else if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        if trial {
            inner.state = CircuitState::Open;
            inner.last_failure_at = Some(now);
            inner.trial_in_flight = false;
            tracing::warn!(circuit = %self.name, "Trial call failed, circuit breaker re-opened");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_at = Some(now);
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            // 熔断前已放行的调用迟到的失败：延长冷却
            CircuitState::Open => {
                inner.failure_count += 1;
                inner.last_failure_at = Some(now);
            }
            // 试探期间只有试探调用决定走向
            CircuitState::HalfOpen => {}
        }
    }
}

/// 一次放行；未结算就被丢弃的试探调用按失败处理，避免 HALF_OPEN 卡死
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.trial);
        } else {
            self.breaker.on_failure(self.trial);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

/// 用已有熔断器包装 `f`，返回同签名函数；多个包装可共享同一个熔断器
pub fn guarded<A, T, F, Fut>(
    f: F,
    breaker: Arc<CircuitBreaker>,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
{
    let f = Arc::new(f);
    move |arg: A| {
        let f = Arc::clone(&f);
        let breaker = Arc::clone(&breaker);
        async move { breaker.call(move || f(arg)).await }.boxed()
    }
}

/// 为 `f` 新建一个熔断器并包装
pub fn circuit_breaker<A, T, F, Fut>(
    name: impl Into<String>,
    f: F,
    config: CircuitBreakerConfig,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
{
    guarded(f, Arc::new(CircuitBreaker::new(name, config)))
}
