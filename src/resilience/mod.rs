//! 韧性层：重试退避、熔断、滑动窗口限流
//!
//! 三个包装器彼此正交、按需组合：每个都接收 `Fn(A) -> Future<Output = Result<T, PoolError>>`，
//! 返回同形状的函数，因此可以任意嵌套。`ResilienceManager` 是显式构造、按需注入的实例，
//! 持有从配置加载的默认参数，并按名称保存它创建的熔断器以便查询状态。

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;

use crate::config::AppConfig;
use crate::core::PoolError;

pub use circuit_breaker::{
    circuit_breaker, guarded, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use rate_limiter::{rate_limited, throttled, RateLimitConfig, RateLimiter};
pub use retry::{execute_with_retry, retryable, RetryConfig};

/// 韧性组件工厂（替代进程级单例）
#[derive(Debug, Default)]
pub struct ResilienceManager {
    retry: RetryConfig,
    circuit: CircuitBreakerConfig,
    rate_limit: RateLimitConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ResilienceManager {
    pub fn new(retry: RetryConfig, circuit: CircuitBreakerConfig, rate_limit: RateLimitConfig) -> Self {
        Self {
            retry,
            circuit,
            rate_limit,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            RetryConfig::from(&cfg.retry),
            CircuitBreakerConfig::from(&cfg.circuit_breaker),
            RateLimitConfig::from(&cfg.rate_limit),
        )
    }

    /// 默认重试参数的副本，调用方可在此基础上按次调整
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone()
    }

    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        self.circuit.clone()
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        self.rate_limit.clone()
    }

    /// 按默认参数（或 `config` 覆盖）执行带重试的操作
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: F,
        config: Option<&RetryConfig>,
    ) -> Result<T, PoolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        execute_with_retry(operation, config.unwrap_or(&self.retry)).await
    }

    pub fn retryable<A, T, F, Fut>(
        &self,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
    where
        A: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
    {
        retryable(f, self.retry.clone())
    }

    /// 获取（或按默认参数创建）指定名称的熔断器
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breaker_with(name, self.circuit.clone())
    }

    /// 获取指定名称的熔断器；已存在时忽略 `config`
    pub fn breaker_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock_breakers();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    /// 用名为 `name` 的熔断器包装 `f`
    pub fn circuit_breaker<A, T, F, Fut>(
        &self,
        name: &str,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
    {
        guarded(f, self.breaker(name))
    }

    /// 新建一个使用默认参数的限流窗口
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(self.rate_limit.clone()))
    }

    pub fn rate_limited<A, T, F, Fut>(
        &self,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
    {
        rate_limited(f, self.rate_limit.clone())
    }

    /// 已创建熔断器的状态快照（按名称排序）
    pub fn circuit_states(&self) -> Vec<CircuitSnapshot> {
        let mut states: Vec<CircuitSnapshot> = self
            .lock_breakers()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    fn lock_breakers(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn manager() -> ResilienceManager {
        ResilienceManager::new(
            RetryConfig::default()
                .with_max_retries(2)
                .with_delays(Duration::from_millis(10), Duration::from_millis(100))
                .with_jitter(false),
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(1),
            },
            RateLimitConfig {
                max_requests: 1,
                window: Duration::from_millis(50),
            },
        )
    }

    #[test]
    fn test_breakers_shared_by_name() {
        let manager = manager();
        let a = manager.breaker("seo");
        let b = manager.breaker("seo");
        let c = manager.breaker("scraper");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let states = manager.circuit_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].name, "scraper");
        assert_eq!(states[1].state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_override_config() {
        let manager = manager();
        let calls = AtomicU32::new(0);
        let no_retry = manager.retry_config().with_max_retries(0);

        let result: Result<(), PoolError> = manager
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(PoolError::execution("timeout")) }
                },
                Some(&no_retry),
            )
            .await;
        assert!(result.unwrap_err().is_retry_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_wrappers_compose() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let base = move |x: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<u32, _>(PoolError::execution(format!("timeout {x}")).with_status(503)) }
        };
        let limited = manager.rate_limited(base);
        let guarded = manager.circuit_breaker("flaky", limited);
        let wrapped = manager.retryable(guarded);

        // 第 2 次失败后熔断，第 3 次尝试被拒绝（CircuitOpen 不可重试）
        let err = wrapped(7).await.unwrap_err();
        assert_eq!(err, PoolError::CircuitOpen("flaky".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.breaker("flaky").state(), CircuitState::Open);
    }
}
