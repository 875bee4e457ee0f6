//! 重试执行器：指数退避 + 抖动
//!
//! 失败按三条规则判定是否可重试（任一命中即可）：状态码在可重试集合中、错误码在可重试集合中、
//! 消息包含可重试关键字（大小写不敏感）。只有 `PoolError::Execution` 参与分类，
//! 解析错误、熔断拒绝、取消等一律立即返回。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use rand::Rng;

use crate::config::RetrySection;
use crate::core::PoolError;

/// 单次调用的重试参数
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试次数（总调用次数 = max_retries + 1）
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// 在退避时长上叠加 ±10% 的随机扰动
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>,
    pub retryable_codes: Vec<String>,
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            backoff_factor: section.backoff_factor,
            jitter: section.jitter,
            retryable_statuses: section.retryable_statuses.clone(),
            retryable_codes: section.retryable_codes.clone(),
            retryable_patterns: section.retryable_patterns.clone(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// 判断失败是否值得重试
    pub fn is_retryable(&self, err: &PoolError) -> bool {
        let PoolError::Execution {
            message,
            status,
            code,
        } = err
        else {
            return false;
        };

        if status.is_some_and(|s| self.retryable_statuses.contains(&s)) {
            return true;
        }
        if code
            .as_deref()
            .is_some_and(|c| self.retryable_codes.iter().any(|rc| rc.eq_ignore_ascii_case(c)))
        {
            return true;
        }
        let message = message.to_lowercase();
        self.retryable_patterns
            .iter()
            .any(|p| message.contains(&p.to_lowercase()))
    }

    /// 第 `retry` 次重试（从 0 开始）前的退避时长，不含抖动：
    /// `min(max_delay, base_delay * backoff_factor^retry)`
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// 实际等待时长：退避时长叠加可选抖动，下限为 0
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff_delay(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-0.1..=0.1);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

/// 按 `config` 执行 `operation`，可重试失败时退避后再试
///
/// 不可重试的失败立即原样返回；用尽全部尝试后返回 `PoolError::RetryExhausted`，携带最后一次失败。
pub async fn execute_with_retry<T, F, Fut>(mut operation: F, config: &RetryConfig) -> Result<T, PoolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PoolError>>,
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !config.is_retryable(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                tracing::warn!(attempts = attempt, error = %err, "Giving up after exhausting retries");
                return Err(PoolError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                let delay = config.delay_for(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 把 `f` 包装成同签名的函数，每次调用都透明地应用重试策略
pub fn retryable<A, T, F, Fut>(
    f: F,
    config: RetryConfig,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
where
    A: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
{
    let f = Arc::new(f);
    let config = Arc::new(config);
    move |arg: A| {
        let f = Arc::clone(&f);
        let config = Arc::clone(&config);
        async move { execute_with_retry(move || f(arg.clone()), &config).await }.boxed()
    }
}
