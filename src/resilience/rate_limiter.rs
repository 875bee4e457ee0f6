//! 滑动窗口限流器（延迟放行，不拒绝）
//!
//! 每次调用先剪掉窗口外的时间戳；窗口内数量未达上限则记录当前时间并放行，
//! 否则等到最早的时间戳滑出窗口后重新检查（循环，而非单次等待：等待期间其他调用方可能已占用名额）。
//!
//! 超额调用只会被延迟、永远不会失败，适合后台批处理；对延迟敏感的请求路径应改用拒绝式限流。

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::config::RateLimitSection;
use crate::core::PoolError;

/// 限流参数
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 窗口内最多放行次数（最小为 1）
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&RateLimitSection::default())
    }
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(section: &RateLimitSection) -> Self {
        Self {
            max_requests: section.max_requests,
            window: Duration::from_millis(section.window_ms),
        }
    }
}

/// 单个被包装操作的限流器
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let max_requests = config.max_requests.max(1) as usize;
        Self {
            max_requests,
            window: config.window,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// 等待直到可以放行，并记录本次放行时间
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.lock();
                let now = Instant::now();
                self.prune(&mut admitted, now);
                if admitted.len() < self.max_requests {
                    admitted.push_back(now);
                    return;
                }
                match admitted.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                max_requests = self.max_requests,
                "Rate limit reached, deferring call"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// 限流后执行 `operation`
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        self.acquire().await;
        operation().await
    }

    /// 当前窗口内已放行的次数
    pub fn in_window(&self) -> usize {
        let mut admitted = self.lock();
        self.prune(&mut admitted, Instant::now());
        admitted.len()
    }

    // 恰好满一个窗口的时间戳视为过期，保证等待时长恒为正
    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while admitted
            .front()
            .is_some_and(|ts| now.saturating_duration_since(*ts) >= self.window)
        {
            admitted.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.admitted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 用已有限流器包装 `f`；多个包装共享同一窗口
pub fn throttled<A, T, F, Fut>(
    f: F,
    limiter: Arc<RateLimiter>,
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
        let limiter = Arc::clone(&limiter);
        async move { limiter.call(move || f(arg)).await }.boxed()
    }
}

/// 为 `f` 新建一个限流窗口并包装
pub fn rate_limited<A, T, F, Fut>(
    f: F,
    config: RateLimitConfig,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, PoolError>> + Clone + Send + Sync + 'static
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, PoolError>> + Send + 'static,
{
    throttled(f, Arc::new(RateLimiter::new(config)))
}
