//! 带韧性包装的 Agent
//!
//! 在不修改原 Agent 的前提下，为其 execute 叠加限流、熔断、重试（由内到外）：
//! 每次重试都要再过一次熔断器，并各自占用一个限流名额；熔断拒绝不可重试，会直接返回。
//! 包装后的 Agent 仍是 Agent，可以照常注册进 AgentPool 并经由队列执行。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::Agent;
use crate::core::PoolError;
use crate::resilience::{execute_with_retry, CircuitBreaker, RateLimiter, RetryConfig};

pub struct ResilientAgent {
    inner: Arc<dyn Agent>,
    retry: Option<RetryConfig>,
    breaker: Option<Arc<CircuitBreaker>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ResilientAgent {
    pub fn new(inner: Arc<dyn Agent>) -> Self {
        Self {
            inner,
            retry: None,
            breaker: None,
            limiter: None,
        }
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn guarded_attempt(&self, payload: Value) -> Result<Value, PoolError> {
        match &self.breaker {
            Some(breaker) => breaker.call(|| self.limited_attempt(payload)).await,
            None => self.limited_attempt(payload).await,
        }
    }

    async fn limited_attempt(&self, payload: Value) -> Result<Value, PoolError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        self.inner.execute(payload).await
    }
}

#[async_trait]
impl Agent for ResilientAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> Option<&str> {
        self.inner.version()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn set_available(&self, available: bool) {
        self.inner.set_available(available);
    }

    async fn execute(&self, payload: Value) -> Result<Value, PoolError> {
        match &self.retry {
            Some(config) => {
                execute_with_retry(|| self.guarded_attempt(payload.clone()), config).await
            }
            None => self.guarded_attempt(payload).await,
        }
    }
}
