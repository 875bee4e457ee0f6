//! Echo Agent（测试 / 演示用）

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::Agent;
use crate::core::PoolError;

/// Echo Agent：按可选延迟原样返回 payload
pub struct EchoAgent {
    name: String,
    version: Option<String>,
    delay: Duration,
    available: AtomicBool,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            delay: Duration::ZERO,
            available: AtomicBool::new(true),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 每次执行前等待的时长，模拟下游耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    async fn execute(&self, payload: Value) -> Result<Value, PoolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(payload)
    }
}
