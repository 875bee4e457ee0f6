//! Agent Pool：注册表 + 优先级队列 + 后台排水循环
//!
//! - `submit_direct`：立即解析并执行，结果或失败原样返回，不隐式附加重试 / 熔断 / 限流
//! - `submit_queued`：入队后立即返回 `WorkHandle`；由后台排水循环按优先级逐个执行
//!
//! 排水循环是显式的 loop：队列与阶段（Idle / Draining）在同一把锁下，保证任意时刻至多一个循环在跑，
//! 且一个工作项（包括它自带的重试 / 熔断 / 限流逻辑）执行完毕后才取下一个。
//! 每次取出前（包括第一次）都先等待 `drain_interval`：循环启动后紧接着的提交也参与优先级排序。
//! 直接提交不经过这把锁，可以与排水循环及彼此并发执行。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, RwLock};

use crate::agents::{Agent, AgentRegistry};
use crate::config::{AppConfig, PoolSection};
use crate::core::{
    AgentInfo, DispatcherPhase, PoolError, PoolStatus, ShutdownManager, ShutdownReason,
};
use crate::pool::queue::{QueuedWork, WorkId, WorkQueue};

/// 排队提交的句柄：ID + 最终结果
#[derive(Debug)]
pub struct WorkHandle {
    id: WorkId,
    outcome: oneshot::Receiver<Result<Value, PoolError>>,
}

impl WorkHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 等待该工作项执行完毕；丢弃句柄即为「发出即忘」，失败仍会记录日志
    pub async fn outcome(self) -> Result<Value, PoolError> {
        self.outcome.await.unwrap_or(Err(PoolError::PoolShutdown))
    }
}

struct QueueState {
    queue: WorkQueue,
    phase: DispatcherPhase,
}

/// Agent Pool 调度器
pub struct AgentPool {
    registry: RwLock<AgentRegistry>,
    state: Mutex<QueueState>,
    drain_interval: Duration,
    default_priority: i32,
    shutdown: Arc<ShutdownManager>,
}

impl AgentPool {
    pub fn new(config: &PoolSection) -> Self {
        Self {
            registry: RwLock::new(AgentRegistry::new()),
            state: Mutex::new(QueueState {
                queue: WorkQueue::new(),
                phase: DispatcherPhase::Idle,
            }),
            drain_interval: Duration::from_millis(config.drain_interval_ms.max(1)),
            default_priority: config.default_priority,
            shutdown: Arc::new(ShutdownManager::new()),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(&cfg.pool)
    }

    /// 注册 Agent；同名覆盖（记录警告）并返回被替换的旧句柄，名称非法返回 InvalidAgent
    pub async fn register_agent(
        &self,
        agent: Arc<dyn Agent>,
    ) -> Result<Option<Arc<dyn Agent>>, PoolError> {
        self.registry.write().await.register(agent)
    }

    pub async fn unregister_agent(&self, name: &str) -> bool {
        self.registry.write().await.unregister(name).is_some()
    }

    pub async fn set_agent_available(&self, name: &str, available: bool) -> bool {
        self.registry.read().await.set_available(name, available)
    }

    pub async fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.registry.read().await.get(name)
    }

    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        self.registry.read().await.list()
    }

    /// 解析并立即执行
    pub async fn submit_direct(&self, agent_name: &str, payload: Value) -> Result<Value, PoolError> {
        let agent = self
            .registry
            .read()
            .await
            .get(agent_name)
            .ok_or_else(|| PoolError::AgentNotFound(agent_name.to_string()))?;

        if !agent.is_available() {
            return Err(PoolError::AgentUnavailable(agent_name.to_string()));
        }

        let result = agent.execute(payload).await;
        self.registry
            .write()
            .await
            .record_execution(&agent, Utc::now());
        result
    }

    /// 以默认优先级入队
    pub async fn submit_queued(
        self: &Arc<Self>,
        agent_name: &str,
        payload: Value,
    ) -> Result<WorkHandle, PoolError> {
        self.submit_queued_with_priority(agent_name, payload, self.default_priority)
            .await
    }

    /// 入队并立即返回；调度器空闲时启动排水循环
    pub async fn submit_queued_with_priority(
        self: &Arc<Self>,
        agent_name: &str,
        payload: Value,
        priority: i32,
    ) -> Result<WorkHandle, PoolError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        if self.shutdown.is_shutdown() {
            return Err(PoolError::PoolShutdown);
        }

        let id = state
            .queue
            .push(agent_name.to_string(), payload, priority, tx);

        if state.phase == DispatcherPhase::Idle {
            state.phase = DispatcherPhase::Draining;
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.drain_loop().await });
            tracing::debug!("Drain loop started");
        }

        Ok(WorkHandle { id, outcome: rx })
    }

    /// 取消尚未被取出的工作项，其句柄得到 `PoolError::Cancelled`
    pub async fn cancel_queued(&self, id: &str) -> bool {
        let removed = self.state.lock().await.queue.remove(id);
        match removed {
            Some(work) => {
                tracing::info!(work_id = %id, "Queued work cancelled");
                work.resolve(Err(PoolError::Cancelled(id.to_string())));
                true
            }
            None => false,
        }
    }

    pub async fn phase(&self) -> DispatcherPhase {
        self.state.lock().await.phase
    }

    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// 只读快照
    pub async fn status(&self) -> PoolStatus {
        let (agents, active_agents) = {
            let registry = self.registry.read().await;
            (registry.list(), registry.active_count())
        };
        let (queued_work, phase) = {
            let state = self.state.lock().await;
            (state.queue.len(), state.phase)
        };

        PoolStatus {
            total_agents: agents.len(),
            active_agents,
            queued_work,
            phase,
            agents,
        }
    }

    /// 停止排水：正在执行的工作项照常完成，其余排队项与后续排队提交均得到 PoolShutdown
    pub async fn shutdown(&self) {
        self.shutdown.shutdown(ShutdownReason::Requested);
        let pending = {
            let mut state = self.state.lock().await;
            if state.phase == DispatcherPhase::Idle {
                state.queue.drain()
            } else {
                Vec::new()
            }
        };
        for work in pending {
            work.resolve(Err(PoolError::PoolShutdown));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// 供二进制入口安装信号处理器
    pub fn shutdown_manager(&self) -> Arc<ShutdownManager> {
        Arc::clone(&self.shutdown)
    }

    async fn drain_loop(self: Arc<Self>) {
        let token = self.shutdown.token();
        loop {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.drain_interval) => {}
            }

            let next = {
                let mut state = self.state.lock().await;
                if token.is_cancelled() {
                    let pending = state.queue.drain();
                    state.phase = DispatcherPhase::Idle;
                    drop(state);
                    if !pending.is_empty() {
                        tracing::info!(dropped = pending.len(), "Drain loop stopped by shutdown");
                    }
                    for work in pending {
                        work.resolve(Err(PoolError::PoolShutdown));
                    }
                    return;
                }
                match state.queue.pop() {
                    Some(work) => work,
                    None => {
                        state.phase = DispatcherPhase::Idle;
                        tracing::debug!("Queue empty, drain loop idle");
                        return;
                    }
                }
            };

            self.run_queued(next).await;
        }
    }

    async fn run_queued(&self, work: QueuedWork) {
        let QueuedWork { item, reply } = work;
        let execution = AssertUnwindSafe(self.submit_direct(&item.agent_name, item.payload));
        let outcome = match execution.catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::execution(format!(
                "agent '{}' panicked while executing work item",
                item.agent_name
            ))),
        };

        match &outcome {
            Ok(_) => tracing::debug!(work_id = %item.id, agent = %item.agent_name, "Queued work completed"),
            Err(e) => tracing::warn!(
                work_id = %item.id,
                agent = %item.agent_name,
                priority = item.priority,
                error = %e,
                "Queued work failed"
            ),
        }
        let _ = reply.send(outcome);
    }
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::new(&PoolSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::EchoAgent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingAgent {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Agent for FailingAgent {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _payload: Value) -> Result<Value, PoolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PoolError::execution("quota exceeded").with_status(402))
        }
    }

    struct PanickingAgent;

    #[async_trait]
    impl Agent for PanickingAgent {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _payload: Value) -> Result<Value, PoolError> {
            panic!("agent bug");
        }
    }

    fn pool() -> Arc<AgentPool> {
        Arc::new(AgentPool::default())
    }

    #[tokio::test]
    async fn test_submit_direct_not_found() {
        let pool = pool();
        let err = pool.submit_direct("missing", json!({})).await.unwrap_err();
        assert_eq!(err, PoolError::AgentNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_submit_direct_unavailable() {
        let pool = pool();
        pool.register_agent(Arc::new(EchoAgent::new("echo"))).await.unwrap();
        assert!(pool.set_agent_available("echo", false).await);

        let err = pool.submit_direct("echo", json!(1)).await.unwrap_err();
        assert_eq!(err, PoolError::AgentUnavailable("echo".to_string()));
    }

    #[tokio::test]
    async fn test_submit_direct_propagates_failure_unchanged() {
        let pool = pool();
        let agent = Arc::new(FailingAgent {
            calls: AtomicU32::new(0),
        });
        pool.register_agent(agent.clone()).await.unwrap();

        let err = pool.submit_direct("failing", json!(null)).await.unwrap_err();
        assert_eq!(err.status(), Some(402));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
        assert!(pool.list_agents().await[0].last_execution.is_some());
    }

    #[tokio::test]
    async fn test_register_invalid_agent() {
        let pool = pool();
        let err = pool
            .register_agent(Arc::new(EchoAgent::new("")))
            .await
            .err().unwrap();
        assert!(matches!(err, PoolError::InvalidAgent(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_drains_by_priority() {
        let pool = pool();
        pool.register_agent(Arc::new(
            EchoAgent::new("echo").with_delay(Duration::from_millis(50)),
        ))
        .await
        .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for (label, priority) in [("a", 1), ("b", 9), ("c", 5), ("d", 9)] {
            let handle = pool
                .submit_queued_with_priority("echo", json!(label), priority)
                .await
                .unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(handle.outcome().await);
            });
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(outcome) = rx.recv().await {
            order.push(outcome.unwrap().as_str().unwrap().to_string());
        }
        assert_eq!(order, vec!["b", "d", "c", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_returns_to_idle() {
        let pool = pool();
        pool.register_agent(Arc::new(EchoAgent::new("echo"))).await.unwrap();
        assert_eq!(pool.phase().await, DispatcherPhase::Idle);

        let handle = pool.submit_queued("echo", json!("x")).await.unwrap();
        assert_eq!(pool.phase().await, DispatcherPhase::Draining);
        assert_eq!(handle.outcome().await.unwrap(), json!("x"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.phase().await, DispatcherPhase::Idle);
        assert_eq!(pool.queued_len().await, 0);

        // 空闲后再次提交会重新启动循环
        let handle = pool.submit_queued("echo", json!("y")).await.unwrap();
        assert_eq!(handle.outcome().await.unwrap(), json!("y"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_failure_does_not_stop_drain() {
        let pool = pool();
        let failing = Arc::new(FailingAgent {
            calls: AtomicU32::new(0),
        });
        pool.register_agent(failing.clone()).await.unwrap();
        pool.register_agent(Arc::new(EchoAgent::new("echo"))).await.unwrap();

        let bad = pool.submit_queued_with_priority("failing", json!(1), 9).await.unwrap();
        let missing = pool.submit_queued_with_priority("ghost", json!(2), 8).await.unwrap();
        let good = pool.submit_queued_with_priority("echo", json!(3), 1).await.unwrap();

        assert_eq!(bad.outcome().await.unwrap_err().status(), Some(402));
        assert_eq!(
            missing.outcome().await.unwrap_err(),
            PoolError::AgentNotFound("ghost".to_string())
        );
        assert_eq!(good.outcome().await.unwrap(), json!(3));
        // 失败不会自动重新入队
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_agent_is_contained() {
        let pool = pool();
        pool.register_agent(Arc::new(PanickingAgent)).await.unwrap();
        pool.register_agent(Arc::new(EchoAgent::new("echo"))).await.unwrap();

        let boom = pool.submit_queued_with_priority("panicking", json!(1), 9).await.unwrap();
        let after = pool.submit_queued_with_priority("echo", json!(2), 1).await.unwrap();

        assert!(matches!(boom.outcome().await, Err(PoolError::Execution { .. })));
        assert_eq!(after.outcome().await.unwrap(), json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued() {
        let pool = pool();
        pool.register_agent(Arc::new(
            EchoAgent::new("echo").with_delay(Duration::from_millis(100)),
        ))
        .await
        .unwrap();

        let first = pool.submit_queued("echo", json!(1)).await.unwrap();
        let second = pool.submit_queued("echo", json!(2)).await.unwrap();
        let second_id = second.id().to_string();

        assert!(pool.cancel_queued(&second_id).await);
        assert!(!pool.cancel_queued(&second_id).await);
        assert_eq!(
            second.outcome().await.unwrap_err(),
            PoolError::Cancelled(second_id)
        );
        assert_eq!(first.outcome().await.unwrap(), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_in_flight_and_rejects_rest() {
        let pool = pool();
        pool.register_agent(Arc::new(
            EchoAgent::new("echo").with_delay(Duration::from_millis(100)),
        ))
        .await
        .unwrap();

        let first = pool.submit_queued("echo", json!(1)).await.unwrap();
        let second = pool.submit_queued("echo", json!(2)).await.unwrap();
        let third = pool.submit_queued("echo", json!(3)).await.unwrap();

        // 让排水循环取走第一项
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.shutdown().await;

        assert_eq!(first.outcome().await.unwrap(), json!(1));
        assert_eq!(second.outcome().await.unwrap_err(), PoolError::PoolShutdown);
        assert_eq!(third.outcome().await.unwrap_err(), PoolError::PoolShutdown);
        assert!(matches!(
            pool.submit_queued("echo", json!(4)).await,
            Err(PoolError::PoolShutdown)
        ));
        assert!(pool.is_shutdown());
    }

    #[tokio::test]
    async fn test_register_agent_returns_replaced_handle() {
        let pool = pool();
        let first: Arc<dyn Agent> = Arc::new(EchoAgent::new("echo").with_version("1"));
        assert!(pool.register_agent(Arc::clone(&first)).await.unwrap().is_none());

        let replaced = pool
            .register_agent(Arc::new(EchoAgent::new("echo").with_version("2")))
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_mid_flight_keeps_fresh_last_execution() {
        let pool = pool();
        pool.register_agent(Arc::new(
            EchoAgent::new("echo").with_delay(Duration::from_millis(100)),
        ))
        .await
        .unwrap();

        let in_flight = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.submit_direct("echo", json!(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.register_agent(Arc::new(EchoAgent::new("echo").with_version("2")))
            .await
            .unwrap();

        assert_eq!(in_flight.await.unwrap().unwrap(), json!(1));
        assert!(pool.list_agents().await[0].last_execution.is_none());

        pool.submit_direct("echo", json!(2)).await.unwrap();
        assert!(pool.list_agents().await[0].last_execution.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_priority_holds_on_multi_thread_runtime() {
        for _ in 0..10 {
            let pool = pool();
            pool.register_agent(Arc::new(
                EchoAgent::new("echo").with_delay(Duration::from_millis(20)),
            ))
            .await
            .unwrap();

            let low = pool
                .submit_queued_with_priority("echo", json!("low"), 1)
                .await
                .unwrap();
            let high = pool
                .submit_queued_with_priority("echo", json!("high"), 9)
                .await
                .unwrap();

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            for handle in [low, high] {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(handle.outcome().await.unwrap());
                });
            }
            drop(tx);

            assert_eq!(rx.recv().await, Some(json!("high")));
            assert_eq!(rx.recv().await, Some(json!("low")));
        }
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let pool = pool();
        pool.register_agent(Arc::new(EchoAgent::new("script").with_version("1.2.0")))
            .await
            .unwrap();
        pool.register_agent(Arc::new(EchoAgent::new("seo"))).await.unwrap();
        pool.set_agent_available("seo", false).await;

        let status = pool.status().await;
        assert_eq!(status.total_agents, 2);
        assert_eq!(status.active_agents, 1);
        assert_eq!(status.queued_work, 0);
        assert_eq!(status.phase, DispatcherPhase::Idle);
        assert_eq!(status.agents[0].name, "script");
        assert_eq!(status.agents[0].version.as_deref(), Some("1.2.0"));

        assert!(pool.unregister_agent("seo").await);
        assert!(pool.get_agent("seo").await.is_none());
    }
}
