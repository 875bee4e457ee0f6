//! Hive - 智能体调度与韧性核心
//!
//! 入口：加载配置、初始化日志，注册 Echo Agent（普通 + 韧性包装），
//! 演示直接提交与按优先级排队提交，最后打印 Pool 与熔断器状态快照。
//! 用法：`hive [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::config::load_config;
use hive::{observability, AgentPool, EchoAgent, ResilienceManager, ResilientAgent};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let resilience = ResilienceManager::from_config(&cfg);
    let pool = Arc::new(AgentPool::from_config(&cfg));
    pool.shutdown_manager().install_signal_handlers();

    pool.register_agent(Arc::new(
        EchoAgent::new("echo")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_delay(Duration::from_millis(50)),
    ))
    .await
    .context("Failed to register echo agent")?;

    let resilient = ResilientAgent::new(Arc::new(EchoAgent::new("echo-resilient")))
        .with_retry(resilience.retry_config())
        .with_circuit_breaker(resilience.breaker("echo-resilient"))
        .with_rate_limiter(resilience.rate_limiter());
    pool.register_agent(Arc::new(resilient))
        .await
        .context("Failed to register resilient echo agent")?;

    let direct = pool
        .submit_direct("echo", json!({ "text": "direct" }))
        .await
        .context("Direct submission failed")?;
    tracing::info!(result = %direct, "Direct submission completed");

    let mut handles = Vec::new();
    for (job, priority) in [1, 9, 5, 7].into_iter().enumerate() {
        let agent = if job % 2 == 0 { "echo" } else { "echo-resilient" };
        let handle = pool
            .submit_queued_with_priority(agent, json!({ "job": job, "priority": priority }), priority)
            .await
            .context("Queued submission rejected")?;
        handles.push(handle);
    }

    for handle in handles {
        let id = handle.id().to_string();
        match handle.outcome().await {
            Ok(result) => tracing::info!(work_id = %id, result = %result, "Queued work finished"),
            Err(e) => tracing::warn!(work_id = %id, error = %e, "Queued work failed"),
        }
    }

    let status = pool.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("{}", serde_json::to_string_pretty(&resilience.circuit_states())?);

    pool.shutdown().await;
    Ok(())
}
