//! 状态定义：调度器阶段与只读快照
//!
//! `status()` / `list()` 返回的都是拷贝出来的快照，可序列化为 JSON 供上层请求处理层直接返回。

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 调度器阶段：队列为空且无排水循环时为 Idle，否则为 Draining
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherPhase {
    Idle,
    Draining,
}

impl Default for DispatcherPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// 单个 Agent 的注册信息快照
#[derive(Clone, Debug, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub version: Option<String>,
    pub available: bool,
    pub registered_at: DateTime<Utc>,
    /// 最近一次经由调度器执行完成的时间（成功或失败）
    pub last_execution: Option<DateTime<Utc>>,
}

/// Agent Pool 整体状态快照
#[derive(Clone, Debug, Serialize)]
pub struct PoolStatus {
    pub total_agents: usize,
    pub active_agents: usize,
    pub queued_work: usize,
    pub phase: DispatcherPhase,
    pub agents: Vec<AgentInfo>,
}
