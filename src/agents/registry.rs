//! Agent 注册表
//!
//! 所有 Agent 实现 Agent trait（name / execute，可选 version 与可用性开关），由 AgentRegistry 按名注册与查找。
//! 同名重复注册：记录警告并覆盖（后写者胜）；已经拿到旧句柄的在途执行不受影响。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{AgentInfo, PoolError};

/// Agent trait：唯一名称 + 异步执行（payload / 结果均为不透明 JSON）
#[async_trait]
pub trait Agent: Send + Sync {
    /// 注册表键
    fn name(&self) -> &str;

    fn version(&self) -> Option<&str> {
        None
    }

    /// 默认始终可用；需要下线能力的 Agent 自行持有标志位并覆盖这两个方法
    fn is_available(&self) -> bool {
        true
    }

    fn set_available(&self, _available: bool) {}

    async fn execute(&self, payload: Value) -> Result<Value, PoolError>;
}

struct AgentEntry {
    agent: Arc<dyn Agent>,
    registered_at: DateTime<Utc>,
    last_execution: Option<DateTime<Utc>>,
}

/// Agent 注册表：按名称存储 Arc<dyn Agent>
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Agent 并将其标记为可用；名称为空或带首尾空白返回 InvalidAgent，同名则覆盖并返回被替换的旧句柄
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<Option<Arc<dyn Agent>>, PoolError> {
        let name = agent.name().to_string();
        if name.trim().is_empty() {
            return Err(PoolError::InvalidAgent(
                "agent name must not be empty".to_string(),
            ));
        }
        if name.trim() != name {
            return Err(PoolError::InvalidAgent(format!(
                "agent name '{}' has surrounding whitespace",
                name
            )));
        }

        agent.set_available(true);
        let entry = AgentEntry {
            agent,
            registered_at: Utc::now(),
            last_execution: None,
        };

        let previous = self.agents.insert(name.clone(), entry).map(|old| old.agent);
        if previous.is_some() {
            tracing::warn!(agent = %name, "Agent already registered, replacing previous handle");
        } else {
            tracing::info!(agent = %name, "Agent registered");
        }
        Ok(previous)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Agent>> {
        let removed = self.agents.remove(name).map(|entry| entry.agent);
        if removed.is_some() {
            tracing::info!(agent = %name, "Agent unregistered");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).map(|entry| Arc::clone(&entry.agent))
    }

    /// 切换可用性；Agent 不存在时返回 false
    pub fn set_available(&self, name: &str, available: bool) -> bool {
        match self.agents.get(name) {
            Some(entry) => {
                entry.agent.set_available(available);
                true
            }
            None => false,
        }
    }

    /// 由调度器在一次执行结束后调用；执行期间该名称已被替换时不记录，返回是否记录
    pub fn record_execution(&mut self, agent: &Arc<dyn Agent>, at: DateTime<Utc>) -> bool {
        match self.agents.get_mut(agent.name()) {
            Some(entry) if Arc::ptr_eq(&entry.agent, agent) => {
                entry.last_execution = Some(at);
                true
            }
            _ => false,
        }
    }

    /// 注册信息快照（按名称排序）
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|(name, entry)| AgentInfo {
                name: name.clone(),
                version: entry.agent.version().map(str::to_string),
                available: entry.agent.is_available(),
                registered_at: entry.registered_at,
                last_execution: entry.last_execution,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.agents
            .values()
            .filter(|entry| entry.agent.is_available())
            .count()
    }
}
