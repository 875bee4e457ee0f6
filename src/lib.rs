//! Hive - 智能体调度与韧性核心
//!
//! 模块划分：
//! - **agents**: Agent trait、按名注册表、Echo 参考实现、韧性包装（ResilientAgent）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、状态快照、优雅关闭
//! - **observability**: 日志初始化
//! - **pool**: 优先级工作队列与 Agent Pool（直接提交 / 排队提交 / 后台排水）
//! - **resilience**: 重试退避、熔断器、滑动窗口限流，以及注入式的 ResilienceManager

pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod pool;
pub mod resilience;

pub use agents::{Agent, AgentRegistry, EchoAgent, ResilientAgent};
pub use core::{PoolError, PoolStatus};
pub use pool::{AgentPool, WorkHandle, DEFAULT_PRIORITY};
pub use resilience::ResilienceManager;
