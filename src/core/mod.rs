//! 核心层：错误类型、状态快照、优雅关闭

pub mod error;
pub mod shutdown;
pub mod state;

pub use error::PoolError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{AgentInfo, DispatcherPhase, PoolStatus};
