//! 调度层：优先级工作队列与 Agent Pool

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{AgentPool, WorkHandle};
pub use queue::{WorkId, WorkItem, WorkQueue, DEFAULT_PRIORITY};
