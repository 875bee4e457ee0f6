//! Agent 层：Agent trait 与注册表、参考实现、韧性包装

pub mod echo;
pub mod registry;
pub mod resilient;

pub use echo::EchoAgent;
pub use registry::{Agent, AgentRegistry};
pub use resilient::ResilientAgent;
