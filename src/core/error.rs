//! 调度核心错误类型
//!
//! 注册 / 解析类错误（InvalidAgent、AgentNotFound、AgentUnavailable）对当前调用是致命的，直接返回；
//! 韧性层错误（CircuitOpen、RetryExhausted）由对应包装器产生，其余错误原样穿透。

use thiserror::Error;

/// 调度与韧性核心中可能出现的错误
///
/// 实现 `Clone`：队列项失败时既要写日志，也要投递给提交方的 `WorkHandle`。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    /// 注册时 Agent 名称为空
    #[error("Invalid agent: {0}")]
    InvalidAgent(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// 熔断器处于 OPEN，被包装的操作没有被调用
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// 重试次数用尽；`last` 为最后一次观察到的失败
    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<PoolError> },

    /// Agent 执行失败，可携带类 HTTP 状态码与错误码供重试分类使用
    #[error("{message}")]
    Execution {
        message: String,
        status: Option<u16>,
        code: Option<String>,
    },

    /// 队列项在被取出前被取消
    #[error("Work item cancelled: {0}")]
    Cancelled(String),

    #[error("Agent pool is shut down")]
    PoolShutdown,
}

impl PoolError {
    /// 构造不带状态码 / 错误码的执行失败
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// 为执行失败附加类 HTTP 状态码；其他变体原样返回
    pub fn with_status(self, status: u16) -> Self {
        match self {
            Self::Execution { message, code, .. } => Self::Execution {
                message,
                status: Some(status),
                code,
            },
            other => other,
        }
    }

    /// 为执行失败附加错误码（如 ECONNRESET）；其他变体原样返回
    pub fn with_code(self, code: impl Into<String>) -> Self {
        match self {
            Self::Execution { message, status, .. } => Self::Execution {
                message,
                status,
                code: Some(code.into()),
            },
            other => other,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Execution { status, .. } => *status,
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// 是否为「重试后放弃」，区别于首次即失败的不可重试错误
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// 剥掉 RetryExhausted 包装，返回底层失败
    pub fn root_cause(&self) -> &PoolError {
        match self {
            Self::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}
