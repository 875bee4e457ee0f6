//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RETRY__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolSection,
    pub retry: RetrySection,
    pub circuit_breaker: CircuitBreakerSection,
    pub rate_limit: RateLimitSection,
}

/// [pool] 段：排水循环节奏与默认优先级
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    /// 排水循环每次取出前的等待间隔（毫秒，最小 1）
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

fn default_drain_interval_ms() -> u64 {
    10
}

fn default_priority() -> i32 {
    crate::pool::DEFAULT_PRIORITY
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            drain_interval_ms: default_drain_interval_ms(),
            default_priority: default_priority(),
        }
    }
}

/// [retry] 段：退避参数与可重试判定
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// 可重试的类 HTTP 状态码
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
    /// 可重试的错误码（连接重置 / 拒绝 / 超时 / DNS 失败）
    #[serde(default = "default_retryable_codes")]
    pub retryable_codes: Vec<String>,
    /// 错误消息中出现即视为可重试的关键字（大小写不敏感）
    #[serde(default = "default_retryable_patterns")]
    pub retryable_patterns: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

fn default_retryable_codes() -> Vec<String> {
    vec![
        "ECONNRESET".into(),
        "ECONNREFUSED".into(),
        "ETIMEDOUT".into(),
        "ENOTFOUND".into(),
        "EAI_AGAIN".into(),
        "EPIPE".into(),
    ]
}

fn default_retryable_patterns() -> Vec<String> {
    vec![
        "timeout".into(),
        "connection reset".into(),
        "rate limit".into(),
        "network error".into(),
    ]
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
            retryable_statuses: default_retryable_statuses(),
            retryable_codes: default_retryable_codes(),
            retryable_patterns: default_retryable_patterns(),
        }
    }
}

/// [circuit_breaker] 段
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

/// [rate_limit] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_ms() -> u64 {
    1000
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键；retry 的三个列表用逗号分隔，如 `HIVE__RETRY__RETRYABLE_STATUSES=500,503`）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("retry.retryable_statuses")
            .with_list_parse_key("retry.retryable_codes")
            .with_list_parse_key("retry.retryable_patterns"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
