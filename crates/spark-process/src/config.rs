//! 处理内核的声明式配置。
//!
//! # Why
//! - 执行器选型（同线程还是线程池、池大小、线程名）与挂起超时属于部署决策，
//!   应当可以脱离代码在 TOML 中调整；
//!
//! # How
//! - 使用 `serde` 派生 + `toml::from_str` 把文本映射到强类型结构，随后统一走 [`ProcessingConfig::validate`]；
//!
//! # What
//! - 缺省配置：两个角色均为同线程执行器，挂起不限时；
//! - 示例：
//!
//! ```toml
//! [requesting]
//! kind = "pool"
//! pool_size = 4
//! thread_name_prefix = "spark-requesting-"
//!
//! [responding]
//! kind = "same-thread"
//!
//! [suspend]
//! default_timeout_ms = 30000
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::error::RejectedExecution;

/// 配置错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析为配置结构。
    #[error("failed to parse processing config: {0}")]
    Parse(#[from] toml::de::Error),

    /// 线程池大小必须为正。
    #[error("`{role}.pool_size` must be positive")]
    InvalidPoolSize { role: &'static str },

    /// 线程池必须有线程名前缀。
    #[error("`{role}.thread_name_prefix` must not be empty")]
    EmptyThreadNamePrefix { role: &'static str },

    /// 按配置创建执行器失败。
    #[error("failed to build `{role}` executor")]
    Executor {
        role: &'static str,
        #[source]
        source: RejectedExecution,
    },

    /// 未启用 `thread-pool` 特性却配置了线程池。
    #[error("`{role}` requests a pool executor but the `thread-pool` feature is disabled")]
    PoolUnavailable { role: &'static str },
}

/// 执行器种类。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    #[default]
    SameThread,
    Pool,
}

/// 单个角色的执行器配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    pub kind: ExecutorKind,
    /// 仅对 `pool` 生效。
    pub pool_size: usize,
    /// 仅对 `pool` 生效。
    pub thread_name_prefix: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::SameThread,
            pool_size: 4,
            thread_name_prefix: "spark-process-".to_owned(),
        }
    }
}

impl ExecutorSettings {
    fn validate(&self, role: &'static str) -> Result<(), ConfigError> {
        if self.kind != ExecutorKind::Pool {
            return Ok(());
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize { role });
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyThreadNamePrefix { role });
        }
        Ok(())
    }
}

/// 挂起相关配置。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SuspendSettings {
    /// 挂起的缺省超时（毫秒）；缺省表示不限时。
    pub default_timeout_ms: Option<u64>,
}

impl SuspendSettings {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

/// 处理内核配置根。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub requesting: ExecutorSettings,
    pub responding: ExecutorSettings,
    pub suspend: SuspendSettings,
}

impl ProcessingConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ProcessingConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段间约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.requesting.validate("requesting")?;
        self.responding.validate("responding")
    }
}
