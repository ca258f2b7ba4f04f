//! 日志目标常量与可选的 fmt Subscriber 安装入口。
//!
//! 库本身只通过 `tracing` 宏发出事件，从不抢占全局 Subscriber；
//! 需要开箱即用输出的二进制可以启用 `subscriber` 特性并调用 [`install_fmt_subscriber`]。

/// 各组件使用的 `tracing` target，便于用 `EnvFilter` 精确开关。
pub mod targets {
    pub const INVOCATION: &str = "spark_process::invocation";
    pub const SCOPE: &str = "spark_process::scope";
    pub const STAGE: &str = "spark_process::stage";
    pub const FINALIZER: &str = "spark_process::finalizer";
    pub const BROKER: &str = "spark_process::broker";
    pub const EXECUTOR: &str = "spark_process::executor";
    pub const FUTURE: &str = "spark_process::future";
    pub const TIMEOUT: &str = "spark_process::timeout";
}

/// 安装基于 `fmt` 层的全局 Subscriber。
///
/// # 契约说明
/// - 过滤规则优先取自 `RUST_LOG`，缺省为 `info`；
/// - 已有全局 Subscriber 时返回错误而不是 panic。
#[cfg(feature = "subscriber")]
pub fn install_fmt_subscriber() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}
