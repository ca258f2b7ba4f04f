use std::sync::Arc;

use crate::config::{ConfigError, ExecutorKind, ExecutorSettings, ProcessingConfig};

use super::{SameThreadExecutor, TaskExecutor};

/// 执行器供给方。
///
/// # 契约说明（What）
/// - 两个角色分别供给，返回 `None` 表示不参与该角色的竞争；
/// - 被 [`ExecutorBroker`](super::ExecutorBroker) 选中的执行器在代理关闭时经 `dispose` 回收；
///   未被选中的执行器由供给方自行管理，代理不会触碰。
pub trait ExecutorProvider: Send + Sync {
    /// 诊断名称。
    fn name(&self) -> &str;

    /// 请求侧执行器。
    fn requesting_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        None
    }

    /// 响应侧执行器。
    fn responding_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        None
    }

    /// 回收本供给方提供的执行器。
    fn dispose(&self, executor: &Arc<dyn TaskExecutor>) {
        executor.shutdown();
    }
}

/// 缺省供给方：两个角色共享一个同线程执行器。
#[derive(Clone)]
pub struct DefaultExecutorProvider {
    executor: Arc<dyn TaskExecutor>,
}

impl DefaultExecutorProvider {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(SameThreadExecutor::new()),
        }
    }
}

impl Default for DefaultExecutorProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorProvider for DefaultExecutorProvider {
    fn name(&self) -> &str {
        "default"
    }

    fn requesting_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::clone(&self.executor))
    }

    fn responding_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::clone(&self.executor))
    }
}

/// 按 [`ProcessingConfig`] 构造执行器的供给方。
pub struct ConfiguredExecutorProvider {
    requesting: Arc<dyn TaskExecutor>,
    responding: Arc<dyn TaskExecutor>,
}

impl ConfiguredExecutorProvider {
    /// 校验配置并创建两个角色的执行器。
    pub fn from_config(config: &ProcessingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            requesting: build_executor("requesting", &config.requesting)?,
            responding: build_executor("responding", &config.responding)?,
        })
    }
}

impl ExecutorProvider for ConfiguredExecutorProvider {
    fn name(&self) -> &str {
        "configured"
    }

    fn requesting_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::clone(&self.requesting))
    }

    fn responding_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::clone(&self.responding))
    }
}

fn build_executor(
    role: &'static str,
    settings: &ExecutorSettings,
) -> Result<Arc<dyn TaskExecutor>, ConfigError> {
    match settings.kind {
        ExecutorKind::SameThread => Ok(Arc::new(SameThreadExecutor::new())),
        #[cfg(feature = "thread-pool")]
        ExecutorKind::Pool => {
            let pool =
                super::ThreadPoolExecutor::new(settings.pool_size, &settings.thread_name_prefix)
                    .map_err(|source| ConfigError::Executor { role, source })?;
            Ok(Arc::new(pool))
        }
        #[cfg(not(feature = "thread-pool"))]
        ExecutorKind::Pool => Err(ConfigError::PoolUnavailable { role }),
    }
}
