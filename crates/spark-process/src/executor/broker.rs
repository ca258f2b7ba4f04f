use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use tracing::debug;

use crate::observability::targets;

use super::{ExecutorProvider, ProcessingExecutors, SameThreadExecutor, TaskExecutor};

struct Selection {
    executors: ProcessingExecutors,
    requesting_supplier: Arc<dyn ExecutorProvider>,
    responding_supplier: Arc<dyn ExecutorProvider>,
}

/// 执行器代理：在多个供给方之间为每个角色挑选执行器。
///
/// # 教案式说明
/// - **意图 (Why)**：部署方可能注册多个供给方，例如一个只负责响应侧的专用线程池；
///   代理按注册顺序为每个角色选择首个给出执行器的供给方，其余供给方退回到缺省值之外的备选；
/// - **逻辑 (How)**：
///   - 首次 [`ExecutorBroker::resolve`] 时完成选择并缓存，之后只读共享；
///   - 每个角色的选择结果与被忽略的供给方都以 `debug!` 记录；
///   - 被忽略的执行器不做回收：同一执行器可能仍服务于另一角色；
/// - **契约 (What)**：某个角色没有任何注册供给方时使用缺省供给方；缺省供给方也不提供时
///   退化为同线程执行器。
pub struct ExecutorBroker {
    default: Arc<dyn ExecutorProvider>,
    providers: Vec<Arc<dyn ExecutorProvider>>,
    selection: OnceLock<Selection>,
    disposed: AtomicBool,
}

impl ExecutorBroker {
    pub fn new(default: Arc<dyn ExecutorProvider>) -> Self {
        Self {
            default,
            providers: Vec::new(),
            selection: OnceLock::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// 注册供给方；注册顺序即优先级。
    pub fn register(&mut self, provider: Arc<dyn ExecutorProvider>) -> &mut Self {
        if self.selection.get().is_some() {
            debug!(
                target: targets::BROKER,
                provider = provider.name(),
                "executors already resolved; late provider ignored"
            );
            return self;
        }
        self.providers.push(provider);
        self
    }

    /// 链式注册。
    pub fn with(mut self, provider: Arc<dyn ExecutorProvider>) -> Self {
        self.register(provider);
        self
    }

    /// 解析（并缓存）执行器对。
    pub fn resolve(&self) -> ProcessingExecutors {
        self.selection
            .get_or_init(|| self.select())
            .executors
            .clone()
    }

    /// 回收选中的执行器。重复调用无效果。
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(selection) = self.selection.get() {
            selection
                .requesting_supplier
                .dispose(&selection.executors.requesting);
            selection
                .responding_supplier
                .dispose(&selection.executors.responding);
            debug!(target: targets::BROKER, "processing executors disposed");
        }
    }

    fn select(&self) -> Selection {
        let (requesting_supplier, requesting) =
            self.pick("requesting", |provider| provider.requesting_executor());
        let (responding_supplier, responding) =
            self.pick("responding", |provider| provider.responding_executor());
        Selection {
            executors: ProcessingExecutors {
                requesting,
                responding,
            },
            requesting_supplier,
            responding_supplier,
        }
    }

    fn pick(
        &self,
        role: &'static str,
        supply: impl Fn(&dyn ExecutorProvider) -> Option<Arc<dyn TaskExecutor>>,
    ) -> (Arc<dyn ExecutorProvider>, Arc<dyn TaskExecutor>) {
        let mut chosen: Option<(Arc<dyn ExecutorProvider>, Arc<dyn TaskExecutor>)> = None;
        for provider in &self.providers {
            let Some(executor) = supply(provider.as_ref()) else {
                continue;
            };
            if let Some((winner, _)) = &chosen {
                debug!(
                    target: targets::BROKER,
                    role,
                    provider = provider.name(),
                    selected = winner.name(),
                    "executor provider overridden; ignoring"
                );
                continue;
            }
            chosen = Some((Arc::clone(provider), executor));
        }

        let (supplier, executor) = match chosen {
            Some(chosen) => chosen,
            None => {
                let executor = supply(self.default.as_ref())
                    .unwrap_or_else(|| Arc::new(SameThreadExecutor::new()));
                (Arc::clone(&self.default), executor)
            }
        };
        debug!(
            target: targets::BROKER,
            role,
            provider = supplier.name(),
            executor = executor.name(),
            "executor selected"
        );
        (supplier, executor)
    }
}

impl std::fmt::Debug for ExecutorBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorBroker")
            .field("default", &self.default.name())
            .field("providers", &self.providers.len())
            .field("resolved", &self.selection.get().is_some())
            .finish()
    }
}
