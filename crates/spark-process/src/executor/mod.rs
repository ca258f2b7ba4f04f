//! 执行器与执行器供给。
//!
//! # 设计背景（Why）
//! - 请求侧（Stage 遍历 + Inflector）与响应侧（映射 + Responder）分别运行在各自的执行器上，
//!   部署方可以把阻塞型业务放到线程池、把轻量响应处理留在同一线程；
//! - 执行器由 [`ExecutorProvider`] 提供，[`ExecutorBroker`] 负责在多个供给方之间按角色挑选。
//!
//! # 契约说明（What）
//! - [`TaskExecutor::execute`] 要么接受任务（稍后或立即执行恰好一次），要么返回
//!   [`RejectedExecution`]，此时任务被丢弃；
//! - `shutdown` 之后的提交一律被拒绝。

mod broker;
#[cfg(feature = "thread-pool")]
mod pool;
mod provider;
mod same_thread;
#[cfg(feature = "runtime-tokio")]
mod tokio_blocking;

use std::sync::Arc;

use crate::error::RejectedExecution;

pub use broker::ExecutorBroker;
#[cfg(feature = "thread-pool")]
pub use pool::ThreadPoolExecutor;
pub use provider::{ConfiguredExecutorProvider, DefaultExecutorProvider, ExecutorProvider};
pub use same_thread::SameThreadExecutor;
#[cfg(feature = "runtime-tokio")]
pub use tokio_blocking::TokioBlockingExecutor;

/// 执行器接受的任务单元。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 任务调度契约。
///
/// # 风险提示（Trade-offs）
/// - 对象安全接口牺牲部分泛型性能，但换取运行时注入灵活性；
/// - 执行器不保证任务之间的顺序，只保证每个被接受的任务执行一次。
pub trait TaskExecutor: Send + Sync + 'static {
    /// 提交任务。
    fn execute(&self, task: Task) -> Result<(), RejectedExecution>;

    /// 停止接收新任务。已接受的任务仍会执行。
    fn shutdown(&self) {}

    /// 诊断名称。
    fn name(&self) -> &str;
}

/// 一次调用所使用的执行器对。
#[derive(Clone)]
pub struct ProcessingExecutors {
    pub requesting: Arc<dyn TaskExecutor>,
    pub responding: Arc<dyn TaskExecutor>,
}

impl ProcessingExecutors {
    /// 两个角色都使用同线程执行器。
    pub fn same_thread() -> Self {
        let executor: Arc<dyn TaskExecutor> = Arc::new(SameThreadExecutor::new());
        Self {
            requesting: Arc::clone(&executor),
            responding: executor,
        }
    }
}

impl std::fmt::Debug for ProcessingExecutors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingExecutors")
            .field("requesting", &self.requesting.name())
            .field("responding", &self.responding.name())
            .finish()
    }
}
