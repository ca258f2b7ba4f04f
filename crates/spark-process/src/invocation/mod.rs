//! 调用控制器：单次请求的挂起、恢复与取消状态机，以及把各组件串起来的 [`RequestInvoker`]。
//!
//! # 模块结构
//! - `state`：状态枚举与监视器守卫；
//! - `callback`：调用生命周期回调；
//! - `context`：可挂起适配器 [`InvocationContext`]，业务 Inflector 借此挂起/恢复/取消调用；
//! - `invoker`：调用入口 [`RequestInvoker`] 及其构建器。

mod callback;
mod context;
mod invoker;
mod state;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

pub use callback::{InvocationCallback, NoopCallback};
pub use context::InvocationContext;
pub use invoker::{RequestInvoker, RequestInvokerBuilder};
pub use state::InvocationState;

pub(crate) use callback::notify;

/// 协作式取消令牌。
///
/// # 设计背景（Why）
/// - 调用被取消后，仍在运行的 Stage 或 Inflector 无法被强行中断，只能在关键路径上主动检查；
/// - 令牌可被克隆并跨线程传播，所有克隆共享同一原子位。
///
/// # 契约说明（What）
/// - [`Cancellation::cancel`] 返回 `true` 表示本次调用首次触发取消；
/// - 取消不可撤销。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// 将令牌标记为取消。
    pub fn cancel(&self) -> bool {
        self.inner
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
