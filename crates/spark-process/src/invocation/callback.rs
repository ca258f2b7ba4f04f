use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};

use tracing::warn;

use crate::{error::ProcessError, observability::targets};

use super::InvocationContext;

/// 调用生命周期回调。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方除了持有结果句柄，还可能需要在挂起、恢复、取消等节点得到通知，
///   例如容器层据此维护连接的异步状态；
/// - **契约 (What)**：
///   - 所有方法默认为空实现，按需覆盖；
///   - `result` 与 `failure` 对单次调用合计至多触发一次，`cancelled` 至多触发一次；
///   - 回调内部的 panic 会被捕获并以 `warn!` 记录，不会影响调用结果；
///   - 回调总是在内部锁释放后调用，可以安全地回调 [`InvocationContext`] 的任意方法。
pub trait InvocationCallback<R>: Send + Sync {
    /// 调用被挂起。`timeout` 为 `None` 表示不限时。
    fn suspended(&self, _timeout: Option<Duration>, _context: &InvocationContext<R>) {}

    /// 挂起超时被修改。
    fn suspend_timeout_changed(&self, _timeout: Option<Duration>) {}

    /// 调用被显式恢复。
    fn resumed(&self) {}

    /// 调用被取消。
    fn cancelled(&self) {}

    /// 最终响应已产生。
    fn result(&self, _response: &R) {}

    /// 调用以失败结束。
    fn failure(&self, _error: &ProcessError) {}
}

/// 不关心任何通知的回调。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallback;

impl<R> InvocationCallback<R> for NoopCallback {}

/// 调用回调并吞下其中的 panic。
pub(crate) fn notify(hook: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        warn!(
            target: targets::INVOCATION,
            hook,
            panic = %message,
            "invocation callback panicked; ignoring"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn panicking_callback_is_contained() {
        let ran_after = AtomicBool::new(false);
        notify("result", || panic!("callback exploded"));
        notify("result", || ran_after.store(true, Ordering::SeqCst));
        assert!(ran_after.load(Ordering::SeqCst));
    }
}
