//! 单次赋值、多方观测的结果句柄。
//!
//! # 设计综述（Why）
//! - 调用控制器在提交任务后立即返回，调用方需要一个既能阻塞等待、又能 `.await` 的句柄；
//! - 同一结果可能被调用方、回调与内部的响应终结器同时观测，因此结果只写一次、可被克隆读取。
//!
//! # 契约（What）
//! - 结果只会被设置一次：值、错误或取消三选一，之后的写入全部返回 `false`；
//! - 监听器在结果就绪后由指定执行器调度，且每个监听器恰好调度一次；
//! - 监听器、唤醒器与条件变量通知都在释放内部锁之后触发。

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::{
    error::{ProcessError, RejectedExecution},
    executor::{Task, TaskExecutor},
    observability::targets,
};

type Canceller = Arc<dyn Fn() -> bool + Send + Sync>;
type RejectionHandler = Box<dyn FnOnce(RejectedExecution) + Send>;

struct Listener {
    executor: Arc<dyn TaskExecutor>,
    task: Task,
    on_rejected: RejectionHandler,
}

enum Slot<T> {
    Pending {
        wakers: Vec<Waker>,
        listeners: Vec<Listener>,
    },
    Done(Result<T, ProcessError>),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    canceller: Mutex<Option<Canceller>>,
}

/// 调用结果句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：把“挂起后在其他线程恢复”的异步结果统一成一个可等待对象，
///   调用方既可以 [`ResponseFuture::wait`] 阻塞，也可以在异步上下文中直接 `.await`；
/// - **逻辑 (How)**：内部为 `parking_lot::Mutex` 保护的槽位 + 条件变量；`poll` 时登记 `Waker`，
///   完成时统一唤醒；
/// - **契约 (What)**：
///   - `T: Clone` 时才可读取结果，因为多个等待者各自获得一份拷贝；
///   - [`ResponseFuture::cancel`] 若绑定了调用取消钩子，会将取消请求转交给调用控制器，
///     返回值表示取消是否真正生效。
pub struct ResponseFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResponseFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for ResponseFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseFuture<T> {
    /// 创建尚未完成的句柄。
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Pending {
                    wakers: Vec::new(),
                    listeners: Vec::new(),
                }),
                ready: Condvar::new(),
                canceller: Mutex::new(None),
            }),
        }
    }

    /// 创建已经失败的句柄。
    pub fn failed(error: ProcessError) -> Self {
        let future = Self::new();
        future.set_error(error);
        future
    }

    /// 绑定取消钩子，`cancel()` 时优先调用该钩子。
    pub(crate) fn set_canceller(&self, canceller: impl Fn() -> bool + Send + Sync + 'static) {
        *self.shared.canceller.lock() = Some(Arc::new(canceller));
    }

    /// 以值完成句柄。
    pub fn set(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// 以错误完成句柄。
    pub fn set_error(&self, error: ProcessError) -> bool {
        self.complete(Err(error))
    }

    /// 请求取消。
    ///
    /// 若绑定了调用取消钩子，返回钩子的判定；否则直接把句柄标记为已取消。
    pub fn cancel(&self) -> bool {
        let canceller = self.shared.canceller.lock().clone();
        match canceller {
            Some(canceller) => canceller(),
            None => self.complete_cancelled(),
        }
    }

    /// 不经取消钩子直接把句柄标记为已取消。
    pub(crate) fn complete_cancelled(&self) -> bool {
        self.complete(Err(ProcessError::Cancelled))
    }

    /// 是否已完成（含取消）。
    pub fn is_done(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Done(_))
    }

    /// 是否以取消结束。
    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.shared.slot.lock(),
            Slot::Done(Err(ProcessError::Cancelled))
        )
    }

    /// 结果就绪后在 `executor` 上执行 `task`；若已就绪则立即提交。
    ///
    /// 执行器拒绝时只记录告警。
    pub fn add_listener(&self, executor: Arc<dyn TaskExecutor>, task: Task) {
        self.add_listener_or_else(
            executor,
            task,
            Box::new(|rejected| {
                warn!(
                    target: targets::FUTURE,
                    error = %rejected,
                    "response listener rejected by executor"
                );
            }),
        );
    }

    /// 同 [`ResponseFuture::add_listener`]，拒绝时改为调用 `on_rejected`。
    pub(crate) fn add_listener_or_else(
        &self,
        executor: Arc<dyn TaskExecutor>,
        task: Task,
        on_rejected: RejectionHandler,
    ) {
        let listener = Listener {
            executor,
            task,
            on_rejected,
        };
        {
            let mut slot = self.shared.slot.lock();
            if let Slot::Pending { listeners, .. } = &mut *slot {
                listeners.push(listener);
                return;
            }
        }
        dispatch(listener);
    }

    fn complete(&self, outcome: Result<T, ProcessError>) -> bool {
        let (wakers, listeners) = {
            let mut slot = self.shared.slot.lock();
            let Slot::Pending { wakers, listeners } = &mut *slot else {
                return false;
            };
            let wakers = std::mem::take(wakers);
            let listeners = std::mem::take(listeners);
            *slot = Slot::Done(outcome);
            self.shared.ready.notify_all();
            (wakers, listeners)
        };

        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            dispatch(listener);
        }
        true
    }
}

impl<T: Clone> ResponseFuture<T> {
    /// 非阻塞读取结果。
    pub fn try_get(&self) -> Option<Result<T, ProcessError>> {
        match &*self.shared.slot.lock() {
            Slot::Done(outcome) => Some(outcome.clone()),
            Slot::Pending { .. } => None,
        }
    }

    /// 阻塞直至结果就绪。
    pub fn wait(&self) -> Result<T, ProcessError> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Slot::Done(outcome) = &*slot {
                return outcome.clone();
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// 最多阻塞 `timeout`，超时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, ProcessError>> {
        let mut slot = self.shared.slot.lock();
        if matches!(*slot, Slot::Pending { .. }) {
            let _ = self.shared.ready.wait_while_for(
                &mut slot,
                |slot| matches!(slot, Slot::Pending { .. }),
                timeout,
            );
        }
        match &*slot {
            Slot::Done(outcome) => Some(outcome.clone()),
            Slot::Pending { .. } => None,
        }
    }
}

impl<T: Clone> Future for ResponseFuture<T> {
    type Output = Result<T, ProcessError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        match &mut *slot {
            Slot::Done(outcome) => Poll::Ready(outcome.clone()),
            Slot::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.slot.lock() {
            Slot::Pending { .. } => "pending",
            Slot::Done(Ok(_)) => "succeeded",
            Slot::Done(Err(ProcessError::Cancelled)) => "cancelled",
            Slot::Done(Err(_)) => "failed",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}

fn dispatch(listener: Listener) {
    let Listener {
        executor,
        task,
        on_rejected,
    } = listener;
    if let Err(rejected) = executor.execute(task) {
        on_rejected(rejected);
    }
}
