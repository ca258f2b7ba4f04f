use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    error::ProcessError,
    future::ResponseFuture,
    observability::targets,
    scope::ScopeInstance,
    timeout::TimeoutScheduler,
};

use super::{
    Cancellation, InvocationCallback, notify,
    state::{CANCELLABLE, InvocationState, RESUMABLE, RUNNING, StateMonitor},
};

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

struct SuspendTimer {
    timeout: Option<Duration>,
    generation: u64,
}

struct Inner<R> {
    id: u64,
    monitor: StateMonitor,
    inflected: ResponseFuture<R>,
    response: ResponseFuture<R>,
    callback: Arc<dyn InvocationCallback<R>>,
    cancellation: Cancellation,
    default_response: Mutex<Option<R>>,
    timer: Mutex<SuspendTimer>,
    scheduler: Option<Arc<dyn TimeoutScheduler>>,
    scopes: Mutex<Vec<ScopeInstance>>,
}

/// 可挂起适配器：单次调用的状态机与控制面。
///
/// # 教案式说明
/// - **意图 (Why)**：Inflector 可以选择立即返回响应，也可以挂起调用、把上下文交给其他线程，
///   稍后再恢复或取消。本类型是 Inflector 与外部代码共享的唯一控制面；
/// - **逻辑 (How)**：
///   - 所有迁移都经由 [`StateMonitor`] 的命名守卫（`running`/`resumable`/`cancellable`）判定；
///   - 迁移成功后才在锁外写入结果句柄、触发回调或调度超时；
///   - 挂起超时通过代际计数识别过期定时器：每次挂起、重设超时或终结都会递增代际；
/// - **契约 (What)**：
///   - `suspend`/`suspend_for` 在 Suspended/Cancelled 状态下返回 `IllegalState`，
///     在 Resumed 状态下为空操作；
///   - `resume`/`resume_with_error` 仅在 Running/Suspended 下合法；
///   - `cancel` 仅在 Running/Suspended 下生效，其余情况返回 `false`；
///   - 克隆共享同一调用。
pub struct InvocationContext<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for InvocationContext<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> InvocationContext<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// 创建新调用，并把 `response` 的取消钩子绑定到本调用。
    pub(crate) fn new(
        callback: Arc<dyn InvocationCallback<R>>,
        scheduler: Option<Arc<dyn TimeoutScheduler>>,
        default_timeout: Option<Duration>,
        response: ResponseFuture<R>,
    ) -> Self {
        let context = Self {
            inner: Arc::new(Inner {
                id: NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed),
                monitor: StateMonitor::new(),
                inflected: ResponseFuture::new(),
                response,
                callback,
                cancellation: Cancellation::new(),
                default_response: Mutex::new(None),
                timer: Mutex::new(SuspendTimer {
                    timeout: default_timeout,
                    generation: 0,
                }),
                scheduler,
                scopes: Mutex::new(Vec::new()),
            }),
        };
        let weak = Arc::downgrade(&context.inner);
        context.inner.response.set_canceller(move || {
            upgrade(&weak).is_some_and(|context| context.cancel())
        });
        context
    }

    /// 进程内唯一的调用编号。
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 当前状态。
    pub fn state(&self) -> InvocationState {
        self.inner.monitor.state()
    }

    /// 以当前挂起超时挂起调用。
    pub fn suspend(&self) -> Result<(), ProcessError> {
        self.enter_suspended(None)
    }

    /// 挂起调用并设置超时。
    pub fn suspend_for(&self, timeout: Duration) -> Result<(), ProcessError> {
        self.enter_suspended(Some(timeout))
    }

    /// 仅当调用仍在 Running 时挂起，返回是否成功。
    pub fn try_suspend(&self) -> bool {
        if self
            .inner
            .monitor
            .enter_if(&RUNNING, InvocationState::Suspended)
            .is_err()
        {
            return false;
        }
        self.after_suspended();
        true
    }

    /// 修改挂起超时；`None` 表示不限时。
    ///
    /// 已挂起时立即以新超时重新计时；Running 时仅记录，待挂起时生效。
    pub fn set_suspend_timeout(&self, timeout: Option<Duration>) -> Result<(), ProcessError> {
        let state = self.inner.monitor.check(|state| state);
        match state {
            InvocationState::Running => {
                self.inner.timer.lock().timeout = timeout;
            }
            InvocationState::Suspended => {
                self.inner.timer.lock().timeout = timeout;
                self.arm_timer();
            }
            terminal => return Err(ProcessError::illegal_state(terminal, "set_suspend_timeout")),
        }
        let callback = Arc::clone(&self.inner.callback);
        notify("suspend_timeout_changed", || {
            callback.suspend_timeout_changed(timeout)
        });
        Ok(())
    }

    /// 当前挂起超时。
    pub fn suspend_timeout(&self) -> Option<Duration> {
        self.inner.timer.lock().timeout
    }

    /// 以响应恢复调用。
    pub fn resume(&self, response: R) -> Result<(), ProcessError> {
        self.resolve(Ok(response), "resume")
    }

    /// 以错误恢复调用。
    pub fn resume_with_error(&self, error: ProcessError) -> Result<(), ProcessError> {
        self.resolve(Err(error), "resume_with_error")
    }

    /// 取消调用。
    ///
    /// 返回 `true` 表示本次调用使其进入 Cancelled；调用已恢复或已取消时返回 `false`。
    pub fn cancel(&self) -> bool {
        match self
            .inner
            .monitor
            .enter_if(&CANCELLABLE, InvocationState::Cancelled)
        {
            Ok(_) => {
                self.disarm_timer();
                self.inner.cancellation.cancel();
                self.inner.inflected.complete_cancelled();
                self.inner.response.complete_cancelled();
                let callback = Arc::clone(&self.inner.callback);
                notify("cancelled", || callback.cancelled());
                debug!(
                    target: targets::INVOCATION,
                    invocation = self.inner.id,
                    "invocation cancelled"
                );
                true
            }
            Err(state) => {
                debug!(
                    target: targets::INVOCATION,
                    invocation = self.inner.id,
                    %state,
                    "cancel ignored"
                );
                false
            }
        }
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.state() == InvocationState::Cancelled
    }

    /// 协作式取消令牌，Stage 与 Inflector 可在关键路径上检查。
    pub fn cancellation(&self) -> Cancellation {
        self.inner.cancellation.child()
    }

    /// 设置挂起超时后使用的默认响应。
    pub fn set_default_response(&self, response: R) {
        *self.inner.default_response.lock() = Some(response);
    }

    /// 已设置的默认响应。
    pub fn default_response(&self) -> Option<R> {
        self.inner.default_response.lock().clone()
    }

    /// 压入一份作用域快照，供响应终结器在其他线程上重新激活。
    pub fn push_request_scope(&self, instance: ScopeInstance) {
        self.inner.scopes.lock().push(instance);
    }

    /// 弹出最近压入的作用域快照，没有时返回 `None`。
    pub fn pop_request_scope(&self) -> Option<ScopeInstance> {
        self.inner.scopes.lock().pop()
    }

    pub(crate) fn inflected(&self) -> &ResponseFuture<R> {
        &self.inner.inflected
    }

    pub(crate) fn response(&self) -> &ResponseFuture<R> {
        &self.inner.response
    }

    pub(crate) fn callback(&self) -> &Arc<dyn InvocationCallback<R>> {
        &self.inner.callback
    }

    /// Inflector 返回后的收尾：调用仍在 Running 时以返回值恢复，否则忽略返回值。
    pub(crate) fn complete_inflection(&self, outcome: Result<Option<R>, ProcessError>) {
        match outcome {
            Ok(Some(response)) => {
                match self
                    .inner
                    .monitor
                    .enter_if(&RUNNING, InvocationState::Resumed)
                {
                    Ok(_) => {
                        self.inner.inflected.set(response);
                    }
                    Err(state) => debug!(
                        target: targets::INVOCATION,
                        invocation = self.inner.id,
                        %state,
                        "inflector response ignored: invocation left RUNNING"
                    ),
                }
            }
            Ok(None) => {
                if self
                    .inner
                    .monitor
                    .enter_if(&RUNNING, InvocationState::Resumed)
                    .is_ok()
                {
                    self.inner.inflected.set_error(ProcessError::NoResponse);
                }
            }
            Err(error) => {
                match self
                    .inner
                    .monitor
                    .enter_if(&RESUMABLE, InvocationState::Resumed)
                {
                    Ok(_) => {
                        self.disarm_timer();
                        self.inner.inflected.set_error(error);
                    }
                    Err(state) => debug!(
                        target: targets::INVOCATION,
                        invocation = self.inner.id,
                        %state,
                        %error,
                        "inflector failure ignored: invocation already settled"
                    ),
                }
            }
        }
    }

    fn enter_suspended(&self, timeout: Option<Duration>) -> Result<(), ProcessError> {
        match self
            .inner
            .monitor
            .enter_if(&RUNNING, InvocationState::Suspended)
        {
            Ok(_) => {
                if let Some(timeout) = timeout {
                    self.inner.timer.lock().timeout = Some(timeout);
                }
                self.after_suspended();
                Ok(())
            }
            Err(InvocationState::Resumed) => {
                debug!(
                    target: targets::INVOCATION,
                    invocation = self.inner.id,
                    "suspend ignored: invocation already resumed"
                );
                Ok(())
            }
            Err(state) => Err(ProcessError::illegal_state(state, "suspend")),
        }
    }

    fn after_suspended(&self) {
        let timeout = self.arm_timer();
        trace!(
            target: targets::INVOCATION,
            invocation = self.inner.id,
            ?timeout,
            "invocation suspended"
        );
        let callback = Arc::clone(&self.inner.callback);
        notify("suspended", || callback.suspended(timeout, self));
    }

    fn resolve(
        &self,
        outcome: Result<R, ProcessError>,
        operation: &'static str,
    ) -> Result<(), ProcessError> {
        self.inner
            .monitor
            .enter_if(&RESUMABLE, InvocationState::Resumed)
            .map_err(|state| ProcessError::illegal_state(state, operation))?;
        self.disarm_timer();
        let callback = Arc::clone(&self.inner.callback);
        notify("resumed", || callback.resumed());
        match outcome {
            Ok(response) => self.inner.inflected.set(response),
            Err(error) => self.inner.inflected.set_error(error),
        };
        Ok(())
    }

    /// 递增代际并按当前超时调度定时器，返回生效的超时。
    fn arm_timer(&self) -> Option<Duration> {
        let (generation, timeout) = {
            let mut timer = self.inner.timer.lock();
            timer.generation += 1;
            (timer.generation, timer.timeout)
        };
        if let (Some(delay), Some(scheduler)) = (timeout, self.inner.scheduler.as_ref()) {
            let weak = Arc::downgrade(&self.inner);
            let scheduled = scheduler.schedule(
                delay,
                Box::new(move || {
                    if let Some(context) = upgrade(&weak) {
                        context.on_suspend_timeout(generation);
                    }
                }),
            );
            if let Err(rejected) = scheduled {
                warn!(
                    target: targets::INVOCATION,
                    invocation = self.inner.id,
                    error = %rejected,
                    "suspend timeout could not be scheduled"
                );
            }
        }
        timeout
    }

    fn disarm_timer(&self) {
        self.inner.timer.lock().generation += 1;
    }

    fn on_suspend_timeout(&self, generation: u64) {
        if self.inner.timer.lock().generation != generation {
            trace!(
                target: targets::INVOCATION,
                invocation = self.inner.id,
                "stale suspend timer ignored"
            );
            return;
        }
        if self.state() != InvocationState::Suspended {
            return;
        }
        match self.default_response() {
            Some(response) => {
                if let Err(error) = self.resolve(Ok(response), "suspend_timeout") {
                    debug!(
                        target: targets::INVOCATION,
                        invocation = self.inner.id,
                        %error,
                        "suspend timeout lost the race against another transition"
                    );
                }
            }
            None => debug!(
                target: targets::INVOCATION,
                invocation = self.inner.id,
                "suspend timeout expired without default response; invocation stays pending"
            ),
        }
    }
}

fn upgrade<R>(weak: &Weak<Inner<R>>) -> Option<InvocationContext<R>> {
    weak.upgrade().map(|inner| InvocationContext { inner })
}

impl<R> fmt::Debug for InvocationContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("id", &self.inner.id)
            .field("state", &self.inner.monitor.state())
            .finish_non_exhaustive()
    }
}
