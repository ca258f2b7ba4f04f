use std::fmt;

use parking_lot::Mutex;

/// 单次调用的执行状态。
///
/// # 教案式说明
/// - **意图 (Why)**：挂起、恢复、取消可能由不同线程在任意时刻触发，必须以显式状态机约束
///   其先后关系，避免“恢复两次”“取消后又恢复”一类竞态；
/// - **契约 (What)**：
///   - 初始状态为 [`InvocationState::Running`]；
///   - 合法迁移仅有 `Running→Suspended`、`Running→Resumed`、`Running→Cancelled`、
///     `Suspended→Resumed`、`Suspended→Cancelled`；
///   - [`InvocationState::Resumed`] 与 [`InvocationState::Cancelled`] 为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// 默认状态：执行流尚未被显式修改。
    Running,
    /// 已挂起，等待外部恢复或取消。
    Suspended,
    /// 已恢复，结果已写入。
    Resumed,
    /// 已取消。
    Cancelled,
}

impl InvocationState {
    /// 是否为终态。
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Resumed | InvocationState::Cancelled)
    }

    /// 判定 `self → target` 是否属于合法迁移表。
    pub fn can_transition_to(self, target: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, target),
            (Running, Suspended)
                | (Running, Resumed)
                | (Running, Cancelled)
                | (Suspended, Resumed)
                | (Suspended, Cancelled)
        )
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            InvocationState::Running => "RUNNING",
            InvocationState::Suspended => "SUSPENDED",
            InvocationState::Resumed => "RESUMED",
            InvocationState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 监视器守卫：命名的“允许进入的源状态集合”。
#[derive(Clone, Copy, Debug)]
pub(crate) struct Guard {
    name: &'static str,
    accepts: fn(InvocationState) -> bool,
}

impl Guard {
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    fn is_satisfied(&self, state: InvocationState) -> bool {
        (self.accepts)(state)
    }
}

fn is_running(state: InvocationState) -> bool {
    state == InvocationState::Running
}

fn is_running_or_suspended(state: InvocationState) -> bool {
    matches!(state, InvocationState::Running | InvocationState::Suspended)
}

/// 仅 Running 可进入（挂起）。
pub(crate) const RUNNING: Guard = Guard {
    name: "running",
    accepts: is_running,
};

/// Running 或 Suspended 可进入（恢复）。
pub(crate) const RESUMABLE: Guard = Guard {
    name: "resumable",
    accepts: is_running_or_suspended,
};

/// Running 或 Suspended 可进入（取消）。
pub(crate) const CANCELLABLE: Guard = Guard {
    name: "cancellable",
    accepts: is_running_or_suspended,
};

/// 单次调用的状态监视器。
///
/// # 教案式说明
/// - **意图 (Why)**：跨挂起/恢复边界的 happens-before 关系由这把锁建立，而非依赖内存模型默认行为；
/// - **逻辑 (How)**：`enter_if` 在同一临界区内完成“守卫判定 + 状态写入”，判定与迁移不可分割；
/// - **契约 (What)**：监视器内部绝不执行回调或提交任务，调用方必须在拿到迁移结果、释放锁之后
///   再调用用户代码。
pub(crate) struct StateMonitor {
    state: Mutex<InvocationState>,
}

impl StateMonitor {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InvocationState::Running),
        }
    }

    pub(crate) fn state(&self) -> InvocationState {
        *self.state.lock()
    }

    /// 若当前状态满足守卫则迁移到 `target`。
    ///
    /// 成功返回迁移前的状态；失败返回当前状态且不做任何修改。
    pub(crate) fn enter_if(
        &self,
        guard: &Guard,
        target: InvocationState,
    ) -> Result<InvocationState, InvocationState> {
        let mut state = self.state.lock();
        let current = *state;
        if !guard.is_satisfied(current) {
            return Err(current);
        }
        debug_assert!(
            current.can_transition_to(target),
            "guard `{}` admitted illegal transition {current} -> {target}",
            guard.name()
        );
        *state = target;
        Ok(current)
    }

    /// 在持锁状态下读取当前状态并执行只读判定，返回判定结果。
    pub(crate) fn check<T>(&self, inspect: impl FnOnce(InvocationState) -> T) -> T {
        let state = self.state.lock();
        inspect(*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn guards_follow_the_transition_table() {
        let monitor = StateMonitor::new();
        assert_eq!(
            monitor.enter_if(&RUNNING, InvocationState::Suspended),
            Ok(InvocationState::Running)
        );
        assert_eq!(
            monitor.enter_if(&RUNNING, InvocationState::Suspended),
            Err(InvocationState::Suspended)
        );
        assert_eq!(
            monitor.enter_if(&RESUMABLE, InvocationState::Resumed),
            Ok(InvocationState::Suspended)
        );
        assert_eq!(
            monitor.enter_if(&CANCELLABLE, InvocationState::Cancelled),
            Err(InvocationState::Resumed)
        );
        assert!(monitor.state().is_terminal());
    }

    #[test]
    fn competing_transitions_admit_exactly_one_winner() {
        let monitor = Arc::new(StateMonitor::new());
        let handles: Vec<_> = [InvocationState::Resumed, InvocationState::Cancelled]
            .into_iter()
            .map(|target| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || monitor.enter_if(&RESUMABLE, target).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("迁移线程不应 panic"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1, "终态只能被写入一次");
        assert!(monitor.check(InvocationState::is_terminal));
    }
}
