use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RejectedExecution;

use super::{Task, TaskExecutor};

/// 在提交线程上立即执行任务。
///
/// 缺省执行器：不引入任何线程切换，调用 `invoke` 的线程会同步完成整条处理链，
/// 除非 Inflector 挂起了调用。
#[derive(Debug, Default)]
pub struct SameThreadExecutor {
    shut_down: AtomicBool,
}

impl SameThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskExecutor for SameThreadExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RejectedExecution::new("same-thread", "executor has been shut down"));
        }
        task();
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    fn name(&self) -> &str {
        "same-thread"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, atomic::AtomicUsize};

    #[test]
    fn runs_inline_until_shut_down() {
        let executor = SameThreadExecutor::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        executor
            .execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("未关闭时必须接受任务");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "任务应在提交线程上同步执行");

        executor.shutdown();
        let rejected = executor
            .execute(Box::new(|| unreachable!("关闭后任务不应执行")))
            .expect_err("关闭后必须拒绝");
        assert_eq!(rejected.executor(), "same-thread");
    }
}
