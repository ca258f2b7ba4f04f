use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;

use crate::error::RejectedExecution;

use super::{Task, TaskExecutor};

/// 把任务投递到 Tokio 阻塞线程池。
///
/// Stage 与 Inflector 是同步函数，可能执行阻塞 I/O，因此走 `spawn_blocking` 而非 `spawn`。
#[derive(Debug)]
pub struct TokioBlockingExecutor {
    handle: Handle,
    shut_down: AtomicBool,
}

impl TokioBlockingExecutor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            shut_down: AtomicBool::new(false),
        }
    }

    /// 绑定当前线程所在的运行时；不在运行时内时返回拒绝错误。
    pub fn current() -> Result<Self, RejectedExecution> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|error| RejectedExecution::new("tokio-blocking", error.to_string()))
    }
}

impl TaskExecutor for TokioBlockingExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RejectedExecution::new(
                "tokio-blocking",
                "executor has been shut down",
            ));
        }
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    fn name(&self) -> &str {
        "tokio-blocking"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn runs_task_on_blocking_pool() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("运行时创建成功");
        let executor = TokioBlockingExecutor::new(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();
        executor
            .execute(Box::new(move || {
                let _ = tx.send(7_u8);
            }))
            .expect("任务应被接受");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("任务应执行"), 7);
    }
}
