use std::sync::atomic::{AtomicBool, Ordering};

use futures::executor::ThreadPool;
use tracing::debug;

use crate::{error::RejectedExecution, observability::targets};

use super::{Task, TaskExecutor};

/// 基于 `futures::executor::ThreadPool` 的固定大小线程池。
///
/// 同步任务被包装为立即完成的 future 投递到池中；池在最后一个句柄析构时回收线程。
pub struct ThreadPoolExecutor {
    name: String,
    pool: ThreadPool,
    shut_down: AtomicBool,
}

impl ThreadPoolExecutor {
    /// 创建 `size` 个线程、线程名前缀为 `name_prefix` 的线程池。
    pub fn new(size: usize, name_prefix: &str) -> Result<Self, RejectedExecution> {
        if size == 0 {
            return Err(RejectedExecution::new(
                name_prefix.to_owned(),
                "pool size must be positive",
            ));
        }
        let pool = ThreadPool::builder()
            .pool_size(size)
            .name_prefix(name_prefix)
            .create()
            .map_err(|error| RejectedExecution::new(name_prefix.to_owned(), error.to_string()))?;
        debug!(
            target: targets::EXECUTOR,
            size,
            prefix = name_prefix,
            "thread pool executor created"
        );
        Ok(Self {
            name: format!("thread-pool:{name_prefix}"),
            pool,
            shut_down: AtomicBool::new(false),
        })
    }
}

impl TaskExecutor for ThreadPoolExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RejectedExecution::new(
                self.name.clone(),
                "executor has been shut down",
            ));
        }
        self.pool.spawn_ok(async move { task() });
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("name", &self.name)
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn tasks_run_on_named_pool_threads() {
        let executor = ThreadPoolExecutor::new(2, "spark-test-").expect("线程池创建成功");
        let (tx, rx) = mpsc::channel();
        executor
            .execute(Box::new(move || {
                let name = std::thread::current().name().map(str::to_owned);
                let _ = tx.send(name);
            }))
            .expect("任务应被接受");
        let name = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("任务应在池线程上执行")
            .expect("池线程必须具名");
        assert!(name.starts_with("spark-test-"), "unexpected thread name {name}");

        executor.shutdown();
        assert!(executor.execute(Box::new(|| {})).is_err());
    }
}
