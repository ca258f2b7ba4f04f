//! 挂起超时的调度协作方。
//!
//! 调用控制器只依赖 [`TimeoutScheduler`]：到期后执行一个任务，不要求可取消；
//! 过期任务由调用上下文按代际自行识别并忽略。

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::{
    error::RejectedExecution,
    executor::Task,
    observability::targets,
};

/// 延迟任务调度器。
pub trait TimeoutScheduler: Send + Sync {
    /// 在 `delay` 之后执行 `task`。
    fn schedule(&self, delay: Duration, task: Task) -> Result<(), RejectedExecution>;
}

struct Entry {
    deadline: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // `BinaryHeap` 是大顶堆，反转后最早到期者位于堆顶。
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Queue {
    entries: BinaryHeap<Entry>,
    sequence: u64,
    shut_down: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

/// 单后台线程的超时调度器。
///
/// # 契约说明（What）
/// - 到期任务在后台线程上依到期时间顺序执行，同一时刻到期者按提交顺序执行；
/// - 任务内 panic 被捕获并记录，不影响后续任务；
/// - [`ThreadTimeoutScheduler::shutdown`] 之后的提交被拒绝，尚未到期的任务被丢弃。
pub struct ThreadTimeoutScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimeoutScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                entries: BinaryHeap::new(),
                sequence: 0,
                shut_down: false,
            }),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("spark-process-timeout".to_owned())
                .spawn(move || run(&shared))
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!(
                    target: targets::TIMEOUT,
                    %error,
                    "failed to spawn timeout thread; scheduler rejects all tasks"
                );
                shared.queue.lock().shut_down = true;
                None
            }
        };
        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// 停止调度并等待后台线程退出。
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shut_down && self.worker.lock().is_none() {
                return;
            }
            queue.shut_down = true;
            queue.entries.clear();
        }
        self.shared.wake.notify_all();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
        debug!(target: targets::TIMEOUT, "timeout scheduler shut down");
    }
}

impl Default for ThreadTimeoutScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadTimeoutScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TimeoutScheduler for ThreadTimeoutScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Result<(), RejectedExecution> {
        // 无法表示的截止时间等同于永不到期。
        let Some(deadline) = Instant::now().checked_add(delay) else {
            debug!(
                target: targets::TIMEOUT,
                ?delay,
                "deadline out of range; task will never fire"
            );
            return Ok(());
        };
        {
            let mut queue = self.shared.queue.lock();
            if queue.shut_down {
                return Err(RejectedExecution::new(
                    "timeout",
                    "timeout scheduler has been shut down",
                ));
            }
            queue.sequence += 1;
            let sequence = queue.sequence;
            queue.entries.push(Entry {
                deadline,
                sequence,
                task,
            });
        }
        self.shared.wake.notify_one();
        Ok(())
    }
}

impl std::fmt::Debug for ThreadTimeoutScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("ThreadTimeoutScheduler")
            .field("pending", &queue.entries.len())
            .field("shut_down", &queue.shut_down)
            .finish()
    }
}

fn run(shared: &Shared) {
    loop {
        let entry = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shut_down {
                    return;
                }
                let next = queue.entries.peek().map(|entry| entry.deadline);
                match next {
                    None => shared.wake.wait(&mut queue),
                    Some(deadline) if deadline <= Instant::now() => break queue.entries.pop(),
                    Some(deadline) => {
                        let _ = shared.wake.wait_until(&mut queue, deadline);
                    }
                }
            }
        };
        if let Some(entry) = entry
            && catch_unwind(AssertUnwindSafe(entry.task)).is_err()
        {
            warn!(target: targets::TIMEOUT, "timeout task panicked; ignoring");
        }
    }
}
