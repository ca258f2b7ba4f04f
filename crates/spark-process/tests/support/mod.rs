//! 集成测试共享的回调记录器。
//!
//! 各测试目标只使用其中一部分计数，未使用的访问器在部分目标中不可达。
#![allow(dead_code)]

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use spark_process::{InvocationCallback, InvocationContext, ProcessError};

/// 记录每类生命周期通知触发次数的回调。
#[derive(Default)]
pub struct Recorder {
    suspended: AtomicUsize,
    timeout_changes: AtomicUsize,
    resumed: AtomicUsize,
    cancelled: AtomicUsize,
    results: AtomicUsize,
    failures: AtomicUsize,
    last_failure: Mutex<Option<ProcessError>>,
}

impl Recorder {
    pub fn suspended(&self) -> usize {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn timeout_changes(&self) -> usize {
        self.timeout_changes.load(Ordering::SeqCst)
    }

    pub fn resumed(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn results(&self) -> usize {
        self.results.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn last_failure(&self) -> Option<ProcessError> {
        self.last_failure.lock().clone()
    }
}

impl<R> InvocationCallback<R> for Recorder {
    fn suspended(&self, _timeout: Option<Duration>, _context: &InvocationContext<R>) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn suspend_timeout_changed(&self, _timeout: Option<Duration>) {
        self.timeout_changes.fetch_add(1, Ordering::SeqCst);
    }

    fn resumed(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }

    fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn result(&self, _response: &R) {
        self.results.fetch_add(1, Ordering::SeqCst);
    }

    fn failure(&self, error: &ProcessError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        *self.last_failure.lock() = Some(error.clone());
    }
}
