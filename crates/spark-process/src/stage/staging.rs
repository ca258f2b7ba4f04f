use std::{fmt, marker::PhantomData};

use parking_lot::Mutex;
use tracing::trace;

use crate::observability::targets;

/// Stage 执行的观测钩子。
///
/// 遍历在每次 `apply` 前后分别调用 `before_stage` 与 `after_stage`，
/// 前者观察输入数据，后者观察输出数据。
pub trait StagingContext<D>: Send + Sync {
    fn before_stage(&self, _stage: &str, _data: &D) {}

    fn after_stage(&self, _stage: &str, _data: &D) {}
}

/// 不做任何观测。
pub struct NoopStagingContext<D>(PhantomData<fn(&D)>);

impl<D> NoopStagingContext<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<D> Default for NoopStagingContext<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> StagingContext<D> for NoopStagingContext<D> {}

/// 以 `trace!` 记录每个 Stage 的进出。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingStagingContext;

impl<D> StagingContext<D> for TracingStagingContext {
    fn before_stage(&self, stage: &str, _data: &D) {
        trace!(target: targets::STAGE, stage, "entering stage");
    }

    fn after_stage(&self, stage: &str, _data: &D) {
        trace!(target: targets::STAGE, stage, "leaving stage");
    }
}

struct Tracking<D> {
    last_stage: Option<String>,
    snapshot: Option<D>,
    visited: Vec<String>,
}

/// 记录最近执行的 Stage、其输出快照以及完整访问顺序。
///
/// 主要用于诊断与测试：遍历结束后可以确认哪些 Stage 被执行、执行到哪里为止。
pub struct TrackingStagingContext<D> {
    tracking: Mutex<Tracking<D>>,
}

impl<D: Clone + Send> TrackingStagingContext<D> {
    pub fn new() -> Self {
        Self {
            tracking: Mutex::new(Tracking {
                last_stage: None,
                snapshot: None,
                visited: Vec::new(),
            }),
        }
    }

    /// 最近完成的 Stage 名称。
    pub fn last_stage(&self) -> Option<String> {
        self.tracking.lock().last_stage.clone()
    }

    /// 最近完成的 Stage 的输出。
    pub fn snapshot(&self) -> Option<D> {
        self.tracking.lock().snapshot.clone()
    }

    /// 按进入顺序排列的 Stage 名称。
    pub fn visited(&self) -> Vec<String> {
        self.tracking.lock().visited.clone()
    }
}

impl<D: Clone + Send> Default for TrackingStagingContext<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + Send> StagingContext<D> for TrackingStagingContext<D> {
    fn before_stage(&self, stage: &str, _data: &D) {
        self.tracking.lock().visited.push(stage.to_owned());
    }

    fn after_stage(&self, stage: &str, data: &D) {
        let mut tracking = self.tracking.lock();
        tracking.last_stage = Some(stage.to_owned());
        tracking.snapshot = Some(data.clone());
    }
}

impl<D> fmt::Debug for TrackingStagingContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = self.tracking.lock();
        f.debug_struct("TrackingStagingContext")
            .field("last_stage", &tracking.last_stage)
            .field("visited", &tracking.visited)
            .finish_non_exhaustive()
    }
}
