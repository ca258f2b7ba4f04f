//! Stage/Continuation 处理链。
//!
//! # 设计综述（Why）
//! - 请求在抵达业务逻辑前要经过一串彼此独立的变换：预处理、匹配、路由……每一步只负责
//!   “变换数据并指出下一步”，处理内核负责把这些步骤串起来；
//! - 终端步骤不再变换数据，而是给出产生响应的 [`Inflector`]。
//!
//! # 契约（What）
//! - 线性链：每个 [`Stage`] 返回 [`Continuation`]，其中 [`Next`] 要么指向下一个 Stage，
//!   要么终止并（可选地）携带 Inflector；
//! - 树：每个 [`TreeStage`] 返回 [`TreeContinuation`]，其中 [`TreeNext`] 要么是有序子节点，
//!   要么是 Inflector；深度优先、从左到右遍历，首个 Inflector 立即结束遍历；
//! - Inflector 始终显式地出现在续延的和类型中，不通过能力探测发现；
//! - Stage 返回错误时遍历立刻中止并向上传播。

pub(crate) mod builder;
mod processor;
mod staging;
mod traverse;

use std::{any::type_name, sync::Arc};

use crate::{error::ProcessError, invocation::InvocationContext};

pub use builder::{ChainBuilder, ResponderChainBuilder, Stages, TreeBuilder};
pub use processor::{LinearProcessor, RequestProcessor, TreeProcessor};
pub use staging::{
    NoopStagingContext, StagingContext, TrackingStagingContext, TracingStagingContext,
};
pub use traverse::{process_linear, process_tree, run_responders};

/// 终端函数：消费请求数据，借助调用上下文产生响应。
///
/// - 返回 `Ok(Some(response))`：调用仍在 Running 时以该响应恢复；
/// - 返回 `Ok(None)`：Inflector 已挂起调用（或将由他处恢复）；若调用仍在 Running 则视为
///   [`ProcessError::NoResponse`]；
/// - 返回 `Err(error)`：以该错误恢复调用。
pub type Inflector<D, R> =
    Arc<dyn Fn(D, &InvocationContext<R>) -> Result<Option<R>, ProcessError> + Send + Sync>;

/// 线性处理步骤。
pub trait Stage<D, R>: Send + Sync {
    /// 诊断名称，供 [`StagingContext`] 与日志使用。
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// 变换数据并给出下一步。
    fn apply(&self, data: D) -> Result<Continuation<D, R>, ProcessError>;
}

/// 线性续延的下一步。
pub enum Next<D, R> {
    /// 继续执行下一个 Stage。
    Stage(Arc<dyn Stage<D, R>>),
    /// 链在此终止，可选地携带 Inflector。
    Terminal(Option<Inflector<D, R>>),
}

impl<D, R> Clone for Next<D, R> {
    fn clone(&self) -> Self {
        match self {
            Next::Stage(stage) => Next::Stage(Arc::clone(stage)),
            Next::Terminal(inflector) => Next::Terminal(inflector.clone()),
        }
    }
}

/// 线性 Stage 的执行结果。
pub struct Continuation<D, R> {
    pub result: D,
    pub next: Next<D, R>,
}

impl<D, R> Continuation<D, R> {
    /// 继续执行 `next`。
    pub fn then(result: D, next: Arc<dyn Stage<D, R>>) -> Self {
        Self {
            result,
            next: Next::Stage(next),
        }
    }

    /// 终止且没有 Inflector。
    pub fn terminal(result: D) -> Self {
        Self {
            result,
            next: Next::Terminal(None),
        }
    }

    /// 终止并携带 Inflector。
    pub fn inflect(result: D, inflector: Inflector<D, R>) -> Self {
        Self {
            result,
            next: Next::Terminal(Some(inflector)),
        }
    }
}

/// 树形处理节点。
pub trait TreeStage<D, R>: Send + Sync {
    /// 诊断名称。
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// 变换数据并给出子节点或 Inflector。
    fn apply(&self, data: D) -> Result<TreeContinuation<D, R>, ProcessError>;
}

/// 树形续延的下一步。
pub enum TreeNext<D, R> {
    /// 依序尝试的子节点；空集合表示此分支走到尽头。
    Children(Vec<Arc<dyn TreeStage<D, R>>>),
    /// 找到 Inflector，遍历结束。
    Inflector(Inflector<D, R>),
}

/// 树形节点的执行结果。
pub struct TreeContinuation<D, R> {
    pub result: D,
    pub next: TreeNext<D, R>,
}

impl<D, R> TreeContinuation<D, R> {
    /// 继续尝试 `children`。
    pub fn children(result: D, children: Vec<Arc<dyn TreeStage<D, R>>>) -> Self {
        Self {
            result,
            next: TreeNext::Children(children),
        }
    }

    /// 分支走到尽头。
    pub fn dead_end(result: D) -> Self {
        Self::children(result, Vec::new())
    }

    /// 找到 Inflector。
    pub fn inflect(result: D, inflector: Inflector<D, R>) -> Self {
        Self {
            result,
            next: TreeNext::Inflector(inflector),
        }
    }
}

/// 响应侧处理步骤。
pub trait Responder<R>: Send + Sync {
    /// 诊断名称。
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// 变换响应并给出下一步。
    fn apply(&self, response: R) -> Result<ResponderContinuation<R>, ProcessError>;
}

/// 响应侧续延；`next` 为 `None` 表示链结束。
pub struct ResponderContinuation<R> {
    pub result: R,
    pub next: Option<Arc<dyn Responder<R>>>,
}
