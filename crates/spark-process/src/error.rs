//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为处理内核对外暴露的失败语义提供集中定义：非法状态迁移、作用域误用、调度拒绝、
//!   可映射的业务异常以及携带响应的结构化错误；
//! - 所有失败最终只以两种形态出现：`ResponseFuture` 中记录的错误，或在误用点直接返回的
//!   [`ProcessError::IllegalState`] 一类错误。
//!
//! ## 设计要求（What）
//! - [`ProcessError`] 实现 `Clone`，以便单次写入的结果句柄可被多个等待者同时观测；
//!   业务异常因此以 [`SharedError`]（`Arc<dyn Error>`）承载；
//! - 只有显式包装为 [`MappableError`] 的异常才有资格进入异常映射流程。

use std::{borrow::Cow, error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

use crate::invocation::InvocationState;

/// 跨线程共享的业务异常。
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// 处理内核的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：按照“非法状态 / 可映射异常 / 调度拒绝 / 业务失败”四类归档，
///   使调用方能够直接据此决定是修正调用顺序、交给映射器还是直接返回失败；
/// - **契约 (What)**：
///   - 所有变体均 `Clone + Send + Sync + 'static`；
///   - `IllegalState`、`NotInScope`、`ScopeShutDown` 总是在误用点同步返回，从不被静默重试；
///   - `Mappable` 是唯一会被 [`ResponseProcessor`](crate::finalizer::ResponseProcessor)
///     尝试转换为响应的变体；
/// - **执行逻辑 (How)**：底层原因以 `#[source]` 暴露，便于 `tracing` 或上层错误框架展开错误链。
#[derive(Clone, Debug, Error)]
pub enum ProcessError {
    /// 在当前调用状态下不允许执行该操作。
    #[error("illegal invocation state `{state}` for operation `{operation}`")]
    IllegalState {
        state: InvocationState,
        operation: &'static str,
    },

    /// 调用线程上没有激活的请求作用域。
    #[error("not inside a request scope")]
    NotInScope,

    /// 作用域管理器已经关闭。
    #[error("request scope manager has been shut down")]
    ScopeShutDown,

    /// 作用域内的值操作失败。
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// 框架层处理失败，例如执行器拒绝提交。
    #[error("request processing failed: {reason}")]
    Processing {
        reason: Cow<'static, str>,
        #[source]
        source: Option<SharedError>,
    },

    /// 调用已被取消。
    #[error("invocation cancelled")]
    Cancelled,

    /// Stage 链遍历完成但没有终端 Inflector。
    #[error("terminal stage did not provide an inflector")]
    InflectorNotFound,

    /// Inflector 在调用仍处于 Running 时没有给出响应，也没有挂起调用。
    #[error("inflector produced no response while the invocation was still running")]
    NoResponse,

    /// 可交给异常映射器处理的业务异常。
    #[error(transparent)]
    Mappable(#[from] MappableError),

    /// 不可映射的业务异常，原样作为调用的最终失败。
    #[error("application failure: {0}")]
    Application(#[source] SharedError),
}

impl ProcessError {
    /// 将业务异常标记为可映射。
    pub fn mappable<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ProcessError::Mappable(MappableError::new(cause))
    }

    /// 将业务异常包装为不可映射的失败。
    pub fn application<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ProcessError::Application(Arc::new(cause))
    }

    /// 构造不带底层原因的框架处理失败。
    pub fn processing(reason: impl Into<Cow<'static, str>>) -> Self {
        ProcessError::Processing {
            reason: reason.into(),
            source: None,
        }
    }

    /// 构造携带底层原因的框架处理失败。
    pub fn processing_with<E>(reason: impl Into<Cow<'static, str>>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ProcessError::Processing {
            reason: reason.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// 非法状态迁移的快捷构造。
    pub(crate) fn illegal_state(state: InvocationState, operation: &'static str) -> Self {
        ProcessError::IllegalState { state, operation }
    }

    /// 是否为非法状态类错误（含作用域误用）。
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            ProcessError::IllegalState { .. }
                | ProcessError::NotInScope
                | ProcessError::ScopeShutDown
        )
    }

    /// 是否为调用取消。
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled)
    }

    /// 若为可映射异常则返回其包装。
    pub fn as_mappable(&self) -> Option<&MappableError> {
        match self {
            ProcessError::Mappable(mappable) => Some(mappable),
            _ => None,
        }
    }
}

impl From<RejectedExecution> for ProcessError {
    fn from(rejected: RejectedExecution) -> Self {
        ProcessError::processing_with("request execution rejected", rejected)
    }
}

/// 作用域值操作失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    /// 同一作用域中某个键已被写入，禁止覆盖。
    #[error("an instance for key `{key}` was already seeded in scope #{scope}")]
    AlreadySeeded { key: &'static str, scope: u64 },
}

/// 执行器拒绝接收任务。
///
/// - **契约 (What)**：`executor` 为拒绝方的名称，`reason` 为人类可读原因；
///   调用入口处的拒绝会被包装为 [`ProcessError::Processing`] 并立即作为失败结果交付。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("task rejected by executor `{executor}`: {reason}")]
pub struct RejectedExecution {
    executor: Cow<'static, str>,
    reason: Cow<'static, str>,
}

impl RejectedExecution {
    /// 构造拒绝错误。
    pub fn new(executor: impl Into<Cow<'static, str>>, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            executor: executor.into(),
            reason: reason.into(),
        }
    }

    /// 拒绝方名称。
    pub fn executor(&self) -> &str {
        &self.executor
    }

    /// 拒绝原因。
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// 可映射异常包装。
///
/// # 教案式说明
/// - **意图 (Why)**：并非所有失败都应当转换成响应；框架自身故障必须原样上报。
///   业务代码通过显式包装声明“该异常允许交给映射器”；
/// - **契约 (What)**：[`MappableError::cause`] 返回被包装的原始异常，映射流程以其运行时类型
///   查询 [`ExceptionMappers`](crate::mapper::ExceptionMappers)。
#[derive(Clone)]
pub struct MappableError {
    cause: SharedError,
}

impl MappableError {
    /// 包装具体异常。
    pub fn new<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            cause: Arc::new(cause),
        }
    }

    /// 包装已经共享的异常。
    pub fn from_shared(cause: SharedError) -> Self {
        Self { cause }
    }

    /// 被包装的原始异常。
    pub fn cause(&self) -> &SharedError {
        &self.cause
    }
}

impl fmt::Debug for MappableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappableError")
            .field("cause", &format_args!("{}", self.cause))
            .finish()
    }
}

impl fmt::Display for MappableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mappable application failure: {}", self.cause)
    }
}

impl StdError for MappableError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

/// 携带现成响应的结构化错误。
///
/// 作为 [`MappableError`] 的原因出现时，映射流程直接取用其中的响应，不再查询映射器；
/// 从 Stage 链遍历中抛出时，调用控制器将其转换为直接返回该响应的 Inflector。
pub struct ResponseError<R> {
    response: R,
    message: Cow<'static, str>,
}

impl<R> ResponseError<R> {
    /// 以响应构造错误。
    pub fn new(response: R) -> Self {
        Self {
            response,
            message: Cow::Borrowed("request terminated with a prepared response"),
        }
    }

    /// 附加描述信息。
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    /// 借用携带的响应。
    pub fn response(&self) -> &R {
        &self.response
    }

    /// 取出携带的响应。
    pub fn into_response(self) -> R {
        self.response
    }
}

impl<R> fmt::Debug for ResponseError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseError")
            .field("response", &std::any::type_name::<R>())
            .field("message", &self.message)
            .finish()
    }
}

impl<R> fmt::Display for ResponseError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<R> StdError for ResponseError<R> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn mappable_exposes_cause_as_source() {
        let err = ProcessError::mappable(Boom);
        let mappable = err.as_mappable().expect("应为可映射异常");
        assert!(mappable.cause().downcast_ref::<Boom>().is_some());
        assert_eq!(err.to_string(), "mappable application failure: boom");
    }

    #[test]
    fn rejected_execution_becomes_processing_failure() {
        let err: ProcessError = RejectedExecution::new("requesting", "shut down").into();
        match &err {
            ProcessError::Processing { source, .. } => {
                let source = source.as_ref().expect("拒绝原因必须保留");
                assert!(source.downcast_ref::<RejectedExecution>().is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_illegal_state());
    }

    #[test]
    fn illegal_state_classification() {
        assert!(ProcessError::illegal_state(InvocationState::Resumed, "resume").is_illegal_state());
        assert!(ProcessError::NotInScope.is_illegal_state());
        assert!(!ProcessError::Cancelled.is_illegal_state());
    }
}
