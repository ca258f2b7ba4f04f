#![deny(unsafe_code)]
#![allow(clippy::type_complexity)]
#![doc = "spark-process: 分阶段、可挂起/恢复的请求-响应处理内核。"]
#![doc = ""]
#![doc = "== 处理流水线 =="]
#![doc = "调用方 → `RequestInvoker::invoke` → 作用域引用移交 → requesting 执行器上遍历 Stage 链 →"]
#![doc = "终端 Inflector 经可挂起适配器执行 →（可选挂起，由外部在任意线程恢复）→ responding 执行器上"]
#![doc = "运行 `ResponseProcessor`（异常映射 + Responder 链）→ 结果发布到 `ResponseFuture` 与回调。"]
#![doc = ""]
#![doc = "== 并发约束 =="]
#![doc = "单次调用的状态迁移只经由一把监视器锁串行化；作用域实例在线程之间显式移交而非并发共享；"]
#![doc = "执行器对在解析完成后只读共享。"]

pub mod config;
pub mod error;
pub mod executor;
pub mod finalizer;
pub mod future;
pub mod invocation;
pub mod mapper;
pub mod observability;
pub mod respond;
pub mod scope;
pub mod stage;
pub mod timeout;

pub use config::{ConfigError, ExecutorKind, ExecutorSettings, ProcessingConfig, SuspendSettings};
pub use error::{
    MappableError, ProcessError, RejectedExecution, ResponseError, ScopeError, SharedError,
};
pub use executor::{
    ConfiguredExecutorProvider, DefaultExecutorProvider, ExecutorBroker, ExecutorProvider,
    ProcessingExecutors, SameThreadExecutor, Task, TaskExecutor,
};
#[cfg(feature = "thread-pool")]
pub use executor::ThreadPoolExecutor;
#[cfg(feature = "runtime-tokio")]
pub use executor::TokioBlockingExecutor;
pub use finalizer::{MAX_FINALIZE_ATTEMPTS, ResponseProcessor};
pub use future::ResponseFuture;
pub use invocation::{
    Cancellation, InvocationCallback, InvocationContext, InvocationState, NoopCallback,
    RequestInvoker, RequestInvokerBuilder,
};
pub use mapper::{ExceptionMapper, ExceptionMappers};
pub use respond::RespondingContext;
pub use scope::{RequestScope, ScopeInstance, ScopeKey};
pub use stage::{
    ChainBuilder, Continuation, Inflector, LinearProcessor, Next, NoopStagingContext,
    RequestProcessor, Responder, ResponderChainBuilder, ResponderContinuation, Stage, Stages,
    StagingContext, TrackingStagingContext, TracingStagingContext, TreeBuilder, TreeContinuation,
    TreeNext, TreeProcessor, TreeStage, process_linear, process_tree, run_responders,
};
pub use timeout::{ThreadTimeoutScheduler, TimeoutScheduler};

/// 统一的结果别名，错误类型默认为 [`ProcessError`]。
pub type Result<T, E = ProcessError> = core::result::Result<T, E>;
