use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{
    config::{ConfigError, ProcessingConfig},
    error::{ProcessError, RejectedExecution, ResponseError},
    executor::{
        ConfiguredExecutorProvider, DefaultExecutorProvider, ExecutorBroker, ExecutorProvider,
        ProcessingExecutors,
    },
    finalizer::ResponseProcessor,
    future::ResponseFuture,
    mapper::ExceptionMappers,
    observability::targets,
    scope::{RequestScope, ScopeInstance},
    stage::{RequestProcessor, Responder, StagingContext},
    timeout::{ThreadTimeoutScheduler, TimeoutScheduler},
};

use super::{InvocationCallback, InvocationContext, NoopCallback, notify};

struct Shared<Req, Resp> {
    processor: Arc<dyn RequestProcessor<Req, Resp>>,
    scope: RequestScope,
    finalizer: ResponseProcessor<Resp>,
    executors: ProcessingExecutors,
}

/// 调用入口：把请求送进 Stage 链，并把 Inflector 的结果交给响应终结器。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方只关心“提交请求、拿到结果句柄”；作用域移交、执行器切换、
///   挂起与恢复、异常映射都应隐藏在一次 `invoke` 之后；
/// - **逻辑 (How)**：
///   1. 取得一份作用域引用（当前线程已在作用域内则沿用，否则新建），交由本次调用持有；
///   2. 创建 [`InvocationContext`] 与最终结果句柄，后者的 `cancel` 即取消调用；
///   3. 把请求任务提交给 requesting 执行器后立即返回句柄；
///   4. 请求任务在作用域内遍历 Stage 链、执行 Inflector、压入作用域快照，并在 responding
///      执行器上登记响应终结器；
/// - **契约 (What)**：
///   - 每次调用最终结果恰好发布一次；
///   - requesting 执行器拒绝任务时，句柄以 [`ProcessError::Processing`] 失败并触发
///     `failure` 回调；
///   - 调用期间不持有任何锁去调用回调或执行器。
pub struct RequestInvoker<Req, Resp> {
    shared: Arc<Shared<Req, Resp>>,
    broker: Arc<ExecutorBroker>,
    scheduler: Arc<dyn TimeoutScheduler>,
    default_timeout: Option<Duration>,
}

impl<Req, Resp> RequestInvoker<Req, Resp>
where
    Req: Send + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    /// 以请求处理器开始构建。
    pub fn builder(
        processor: impl RequestProcessor<Req, Resp> + 'static,
    ) -> RequestInvokerBuilder<Req, Resp> {
        RequestInvokerBuilder::new(Arc::new(processor))
    }

    /// 提交请求，不关心生命周期通知。
    pub fn invoke(&self, request: Req) -> ResponseFuture<Resp> {
        self.invoke_with(request, Arc::new(NoopCallback))
    }

    /// 提交请求并在生命周期节点通知 `callback`。
    pub fn invoke_with(
        &self,
        request: Req,
        callback: Arc<dyn InvocationCallback<Resp>>,
    ) -> ResponseFuture<Resp> {
        let shared = &self.shared;
        let instance = shared
            .scope
            .suspend_current()
            .unwrap_or_else(|| shared.scope.create_context());
        let response = ResponseFuture::new();
        let context = InvocationContext::new(
            Arc::clone(&callback),
            Some(Arc::clone(&self.scheduler)),
            self.default_timeout,
            response.clone(),
        );
        trace!(
            target: targets::INVOCATION,
            invocation = context.id(),
            scope = instance.id(),
            "invocation submitted"
        );

        let task = {
            let shared = Arc::clone(shared);
            let context = context.clone();
            Box::new(move || shared.run(request, instance, context))
        };
        if let Err(rejected) = shared.executors.requesting.execute(task) {
            let error = ProcessError::from(rejected);
            warn!(
                target: targets::INVOCATION,
                invocation = context.id(),
                %error,
                "requesting executor rejected the invocation"
            );
            notify("failure", || callback.failure(&error));
            response.set_error(error);
        }
        response
    }

    /// 请求作用域管理器。
    pub fn scope(&self) -> &RequestScope {
        &self.shared.scope
    }

    /// 本调用器使用的执行器对。
    pub fn executors(&self) -> &ProcessingExecutors {
        &self.shared.executors
    }

    /// 回收执行器；之后提交的调用以执行器拒绝失败。
    pub fn shutdown(&self) {
        self.broker.shutdown();
    }
}

impl<Req, Resp> Shared<Req, Resp>
where
    Req: Send + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    /// requesting 执行器上的请求任务。
    fn run(self: Arc<Self>, request: Req, instance: ScopeInstance, context: InvocationContext<Resp>) {
        if context.is_cancelled() {
            trace!(
                target: targets::INVOCATION,
                invocation = context.id(),
                "invocation cancelled before processing; skipping stages"
            );
            return;
        }
        let scoped = self.scope.run_in_scope(Some(instance), || {
            let outcome = self.inflect(request, &context);
            context.complete_inflection(outcome);
            if let Some(snapshot) = self.scope.suspend_current() {
                context.push_request_scope(snapshot);
            }
            self.register_finalizer(&context);
        });
        if let Err(error) = scoped {
            debug!(
                target: targets::INVOCATION,
                invocation = context.id(),
                %error,
                "request scope unavailable"
            );
            context.complete_inflection(Err(error));
            self.register_finalizer(&context);
        }
    }

    /// 遍历 Stage 链并执行 Inflector；panic 视为处理失败。
    fn inflect(
        &self,
        request: Req,
        context: &InvocationContext<Resp>,
    ) -> Result<Option<Resp>, ProcessError> {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            match self.processor.process(request) {
                Ok((data, Some(inflector))) => {
                    if context.is_cancelled() {
                        return Err(ProcessError::Cancelled);
                    }
                    inflector(data, context)
                }
                Ok((_, None)) => Err(ProcessError::InflectorNotFound),
                Err(error) => match carried_response::<Resp>(&error) {
                    Some(response) => {
                        trace!(
                            target: targets::INVOCATION,
                            invocation = context.id(),
                            "stage failure carries a response; inflecting it"
                        );
                        Ok(Some(response))
                    }
                    None => Err(error),
                },
            }
        }));
        attempt.unwrap_or_else(|_| Err(ProcessError::processing("stage or inflector panicked")))
    }

    fn register_finalizer(self: &Arc<Self>, context: &InvocationContext<Resp>) {
        let task = {
            let shared = Arc::clone(self);
            let context = context.clone();
            Box::new(move || shared.finalizer.finalize(&context))
        };
        let on_rejected = {
            let context = context.clone();
            Box::new(move |rejected| reject_finalizer(&context, rejected))
        };
        context.inflected().add_listener_or_else(
            Arc::clone(&self.executors.responding),
            task,
            on_rejected,
        );
    }
}

fn carried_response<Resp: Clone + 'static>(error: &ProcessError) -> Option<Resp> {
    error
        .as_mappable()?
        .cause()
        .downcast_ref::<ResponseError<Resp>>()
        .map(|carried| carried.response().clone())
}

fn reject_finalizer<Resp>(context: &InvocationContext<Resp>, rejected: RejectedExecution)
where
    Resp: Clone + Send + Sync + 'static,
{
    drop(context.pop_request_scope());
    let error = ProcessError::from(rejected);
    warn!(
        target: targets::INVOCATION,
        invocation = context.id(),
        %error,
        "responding executor rejected the finalizer"
    );
    if context.response().is_done() {
        return;
    }
    let callback = Arc::clone(context.callback());
    notify("failure", || callback.failure(&error));
    context.response().set_error(error);
}

impl<Req, Resp> std::fmt::Debug for RequestInvoker<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInvoker")
            .field("executors", &self.shared.executors)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// [`RequestInvoker`] 的构建器。
///
/// 未显式配置的部分使用缺省值：新建作用域管理器、空映射器注册表、无 Responder、
/// 同线程执行器、独立超时线程、挂起不限时。
pub struct RequestInvokerBuilder<Req, Resp> {
    processor: Arc<dyn RequestProcessor<Req, Resp>>,
    scope: Option<RequestScope>,
    mappers: ExceptionMappers<Resp>,
    responder: Option<Arc<dyn Responder<Resp>>>,
    responder_staging: Option<Arc<dyn StagingContext<Resp>>>,
    broker: Option<ExecutorBroker>,
    providers: Vec<Arc<dyn ExecutorProvider>>,
    scheduler: Option<Arc<dyn TimeoutScheduler>>,
    default_timeout: Option<Duration>,
}

impl<Req, Resp> RequestInvokerBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    fn new(processor: Arc<dyn RequestProcessor<Req, Resp>>) -> Self {
        Self {
            processor,
            scope: None,
            mappers: ExceptionMappers::new(),
            responder: None,
            responder_staging: None,
            broker: None,
            providers: Vec::new(),
            scheduler: None,
            default_timeout: None,
        }
    }

    /// 共享的请求作用域管理器。
    pub fn scope(mut self, scope: RequestScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// 异常映射器注册表。
    pub fn exception_mappers(mut self, mappers: ExceptionMappers<Resp>) -> Self {
        self.mappers = mappers;
        self
    }

    /// 调用器级别的 Responder 链，在请求级 Responder 之后执行。
    pub fn responder(mut self, responder: Arc<dyn Responder<Resp>>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Responder 链的观测钩子。
    pub fn responder_staging(mut self, staging: Arc<dyn StagingContext<Resp>>) -> Self {
        self.responder_staging = Some(staging);
        self
    }

    /// 使用预先配置好的执行器代理。
    pub fn broker(mut self, broker: ExecutorBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// 向执行器代理追加供给方；注册顺序即优先级。
    pub fn executor_provider(mut self, provider: Arc<dyn ExecutorProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// 挂起超时调度器。
    pub fn timeout_scheduler(mut self, scheduler: Arc<dyn TimeoutScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// 挂起的缺省超时。
    pub fn default_suspend_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// 应用声明式配置：按配置创建执行器供给方并设置缺省挂起超时。
    pub fn config(self, config: &ProcessingConfig) -> Result<Self, ConfigError> {
        let provider = ConfiguredExecutorProvider::from_config(config)?;
        Ok(self
            .executor_provider(Arc::new(provider))
            .default_suspend_timeout(config.suspend.default_timeout()))
    }

    pub fn build(self) -> RequestInvoker<Req, Resp> {
        let mut broker = self
            .broker
            .unwrap_or_else(|| ExecutorBroker::new(Arc::new(DefaultExecutorProvider::new())));
        for provider in self.providers {
            broker.register(provider);
        }
        let executors = broker.resolve();
        let scope = self.scope.unwrap_or_default();

        let mut finalizer =
            ResponseProcessor::new(scope.clone(), Arc::new(self.mappers), self.responder);
        if let Some(staging) = self.responder_staging {
            finalizer = finalizer.with_staging(staging);
        }
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ThreadTimeoutScheduler::new()));

        RequestInvoker {
            shared: Arc::new(Shared {
                processor: self.processor,
                scope,
                finalizer,
                executors,
            }),
            broker: Arc::new(broker),
            scheduler,
            default_timeout: self.default_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        executor::{SameThreadExecutor, TaskExecutor},
        stage::Stages,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        results: AtomicUsize,
        failures: AtomicUsize,
    }

    impl InvocationCallback<String> for Counting {
        fn result(&self, _response: &String) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }

        fn failure(&self, _error: &ProcessError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Rejecting;

    impl ExecutorProvider for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn requesting_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
            let executor = SameThreadExecutor::new();
            executor.shutdown();
            Some(Arc::new(executor))
        }
    }

    fn echo() -> RequestInvokerBuilder<String, String> {
        let root = Stages::accepting_chain(|s: String| Ok(s + "!"))
            .build_inflecting(Stages::inflector(|s: String, _ctx| Ok(Some(s))));
        RequestInvoker::builder(Stages::linear_processor(root))
    }

    #[test]
    fn same_thread_invocation_completes_before_returning() {
        let invoker = echo().build();
        let callback = Arc::new(Counting::default());
        let handle = invoker.invoke_with("hi".to_owned(), callback.clone());
        assert_eq!(handle.try_get().and_then(Result::ok).as_deref(), Some("hi!"));
        assert_eq!(callback.results.load(Ordering::SeqCst), 1);
        assert_eq!(callback.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejected_submission_fails_the_handle() {
        let invoker = echo().executor_provider(Arc::new(Rejecting)).build();
        let callback = Arc::new(Counting::default());
        let handle = invoker.invoke_with("hi".to_owned(), callback.clone());
        let error = handle.wait().expect_err("执行器拒绝后句柄必须失败");
        assert!(matches!(error, ProcessError::Processing { .. }));
        assert_eq!(callback.failures.load(Ordering::SeqCst), 1);
        assert_eq!(callback.results.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_inflector_is_reported() {
        let root = Stages::accepting_chain(|s: String| Ok(s)).build::<String>();
        let invoker = RequestInvoker::builder(Stages::linear_processor(root)).build();
        let error = invoker.invoke("x".to_owned()).wait().expect_err("没有 Inflector");
        assert!(matches!(error, ProcessError::InflectorNotFound));
    }

    #[test]
    fn stage_failure_carrying_a_response_is_inflected() {
        let root = Stages::accepting_chain(|_: String| {
            Err(ProcessError::mappable(ResponseError::new("redirect".to_owned())))
        })
        .build::<String>();
        let invoker = RequestInvoker::builder(Stages::linear_processor(root)).build();
        assert_eq!(invoker.invoke("x".to_owned()).wait().ok().as_deref(), Some("redirect"));
    }

    #[test]
    fn panicking_inflector_becomes_processing_failure() {
        let root = Stages::inflecting(Stages::inflector(
            |_: String, _ctx| -> Result<Option<String>, ProcessError> { panic!("boom") },
        ));
        let invoker = RequestInvoker::builder(Stages::linear_processor(root)).build();
        let error = invoker.invoke("x".to_owned()).wait().expect_err("panic 视为失败");
        assert!(matches!(error, ProcessError::Processing { .. }));
    }
}
