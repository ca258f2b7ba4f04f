//! 响应终结器：把 Inflector 的结果变成调用的最终结果。
//!
//! # 设计综述（Why）
//! - Inflector 的结果可能在任意线程上出现（同步返回，或挂起后被外部恢复），
//!   异常映射与 Responder 链却需要在请求作用域内执行；
//! - 终结器作为“Inflector 结果句柄”的监听器运行在 responding 执行器上，
//!   负责重新进入作用域、映射异常、执行 Responder 链并且只发布一次最终结果。
//!
//! # 契约（What）
//! - 只有 [`ProcessError::Mappable`] 会被尝试映射为响应；
//! - Responder 链失败时，以该失败重新走一遍“映射 + Responder”，至多
//!   [`MAX_FINALIZE_ATTEMPTS`] 轮，之后把失败作为最终结果；
//! - 最终结果写入调用句柄恰好一次，`result`/`failure` 回调合计恰好一次。

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    error::{ProcessError, ResponseError},
    invocation::{InvocationContext, notify},
    mapper::ExceptionMappers,
    observability::targets,
    respond::RespondingContext,
    scope::RequestScope,
    stage::{NoopStagingContext, Responder, StagingContext, run_responders},
};

/// 映射 + Responder 链的最大轮数。
pub const MAX_FINALIZE_ATTEMPTS: usize = 2;

/// 响应终结器。
pub struct ResponseProcessor<Resp> {
    scope: RequestScope,
    mappers: Arc<ExceptionMappers<Resp>>,
    responder: Option<Arc<dyn Responder<Resp>>>,
    staging: Arc<dyn StagingContext<Resp>>,
}

impl<Resp> ResponseProcessor<Resp>
where
    Resp: Clone + Send + Sync + 'static,
{
    pub fn new(
        scope: RequestScope,
        mappers: Arc<ExceptionMappers<Resp>>,
        responder: Option<Arc<dyn Responder<Resp>>>,
    ) -> Self {
        Self {
            scope,
            mappers,
            responder,
            staging: Arc::new(NoopStagingContext::new()),
        }
    }

    /// 替换 Responder 链的观测钩子。
    pub fn with_staging(mut self, staging: Arc<dyn StagingContext<Resp>>) -> Self {
        self.staging = staging;
        self
    }

    /// 把可映射异常转换为响应；其余错误原样返回。
    ///
    /// 原因为 [`ResponseError`] 时直接取用其中的响应，否则查询映射器注册表。
    pub fn map_error(&self, error: ProcessError) -> Result<Resp, ProcessError> {
        let ProcessError::Mappable(mappable) = &error else {
            return Err(error);
        };
        let cause = mappable.cause();
        if let Some(carried) = cause.downcast_ref::<ResponseError<Resp>>() {
            trace!(target: targets::FINALIZER, "using response carried by the failure");
            return Ok(carried.response().clone());
        }
        match self.mappers.find(cause.as_ref()) {
            Some(mapper) => {
                trace!(target: targets::FINALIZER, cause = %cause, "mapping failure to response");
                mapper.to_response(cause.as_ref())
            }
            None => Err(error),
        }
    }

    /// 对 Inflector 的结果执行“映射 + Responder 链”，必要时再试一轮。
    ///
    /// 需要在请求作用域内调用，以便取到请求级 Responder 栈。
    pub fn finish(&self, outcome: Result<Resp, ProcessError>) -> Result<Resp, ProcessError> {
        let mut outcome = outcome;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = match outcome {
                Ok(response) => response,
                Err(error) => self.map_error(error)?,
            };
            match self.respond(response) {
                Ok(response) => return Ok(response),
                Err(error) if attempt < MAX_FINALIZE_ATTEMPTS => {
                    debug!(
                        target: targets::FINALIZER,
                        attempt,
                        %error,
                        "responder chain failed; mapping the failure and retrying"
                    );
                    outcome = Err(error);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// 作为 Inflector 结果的监听器运行：进入作用域、终结并发布结果。
    pub(crate) fn finalize(&self, context: &InvocationContext<Resp>) {
        let snapshot = context.pop_request_scope();
        if context.inflected().is_cancelled() || context.is_cancelled() {
            context.response().complete_cancelled();
            drop(snapshot);
            trace!(
                target: targets::FINALIZER,
                invocation = context.id(),
                "invocation cancelled; nothing to finalize"
            );
            return;
        }

        let outcome = context
            .inflected()
            .try_get()
            .unwrap_or_else(|| Err(ProcessError::processing("inflected result is not ready")));

        let active = self.scope.suspend_current();
        let finalized = match (snapshot, active) {
            (Some(snapshot), Some(active)) if snapshot.id() == active.id() => {
                drop((snapshot, active));
                self.finish(outcome)
            }
            (None, Some(active)) => {
                drop(active);
                self.finish(outcome)
            }
            (snapshot, active) => {
                drop(active);
                self.scope
                    .run_in_scope(snapshot, || self.finish(outcome))
                    .and_then(|finalized| finalized)
            }
        };
        publish(context, finalized);
    }

    fn respond(&self, response: Resp) -> Result<Resp, ProcessError> {
        let request_level = self
            .scope
            .suspend_current()
            .and_then(|instance| RespondingContext::<Resp>::find(&instance));
        let chain = match request_level {
            Some(responding) => responding.create_responder_chain(self.responder.clone()),
            None => self.responder.clone(),
        };
        match chain {
            Some(chain) => run_responders(&chain, response, self.staging.as_ref()),
            None => Ok(response),
        }
    }
}

fn publish<Resp>(context: &InvocationContext<Resp>, finalized: Result<Resp, ProcessError>)
where
    Resp: Clone + Send + Sync + 'static,
{
    if context.response().is_done() {
        debug!(
            target: targets::FINALIZER,
            invocation = context.id(),
            "final result already published; dropping late outcome"
        );
        return;
    }
    let callback = Arc::clone(context.callback());
    match finalized {
        Ok(response) => {
            notify("result", || callback.result(&response));
            context.response().set(response);
        }
        Err(error) => {
            notify("failure", || callback.failure(&error));
            context.response().set_error(error);
        }
    }
    trace!(
        target: targets::FINALIZER,
        invocation = context.id(),
        "final result published"
    );
}
