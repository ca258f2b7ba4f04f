//! 请求级 Responder 栈。
//!
//! Stage 或 Inflector 在处理请求时可以登记“响应出来之后再做的事”，例如补充响应头；
//! 这些登记项随请求作用域走，在响应终结器中先于调用控制器级别的 Responder 链执行。

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    error::ProcessError,
    scope::{RequestScope, ScopeInstance, ScopeKey},
    stage::{Responder, builder::ResponseTransform, builder::TransformResponder},
};

/// 请求级 Responder 栈。
///
/// # 契约说明（What）
/// - 后登记者先执行（LIFO）；
/// - 每个请求作用域至多一个实例，以 `ScopeKey::of_type` 定位。
pub struct RespondingContext<R> {
    stack: Mutex<Vec<(String, ResponseTransform<R>)>>,
}

impl<R: Send + Sync + 'static> RespondingContext<R> {
    fn key() -> ScopeKey<RespondingContext<R>> {
        ScopeKey::of_type("responding-context")
    }

    fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
        }
    }

    /// 当前线程作用域中的 Responder 栈，不存在时创建。
    pub fn current(scope: &RequestScope) -> Result<Arc<Self>, ProcessError> {
        let instance = scope.current()?;
        Ok(Self::in_instance(&instance))
    }

    /// 指定作用域实例中的 Responder 栈，不存在时创建。
    pub fn in_instance(instance: &ScopeInstance) -> Arc<Self> {
        instance.get_or_insert_with(&Self::key(), Self::new)
    }

    /// 指定作用域实例中已存在的 Responder 栈。
    pub(crate) fn find(instance: &ScopeInstance) -> Option<Arc<Self>> {
        instance.get(&Self::key())
    }

    /// 登记一个响应变换。
    pub fn push<F>(&self, transform: F)
    where
        F: Fn(R) -> Result<R, ProcessError> + Send + Sync + 'static,
    {
        let mut stack = self.stack.lock();
        let name = format!("request-responder#{}", stack.len());
        stack.push((name, Arc::new(transform)));
    }

    /// 已登记数量。
    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }

    /// 把登记项串成 Responder 链并接到 `tail` 之前；没有任何登记且无 `tail` 时返回 `None`。
    pub fn create_responder_chain(
        &self,
        tail: Option<Arc<dyn Responder<R>>>,
    ) -> Option<Arc<dyn Responder<R>>> {
        let stack = self.stack.lock();
        stack.iter().fold(tail, |next, (name, transform)| {
            let responder: Arc<dyn Responder<R>> = Arc::new(TransformResponder::new(
                name.clone(),
                Arc::clone(transform),
                next,
            ));
            Some(responder)
        })
    }
}

impl<R> fmt::Debug for RespondingContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespondingContext")
            .field("registered", &self.stack.lock().len())
            .finish()
    }
}
