//! 异常映射器注册表。
//!
//! 映射器把业务异常转换为响应；注册表按异常的运行时类型查找映射器。

use std::{error::Error as StdError, fmt, sync::Arc};

use crate::error::ProcessError;

/// 把某类异常转换为响应。
///
/// 映射器自身失败时返回的错误会作为调用的最终失败（或触发一次重试，见
/// [`ResponseProcessor`](crate::finalizer::ResponseProcessor)）。
pub trait ExceptionMapper<R>: Send + Sync {
    fn to_response(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
    ) -> Result<R, ProcessError>;
}

impl<R, F> ExceptionMapper<R> for F
where
    F: Fn(&(dyn StdError + Send + Sync + 'static)) -> Result<R, ProcessError> + Send + Sync,
{
    fn to_response(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
    ) -> Result<R, ProcessError> {
        self(error)
    }
}

type Matcher = fn(&(dyn StdError + Send + Sync + 'static)) -> bool;

struct Registration<R> {
    error_type: &'static str,
    matches: Matcher,
    mapper: Arc<dyn ExceptionMapper<R>>,
}

/// 异常映射器注册表。
///
/// - 按注册顺序匹配，首个类型匹配的映射器胜出；
/// - 类型匹配基于 `downcast_ref`，因此只匹配具体类型本身。
pub struct ExceptionMappers<R> {
    registrations: Vec<Registration<R>>,
}

impl<R> Default for ExceptionMappers<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ExceptionMappers<R> {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// 为异常类型 `E` 注册映射器。
    pub fn register<E>(&mut self, mapper: impl ExceptionMapper<R> + 'static) -> &mut Self
    where
        E: StdError + 'static,
    {
        self.registrations.push(Registration {
            error_type: std::any::type_name::<E>(),
            matches: |error| error.is::<E>(),
            mapper: Arc::new(mapper),
        });
        self
    }

    /// 链式注册。
    pub fn with<E>(mut self, mapper: impl ExceptionMapper<R> + 'static) -> Self
    where
        E: StdError + 'static,
    {
        self.register::<E>(mapper);
        self
    }

    /// 查找能处理 `error` 的映射器。
    pub fn find(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
    ) -> Option<Arc<dyn ExceptionMapper<R>>> {
        self.registrations
            .iter()
            .find(|registration| (registration.matches)(error))
            .map(|registration| Arc::clone(&registration.mapper))
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl<R> fmt::Debug for ExceptionMappers<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|registration| registration.error_type))
            .finish()
    }
}
