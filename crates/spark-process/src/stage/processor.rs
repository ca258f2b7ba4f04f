use std::sync::Arc;

use crate::error::ProcessError;

use super::{
    Inflector, NoopStagingContext, Stage, StagingContext, TreeStage, process_linear, process_tree,
};

/// 请求处理器：调用控制器获取 Stage 链的唯一入口。
///
/// 实现者把请求送入自己的 Stage 链（或树），返回终端输出与 Inflector。
/// `Ok((request, None))` 表示链执行完毕但没有找到 Inflector，由调用方决定如何失败。
pub trait RequestProcessor<Req, Resp>: Send + Sync {
    fn process(&self, request: Req) -> Result<(Req, Option<Inflector<Req, Resp>>), ProcessError>;
}

impl<Req, Resp, P> RequestProcessor<Req, Resp> for Arc<P>
where
    P: RequestProcessor<Req, Resp> + ?Sized,
{
    fn process(&self, request: Req) -> Result<(Req, Option<Inflector<Req, Resp>>), ProcessError> {
        (**self).process(request)
    }
}

/// 以线性链为根的处理器。
pub struct LinearProcessor<D, R> {
    root: Arc<dyn Stage<D, R>>,
    staging: Arc<dyn StagingContext<D>>,
}

impl<D: 'static, R> LinearProcessor<D, R> {
    pub fn new(root: Arc<dyn Stage<D, R>>) -> Self {
        Self {
            root,
            staging: Arc::new(NoopStagingContext::new()),
        }
    }

    /// 替换 Stage 观测钩子。
    pub fn with_staging(mut self, staging: Arc<dyn StagingContext<D>>) -> Self {
        self.staging = staging;
        self
    }
}

impl<D, R> RequestProcessor<D, R> for LinearProcessor<D, R> {
    fn process(&self, request: D) -> Result<(D, Option<Inflector<D, R>>), ProcessError> {
        process_linear(&self.root, request, self.staging.as_ref())
    }
}

/// 以树为根的处理器。
pub struct TreeProcessor<D, R> {
    root: Arc<dyn TreeStage<D, R>>,
    staging: Arc<dyn StagingContext<D>>,
}

impl<D: 'static, R> TreeProcessor<D, R> {
    pub fn new(root: Arc<dyn TreeStage<D, R>>) -> Self {
        Self {
            root,
            staging: Arc::new(NoopStagingContext::new()),
        }
    }

    /// 替换 Stage 观测钩子。
    pub fn with_staging(mut self, staging: Arc<dyn StagingContext<D>>) -> Self {
        self.staging = staging;
        self
    }
}

impl<D: Clone, R> RequestProcessor<D, R> for TreeProcessor<D, R> {
    fn process(&self, request: D) -> Result<(D, Option<Inflector<D, R>>), ProcessError> {
        process_tree(&self.root, request, self.staging.as_ref())
    }
}
