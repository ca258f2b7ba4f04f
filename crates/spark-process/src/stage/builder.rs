use std::sync::Arc;

use crate::{error::ProcessError, invocation::InvocationContext};

use super::{
    Continuation, Inflector, LinearProcessor, Next, Responder, ResponderContinuation, Stage,
    TreeContinuation, TreeProcessor, TreeStage,
};

type Transform<D> = Arc<dyn Fn(D) -> Result<D, ProcessError> + Send + Sync>;
type Predicate<D> = Arc<dyn Fn(&D) -> bool + Send + Sync>;

/// Stage 链与树的构建入口。
///
/// # 示例
/// ```
/// use spark_process::{Stage, Stages};
/// use std::sync::Arc;
///
/// let root: Arc<dyn Stage<u32, String>> = Stages::accepting_chain(|n: u32| Ok(n + 1))
///     .to(|n| Ok(n * 2))
///     .build_inflecting(Stages::inflector(|n: u32, _ctx| Ok(Some(n.to_string()))));
/// assert!(!root.name().is_empty());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Stages;

impl Stages {
    /// 以变换函数开始一条线性链。
    pub fn accepting_chain<D, F>(transform: F) -> ChainBuilder<D>
    where
        D: 'static,
        F: Fn(D) -> Result<D, ProcessError> + Send + Sync + 'static,
    {
        ChainBuilder {
            transforms: Vec::new(),
        }
        .to(transform)
    }

    /// 只携带 Inflector 的终端 Stage，不变换数据。
    pub fn inflecting<D, R>(inflector: Inflector<D, R>) -> Arc<dyn Stage<D, R>>
    where
        D: 'static,
        R: 'static,
    {
        Arc::new(InflectingStage {
            name: "inflecting".to_owned(),
            inflector,
        })
    }

    /// 以变换函数开始一个树节点。
    pub fn tree<D, R, F>(transform: F) -> TreeBuilder<D, R>
    where
        D: 'static,
        F: Fn(D) -> Result<D, ProcessError> + Send + Sync + 'static,
    {
        TreeBuilder {
            name: "tree-node".to_owned(),
            transform: Arc::new(transform),
            guard: None,
            children: Vec::new(),
        }
    }

    /// 只携带 Inflector 的树叶。
    pub fn tree_leaf<D, R>(inflector: Inflector<D, R>) -> Arc<dyn TreeStage<D, R>>
    where
        D: 'static,
        R: 'static,
    {
        Arc::new(InflectingStage {
            name: "tree-leaf".to_owned(),
            inflector,
        })
    }

    /// 以变换函数开始一条响应侧链。
    pub fn responding_chain<R, F>(transform: F) -> ResponderChainBuilder<R>
    where
        R: 'static,
        F: Fn(R) -> Result<R, ProcessError> + Send + Sync + 'static,
    {
        ResponderChainBuilder {
            transforms: Vec::new(),
        }
        .to(transform)
    }

    /// 把闭包包装为 [`Inflector`]。
    pub fn inflector<D, R, F>(f: F) -> Inflector<D, R>
    where
        F: Fn(D, &InvocationContext<R>) -> Result<Option<R>, ProcessError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    /// 以线性链为根的请求处理器。
    pub fn linear_processor<D: 'static, R>(root: Arc<dyn Stage<D, R>>) -> LinearProcessor<D, R> {
        LinearProcessor::new(root)
    }

    /// 以树为根的请求处理器。
    pub fn tree_processor<D: 'static, R>(root: Arc<dyn TreeStage<D, R>>) -> TreeProcessor<D, R> {
        TreeProcessor::new(root)
    }
}

/// 线性链构建器。
pub struct ChainBuilder<D> {
    transforms: Vec<(String, Transform<D>)>,
}

impl<D: 'static> ChainBuilder<D> {
    /// 追加一个变换 Stage。
    pub fn to<F>(mut self, transform: F) -> Self
    where
        F: Fn(D) -> Result<D, ProcessError> + Send + Sync + 'static,
    {
        let name = format!("accepting#{}", self.transforms.len());
        self.transforms.push((name, Arc::new(transform)));
        self
    }

    /// 为最近追加的 Stage 命名。
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Some((current, _)) = self.transforms.last_mut() {
            *current = name.into();
        }
        self
    }

    /// 以无 Inflector 的终止结束链。
    pub fn build<R: 'static>(self) -> Arc<dyn Stage<D, R>> {
        self.link(Next::Terminal(None))
    }

    /// 把链接到既有的 `tail` 之前。
    pub fn build_to<R: 'static>(self, tail: Arc<dyn Stage<D, R>>) -> Arc<dyn Stage<D, R>> {
        self.link(Next::Stage(tail))
    }

    /// 以携带 `inflector` 的终止结束链。
    pub fn build_inflecting<R: 'static>(self, inflector: Inflector<D, R>) -> Arc<dyn Stage<D, R>> {
        self.link(Next::Terminal(Some(inflector)))
    }

    fn link<R: 'static>(self, tail: Next<D, R>) -> Arc<dyn Stage<D, R>> {
        let mut next = tail;
        let mut head = None;
        for (name, transform) in self.transforms.into_iter().rev() {
            let stage: Arc<dyn Stage<D, R>> = Arc::new(TransformStage {
                name,
                transform,
                next,
            });
            next = Next::Stage(Arc::clone(&stage));
            head = Some(stage);
        }
        // 空链退化为透传 Stage。
        head.unwrap_or_else(|| {
            Arc::new(TransformStage {
                name: "identity".to_owned(),
                transform: Arc::new(Ok::<D, ProcessError>),
                next,
            })
        })
    }
}

struct TransformStage<D, R> {
    name: String,
    transform: Transform<D>,
    next: Next<D, R>,
}

impl<D, R> Stage<D, R> for TransformStage<D, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, data: D) -> Result<Continuation<D, R>, ProcessError> {
        Ok(Continuation {
            result: (self.transform)(data)?,
            next: self.next.clone(),
        })
    }
}

struct InflectingStage<D, R> {
    name: String,
    inflector: Inflector<D, R>,
}

impl<D, R> Stage<D, R> for InflectingStage<D, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, data: D) -> Result<Continuation<D, R>, ProcessError> {
        Ok(Continuation::inflect(data, Arc::clone(&self.inflector)))
    }
}

impl<D, R> TreeStage<D, R> for InflectingStage<D, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, data: D) -> Result<TreeContinuation<D, R>, ProcessError> {
        Ok(TreeContinuation::inflect(data, Arc::clone(&self.inflector)))
    }
}

/// 树节点构建器。
pub struct TreeBuilder<D, R> {
    name: String,
    transform: Transform<D>,
    guard: Option<Predicate<D>>,
    children: Vec<Arc<dyn TreeStage<D, R>>>,
}

impl<D: 'static, R: 'static> TreeBuilder<D, R> {
    /// 追加子节点；子节点按追加顺序尝试。
    pub fn child(mut self, child: Arc<dyn TreeStage<D, R>>) -> Self {
        self.children.push(child);
        self
    }

    /// 仅当输入满足 `predicate` 时进入本节点，否则本分支走到尽头。
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&D) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(predicate));
        self
    }

    /// 为节点命名。
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn build(self) -> Arc<dyn TreeStage<D, R>> {
        Arc::new(TransformNode {
            name: self.name,
            transform: self.transform,
            guard: self.guard,
            children: self.children,
        })
    }
}

struct TransformNode<D, R> {
    name: String,
    transform: Transform<D>,
    guard: Option<Predicate<D>>,
    children: Vec<Arc<dyn TreeStage<D, R>>>,
}

impl<D, R> TreeStage<D, R> for TransformNode<D, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, data: D) -> Result<TreeContinuation<D, R>, ProcessError> {
        if let Some(guard) = &self.guard
            && !guard(&data)
        {
            return Ok(TreeContinuation::dead_end(data));
        }
        Ok(TreeContinuation::children(
            (self.transform)(data)?,
            self.children.clone(),
        ))
    }
}

/// 响应侧链构建器。
pub struct ResponderChainBuilder<R> {
    transforms: Vec<(String, Transform<R>)>,
}

impl<R: 'static> ResponderChainBuilder<R> {
    /// 追加一个变换 Responder。
    pub fn to<F>(mut self, transform: F) -> Self
    where
        F: Fn(R) -> Result<R, ProcessError> + Send + Sync + 'static,
    {
        let name = format!("responding#{}", self.transforms.len());
        self.transforms.push((name, Arc::new(transform)));
        self
    }

    /// 为最近追加的 Responder 命名。
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Some((current, _)) = self.transforms.last_mut() {
            *current = name.into();
        }
        self
    }

    pub fn build(self) -> Arc<dyn Responder<R>> {
        let mut next: Option<Arc<dyn Responder<R>>> = None;
        for (name, transform) in self.transforms.into_iter().rev() {
            let responder: Arc<dyn Responder<R>> = Arc::new(TransformResponder {
                name,
                transform,
                next,
            });
            next = Some(responder);
        }
        next.unwrap_or_else(|| {
            Arc::new(TransformResponder {
                name: "identity".to_owned(),
                transform: Arc::new(Ok::<R, ProcessError>),
                next: None,
            })
        })
    }
}

pub(crate) struct TransformResponder<R> {
    name: String,
    transform: Transform<R>,
    next: Option<Arc<dyn Responder<R>>>,
}

impl<R> TransformResponder<R> {
    pub(crate) fn new(
        name: impl Into<String>,
        transform: Transform<R>,
        next: Option<Arc<dyn Responder<R>>>,
    ) -> Self {
        Self {
            name: name.into(),
            transform,
            next,
        }
    }
}

impl<R> Responder<R> for TransformResponder<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, response: R) -> Result<ResponderContinuation<R>, ProcessError> {
        Ok(ResponderContinuation {
            result: (self.transform)(response)?,
            next: self.next.clone(),
        })
    }
}

pub(crate) type ResponseTransform<R> = Transform<R>;
