use std::sync::Arc;

use tracing::trace;

use crate::{error::ProcessError, observability::targets};

use super::{
    Continuation, Inflector, Next, Responder, ResponderContinuation, Stage, StagingContext,
    TreeContinuation, TreeNext, TreeStage,
};

/// 依次执行线性链，直至某个 Stage 终止。
///
/// 返回终端 Stage 的输出数据以及它携带的 Inflector（若有）。
pub fn process_linear<D, R>(
    root: &Arc<dyn Stage<D, R>>,
    data: D,
    staging: &dyn StagingContext<D>,
) -> Result<(D, Option<Inflector<D, R>>), ProcessError> {
    let mut current = Arc::clone(root);
    let mut data = data;
    loop {
        staging.before_stage(current.name(), &data);
        let Continuation { result, next } = current.apply(data)?;
        staging.after_stage(current.name(), &result);
        match next {
            Next::Stage(stage) => {
                trace!(
                    target: targets::STAGE,
                    from = current.name(),
                    to = stage.name(),
                    "continuing linear chain"
                );
                data = result;
                current = stage;
            }
            Next::Terminal(inflector) => return Ok((result, inflector)),
        }
    }
}

/// 深度优先、从左到右遍历树，返回首个 Inflector 及产生它的节点输出。
///
/// 每个子节点得到父节点输出的一份拷贝；整棵树都没有 Inflector 时返回原始输入与 `None`。
pub fn process_tree<D, R>(
    root: &Arc<dyn TreeStage<D, R>>,
    data: D,
    staging: &dyn StagingContext<D>,
) -> Result<(D, Option<Inflector<D, R>>), ProcessError>
where
    D: Clone,
{
    match visit(root, data.clone(), staging)? {
        Some((result, inflector)) => Ok((result, Some(inflector))),
        None => Ok((data, None)),
    }
}

fn visit<D, R>(
    node: &Arc<dyn TreeStage<D, R>>,
    data: D,
    staging: &dyn StagingContext<D>,
) -> Result<Option<(D, Inflector<D, R>)>, ProcessError>
where
    D: Clone,
{
    staging.before_stage(node.name(), &data);
    let TreeContinuation { result, next } = node.apply(data)?;
    staging.after_stage(node.name(), &result);
    match next {
        TreeNext::Inflector(inflector) => Ok(Some((result, inflector))),
        TreeNext::Children(children) => {
            for child in &children {
                if let Some(found) = visit(child, result.clone(), staging)? {
                    return Ok(Some(found));
                }
            }
            Ok(None)
        }
    }
}

/// 依次执行响应侧链，返回最终响应。
pub fn run_responders<R>(
    root: &Arc<dyn Responder<R>>,
    response: R,
    staging: &dyn StagingContext<R>,
) -> Result<R, ProcessError> {
    let mut current = Arc::clone(root);
    let mut response = response;
    loop {
        staging.before_stage(current.name(), &response);
        let ResponderContinuation { result, next } = current.apply(response)?;
        staging.after_stage(current.name(), &result);
        match next {
            Some(responder) => {
                response = result;
                current = responder;
            }
            None => return Ok(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{NoopStagingContext, Stages, TrackingStagingContext};

    #[test]
    fn linear_chain_without_inflector_returns_terminal_data() {
        let root = Stages::accepting_chain(|n: u32| Ok(n + 1))
            .to(|n| Ok(n * 10))
            .build::<()>();
        let (data, inflector) =
            process_linear(&root, 1, &NoopStagingContext::new()).expect("链执行成功");
        assert_eq!(data, 20);
        assert!(inflector.is_none());
    }

    #[test]
    fn stage_error_aborts_traversal() {
        let staging = TrackingStagingContext::new();
        let root = Stages::accepting_chain(|n: u32| Ok(n + 1))
            .named("first")
            .to(|_| Err(ProcessError::processing("stage failed")))
            .named("second")
            .to(|n| Ok(n + 100))
            .named("third")
            .build::<()>();
        let err = process_linear(&root, 0, &staging)
            .err()
            .expect("第二个 Stage 失败后必须中止");
        assert!(matches!(err, ProcessError::Processing { .. }));
        assert_eq!(staging.visited(), vec!["first", "second"]);
        assert_eq!(staging.last_stage().as_deref(), Some("first"));
        assert_eq!(staging.snapshot(), Some(1));
    }

    #[test]
    fn exhausted_tree_yields_original_data() {
        let root: Arc<dyn TreeStage<String, ()>> = Stages::tree(|s: String| Ok(s + "/a"))
            .child(Stages::tree(|s: String| Ok(s + "/b")).build())
            .build();
        let (data, inflector) =
            process_tree(&root, "root".to_owned(), &NoopStagingContext::new()).expect("遍历成功");
        assert_eq!(data, "root");
        assert!(inflector.is_none());
    }
}
