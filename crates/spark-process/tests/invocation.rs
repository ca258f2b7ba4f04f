//! 调用控制器端到端测试。
//!
//! # 覆盖范围 (What)
//! - 未挂起的调用：Inflector 输出经 Responder 链恰好发布一次；
//! - 挂起后在其他线程恢复、重复恢复、恢复前取消；
//! - 挂起超时以默认响应恢复；
//! - 线程池执行器与 `.await` 路径；
//! - 执行器回收后的提交以处理失败结束；
//! - 响应侧执行器拒绝终结器时恰好一次失败；
//! - 共享执行器的供给方被部分覆盖后仍可正常调用。
//!
//! # 手法 (How)
//! - Inflector 挂起后通过 `mpsc` 把 [`InvocationContext`] 交给测试线程，模拟“业务在别处完成后恢复”；
//! - 回调计数统一由 `support::Recorder` 记录。

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use futures::executor::block_on;
use spark_process::{
    DefaultExecutorProvider, ExecutorBroker, ExecutorProvider, InvocationContext, InvocationState,
    ProcessError, ProcessingConfig, RejectedExecution, RequestInvoker, SameThreadExecutor, Stages,
    TaskExecutor,
};
use support::Recorder;

const WAIT: Duration = Duration::from_secs(5);

fn bracket() -> Arc<dyn spark_process::Responder<String>> {
    Stages::responding_chain(|s: String| Ok(format!("<{s}>"))).build()
}

/// Inflector 挂起调用并把上下文交给测试线程。
fn parking_invoker(
    parked: mpsc::Sender<InvocationContext<String>>,
) -> RequestInvoker<String, String> {
    let root = Stages::inflecting(Stages::inflector(
        move |_: String, ctx: &InvocationContext<String>| {
            ctx.suspend()?;
            let _ = parked.send(ctx.clone());
            Ok(None)
        },
    ));
    RequestInvoker::builder(Stages::linear_processor(root))
        .responder(bracket())
        .build()
}

#[test]
fn unsuspended_invocation_runs_responders_exactly_once() {
    let responder_runs = Arc::new(AtomicUsize::new(0));
    let responder = {
        let runs = Arc::clone(&responder_runs);
        Stages::responding_chain(move |s: String| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(format!("<{s}>"))
        })
        .build()
    };
    let root = Stages::accepting_chain(|s: String| Ok(s.to_uppercase()))
        .build_inflecting(Stages::inflector(|s: String, _ctx| Ok(Some(s))));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .responder(responder)
        .build();

    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("ping".to_owned(), callback.clone());

    assert_eq!(handle.wait().expect("调用应成功"), "<PING>");
    assert_eq!(responder_runs.load(Ordering::SeqCst), 1, "Responder 链只执行一次");
    assert_eq!(callback.results(), 1);
    assert_eq!(callback.failures(), 0);
    assert_eq!(callback.suspended(), 0);
}

#[test]
fn suspended_invocation_resumes_from_another_thread() {
    let (tx, rx) = mpsc::channel();
    let invoker = parking_invoker(tx);
    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());

    let ctx = rx.recv_timeout(WAIT).expect("Inflector 应交出上下文");
    assert_eq!(ctx.state(), InvocationState::Suspended);
    assert!(!handle.is_done(), "挂起期间结果未就绪");
    assert_eq!(callback.suspended(), 1);

    thread::spawn(move || ctx.resume("late".to_owned()))
        .join()
        .expect("恢复线程不应 panic")
        .expect("Suspended 状态可恢复");

    assert_eq!(handle.wait().expect("恢复后应成功"), "<late>");
    assert_eq!(callback.resumed(), 1);
    assert_eq!(callback.results(), 1);
}

#[test]
fn second_resume_is_rejected_and_result_fires_once() {
    let (tx, rx) = mpsc::channel();
    let invoker = parking_invoker(tx);
    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());
    let ctx = rx.recv_timeout(WAIT).expect("Inflector 应交出上下文");

    ctx.resume("first".to_owned()).expect("首次恢复成功");
    let error = ctx
        .resume("second".to_owned())
        .expect_err("第二次恢复必须失败");
    assert!(error.is_illegal_state());

    assert_eq!(handle.wait().expect("首次恢复的值生效"), "<first>");
    assert_eq!(callback.results(), 1);
}

#[test]
fn cancel_before_resume_cancels_the_handle() {
    let (tx, rx) = mpsc::channel();
    let invoker = parking_invoker(tx);
    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());
    let ctx = rx.recv_timeout(WAIT).expect("Inflector 应交出上下文");
    let token = ctx.cancellation();

    assert!(handle.cancel(), "Suspended 状态可取消");
    assert!(handle.is_cancelled());
    assert!(token.is_cancelled(), "协作式取消令牌被触发");
    assert!(ctx.is_cancelled());
    assert!(matches!(handle.wait(), Err(ProcessError::Cancelled)));
    assert!(ctx.resume("late".to_owned()).is_err(), "取消后不可恢复");
    assert!(!handle.cancel(), "重复取消返回 false");

    assert_eq!(callback.cancelled(), 1);
    assert_eq!(callback.results(), 0);
    assert_eq!(callback.failures(), 0);
}

#[test]
fn suspend_timeout_from_config_resumes_with_default_response() {
    let config = ProcessingConfig::from_toml_str("[suspend]\ndefault_timeout_ms = 20\n")
        .expect("配置合法");
    let root = Stages::inflecting(Stages::inflector(
        |_: String, ctx: &InvocationContext<String>| {
            ctx.set_default_response("fallback".to_owned());
            ctx.suspend()?;
            Ok(None)
        },
    ));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .config(&config)
        .expect("配置可应用")
        .responder(bracket())
        .build();

    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());
    let outcome = handle.wait_timeout(WAIT).expect("超时后应以默认响应恢复");
    assert_eq!(outcome.expect("默认响应为成功值"), "<fallback>");
    assert_eq!(callback.results(), 1);
}

#[test]
fn suspend_timeout_without_default_response_stays_pending() {
    let (tx, rx) = mpsc::channel();
    let root = Stages::inflecting(Stages::inflector(
        move |_: String, ctx: &InvocationContext<String>| {
            ctx.suspend_for(Duration::from_millis(10))?;
            let _ = tx.send(ctx.clone());
            Ok(None)
        },
    ));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root)).build();
    let handle = invoker.invoke("req".to_owned());
    let ctx = rx.recv_timeout(WAIT).expect("Inflector 应交出上下文");

    assert!(
        handle.wait_timeout(Duration::from_millis(80)).is_none(),
        "没有默认响应时超时不结束调用"
    );
    assert_eq!(ctx.state(), InvocationState::Suspended);
    ctx.resume("eventually".to_owned()).expect("仍可恢复");
    assert_eq!(handle.wait().expect("恢复后成功"), "eventually");
}

#[test]
fn set_suspend_timeout_notifies_and_rearms() {
    let (tx, rx) = mpsc::channel();
    let root = Stages::inflecting(Stages::inflector(
        move |_: String, ctx: &InvocationContext<String>| {
            ctx.set_default_response("expired".to_owned());
            ctx.suspend()?;
            let _ = tx.send(ctx.clone());
            Ok(None)
        },
    ));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root)).build();
    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());
    let ctx = rx.recv_timeout(WAIT).expect("Inflector 应交出上下文");

    assert_eq!(ctx.suspend_timeout(), None);
    ctx.set_suspend_timeout(Some(Duration::from_millis(10)))
        .expect("挂起状态下可修改超时");
    assert_eq!(callback.timeout_changes(), 1);
    assert_eq!(
        handle.wait_timeout(WAIT).and_then(Result::ok).as_deref(),
        Some("expired")
    );
    assert!(
        ctx.set_suspend_timeout(None)
            .expect_err("终态下不可修改超时")
            .is_illegal_state()
    );
}

#[test]
fn pool_executors_from_config_run_off_the_caller_thread() {
    let config = ProcessingConfig::from_toml_str(
        r#"
        [requesting]
        kind = "pool"
        pool_size = 2
        thread_name_prefix = "it-requesting-"
        "#,
    )
    .expect("配置合法");
    let root = Stages::inflecting(Stages::inflector(|_: String, _ctx| {
        Ok(Some(
            thread::current().name().unwrap_or_default().to_owned(),
        ))
    }));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .config(&config)
        .expect("配置可应用")
        .build();

    let thread_name = block_on(invoker.invoke("req".to_owned())).expect("调用应成功");
    assert!(
        thread_name.starts_with("it-requesting-"),
        "请求任务应运行在线程池上，实际为 {thread_name}"
    );
    invoker.shutdown();
}

#[test]
fn shut_down_invoker_rejects_new_invocations() {
    let root = Stages::inflecting(Stages::inflector(|s: String, _ctx| Ok(Some(s))));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root)).build();
    invoker.shutdown();

    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());
    assert!(matches!(
        handle.wait(),
        Err(ProcessError::Processing { .. })
    ));
    assert_eq!(callback.failures(), 1);
    assert!(matches!(
        callback.last_failure(),
        Some(ProcessError::Processing { .. })
    ));
}

#[test]
fn inflector_returning_nothing_while_running_fails() {
    let root = Stages::inflecting(Stages::inflector(|_: String, _ctx| Ok(None)));
    let invoker: RequestInvoker<String, String> =
        RequestInvoker::builder(Stages::linear_processor(root)).build();
    let callback = Arc::new(Recorder::default());
    let handle = invoker.invoke_with("req".to_owned(), callback.clone());
    assert!(matches!(handle.wait(), Err(ProcessError::NoResponse)));
    assert_eq!(callback.failures(), 1);
}

/// 只供给请求侧执行器的供给方。
struct RequestingOnly(Arc<dyn TaskExecutor>);

impl ExecutorProvider for RequestingOnly {
    fn name(&self) -> &str {
        "requesting-only"
    }

    fn requesting_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::clone(&self.0))
    }
}

/// 响应侧执行器已关闭的供给方。
struct ClosedResponding(Arc<dyn TaskExecutor>);

impl ClosedResponding {
    fn new() -> Self {
        let executor = SameThreadExecutor::new();
        executor.shutdown();
        Self(Arc::new(executor))
    }
}

impl ExecutorProvider for ClosedResponding {
    fn name(&self) -> &str {
        "closed-responding"
    }

    fn responding_executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::clone(&self.0))
    }
}

#[test]
fn rejected_finalizer_fails_the_invocation_once() {
    let responder_runs = Arc::new(AtomicUsize::new(0));
    let responder = {
        let runs = Arc::clone(&responder_runs);
        Stages::responding_chain(move |s: String| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(s)
        })
        .build()
    };
    let root = Stages::inflecting(Stages::inflector(|s: String, _ctx| Ok(Some(s))));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .responder(responder)
        .executor_provider(Arc::new(ClosedResponding::new()))
        .build();

    let callback = Arc::new(Recorder::default());
    let error = invoker
        .invoke_with("req".to_owned(), callback.clone())
        .wait()
        .expect_err("响应侧拒绝后调用失败");
    let ProcessError::Processing {
        source: Some(source),
        ..
    } = &error
    else {
        panic!("期望携带拒绝原因的 Processing，实际为 {error:?}");
    };
    let rejected = source
        .downcast_ref::<RejectedExecution>()
        .expect("底层原因为执行器拒绝");
    assert_eq!(rejected.executor(), "same-thread");
    assert_eq!(callback.failures(), 1);
    assert_eq!(callback.results(), 0);
    assert_eq!(responder_runs.load(Ordering::SeqCst), 0, "终结器未运行");
}

#[test]
fn provider_sharing_one_executor_keeps_serving_after_partial_override() {
    let broker = ExecutorBroker::new(Arc::new(DefaultExecutorProvider::new()))
        .with(Arc::new(RequestingOnly(Arc::new(SameThreadExecutor::new()))))
        .with(Arc::new(DefaultExecutorProvider::new()));
    let root = Stages::inflecting(Stages::inflector(|s: String, _ctx| Ok(Some(s))));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .broker(broker)
        .build();

    assert_eq!(
        invoker.invoke("hi".to_owned()).wait().expect("被覆盖的角色不应关闭共享执行器"),
        "hi"
    );
}
