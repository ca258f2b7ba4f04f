//! 请求作用域在线程之间的移交。
//!
//! # 覆盖范围 (What)
//! - 已在作用域内发起的调用沿用当前实例；
//! - 挂起后在其他线程恢复时，终结器重新激活同一实例，请求级 Responder 与作用域值仍然可见；
//! - 作用域存储只在最后一份引用释放后清空；
//! - 作用域管理器关闭后，调用以 `ScopeShutDown` 失败。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
};
use std::{thread, time::Duration};

use spark_process::{
    InvocationContext, ProcessError, RequestInvoker, RequestScope, RespondingContext, ScopeKey,
    Stages,
};

const WAIT: Duration = Duration::from_secs(5);

struct RequestId(&'static str);

fn request_id_key() -> ScopeKey<RequestId> {
    ScopeKey::of_type("request-id")
}

/// 析构时置位的作用域值。
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn invocation_inside_an_active_scope_reuses_the_instance() {
    let scope = RequestScope::new();
    let root = {
        let scope = scope.clone();
        Stages::inflecting(Stages::inflector(move |_: (), _ctx| {
            let instance = scope.current()?;
            Ok(instance.get(&request_id_key()).map(|id| id.0.to_owned()))
        }))
    };
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .scope(scope.clone())
        .build();

    let response = scope
        .run_in_scope(None, || {
            let instance = scope.current().expect("作用域内可取当前实例");
            instance
                .put(&request_id_key(), RequestId("req-42"))
                .expect("首次写入成功");
            invoker.invoke(()).wait()
        })
        .expect("作用域可用")
        .expect("调用应成功");
    assert_eq!(response, "req-42");
}

#[test]
fn resumed_invocation_sees_its_scope_on_another_thread() {
    let scope = RequestScope::new();
    let dropped = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<InvocationContext<String>>();
    let root = {
        let scope = scope.clone();
        let dropped = Arc::clone(&dropped);
        Stages::accepting_chain(move |path: String| {
            let instance = scope.current()?;
            instance.put(&request_id_key(), RequestId("req-7"))?;
            instance.put(&ScopeKey::new("drop-flag"), DropFlag(Arc::clone(&dropped)))?;
            let responding = RespondingContext::<String>::current(&scope)?;
            let reader = scope.clone();
            responding.push(move |body| {
                let id = reader
                    .current()?
                    .get(&request_id_key())
                    .map(|id| id.0)
                    .unwrap_or("missing");
                Ok(format!("{body} ({id})"))
            });
            Ok(path)
        })
        .build_inflecting(Stages::inflector(
            move |_: String, ctx: &InvocationContext<String>| {
                ctx.suspend()?;
                let _ = tx.send(ctx.clone());
                Ok(None)
            },
        ))
    };
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .scope(scope.clone())
        .build();

    let handle = invoker.invoke("/orders".to_owned());
    let ctx = rx.recv_timeout(WAIT).expect("Inflector 应交出上下文");
    assert!(!scope.is_active(), "调用线程已离开作用域");
    assert!(
        !dropped.load(Ordering::SeqCst),
        "挂起期间快照仍持有引用，存储不得清空"
    );

    thread::spawn(move || ctx.resume("done".to_owned()))
        .join()
        .expect("恢复线程不应 panic")
        .expect("Suspended 状态可恢复");

    assert_eq!(handle.wait().expect("恢复后应成功"), "done (req-7)");
    assert!(dropped.load(Ordering::SeqCst), "最后一份引用释放后存储被清空");
}

#[test]
fn shut_down_scope_fails_the_invocation() {
    let scope = RequestScope::new();
    let root = Stages::inflecting(Stages::inflector(|s: String, _ctx| Ok(Some(s))));
    let invoker = RequestInvoker::builder(Stages::linear_processor(root))
        .scope(scope.clone())
        .build();
    scope.shutdown();

    assert!(matches!(
        invoker.invoke("req".to_owned()).wait(),
        Err(ProcessError::ScopeShutDown)
    ));
}

#[test]
fn current_outside_of_a_scope_is_an_error() {
    let scope = RequestScope::new();
    assert!(matches!(scope.current(), Err(ProcessError::NotInScope)));
    assert!(scope.suspend_current().is_none());
}
