//! 请求作用域：按请求隔离的类型化键值存储，以及跨线程移交的引用计数句柄。
//!
//! # 设计综述（Why）
//! - 单个请求的处理会在 requesting、responding 以及恢复线程之间迁移，
//!   请求级状态必须跟随请求移动，而不是停留在首个线程；
//! - 线程亲和部分只保留在最外层：每个线程一份 `thread_local!` 激活栈，记录“当前线程正在为哪个
//!   作用域工作”；作用域实例本身是 `Arc`，显式地在线程之间传递。
//!
//! # 契约（What）
//! - [`ScopeInstance`] 是一份计数引用：[`ScopeInstance::release`] 消费句柄，`Drop` 释放未显式释放的句柄，
//!   因此同一引用不可能被释放两次；
//! - 最后一份引用释放时存储被清空；
//! - 同一作用域中的键只允许写入一次。

use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    error::{ProcessError, ScopeError},
    observability::targets,
};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

type ScopedValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum StoreKey {
    Allocated(u64),
    Type(TypeId),
}

struct ActiveScope {
    manager: u64,
    instance: ScopeInstance,
}

thread_local! {
    static ACTIVE: RefCell<Vec<ActiveScope>> = const { RefCell::new(Vec::new()) };
}

/// 类型化的作用域键。
///
/// 每次 [`ScopeKey::new`] 都分配进程内唯一的编号；[`ScopeKey::of_type`] 则以 `T` 本身为键，
/// 同一类型在任何地方构造出的键都相同。`name` 仅用于诊断。
pub struct ScopeKey<T> {
    id: StoreKey,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScopeKey<T> {
    /// 分配新键。
    pub fn new(name: &'static str) -> Self {
        Self {
            id: StoreKey::Allocated(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            _marker: PhantomData,
        }
    }

    /// 以类型 `T` 为键。
    pub fn of_type(name: &'static str) -> Self
    where
        T: 'static,
    {
        Self {
            id: StoreKey::Type(TypeId::of::<T>()),
            name,
            _marker: PhantomData,
        }
    }

    /// 诊断名称。
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ScopeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScopeKey<T> {}

impl<T> fmt::Debug for ScopeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeKey")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

struct InstanceInner {
    id: u64,
    references: AtomicUsize,
    store: Mutex<HashMap<StoreKey, ScopedValue>>,
}

/// 作用域实例的一份计数引用。
///
/// # 教案式说明
/// - **意图 (Why)**：请求挂起时需要“再拿一份引用”把存储带到恢复线程，
///   原线程退出作用域时释放自己那一份，存储因此不会被提前清空；
/// - **逻辑 (How)**：逻辑引用计数独立于 `Arc` 强计数；[`ScopeInstance::reference`] 递增，
///   句柄被消费或析构时递减，归零时清空存储；
/// - **契约 (What)**：存储由互斥锁保护以满足 `Sync`，但同一作用域在任意时刻只应被一个线程使用。
pub struct ScopeInstance {
    inner: Arc<InstanceInner>,
}

impl ScopeInstance {
    fn fresh() -> Self {
        let instance = Self {
            inner: Arc::new(InstanceInner {
                id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
                references: AtomicUsize::new(1),
                store: Mutex::new(HashMap::new()),
            }),
        };
        trace!(target: targets::SCOPE, scope = instance.id(), "scope instance created");
        instance
    }

    /// 作用域编号。
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 当前存活的逻辑引用数。
    pub fn reference_count(&self) -> usize {
        self.inner.references.load(Ordering::Acquire)
    }

    /// 获取同一实例的另一份引用。
    pub fn reference(&self) -> ScopeInstance {
        self.inner.references.fetch_add(1, Ordering::AcqRel);
        ScopeInstance {
            inner: Arc::clone(&self.inner),
        }
    }

    /// 释放本引用。
    pub fn release(self) {
        drop(self);
    }

    /// 写入值；键已存在时失败。
    pub fn put<T>(&self, key: &ScopeKey<T>, value: T) -> Result<(), ScopeError>
    where
        T: Send + Sync + 'static,
    {
        let mut store = self.inner.store.lock();
        if store.contains_key(&key.id) {
            return Err(ScopeError::AlreadySeeded {
                key: key.name,
                scope: self.inner.id,
            });
        }
        store.insert(key.id, Arc::new(value));
        Ok(())
    }

    /// 读取值。
    pub fn get<T>(&self, key: &ScopeKey<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.inner.store.lock().get(&key.id).cloned()?;
        value.downcast::<T>().ok()
    }

    /// 是否已写入。
    pub fn contains<T>(&self, key: &ScopeKey<T>) -> bool {
        self.inner.store.lock().contains_key(&key.id)
    }

    /// 读取值，不存在时以 `init` 创建并写入。
    ///
    /// `init` 在锁外执行，可以安全地访问同一作用域。
    pub fn get_or_insert_with<T>(&self, key: &ScopeKey<T>, init: impl FnOnce() -> T) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let fresh = Arc::new(init());
        let mut store = self.inner.store.lock();
        match store.get(&key.id).cloned().map(|value| value.downcast::<T>()) {
            Some(Ok(existing)) => existing,
            _ => {
                store.insert(key.id, Arc::clone(&fresh) as ScopedValue);
                fresh
            }
        }
    }
}

impl Drop for ScopeInstance {
    fn drop(&mut self) {
        if self.inner.references.fetch_sub(1, Ordering::AcqRel) == 1 {
            let drained = std::mem::take(&mut *self.inner.store.lock());
            trace!(
                target: targets::SCOPE,
                scope = self.inner.id,
                values = drained.len(),
                "last scope reference released; store cleared"
            );
            drop(drained);
        }
    }
}

impl fmt::Debug for ScopeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeInstance")
            .field("id", &self.inner.id)
            .field("references", &self.reference_count())
            .finish()
    }
}

struct ManagerInner {
    id: u64,
    shut_down: AtomicBool,
}

/// 作用域管理器。
///
/// # 教案式说明
/// - **意图 (Why)**：在调用线程上激活/停用作用域实例，并为挂起的请求派生可移交的引用；
/// - **逻辑 (How)**：激活记录压入当前线程的激活栈，`run_in_scope` 退出时（含 panic 展开）
///   弹出并释放绑定的引用，随后之前激活的实例自然恢复为栈顶；
/// - **契约 (What)**：
///   - 多个管理器互不干扰，激活栈按管理器编号区分；
///   - `shutdown` 之后 `current` 与 `run_in_scope` 返回 [`ProcessError::ScopeShutDown`]。
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ManagerInner>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestScope {
    /// 创建管理器。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// 当前线程上激活实例的一份新引用。
    pub fn current(&self) -> Result<ScopeInstance, ProcessError> {
        self.ensure_running()?;
        self.suspend_current().ok_or(ProcessError::NotInScope)
    }

    /// 创建未绑定任何线程的新实例。
    pub fn create_context(&self) -> ScopeInstance {
        ScopeInstance::fresh()
    }

    /// 在给定实例（缺省时新建）中执行 `task`。
    ///
    /// 退出时恢复之前激活的实例，并释放本次绑定所持有的引用。
    pub fn run_in_scope<T>(
        &self,
        instance: Option<ScopeInstance>,
        task: impl FnOnce() -> T,
    ) -> Result<T, ProcessError> {
        self.ensure_running()?;
        let instance = instance.unwrap_or_else(ScopeInstance::fresh);
        let scope = instance.id();
        trace!(target: targets::SCOPE, scope, "entering scope");
        ACTIVE.with_borrow_mut(|stack| {
            stack.push(ActiveScope {
                manager: self.inner.id,
                instance,
            })
        });
        let _exit = ExitGuard {
            manager: self.inner.id,
            scope,
        };
        Ok(task())
    }

    /// 当前激活实例的一份新引用；不在作用域内时返回 `None`。
    pub fn suspend_current(&self) -> Option<ScopeInstance> {
        ACTIVE.with_borrow(|stack| {
            stack
                .iter()
                .rev()
                .find(|active| active.manager == self.inner.id)
                .map(|active| active.instance.reference())
        })
    }

    /// 释放一份引用。
    pub fn release(&self, instance: ScopeInstance) {
        instance.release();
    }

    /// 当前线程是否处于本管理器的作用域内。
    pub fn is_active(&self) -> bool {
        ACTIVE.with_borrow(|stack| stack.iter().any(|active| active.manager == self.inner.id))
    }

    /// 关闭管理器。
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
    }

    /// 是否已关闭。
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), ProcessError> {
        if self.is_shut_down() {
            return Err(ProcessError::ScopeShutDown);
        }
        Ok(())
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.inner.id)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

struct ExitGuard {
    manager: u64,
    scope: u64,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let popped = ACTIVE
            .try_with(|stack| {
                let mut stack = stack.borrow_mut();
                let position = stack
                    .iter()
                    .rposition(|active| active.manager == self.manager)?;
                Some(stack.remove(position))
            })
            .ok()
            .flatten();
        trace!(target: targets::SCOPE, scope = self.scope, "leaving scope");
        drop(popped);
    }
}
