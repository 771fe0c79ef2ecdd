//! 销毁协调
//!
//! 级联销毁规则：先深度优先销毁全部子作用域，再按创建逆序释放本
//! 上下文跟踪的实例，最后清空并封存仓库、释放园区槽位。任一环节的
//! 失败不阻止其余环节，全部失败收集后上报第一个。重复销毁是编程
//! 错误，必须响亮地失败而不是静默忽略。

use crate::context::{ContextId, InjectorContext, ScopeArena};
use futures::future::BoxFuture;
use injector_common::{
    DisposeOutcome, DisposerFn, InjectError, InjectResult, InstanceValue, Token,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// 一次性销毁槽
///
/// 同一实例的销毁回调保证恰好执行一次：解析结果句柄的显式释放与
/// 所属上下文的级联销毁共享同一个槽。
pub(crate) struct DisposeOnce {
    token: Token,
    value: InstanceValue,
    disposer: Option<DisposerFn>,
    fired: AtomicBool,
}

impl DisposeOnce {
    pub(crate) fn new(
        token: Token,
        value: InstanceValue,
        disposer: Option<DisposerFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            token,
            value,
            disposer,
            fired: AtomicBool::new(false),
        })
    }

    /// 严格释放：已释放过则报使用已销毁对象错误（句柄路径）
    pub(crate) async fn fire_strict(&self) -> InjectResult<()> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Err(InjectError::already_disposed(
                format!("实例 {}", self.token),
                "实例已释放",
            ));
        }
        self.run().await
    }

    /// 宽松释放：已释放过则静默跳过（级联扫除路径）
    pub(crate) async fn fire_lenient(&self) -> InjectResult<()> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.run().await
    }

    async fn run(&self) -> InjectResult<()> {
        match &self.disposer {
            Some(disposer) => disposer(self.value.clone()).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DisposeOnce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeOnce")
            .field("token", &self.token)
            .field("fired", &self.fired.load(Ordering::SeqCst))
            .finish()
    }
}

impl ScopeArena {
    /// 深度优先销毁以 `id` 为根的子树
    pub(crate) fn dispose_subtree<'a>(
        &'a self,
        id: ContextId,
        reason: &'a str,
    ) -> BoxFuture<'a, InjectResult<()>> {
        Box::pin(async move {
            let node = self.node(id)?;
            {
                let mut disposed = node.disposed.lock();
                if let Some(previous) = &*disposed {
                    return Err(InjectError::already_disposed(
                        "InjectorContext",
                        previous.clone(),
                    ));
                }
                *disposed = Some(reason.to_string());
            }
            info!("销毁作用域: {}, 原因: {}", node.scope.name, reason);

            let mut outcome = DisposeOutcome::new();

            // 子作用域先于本仓库清空
            let children: Vec<ContextId> = node.children.lock().clone();
            for child in children {
                if let Err(err) = self.dispose_subtree(child, reason).await {
                    outcome.push(err);
                }
            }

            // 跟踪实例按创建逆序释放
            let tracked: Vec<Arc<DisposeOnce>> = {
                let mut guard = node.tracked.lock();
                guard.drain(..).rev().collect()
            };
            for slot in tracked {
                outcome.record(slot.fire_lenient().await);
            }

            outcome.record(node.repository.dispose(reason));

            if let Some(parent_id) = node.parent {
                if let Ok(parent) = self.node(parent_id) {
                    parent.children.lock().retain(|child| *child != id);
                }
            }
            self.release(id);

            outcome.finish(&node.scope.name)
        })
    }
}

impl InjectorContext {
    /// 销毁本上下文及其整个子树
    ///
    /// # Errors
    /// - 重复销毁：[`InjectError::AlreadyDisposed`]
    /// - 任一子作用域或实例销毁失败：完成全部扫除后以
    ///   [`InjectError::DisposalFailed`] 上报第一个失败
    pub async fn dispose(&self, reason: &str) -> InjectResult<()> {
        self.arena.dispose_subtree(self.id, reason).await
    }
}
