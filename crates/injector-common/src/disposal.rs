//! 销毁契约
//!
//! 定义实例的销毁回调类型、可销毁对象 trait 与销毁结果聚合工具。
//! 聚合规则：尽力而为地执行全部销毁，收集所有失败，上报第一个。

use crate::errors::{InjectError, InjectResult};
use crate::metadata::InstanceValue;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// 实例销毁回调
///
/// 接收类型擦除的实例值，执行异步清理。同一实例的回调保证只被调用一次。
pub type DisposerFn =
    Arc<dyn Fn(InstanceValue) -> BoxFuture<'static, InjectResult<()>> + Send + Sync>;

/// 可销毁对象 trait
///
/// 实现此 trait 的实例暴露销毁契约，配合 [`disposer_for`] 可在
/// 提供者上自动挂接销毁回调。
#[async_trait]
pub trait Disposable: Send + Sync {
    /// 释放实例持有的资源
    async fn dispose(&self) -> InjectResult<()>;
}

/// 为实现了 [`Disposable`] 的类型生成销毁回调
///
/// 回调内部向下转型到具体类型后调用其 `dispose`；
/// 类型不匹配时返回 [`InjectError::TypeMismatch`]。
pub fn disposer_for<T>() -> DisposerFn
where
    T: Disposable + 'static,
{
    Arc::new(|value: InstanceValue| {
        Box::pin(async move {
            match value.downcast::<T>() {
                Ok(typed) => typed.dispose().await,
                Err(_) => Err(InjectError::TypeMismatch {
                    token: "<disposer>".to_string(),
                    expected: std::any::type_name::<T>(),
                }),
            }
        })
    })
}

/// 销毁结果聚合器
///
/// 收集一次级联销毁中产生的全部失败；`finish` 返回第一个失败，
/// 其余失败在日志中告警后丢弃。
#[derive(Debug, Default)]
pub struct DisposeOutcome {
    failures: Vec<InjectError>,
}

impl DisposeOutcome {
    /// 创建空的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次销毁结果
    pub fn record(&mut self, result: InjectResult<()>) {
        if let Err(err) = result {
            self.failures.push(err);
        }
    }

    /// 记录一次失败
    pub fn push(&mut self, err: InjectError) {
        self.failures.push(err);
    }

    /// 是否没有任何失败
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 结束聚合：无失败返回 `Ok`，否则返回第一个失败
    pub fn finish(mut self, what: &str) -> InjectResult<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        for extra in self.failures.drain(1..) {
            tracing::warn!("{} 的销毁产生附加失败: {}", what, extra);
        }
        let first = self.failures.remove(0);
        Err(InjectError::DisposalFailed {
            what: what.to_string(),
            source: Box::new(first),
        })
    }
}
