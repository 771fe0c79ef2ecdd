//! 解析与实例生成
//!
//! 给定令牌与起始上下文：沿作用域链找到匹配的提供者，递归解析其
//! 依赖并构造实例，按单例 / multi 语义缓存与聚合，最终以可释放的
//! 结果句柄返回。
//!
//! 单例构造竞争：同一仓库中同一提供者的未缓存单例在并发解析下只
//! 构造一次，竞争失败方等待并复用胜者的结果。引擎不设超时；被调用
//! 方放弃的解析仍可能在后台完成并填充单例缓存。

use crate::context::{ContextId, InjectorContext};
use crate::disposal::DisposeOnce;
use crate::provider::{Dependency, FactoryCall, Provider, ProviderShape, ResolvedDeps};
use crate::repository::ProviderEntry;
use injector_common::{InjectError, InjectResult, InstanceValue, Token};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 默认最大解析深度
pub const MAX_RESOLUTION_DEPTH: usize = 100;

/// 解析链：循环依赖与深度防护
#[derive(Debug)]
pub(crate) struct ResolutionChain {
    chain: Vec<Token>,
    max_depth: usize,
}

impl Default for ResolutionChain {
    fn default() -> Self {
        Self {
            chain: Vec::new(),
            max_depth: MAX_RESOLUTION_DEPTH,
        }
    }
}

impl ResolutionChain {
    fn push(&mut self, token: &Token) -> InjectResult<()> {
        if self.chain.contains(token) {
            let mut parts: Vec<String> =
                self.chain.iter().map(ToString::to_string).collect();
            parts.push(token.to_string());
            return Err(InjectError::CircularDependency {
                chain: parts.join(" -> "),
            });
        }
        if self.chain.len() >= self.max_depth {
            return Err(InjectError::MaxDepthExceeded {
                max_depth: self.max_depth,
            });
        }
        self.chain.push(token.clone());
        Ok(())
    }

    fn pop(&mut self) {
        self.chain.pop();
    }
}

/// 解析结果句柄
///
/// 包装产出的实例值与其一次性销毁槽。显式 `release` 恰好执行一次
/// 销毁回调；重复释放、或在所属作用域已销毁后释放，都是生命周期
/// 错误。单例实例的销毁归其所属仓库的上下文，句柄释放对其不生效。
pub struct ResolveHandle {
    token: Token,
    values: Vec<InstanceValue>,
    multi: bool,
    slots: Vec<Arc<DisposeOnce>>,
    released: AtomicBool,
}

impl std::fmt::Debug for ResolveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveHandle")
            .field("token", &self.token)
            .field("values", &self.values.len())
            .field("multi", &self.multi)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl ResolveHandle {
    fn empty(token: Token) -> Self {
        Self {
            token,
            values: Vec::new(),
            multi: false,
            slots: Vec::new(),
            released: AtomicBool::new(false),
        }
    }

    fn single(token: Token, value: InstanceValue, slot: Option<Arc<DisposeOnce>>) -> Self {
        Self {
            token,
            values: vec![value],
            multi: false,
            slots: slot.into_iter().collect(),
            released: AtomicBool::new(false),
        }
    }

    fn aggregated(
        token: Token,
        values: Vec<InstanceValue>,
        slots: Vec<Arc<DisposeOnce>>,
    ) -> Self {
        Self {
            token,
            values,
            multi: true,
            slots,
            released: AtomicBool::new(false),
        }
    }

    /// 解析的令牌
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// 是否为空结果（可选解析未命中）
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 是否为 multi 聚合结果
    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// 单值结果的原始值
    pub fn raw(&self) -> Option<&InstanceValue> {
        if self.multi {
            None
        } else {
            self.values.first()
        }
    }

    /// 取单值结果并向下转型
    ///
    /// # Errors
    /// - 空结果：[`InjectError::MissingProvider`]
    /// - multi 结果：[`InjectError::ProviderShape`]（应使用 [`Self::get_all`]）
    /// - 类型不符：[`InjectError::TypeMismatch`]
    pub fn get<T: Send + Sync + 'static>(&self) -> InjectResult<Arc<T>> {
        if self.multi {
            return Err(InjectError::provider_shape(format!(
                "令牌 {} 为 multi 结果，应使用 get_all",
                self.token
            )));
        }
        let value = self.values.first().ok_or_else(|| {
            InjectError::MissingProvider {
                token: self.token.to_string(),
            }
        })?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| InjectError::TypeMismatch {
                token: self.token.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// 取全部结果并逐项向下转型，保持注册顺序
    pub fn get_all<T: Send + Sync + 'static>(&self) -> InjectResult<Vec<Arc<T>>> {
        self.values
            .iter()
            .cloned()
            .map(|value| {
                value
                    .downcast::<T>()
                    .map_err(|_| InjectError::TypeMismatch {
                        token: self.token.to_string(),
                        expected: std::any::type_name::<T>(),
                    })
            })
            .collect()
    }

    /// 显式释放句柄，执行一次性销毁回调
    ///
    /// # Errors
    /// - 重复释放：[`InjectError::AlreadyDisposed`]
    /// - 实例已随所属作用域销毁：[`InjectError::AlreadyDisposed`]
    pub async fn release(&self) -> InjectResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(InjectError::already_disposed(
                format!("ResolveHandle({})", self.token),
                "句柄已释放",
            ));
        }
        let mut outcome = injector_common::DisposeOutcome::new();
        for slot in self.slots.iter().rev() {
            outcome.record(slot.fire_strict().await);
        }
        outcome.finish(&format!("ResolveHandle({})", self.token))
    }

    /// 转成依赖位置上的值：空结果为 `None`，multi 聚合为值列表
    fn into_dep_value(self) -> Option<InstanceValue> {
        if self.multi {
            Some(Arc::new(self.values) as InstanceValue)
        } else {
            self.values.into_iter().next()
        }
    }
}

impl InjectorContext {
    /// 解析令牌（必需）
    pub async fn resolve(&self, token: &Token) -> InjectResult<ResolveHandle> {
        let mut chain = ResolutionChain::default();
        self.resolve_token(token, false, &mut chain).await
    }

    /// 解析令牌（可选）：未命中返回空句柄而不报错
    pub async fn resolve_optional(&self, token: &Token) -> InjectResult<ResolveHandle> {
        let mut chain = ResolutionChain::default();
        self.resolve_token(token, true, &mut chain).await
    }

    /// 解析并解包为类型化的单值
    pub async fn inject<T: Send + Sync + 'static>(&self, token: &Token) -> InjectResult<Arc<T>> {
        self.resolve(token).await?.get::<T>()
    }

    /// 解析并解包为类型化的有序列表（multi 令牌）
    pub async fn inject_all<T: Send + Sync + 'static>(
        &self,
        token: &Token,
    ) -> InjectResult<Vec<Arc<T>>> {
        self.resolve(token).await?.get_all::<T>()
    }

    /// 同步解析令牌
    ///
    /// 构造路径上出现异步工厂时以 [`InjectError::AsyncProvider`] 失败，
    /// 保证同步调用点不被悄悄地 await。
    pub fn resolve_sync(&self, token: &Token) -> InjectResult<ResolveHandle> {
        let mut chain = ResolutionChain::default();
        self.resolve_token_sync(token, false, &mut chain)
    }

    /// 同步解析令牌（可选）
    pub fn resolve_optional_sync(&self, token: &Token) -> InjectResult<ResolveHandle> {
        let mut chain = ResolutionChain::default();
        self.resolve_token_sync(token, true, &mut chain)
    }

    /// 在临时子作用域中解析一组参数并调用闭包
    ///
    /// 子作用域以额外提供者预填充，调用结束后无论成败都被销毁；
    /// 调用错误优先于销毁错误上报。
    pub async fn invoke<R, F>(
        &self,
        params: &[Dependency],
        extra_providers: Vec<Provider>,
        call: F,
    ) -> InjectResult<R>
    where
        F: FnOnce(ResolvedDeps) -> InjectResult<R>,
    {
        let scope = self.create_child("invoke", extra_providers)?;
        let mut chain = ResolutionChain::default();

        let mut values = Vec::with_capacity(params.len());
        let mut failure = None;
        for dep in params {
            match scope.resolve_token(&dep.token, dep.optional, &mut chain).await {
                Ok(handle) => values.push(handle.into_dep_value()),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let result = match failure {
            Some(err) => Err(err),
            None => call(ResolvedDeps::new(values)),
        };
        let disposal = scope.dispose("invoke 作用域结束").await;
        match (result, disposal) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
        }
    }

    fn check_token_restriction(&self, token: &Token) -> InjectResult<()> {
        if let Some(tag) = token.restriction() {
            if !self.has_tag(tag)? {
                return Err(InjectError::ScopeMismatch {
                    token: token.to_string(),
                    required_scope: tag.to_string(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn resolve_token<'a>(
        &'a self,
        token: &'a Token,
        optional: bool,
        chain: &'a mut ResolutionChain,
    ) -> futures::future::BoxFuture<'a, InjectResult<ResolveHandle>> {
        Box::pin(async move {
            self.check_token_restriction(token)?;
            let Some((entry, owner)) = self.find(token)? else {
                if optional {
                    debug!("可选令牌未命中: {}", token);
                    return Ok(ResolveHandle::empty(token.clone()));
                }
                return Err(InjectError::MissingProvider {
                    token: token.to_string(),
                });
            };

            chain.push(token)?;
            let resolved = self.resolve_entry(token, entry, owner, chain).await;
            chain.pop();
            resolved
        })
    }

    async fn resolve_entry(
        &self,
        token: &Token,
        entry: ProviderEntry,
        owner: ContextId,
        chain: &mut ResolutionChain,
    ) -> InjectResult<ResolveHandle> {
        match entry {
            ProviderEntry::Single(provider) => {
                let (value, slot) = self.materialize(&provider, owner, chain).await?;
                Ok(ResolveHandle::single(token.clone(), value, slot))
            }
            ProviderEntry::Multi(list) => {
                let mut values = Vec::with_capacity(list.len());
                let mut slots = Vec::new();
                for provider in &list {
                    let (value, slot) = self.materialize(provider, owner, chain).await?;
                    values.push(value);
                    slots.extend(slot);
                }
                Ok(ResolveHandle::aggregated(token.clone(), values, slots))
            }
        }
    }

    /// 按提供者形态与生命周期策略产出实例
    async fn materialize(
        &self,
        provider: &Arc<Provider>,
        owner: ContextId,
        chain: &mut ResolutionChain,
    ) -> InjectResult<(InstanceValue, Option<Arc<DisposeOnce>>)> {
        if let ProviderShape::Value(value) = provider.shape() {
            // 预置值直接返回，不参与单例缓存，也不进入跟踪列表
            return Ok((value.clone(), None));
        }

        if provider.is_singleton() {
            let owner_node = self.arena.node(owner)?;
            let slot = owner_node.repository.singleton_slot(provider)?;
            if let Some(value) = slot.cell.get() {
                return Ok((value.clone(), None));
            }
            let _init = slot.init_lock.lock().await;
            if let Some(value) = slot.cell.get() {
                return Ok((value.clone(), None));
            }
            let value = self.construct(provider, chain).await?;
            if slot.cell.set(value.clone()).is_ok() {
                debug!("缓存单例: {} @ {}", provider.token(), owner_node.scope.name);
                let owner_ctx = InjectorContext {
                    arena: self.arena.clone(),
                    id: owner,
                };
                owner_ctx.track(DisposeOnce::new(
                    provider.token().clone(),
                    value.clone(),
                    provider.disposer().cloned(),
                ))?;
            }
            // 单例随所属仓库的上下文销毁，句柄不持有销毁槽
            return Ok((value, None));
        }

        let value = self.construct(provider, chain).await?;
        let slot = DisposeOnce::new(
            provider.token().clone(),
            value.clone(),
            provider.disposer().cloned(),
        );
        self.track(slot.clone())?;
        Ok((value, Some(slot)))
    }

    /// 递归解析依赖并执行构造
    ///
    /// 携带私有嵌套提供者的提供者在以这些提供者预填充的子作用域中
    /// 解析依赖，私有依赖不泄漏给兄弟解析；该子作用域按提供者复用，
    /// 反复解析不会增殖新作用域。
    async fn construct(
        &self,
        provider: &Provider,
        chain: &mut ResolutionChain,
    ) -> InjectResult<InstanceValue> {
        let site = if provider.nested().is_empty() {
            self.clone()
        } else {
            self.nested_site(provider)?
        };

        let deps = provider.deps();
        let mut values = Vec::with_capacity(deps.len());
        for dep in deps {
            let handle = site.resolve_token(&dep.token, dep.optional, chain).await?;
            values.push(handle.into_dep_value());
        }
        let resolved = ResolvedDeps::new(values);

        match provider.shape() {
            ProviderShape::Value(value) => Ok(value.clone()),
            ProviderShape::Class { construct, .. } => construct(resolved),
            ProviderShape::Factory { call, .. } => match call {
                FactoryCall::Sync(factory) => factory(resolved),
                FactoryCall::Async(factory) => factory(resolved).await,
            },
        }
    }

    fn resolve_token_sync(
        &self,
        token: &Token,
        optional: bool,
        chain: &mut ResolutionChain,
    ) -> InjectResult<ResolveHandle> {
        self.check_token_restriction(token)?;
        let Some((entry, owner)) = self.find(token)? else {
            if optional {
                return Ok(ResolveHandle::empty(token.clone()));
            }
            return Err(InjectError::MissingProvider {
                token: token.to_string(),
            });
        };

        chain.push(token)?;
        let resolved = self.resolve_entry_sync(token, entry, owner, chain);
        chain.pop();
        resolved
    }

    fn resolve_entry_sync(
        &self,
        token: &Token,
        entry: ProviderEntry,
        owner: ContextId,
        chain: &mut ResolutionChain,
    ) -> InjectResult<ResolveHandle> {
        match entry {
            ProviderEntry::Single(provider) => {
                let (value, slot) = self.materialize_sync(&provider, owner, chain)?;
                Ok(ResolveHandle::single(token.clone(), value, slot))
            }
            ProviderEntry::Multi(list) => {
                let mut values = Vec::with_capacity(list.len());
                let mut slots = Vec::new();
                for provider in &list {
                    let (value, slot) = self.materialize_sync(provider, owner, chain)?;
                    values.push(value);
                    slots.extend(slot);
                }
                Ok(ResolveHandle::aggregated(token.clone(), values, slots))
            }
        }
    }

    fn materialize_sync(
        &self,
        provider: &Arc<Provider>,
        owner: ContextId,
        chain: &mut ResolutionChain,
    ) -> InjectResult<(InstanceValue, Option<Arc<DisposeOnce>>)> {
        if let ProviderShape::Value(value) = provider.shape() {
            return Ok((value.clone(), None));
        }

        if provider.is_singleton() {
            let owner_node = self.arena.node(owner)?;
            let slot = owner_node.repository.singleton_slot(provider)?;
            if let Some(value) = slot.cell.get() {
                return Ok((value.clone(), None));
            }
            // 与异步路径共用同一把初始化锁；同步调用点无法 await，
            // 以让出时间片的方式等待在途构造完成
            let _init = loop {
                if let Ok(guard) = slot.init_lock.try_lock() {
                    break guard;
                }
                std::thread::yield_now();
            };
            if let Some(value) = slot.cell.get() {
                return Ok((value.clone(), None));
            }
            let value = self.construct_sync(provider, chain)?;
            if slot.cell.set(value.clone()).is_ok() {
                debug!("缓存单例: {} @ {}", provider.token(), owner_node.scope.name);
                let owner_ctx = InjectorContext {
                    arena: self.arena.clone(),
                    id: owner,
                };
                owner_ctx.track(DisposeOnce::new(
                    provider.token().clone(),
                    value.clone(),
                    provider.disposer().cloned(),
                ))?;
            }
            return Ok((value, None));
        }

        let value = self.construct_sync(provider, chain)?;
        let slot = DisposeOnce::new(
            provider.token().clone(),
            value.clone(),
            provider.disposer().cloned(),
        );
        self.track(slot.clone())?;
        Ok((value, Some(slot)))
    }

    fn construct_sync(
        &self,
        provider: &Provider,
        chain: &mut ResolutionChain,
    ) -> InjectResult<InstanceValue> {
        if provider.is_async() {
            return Err(InjectError::AsyncProvider {
                token: provider.token().to_string(),
            });
        }

        let site = if provider.nested().is_empty() {
            self.clone()
        } else {
            self.nested_site(provider)?
        };

        let deps = provider.deps();
        let mut values = Vec::with_capacity(deps.len());
        for dep in deps {
            let handle = site.resolve_token_sync(&dep.token, dep.optional, chain)?;
            values.push(handle.into_dep_value());
        }
        let resolved = ResolvedDeps::new(values);

        match provider.shape() {
            ProviderShape::Value(value) => Ok(value.clone()),
            ProviderShape::Class { construct, .. } => construct(resolved),
            ProviderShape::Factory { call, .. } => match call {
                FactoryCall::Sync(factory) => factory(resolved),
                FactoryCall::Async(_) => Err(InjectError::AsyncProvider {
                    token: provider.token().to_string(),
                }),
            },
        }
    }
}
