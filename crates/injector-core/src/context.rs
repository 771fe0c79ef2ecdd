//! 注入器上下文（作用域树）
//!
//! 上下文以索引句柄寻址的节点园区（arena）组织：父节点持有子节点
//! 索引列表，子节点仅以索引回指父节点，不存在引用计数环。每个上下文
//! 独占一个仓库，并维护一份查找缓存（命中结果含"未找到"，避免重复的
//! 否定查找）。
//!
//! 查找优先级：自身仓库永远优先于任何祖先（最具体作用域胜出）；
//! 同一仓库内，非 multi 令牌后注册者覆盖先注册者，multi 令牌按
//! 注册顺序追加。

use crate::disposal::DisposeOnce;
use crate::provider::{Provider, ProviderId};
use crate::repository::{ProviderEntry, Repository};
use dashmap::DashMap;
use injector_common::{InjectError, InjectResult, ScopeInfo, ScopeTag, Token};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// 上下文句柄索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) usize);

/// 查找结果（含否定结果）
#[derive(Debug, Clone)]
pub(crate) enum FindOutcome {
    /// 找到条目及其所在上下文（单例缓存落点）
    Found {
        entry: ProviderEntry,
        owner: ContextId,
    },
    /// 整条作用域链上都未找到
    Missing,
}

/// 园区节点
pub(crate) struct ContextNode {
    pub(crate) id: ContextId,
    pub(crate) parent: Option<ContextId>,
    pub(crate) children: Mutex<Vec<ContextId>>,
    pub(crate) scope: ScopeInfo,
    pub(crate) repository: Repository,
    pub(crate) find_cache: DashMap<Token, FindOutcome>,
    pub(crate) tracked: Mutex<Vec<Arc<DisposeOnce>>>,
    /// 携带私有嵌套提供者的提供者在本上下文解析时复用的依赖作用域，
    /// 按提供者标识为键，避免重复解析时无限增殖子作用域
    pub(crate) dep_scopes: Mutex<HashMap<ProviderId, ContextId>>,
    pub(crate) disposed: Mutex<Option<String>>,
}

impl ContextNode {
    pub(crate) fn disposed_reason(&self) -> Option<String> {
        self.disposed.lock().clone()
    }
}

/// 上下文园区：持有全部作用域节点
pub struct ScopeArena {
    nodes: RwLock<Vec<Option<Arc<ContextNode>>>>,
}

impl std::fmt::Debug for ScopeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.nodes.read();
        f.debug_struct("ScopeArena")
            .field("slots", &nodes.len())
            .field("alive", &nodes.iter().filter(|slot| slot.is_some()).count())
            .finish()
    }
}

/// 进程级全局声明的提供者集合
///
/// 由进程入口显式构建并交给 [`ScopeArena::new_root`]，不存在隐藏的
/// 模块级单例。其承载仓库禁止缓存单例实例。
#[derive(Debug, Default)]
pub struct AmbientProviders {
    providers: Vec<Provider>,
}

impl AmbientProviders {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式追加提供者
    #[must_use]
    pub fn with(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// 追加提供者
    pub fn push(&mut self, provider: Provider) {
        self.providers.push(provider);
    }

    /// 提供者个数
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// 作用域统计信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeStats {
    /// 子树中的存活上下文数
    pub contexts: usize,
    /// 已注册的提供者条目总数
    pub providers: usize,
    /// 已缓存的单例总数
    pub cached_singletons: usize,
    /// 被跟踪的实例总数
    pub tracked_instances: usize,
}

impl ScopeArena {
    /// 创建根上下文
    ///
    /// 园区内部以一个环境节点承载全局声明的提供者，根上下文是它的
    /// 唯一子节点；环境节点不对外暴露句柄，也不可销毁。
    pub fn new_root(
        tag: impl Into<ScopeTag>,
        ambient: AmbientProviders,
    ) -> InjectResult<InjectorContext> {
        let arena = Arc::new(ScopeArena {
            nodes: RwLock::new(Vec::new()),
        });

        let ambient_repo = Repository::ambient();
        for provider in ambient.providers {
            ambient_repo.register(provider)?;
        }
        let ambient_id = arena.alloc(None, ScopeInfo::new("ambient"), ambient_repo);

        let root_scope = ScopeInfo::new(tag);
        let root_id = arena.alloc(Some(ambient_id), root_scope, Repository::new());
        arena.node(ambient_id)?.children.lock().push(root_id);

        let root = InjectorContext {
            arena,
            id: root_id,
        };
        info!("创建根作用域: {}", root.name()?);
        Ok(root)
    }

    fn alloc(&self, parent: Option<ContextId>, scope: ScopeInfo, repository: Repository) -> ContextId {
        let mut nodes = self.nodes.write();
        let id = ContextId(nodes.len());
        nodes.push(Some(Arc::new(ContextNode {
            id,
            parent,
            children: Mutex::new(Vec::new()),
            scope,
            repository,
            find_cache: DashMap::new(),
            tracked: Mutex::new(Vec::new()),
            dep_scopes: Mutex::new(HashMap::new()),
            disposed: Mutex::new(None),
        })));
        id
    }

    pub(crate) fn node(&self, id: ContextId) -> InjectResult<Arc<ContextNode>> {
        self.nodes
            .read()
            .get(id.0)
            .and_then(Clone::clone)
            .ok_or_else(|| {
                InjectError::already_disposed("InjectorContext", "作用域槽位已释放")
            })
    }

    pub(crate) fn release(&self, id: ContextId) {
        if let Some(slot) = self.nodes.write().get_mut(id.0) {
            *slot = None;
        }
    }

    /// 清除子树中某令牌的查找缓存（注册新提供者后调用）
    pub(crate) fn invalidate_subtree(&self, id: ContextId, token: &Token) {
        let Ok(node) = self.node(id) else {
            return;
        };
        node.find_cache.remove(token);
        let children: Vec<ContextId> = node.children.lock().clone();
        for child in children {
            self.invalidate_subtree(child, token);
        }
    }

    fn collect_stats(&self, id: ContextId, stats: &mut ScopeStats) {
        let Ok(node) = self.node(id) else {
            return;
        };
        stats.contexts += 1;
        stats.providers += node.repository.provider_count();
        stats.cached_singletons += node.repository.singleton_count();
        stats.tracked_instances += node.tracked.lock().len();
        let children: Vec<ContextId> = node.children.lock().clone();
        for child in children {
            self.collect_stats(child, stats);
        }
    }
}

/// 注入器上下文句柄
///
/// 廉价克隆的作用域树节点句柄，所有操作经由园区转发。
#[derive(Clone)]
pub struct InjectorContext {
    pub(crate) arena: Arc<ScopeArena>,
    pub(crate) id: ContextId,
}

impl std::fmt::Debug for InjectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectorContext")
            .field("id", &self.id)
            .finish()
    }
}

impl InjectorContext {
    /// 创建仅含根作用域的上下文（无全局声明提供者）
    pub fn root(tag: impl Into<ScopeTag>) -> InjectResult<Self> {
        ScopeArena::new_root(tag, AmbientProviders::new())
    }

    /// 创建根作用域，并预置全局声明的提供者
    pub fn root_with_ambient(
        tag: impl Into<ScopeTag>,
        ambient: AmbientProviders,
    ) -> InjectResult<Self> {
        ScopeArena::new_root(tag, ambient)
    }

    /// 上下文句柄索引
    pub fn context_id(&self) -> ContextId {
        self.id
    }

    /// 作用域描述
    pub fn scope(&self) -> InjectResult<ScopeInfo> {
        Ok(self.arena.node(self.id)?.scope.clone())
    }

    /// 作用域层级名称
    pub fn name(&self) -> InjectResult<String> {
        Ok(self.arena.node(self.id)?.scope.name.clone())
    }

    /// 上下文是否已销毁
    pub fn is_disposed(&self) -> bool {
        match self.arena.node(self.id) {
            Ok(node) => node.disposed_reason().is_some(),
            Err(_) => true,
        }
    }

    pub(crate) fn ensure_active(&self) -> InjectResult<Arc<ContextNode>> {
        let node = self.arena.node(self.id)?;
        if let Some(reason) = node.disposed_reason() {
            return Err(InjectError::already_disposed("InjectorContext", reason));
        }
        Ok(node)
    }

    /// 向本上下文的仓库注册提供者
    ///
    /// 注册成功后清除子树中该令牌的查找缓存，保证后注册的提供者
    /// 对已经历过否定查找的后代可见。
    pub fn register(&self, provider: Provider) -> InjectResult<()> {
        let node = self.ensure_active()?;
        let token = provider.token().clone();
        node.repository.register(provider)?;
        self.arena.invalidate_subtree(self.id, &token);
        Ok(())
    }

    /// 批量注册提供者
    pub fn register_all(
        &self,
        providers: impl IntoIterator<Item = Provider>,
    ) -> InjectResult<()> {
        for provider in providers {
            self.register(provider)?;
        }
        Ok(())
    }

    /// 打开子作用域，仓库以给定提供者预填充
    pub fn create_child(
        &self,
        tag: impl Into<ScopeTag>,
        providers: impl IntoIterator<Item = Provider>,
    ) -> InjectResult<Self> {
        let node = self.ensure_active()?;
        let repository = Repository::new();
        for provider in providers {
            repository.register(provider)?;
        }
        let scope = node.scope.child(tag);
        let name = scope.name.clone();
        let child_id = self.arena.alloc(Some(self.id), scope, repository);
        node.children.lock().push(child_id);
        info!("创建子作用域: {}", name);
        Ok(Self {
            arena: self.arena.clone(),
            id: child_id,
        })
    }

    /// 取得（或创建）提供者私有嵌套提供者的依赖作用域
    ///
    /// 同一提供者在同一上下文反复解析时复用同一个依赖作用域，
    /// 其私有单例状态随之共享，作用域随本上下文级联销毁。
    pub(crate) fn nested_site(&self, provider: &Provider) -> InjectResult<Self> {
        let node = self.ensure_active()?;
        let mut scopes = node.dep_scopes.lock();
        if let Some(existing) = scopes.get(&provider.id()) {
            return Ok(Self {
                arena: self.arena.clone(),
                id: *existing,
            });
        }
        let site = self.create_child(
            format!("{}-deps", provider.token()),
            provider.nested().to_vec(),
        )?;
        scopes.insert(provider.id(), site.id);
        Ok(site)
    }

    /// 本上下文的祖先链（含自身）是否携带指定作用域标记
    pub fn has_tag(&self, tag: &ScopeTag) -> InjectResult<bool> {
        let mut cursor = Some(self.id);
        while let Some(id) = cursor {
            let node = self.arena.node(id)?;
            if node.scope.tag == *tag {
                return Ok(true);
            }
            cursor = node.parent;
        }
        Ok(false)
    }

    /// 作用域感知的提供者查找
    ///
    /// 先查本地缓存（含否定结果），再沿作用域链向外查找；在祖先中
    /// 找到的结果只缓存在发起查找的上下文上，绝不复制进祖先自己的
    /// 缓存。返回条目与其所在上下文（单例缓存的落点）。
    pub(crate) fn find(
        &self,
        token: &Token,
    ) -> InjectResult<Option<(ProviderEntry, ContextId)>> {
        let start = self.ensure_active()?;
        if let Some(outcome) = start.find_cache.get(token) {
            return Ok(match &*outcome {
                FindOutcome::Found { entry, owner } => Some((entry.clone(), *owner)),
                FindOutcome::Missing => None,
            });
        }

        let mut result = None;
        let mut cursor = Some(self.id);
        while let Some(id) = cursor {
            let node = self.arena.node(id)?;
            if let Some(entry) = node.repository.get(token)? {
                if let Some(visible) = self.filter_entry(entry)? {
                    result = Some((visible, id));
                    break;
                }
            }
            cursor = node.parent;
        }

        start.find_cache.insert(
            token.clone(),
            match &result {
                Some((entry, owner)) => FindOutcome::Found {
                    entry: entry.clone(),
                    owner: *owner,
                },
                None => FindOutcome::Missing,
            },
        );
        Ok(result)
    }

    /// 按提供者的作用域限制过滤条目
    ///
    /// 限制以发起解析的上下文祖先链为准；multi 条目逐个过滤，
    /// 全部被跳过时视作本仓库未命中，继续向外查找。
    fn filter_entry(&self, entry: ProviderEntry) -> InjectResult<Option<ProviderEntry>> {
        match entry {
            ProviderEntry::Single(provider) => {
                if self.restriction_ok(&provider)? {
                    Ok(Some(ProviderEntry::Single(provider)))
                } else {
                    Ok(None)
                }
            }
            ProviderEntry::Multi(list) => {
                let mut kept = Vec::with_capacity(list.len());
                for provider in list {
                    if self.restriction_ok(&provider)? {
                        kept.push(provider);
                    }
                }
                if kept.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(ProviderEntry::Multi(kept)))
                }
            }
        }
    }

    fn restriction_ok(&self, provider: &Provider) -> InjectResult<bool> {
        match provider.restriction() {
            None => Ok(true),
            Some(tag) => self.has_tag(tag),
        }
    }

    /// 将产出的实例登记到本上下文，销毁时按创建逆序释放
    pub(crate) fn track(&self, slot: Arc<DisposeOnce>) -> InjectResult<()> {
        let node = self.ensure_active()?;
        node.tracked.lock().push(slot);
        Ok(())
    }

    /// 汇总子树的统计信息
    pub fn stats(&self) -> ScopeStats {
        let mut stats = ScopeStats::default();
        self.arena.collect_stats(self.id, &mut stats);
        stats
    }
}
