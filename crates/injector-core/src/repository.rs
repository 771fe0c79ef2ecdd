//! 提供者仓库
//!
//! 仓库归属于且仅属于一个注入器上下文，持有"令牌 → 提供者条目"映射
//! 与按提供者标识为键的单例缓存。注册与销毁和解析读取共用同一把锁，
//! 对已销毁仓库的任何访问都以 [`InjectError::AlreadyDisposed`] 失败。

use crate::provider::{Provider, ProviderId};
use injector_common::{InjectError, InjectResult, InstanceValue, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// 令牌对应的提供者条目
#[derive(Debug, Clone)]
pub enum ProviderEntry {
    /// 非 multi 令牌：单一提供者，后注册者覆盖先注册者
    Single(Arc<Provider>),
    /// multi 令牌：按注册顺序追加的有序列表
    Multi(Vec<Arc<Provider>>),
}

impl ProviderEntry {
    /// 条目中的提供者个数
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Multi(list) => list.len(),
        }
    }

    /// 条目是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 条目是否为 multi
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

/// 单例槽位
///
/// 同步与异步解析路径都必须先持有 `init_lock` 再构造并写入 `cell`，
/// 同一提供者在同一仓库中因此只构造一次：竞争失败方在锁上等待，
/// 醒来后直接复用胜者写入的结果。`cell` 一经写入不再变化，已缓存
/// 命中无需加锁。
pub(crate) struct SingletonSlot {
    pub(crate) cell: OnceCell<InstanceValue>,
    pub(crate) init_lock: tokio::sync::Mutex<()>,
}

impl SingletonSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }
}

struct RepositoryState {
    providers: HashMap<Token, ProviderEntry>,
    singletons: HashMap<ProviderId, Arc<SingletonSlot>>,
    disposed: Option<String>,
}

/// 提供者仓库
pub struct Repository {
    state: Mutex<RepositoryState>,
    allow_singletons: bool,
    ambient: bool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Repository")
            .field("providers", &state.providers.len())
            .field("singletons", &state.singletons.len())
            .field("disposed", &state.disposed)
            .field("ambient", &self.ambient)
            .finish()
    }
}

impl Repository {
    /// 创建普通仓库
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RepositoryState {
                providers: HashMap::new(),
                singletons: HashMap::new(),
                disposed: None,
            }),
            allow_singletons: true,
            ambient: false,
        }
    }

    /// 创建环境仓库
    ///
    /// 环境仓库承载进程级全局声明的提供者，为避免无关解析之间
    /// 泄漏状态，禁止缓存单例实例，也不允许被销毁。
    pub fn ambient() -> Self {
        Self {
            state: Mutex::new(RepositoryState {
                providers: HashMap::new(),
                singletons: HashMap::new(),
                disposed: None,
            }),
            allow_singletons: false,
            ambient: true,
        }
    }

    /// 是否为环境仓库
    pub fn is_ambient(&self) -> bool {
        self.ambient
    }

    /// 注册提供者
    ///
    /// 先与有主见令牌对账，再检查 multi 一致性。任何失败都不改变
    /// 仓库已有状态。
    ///
    /// # Errors
    /// - 令牌无效：[`InjectError::InvalidRegistrationTarget`]
    /// - 令牌/提供者标志冲突：[`InjectError::FlagConflict`]
    /// - 与已有条目的 multi 属性不一致：[`InjectError::ConflictingRegistration`]
    /// - 仓库已销毁：[`InjectError::AlreadyDisposed`]
    pub fn register(&self, mut provider: Provider) -> InjectResult<()> {
        provider.token().validate()?;
        provider.reconcile_token_traits()?;

        let mut state = self.state.lock();
        if let Some(reason) = &state.disposed {
            return Err(InjectError::already_disposed("Repository", reason.clone()));
        }

        let token = provider.token().clone();
        let token_display = token.to_string();
        let incoming_multi = provider.is_multi();
        match state.providers.entry(token) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                if occupied.get().is_multi() != incoming_multi {
                    return Err(InjectError::ConflictingRegistration {
                        token: token_display,
                    });
                }
                match occupied.get_mut() {
                    ProviderEntry::Multi(list) => {
                        debug!("追加 multi 提供者: {} (第 {} 个)", token_display, list.len() + 1);
                        list.push(Arc::new(provider));
                    }
                    entry @ ProviderEntry::Single(_) => {
                        debug!("覆盖提供者注册: {}", token_display);
                        *entry = ProviderEntry::Single(Arc::new(provider));
                    }
                }
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                debug!("注册提供者: {} (multi={})", token_display, incoming_multi);
                vacant.insert(if incoming_multi {
                    ProviderEntry::Multi(vec![Arc::new(provider)])
                } else {
                    ProviderEntry::Single(Arc::new(provider))
                });
            }
        }
        Ok(())
    }

    /// 本地查找令牌对应的条目，不向父级委托
    pub fn get(&self, token: &Token) -> InjectResult<Option<ProviderEntry>> {
        let state = self.state.lock();
        if let Some(reason) = &state.disposed {
            return Err(InjectError::already_disposed("Repository", reason.clone()));
        }
        Ok(state.providers.get(token).cloned())
    }

    /// 取出（或创建）提供者的单例槽位
    ///
    /// # Errors
    /// - 环境仓库禁用单例缓存：[`InjectError::SingletonNotAllowed`]
    /// - 仓库已销毁：[`InjectError::AlreadyDisposed`]
    pub(crate) fn singleton_slot(&self, provider: &Provider) -> InjectResult<Arc<SingletonSlot>> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.disposed {
            return Err(InjectError::already_disposed("Repository", reason.clone()));
        }
        if !self.allow_singletons {
            return Err(InjectError::SingletonNotAllowed {
                token: provider.token().to_string(),
            });
        }
        Ok(state
            .singletons
            .entry(provider.id())
            .or_insert_with(SingletonSlot::new)
            .clone())
    }

    /// 已缓存的单例值（若有）
    pub fn cached_singleton(&self, provider: &Provider) -> InjectResult<Option<InstanceValue>> {
        let state = self.state.lock();
        if let Some(reason) = &state.disposed {
            return Err(InjectError::already_disposed("Repository", reason.clone()));
        }
        Ok(state
            .singletons
            .get(&provider.id())
            .and_then(|slot| slot.cell.get().cloned()))
    }

    /// 销毁仓库：清空两张映射并拒绝后续访问
    ///
    /// # Errors
    /// - 环境仓库不可销毁：[`InjectError::InvalidRegistrationTarget`]
    /// - 重复销毁：[`InjectError::AlreadyDisposed`]
    pub fn dispose(&self, reason: &str) -> InjectResult<()> {
        if self.ambient {
            return Err(InjectError::invalid_target("环境仓库不可销毁"));
        }
        let mut state = self.state.lock();
        if let Some(previous) = &state.disposed {
            return Err(InjectError::already_disposed(
                "Repository",
                previous.clone(),
            ));
        }
        debug!(
            "销毁仓库: {} 个提供者, {} 个单例槽位, 原因: {}",
            state.providers.len(),
            state.singletons.len(),
            reason
        );
        state.providers.clear();
        state.singletons.clear();
        state.disposed = Some(reason.to_string());
        Ok(())
    }

    /// 仓库是否已销毁
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed.is_some()
    }

    /// 已注册的提供者条目数
    pub fn provider_count(&self) -> usize {
        self.state.lock().providers.len()
    }

    /// 已缓存的单例数
    pub fn singleton_count(&self) -> usize {
        self.state
            .lock()
            .singletons
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}
