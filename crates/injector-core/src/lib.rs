//! 注入器解析引擎
//!
//! 提供作用域化的依赖解析运行时：提供者注册进仓库，仓库挂在作用域
//! 树的节点上，解析从最具体的作用域向外查找，按单例 / multi 语义
//! 构造并缓存实例，销毁沿子树级联、按创建逆序执行。
//!
//! 入口是 [`InjectorContext::root`]（或带全局声明提供者的
//! [`InjectorContext::root_with_ambient`]），随后通过
//! [`InjectorContext::register`]、[`InjectorContext::create_child`]、
//! [`InjectorContext::resolve`] 与 [`InjectorContext::dispose`] 驱动
//! 完整的生命周期。

pub mod context;
pub mod disposal;
pub mod provider;
pub mod repository;
pub mod resolver;

pub use context::{AmbientProviders, ContextId, InjectorContext, ScopeArena, ScopeStats};
pub use provider::{
    injectable, Dependency, FactoryCall, Provider, ProviderBuilder, ProviderId, ProviderShape,
    ResolvedDeps,
};
pub use repository::{ProviderEntry, Repository};
pub use resolver::{ResolveHandle, MAX_RESOLUTION_DEPTH};

pub use injector_common::{
    Disposable, DisposeOutcome, DisposerFn, InjectError, InjectResult, InstanceValue, ScopeInfo,
    ScopeTag, Token, TokenKind, TokenTraits, TypeInfo,
};
