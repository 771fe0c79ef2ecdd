//! 提供者定义
//!
//! 提供者是"如何产出某个令牌的值"的声明式配方，形态为三选一的和类型：
//! 预置值（value）、带显式依赖声明的构造器（class）、同步或异步工厂（factory）。
//! 依赖令牌一律显式按顺序声明，取代源自装饰器反射的隐式推断。

use injector_common::{
    DisposerFn, InjectError, InjectResult, InstanceValue, ScopeTag, Token,
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// 提供者唯一标识
///
/// 单例缓存以提供者标识为键，而非令牌：multi 令牌下的每个提供者
/// 各自独立缓存。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(uuid::Uuid);

impl ProviderId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 依赖声明
#[derive(Debug, Clone)]
pub struct Dependency {
    /// 依赖的令牌
    pub token: Token,
    /// 是否可选：可选依赖缺失时以空值继续，必需依赖缺失时整个构造失败
    pub optional: bool,
}

impl Dependency {
    /// 必需依赖
    pub fn required(token: Token) -> Self {
        Self {
            token,
            optional: false,
        }
    }

    /// 可选依赖
    pub fn optional(token: Token) -> Self {
        Self {
            token,
            optional: true,
        }
    }
}

/// 已解析的依赖值，按声明顺序排列
///
/// 可选依赖缺失时对应位置为空。multi 令牌的依赖以
/// `Arc<Vec<InstanceValue>>` 形式占据一个位置。
#[derive(Clone)]
pub struct ResolvedDeps {
    values: Vec<Option<InstanceValue>>,
}

impl ResolvedDeps {
    pub(crate) fn new(values: Vec<Option<InstanceValue>>) -> Self {
        Self { values }
    }

    /// 创建空依赖集（用于无依赖的工厂）
    pub fn empty() -> Self {
        Self { values: Vec::new() }
    }

    /// 依赖个数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否没有依赖
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 取第 `index` 个必需依赖的原始值
    pub fn get(&self, index: usize) -> InjectResult<InstanceValue> {
        self.slot(index)?
            .cloned()
            .ok_or_else(|| InjectError::provider_shape(format!("依赖 #{index} 缺失且不可选")))
    }

    /// 取第 `index` 个必需依赖并向下转型
    pub fn get_as<T: Send + Sync + 'static>(&self, index: usize) -> InjectResult<Arc<T>> {
        downcast::<T>(self.get(index)?, index)
    }

    /// 取第 `index` 个可选依赖的原始值
    pub fn opt(&self, index: usize) -> InjectResult<Option<InstanceValue>> {
        Ok(self.slot(index)?.cloned())
    }

    /// 取第 `index` 个可选依赖并向下转型
    pub fn opt_as<T: Send + Sync + 'static>(&self, index: usize) -> InjectResult<Option<Arc<T>>> {
        match self.slot(index)?.cloned() {
            Some(value) => Ok(Some(downcast::<T>(value, index)?)),
            None => Ok(None),
        }
    }

    /// 取第 `index` 个 multi 依赖并逐项向下转型，保持注册顺序
    pub fn all_as<T: Send + Sync + 'static>(&self, index: usize) -> InjectResult<Vec<Arc<T>>> {
        let value = self.get(index)?;
        let list = value
            .downcast::<Vec<InstanceValue>>()
            .map_err(|_| InjectError::TypeMismatch {
                token: format!("依赖 #{index}"),
                expected: "Vec<InstanceValue>",
            })?;
        list.iter()
            .cloned()
            .map(|item| downcast::<T>(item, index))
            .collect()
    }

    fn slot(&self, index: usize) -> InjectResult<Option<&InstanceValue>> {
        self.values
            .get(index)
            .map(Option::as_ref)
            .ok_or_else(|| {
                InjectError::provider_shape(format!(
                    "依赖下标 {index} 越界，声明的依赖个数为 {}",
                    self.values.len()
                ))
            })
    }
}

fn downcast<T: Send + Sync + 'static>(
    value: InstanceValue,
    index: usize,
) -> InjectResult<Arc<T>> {
    value.downcast::<T>().map_err(|_| InjectError::TypeMismatch {
        token: format!("依赖 #{index}"),
        expected: std::any::type_name::<T>(),
    })
}

/// 同步构造函数类型
pub type SyncFactory =
    Arc<dyn Fn(ResolvedDeps) -> InjectResult<InstanceValue> + Send + Sync>;

/// 异步工厂函数类型
pub type AsyncFactory =
    Arc<dyn Fn(ResolvedDeps) -> BoxFuture<'static, InjectResult<InstanceValue>> + Send + Sync>;

/// 工厂调用方式
#[derive(Clone)]
pub enum FactoryCall {
    /// 同步工厂，调用点不产生 await
    Sync(SyncFactory),
    /// 异步工厂，结果需要 await
    Async(AsyncFactory),
}

/// 提供者形态，三选一的和类型
#[derive(Clone)]
pub enum ProviderShape {
    /// 预置值：直接返回，不参与单例缓存（它本身就是唯一实例）
    Value(InstanceValue),
    /// 构造器：显式声明依赖令牌顺序，同步构造
    Class {
        /// 构造函数
        construct: SyncFactory,
        /// 按顺序声明的依赖
        deps: Vec<Dependency>,
    },
    /// 工厂：同步或异步
    Factory {
        /// 工厂调用
        call: FactoryCall,
        /// 按顺序声明的依赖
        deps: Vec<Dependency>,
    },
}

impl fmt::Debug for ProviderShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value"),
            Self::Class { deps, .. } => f.debug_struct("Class").field("deps", deps).finish(),
            Self::Factory { call, deps } => f
                .debug_struct("Factory")
                .field(
                    "call",
                    &match call {
                        FactoryCall::Sync(_) => "sync",
                        FactoryCall::Async(_) => "async",
                    },
                )
                .field("deps", deps)
                .finish(),
        }
    }
}

/// 提供者：令牌 + 形态 + 生命周期标志
#[derive(Clone)]
pub struct Provider {
    id: ProviderId,
    token: Token,
    shape: ProviderShape,
    multi: Option<bool>,
    singleton: Option<bool>,
    restrict_scope: Option<ScopeTag>,
    nested: Vec<Provider>,
    disposer: Option<DisposerFn>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("shape", &self.shape)
            .field("multi", &self.multi)
            .field("singleton", &self.singleton)
            .field("restrict_scope", &self.restrict_scope)
            .field("nested", &self.nested.len())
            .field("disposer", &self.disposer.is_some())
            .finish()
    }
}

impl Provider {
    fn with_shape(token: Token, shape: ProviderShape) -> Self {
        Self {
            id: ProviderId::new(),
            token,
            shape,
            multi: None,
            singleton: None,
            restrict_scope: None,
            nested: Vec::new(),
            disposer: None,
        }
    }

    /// 预置值提供者
    pub fn value<T: Send + Sync + 'static>(token: Token, value: T) -> Self {
        Self::with_shape(token, ProviderShape::Value(Arc::new(value)))
    }

    /// 预置共享值提供者
    pub fn shared_value(token: Token, value: InstanceValue) -> Self {
        Self::with_shape(token, ProviderShape::Value(value))
    }

    /// 构造器提供者，依赖按声明顺序传入构造函数
    pub fn class<F>(token: Token, deps: Vec<Dependency>, construct: F) -> Self
    where
        F: Fn(ResolvedDeps) -> InjectResult<InstanceValue> + Send + Sync + 'static,
    {
        Self::with_shape(
            token,
            ProviderShape::Class {
                construct: Arc::new(construct),
                deps,
            },
        )
    }

    /// 同步工厂提供者
    pub fn factory<F>(token: Token, deps: Vec<Dependency>, call: F) -> Self
    where
        F: Fn(ResolvedDeps) -> InjectResult<InstanceValue> + Send + Sync + 'static,
    {
        Self::with_shape(
            token,
            ProviderShape::Factory {
                call: FactoryCall::Sync(Arc::new(call)),
                deps,
            },
        )
    }

    /// 异步工厂提供者
    pub fn async_factory<F>(token: Token, deps: Vec<Dependency>, call: F) -> Self
    where
        F: Fn(ResolvedDeps) -> BoxFuture<'static, InjectResult<InstanceValue>>
            + Send
            + Sync
            + 'static,
    {
        Self::with_shape(
            token,
            ProviderShape::Factory {
                call: FactoryCall::Async(Arc::new(call)),
                deps,
            },
        )
    }

    /// 开始构建一个提供者（宽松形态，`build` 时做穷尽校验）
    pub fn for_token(token: Token) -> ProviderBuilder {
        ProviderBuilder::new(token)
    }

    /// 声明为 multi：该令牌聚合有序的多提供者列表
    pub fn multi(mut self) -> Self {
        self.multi = Some(true);
        self
    }

    /// 显式设置 multi 标志
    pub fn with_multi(mut self, multi: bool) -> Self {
        self.multi = Some(multi);
        self
    }

    /// 声明为单例：实例缓存于所属作用域的仓库，供后代作用域复用
    pub fn singleton(mut self) -> Self {
        self.singleton = Some(true);
        self
    }

    /// 显式设置单例标志
    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = Some(singleton);
        self
    }

    /// 限制提供者只在携带指定标记的作用域内可见
    pub fn restrict_scope(mut self, tag: impl Into<ScopeTag>) -> Self {
        self.restrict_scope = Some(tag.into());
        self
    }

    /// 附加仅在本提供者及其依赖解析期间可见的私有提供者
    pub fn with_providers(mut self, providers: Vec<Provider>) -> Self {
        self.nested = providers;
        self
    }

    /// 挂接销毁回调
    pub fn with_disposer(mut self, disposer: DisposerFn) -> Self {
        self.disposer = Some(disposer);
        self
    }

    /// 为实现了 [`injector_common::Disposable`] 的实例类型自动挂接销毁回调
    pub fn disposable<T>(self) -> Self
    where
        T: injector_common::Disposable + 'static,
    {
        self.with_disposer(injector_common::disposer_for::<T>())
    }

    /// 提供者标识
    pub fn id(&self) -> ProviderId {
        self.id
    }

    /// 绑定的令牌
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// 提供者形态
    pub fn shape(&self) -> &ProviderShape {
        &self.shape
    }

    /// 是否为 multi 提供者
    pub fn is_multi(&self) -> bool {
        self.multi.unwrap_or(false)
    }

    /// 是否为单例提供者
    pub fn is_singleton(&self) -> bool {
        self.singleton.unwrap_or(false)
    }

    /// 是否为异步工厂
    pub fn is_async(&self) -> bool {
        matches!(
            self.shape,
            ProviderShape::Factory {
                call: FactoryCall::Async(_),
                ..
            }
        )
    }

    /// 提供者自身的作用域限制
    pub fn restriction(&self) -> Option<&ScopeTag> {
        self.restrict_scope.as_ref()
    }

    /// 私有嵌套提供者
    pub fn nested(&self) -> &[Provider] {
        &self.nested
    }

    /// 销毁回调
    pub fn disposer(&self) -> Option<&DisposerFn> {
        self.disposer.as_ref()
    }

    /// 按声明顺序的依赖列表（预置值无依赖）
    pub fn deps(&self) -> &[Dependency] {
        match &self.shape {
            ProviderShape::Value(_) => &[],
            ProviderShape::Class { deps, .. } | ProviderShape::Factory { deps, .. } => deps,
        }
    }

    /// 与有主见令牌的特性要求对账
    ///
    /// 令牌对某标志有要求时：提供者显式声明了不同的值则注册失败；
    /// 提供者未声明则以令牌要求补齐。
    pub(crate) fn reconcile_token_traits(&mut self) -> InjectResult<()> {
        let traits = self.token.traits();
        if let Some(required) = traits.multi {
            match self.multi {
                Some(declared) if declared != required => {
                    return Err(InjectError::FlagConflict {
                        token: self.token.to_string(),
                        flag: "multi",
                        token_value: required,
                        provider_value: declared,
                    });
                }
                Some(_) => {}
                None => self.multi = Some(required),
            }
        }
        if let Some(required) = traits.singleton {
            match self.singleton {
                Some(declared) if declared != required => {
                    return Err(InjectError::FlagConflict {
                        token: self.token.to_string(),
                        flag: "singleton",
                        token_value: required,
                        provider_value: declared,
                    });
                }
                Some(_) => {}
                None => self.singleton = Some(required),
            }
        }
        Ok(())
    }
}

/// 类型化的自注册便捷函数
///
/// 以 `Token::of::<T>()` 为令牌创建构造器提供者，构造结果自动
/// 装入共享指针。对应"以类自身身份注册"的外部接口。
pub fn injectable<T, F>(deps: Vec<Dependency>, construct: F) -> Provider
where
    T: Send + Sync + 'static,
    F: Fn(ResolvedDeps) -> InjectResult<T> + Send + Sync + 'static,
{
    Provider::class(Token::of::<T>(), deps, move |resolved| {
        Ok(Arc::new(construct(resolved)?) as InstanceValue)
    })
}

/// 提供者构建器
///
/// 逐步装配值、类、工厂三种形态之一及其生命周期标志；
/// 形态在 `build` 时穷尽校验，未设置形态返回 [`InjectError::ProviderShape`]。
pub struct ProviderBuilder {
    token: Token,
    shape: Option<ProviderShape>,
    multi: Option<bool>,
    singleton: Option<bool>,
    restrict_scope: Option<ScopeTag>,
    nested: Vec<Provider>,
    disposer: Option<DisposerFn>,
}

impl ProviderBuilder {
    fn new(token: Token) -> Self {
        Self {
            token,
            shape: None,
            multi: None,
            singleton: None,
            restrict_scope: None,
            nested: Vec::new(),
            disposer: None,
        }
    }

    /// 使用预置值
    pub fn use_value<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.shape = Some(ProviderShape::Value(Arc::new(value)));
        self
    }

    /// 使用构造器
    pub fn use_class<F>(mut self, deps: Vec<Dependency>, construct: F) -> Self
    where
        F: Fn(ResolvedDeps) -> InjectResult<InstanceValue> + Send + Sync + 'static,
    {
        self.shape = Some(ProviderShape::Class {
            construct: Arc::new(construct),
            deps,
        });
        self
    }

    /// 使用同步工厂
    pub fn use_factory<F>(mut self, deps: Vec<Dependency>, call: F) -> Self
    where
        F: Fn(ResolvedDeps) -> InjectResult<InstanceValue> + Send + Sync + 'static,
    {
        self.shape = Some(ProviderShape::Factory {
            call: FactoryCall::Sync(Arc::new(call)),
            deps,
        });
        self
    }

    /// 使用异步工厂
    pub fn use_async_factory<F>(mut self, deps: Vec<Dependency>, call: F) -> Self
    where
        F: Fn(ResolvedDeps) -> BoxFuture<'static, InjectResult<InstanceValue>>
            + Send
            + Sync
            + 'static,
    {
        self.shape = Some(ProviderShape::Factory {
            call: FactoryCall::Async(Arc::new(call)),
            deps,
        });
        self
    }

    /// 设置 multi 标志
    pub fn multi(mut self) -> Self {
        self.multi = Some(true);
        self
    }

    /// 设置单例标志
    pub fn singleton(mut self) -> Self {
        self.singleton = Some(true);
        self
    }

    /// 设置作用域限制
    pub fn restrict_scope(mut self, tag: impl Into<ScopeTag>) -> Self {
        self.restrict_scope = Some(tag.into());
        self
    }

    /// 附加私有嵌套提供者
    pub fn with_providers(mut self, providers: Vec<Provider>) -> Self {
        self.nested = providers;
        self
    }

    /// 挂接销毁回调
    pub fn with_disposer(mut self, disposer: DisposerFn) -> Self {
        self.disposer = Some(disposer);
        self
    }

    /// 完成构建
    ///
    /// # Errors
    /// - 令牌不是合法注册目标时返回 [`InjectError::InvalidRegistrationTarget`]
    /// - 未指定任何形态时返回 [`InjectError::ProviderShape`]
    pub fn build(self) -> InjectResult<Provider> {
        self.token.validate()?;
        let shape = self.shape.ok_or_else(|| {
            InjectError::provider_shape(format!(
                "令牌 {} 的提供者缺少 value/class/factory 形态",
                self.token
            ))
        })?;
        let mut provider = Provider::with_shape(self.token, shape);
        provider.multi = self.multi;
        provider.singleton = self.singleton;
        provider.restrict_scope = self.restrict_scope;
        provider.nested = self.nested;
        provider.disposer = self.disposer;
        Ok(provider)
    }
}
