//! 令牌定义
//!
//! 令牌是解析请求的标识符。两个令牌相等当且仅当指向同一类型（`TypeId`）
//! 或携带相同的符号键字符串。令牌可以携带"有主见"的特性要求
//! （multi / singleton），也可以声明作用域限制。
//! 特性与作用域限制不参与相等性比较。

use crate::errors::{InjectError, InjectResult};
use crate::metadata::TypeInfo;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 作用域标记
///
/// 用于给作用域打标签（如 "root"、"http-request"），并作为
/// 令牌/提供者作用域限制的匹配依据。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeTag(Arc<str>);

impl ScopeTag {
    /// 创建新的作用域标记
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// 标记文本
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScopeTag {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 令牌身份
#[derive(Debug, Clone)]
pub enum TokenKind {
    /// 类型令牌，按 `TypeId` 比较
    Type(TypeInfo),
    /// 符号键令牌，按字符串比较
    Key(Arc<str>),
}

/// 有主见令牌携带的特性要求
///
/// `None` 表示令牌对该标志没有要求；`Some` 表示所有提供者必须与之一致。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTraits {
    /// 是否要求 multi（有序多提供者聚合）
    pub multi: Option<bool>,
    /// 是否要求单例缓存
    pub singleton: Option<bool>,
}

impl TokenTraits {
    /// 令牌是否对任何标志有要求
    pub fn is_opinionated(&self) -> bool {
        self.multi.is_some() || self.singleton.is_some()
    }
}

/// 解析令牌
///
/// 相等性与哈希只看身份（类型或符号键），特性要求与作用域限制仅作元数据。
#[derive(Debug, Clone)]
pub struct Token {
    kind: TokenKind,
    traits: TokenTraits,
    restrict_scope: Option<ScopeTag>,
}

impl Token {
    /// 从类型创建令牌
    pub fn of<T: 'static>() -> Self {
        Self {
            kind: TokenKind::Type(TypeInfo::of::<T>()),
            traits: TokenTraits::default(),
            restrict_scope: None,
        }
    }

    /// 从符号键创建令牌
    pub fn key(key: impl Into<Arc<str>>) -> Self {
        Self {
            kind: TokenKind::Key(key.into()),
            traits: TokenTraits::default(),
            restrict_scope: None,
        }
    }

    /// 要求所有提供者声明为 multi
    pub fn with_multi(mut self, multi: bool) -> Self {
        self.traits.multi = Some(multi);
        self
    }

    /// 要求所有提供者声明为单例
    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.traits.singleton = Some(singleton);
        self
    }

    /// 限制令牌只能在携带指定标记的作用域内解析
    pub fn restrict_to(mut self, tag: impl Into<ScopeTag>) -> Self {
        self.restrict_scope = Some(tag.into());
        self
    }

    /// 令牌身份
    pub fn kind(&self) -> &TokenKind {
        &self.kind
    }

    /// 令牌是否有主见（携带特性要求）
    pub fn is_opinionated(&self) -> bool {
        self.traits.is_opinionated()
    }

    /// 令牌的特性要求
    pub fn traits(&self) -> TokenTraits {
        self.traits
    }

    /// 令牌的作用域限制
    pub fn restriction(&self) -> Option<&ScopeTag> {
        self.restrict_scope.as_ref()
    }

    /// 校验令牌是否为合法注册目标
    pub fn validate(&self) -> InjectResult<()> {
        match &self.kind {
            TokenKind::Type(_) => Ok(()),
            TokenKind::Key(key) if key.is_empty() => Err(InjectError::invalid_target(
                "符号键令牌不能为空字符串",
            )),
            TokenKind::Key(_) => Ok(()),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (TokenKind::Type(a), TokenKind::Type(b)) => a.id == b.id,
            (TokenKind::Key(a), TokenKind::Key(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.kind {
            TokenKind::Type(info) => {
                0u8.hash(state);
                info.id.hash(state);
            }
            TokenKind::Key(key) => {
                1u8.hash(state);
                key.hash(state);
            }
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Type(info) => write!(f, "{}", info.name),
            TokenKind::Key(key) => write!(f, "'{key}'"),
        }
    }
}
