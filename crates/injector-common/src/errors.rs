//! 错误类型定义

use thiserror::Error;

/// 注入引擎错误类型
///
/// 按错误类别划分：注册期错误（标志冲突、注册冲突、提供者形态无效、注册目标无效）、
/// 解析期错误（提供者缺失、作用域不匹配、循环依赖）、生命周期错误（使用已销毁对象）。
/// 调用方通过枚举变体区分错误种类，不依赖错误文本。
#[derive(Error, Debug)]
pub enum InjectError {
    #[error("未找到提供者: {token}")]
    MissingProvider { token: String },

    #[error("令牌与提供者标志冲突: {token}, 标志 {flag}: 令牌要求 {token_value}, 提供者声明 {provider_value}")]
    FlagConflict {
        token: String,
        flag: &'static str,
        token_value: bool,
        provider_value: bool,
    },

    #[error("注册冲突: 令牌 {token} 的 multi 属性与已有注册不一致")]
    ConflictingRegistration { token: String },

    #[error("提供者形态无效: {message}")]
    ProviderShape { message: String },

    #[error("注册目标无效: {message}")]
    InvalidRegistrationTarget { message: String },

    #[error("使用已销毁对象: {what}, 销毁原因: {reason}")]
    AlreadyDisposed { what: String, reason: String },

    #[error("作用域不匹配: 令牌 {token} 要求作用域标记 {required_scope}")]
    ScopeMismatch {
        token: String,
        required_scope: String,
    },

    #[error("同步解析遇到异步提供者: {token}")]
    AsyncProvider { token: String },

    #[error("检测到循环依赖: {chain}")]
    CircularDependency { chain: String },

    #[error("解析深度超过上限: {max_depth}")]
    MaxDepthExceeded { max_depth: usize },

    #[error("环境仓库不允许缓存单例: {token}")]
    SingletonNotAllowed { token: String },

    #[error("类型转换失败: 令牌 {token}, 期望类型 {expected}")]
    TypeMismatch {
        token: String,
        expected: &'static str,
    },

    #[error("实例构造失败: {token}, 原因: {source}")]
    Construction {
        token: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("销毁失败: {what}, 原因: {source}")]
    DisposalFailed {
        what: String,
        source: Box<InjectError>,
    },
}

impl InjectError {
    /// 创建使用已销毁对象错误
    pub fn already_disposed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AlreadyDisposed {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// 创建提供者形态错误
    pub fn provider_shape(message: impl Into<String>) -> Self {
        Self::ProviderShape {
            message: message.into(),
        }
    }

    /// 创建注册目标无效错误
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidRegistrationTarget {
            message: message.into(),
        }
    }

    /// 包装用户工厂返回的构造错误
    pub fn construction(
        token: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Construction {
            token: token.into(),
            source: Box::new(source),
        }
    }

    /// 是否为生命周期类错误
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::AlreadyDisposed { .. } | Self::DisposalFailed { .. }
        )
    }

    /// 是否为注册期错误
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::FlagConflict { .. }
                | Self::ConflictingRegistration { .. }
                | Self::ProviderShape { .. }
                | Self::InvalidRegistrationTarget { .. }
        )
    }
}

/// 结果类型别名
pub type InjectResult<T> = Result<T, InjectError>;
