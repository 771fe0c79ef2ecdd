//! # Injector Common
//!
//! 注入运行时的公共基础层：错误类型、令牌、作用域信息与销毁契约。
//!
//! ## 核心组件
//!
//! - [`Token`] - 解析请求的标识符（类型或符号键，可携带特性要求与作用域限制）
//! - [`ScopeTag`] / [`ScopeInfo`] - 作用域标记与作用域描述
//! - [`InjectError`] - 引擎统一错误分类
//! - [`Disposable`] / [`DisposeOutcome`] - 销毁契约与销毁结果聚合
//!
//! ## 设计原则
//!
//! - 基于 Rust 类型系统的编译时安全
//! - 显式的依赖声明，不依赖运行时反射
//! - 错误按变体区分类别，调用方无需解析错误文本

pub mod disposal;
pub mod errors;
pub mod metadata;
pub mod scope;
pub mod token;

pub use disposal::*;
pub use errors::*;
pub use metadata::*;
pub use scope::*;
pub use token::*;
