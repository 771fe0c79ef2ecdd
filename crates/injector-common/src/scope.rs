//! 作用域信息
//!
//! 作用域树中每个节点都携带一份 [`ScopeInfo`]，记录唯一标识、
//! 点分层级名称与创建时间，用于日志与诊断输出。

use crate::token::ScopeTag;

/// 作用域描述
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    /// 作用域唯一标识
    pub id: uuid::Uuid,
    /// 点分层级名称（如 "root.request"）
    pub name: String,
    /// 作用域标记
    pub tag: ScopeTag,
    /// 创建时间
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ScopeInfo {
    /// 创建新作用域描述
    pub fn new(tag: impl Into<ScopeTag>) -> Self {
        let tag = tag.into();
        Self {
            id: uuid::Uuid::new_v4(),
            name: tag.to_string(),
            tag,
            created_at: chrono::Utc::now(),
        }
    }

    /// 派生子作用域描述，名称按层级拼接
    pub fn child(&self, tag: impl Into<ScopeTag>) -> Self {
        let tag = tag.into();
        Self {
            id: uuid::Uuid::new_v4(),
            name: format!("{}.{}", self.name, tag),
            tag,
            created_at: chrono::Utc::now(),
        }
    }
}
