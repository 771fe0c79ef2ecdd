//! 元数据定义
//!
//! 提供类型元数据与实例值的公共别名

use std::any::{Any, TypeId};
use std::sync::Arc;

/// 引擎产出的实例值
///
/// 所有被解析出的对象以类型擦除的共享指针形式流转，
/// 由调用方通过令牌携带的类型信息向下转型。
pub type InstanceValue = Arc<dyn Any + Send + Sync>;

/// 类型信息
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    /// 类型名称（不含模块路径）
    pub name: String,
    /// 类型ID
    pub id: TypeId,
    /// 完整类型路径
    pub path: String,
}

impl TypeInfo {
    /// 从类型获取类型信息
    pub fn of<T: 'static>() -> Self {
        let path = std::any::type_name::<T>();
        Self {
            name: path.split("::").last().unwrap_or(path).to_string(),
            id: TypeId::of::<T>(),
            path: path.to_string(),
        }
    }

    /// 获取简短的类型名称
    pub fn short_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample;

    #[test]
    fn type_info_strips_module_path() {
        let info = TypeInfo::of::<Sample>();
        assert_eq!(info.name, "Sample");
        assert!(info.path.ends_with("::Sample"));
        assert_eq!(info.id, TypeId::of::<Sample>());
    }
}
