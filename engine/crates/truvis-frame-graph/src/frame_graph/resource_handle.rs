//! FrameGraph 句柄定义
//!
//! - [`ResourceId`]：资源表中的资源 ID，单调递增、从 1 开始，0 表示无效
//! - [`NodeId`]：节点在注册表中的索引，注册后在 graph 生命周期内保持稳定
//! - [`NodeHandle`]：带类型标记的节点句柄，用于取回具体的节点类型

use std::fmt;
use std::marker::PhantomData;

/// 资源 ID
///
/// ID 由资源表单调分配，永远不会被复用。资源被移除（swapchain 重建、驱逐）后，
/// 旧 ID 会被所有查询拒绝。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    /// 无效 ID，不会被分配给任何资源
    pub const INVALID: Self = Self(0);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() { write!(f, "Res#{}", self.0) } else { write!(f, "Res#INVALID") }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 节点 ID（注册顺序索引）
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// 节点的注册顺序
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node#{}", self.0)
    }
}

/// 带类型的节点句柄
///
/// 由 `FrameGraph::add_node::<N>()` 返回，携带：
/// - 节点 ID
/// - 创建它的 graph 的标识（防止跨 graph 使用）
/// - 节点的具体类型 `N`（编译期标记，取回节点时不需要运行时类型检查）
pub struct NodeHandle<N> {
    pub(crate) id: NodeId,
    pub(crate) graph_uid: u32,
    _marker: PhantomData<fn() -> N>,
}

impl<N> NodeHandle<N> {
    #[inline]
    pub(crate) fn new(id: NodeId, graph_uid: u32) -> Self {
        Self {
            id,
            graph_uid,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<N> Clone for NodeHandle<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for NodeHandle<N> {}

impl<N> PartialEq for NodeHandle<N> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph_uid == other.graph_uid
    }
}

impl<N> Eq for NodeHandle<N> {}

impl<N> fmt::Debug for NodeHandle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle<{}>({:?})", std::any::type_name::<N>(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_resource_id() {
        assert!(!ResourceId::INVALID.is_valid());
        assert!(!ResourceId::default().is_valid());
        assert!(ResourceId(1).is_valid());
        assert_eq!(format!("{:?}", ResourceId(7)), "Res#7");
    }

    #[test]
    fn test_node_handle_is_copy() {
        struct Dummy;
        let handle = NodeHandle::<Dummy>::new(NodeId::new(3), 1);
        let copy = handle;
        assert_eq!(handle, copy);
        assert_eq!(copy.id().index(), 3);
    }
}
