//! FrameGraph 错误类型
//!
//! 构造期错误（缺少协作者、配置非法）直接拒绝构造；
//! 每帧错误（compile 失败、执行超时）只影响当前帧，由帧循环决定如何处理。

use ash::vk;
use thiserror::Error;

use crate::frame_graph::{FgMemoryLocation, FgQueue, NodeId, ResourceId};

/// `FrameGraphBuilder::build` 阶段的配置错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FgConfigError {
    #[error("frame graph requires a {0}, but none was provided")]
    MissingCollaborator(&'static str),

    #[error("invalid frame graph settings: {0}")]
    InvalidSettings(String),
}

/// 后端内存分配失败
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FgAllocError {
    #[error("out of {location:?} memory while allocating `{name}` ({size} bytes)")]
    OutOfMemory {
        name: String,
        location: FgMemoryLocation,
        size: u64,
    },

    #[error("backend rejected `{name}`: {reason}")]
    Backend { name: String, reason: String },
}

/// compile 失败：本帧必须跳过，不会提交任何命令
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FgCompileError {
    #[error("critical resource `{name}` ({id:?}) could not be allocated in device-local memory: {source}")]
    CriticalAllocation {
        id: ResourceId,
        name: String,
        #[source]
        source: FgAllocError,
    },

    #[error("dependency cycle detected across {} node(s)", nodes.len())]
    CycleDetected { nodes: Vec<NodeId> },

    #[error("partial compilation left no executable node ({excluded} excluded)")]
    EmptyPartialGraph { excluded: usize },
}

/// 资源表操作错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FgResourceError {
    #[error("resource id {0:?} is stale or was never issued")]
    StaleId(ResourceId),

    #[error("resource id is invalid")]
    InvalidId,
}

/// 驱逐候选无法被驱逐，不致命，压力保留到下一帧
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvictionFailure {
    #[error("resource `{name}` ({id:?}) is still referenced by the compiled frame")]
    StillReferenced { id: ResourceId, name: String },
}

/// 帧级错误
#[derive(Debug, Error)]
pub enum FgError {
    #[error(transparent)]
    Compile(#[from] FgCompileError),

    #[error(transparent)]
    Resource(#[from] FgResourceError),

    #[error("execute() called without a successful compile()")]
    NotCompiled,

    #[error("command recording on the {} queue failed: {result}", queue.name())]
    Recording { queue: FgQueue, result: vk::Result },

    #[error("GPU execution of frame {frame_index} timed out")]
    ExecutionTimeout { frame_index: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FgConfigError::MissingCollaborator("memory allocator");
        assert_eq!(err.to_string(), "frame graph requires a memory allocator, but none was provided");

        let err = FgCompileError::CycleDetected {
            nodes: vec![NodeId::new(0), NodeId::new(1)],
        };
        assert!(err.to_string().contains("2 node(s)"));

        let err: FgError = FgResourceError::StaleId(ResourceId(4)).into();
        assert!(err.to_string().contains("Res#4"));
    }
}
