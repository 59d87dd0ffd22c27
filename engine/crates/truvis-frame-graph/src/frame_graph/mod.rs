//! FrameGraph - 每帧声明式调度的帧图
//!
//! 节点声明自己读写哪些资源，帧图据此推导依赖、排序，并在异步计算队列与
//! 图形队列之间合成最少的 barrier（包括队列所有权转移），最后按顺序录制命令。
//!
//! # 核心概念
//!
//! - **ResourceId**: 资源表中的资源标识，单调递增，从不复用
//! - **FgNode**: 一个 GPU 工作单元，声明 inputs / outputs 并录制命令
//! - **NodeHandle<N>**: 带类型的节点句柄，取回节点时不需要运行时类型检查
//! - **CompiledFrame**: 一次 compile 的结果：执行顺序、barrier 批次与诊断信息
//! - **FgMemoryAllocator / FgCommandEncoder**: 注入的分配器与命令录制协作者
//!
//! # 使用示例
//!
//! ```ignore
//! let mut fg = FrameGraph::builder()
//!     .with_allocator(VmaMemoryAllocator::new(device.clone(), vma))
//!     .with_graphics_encoder(graphics_encoder)
//!     .with_compute_encoder(compute_encoder)
//!     .build()?;
//!
//! let particles = fg.create_buffer("particles", size, vk::BufferUsageFlags::STORAGE_BUFFER);
//! let color = fg.create_image("color", vk::Format::R8G8B8A8_UNORM, extent, usage);
//! fg.add_node(SimulateNode { particles });
//! fg.add_node(DrawNode { particles, color });
//!
//! loop {
//!     if fg.compile() {
//!         let result = fg.execute(frame_index)?;
//!         // 提交 result 中用到的队列...
//!     }
//!     fg.reset();
//! }
//! ```
//!
//! # 模块结构
//!
//! - `resource_handle`: ResourceId / NodeId / NodeHandle
//! - `resource_state`: 声明到 stage / access / layout 的映射
//! - `resource_table`: 资源表与分级分配
//! - `allocator`: 内存分配协作者
//! - `node`: 节点 trait 与上下文
//! - `graph`: 依赖图、拓扑排序、环分析
//! - `barrier`: barrier 合成
//! - `executor`: 多队列录制
//! - `eviction` / `telemetry`: 内存压力处理
//! - `headless`: 无 GPU 的协作者

mod allocator;
mod barrier;
mod buffer_resource;
mod compiled;
mod error;
mod eviction;
mod executor;
#[allow(clippy::module_inception)]
mod frame_graph;
mod graph;
mod headless;
mod image_resource;
mod node;
mod resource_handle;
mod resource_state;
mod resource_table;
mod settings;
mod telemetry;

// Re-exports
pub use allocator::{
    FgAllocationKey, FgBufferAllocation, FgCriticality, FgImageAllocation, FgMemoryAllocator, FgMemoryLocation,
    FgResidentMemory, VmaMemoryAllocator,
};
pub use barrier::{
    FgBarrierBatch, FgBarrierClass, FgBarrierPlan, FgBarrierSynthesizer, FgBufferBarrierDesc, FgImageBarrierDesc,
    FgWriteTracking,
};
pub use buffer_resource::{FgBufferDesc, FgBufferResource};
pub use compiled::{CompiledFrame, format_access_flags, format_pipeline_stage};
pub use error::{EvictionFailure, FgAllocError, FgCompileError, FgConfigError, FgError, FgResourceError};
pub use eviction::{FgEvictionReport, detect_pressure, evict_candidates, eviction_candidates};
pub(crate) use executor::{FgEncoders, FgQueueExecutor};
pub use executor::{
    ExecutionResult, FgBarrierHalf, FgCommandEncoder, FgLabelColor, FgResolvedBarriers, VkCommandEncoder,
};
pub use frame_graph::{FrameGraph, FrameGraphBuilder};
pub use graph::{FgCycleReport, FgDependencyGraph, FgEdge, FgSchedule, FgWriteConflict};
pub use headless::{HeadlessAllocator, HeadlessCommand, HeadlessEncoder};
pub use image_resource::{FgImageDesc, FgImageResource};
pub use node::{
    FgNode, FgNodeDeclaration, FgNodeRegistry, FgRecordingContext, FgResourceView, FgSetupContext, ResourceDependency,
};
pub use resource_handle::{NodeHandle, NodeId, ResourceId};
pub use resource_state::{FgAccess, FgBufferState, FgImageState, FgPipelineStage, FgQueue};
pub use resource_table::{FgAccessRecord, FgOwnership, FgResource, FgResourceKind, FgResourceTable};
pub use settings::{DefaultFrameGraphSettings, FrameGraphSettings};
pub use telemetry::{FgTelemetry, FgTelemetryEvent};
