//! 节点定义与注册表
//!
//! 提供 `FgNode` trait 用于声明一个 GPU 工作单元（compute dispatch 或 graphics pass），
//! 以及节点执行 / setup 时可以访问的上下文。

use ash::vk;

use crate::frame_graph::{
    FgAccess, FgBufferDesc, FgCommandEncoder, FgImageDesc, FgPipelineStage, FgQueue, FgResourceTable,
    FrameGraphSettings, NodeHandle, NodeId, ResourceId,
};

/// 节点对某个资源的一次声明
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceDependency {
    pub resource: ResourceId,
    pub access: FgAccess,
    pub stage: FgPipelineStage,
}

// new & init
impl ResourceDependency {
    #[inline]
    pub fn new(resource: ResourceId, access: FgAccess, stage: FgPipelineStage) -> Self {
        Self {
            resource,
            access,
            stage,
        }
    }

    #[inline]
    pub fn read(resource: ResourceId, stage: FgPipelineStage) -> Self {
        Self::new(resource, FgAccess::Read, stage)
    }

    #[inline]
    pub fn write(resource: ResourceId, stage: FgPipelineStage) -> Self {
        Self::new(resource, FgAccess::Write, stage)
    }

    /// 读-改-写（如累积），不会被视为自环
    #[inline]
    pub fn read_write(resource: ResourceId, stage: FgPipelineStage) -> Self {
        Self::new(resource, FgAccess::ReadWrite, stage)
    }
}

/// FgNode trait
///
/// 定义帧图中的一个节点。节点在 `add_node` 时注册一次，之后每一帧都会在
/// compile 时重新查询 `inputs` / `outputs`，因此声明可以逐帧变化。
///
/// # 示例
///
/// ```ignore
/// struct BlurNode {
///     input: ResourceId,
///     output: ResourceId,
/// }
///
/// impl FgNode for BlurNode {
///     fn name(&self) -> &str { "blur" }
///     fn inputs(&self) -> Vec<ResourceDependency> {
///         vec![ResourceDependency::read(self.input, FgPipelineStage::ComputeShader)]
///     }
///     fn outputs(&self) -> Vec<ResourceDependency> {
///         vec![ResourceDependency::write(self.output, FgPipelineStage::ComputeShader)]
///     }
///     fn needs_compute_queue(&self) -> bool { true }
///     fn needs_graphics_queue(&self) -> bool { false }
///     fn execute(&mut self, ctx: &mut FgRecordingContext, view: &FgResourceView) {
///         let output_view = view.get_image_view(self.output);
///         // 绑定 descriptor sets, dispatch...
///     }
/// }
/// ```
///
/// # 线程安全
///
/// 节点不需要是 Send + Sync，FrameGraph 在单线程中编译与录制。
pub trait FgNode {
    fn name(&self) -> &str;

    /// 节点读取的资源
    fn inputs(&self) -> Vec<ResourceDependency>;

    /// 节点写入的资源
    fn outputs(&self) -> Vec<ResourceDependency>;

    fn needs_compute_queue(&self) -> bool;

    fn needs_graphics_queue(&self) -> bool;

    /// 在帧循环之外调用一次，用于创建节点私有的资源
    fn setup(&mut self, _ctx: &mut FgSetupContext<'_>) {}

    /// 录制节点的命令
    ///
    /// 命令缓冲区已经开始录制，所需的 barrier 已经插入。
    /// 两个队列都不需要的节点见 [`FgRecordingContext::is_recording`]。
    fn execute(&mut self, ctx: &mut FgRecordingContext<'_>, view: &FgResourceView<'_>);

    /// graph 销毁前调用一次
    fn cleanup(&mut self) {}
}

/// 节点执行时的录制上下文
pub struct FgRecordingContext<'a> {
    pub(crate) encoder: &'a mut dyn FgCommandEncoder,
    pub(crate) queue: FgQueue,
    pub(crate) recording: bool,
    pub(crate) frame_index: u64,
    pub(crate) frame_slot: usize,
}

impl FgRecordingContext<'_> {
    /// 当前节点所在队列的命令缓冲区
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.encoder.command_buffer()
    }

    #[inline]
    pub fn encoder(&mut self) -> &mut dyn FgCommandEncoder {
        &mut *self.encoder
    }

    #[inline]
    pub fn queue(&self) -> FgQueue {
        self.queue
    }

    /// 所在队列的命令缓冲区是否处于录制状态
    ///
    /// 不需要任何队列的节点在图形队列未启用时为 false，此时不能录制命令。
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// 当前帧在 frames-in-flight 环中的槽位
    #[inline]
    pub fn frame_slot(&self) -> usize {
        self.frame_slot
    }

    /// 插入一条调试标记
    #[inline]
    pub fn insert_label(&mut self, label: &str) {
        self.encoder.insert_label(label);
    }
}

/// 节点执行时对资源表的只读视图
pub struct FgResourceView<'a> {
    pub(crate) table: &'a FgResourceTable,
}

impl FgResourceView<'_> {
    #[inline]
    pub fn get_buffer(&self, id: ResourceId) -> Option<vk::Buffer> {
        self.table.buffer(id).and_then(|b| b.physical_handle())
    }

    #[inline]
    pub fn get_image(&self, id: ResourceId) -> Option<vk::Image> {
        self.table.image(id).and_then(|i| i.physical_handle())
    }

    #[inline]
    pub fn get_image_view(&self, id: ResourceId) -> Option<vk::ImageView> {
        self.table.image(id).and_then(|i| i.physical_view_handle())
    }

    #[inline]
    pub fn buffer_desc(&self, id: ResourceId) -> Option<&FgBufferDesc> {
        self.table.buffer(id).map(|b| &b.desc)
    }

    #[inline]
    pub fn image_desc(&self, id: ResourceId) -> Option<&FgImageDesc> {
        self.table.image(id).map(|i| &i.desc)
    }
}

/// 节点 setup 时的上下文
///
/// 节点需要的协作者都从这里注入，而不是通过全局查找获取。
pub struct FgSetupContext<'a> {
    pub(crate) table: &'a mut FgResourceTable,
    pub(crate) settings: &'a FrameGraphSettings,
}

impl FgSetupContext<'_> {
    pub fn create_buffer(&mut self, name: impl Into<String>, desc: FgBufferDesc) -> ResourceId {
        self.table.create_buffer(name, desc)
    }

    pub fn create_image(&mut self, name: impl Into<String>, desc: FgImageDesc) -> ResourceId {
        self.table.create_image(name, desc)
    }

    #[inline]
    pub fn frames_in_flight(&self) -> u64 {
        self.settings.frames_in_flight
    }
}

/// 节点在一次 compile 中的声明快照
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgNodeDeclaration {
    pub id: NodeId,
    pub name: String,
    pub queue: FgQueue,
    /// 节点是否需要任一队列；两者都不需要的节点只在 CPU 上执行，不会单独启用队列
    pub records_commands: bool,
    pub inputs: Vec<ResourceDependency>,
    pub outputs: Vec<ResourceDependency>,
}

impl FgNodeDeclaration {
    /// 先 inputs 后 outputs
    #[inline]
    pub fn dependencies(&self) -> impl Iterator<Item = &ResourceDependency> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}

/// 节点注册表
///
/// 节点以 `Box<dyn FgNode>` 存储，只追加不删除，因此 [`NodeId`] 在 graph 生命周期内稳定。
#[derive(Default)]
pub struct FgNodeRegistry {
    nodes: Vec<Box<dyn FgNode>>,
}

// register
impl FgNodeRegistry {
    pub(crate) fn register<N: FgNode + 'static>(&mut self, node: N, graph_uid: u32) -> NodeHandle<N> {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Box::new(node));
        NodeHandle::new(id, graph_uid)
    }
}

// getter & iter
impl FgNodeRegistry {
    /// # Safety
    ///
    /// `handle` 必须由本注册表的 `register::<N>` 返回。
    pub(crate) unsafe fn get_typed<N: FgNode + 'static>(&self, handle: NodeHandle<N>) -> &N {
        let node: &dyn FgNode = self.nodes[handle.id.index()].as_ref();
        unsafe { &*(node as *const dyn FgNode as *const N) }
    }

    /// # Safety
    ///
    /// 同 [`Self::get_typed`]。
    pub(crate) unsafe fn get_typed_mut<N: FgNode + 'static>(&mut self, handle: NodeHandle<N>) -> &mut N {
        let node: &mut dyn FgNode = self.nodes[handle.id.index()].as_mut();
        unsafe { &mut *(node as *mut dyn FgNode as *mut N) }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut (dyn FgNode + 'static)> {
        self.nodes.get_mut(id.index()).map(|n| n.as_mut())
    }

    #[inline]
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.index()).map(|n| n.name())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn FgNode>> {
        self.nodes.iter_mut()
    }

    /// 按注册顺序重新查询所有节点的声明
    pub fn declarations(&self) -> Vec<FgNodeDeclaration> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let (compute, graphics) = (node.needs_compute_queue(), node.needs_graphics_queue());
                FgNodeDeclaration {
                    id: NodeId::new(index),
                    name: node.name().to_string(),
                    queue: FgQueue::from_affinity(compute, graphics),
                    records_commands: compute || graphics,
                    inputs: node.inputs(),
                    outputs: node.outputs(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CounterNode {
        label: &'static str,
        executed: u32,
    }

    impl FgNode for CounterNode {
        fn name(&self) -> &str {
            self.label
        }
        fn inputs(&self) -> Vec<ResourceDependency> {
            vec![]
        }
        fn outputs(&self) -> Vec<ResourceDependency> {
            vec![ResourceDependency::write(ResourceId(1), FgPipelineStage::ComputeShader)]
        }
        fn needs_compute_queue(&self) -> bool {
            true
        }
        fn needs_graphics_queue(&self) -> bool {
            false
        }
        fn execute(&mut self, _ctx: &mut FgRecordingContext<'_>, _view: &FgResourceView<'_>) {
            self.executed += 1;
        }
    }

    #[test]
    fn test_typed_lookup() {
        let mut registry = FgNodeRegistry::default();
        let a = registry.register(
            CounterNode {
                label: "a",
                executed: 0,
            },
            1,
        );
        let b = registry.register(
            CounterNode {
                label: "b",
                executed: 7,
            },
            1,
        );

        unsafe {
            assert_eq!(registry.get_typed(a).label, "a");
            registry.get_typed_mut(b).executed += 1;
            assert_eq!(registry.get_typed(b).executed, 8);
        }
        assert_eq!(registry.name(a.id()), Some("a"));
    }

    #[test]
    fn test_declarations_follow_registration_order() {
        let mut registry = FgNodeRegistry::default();
        registry.register(
            CounterNode {
                label: "first",
                executed: 0,
            },
            1,
        );
        registry.register(
            CounterNode {
                label: "second",
                executed: 0,
            },
            1,
        );

        let decls = registry.declarations();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "first");
        assert_eq!(decls[1].id, NodeId::new(1));
        assert_eq!(decls[0].queue, FgQueue::Compute);
        assert_eq!(decls[0].dependencies().count(), 1);
    }
}
