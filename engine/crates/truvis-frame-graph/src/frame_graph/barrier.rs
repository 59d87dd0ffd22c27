//! Barrier 自动计算
//!
//! 沿编译后的执行顺序扫描一次，为每个资源维护最近一次写入、当前 layout、
//! 写入后已经同步过的 `(stage, queue, layout)` 集合，据此生成最少的 barrier。
//!
//! 图像从资源表中记录的起始状态出发，帧内首次使用时只有 layout 不同才需要转换。
//!
//! 跨队列的 barrier 归入 `QueueTransfer` 批次，插入到源队列最后一次访问之后、
//! 第一个运行在目标队列上的节点之前。

use ash::vk;
use indexmap::IndexMap;

use crate::frame_graph::{
    FgAccess, FgBufferState, FgImageDesc, FgImageState, FgNodeDeclaration, FgPipelineStage, FgQueue, FgResourceTable,
    NodeId, ResourceId,
};

/// 图像 Barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgImageBarrierDesc {
    pub resource: ResourceId,
    pub src_state: FgImageState,
    pub dst_state: FgImageState,
    pub aspect: vk::ImageAspectFlags,
    pub src_queue: FgQueue,
    pub dst_queue: FgQueue,
}

impl FgImageBarrierDesc {
    #[inline]
    pub fn has_layout_transition(&self) -> bool {
        self.src_state.layout != self.dst_state.layout
    }

    #[inline]
    pub fn is_queue_transfer(&self) -> bool {
        self.src_queue != self.dst_queue
    }
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgBufferBarrierDesc {
    pub resource: ResourceId,
    pub src_state: FgBufferState,
    pub dst_state: FgBufferState,
    pub offset: vk::DeviceSize,
    /// `WHOLE_SIZE` 表示整个缓冲区
    pub size: vk::DeviceSize,
    pub src_queue: FgQueue,
    pub dst_queue: FgQueue,
}

impl FgBufferBarrierDesc {
    #[inline]
    pub fn is_queue_transfer(&self) -> bool {
        self.src_queue != self.dst_queue
    }
}

/// Barrier 批次的类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FgBarrierClass {
    /// 同一队列内的内存 / 执行依赖
    Memory,
    /// 队列所有权转移：源队列 release，目标队列 acquire
    QueueTransfer { src_queue: FgQueue, dst_queue: FgQueue },
}

/// 在 `target_node` 执行前插入的一批 barrier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgBarrierBatch {
    pub target_node: NodeId,
    pub class: FgBarrierClass,
    pub buffer_barriers: Vec<FgBufferBarrierDesc>,
    pub image_barriers: Vec<FgImageBarrierDesc>,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
}

impl FgBarrierBatch {
    fn new(target_node: NodeId, class: FgBarrierClass) -> Self {
        Self {
            target_node,
            class,
            buffer_barriers: Vec::new(),
            image_barriers: Vec::new(),
            src_stage: vk::PipelineStageFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
        }
    }

    #[inline]
    pub fn barrier_count(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len()
    }

    #[inline]
    pub fn is_queue_transfer(&self) -> bool {
        matches!(self.class, FgBarrierClass::QueueTransfer { .. })
    }
}

/// 每个资源在一次 compile 中的最后写入者
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgWriteTracking {
    pub writer: NodeId,
    pub stage: FgPipelineStage,
    pub access: FgAccess,
    pub queue: FgQueue,
}

/// 节点对单个资源的合并使用
#[derive(Clone, Copy, Debug)]
struct MergedUse {
    stage: FgPipelineStage,
    access: FgAccess,
    state: FgImageState,
}

impl MergedUse {
    fn from_dependency(is_image: bool, stage: FgPipelineStage, access: FgAccess) -> Self {
        let state = if is_image {
            FgImageState::from_usage(stage, access)
        } else {
            let buffer = FgBufferState::from_usage(stage, access);
            FgImageState::new(buffer.stage, buffer.access, vk::ImageLayout::UNDEFINED)
        };
        Self { stage, access, state }
    }

    /// 同一节点多次声明同一资源：stage / access 取并集，layout 以写入声明为准
    fn merge(self, other: Self) -> Self {
        let layout = if other.access.is_write() && !self.access.is_write() {
            other.state.layout
        } else {
            self.state.layout
        };
        let stage = if other.access.is_write() && !self.access.is_write() { other.stage } else { self.stage };
        Self {
            stage,
            access: self.access.merge(other.access),
            state: FgImageState::new(self.state.stage | other.state.stage, self.state.access | other.state.access, layout),
        }
    }

    #[inline]
    fn is_write(&self) -> bool {
        self.access.is_write()
    }
}

/// 最近一次写入
#[derive(Clone, Copy, Debug)]
struct LastWrite {
    node: NodeId,
    state: FgImageState,
}

/// 单个资源在扫描过程中的状态
#[derive(Clone, Debug)]
struct ResourceTrack {
    is_image: bool,
    last_write: Option<LastWrite>,
    /// 最后一次访问后的状态，帧内首次访问前为资源表中的起始状态（缓冲区 layout 始终为 UNDEFINED）
    state: FgImageState,
    /// 持有所有权的队列
    owner: FgQueue,
    /// 所有权队列上最后一次访问在执行顺序中的位置
    owner_last_position: usize,
    /// 写入之后（或帧内首次访问之后）的读取者
    readers: Vec<(NodeId, vk::PipelineStageFlags2)>,
    /// 写入之后已经可见的 `(stage, queue, layout)`
    visible: Vec<(vk::PipelineStageFlags2, FgQueue, vk::ImageLayout)>,
}

impl ResourceTrack {
    fn reader_stages_except(&self, node: NodeId) -> vk::PipelineStageFlags2 {
        self.readers
            .iter()
            .filter(|(reader, _)| *reader != node)
            .fold(vk::PipelineStageFlags2::NONE, |acc, (_, stage)| acc | *stage)
    }
}

/// 一次 compile 的 barrier 合成结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FgBarrierPlan {
    /// 按目标节点在执行顺序中的位置排序，同一节点 `Memory` 在前
    pub batches: Vec<FgBarrierBatch>,
    /// 每个资源的最后写入者
    pub write_tracking: IndexMap<ResourceId, FgWriteTracking>,
    /// 本帧访问过的图像在帧末的状态，执行成功后写回资源表
    pub final_image_states: IndexMap<ResourceId, FgImageState>,
}

impl FgBarrierPlan {
    /// 在 `node` 之前插入的批次
    pub fn batches_for(&self, node: NodeId) -> impl Iterator<Item = &FgBarrierBatch> {
        self.batches.iter().filter(move |b| b.target_node == node)
    }

    pub fn buffer_barrier_count(&self) -> usize {
        self.batches.iter().map(|b| b.buffer_barriers.len()).sum()
    }

    pub fn image_barrier_count(&self) -> usize {
        self.batches.iter().map(|b| b.image_barriers.len()).sum()
    }
}

/// 待放入批次的单个 barrier
enum PendingBarrier {
    Buffer(FgBufferBarrierDesc),
    Image(FgImageBarrierDesc),
}

/// Barrier 合成器
pub struct FgBarrierSynthesizer<'a> {
    order: &'a [NodeId],
    declarations: &'a [FgNodeDeclaration],
    table: &'a FgResourceTable,

    tracks: IndexMap<ResourceId, ResourceTrack>,
    batches: IndexMap<(NodeId, FgBarrierClass), FgBarrierBatch>,
    write_tracking: IndexMap<ResourceId, FgWriteTracking>,
}

impl<'a> FgBarrierSynthesizer<'a> {
    pub fn new(order: &'a [NodeId], declarations: &'a [FgNodeDeclaration], table: &'a FgResourceTable) -> Self {
        Self {
            order,
            declarations,
            table,
            tracks: IndexMap::new(),
            batches: IndexMap::new(),
            write_tracking: IndexMap::new(),
        }
    }

    /// 扫描执行顺序，生成 barrier 批次
    pub fn synthesize(mut self) -> FgBarrierPlan {
        for (position, &node) in self.order.iter().enumerate() {
            let Some(decl) = self.declarations.get(node.index()) else {
                continue;
            };
            for (resource, usage) in Self::merged_uses(decl, self.table) {
                self.visit(position, decl, resource, usage);
            }
        }

        let position_of = |node: NodeId| self.order.iter().position(|n| *n == node).unwrap_or(usize::MAX);
        let mut batches: Vec<FgBarrierBatch> = self.batches.into_values().collect();
        batches.sort_by_key(|b| (position_of(b.target_node), b.class));

        let final_image_states =
            self.tracks.iter().filter(|(_, track)| track.is_image).map(|(id, track)| (*id, track.state)).collect();

        FgBarrierPlan {
            batches,
            write_tracking: self.write_tracking,
            final_image_states,
        }
    }

    /// 合并节点对同一资源的多次声明（先 inputs 后 outputs）
    fn merged_uses(decl: &FgNodeDeclaration, table: &FgResourceTable) -> IndexMap<ResourceId, MergedUse> {
        let mut merged: IndexMap<ResourceId, MergedUse> = IndexMap::new();
        for dep in decl.dependencies() {
            let Some(resource) = table.get(dep.resource) else {
                continue;
            };
            let usage = MergedUse::from_dependency(resource.is_image(), dep.stage, dep.access);
            merged
                .entry(dep.resource)
                .and_modify(|existing| *existing = existing.merge(usage))
                .or_insert(usage);
        }
        merged
    }

    fn visit(&mut self, position: usize, decl: &FgNodeDeclaration, resource: ResourceId, usage: MergedUse) {
        let node = decl.id;
        let queue = decl.queue;
        let table = self.table;
        let track = self.tracks.entry(resource).or_insert_with(|| {
            // 帧内首次访问：从上一帧结束时的状态出发，新分配的图像为 UNDEFINED
            let image = table.image(resource);
            ResourceTrack {
                is_image: image.is_some(),
                last_write: None,
                state: image.map(|i| i.current_state()).unwrap_or(FgImageState::UNDEFINED),
                owner: queue,
                owner_last_position: position,
                readers: vec![],
                visible: vec![],
            }
        });

        let layout_changes = track.is_image && track.state.layout != usage.state.layout;
        let mut src: Option<FgImageState> = None;

        match track.last_write {
            Some(write) => {
                let already_visible = !usage.is_write()
                    && !layout_changes
                    && track.visible.contains(&(usage.state.stage, queue, usage.state.layout));
                if !already_visible && write.node != node {
                    let mut src_state = write.state;
                    src_state.access = write.state.src_access();
                    if usage.is_write() || layout_changes {
                        src_state.stage |= track.reader_stages_except(node);
                    }
                    src = Some(src_state);
                }
            }
            None => {
                let reader_stages = track.reader_stages_except(node);
                if layout_changes || (usage.is_write() && reader_stages != vk::PipelineStageFlags2::NONE) {
                    // 读后改 layout 或读后写只需要执行依赖；帧内首次访问则等待起始状态
                    src = Some(if reader_stages == vk::PipelineStageFlags2::NONE {
                        FgImageState::new(track.state.stage, track.state.src_access(), track.state.layout)
                    } else {
                        FgImageState::new(reader_stages, vk::AccessFlags2::NONE, track.state.layout)
                    });
                }
            }
        }

        if let Some(mut src_state) = src {
            src_state.layout = track.state.layout;
            let src_queue = track.owner;
            let class = if src_queue != queue {
                FgBarrierClass::QueueTransfer {
                    src_queue,
                    dst_queue: queue,
                }
            } else {
                FgBarrierClass::Memory
            };
            let target = match class {
                FgBarrierClass::Memory => node,
                FgBarrierClass::QueueTransfer { dst_queue, .. } => {
                    Self::first_node_on_queue_after(self.order, self.declarations, track.owner_last_position, dst_queue)
                        .unwrap_or(node)
                }
            };

            let pending = if track.is_image {
                let aspect = self
                    .table
                    .image(resource)
                    .map(|i| FgImageDesc::infer_aspect(i.desc.format))
                    .unwrap_or(vk::ImageAspectFlags::COLOR);
                PendingBarrier::Image(FgImageBarrierDesc {
                    resource,
                    src_state,
                    dst_state: usage.state,
                    aspect,
                    src_queue,
                    dst_queue: queue,
                })
            } else {
                PendingBarrier::Buffer(FgBufferBarrierDesc {
                    resource,
                    src_state: FgBufferState::new(src_state.stage, src_state.access),
                    dst_state: FgBufferState::new(usage.state.stage, usage.state.access),
                    offset: 0,
                    size: vk::WHOLE_SIZE,
                    src_queue,
                    dst_queue: queue,
                })
            };

            let batch = self.batches.entry((target, class)).or_insert_with(|| FgBarrierBatch::new(target, class));
            batch.src_stage |= src_state.stage;
            batch.dst_stage |= usage.state.stage;
            match pending {
                PendingBarrier::Buffer(b) => batch.buffer_barriers.push(b),
                PendingBarrier::Image(i) => batch.image_barriers.push(i),
            }

            track.owner = queue;
        }

        // 更新跟踪状态
        let Some(track) = self.tracks.get_mut(&resource) else {
            return;
        };
        track.state = usage.state;
        if track.owner == queue {
            track.owner_last_position = position;
        }
        if usage.is_write() {
            track.last_write = Some(LastWrite {
                node,
                state: usage.state,
            });
            track.readers.clear();
            track.visible.clear();
            self.record_write(resource, node, queue, usage);
        } else {
            track.readers.push((node, usage.state.stage));
            track.visible.push((usage.state.stage, queue, usage.state.layout));
        }
    }

    fn record_write(&mut self, resource: ResourceId, node: NodeId, queue: FgQueue, usage: MergedUse) {
        self.write_tracking.insert(
            resource,
            FgWriteTracking {
                writer: node,
                stage: usage.stage,
                access: usage.access,
                queue,
            },
        );
    }

    /// 执行顺序中 `after` 之后第一个运行在 `queue` 上的节点
    fn first_node_on_queue_after(
        order: &[NodeId],
        declarations: &[FgNodeDeclaration],
        after: usize,
        queue: FgQueue,
    ) -> Option<NodeId> {
        order
            .iter()
            .skip(after + 1)
            .find(|n| declarations.get(n.index()).is_some_and(|d| d.queue == queue))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::{FgBufferDesc, FgOwnership, ResourceDependency};

    struct Fixture {
        table: FgResourceTable,
        decls: Vec<FgNodeDeclaration>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: FgResourceTable::new(16),
                decls: Vec::new(),
            }
        }

        fn buffer(&mut self, name: &str) -> ResourceId {
            self.table.create_buffer(name, FgBufferDesc::new(256, vk::BufferUsageFlags::STORAGE_BUFFER))
        }

        /// 导入一张处于 `state` 的图像
        fn image(&mut self, name: &str, state: FgImageState) -> ResourceId {
            self.table.import_image(
                name,
                vk::Image::null(),
                vk::ImageView::null(),
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent2D {
                    width: 8,
                    height: 8,
                },
                state,
                FgOwnership::ImportedExternal,
            )
        }

        fn node(&mut self, queue: FgQueue, inputs: Vec<ResourceDependency>, outputs: Vec<ResourceDependency>) -> NodeId {
            let id = NodeId::new(self.decls.len());
            self.decls.push(FgNodeDeclaration {
                id,
                name: format!("node{}", id.index()),
                queue,
                records_commands: true,
                inputs,
                outputs,
            });
            id
        }

        fn plan(&self, order: &[NodeId]) -> FgBarrierPlan {
            FgBarrierSynthesizer::new(order, &self.decls, &self.table).synthesize()
        }
    }

    #[test]
    fn test_write_then_read_needs_barrier() {
        let mut f = Fixture::new();
        let img = f.image("color", FgImageState::COLOR_ATTACHMENT_WRITE);
        let a = f.node(FgQueue::Graphics, vec![], vec![ResourceDependency::write(img, FgPipelineStage::ColorAttachment)]);
        let b = f.node(FgQueue::Graphics, vec![ResourceDependency::read(img, FgPipelineStage::FragmentShader)], vec![]);

        let plan = f.plan(&[a, b]);
        assert_eq!(plan.batches.len(), 1);
        let batch = &plan.batches[0];
        assert_eq!(batch.target_node, b);
        assert_eq!(batch.class, FgBarrierClass::Memory);
        let barrier = &batch.image_barriers[0];
        assert_eq!(barrier.src_state.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.dst_state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.src_state.access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(plan.write_tracking[&img].writer, a);
    }

    #[test]
    fn test_read_after_read_is_free() {
        let mut f = Fixture::new();
        let img = f.image("lut", FgImageState::from_usage(FgPipelineStage::Transfer, FgAccess::Write));
        let a = f.node(FgQueue::Graphics, vec![], vec![ResourceDependency::write(img, FgPipelineStage::Transfer)]);
        let b = f.node(FgQueue::Graphics, vec![ResourceDependency::read(img, FgPipelineStage::FragmentShader)], vec![]);
        let c = f.node(FgQueue::Graphics, vec![ResourceDependency::read(img, FgPipelineStage::FragmentShader)], vec![]);

        let plan = f.plan(&[a, b, c]);
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].target_node, b);
        assert_eq!(plan.batches_for(c).count(), 0);
    }

    #[test]
    fn test_persistent_reads_need_no_barrier() {
        let mut f = Fixture::new();
        let img = f.image("prepopulated", FgImageState::SHADER_READ_FRAGMENT);
        let nodes: Vec<NodeId> = (0..3)
            .map(|_| f.node(FgQueue::Graphics, vec![ResourceDependency::read(img, FgPipelineStage::FragmentShader)], vec![]))
            .collect();

        let plan = f.plan(&nodes);
        assert!(plan.batches.is_empty());
        assert_eq!(plan.final_image_states[&img], FgImageState::SHADER_READ_FRAGMENT);
    }

    #[test]
    fn test_first_use_transitions_from_undefined() {
        let mut f = Fixture::new();
        let img = f.image("fresh", FgImageState::UNDEFINED);
        let draw = f.node(FgQueue::Graphics, vec![], vec![ResourceDependency::write(img, FgPipelineStage::ColorAttachment)]);

        let plan = f.plan(&[draw]);
        assert_eq!(plan.batches.len(), 1);
        let batch = &plan.batches[0];
        assert_eq!(batch.target_node, draw);
        assert_eq!(batch.class, FgBarrierClass::Memory);
        let barrier = &batch.image_barriers[0];
        assert_eq!(barrier.src_state, FgImageState::UNDEFINED);
        assert_eq!(barrier.dst_state.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            plan.final_image_states[&img],
            FgImageState::from_usage(FgPipelineStage::ColorAttachment, FgAccess::Write)
        );
    }

    #[test]
    fn test_first_use_waits_on_previous_frame_state() {
        let mut f = Fixture::new();
        let img = f.image("history", FgImageState::COLOR_ATTACHMENT_WRITE);
        let buf = f.buffer("untouched_layout");
        let resolve = f.node(
            FgQueue::Graphics,
            vec![
                ResourceDependency::read(img, FgPipelineStage::FragmentShader),
                ResourceDependency::read(buf, FgPipelineStage::FragmentShader),
            ],
            vec![],
        );

        let plan = f.plan(&[resolve]);
        assert_eq!(plan.batches.len(), 1);
        let batch = &plan.batches[0];
        assert!(batch.buffer_barriers.is_empty());
        let barrier = &batch.image_barriers[0];
        assert_eq!(barrier.src_state, FgImageState::COLOR_ATTACHMENT_WRITE);
        assert_eq!(barrier.dst_state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(batch.src_stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert!(!plan.final_image_states.contains_key(&buf));
    }

    #[test]
    fn test_write_after_read_execution_barrier() {
        let mut f = Fixture::new();
        let buf = f.buffer("history");
        let a = f.node(FgQueue::Graphics, vec![ResourceDependency::read(buf, FgPipelineStage::FragmentShader)], vec![]);
        let b = f.node(FgQueue::Graphics, vec![], vec![ResourceDependency::write(buf, FgPipelineStage::Transfer)]);

        let plan = f.plan(&[a, b]);
        assert_eq!(plan.batches.len(), 1);
        let barrier = &plan.batches[0].buffer_barriers[0];
        assert_eq!(barrier.src_state.access, vk::AccessFlags2::NONE);
        assert_eq!(barrier.src_state.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(barrier.dst_state.access, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    fn test_queue_transfer_targets_next_node_on_destination_queue() {
        let mut f = Fixture::new();
        let buf = f.buffer("particles");
        let other = f.buffer("other");
        let sim = f.node(FgQueue::Compute, vec![], vec![ResourceDependency::write(buf, FgPipelineStage::ComputeShader)]);
        let cull = f.node(FgQueue::Compute, vec![], vec![ResourceDependency::write(other, FgPipelineStage::ComputeShader)]);
        let shadow = f.node(FgQueue::Graphics, vec![], vec![]);
        let draw = f.node(FgQueue::Graphics, vec![ResourceDependency::read(buf, FgPipelineStage::VertexShader)], vec![]);

        let plan = f.plan(&[sim, cull, shadow, draw]);
        assert_eq!(plan.batches.len(), 1);
        let batch = &plan.batches[0];
        assert_eq!(batch.target_node, shadow);
        assert_eq!(
            batch.class,
            FgBarrierClass::QueueTransfer {
                src_queue: FgQueue::Compute,
                dst_queue: FgQueue::Graphics
            }
        );
        assert!(batch.buffer_barriers[0].is_queue_transfer());
        assert_eq!(batch.src_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(batch.dst_stage, vk::PipelineStageFlags2::VERTEX_SHADER);
    }

    #[test]
    fn test_transfer_lands_before_first_destination_node() {
        let mut f = Fixture::new();
        let buf = f.buffer("from_compute");
        let img = f.image("from_graphics", FgImageState::COLOR_ATTACHMENT_WRITE);
        let a = f.node(FgQueue::Compute, vec![], vec![ResourceDependency::write(buf, FgPipelineStage::ComputeShader)]);
        let b = f.node(FgQueue::Graphics, vec![], vec![ResourceDependency::write(img, FgPipelineStage::ColorAttachment)]);
        let c = f.node(
            FgQueue::Graphics,
            vec![
                ResourceDependency::read(buf, FgPipelineStage::FragmentShader),
                ResourceDependency::read(img, FgPipelineStage::FragmentShader),
            ],
            vec![],
        );

        let plan = f.plan(&[a, b, c]);
        // 计算队列的 release 可以更早地在 b 之前 acquire
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].target_node, b);
        assert!(plan.batches[0].is_queue_transfer());
        assert_eq!(plan.batches[1].target_node, c);
        assert_eq!(plan.batches[1].class, FgBarrierClass::Memory);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let mut f = Fixture::new();
        let buf = f.buffer("b");
        let img = f.image("i", FgImageState::COLOR_ATTACHMENT_WRITE);
        let a = f.node(FgQueue::Compute, vec![], vec![ResourceDependency::write(buf, FgPipelineStage::ComputeShader)]);
        let b = f.node(
            FgQueue::Graphics,
            vec![ResourceDependency::read(buf, FgPipelineStage::VertexShader)],
            vec![ResourceDependency::write(img, FgPipelineStage::ColorAttachment)],
        );
        let c = f.node(FgQueue::Graphics, vec![ResourceDependency::read(img, FgPipelineStage::ColorAttachment)], vec![]);

        let order = [a, b, c];
        assert_eq!(f.plan(&order), f.plan(&order));
    }
}
