//! 多队列录制
//!
//! 按编译顺序遍历节点：只开启需要的队列的命令录制，在节点执行前插入到期的
//! barrier 批次（跨队列批次拆分为源队列 release + 目标队列 acquire），
//! 用 debug label 包住节点的命令。提交与 fence 不在这里处理。

use std::ffi::CString;

use ash::vk;

use crate::frame_graph::{
    CompiledFrame, FgBarrierBatch, FgBarrierClass, FgError, FgNodeRegistry, FgQueue, FgRecordingContext,
    FgResourceTable, FgResourceView, NodeId,
};
use crate::profile_scope;

/// debug label 的颜色
pub struct FgLabelColor;
impl FgLabelColor {
    pub const COLOR_FRAME: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
    pub const COLOR_NODE: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
    pub const COLOR_MARKER: [f32; 4] = [1.0, 1.0, 0.0, 1.0];
}

/// 一个 barrier 批次在某个队列上录制的哪一半
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgBarrierHalf {
    /// 同队列的完整 barrier
    Full,
    /// 所有权转移：源队列释放
    Release,
    /// 所有权转移：目标队列获取
    Acquire,
}

/// 解析为 Vulkan 句柄之后的 barrier，可以直接提交给 `cmd_pipeline_barrier2`
#[derive(Clone, Debug)]
pub struct FgResolvedBarriers {
    pub target_node: NodeId,
    pub class: FgBarrierClass,
    pub half: FgBarrierHalf,
    pub buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
    pub image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
}

impl FgResolvedBarriers {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    /// 把批次解析为具体的 Vulkan barrier
    ///
    /// 跳过已经没有物理句柄的资源。release 只保留 src 部分，acquire 只保留 dst 部分，
    /// 两者的 layout 与队列族必须一致。
    pub fn resolve(
        batch: &FgBarrierBatch,
        half: FgBarrierHalf,
        table: &FgResourceTable,
        src_family: u32,
        dst_family: u32,
    ) -> Self {
        let (src_family, dst_family) = match batch.class {
            FgBarrierClass::QueueTransfer { .. } if src_family != dst_family => (src_family, dst_family),
            _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        };

        let mask = |src_stage: vk::PipelineStageFlags2,
                    src_access: vk::AccessFlags2,
                    dst_stage: vk::PipelineStageFlags2,
                    dst_access: vk::AccessFlags2| match half {
            FgBarrierHalf::Full => (src_stage, src_access, dst_stage, dst_access),
            FgBarrierHalf::Release => (src_stage, src_access, vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
            FgBarrierHalf::Acquire => (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, dst_stage, dst_access),
        };

        let buffer_barriers = batch
            .buffer_barriers
            .iter()
            .filter_map(|desc| {
                let Some(buffer) = table.buffer(desc.resource).and_then(|b| b.physical_handle()) else {
                    log::warn!("FrameGraph: buffer {:?} has no physical handle, barrier skipped", desc.resource);
                    return None;
                };
                let (src_stage, src_access, dst_stage, dst_access) =
                    mask(desc.src_state.stage, desc.src_state.access, desc.dst_state.stage, desc.dst_state.access);
                Some(
                    vk::BufferMemoryBarrier2::default()
                        .buffer(buffer)
                        .offset(desc.offset)
                        .size(desc.size)
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family),
                )
            })
            .collect();

        let image_barriers = batch
            .image_barriers
            .iter()
            .filter_map(|desc| {
                let resource = table.image(desc.resource)?;
                let Some(image) = resource.physical_handle() else {
                    log::warn!("FrameGraph: image {:?} has no physical handle, barrier skipped", desc.resource);
                    return None;
                };
                let mut range = resource.desc.full_range();
                range.aspect_mask = desc.aspect;
                let (src_stage, src_access, dst_stage, dst_access) =
                    mask(desc.src_state.stage, desc.src_state.access, desc.dst_state.stage, desc.dst_state.access);
                Some(
                    vk::ImageMemoryBarrier2::default()
                        .image(image)
                        .subresource_range(range)
                        .old_layout(desc.src_state.layout)
                        .new_layout(desc.dst_state.layout)
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family),
                )
            })
            .collect();

        Self {
            target_node: batch.target_node,
            class: batch.class,
            half,
            buffer_barriers,
            image_barriers,
        }
    }
}

/// 命令录制协作者
///
/// 每个队列一个实例。实现者负责命令缓冲区的分配与复用，帧图只负责录制顺序。
pub trait FgCommandEncoder {
    /// 编码器所在队列的队列族
    fn queue_family_index(&self) -> u32;

    /// 开始录制一帧
    fn begin(&mut self, frame_index: u64, label: &str) -> Result<(), vk::Result>;

    fn end(&mut self) -> Result<(), vk::Result>;

    fn pipeline_barrier(&mut self, barriers: &FgResolvedBarriers);

    fn begin_label(&mut self, label: &str, color: [f32; 4]);

    fn end_label(&mut self);

    fn insert_label(&mut self, label: &str);

    /// 当前正在录制的命令缓冲区
    fn command_buffer(&self) -> vk::CommandBuffer;
}

/// 一帧录制的结果，交给提交协作者
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub compute_queue_used: bool,
    pub graphics_queue_used: bool,
    /// frames-in-flight 环中的槽位
    pub frame_slot: usize,
    pub executed_nodes: Vec<NodeId>,
}

/// 两个队列的编码器
pub(crate) struct FgEncoders<'a> {
    pub graphics: &'a mut dyn FgCommandEncoder,
    pub compute: &'a mut dyn FgCommandEncoder,
}

impl FgEncoders<'_> {
    #[inline]
    fn get(&mut self, queue: FgQueue) -> &mut dyn FgCommandEncoder {
        match queue {
            FgQueue::Graphics => &mut *self.graphics,
            FgQueue::Compute => &mut *self.compute,
        }
    }

    #[inline]
    fn family(&self, queue: FgQueue) -> u32 {
        match queue {
            FgQueue::Graphics => self.graphics.queue_family_index(),
            FgQueue::Compute => self.compute.queue_family_index(),
        }
    }
}

/// 按编译结果录制一帧
pub(crate) struct FgQueueExecutor<'a> {
    pub compiled: &'a CompiledFrame,
    pub frame_index: u64,
    pub frame_slot: usize,
}

impl FgQueueExecutor<'_> {
    pub fn run(
        &self,
        nodes: &mut FgNodeRegistry,
        table: &mut FgResourceTable,
        mut encoders: FgEncoders<'_>,
    ) -> Result<ExecutionResult, FgError> {
        profile_scope!("FgQueueExecutor::run");

        let compiled = self.compiled;
        let mut result = ExecutionResult {
            compute_queue_used: compiled.uses_queue(FgQueue::Compute),
            graphics_queue_used: compiled.uses_queue(FgQueue::Graphics),
            frame_slot: self.frame_slot,
            executed_nodes: Vec::with_capacity(compiled.order().len()),
        };

        let used_queues: Vec<FgQueue> = [FgQueue::Compute, FgQueue::Graphics]
            .into_iter()
            .filter(|q| match q {
                FgQueue::Compute => result.compute_queue_used,
                FgQueue::Graphics => result.graphics_queue_used,
            })
            .collect();

        let mut begun: Vec<FgQueue> = Vec::with_capacity(used_queues.len());
        for &queue in &used_queues {
            let label = format!("frame-{}-{}", self.frame_index, queue.name());
            if let Err(err) = encoders.get(queue).begin(self.frame_index, &label) {
                log::error!("FrameGraph: failed to begin {} queue recording: {:?}", queue.name(), err);
                // 已经开始的队列必须结束，编码器才能在下一帧复用
                if let Err(end_err) = Self::end_all(&begun, &mut encoders) {
                    log::warn!("FrameGraph: failed to close recording after begin failure: {}", end_err);
                }
                return Err(FgError::Recording { queue, result: err });
            }
            begun.push(queue);
        }

        for &node_id in compiled.order() {
            let Some(decl) = compiled.declaration(node_id) else {
                continue;
            };

            for batch in compiled.barrier_plan().batches_for(node_id) {
                self.record_batch(batch, decl.queue, table, &mut encoders);
            }

            for dep in decl.dependencies() {
                table.touch(dep.resource, self.frame_index);
            }

            let Some(node) = nodes.get_mut(node_id) else {
                continue;
            };
            log::trace!("FrameGraph: record `{}` on {} queue", decl.name, decl.queue.name());

            // 不需要任何队列的节点可能落在未启用的队列上
            let recording = begun.contains(&decl.queue);
            let encoder = encoders.get(decl.queue);
            if recording {
                encoder.begin_label(&decl.name, FgLabelColor::COLOR_NODE);
            }
            {
                let mut ctx = FgRecordingContext {
                    encoder: &mut *encoder,
                    queue: decl.queue,
                    recording,
                    frame_index: self.frame_index,
                    frame_slot: self.frame_slot,
                };
                let view = FgResourceView { table: &*table };
                node.execute(&mut ctx, &view);
            }
            if recording {
                encoder.end_label();
            }

            result.executed_nodes.push(node_id);
        }

        Self::end_all(&begun, &mut encoders)?;

        Ok(result)
    }

    /// 结束所有队列的录制，某个队列失败时其余队列照常结束，返回第一个错误
    fn end_all(queues: &[FgQueue], encoders: &mut FgEncoders<'_>) -> Result<(), FgError> {
        let mut first_err = None;
        for &queue in queues {
            if let Err(err) = encoders.get(queue).end() {
                log::error!("FrameGraph: failed to end {} queue recording: {:?}", queue.name(), err);
                first_err.get_or_insert(FgError::Recording { queue, result: err });
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn record_batch(
        &self,
        batch: &FgBarrierBatch,
        node_queue: FgQueue,
        table: &FgResourceTable,
        encoders: &mut FgEncoders<'_>,
    ) {
        match batch.class {
            FgBarrierClass::Memory => {
                let family = encoders.family(node_queue);
                let resolved = FgResolvedBarriers::resolve(batch, FgBarrierHalf::Full, table, family, family);
                if !resolved.is_empty() {
                    encoders.get(node_queue).pipeline_barrier(&resolved);
                }
            }
            FgBarrierClass::QueueTransfer { src_queue, dst_queue } => {
                let src_family = encoders.family(src_queue);
                let dst_family = encoders.family(dst_queue);

                let release = FgResolvedBarriers::resolve(batch, FgBarrierHalf::Release, table, src_family, dst_family);
                if !release.is_empty() {
                    encoders.get(src_queue).pipeline_barrier(&release);
                }
                let acquire = FgResolvedBarriers::resolve(batch, FgBarrierHalf::Acquire, table, src_family, dst_family);
                if !acquire.is_empty() {
                    encoders.get(dst_queue).pipeline_barrier(&acquire);
                }
            }
        }
    }
}

/// 基于 ash 的命令录制
///
/// 每个 frames-in-flight 槽位一个命令缓冲区，`begin` 按帧号选择槽位。
/// 命令池的重置由提交协作者在等待 fence 之后完成。
pub struct VkCommandEncoder {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    queue_family_index: u32,
    command_buffers: Vec<vk::CommandBuffer>,
    current: usize,
}

// new & init
impl VkCommandEncoder {
    pub fn new(device: ash::Device, queue_family_index: u32, command_buffers: Vec<vk::CommandBuffer>) -> Self {
        assert!(!command_buffers.is_empty(), "VkCommandEncoder needs at least one command buffer");
        Self {
            device,
            debug_utils: None,
            queue_family_index,
            command_buffers,
            current: 0,
        }
    }

    /// 开启 debug label（需要 VK_EXT_debug_utils）
    pub fn with_debug_utils(mut self, debug_utils: ash::ext::debug_utils::Device) -> Self {
        self.debug_utils = Some(debug_utils);
        self
    }
}

impl FgCommandEncoder for VkCommandEncoder {
    #[inline]
    fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    fn begin(&mut self, frame_index: u64, label: &str) -> Result<(), vk::Result> {
        self.current = (frame_index % self.command_buffers.len() as u64) as usize;
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.command_buffer(), &info)? };
        self.begin_label(label, FgLabelColor::COLOR_FRAME);
        Ok(())
    }

    fn end(&mut self) -> Result<(), vk::Result> {
        self.end_label();
        unsafe { self.device.end_command_buffer(self.command_buffer()) }
    }

    fn pipeline_barrier(&mut self, barriers: &FgResolvedBarriers) {
        let dependency_info = vk::DependencyInfo::default()
            .buffer_memory_barriers(&barriers.buffer_barriers)
            .image_memory_barriers(&barriers.image_barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.command_buffer(), &dependency_info);
        }
    }

    fn begin_label(&mut self, label: &str, color: [f32; 4]) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.command_buffers[self.current],
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(color),
            );
        }
    }

    fn end_label(&mut self) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        unsafe {
            debug_utils.cmd_end_debug_utils_label(self.command_buffers[self.current]);
        }
    }

    fn insert_label(&mut self, label: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        unsafe {
            debug_utils.cmd_insert_debug_utils_label(
                self.command_buffers[self.current],
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(FgLabelColor::COLOR_MARKER),
            );
        }
    }

    #[inline]
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.current]
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::frame_graph::{
        FgBufferBarrierDesc, FgBufferState, FgImageBarrierDesc, FgImageState, FgOwnership, ResourceId,
    };

    fn table_with_resources() -> (FgResourceTable, ResourceId, ResourceId) {
        let mut table = FgResourceTable::new(8);
        let buffer = table.import_buffer("buf", vk::Buffer::from_raw(0x10), 64, vk::BufferUsageFlags::STORAGE_BUFFER);
        let image = table.import_image(
            "img",
            vk::Image::from_raw(0x20),
            vk::ImageView::from_raw(0x21),
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            FgImageState::STORAGE_WRITE_COMPUTE,
            FgOwnership::ImportedExternal,
        );
        (table, buffer, image)
    }

    fn transfer_batch(buffer: ResourceId, image: ResourceId) -> FgBarrierBatch {
        FgBarrierBatch {
            target_node: NodeId::new(1),
            class: FgBarrierClass::QueueTransfer {
                src_queue: FgQueue::Compute,
                dst_queue: FgQueue::Graphics,
            },
            buffer_barriers: vec![FgBufferBarrierDesc {
                resource: buffer,
                src_state: FgBufferState::new(
                    vk::PipelineStageFlags2::COMPUTE_SHADER,
                    vk::AccessFlags2::SHADER_STORAGE_WRITE,
                ),
                dst_state: FgBufferState::new(
                    vk::PipelineStageFlags2::VERTEX_SHADER,
                    vk::AccessFlags2::SHADER_STORAGE_READ,
                ),
                offset: 0,
                size: vk::WHOLE_SIZE,
                src_queue: FgQueue::Compute,
                dst_queue: FgQueue::Graphics,
            }],
            image_barriers: vec![FgImageBarrierDesc {
                resource: image,
                src_state: FgImageState::STORAGE_WRITE_COMPUTE,
                dst_state: FgImageState::SHADER_READ_FRAGMENT,
                aspect: vk::ImageAspectFlags::COLOR,
                src_queue: FgQueue::Compute,
                dst_queue: FgQueue::Graphics,
            }],
            src_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
        }
    }

    #[test]
    fn test_release_keeps_source_half() {
        let (table, buffer, image) = table_with_resources();
        let batch = transfer_batch(buffer, image);

        let release = FgResolvedBarriers::resolve(&batch, FgBarrierHalf::Release, &table, 1, 0);
        let b = &release.buffer_barriers[0];
        assert_eq!(b.src_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(b.dst_stage_mask, vk::PipelineStageFlags2::NONE);
        assert_eq!(b.dst_access_mask, vk::AccessFlags2::NONE);
        assert_eq!((b.src_queue_family_index, b.dst_queue_family_index), (1, 0));

        let i = &release.image_barriers[0];
        assert_eq!(i.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(i.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_acquire_keeps_destination_half() {
        let (table, buffer, image) = table_with_resources();
        let batch = transfer_batch(buffer, image);

        let acquire = FgResolvedBarriers::resolve(&batch, FgBarrierHalf::Acquire, &table, 1, 0);
        let b = &acquire.buffer_barriers[0];
        assert_eq!(b.src_stage_mask, vk::PipelineStageFlags2::NONE);
        assert_eq!(b.src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(b.dst_access_mask, vk::AccessFlags2::SHADER_STORAGE_READ);
        assert_eq!(acquire.image_barriers[0].image, vk::Image::from_raw(0x20));
    }

    #[test]
    fn test_same_family_transfer_ignores_families() {
        let (table, buffer, image) = table_with_resources();
        let batch = transfer_batch(buffer, image);

        let release = FgResolvedBarriers::resolve(&batch, FgBarrierHalf::Release, &table, 0, 0);
        assert_eq!(release.buffer_barriers[0].src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(release.image_barriers[0].dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_stale_resources_are_skipped() {
        let (mut table, buffer, image) = table_with_resources();
        let batch = transfer_batch(buffer, image);
        table.remove(buffer, 0).unwrap();

        let full = FgResolvedBarriers::resolve(&batch, FgBarrierHalf::Full, &table, 0, 0);
        assert!(full.buffer_barriers.is_empty());
        assert_eq!(full.image_barriers.len(), 1);
    }
}
