//! FrameGraph 与构建器
//!
//! 每帧流程：
//!
//! 1. `reset()`：上一帧结束，必要时驱逐，释放到期的内存
//! 2. 节点更新自己的声明
//! 3. `compile()`：分配 → 校验声明 → 建图 → 排序 → barrier 合成
//! 4. `execute(frame_index)`：按顺序录制，成功后写回图像在帧末的状态

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;
use itertools::Itertools;

use crate::frame_graph::{
    CompiledFrame, ExecutionResult, FgBarrierSynthesizer, FgBufferDesc, FgCommandEncoder, FgCompileError,
    FgConfigError, FgDependencyGraph, FgEncoders, FgError, FgEvictionReport, FgImageDesc, FgImageState,
    FgMemoryAllocator, FgNode, FgNodeDeclaration, FgNodeRegistry, FgOwnership, FgQueueExecutor, FgResource,
    FgResourceError, FgResourceTable, FgSetupContext, FgTelemetry, FrameGraphSettings, NodeHandle, NodeId, ResourceId,
    detect_pressure, evict_candidates,
};
use crate::profile_scope;

/// 每个 FrameGraph 的唯一标识，用于拒绝来自其他 graph 的 NodeHandle
static NEXT_GRAPH_UID: AtomicU32 = AtomicU32::new(1);

/// FrameGraph 构建器
///
/// 分配器与两个队列的编码器都必须显式注入。
#[derive(Default)]
pub struct FrameGraphBuilder {
    settings: FrameGraphSettings,
    allocator: Option<Box<dyn FgMemoryAllocator>>,
    graphics_encoder: Option<Box<dyn FgCommandEncoder>>,
    compute_encoder: Option<Box<dyn FgCommandEncoder>>,
}

// builder
impl FrameGraphBuilder {
    pub fn with_settings(mut self, settings: FrameGraphSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_allocator(mut self, allocator: impl FgMemoryAllocator + 'static) -> Self {
        self.allocator = Some(Box::new(allocator));
        self
    }

    pub fn with_graphics_encoder(mut self, encoder: impl FgCommandEncoder + 'static) -> Self {
        self.graphics_encoder = Some(Box::new(encoder));
        self
    }

    pub fn with_compute_encoder(mut self, encoder: impl FgCommandEncoder + 'static) -> Self {
        self.compute_encoder = Some(Box::new(encoder));
        self
    }

    pub fn build(self) -> Result<FrameGraph, FgConfigError> {
        self.settings.validate()?;
        let allocator = self.allocator.ok_or(FgConfigError::MissingCollaborator("memory allocator"))?;
        let graphics_encoder =
            self.graphics_encoder.ok_or(FgConfigError::MissingCollaborator("graphics command encoder"))?;
        let compute_encoder =
            self.compute_encoder.ok_or(FgConfigError::MissingCollaborator("compute command encoder"))?;

        let uid = NEXT_GRAPH_UID.fetch_add(1, Ordering::Relaxed);
        log::info!("FrameGraph#{} created: {:?}", uid, self.settings);

        Ok(FrameGraph {
            uid,
            table: FgResourceTable::new(self.settings.telemetry_history),
            nodes: FgNodeRegistry::default(),
            settings: self.settings,
            allocator,
            graphics_encoder,
            compute_encoder,
            compiled: None,
            frame_index: 0,
            frame_clock: 0,
            memory_pressure: false,
        })
    }
}

/// 帧图
///
/// 持有资源表、节点与注入的协作者。只能在一个线程中使用。
pub struct FrameGraph {
    uid: u32,
    settings: FrameGraphSettings,

    table: FgResourceTable,
    nodes: FgNodeRegistry,

    allocator: Box<dyn FgMemoryAllocator>,
    graphics_encoder: Box<dyn FgCommandEncoder>,
    compute_encoder: Box<dyn FgCommandEncoder>,

    /// 最近一次成功的 compile，`reset` 时丢弃
    compiled: Option<CompiledFrame>,
    /// 最近一次 execute 的帧号
    frame_index: u64,
    /// 单调的帧时钟，每次 `reset` 推进一帧并且不小于 execute 的帧号；驱逐与延迟释放都以它计时
    frame_clock: u64,
    memory_pressure: bool,
}

// new & init
impl FrameGraph {
    pub fn builder() -> FrameGraphBuilder {
        FrameGraphBuilder::default()
    }
}

// resources
impl FrameGraph {
    /// 自有 buffer，Important 级别
    pub fn create_buffer(
        &mut self,
        name: impl Into<String>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> ResourceId {
        self.create_buffer_with(name, FgBufferDesc::new(size, usage))
    }

    pub fn create_buffer_with(&mut self, name: impl Into<String>, desc: FgBufferDesc) -> ResourceId {
        self.compiled = None;
        self.table.create_buffer(name, desc)
    }

    /// 自有 2D 图像，Important 级别
    pub fn create_image(
        &mut self,
        name: impl Into<String>,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> ResourceId {
        self.create_image_with(name, FgImageDesc::new_2d(extent, format, usage))
    }

    pub fn create_image_with(&mut self, name: impl Into<String>, desc: FgImageDesc) -> ResourceId {
        self.compiled = None;
        self.table.create_image(name, desc)
    }

    pub fn import_external_buffer(
        &mut self,
        name: impl Into<String>,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> ResourceId {
        self.compiled = None;
        self.table.import_buffer(name, buffer, size, usage)
    }

    /// 导入外部图像
    ///
    /// - `initial_state`: 图像当前所处的状态，帧内首次使用时只有 layout 不同才插入转换
    pub fn import_external_image(
        &mut self,
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
        initial_state: FgImageState,
    ) -> ResourceId {
        self.compiled = None;
        self.table.import_image(name, image, view, format, extent, initial_state, FgOwnership::ImportedExternal)
    }

    /// swapchain 图像，重建 swapchain 时由 [`Self::remove_swapchain_resources`] 统一移除
    ///
    /// 每帧都从 UNDEFINED 开始，图像内容在首次使用时丢弃。
    pub fn import_swapchain_image(
        &mut self,
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> ResourceId {
        self.compiled = None;
        self.table.import_image(name, image, view, format, extent, FgImageState::UNDEFINED, FgOwnership::Swapchain)
    }

    /// 移除资源，ID 立即失效；自有资源的内存等 frames-in-flight 帧后释放
    pub fn remove_resource(&mut self, id: ResourceId) -> Result<(), FgResourceError> {
        let retire_frame = self.frame_clock + self.settings.frames_in_flight;
        self.table.remove(id, retire_frame)?;
        self.discard_compiled_if_referenced(&[id]);
        Ok(())
    }

    pub fn remove_swapchain_resources(&mut self) -> Vec<ResourceId> {
        let removed = self.table.remove_swapchain();
        if !removed.is_empty() {
            log::info!("FrameGraph: removed {} swapchain image(s)", removed.len());
        }
        self.discard_compiled_if_referenced(&removed);
        removed
    }

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
    pub fn resource(&self, id: ResourceId) -> Option<&FgResource> {
        self.table.get(id)
    }

    #[inline]
    pub fn buffer_desc(&self, id: ResourceId) -> Option<&FgBufferDesc> {
        self.table.buffer(id).map(|b| &b.desc)
    }

    #[inline]
    pub fn image_desc(&self, id: ResourceId) -> Option<&FgImageDesc> {
        self.table.image(id).map(|i| &i.desc)
    }

    #[inline]
    pub fn resources(&self) -> &FgResourceTable {
        &self.table
    }

    fn discard_compiled_if_referenced(&mut self, ids: &[ResourceId]) {
        if self.compiled.as_ref().is_some_and(|c| ids.iter().any(|id| c.is_referenced(*id))) {
            log::debug!("FrameGraph: compiled frame referenced removed resources, recompile required");
            self.compiled = None;
        }
    }
}

// nodes
impl FrameGraph {
    pub fn add_node<N: FgNode + 'static>(&mut self, node: N) -> NodeHandle<N> {
        self.compiled = None;
        let handle = self.nodes.register(node, self.uid);
        log::debug!(
            "FrameGraph: add node `{}` as {:?}",
            self.nodes.name(handle.id()).unwrap_or_default(),
            handle.id()
        );
        handle
    }

    pub fn node<N: FgNode + 'static>(&self, handle: NodeHandle<N>) -> &N {
        self.assert_own_handle(&handle);
        // SAFETY: 句柄由本 graph 的 add_node::<N> 创建，节点只追加不删除
        unsafe { self.nodes.get_typed(handle) }
    }

    pub fn node_mut<N: FgNode + 'static>(&mut self, handle: NodeHandle<N>) -> &mut N {
        self.assert_own_handle(&handle);
        // SAFETY: 同上
        unsafe { self.nodes.get_typed_mut(handle) }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.name(id)
    }

    /// 调用所有节点的 `setup`，节点可以在其中创建私有资源
    pub fn setup_nodes(&mut self) {
        profile_scope!("FrameGraph::setup_nodes");
        self.compiled = None;
        let mut ctx = FgSetupContext {
            table: &mut self.table,
            settings: &self.settings,
        };
        for node in self.nodes.iter_mut() {
            node.setup(&mut ctx);
        }
    }

    fn assert_own_handle<N>(&self, handle: &NodeHandle<N>) {
        assert_eq!(
            handle.graph_uid, self.uid,
            "{:?} was created by FrameGraph#{}, not FrameGraph#{}",
            handle, handle.graph_uid, self.uid
        );
        assert!(handle.id.index() < self.nodes.len(), "{:?} is out of range", handle);
    }
}

// compile
impl FrameGraph {
    /// 编译当前帧；失败时本帧必须跳过
    pub fn compile(&mut self) -> bool {
        match self.try_compile() {
            Ok(_) => true,
            Err(err) => {
                log::error!("FrameGraph: compile failed, frame dropped: {}", err);
                false
            }
        }
    }

    pub fn try_compile(&mut self) -> Result<&CompiledFrame, FgCompileError> {
        profile_scope!("FrameGraph::compile");
        self.compiled = None;

        self.table.realize(self.allocator.as_mut())?;
        if detect_pressure(self.table.telemetry_mut(), self.settings.pressure_fallback_threshold) {
            self.memory_pressure = true;
        }

        let (declarations, invalid_nodes) = self.validated_declarations();
        let flagged: HashSet<NodeId> = invalid_nodes.iter().copied().collect();

        let graph = FgDependencyGraph::build(&declarations);
        for conflict in graph.write_conflicts() {
            log::warn!(
                "FrameGraph: `{}` is written by [{}], ordered by registration",
                self.describe_resource(conflict.resource),
                conflict.writers.iter().map(|id| self.nodes.name(*id).unwrap_or("?")).join(", ")
            );
        }

        let schedule = graph.schedule(&declarations, &flagged, |id| self.describe_resource(id));
        for cycle in &schedule.cycles {
            log::warn!(
                "FrameGraph: cycle {}",
                cycle.nodes.iter().map(|id| self.nodes.name(*id).unwrap_or("?")).join(" → ")
            );
            for suggestion in &cycle.suggestions {
                log::warn!("FrameGraph:   suggestion: {}", suggestion);
            }
        }

        if !schedule.cycle_nodes.is_empty() && self.settings.cycles_are_fatal {
            return Err(FgCompileError::CycleDetected {
                nodes: schedule.cycle_nodes,
            });
        }
        if schedule.order.is_empty() && !schedule.excluded.is_empty() {
            return Err(FgCompileError::EmptyPartialGraph {
                excluded: schedule.excluded.len(),
            });
        }

        let barriers = FgBarrierSynthesizer::new(&schedule.order, &declarations, &self.table).synthesize();
        let referenced: HashSet<ResourceId> = schedule
            .order
            .iter()
            .filter_map(|id| declarations.get(id.index()))
            .flat_map(|decl| decl.dependencies().map(|dep| dep.resource))
            .collect();

        log::info!(
            "FrameGraph: compiled {}/{} node(s), {} edge(s), {} barrier batch(es){}",
            schedule.order.len(),
            declarations.len(),
            graph.edge_count(),
            barriers.batches.len(),
            if schedule.excluded.is_empty() {
                String::new()
            } else {
                format!(", {} excluded", schedule.excluded.len())
            }
        );

        let compiled = self.compiled.insert(CompiledFrame {
            declarations,
            order: schedule.order,
            barriers,
            cycles: schedule.cycles,
            cycle_nodes: schedule.cycle_nodes,
            excluded_nodes: schedule.excluded,
            invalid_resource_nodes: invalid_nodes,
            write_conflicts: graph.write_conflicts().to_vec(),
            referenced,
            edge_count: graph.edge_count(),
        });

        if self.settings.log_execution_plan {
            compiled.print_execution_plan(&self.table);
        }

        Ok(compiled)
    }

    /// 查询声明并丢弃指向失效 / 未分配资源的依赖，返回被标记的节点
    fn validated_declarations(&self) -> (Vec<FgNodeDeclaration>, Vec<NodeId>) {
        let mut declarations = self.nodes.declarations();
        let mut invalid_nodes = Vec::new();

        for decl in &mut declarations {
            let mut dropped = Vec::new();
            let table = &self.table;
            let mut keep = |id: ResourceId| {
                let usable = table.get(id).is_some_and(|r| r.is_resident());
                if !usable {
                    dropped.push(id);
                }
                usable
            };
            decl.inputs.retain(|dep| keep(dep.resource));
            decl.outputs.retain(|dep| keep(dep.resource));

            if !dropped.is_empty() {
                for id in &dropped {
                    let reason = if self.table.was_evicted(*id) {
                        "evicted"
                    } else if self.table.contains(*id) {
                        "not allocated"
                    } else {
                        "stale"
                    };
                    log::warn!("FrameGraph: node `{}` references {} resource {:?}, node skipped", decl.name, reason, id);
                }
                invalid_nodes.push(decl.id);
            }
        }

        (declarations, invalid_nodes)
    }

    fn describe_resource(&self, id: ResourceId) -> String {
        match self.table.get(id) {
            Some(resource) => format!("{} ({})", resource.name, id),
            None => format!("{}", id),
        }
    }

    #[inline]
    pub fn compiled(&self) -> Option<&CompiledFrame> {
        self.compiled.as_ref()
    }

    pub fn print_execution_plan(&self) {
        match &self.compiled {
            Some(compiled) => compiled.print_execution_plan(&self.table),
            None => log::info!("FrameGraph: nothing compiled"),
        }
    }
}

// execute
impl FrameGraph {
    /// 按编译结果录制一帧
    pub fn execute(&mut self, frame_index: u64) -> Result<ExecutionResult, FgError> {
        profile_scope!("FrameGraph::execute");
        let Some(compiled) = self.compiled.as_ref() else {
            log::error!("FrameGraph: execute({}) without a successful compile", frame_index);
            return Err(FgError::NotCompiled);
        };

        self.frame_index = frame_index;
        self.frame_clock = self.frame_clock.max(frame_index);
        let executor = FgQueueExecutor {
            compiled,
            frame_index,
            frame_slot: (frame_index % self.settings.frames_in_flight) as usize,
        };
        let result = executor.run(
            &mut self.nodes,
            &mut self.table,
            FgEncoders {
                graphics: self.graphics_encoder.as_mut(),
                compute: self.compute_encoder.as_mut(),
            },
        )?;

        // 录制成功后，帧末的图像状态成为下一帧的起始状态
        self.table.commit_image_states(&compiled.barrier_plan().final_image_states);
        Ok(result)
    }

    /// 外部的 GPU 挂起检测回调：丢弃当前编译结果，交给帧循环决定如何处理
    pub fn on_execution_timeout(&mut self, frame_index: u64) -> FgError {
        log::error!("FrameGraph: GPU execution of frame {} timed out, compiled frame discarded", frame_index);
        self.compiled = None;
        FgError::ExecutionTimeout { frame_index }
    }

    /// 帧结束：必要时驱逐，释放到期的内存，丢弃本帧编译结果
    ///
    /// compile 失败、没有 execute 的帧同样推进帧时钟，延迟释放的内存照常到期。
    pub fn reset(&mut self) {
        profile_scope!("FrameGraph::reset");
        if self.memory_pressure {
            self.evict_under_pressure();
        }
        self.table.cleanup(self.allocator.as_mut(), self.frame_clock);
        self.compiled = None;
        self.frame_clock += 1;
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn frame_clock(&self) -> u64 {
        self.frame_clock
    }
}

// memory pressure
impl FrameGraph {
    #[inline]
    pub fn signal_memory_pressure(&mut self) {
        log::info!("FrameGraph: memory pressure signalled");
        self.memory_pressure = true;
    }

    #[inline]
    pub fn is_under_memory_pressure(&self) -> bool {
        self.memory_pressure
    }

    /// 立即驱逐；什么都没驱逐掉时压力保留到下一帧
    pub fn evict_under_pressure(&mut self) -> FgEvictionReport {
        profile_scope!("FrameGraph::evict_under_pressure");
        let empty = HashSet::new();
        let referenced = self.compiled.as_ref().map_or(&empty, |c| c.referenced_resources());
        let report = evict_candidates(
            &mut self.table,
            referenced,
            self.frame_clock,
            self.settings.frames_in_flight,
            self.settings.max_evictions_per_frame,
        );
        if report.relieved() {
            self.memory_pressure = false;
        }
        report
    }

    #[inline]
    pub fn telemetry(&self) -> &FgTelemetry {
        self.table.telemetry()
    }

    #[inline]
    pub fn settings(&self) -> &FrameGraphSettings {
        &self.settings
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        for node in self.nodes.iter_mut() {
            node.cleanup();
        }
        self.table.destroy_all(self.allocator.as_mut());
        log::debug!("FrameGraph#{} destroyed", self.uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::{
        FgPipelineStage, FgRecordingContext, FgResourceView, HeadlessAllocator, HeadlessEncoder, ResourceDependency,
    };

    struct Touch {
        name: &'static str,
        reads: Vec<ResourceId>,
        writes: Vec<ResourceId>,
        runs: u32,
    }

    impl Touch {
        fn new(name: &'static str, reads: Vec<ResourceId>, writes: Vec<ResourceId>) -> Self {
            Self {
                name,
                reads,
                writes,
                runs: 0,
            }
        }
    }

    impl FgNode for Touch {
        fn name(&self) -> &str {
            self.name
        }
        fn inputs(&self) -> Vec<ResourceDependency> {
            self.reads.iter().map(|id| ResourceDependency::read(*id, FgPipelineStage::ComputeShader)).collect()
        }
        fn outputs(&self) -> Vec<ResourceDependency> {
            self.writes.iter().map(|id| ResourceDependency::write(*id, FgPipelineStage::ComputeShader)).collect()
        }
        fn needs_compute_queue(&self) -> bool {
            true
        }
        fn needs_graphics_queue(&self) -> bool {
            false
        }
        fn execute(&mut self, _ctx: &mut FgRecordingContext<'_>, _view: &FgResourceView<'_>) {
            self.runs += 1;
        }
    }

    fn headless_graph() -> FrameGraph {
        FrameGraph::builder()
            .with_allocator(HeadlessAllocator::new())
            .with_graphics_encoder(HeadlessEncoder::new(0))
            .with_compute_encoder(HeadlessEncoder::new(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = FrameGraph::builder().with_allocator(HeadlessAllocator::new()).build().err();
        assert_eq!(err, Some(FgConfigError::MissingCollaborator("graphics command encoder")));

        let err = FrameGraph::builder()
            .with_settings(FrameGraphSettings::default().with_frames_in_flight(0))
            .with_allocator(HeadlessAllocator::new())
            .with_graphics_encoder(HeadlessEncoder::new(0))
            .with_compute_encoder(HeadlessEncoder::new(1))
            .build()
            .err();
        assert!(matches!(err, Some(FgConfigError::InvalidSettings(_))));
    }

    #[test]
    fn test_execute_requires_compile() {
        let mut fg = headless_graph();
        assert!(matches!(fg.execute(0), Err(FgError::NotCompiled)));
    }

    #[test]
    fn test_typed_node_access() {
        let mut fg = headless_graph();
        let buf = fg.create_buffer("buf", 64, vk::BufferUsageFlags::STORAGE_BUFFER);
        let handle = fg.add_node(Touch::new("writer", vec![], vec![buf]));

        assert!(fg.compile());
        fg.execute(0).unwrap();
        fg.execute(0).unwrap();
        assert_eq!(fg.node(handle).runs, 2);

        fg.node_mut(handle).runs = 0;
        assert_eq!(fg.node(handle).runs, 0);
    }

    #[test]
    #[should_panic]
    fn test_foreign_handle_panics() {
        let mut a = headless_graph();
        let b = headless_graph();
        let handle = a.add_node(Touch::new("a", vec![], vec![]));
        let _ = b.node(handle);
    }

    #[test]
    fn test_add_node_invalidates_compiled() {
        let mut fg = headless_graph();
        fg.add_node(Touch::new("a", vec![], vec![]));
        assert!(fg.compile());
        assert!(fg.compiled().is_some());
        fg.add_node(Touch::new("b", vec![], vec![]));
        assert!(fg.compiled().is_none());
    }

    #[test]
    fn test_reset_advances_frame_clock() {
        let mut fg = headless_graph();
        fg.reset();
        fg.reset();
        assert_eq!(fg.frame_clock(), 2);

        fg.add_node(Touch::new("a", vec![], vec![]));
        assert!(fg.compile());
        fg.execute(10).unwrap();
        assert_eq!(fg.frame_clock(), 10);
        fg.reset();
        assert_eq!(fg.frame_clock(), 11);
        assert_eq!(fg.frame_index(), 10);
    }

    #[test]
    fn test_timeout_discards_compiled_frame() {
        let mut fg = headless_graph();
        fg.add_node(Touch::new("a", vec![], vec![]));
        assert!(fg.compile());
        let err = fg.on_execution_timeout(9);
        assert!(matches!(err, FgError::ExecutionTimeout { frame_index: 9 }));
        assert!(matches!(fg.execute(9), Err(FgError::NotCompiled)));
    }
}
