//! 一次 compile 的结果
//!
//! 包含执行顺序、预计算的 barrier 批次以及诊断信息（环、被排除的节点、写冲突），
//! 在下一次 `reset` 之前可以被执行一次。

use std::collections::HashSet;

use ash::vk;

use crate::frame_graph::{
    FgBarrierBatch, FgBarrierClass, FgBarrierPlan, FgCycleReport, FgNodeDeclaration, FgQueue, FgResourceTable, FgWriteConflict,
    FgWriteTracking, NodeId, ResourceId,
};

/// 编译后的帧
#[derive(Clone, Debug, Default)]
pub struct CompiledFrame {
    /// 按注册顺序排列的节点声明快照
    pub(crate) declarations: Vec<FgNodeDeclaration>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) barriers: FgBarrierPlan,

    pub(crate) cycles: Vec<FgCycleReport>,
    pub(crate) cycle_nodes: Vec<NodeId>,
    /// 环上的节点 + 资源失效的节点
    pub(crate) excluded_nodes: Vec<NodeId>,
    /// 引用了失效 / 未分配资源的节点
    pub(crate) invalid_resource_nodes: Vec<NodeId>,
    pub(crate) write_conflicts: Vec<FgWriteConflict>,

    /// 执行顺序中的节点引用到的资源，驱逐时跳过
    pub(crate) referenced: HashSet<ResourceId>,
    pub(crate) edge_count: usize,
}

// getter
impl CompiledFrame {
    #[inline]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    #[inline]
    pub fn batches(&self) -> &[FgBarrierBatch] {
        &self.barriers.batches
    }

    #[inline]
    pub fn barrier_plan(&self) -> &FgBarrierPlan {
        &self.barriers
    }

    #[inline]
    pub fn write_tracking(&self, id: ResourceId) -> Option<&FgWriteTracking> {
        self.barriers.write_tracking.get(&id)
    }

    #[inline]
    pub fn cycles(&self) -> &[FgCycleReport] {
        &self.cycles
    }

    #[inline]
    pub fn cycle_nodes(&self) -> &[NodeId] {
        &self.cycle_nodes
    }

    #[inline]
    pub fn excluded_nodes(&self) -> &[NodeId] {
        &self.excluded_nodes
    }

    #[inline]
    pub fn invalid_resource_nodes(&self) -> &[NodeId] {
        &self.invalid_resource_nodes
    }

    #[inline]
    pub fn write_conflicts(&self) -> &[FgWriteConflict] {
        &self.write_conflicts
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// 是否只编译了部分节点
    #[inline]
    pub fn is_partial(&self) -> bool {
        !self.excluded_nodes.is_empty()
    }

    #[inline]
    pub fn is_referenced(&self, id: ResourceId) -> bool {
        self.referenced.contains(&id)
    }

    #[inline]
    pub fn referenced_resources(&self) -> &HashSet<ResourceId> {
        &self.referenced
    }

    #[inline]
    pub fn declaration(&self, id: NodeId) -> Option<&FgNodeDeclaration> {
        self.declarations.get(id.index())
    }

    #[inline]
    pub fn queue_of(&self, id: NodeId) -> Option<FgQueue> {
        self.declaration(id).map(|d| d.queue)
    }

    /// 本帧是否需要在 `queue` 上录制
    ///
    /// 需要该队列的节点、在该队列上插入 barrier 的节点、以及从该队列 release 的所有权转移都会启用它。
    pub fn uses_queue(&self, queue: FgQueue) -> bool {
        let node_needs = self.order.iter().filter_map(|id| self.declaration(*id)).any(|decl| {
            decl.queue == queue && (decl.records_commands || self.barriers.batches_for(decl.id).next().is_some())
        });
        node_needs
            || self
                .barriers
                .batches
                .iter()
                .any(|b| matches!(b.class, FgBarrierClass::QueueTransfer { src_queue, .. } if src_queue == queue))
    }

    fn node_name(&self, id: NodeId) -> &str {
        self.declaration(id).map(|d| d.name.as_str()).unwrap_or("<unknown>")
    }
}

// 调试方法
impl CompiledFrame {
    /// 打印执行计划（用于调试）
    ///
    /// 输出每个节点的队列、资源读写以及执行前插入的 barrier 批次。
    pub fn print_execution_plan(&self, table: &FgResourceTable) {
        let resource_name = |id: ResourceId| table.get(id).map(|r| r.name.as_str()).unwrap_or("<stale>");

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              FrameGraph Execution Plan                           ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Nodes: {}  |  Edges: {}  |  Execution Order: [{}]",
            self.declarations.len(),
            self.edge_count,
            self.order.iter().map(|id| self.node_name(*id)).collect::<Vec<_>>().join(" → ")
        );
        if self.is_partial() {
            log::info!(
                "║ Excluded: [{}]",
                self.excluded_nodes.iter().map(|id| self.node_name(*id)).collect::<Vec<_>>().join(", ")
            );
        }
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (position, &id) in self.order.iter().enumerate() {
            let Some(decl) = self.declaration(id) else {
                continue;
            };

            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!(
                "│ [{}/{}] Node: \"{}\" ({} queue)",
                position + 1,
                self.order.len(),
                decl.name,
                decl.queue.name()
            );
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            if !decl.inputs.is_empty() {
                log::info!("│ Inputs:");
                for dep in &decl.inputs {
                    log::info!("│   📖 \"{}\" {:?} @ {:?}", resource_name(dep.resource), dep.access, dep.stage);
                }
            }
            if !decl.outputs.is_empty() {
                log::info!("│ Outputs:");
                for dep in &decl.outputs {
                    log::info!("│   ✏️  \"{}\" {:?} @ {:?}", resource_name(dep.resource), dep.access, dep.stage);
                }
            }

            let mut any_batch = false;
            for batch in self.barriers.batches_for(id) {
                any_batch = true;
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!(
                    "│ Barriers ({:?}): {} image, {} buffer  [{} → {}]",
                    batch.class,
                    batch.image_barriers.len(),
                    batch.buffer_barriers.len(),
                    format_pipeline_stage(batch.src_stage),
                    format_pipeline_stage(batch.dst_stage)
                );

                for barrier in &batch.image_barriers {
                    let layout_change = if barrier.has_layout_transition() {
                        format!("{:?} → {:?}", barrier.src_state.layout, barrier.dst_state.layout)
                    } else {
                        format!("{:?} (no layout change)", barrier.src_state.layout)
                    };
                    log::info!("│   🔒 Image \"{}\":", resource_name(barrier.resource));
                    log::info!("│       Layout: {}", layout_change);
                    log::info!(
                        "│       Access: {} → {}",
                        format_access_flags(barrier.src_state.access),
                        format_access_flags(barrier.dst_state.access)
                    );
                    log::info!("│       Aspect: {:?}", barrier.aspect);
                }

                for barrier in &batch.buffer_barriers {
                    log::info!("│   🔒 Buffer \"{}\":", resource_name(barrier.resource));
                    log::info!(
                        "│       Access: {} → {}",
                        format_access_flags(barrier.src_state.access),
                        format_access_flags(barrier.dst_state.access)
                    );
                }
            }
            if !any_batch {
                log::info!("│ No barriers required");
            }

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        for cycle in &self.cycles {
            log::info!(
                "⚠ cycle: {}",
                cycle.nodes.iter().map(|id| self.node_name(*id)).collect::<Vec<_>>().join(" → ")
            );
            for suggestion in &cycle.suggestions {
                log::info!("    💡 {}", suggestion);
            }
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

/// 格式化 PipelineStageFlags2 为可读字符串
pub fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
        (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
        (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
        (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
        (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
        (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
        (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
        (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
    ];

    if stage == vk::PipelineStageFlags2::NONE {
        return "NONE".to_string();
    }
    let names: Vec<&str> = NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect();
    if names.is_empty() { format!("{:?}", stage) } else { names.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
pub fn format_access_flags(access: vk::AccessFlags2) -> String {
    const NAMES: &[(vk::AccessFlags2, &str)] = &[
        (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
        (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
        (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
        (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
        (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
        (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
        (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
        (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
    ];

    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }
    let names: Vec<&str> = NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect();
    if names.is_empty() { format!("{:?}", access) } else { names.join(" | ") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_flags() {
        assert_eq!(format_pipeline_stage(vk::PipelineStageFlags2::NONE), "NONE");
        assert_eq!(
            format_pipeline_stage(vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER),
            "COMPUTE_SHADER | TRANSFER"
        );
        assert_eq!(format_access_flags(vk::AccessFlags2::NONE), "NONE");
        assert_eq!(format_access_flags(vk::AccessFlags2::SHADER_STORAGE_WRITE), "STORAGE_WRITE");
    }

    #[test]
    fn test_empty_frame_uses_no_queue() {
        let frame = CompiledFrame::default();
        assert!(!frame.uses_queue(FgQueue::Graphics));
        assert!(!frame.uses_queue(FgQueue::Compute));
        assert!(!frame.is_partial());
    }

    #[test]
    fn test_host_only_node_uses_no_queue() {
        let host = NodeId::new(0);
        let frame = CompiledFrame {
            declarations: vec![FgNodeDeclaration {
                id: host,
                name: "bookkeeping".to_string(),
                queue: FgQueue::Graphics,
                records_commands: false,
                inputs: vec![],
                outputs: vec![],
            }],
            order: vec![host],
            ..Default::default()
        };
        assert!(!frame.uses_queue(FgQueue::Graphics));
        assert!(!frame.uses_queue(FgQueue::Compute));
    }
}
