//! 在无 GPU 的协作者上跑一个三节点的帧：
//! 计算队列模拟粒子 → 图形队列绘制 → 呈现
//!
//! 用于观察执行计划与 barrier，`RUST_LOG=debug` 可以看到更多细节。

use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use truvis_frame_graph::frame_graph::{
    FgNode, FgPipelineStage, FgRecordingContext, FgResourceView, FrameGraph, FrameGraphSettings, HeadlessAllocator,
    HeadlessEncoder, ResourceDependency, ResourceId,
};

struct SimulateNode {
    particles: ResourceId,
}

impl FgNode for SimulateNode {
    fn name(&self) -> &str {
        "simulate"
    }
    fn inputs(&self) -> Vec<ResourceDependency> {
        vec![]
    }
    fn outputs(&self) -> Vec<ResourceDependency> {
        vec![ResourceDependency::write(self.particles, FgPipelineStage::ComputeShader)]
    }
    fn needs_compute_queue(&self) -> bool {
        true
    }
    fn needs_graphics_queue(&self) -> bool {
        false
    }
    fn execute(&mut self, ctx: &mut FgRecordingContext<'_>, view: &FgResourceView<'_>) {
        ctx.insert_label(&format!("dispatch particles {:?}", view.get_buffer(self.particles)));
    }
}

struct DrawNode {
    particles: ResourceId,
    color: ResourceId,
}

impl FgNode for DrawNode {
    fn name(&self) -> &str {
        "draw"
    }
    fn inputs(&self) -> Vec<ResourceDependency> {
        vec![ResourceDependency::read(self.particles, FgPipelineStage::VertexShader)]
    }
    fn outputs(&self) -> Vec<ResourceDependency> {
        vec![ResourceDependency::write(self.color, FgPipelineStage::ColorAttachment)]
    }
    fn needs_compute_queue(&self) -> bool {
        false
    }
    fn needs_graphics_queue(&self) -> bool {
        true
    }
    fn execute(&mut self, ctx: &mut FgRecordingContext<'_>, view: &FgResourceView<'_>) {
        ctx.insert_label(&format!("draw into {:?}", view.get_image_view(self.color)));
    }
}

struct PresentNode {
    color: ResourceId,
}

impl FgNode for PresentNode {
    fn name(&self) -> &str {
        "present"
    }
    fn inputs(&self) -> Vec<ResourceDependency> {
        vec![ResourceDependency::read(self.color, FgPipelineStage::ColorAttachment)]
    }
    fn outputs(&self) -> Vec<ResourceDependency> {
        vec![]
    }
    fn needs_compute_queue(&self) -> bool {
        false
    }
    fn needs_graphics_queue(&self) -> bool {
        true
    }
    fn execute(&mut self, ctx: &mut FgRecordingContext<'_>, _view: &FgResourceView<'_>) {
        ctx.insert_label("present");
    }
}

fn main() -> anyhow::Result<()> {
    truvis_crate_tools::init_log::init_log();

    let graphics = HeadlessEncoder::new(0);
    let compute = HeadlessEncoder::new(1);

    let mut fg = FrameGraph::builder()
        .with_settings(FrameGraphSettings::default().with_log_execution_plan(true))
        .with_allocator(HeadlessAllocator::new())
        .with_graphics_encoder(graphics.clone())
        .with_compute_encoder(compute.clone())
        .build()
        .context("failed to build the frame graph")?;

    let extent = vk::Extent2D {
        width: 1280,
        height: 720,
    };
    let particles = fg.create_buffer("particles", 64 * 1024, vk::BufferUsageFlags::STORAGE_BUFFER);
    let color = fg.import_swapchain_image(
        "swapchain",
        vk::Image::from_raw(0xA000),
        vk::ImageView::from_raw(0xA001),
        vk::Format::B8G8R8A8_SRGB,
        extent,
    );

    fg.add_node(SimulateNode { particles });
    fg.add_node(DrawNode { particles, color });
    fg.add_node(PresentNode { color });

    for frame_index in 0..3 {
        if !fg.compile() {
            log::warn!("frame {} skipped", frame_index);
            fg.reset();
            continue;
        }
        let result = fg.execute(frame_index).with_context(|| format!("failed to record frame {}", frame_index))?;
        log::info!(
            "frame {}: slot {}, compute used: {}, graphics used: {}, nodes: {:?}",
            frame_index,
            result.frame_slot,
            result.compute_queue_used,
            result.graphics_queue_used,
            result.executed_nodes
        );
        fg.reset();
    }

    log::info!(
        "recorded {} graphics / {} compute frame(s), {} queue transfer half-barrier(s)",
        graphics.frames_recorded(),
        compute.frames_recorded(),
        graphics.queue_transfer_count() + compute.queue_transfer_count()
    );
    log::info!("telemetry: {:?}", fg.telemetry());

    Ok(())
}
