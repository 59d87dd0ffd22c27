//! 资源状态定义
//!
//! 节点只声明抽象的 `(FgAccess, FgPipelineStage)`，这里负责把它们映射为
//! Vulkan 的 pipeline stage、access mask 和 image layout。
//! 映射是纯函数，不会缓存在资源记录里。

use ash::vk;

/// 节点对资源的访问方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgAccess {
    Read,
    Write,
    ReadWrite,
}

impl FgAccess {
    #[inline]
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// 合并同一节点对同一资源的多次声明
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        match (self.is_read() || other.is_read(), self.is_write() || other.is_write()) {
            (true, true) => Self::ReadWrite,
            (false, true) => Self::Write,
            _ => Self::Read,
        }
    }
}

/// 节点使用资源的管线阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FgPipelineStage {
    ComputeShader,
    VertexShader,
    FragmentShader,
    ColorAttachment,
    DepthAttachment,
    Transfer,
}

impl FgPipelineStage {
    /// 对应的 Vulkan pipeline stage
    pub fn vk_stage(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::ComputeShader => vk::PipelineStageFlags2::COMPUTE_SHADER,
            Self::VertexShader => vk::PipelineStageFlags2::VERTEX_SHADER,
            Self::FragmentShader => vk::PipelineStageFlags2::FRAGMENT_SHADER,
            Self::ColorAttachment => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthAttachment => {
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
            }
            Self::Transfer => vk::PipelineStageFlags2::TRANSFER,
        }
    }

    #[inline]
    fn is_shader(self) -> bool {
        matches!(self, Self::ComputeShader | Self::VertexShader | Self::FragmentShader)
    }
}

/// 节点执行所在的队列
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FgQueue {
    /// 异步计算队列
    Compute,
    /// 图形（通用）队列
    Graphics,
}

impl FgQueue {
    /// 只需要计算队列的节点放到异步计算队列，其余都走图形队列
    #[inline]
    pub fn from_affinity(needs_compute: bool, needs_graphics: bool) -> Self {
        if needs_compute && !needs_graphics { Self::Compute } else { Self::Graphics }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Graphics => "graphics",
        }
    }
}

/// 所有读类 access，用于计算 barrier 的 src access
const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
        | vk::AccessFlags2::UNIFORM_READ.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::TRANSFER_READ.as_raw()
        | vk::AccessFlags2::MEMORY_READ.as_raw(),
);

/// 所有写类 access
const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
);

/// 图像资源状态
///
/// 描述图像在某个节点中的使用方式，用于自动计算 barrier。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FgImageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for FgImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl FgImageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 未定义状态（帧内首次使用前）
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    /// 由节点声明推导出图像状态
    ///
    /// - shader 阶段：只读走 sampled + `SHADER_READ_ONLY_OPTIMAL`，写走 storage + `GENERAL`
    /// - 附件阶段：对应的附件布局
    /// - transfer：`TRANSFER_SRC/DST_OPTIMAL`，读写同时存在时退化为 `GENERAL`
    pub fn from_usage(stage: FgPipelineStage, access: FgAccess) -> Self {
        let vk_stage = stage.vk_stage();
        let (vk_access, layout) = match stage {
            s if s.is_shader() => match access {
                FgAccess::Read => (vk::AccessFlags2::SHADER_SAMPLED_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                FgAccess::Write => (vk::AccessFlags2::SHADER_STORAGE_WRITE, vk::ImageLayout::GENERAL),
                FgAccess::ReadWrite => (
                    vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                    vk::ImageLayout::GENERAL,
                ),
            },
            FgPipelineStage::ColorAttachment => (
                access_pair(
                    access,
                    vk::AccessFlags2::COLOR_ATTACHMENT_READ,
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                ),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            FgPipelineStage::DepthAttachment => (
                access_pair(
                    access,
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ),
                if access.is_write() {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                },
            ),
            _ => match access {
                FgAccess::Read => (vk::AccessFlags2::TRANSFER_READ, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
                FgAccess::Write => (vk::AccessFlags2::TRANSFER_WRITE, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                FgAccess::ReadWrite => {
                    (vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::TRANSFER_WRITE, vk::ImageLayout::GENERAL)
                }
            },
        };
        Self::new(vk_stage, vk_access, layout)
    }
}

// tools
impl FgImageState {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(WRITE_ACCESS)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !READ_ACCESS
    }
}

/// 缓冲区资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FgBufferState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl Default for FgBufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl FgBufferState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    /// 由节点声明推导出缓冲区状态
    ///
    /// 附件阶段访问缓冲区没有专门的 access bit，退化为 `MEMORY_READ/WRITE`。
    pub fn from_usage(stage: FgPipelineStage, access: FgAccess) -> Self {
        let vk_access = match stage {
            s if s.is_shader() => access_pair(
                access,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::UNIFORM_READ,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            FgPipelineStage::Transfer => {
                access_pair(access, vk::AccessFlags2::TRANSFER_READ, vk::AccessFlags2::TRANSFER_WRITE)
            }
            _ => access_pair(access, vk::AccessFlags2::MEMORY_READ, vk::AccessFlags2::MEMORY_WRITE),
        };
        Self::new(stage.vk_stage(), vk_access)
    }
}

// tools
impl FgBufferState {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(WRITE_ACCESS)
    }

    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !READ_ACCESS
    }
}

#[inline]
fn access_pair(access: FgAccess, read: vk::AccessFlags2, write: vk::AccessFlags2) -> vk::AccessFlags2 {
    match access {
        FgAccess::Read => read,
        FgAccess::Write => write,
        FgAccess::ReadWrite => read | write,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FgAccess::Read, FgAccess::Read, FgAccess::Read)]
    #[case(FgAccess::Read, FgAccess::Write, FgAccess::ReadWrite)]
    #[case(FgAccess::Write, FgAccess::Write, FgAccess::Write)]
    #[case(FgAccess::ReadWrite, FgAccess::Read, FgAccess::ReadWrite)]
    fn test_access_merge(#[case] a: FgAccess, #[case] b: FgAccess, #[case] expected: FgAccess) {
        assert_eq!(a.merge(b), expected);
        assert_eq!(b.merge(a), expected);
    }

    #[rstest]
    #[case(true, false, FgQueue::Compute)]
    #[case(true, true, FgQueue::Graphics)]
    #[case(false, true, FgQueue::Graphics)]
    #[case(false, false, FgQueue::Graphics)]
    fn test_queue_affinity(#[case] compute: bool, #[case] graphics: bool, #[case] expected: FgQueue) {
        assert_eq!(FgQueue::from_affinity(compute, graphics), expected);
    }

    #[test]
    fn test_image_state_from_usage() {
        assert_eq!(
            FgImageState::from_usage(FgPipelineStage::ColorAttachment, FgAccess::Write),
            FgImageState::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(
            FgImageState::from_usage(FgPipelineStage::FragmentShader, FgAccess::Read),
            FgImageState::SHADER_READ_FRAGMENT
        );
        assert_eq!(
            FgImageState::from_usage(FgPipelineStage::ComputeShader, FgAccess::Write),
            FgImageState::STORAGE_WRITE_COMPUTE
        );

        let depth_read = FgImageState::from_usage(FgPipelineStage::DepthAttachment, FgAccess::Read);
        assert_eq!(depth_read.layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert!(depth_read.is_read_only());
    }

    #[test]
    fn test_src_access_strips_reads() {
        let rw = FgBufferState::from_usage(FgPipelineStage::ComputeShader, FgAccess::ReadWrite);
        assert!(rw.is_write());
        assert_eq!(rw.src_access(), vk::AccessFlags2::SHADER_STORAGE_WRITE);

        let read = FgBufferState::from_usage(FgPipelineStage::VertexShader, FgAccess::Read);
        assert!(!read.is_write());
        assert_eq!(read.src_access(), vk::AccessFlags2::NONE);
    }
}
