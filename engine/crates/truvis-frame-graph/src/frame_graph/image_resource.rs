use ash::vk;

use crate::frame_graph::FgImageState;
use crate::frame_graph::allocator::{FgCriticality, FgResidentMemory};

/// 图像资源描述
///
/// 包含创建 `vk::Image` 及其默认视图所需的全部信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgImageDesc {
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub image_type: vk::ImageType,
    /// 分配失败时的降级策略
    pub criticality: FgCriticality,
}

impl Default for FgImageDesc {
    fn default() -> Self {
        Self {
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            samples: vk::SampleCountFlags::TYPE_1,
            image_type: vk::ImageType::TYPE_2D,
            criticality: FgCriticality::Important,
        }
    }
}

// new & init & builder
impl FgImageDesc {
    /// 创建 2D 图像描述
    #[inline]
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            usage,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_criticality(mut self, criticality: FgCriticality) -> Self {
        self.criticality = criticality;
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// 从格式推断 aspect
    pub fn infer_aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        match (self.image_type, self.array_layers > 1) {
            (vk::ImageType::TYPE_1D, false) => vk::ImageViewType::TYPE_1D,
            (vk::ImageType::TYPE_1D, true) => vk::ImageViewType::TYPE_1D_ARRAY,
            (vk::ImageType::TYPE_3D, _) => vk::ImageViewType::TYPE_3D,
            (_, true) => vk::ImageViewType::TYPE_2D_ARRAY,
            _ => vk::ImageViewType::TYPE_2D,
        }
    }

    /// 覆盖整个图像的 subresource range
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: Self::infer_aspect(self.format),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

/// 图像资源条目
#[derive(Clone, Debug)]
pub struct FgImageResource {
    pub desc: FgImageDesc,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) memory: Option<FgResidentMemory>,
    /// 帧开始时图像所处的状态，即上一次执行结束时的状态
    pub(crate) current_state: FgImageState,
}

// new & init
impl FgImageResource {
    pub fn owned(desc: FgImageDesc) -> Self {
        Self {
            desc,
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            memory: None,
            current_state: FgImageState::UNDEFINED,
        }
    }

    pub fn imported(
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
        initial_state: FgImageState,
    ) -> Self {
        Self {
            desc: FgImageDesc::new_2d(extent, format, vk::ImageUsageFlags::empty())
                .with_criticality(FgCriticality::Critical),
            image,
            view,
            memory: None,
            current_state: initial_state,
        }
    }
}

// getters
impl FgImageResource {
    #[inline]
    pub fn infer_aspect(&self) -> vk::ImageAspectFlags {
        FgImageDesc::infer_aspect(self.desc.format)
    }

    #[inline]
    pub fn physical_handle(&self) -> Option<vk::Image> {
        (self.image != vk::Image::null()).then_some(self.image)
    }

    #[inline]
    pub fn physical_view_handle(&self) -> Option<vk::ImageView> {
        (self.view != vk::ImageView::null()).then_some(self.view)
    }

    #[inline]
    pub fn memory(&self) -> Option<&FgResidentMemory> {
        self.memory.as_ref()
    }

    #[inline]
    pub fn current_state(&self) -> FgImageState {
        self.current_state
    }
}
