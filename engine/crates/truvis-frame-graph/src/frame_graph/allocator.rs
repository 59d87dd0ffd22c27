//! 内存分配协作者
//!
//! FrameGraph 不直接持有 `vk_mem::Allocator`，而是通过 [`FgMemoryAllocator`] 注入：
//! - [`VmaMemoryAllocator`]：基于 vk-mem 的真实实现
//! - `HeadlessAllocator`：没有 GPU 时用于测试与工具的实现
//!
//! 分配得到的 [`FgAllocationKey`] 由分配器自己管理，释放时只需要 key。

use ash::vk;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::frame_graph::{FgAllocError, FgBufferDesc, FgImageDesc};

slotmap::new_key_type! {
    /// 分配器内部的分配句柄
    pub struct FgAllocationKey;
}

/// 资源的分配优先级，决定分配失败时可以降级到哪些内存
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FgCriticality {
    /// 只能使用 device-local 内存，失败则整个 compile 失败
    Critical,
    /// 优先 device-local，可以放宽到其他 device 内存类型
    Important,
    /// 任意兼容内存，包括 host-visible
    Flexible,
}

impl FgCriticality {
    /// 依次尝试的内存位置
    pub fn memory_tiers(self) -> &'static [FgMemoryLocation] {
        match self {
            Self::Critical => &[FgMemoryLocation::DeviceLocal],
            Self::Important => &[FgMemoryLocation::DeviceLocal, FgMemoryLocation::DeviceLocalRelaxed],
            Self::Flexible => &[
                FgMemoryLocation::DeviceLocal,
                FgMemoryLocation::DeviceLocalRelaxed,
                FgMemoryLocation::HostVisible,
            ],
        }
    }
}

/// 内存位置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgMemoryLocation {
    /// 严格要求 `DEVICE_LOCAL`
    DeviceLocal,
    /// 偏好 device，但接受分配器挑选的任意 device 可访问内存类型
    DeviceLocalRelaxed,
    /// host-visible 内存
    HostVisible,
}

impl FgMemoryLocation {
    /// 对应的 vk-mem 分配参数
    pub fn vma_create_info(self) -> vk_mem::AllocationCreateInfo {
        match self {
            Self::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
            Self::DeviceLocalRelaxed => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                preferred_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
            Self::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
                ..Default::default()
            },
        }
    }
}

/// 自有资源当前持有的内存
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgResidentMemory {
    pub key: FgAllocationKey,
    pub location: FgMemoryLocation,
}

#[derive(Clone, Copy, Debug)]
pub struct FgBufferAllocation {
    pub buffer: vk::Buffer,
    pub key: FgAllocationKey,
}

#[derive(Clone, Copy, Debug)]
pub struct FgImageAllocation {
    pub image: vk::Image,
    /// 覆盖整个图像的默认视图
    pub view: vk::ImageView,
    pub key: FgAllocationKey,
}

/// 内存分配协作者
pub trait FgMemoryAllocator {
    fn allocate_buffer(
        &mut self,
        name: &str,
        desc: &FgBufferDesc,
        location: FgMemoryLocation,
    ) -> Result<FgBufferAllocation, FgAllocError>;

    fn allocate_image(
        &mut self,
        name: &str,
        desc: &FgImageDesc,
        location: FgMemoryLocation,
    ) -> Result<FgImageAllocation, FgAllocError>;

    /// 释放 key 对应的全部对象（buffer，或 image + 默认视图）
    ///
    /// 调用方负责保证 GPU 已经不再使用该资源。
    fn free(&mut self, key: FgAllocationKey);
}

enum VmaEntry {
    Buffer {
        buffer: vk::Buffer,
        allocation: vk_mem::Allocation,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        allocation: vk_mem::Allocation,
    },
}

/// 基于 vk-mem 的分配器
pub struct VmaMemoryAllocator {
    device: ash::Device,
    allocator: vk_mem::Allocator,
    entries: SlotMap<FgAllocationKey, VmaEntry>,
}

// new & init
impl VmaMemoryAllocator {
    pub fn new(device: ash::Device, allocator: vk_mem::Allocator) -> Self {
        Self {
            device,
            allocator,
            entries: SlotMap::with_key(),
        }
    }
}

// tools
impl VmaMemoryAllocator {
    fn map_vk_error(name: &str, location: FgMemoryLocation, size: u64, err: vk::Result) -> FgAllocError {
        match err {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                FgAllocError::OutOfMemory {
                    name: name.to_string(),
                    location,
                    size,
                }
            }
            other => FgAllocError::Backend {
                name: name.to_string(),
                reason: format!("{other:?}"),
            },
        }
    }

    fn destroy_entry(&self, entry: VmaEntry) {
        unsafe {
            match entry {
                VmaEntry::Buffer { buffer, mut allocation } => {
                    self.allocator.destroy_buffer(buffer, &mut allocation);
                }
                VmaEntry::Image {
                    image,
                    view,
                    mut allocation,
                } => {
                    self.device.destroy_image_view(view, None);
                    self.allocator.destroy_image(image, &mut allocation);
                }
            }
        }
    }
}

impl FgMemoryAllocator for VmaMemoryAllocator {
    fn allocate_buffer(
        &mut self,
        name: &str,
        desc: &FgBufferDesc,
        location: FgMemoryLocation,
    ) -> Result<FgBufferAllocation, FgAllocError> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let alloc_ci = location.vma_create_info();

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }
            .map_err(|e| Self::map_vk_error(name, location, desc.size, e))?;

        let key = self.entries.insert(VmaEntry::Buffer { buffer, allocation });
        Ok(FgBufferAllocation { buffer, key })
    }

    fn allocate_image(
        &mut self,
        name: &str,
        desc: &FgImageDesc,
        location: FgMemoryLocation,
    ) -> Result<FgImageAllocation, FgAllocError> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = location.vma_create_info();
        let approx_size =
            desc.extent.width as u64 * desc.extent.height as u64 * desc.extent.depth as u64 * desc.array_layers as u64;

        let (image, mut allocation) = unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }
            .map_err(|e| Self::map_vk_error(name, location, approx_size, e))?;

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type())
            .format(desc.format)
            .subresource_range(desc.full_range());
        let view = match unsafe { self.device.create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(Self::map_vk_error(name, location, approx_size, e));
            }
        };

        let key = self.entries.insert(VmaEntry::Image {
            image,
            view,
            allocation,
        });
        Ok(FgImageAllocation { image, view, key })
    }

    fn free(&mut self, key: FgAllocationKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.destroy_entry(entry);
        } else {
            log::warn!("VmaMemoryAllocator: free of unknown allocation {key:?}");
        }
    }
}

impl Drop for VmaMemoryAllocator {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        if !entries.is_empty() {
            log::debug!("VmaMemoryAllocator: releasing {} live allocation(s)", entries.len());
        }
        for (_, entry) in entries {
            self.destroy_entry(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criticality_tiers() {
        assert_eq!(FgCriticality::Critical.memory_tiers(), &[FgMemoryLocation::DeviceLocal]);
        assert_eq!(FgCriticality::Important.memory_tiers().len(), 2);
        assert_eq!(FgCriticality::Flexible.memory_tiers().last(), Some(&FgMemoryLocation::HostVisible));
    }

    #[test]
    fn test_vma_create_info() {
        let strict = FgMemoryLocation::DeviceLocal.vma_create_info();
        assert_eq!(strict.required_flags, vk::MemoryPropertyFlags::DEVICE_LOCAL);

        let host = FgMemoryLocation::HostVisible.vma_create_info();
        assert!(host.required_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    }
}
