use ash::vk;

use crate::frame_graph::allocator::{FgCriticality, FgResidentMemory};

/// 缓冲区资源描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgBufferDesc {
    /// 缓冲区大小（字节）
    pub size: vk::DeviceSize,
    /// 缓冲区用途
    pub usage: vk::BufferUsageFlags,
    /// 分配失败时的降级策略
    pub criticality: FgCriticality,
}

impl Default for FgBufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            criticality: FgCriticality::Important,
        }
    }
}

// new & init
impl FgBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_criticality(mut self, criticality: FgCriticality) -> Self {
        self.criticality = criticality;
        self
    }
}

/// 缓冲区资源条目
///
/// 导入的缓冲区在注册时就带着 `vk::Buffer`；自有缓冲区在 compile 时才真正分配，
/// 分配前 `buffer` 为 null。
#[derive(Clone, Debug)]
pub struct FgBufferResource {
    pub desc: FgBufferDesc,
    pub(crate) buffer: vk::Buffer,
    /// 自有资源的内存分配（导入资源始终为 None）
    pub(crate) memory: Option<FgResidentMemory>,
}

// new & init
impl FgBufferResource {
    pub fn owned(desc: FgBufferDesc) -> Self {
        Self {
            desc,
            buffer: vk::Buffer::null(),
            memory: None,
        }
    }

    pub fn imported(buffer: vk::Buffer, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            desc: FgBufferDesc::new(size, usage).with_criticality(FgCriticality::Critical),
            buffer,
            memory: None,
        }
    }
}

// getter
impl FgBufferResource {
    /// 物理 buffer（自有资源分配前为 None）
    #[inline]
    pub fn physical_handle(&self) -> Option<vk::Buffer> {
        (self.buffer != vk::Buffer::null()).then_some(self.buffer)
    }

    #[inline]
    pub fn memory(&self) -> Option<&FgResidentMemory> {
        self.memory.as_ref()
    }
}
