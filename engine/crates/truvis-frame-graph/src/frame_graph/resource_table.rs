//! 资源表
//!
//! 管理 FrameGraph 中所有的 buffer / image，提供 [`ResourceId`] 到资源条目的映射。
//!
//! - ID 单调分配，从不复用；被移除的 ID 会被所有查询拒绝
//! - 自有资源在 compile 开始时按 [`FgCriticality`] 分级分配
//! - 自有资源的内存释放延迟 `frames_in_flight` 帧，避免 GPU 仍在使用

use ash::vk;
use indexmap::IndexMap;

use crate::frame_graph::{
    FgAllocationKey, FgBufferDesc, FgBufferResource, FgCompileError, FgCriticality, FgImageDesc, FgImageResource,
    FgImageState, FgMemoryAllocator, FgResidentMemory, FgResourceError, FgTelemetry, ResourceId,
};

/// 资源的所有权
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgOwnership {
    /// 由资源表分配与销毁
    Owned,
    /// 外部导入，资源表从不销毁
    ImportedExternal,
    /// swapchain 图像，随 swapchain 重建整体移除
    Swapchain,
}

#[derive(Clone, Debug)]
pub enum FgResourceKind {
    Buffer(FgBufferResource),
    Image(FgImageResource),
}

/// 资源访问记录，用于 LRU 驱逐
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FgAccessRecord {
    pub last_access_frame: u64,
    pub access_count: u64,
}

/// 资源条目
#[derive(Clone, Debug)]
pub struct FgResource {
    pub id: ResourceId,
    pub name: String,
    pub kind: FgResourceKind,
    pub ownership: FgOwnership,
    pub access: FgAccessRecord,
}

// getter
impl FgResource {
    #[inline]
    pub fn criticality(&self) -> FgCriticality {
        match &self.kind {
            FgResourceKind::Buffer(buffer) => buffer.desc.criticality,
            FgResourceKind::Image(image) => image.desc.criticality,
        }
    }

    #[inline]
    pub fn memory(&self) -> Option<&FgResidentMemory> {
        match &self.kind {
            FgResourceKind::Buffer(buffer) => buffer.memory(),
            FgResourceKind::Image(image) => image.memory(),
        }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        self.ownership == FgOwnership::Owned
    }

    /// 是否已经拥有可用的物理资源（导入资源总是可用）
    #[inline]
    pub fn is_resident(&self) -> bool {
        !self.is_owned() || self.memory().is_some()
    }

    #[inline]
    pub fn is_image(&self) -> bool {
        matches!(self.kind, FgResourceKind::Image(_))
    }

    #[inline]
    pub fn as_buffer(&self) -> Option<&FgBufferResource> {
        match &self.kind {
            FgResourceKind::Buffer(buffer) => Some(buffer),
            FgResourceKind::Image(_) => None,
        }
    }

    #[inline]
    pub fn as_image(&self) -> Option<&FgImageResource> {
        match &self.kind {
            FgResourceKind::Image(image) => Some(image),
            FgResourceKind::Buffer(_) => None,
        }
    }

    fn take_memory(&mut self) -> Option<FgResidentMemory> {
        match &mut self.kind {
            FgResourceKind::Buffer(buffer) => {
                buffer.buffer = vk::Buffer::null();
                buffer.memory.take()
            }
            FgResourceKind::Image(image) => {
                image.image = vk::Image::null();
                image.view = vk::ImageView::null();
                image.memory.take()
            }
        }
    }
}

/// 资源表
pub struct FgResourceTable {
    resources: IndexMap<ResourceId, FgResource>,
    /// 下一个要分配的 ID，0 保留给 INVALID
    next_id: u32,
    /// 被驱逐过的 ID 及其内存的释放帧，仅用于诊断，内存释放后一并清除
    evicted: IndexMap<ResourceId, u64>,

    /// 待释放的内存：(key, 可以释放的帧)
    pending_frees: Vec<(FgAllocationKey, u64)>,

    telemetry: FgTelemetry,
}

// new & init
impl FgResourceTable {
    pub fn new(telemetry_history: usize) -> Self {
        Self {
            resources: IndexMap::new(),
            next_id: 1,
            evicted: IndexMap::new(),
            pending_frees: Vec::new(),
            telemetry: FgTelemetry::new(telemetry_history),
        }
    }

    fn next_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id = self.next_id.checked_add(1).expect("ResourceId space exhausted");
        id
    }

    fn insert(&mut self, name: impl Into<String>, kind: FgResourceKind, ownership: FgOwnership) -> ResourceId {
        let id = self.next_id();
        let name = name.into();
        log::debug!("FrameGraph: register {:?} resource `{}` as {:?}", ownership, name, id);
        self.resources.insert(
            id,
            FgResource {
                id,
                name,
                kind,
                ownership,
                access: FgAccessRecord::default(),
            },
        );
        id
    }
}

// register
impl FgResourceTable {
    /// 注册自有 buffer，实际分配推迟到下一次 compile
    pub fn create_buffer(&mut self, name: impl Into<String>, desc: FgBufferDesc) -> ResourceId {
        self.insert(name, FgResourceKind::Buffer(FgBufferResource::owned(desc)), FgOwnership::Owned)
    }

    /// 注册自有 image，实际分配推迟到下一次 compile
    pub fn create_image(&mut self, name: impl Into<String>, desc: FgImageDesc) -> ResourceId {
        self.insert(name, FgResourceKind::Image(FgImageResource::owned(desc)), FgOwnership::Owned)
    }

    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> ResourceId {
        self.insert(
            name,
            FgResourceKind::Buffer(FgBufferResource::imported(buffer, size, usage)),
            FgOwnership::ImportedExternal,
        )
    }

    pub fn import_image(
        &mut self,
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
        initial_state: FgImageState,
        ownership: FgOwnership,
    ) -> ResourceId {
        debug_assert_ne!(ownership, FgOwnership::Owned);
        self.insert(
            name,
            FgResourceKind::Image(FgImageResource::imported(image, view, format, extent, initial_state)),
            ownership,
        )
    }
}

// getter & iter
impl FgResourceTable {
    #[inline]
    pub fn get(&self, id: ResourceId) -> Option<&FgResource> {
        self.resources.get(&id)
    }

    #[inline]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    #[inline]
    pub fn was_evicted(&self, id: ResourceId) -> bool {
        self.evicted.contains_key(&id)
    }

    #[inline]
    pub fn buffer(&self, id: ResourceId) -> Option<&FgBufferResource> {
        self.get(id).and_then(FgResource::as_buffer)
    }

    #[inline]
    pub fn image(&self, id: ResourceId) -> Option<&FgImageResource> {
        self.get(id).and_then(FgResource::as_image)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FgResource> {
        self.resources.values()
    }

    #[inline]
    pub fn telemetry(&self) -> &FgTelemetry {
        &self.telemetry
    }

    #[inline]
    pub(crate) fn telemetry_mut(&mut self) -> &mut FgTelemetry {
        &mut self.telemetry
    }

    #[inline]
    pub fn pending_free_count(&self) -> usize {
        self.pending_frees.len()
    }
}

// allocation
impl FgResourceTable {
    /// 为所有尚未分配的自有资源分配内存
    ///
    /// Critical 资源失败会立即返回错误；Important / Flexible 资源失败只记录遥测，
    /// 资源保持未分配状态，引用它的节点会在 compile 中被标记。
    pub fn realize(&mut self, allocator: &mut dyn FgMemoryAllocator) -> Result<(), FgCompileError> {
        let pending: Vec<ResourceId> =
            self.resources.values().filter(|r| r.is_owned() && r.memory().is_none()).map(|r| r.id).collect();

        for id in pending {
            let Some(resource) = self.resources.get_mut(&id) else {
                continue;
            };
            let criticality = resource.criticality();
            let mut last_err = None;

            for (attempt, &location) in criticality.memory_tiers().iter().enumerate() {
                self.telemetry.record_attempt();
                let result = match &mut resource.kind {
                    FgResourceKind::Buffer(buffer) => {
                        allocator.allocate_buffer(&resource.name, &buffer.desc, location).map(|alloc| {
                            buffer.buffer = alloc.buffer;
                            buffer.memory = Some(FgResidentMemory { key: alloc.key, location });
                        })
                    }
                    FgResourceKind::Image(image) => {
                        allocator.allocate_image(&resource.name, &image.desc, location).map(|alloc| {
                            image.image = alloc.image;
                            image.view = alloc.view;
                            image.memory = Some(FgResidentMemory { key: alloc.key, location });
                            image.current_state = FgImageState::UNDEFINED;
                        })
                    }
                };

                match result {
                    Ok(()) => {
                        self.telemetry.record_success(id, criticality, location, attempt as u32 + 1);
                        if attempt > 0 {
                            log::warn!(
                                "FrameGraph: `{}` ({:?}, {:?}) fell back to {:?} memory",
                                resource.name,
                                id,
                                criticality,
                                location
                            );
                        }
                        last_err = None;
                        break;
                    }
                    Err(err) => {
                        log::debug!("FrameGraph: allocation of `{}` in {:?} failed: {}", resource.name, location, err);
                        self.telemetry.record_failure(id, criticality, location);
                        last_err = Some(err);
                    }
                }
            }

            if let Some(err) = last_err {
                if criticality == FgCriticality::Critical {
                    self.telemetry.record_critical_failure();
                    log::error!("FrameGraph: critical resource `{}` ({:?}) could not be allocated", resource.name, id);
                    return Err(FgCompileError::CriticalAllocation {
                        id,
                        name: resource.name.clone(),
                        source: err,
                    });
                }
                log::warn!(
                    "FrameGraph: `{}` ({:?}, {:?}) exhausted all memory tiers, dependent nodes will be skipped",
                    resource.name,
                    id,
                    criticality
                );
            }
        }

        Ok(())
    }
}

// remove & evict
impl FgResourceTable {
    /// 移除资源，自有资源的内存在 `retire_frame` 之后才真正释放
    pub fn remove(&mut self, id: ResourceId, retire_frame: u64) -> Result<FgResource, FgResourceError> {
        if !id.is_valid() {
            return Err(FgResourceError::InvalidId);
        }
        let mut resource = self.resources.shift_remove(&id).ok_or(FgResourceError::StaleId(id))?;
        if let Some(memory) = resource.take_memory() {
            self.pending_frees.push((memory.key, retire_frame));
        }
        Ok(resource)
    }

    /// 移除所有 swapchain 图像，返回被移除的 ID
    pub fn remove_swapchain(&mut self) -> Vec<ResourceId> {
        let ids: Vec<ResourceId> =
            self.resources.values().filter(|r| r.ownership == FgOwnership::Swapchain).map(|r| r.id).collect();
        for id in &ids {
            self.resources.shift_remove(id);
        }
        ids
    }

    /// 驱逐：立即让 ID 失效，内存延迟释放
    pub(crate) fn evict(&mut self, id: ResourceId, frame: u64, retire_frame: u64) -> Result<(), FgResourceError> {
        self.remove(id, retire_frame)?;
        self.evicted.insert(id, retire_frame);
        self.telemetry.record_eviction(id, frame);
        Ok(())
    }

    /// 执行成功后写回每个图像在帧末的状态，作为下一帧的起始状态
    ///
    /// swapchain 图像由呈现引擎接管，下一帧总是从 UNDEFINED 开始。
    pub(crate) fn commit_image_states(&mut self, final_states: &IndexMap<ResourceId, FgImageState>) {
        for (id, state) in final_states {
            let Some(resource) = self.resources.get_mut(id) else {
                continue;
            };
            let ownership = resource.ownership;
            let resident = resource.is_resident();
            if let FgResourceKind::Image(image) = &mut resource.kind
                && resident
            {
                image.current_state = match ownership {
                    FgOwnership::Swapchain => FgImageState::UNDEFINED,
                    _ => *state,
                };
            }
        }
    }

    /// 记录一次资源访问
    pub(crate) fn touch(&mut self, id: ResourceId, frame: u64) {
        if let Some(resource) = self.resources.get_mut(&id) {
            resource.access.last_access_frame = frame;
            resource.access.access_count += 1;
        }
    }

    /// 释放所有已经过了等待期的内存
    pub fn cleanup(&mut self, allocator: &mut dyn FgMemoryAllocator, current_frame: u64) {
        let mut to_free = Vec::new();
        self.pending_frees.retain(|(key, retire_frame)| {
            if *retire_frame <= current_frame {
                to_free.push(*key);
                false
            } else {
                true
            }
        });
        for key in to_free {
            allocator.free(key);
        }
        self.evicted.retain(|_, retire_frame| *retire_frame > current_frame);
    }

    /// 销毁所有自有资源（graph 销毁时调用）
    pub fn destroy_all(&mut self, allocator: &mut dyn FgMemoryAllocator) {
        for (key, _) in self.pending_frees.drain(..) {
            allocator.free(key);
        }
        for resource in self.resources.values_mut() {
            if let Some(memory) = resource.take_memory() {
                allocator.free(memory.key);
            }
        }
        self.resources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::{FgMemoryLocation, HeadlessAllocator};

    fn storage_buffer(size: u64) -> FgBufferDesc {
        FgBufferDesc::new(size, vk::BufferUsageFlags::STORAGE_BUFFER)
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut table = FgResourceTable::new(16);
        let a = table.create_buffer("a", storage_buffer(64));
        let b = table.create_buffer("b", storage_buffer(64));
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);

        table.remove(a, 0).unwrap();
        let c = table.create_buffer("c", storage_buffer(64));
        assert_eq!(c.raw(), 3);
        assert!(table.get(a).is_none());
        assert_eq!(table.remove(a, 0).unwrap_err(), FgResourceError::StaleId(a));
        assert_eq!(table.remove(ResourceId::INVALID, 0).unwrap_err(), FgResourceError::InvalidId);
    }

    #[test]
    fn test_realize_is_lazy() {
        let mut allocator = HeadlessAllocator::new();
        let mut table = FgResourceTable::new(16);
        let id = table.create_buffer("lazy", storage_buffer(128));
        assert!(table.buffer(id).unwrap().physical_handle().is_none());

        table.realize(&mut allocator).unwrap();
        let buffer = table.buffer(id).unwrap();
        assert!(buffer.physical_handle().is_some());
        assert_eq!(buffer.memory().unwrap().location, FgMemoryLocation::DeviceLocal);
        assert_eq!(table.telemetry().attempts, 1);

        table.realize(&mut allocator).unwrap();
        assert_eq!(table.telemetry().attempts, 1);
    }

    #[test]
    fn test_important_falls_back_to_relaxed() {
        let mut allocator = HeadlessAllocator::new().with_budget(FgMemoryLocation::DeviceLocal, 0);
        let mut table = FgResourceTable::new(16);
        let id = table.create_buffer("important", storage_buffer(256));

        table.realize(&mut allocator).unwrap();
        assert_eq!(table.get(id).unwrap().memory().unwrap().location, FgMemoryLocation::DeviceLocalRelaxed);
        assert_eq!(table.telemetry().attempts, 2);
        assert_eq!(table.telemetry().fallbacks, 1);
        assert_eq!(table.telemetry().retries, 1);
        assert_eq!(table.telemetry().failures, 1);
    }

    #[test]
    fn test_important_failure_is_absorbed() {
        let mut allocator = HeadlessAllocator::new().with_device_memory_exhausted();
        let mut table = FgResourceTable::new(16);
        let id = table.create_buffer("important", storage_buffer(256));

        assert!(table.realize(&mut allocator).is_ok());
        assert!(!table.get(id).unwrap().is_resident());
        assert_eq!(table.telemetry().failures, 2);
    }

    #[test]
    fn test_deferred_free() {
        let mut allocator = HeadlessAllocator::new();
        let mut table = FgResourceTable::new(16);
        let id = table.create_buffer("transient", storage_buffer(64));
        table.realize(&mut allocator).unwrap();
        assert_eq!(allocator.live_allocations(), 1);

        table.remove(id, 5).unwrap();
        table.cleanup(&mut allocator, 4);
        assert_eq!(allocator.live_allocations(), 1);
        table.cleanup(&mut allocator, 5);
        assert_eq!(allocator.live_allocations(), 0);
        assert_eq!(table.pending_free_count(), 0);
    }

    #[test]
    fn test_remove_swapchain_keeps_other_imports() {
        let mut table = FgResourceTable::new(16);
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let sc = table.import_image(
            "swapchain",
            vk::Image::null(),
            vk::ImageView::null(),
            vk::Format::B8G8R8A8_SRGB,
            extent,
            FgImageState::UNDEFINED,
            FgOwnership::Swapchain,
        );
        let ext = table.import_image(
            "external",
            vk::Image::null(),
            vk::ImageView::null(),
            vk::Format::R8G8B8A8_UNORM,
            extent,
            FgImageState::SHADER_READ_FRAGMENT,
            FgOwnership::ImportedExternal,
        );

        assert_eq!(table.remove_swapchain(), vec![sc]);
        assert!(table.contains(ext));
        assert!(!table.contains(sc));
    }

    #[test]
    fn test_image_state_survives_until_reallocation() {
        let mut allocator = HeadlessAllocator::new();
        let mut table = FgResourceTable::new(16);
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let owned = table.create_image(
            "gbuffer",
            FgImageDesc::new_2d(extent, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT),
        );
        let sc = table.import_image(
            "swapchain",
            vk::Image::null(),
            vk::ImageView::null(),
            vk::Format::B8G8R8A8_SRGB,
            extent,
            FgImageState::UNDEFINED,
            FgOwnership::Swapchain,
        );
        // 未分配的图像不接受写回
        let states: IndexMap<ResourceId, FgImageState> =
            [owned, sc].into_iter().map(|id| (id, FgImageState::COLOR_ATTACHMENT_WRITE)).collect();
        table.commit_image_states(&states);
        assert_eq!(table.image(owned).unwrap().current_state(), FgImageState::UNDEFINED);

        table.realize(&mut allocator).unwrap();
        table.commit_image_states(&states);
        assert_eq!(table.image(owned).unwrap().current_state(), FgImageState::COLOR_ATTACHMENT_WRITE);
        assert_eq!(table.image(sc).unwrap().current_state(), FgImageState::UNDEFINED);
    }

    #[test]
    fn test_eviction_record_is_dropped_with_its_memory() {
        let mut allocator = HeadlessAllocator::new();
        let mut table = FgResourceTable::new(16);
        let id = table.create_buffer("cold", storage_buffer(64));
        table.realize(&mut allocator).unwrap();

        table.evict(id, 0, 2).unwrap();
        table.cleanup(&mut allocator, 1);
        assert!(table.was_evicted(id));
        assert_eq!(allocator.live_allocations(), 1);

        table.cleanup(&mut allocator, 2);
        assert!(!table.was_evicted(id));
        assert_eq!(allocator.live_allocations(), 0);
    }
}
