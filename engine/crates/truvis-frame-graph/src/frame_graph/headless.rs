//! 无 GPU 的协作者实现
//!
//! `HeadlessAllocator` 按内存位置模拟预算，`HeadlessEncoder` 把录制的命令记录下来。
//! 两者内部状态共享（`Clone` 得到的是同一个设备），测试可以保留一份副本，
//! 把另一份交给 `FrameGraphBuilder` 后继续观察。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use ash::vk;
use ash::vk::Handle;
use slotmap::SlotMap;

use crate::frame_graph::{
    FgAllocError, FgAllocationKey, FgBarrierClass, FgBarrierHalf, FgBufferAllocation, FgBufferDesc, FgCommandEncoder,
    FgImageAllocation, FgImageDesc, FgMemoryAllocator, FgMemoryLocation, FgResolvedBarriers, NodeId,
};

struct HeadlessAllocation {
    name: String,
    location: FgMemoryLocation,
    size: u64,
}

#[derive(Default)]
struct HeadlessMemoryState {
    /// 剩余预算；没有记录的位置视为无限
    budgets: HashMap<FgMemoryLocation, u64>,
    allocations: SlotMap<FgAllocationKey, HeadlessAllocation>,
    next_handle: u64,
}

impl HeadlessMemoryState {
    fn allocate(
        &mut self,
        name: &str,
        size: u64,
        location: FgMemoryLocation,
    ) -> Result<(FgAllocationKey, u64), FgAllocError> {
        if size == 0 {
            return Err(FgAllocError::Backend {
                name: name.to_string(),
                reason: "zero-sized allocation".to_string(),
            });
        }
        if let Some(remaining) = self.budgets.get_mut(&location) {
            if *remaining < size {
                return Err(FgAllocError::OutOfMemory {
                    name: name.to_string(),
                    location,
                    size,
                });
            }
            *remaining -= size;
        }

        let key = self.allocations.insert(HeadlessAllocation {
            name: name.to_string(),
            location,
            size,
        });
        self.next_handle += 1;
        Ok((key, 0x1000 + self.next_handle))
    }
}

/// 模拟预算的分配器
#[derive(Clone, Default)]
pub struct HeadlessAllocator {
    state: Rc<RefCell<HeadlessMemoryState>>,
}

// new & init
impl HeadlessAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 限制某个内存位置的可用字节数
    pub fn with_budget(self, location: FgMemoryLocation, bytes: u64) -> Self {
        self.set_budget(location, Some(bytes));
        self
    }

    /// device-local 的所有内存类型都已耗尽，只剩 host-visible
    pub fn with_device_memory_exhausted(self) -> Self {
        self.with_budget(FgMemoryLocation::DeviceLocal, 0).with_budget(FgMemoryLocation::DeviceLocalRelaxed, 0)
    }

    /// `None` 表示不限制
    pub fn set_budget(&self, location: FgMemoryLocation, bytes: Option<u64>) {
        let mut state = self.state.borrow_mut();
        match bytes {
            Some(bytes) => state.budgets.insert(location, bytes),
            None => state.budgets.remove(&location),
        };
    }
}

// getter
impl HeadlessAllocator {
    pub fn live_allocations(&self) -> usize {
        self.state.borrow().allocations.len()
    }

    pub fn used_bytes(&self, location: FgMemoryLocation) -> u64 {
        self.state.borrow().allocations.values().filter(|a| a.location == location).map(|a| a.size).sum()
    }

    pub fn live_names(&self) -> Vec<String> {
        self.state.borrow().allocations.values().map(|a| a.name.clone()).collect()
    }

    /// 估算图像占用：按 4 字节每像素，mip 链按 4/3 放大
    fn image_size(desc: &FgImageDesc) -> u64 {
        let texels = desc.extent.width as u64 * desc.extent.height as u64 * desc.extent.depth.max(1) as u64;
        let base = texels * 4 * desc.array_layers.max(1) as u64 * desc.samples.as_raw().max(1) as u64;
        if desc.mip_levels > 1 { base * 4 / 3 } else { base }
    }
}

impl FgMemoryAllocator for HeadlessAllocator {
    fn allocate_buffer(
        &mut self,
        name: &str,
        desc: &FgBufferDesc,
        location: FgMemoryLocation,
    ) -> Result<FgBufferAllocation, FgAllocError> {
        let (key, raw) = self.state.borrow_mut().allocate(name, desc.size, location)?;
        Ok(FgBufferAllocation {
            buffer: vk::Buffer::from_raw(raw),
            key,
        })
    }

    fn allocate_image(
        &mut self,
        name: &str,
        desc: &FgImageDesc,
        location: FgMemoryLocation,
    ) -> Result<FgImageAllocation, FgAllocError> {
        let (key, raw) = self.state.borrow_mut().allocate(name, Self::image_size(desc), location)?;
        Ok(FgImageAllocation {
            image: vk::Image::from_raw(raw),
            view: vk::ImageView::from_raw(raw | 0x8000_0000),
            key,
        })
    }

    fn free(&mut self, key: FgAllocationKey) {
        let mut state = self.state.borrow_mut();
        let Some(allocation) = state.allocations.remove(key) else {
            log::warn!("HeadlessAllocator: double free of {:?}", key);
            return;
        };
        if let Some(remaining) = state.budgets.get_mut(&allocation.location) {
            *remaining += allocation.size;
        }
    }
}

/// `HeadlessEncoder` 记录下来的命令
#[derive(Clone, Debug)]
pub enum HeadlessCommand {
    Begin { frame_index: u64, label: String },
    End,
    Barrier(FgResolvedBarriers),
    BeginLabel(String),
    EndLabel,
    InsertLabel(String),
}

/// 注入到 `HeadlessEncoder` 的失败
#[derive(Clone, Copy, Debug, Default)]
struct HeadlessFailures {
    begin: Option<vk::Result>,
    end: Option<vk::Result>,
}

/// 记录命令的编码器
#[derive(Clone)]
pub struct HeadlessEncoder {
    queue_family_index: u32,
    commands: Rc<RefCell<Vec<HeadlessCommand>>>,
    failures: Rc<Cell<HeadlessFailures>>,
}

// new & init
impl HeadlessEncoder {
    pub fn new(queue_family_index: u32) -> Self {
        Self {
            queue_family_index,
            commands: Rc::new(RefCell::new(Vec::new())),
            failures: Rc::new(Cell::new(HeadlessFailures::default())),
        }
    }

    /// 之后的 `begin` 都返回 `err`，`None` 取消
    pub fn fail_begin(&self, err: Option<vk::Result>) {
        let mut failures = self.failures.get();
        failures.begin = err;
        self.failures.set(failures);
    }

    /// 之后的 `end` 都返回 `err`，命令缓冲区仍然视为已结束
    pub fn fail_end(&self, err: Option<vk::Result>) {
        let mut failures = self.failures.get();
        failures.end = err;
        self.failures.set(failures);
    }
}

// getter
impl HeadlessEncoder {
    pub fn commands(&self) -> Vec<HeadlessCommand> {
        self.commands.borrow().clone()
    }

    pub fn clear(&self) {
        self.commands.borrow_mut().clear();
    }

    pub fn frames_recorded(&self) -> usize {
        self.commands.borrow().iter().filter(|c| matches!(c, HeadlessCommand::Begin { .. })).count()
    }

    pub fn frames_ended(&self) -> usize {
        self.commands.borrow().iter().filter(|c| matches!(c, HeadlessCommand::End)).count()
    }

    /// 已经 begin 但还没有 end 的帧
    pub fn is_recording(&self) -> bool {
        self.frames_recorded() > self.frames_ended()
    }

    pub fn barriers(&self) -> Vec<FgResolvedBarriers> {
        self.commands
            .borrow()
            .iter()
            .filter_map(|c| match c {
                HeadlessCommand::Barrier(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// 在 `node` 之前录制的某一半 barrier
    pub fn barriers_for(&self, node: NodeId, half: FgBarrierHalf) -> Vec<FgResolvedBarriers> {
        self.barriers().into_iter().filter(|b| b.target_node == node && b.half == half).collect()
    }

    pub fn queue_transfer_count(&self) -> usize {
        self.barriers().iter().filter(|b| matches!(b.class, FgBarrierClass::QueueTransfer { .. })).count()
    }

    /// 节点 label 的顺序，即节点的录制顺序
    pub fn node_labels(&self) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .filter_map(|c| match c {
                HeadlessCommand::BeginLabel(label) if !label.starts_with("frame-") => Some(label.clone()),
                _ => None,
            })
            .collect()
    }
}

impl FgCommandEncoder for HeadlessEncoder {
    #[inline]
    fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    fn begin(&mut self, frame_index: u64, label: &str) -> Result<(), vk::Result> {
        if let Some(err) = self.failures.get().begin {
            return Err(err);
        }
        self.commands.borrow_mut().push(HeadlessCommand::Begin {
            frame_index,
            label: label.to_string(),
        });
        self.begin_label(label, [0.0; 4]);
        Ok(())
    }

    fn end(&mut self) -> Result<(), vk::Result> {
        self.end_label();
        self.commands.borrow_mut().push(HeadlessCommand::End);
        self.failures.get().end.map_or(Ok(()), Err)
    }

    fn pipeline_barrier(&mut self, barriers: &FgResolvedBarriers) {
        self.commands.borrow_mut().push(HeadlessCommand::Barrier(barriers.clone()));
    }

    fn begin_label(&mut self, label: &str, _color: [f32; 4]) {
        self.commands.borrow_mut().push(HeadlessCommand::BeginLabel(label.to_string()));
    }

    fn end_label(&mut self) {
        self.commands.borrow_mut().push(HeadlessCommand::EndLabel);
    }

    fn insert_label(&mut self, label: &str) {
        self.commands.borrow_mut().push(HeadlessCommand::InsertLabel(label.to_string()));
    }

    #[inline]
    fn command_buffer(&self) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(0xC000 + self.queue_family_index as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_returned_on_free() {
        let mut allocator = HeadlessAllocator::new().with_budget(FgMemoryLocation::DeviceLocal, 100);
        let desc = FgBufferDesc::new(64, vk::BufferUsageFlags::STORAGE_BUFFER);

        let a = allocator.allocate_buffer("a", &desc, FgMemoryLocation::DeviceLocal).unwrap();
        let err = allocator.allocate_buffer("b", &desc, FgMemoryLocation::DeviceLocal).unwrap_err();
        assert!(matches!(err, FgAllocError::OutOfMemory { size: 64, .. }));

        allocator.free(a.key);
        assert!(allocator.allocate_buffer("b", &desc, FgMemoryLocation::DeviceLocal).is_ok());
        assert_eq!(allocator.used_bytes(FgMemoryLocation::DeviceLocal), 64);
    }

    #[test]
    fn test_clones_share_state() {
        let observer = HeadlessAllocator::new();
        let mut allocator = observer.clone();
        let desc = FgBufferDesc::new(16, vk::BufferUsageFlags::UNIFORM_BUFFER);
        allocator.allocate_buffer("shared", &desc, FgMemoryLocation::HostVisible).unwrap();
        assert_eq!(observer.live_allocations(), 1);
        assert_eq!(observer.live_names(), vec!["shared".to_string()]);
    }

    #[test]
    fn test_encoder_records_commands() {
        let observer = HeadlessEncoder::new(0);
        let mut encoder = observer.clone();
        encoder.begin(3, "frame-3-graphics").unwrap();
        encoder.begin_label("blur", [0.0; 4]);
        encoder.insert_label("dispatch");
        encoder.end_label();
        encoder.end().unwrap();

        assert_eq!(observer.frames_recorded(), 1);
        assert_eq!(observer.node_labels(), vec!["blur".to_string()]);
        assert!(matches!(observer.commands().last(), Some(HeadlessCommand::End)));
        assert!(!observer.is_recording());
    }

    #[test]
    fn test_injected_begin_failure_records_nothing() {
        let observer = HeadlessEncoder::new(1);
        let mut encoder = observer.clone();
        observer.fail_begin(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(encoder.begin(0, "frame-0-compute"), Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(observer.frames_recorded(), 0);

        observer.fail_begin(None);
        encoder.begin(1, "frame-1-compute").unwrap();
        assert!(observer.is_recording());
    }
}
