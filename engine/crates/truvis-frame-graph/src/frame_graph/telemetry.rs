//! 分配与驱逐遥测
//!
//! 计数器是累计值；事件保存在一个有上限的环形缓冲中，用于事后分析显存压力。

use std::collections::VecDeque;

use crate::frame_graph::{FgCriticality, FgMemoryLocation, ResourceId};

/// 遥测事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FgTelemetryEvent {
    Allocated {
        id: ResourceId,
        criticality: FgCriticality,
        location: FgMemoryLocation,
        /// 第几次尝试成功（从 1 开始）
        attempt: u32,
    },
    AllocationFailed {
        id: ResourceId,
        criticality: FgCriticality,
        location: FgMemoryLocation,
    },
    Evicted {
        id: ResourceId,
        frame: u64,
    },
    EvictionSkipped {
        id: ResourceId,
        frame: u64,
    },
}

/// 分配遥测
#[derive(Clone, Debug, Default)]
pub struct FgTelemetry {
    /// 每次向后端发起分配都 +1
    pub attempts: u64,
    pub successes: u64,
    /// 首次尝试失败、后续成功的分配
    pub retries: u64,
    /// 落到 `DeviceLocalRelaxed` 的分配
    pub fallbacks: u64,
    /// 落到 `HostVisible` 的分配
    pub host_memory_fallbacks: u64,
    pub failures: u64,
    pub critical_failures: u64,
    pub evictions: u64,
    pub eviction_failures: u64,

    events: VecDeque<FgTelemetryEvent>,
    capacity: usize,
    /// 上次压力评估后新增的降级分配数
    fallbacks_since_evaluation: u64,
}

// new & init
impl FgTelemetry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
            ..Default::default()
        }
    }
}

// record
impl FgTelemetry {
    #[inline]
    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) fn record_success(
        &mut self,
        id: ResourceId,
        criticality: FgCriticality,
        location: FgMemoryLocation,
        attempt: u32,
    ) {
        self.successes += 1;
        if attempt > 1 {
            self.retries += 1;
        }
        match location {
            FgMemoryLocation::DeviceLocal => {}
            FgMemoryLocation::DeviceLocalRelaxed => {
                self.fallbacks += 1;
                self.fallbacks_since_evaluation += 1;
            }
            FgMemoryLocation::HostVisible => {
                self.host_memory_fallbacks += 1;
                self.fallbacks_since_evaluation += 1;
            }
        }
        self.push_event(FgTelemetryEvent::Allocated {
            id,
            criticality,
            location,
            attempt,
        });
    }

    pub(crate) fn record_failure(&mut self, id: ResourceId, criticality: FgCriticality, location: FgMemoryLocation) {
        self.failures += 1;
        self.push_event(FgTelemetryEvent::AllocationFailed {
            id,
            criticality,
            location,
        });
    }

    #[inline]
    pub(crate) fn record_critical_failure(&mut self) {
        self.critical_failures += 1;
    }

    pub(crate) fn record_eviction(&mut self, id: ResourceId, frame: u64) {
        self.evictions += 1;
        self.push_event(FgTelemetryEvent::Evicted { id, frame });
    }

    pub(crate) fn record_eviction_failure(&mut self, id: ResourceId, frame: u64) {
        self.eviction_failures += 1;
        self.push_event(FgTelemetryEvent::EvictionSkipped { id, frame });
    }

    /// 取出并清零自上次评估以来的降级分配计数
    pub(crate) fn take_fallbacks_since_evaluation(&mut self) -> u64 {
        std::mem::take(&mut self.fallbacks_since_evaluation)
    }

    fn push_event(&mut self, event: FgTelemetryEvent) {
        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

// getter
impl FgTelemetry {
    /// 最近的事件，旧的在前
    #[inline]
    pub fn events(&self) -> impl Iterator<Item = &FgTelemetryEvent> {
        self.events.iter()
    }

    #[inline]
    pub fn fallbacks_since_evaluation(&self) -> u64 {
        self.fallbacks_since_evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_counters() {
        let mut telemetry = FgTelemetry::new(16);
        let id = ResourceId(1);

        telemetry.record_attempt();
        telemetry.record_success(id, FgCriticality::Critical, FgMemoryLocation::DeviceLocal, 1);
        telemetry.record_attempt();
        telemetry.record_attempt();
        telemetry.record_success(id, FgCriticality::Important, FgMemoryLocation::DeviceLocalRelaxed, 2);
        telemetry.record_attempt();
        telemetry.record_attempt();
        telemetry.record_attempt();
        telemetry.record_success(id, FgCriticality::Flexible, FgMemoryLocation::HostVisible, 3);

        assert_eq!(telemetry.attempts, 6);
        assert_eq!(telemetry.successes, 3);
        assert_eq!(telemetry.retries, 2);
        assert_eq!(telemetry.fallbacks, 1);
        assert_eq!(telemetry.host_memory_fallbacks, 1);
        assert_eq!(telemetry.take_fallbacks_since_evaluation(), 2);
        assert_eq!(telemetry.fallbacks_since_evaluation(), 0);
    }

    #[test]
    fn test_event_history_is_bounded() {
        let mut telemetry = FgTelemetry::new(2);
        for frame in 0..5 {
            telemetry.record_eviction(ResourceId(1), frame);
        }
        let frames: Vec<_> = telemetry
            .events()
            .map(|e| match e {
                FgTelemetryEvent::Evicted { frame, .. } => *frame,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(frames, vec![3, 4]);
        assert_eq!(telemetry.evictions, 5);
    }
}
