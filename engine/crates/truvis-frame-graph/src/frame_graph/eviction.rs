//! 内存压力下的资源驱逐
//!
//! 候选：已分配的自有资源，Critical 除外。
//! 顺序：Flexible 在 Important 之前，同一级内按最近最少使用排序。
//! 被当前编译结果引用的资源不会被驱逐，只记录一次 [`EvictionFailure`]。

use std::collections::HashSet;

use itertools::Itertools;

use crate::frame_graph::{EvictionFailure, FgCriticality, FgResourceTable, FgTelemetry, ResourceId};

/// 一次驱逐的结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FgEvictionReport {
    pub evicted: Vec<ResourceId>,
    pub failures: Vec<EvictionFailure>,
}

impl FgEvictionReport {
    /// 是否释放出了内存
    #[inline]
    pub fn relieved(&self) -> bool {
        !self.evicted.is_empty()
    }
}

/// 按驱逐优先级排好序的候选资源
pub fn eviction_candidates(table: &FgResourceTable) -> Vec<ResourceId> {
    table
        .iter()
        .filter(|r| r.is_owned() && r.memory().is_some())
        .filter(|r| r.criticality() != FgCriticality::Critical)
        .sorted_by_key(|r| {
            let tier = match r.criticality() {
                FgCriticality::Flexible => 0,
                _ => 1,
            };
            (tier, r.access.last_access_frame, r.access.access_count, r.id)
        })
        .map(|r| r.id)
        .collect()
}

/// 驱逐最多 `max_evictions` 个候选
///
/// 被驱逐的 ID 立即失效，内存在 `frame + frames_in_flight` 帧之后释放。
pub fn evict_candidates(
    table: &mut FgResourceTable,
    referenced: &HashSet<ResourceId>,
    frame: u64,
    frames_in_flight: u64,
    max_evictions: usize,
) -> FgEvictionReport {
    let mut report = FgEvictionReport::default();

    for id in eviction_candidates(table) {
        if report.evicted.len() >= max_evictions {
            break;
        }

        if referenced.contains(&id) {
            let name = table.get(id).map(|r| r.name.clone()).unwrap_or_default();
            log::debug!("FrameGraph: cannot evict `{}` ({:?}), still referenced", name, id);
            table.telemetry_mut().record_eviction_failure(id, frame);
            report.failures.push(EvictionFailure::StillReferenced { id, name });
            continue;
        }

        match table.evict(id, frame, frame + frames_in_flight) {
            Ok(()) => report.evicted.push(id),
            Err(err) => log::warn!("FrameGraph: eviction of {:?} failed: {}", id, err),
        }
    }

    if report.relieved() {
        log::info!(
            "FrameGraph: evicted {} resource(s) under memory pressure: {:?}",
            report.evicted.len(),
            report.evicted
        );
    } else {
        log::warn!("FrameGraph: memory pressure persists, nothing could be evicted");
    }

    report
}

/// 降级分配累计达到阈值时判定为内存压力，并清零计数
pub fn detect_pressure(telemetry: &mut FgTelemetry, threshold: u64) -> bool {
    if telemetry.fallbacks_since_evaluation() >= threshold {
        let count = telemetry.take_fallbacks_since_evaluation();
        log::warn!("FrameGraph: {} fallback allocation(s) since last evaluation, entering memory pressure", count);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::frame_graph::{FgBufferDesc, HeadlessAllocator};

    fn table_with(resources: &[(&str, FgCriticality)]) -> (FgResourceTable, Vec<ResourceId>) {
        let mut allocator = HeadlessAllocator::new();
        let mut table = FgResourceTable::new(16);
        let ids = resources
            .iter()
            .map(|(name, criticality)| {
                table.create_buffer(
                    *name,
                    FgBufferDesc::new(64, vk::BufferUsageFlags::STORAGE_BUFFER).with_criticality(*criticality),
                )
            })
            .collect();
        table.realize(&mut allocator).unwrap();
        (table, ids)
    }

    #[test]
    fn test_candidate_order() {
        let (mut table, ids) = table_with(&[
            ("critical", FgCriticality::Critical),
            ("important", FgCriticality::Important),
            ("flexible_recent", FgCriticality::Flexible),
            ("flexible_old", FgCriticality::Flexible),
        ]);
        table.touch(ids[2], 10);
        table.touch(ids[3], 2);
        table.touch(ids[1], 1);

        assert_eq!(eviction_candidates(&table), vec![ids[3], ids[2], ids[1]]);
    }

    #[test]
    fn test_referenced_resources_are_skipped() {
        let (mut table, ids) =
            table_with(&[("flexible", FgCriticality::Flexible), ("important", FgCriticality::Important)]);
        let referenced = HashSet::from([ids[0]]);

        let report = evict_candidates(&mut table, &referenced, 7, 3, 8);
        assert_eq!(report.evicted, vec![ids[1]]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], EvictionFailure::StillReferenced { id, .. } if id == ids[0]));

        assert!(table.get(ids[1]).is_none());
        assert!(table.was_evicted(ids[1]));
        assert_eq!(table.pending_free_count(), 1);
        assert_eq!(table.telemetry().evictions, 1);
        assert_eq!(table.telemetry().eviction_failures, 1);
    }

    #[test]
    fn test_nothing_evictable_keeps_pressure() {
        let (mut table, ids) = table_with(&[("flexible", FgCriticality::Flexible)]);
        let referenced = HashSet::from([ids[0]]);
        let report = evict_candidates(&mut table, &referenced, 0, 3, 8);
        assert!(!report.relieved());
        assert!(table.contains(ids[0]));
    }
}
