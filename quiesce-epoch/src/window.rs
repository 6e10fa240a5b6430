use crate::id::{Category, EpochId};
use std::collections::BTreeMap;
use tracing::warn;

/// Soft diagnostic threshold: if a single lane's compressed interval count
/// exceeds this, we log a warning (§7 `WindowOverflow`). Not fatal, not part
/// of `CoreError` -- purely an early-warning signal that something is
/// creating epochs faster than they're terminating, or with pathologically
/// non-contiguous generations.
const WINDOW_OVERFLOW_SOFT_LIMIT: usize = 4096;

/// Compressed set of terminated epoch ids, one lane per (creator, category),
/// stored as a union of half-open `[start, end)` generation intervals. Used
/// for duplicate/late-message suppression and to answer
/// `isEpochTerminated` once live state for an epoch has been released.
#[derive(Default)]
pub struct EpochWindow {
    lanes: BTreeMap<(u32, Category), BTreeMap<u64, u64>>,
}

impl EpochWindow {
    pub fn new() -> Self {
        EpochWindow::default()
    }

    pub fn insert(&mut self, id: EpochId) {
        let lane = id.lane();
        let point = id.generation() as u64;
        let map = self.lanes.entry(lane).or_default();
        insert_point(map, point);
        if map.len() > WINDOW_OVERFLOW_SOFT_LIMIT {
            warn!(
                target: "quiesce",
                lane = ?lane,
                intervals = map.len(),
                "epoch window lane has an unusually large number of compressed intervals"
            );
        }
    }

    pub fn contains(&self, id: EpochId) -> bool {
        let lane = id.lane();
        let point = id.generation() as u64;
        match self.lanes.get(&lane) {
            Some(map) => contains_point(map, point),
            None => false,
        }
    }

    /// Drop all windows. Used by runtime teardown/reinit (§4.6): the id
    /// space restarts from zero per (creator, category) after a reset, so a
    /// stale window entry must not shadow a freshly-reused id.
    pub fn clear(&mut self) {
        self.lanes.clear();
    }

    #[cfg(test)]
    pub fn lane_interval_count(&self, id: EpochId) -> usize {
        self.lanes.get(&id.lane()).map_or(0, BTreeMap::len)
    }
}

fn insert_point(map: &mut BTreeMap<u64, u64>, point: u64) {
    if let Some((&start, &end)) = map.range(..=point).next_back() {
        if point < end {
            return; // already covered
        }
        if end == point {
            let new_end = point + 1;
            if let Some(&next_end) = map.get(&new_end) {
                map.remove(&new_end);
                map.insert(start, next_end);
            } else {
                map.insert(start, new_end);
            }
            return;
        }
    }
    let new_end = point + 1;
    if let Some(&next_end) = map.get(&new_end) {
        map.remove(&new_end);
        map.insert(point, next_end);
    } else {
        map.insert(point, new_end);
    }
}

fn contains_point(map: &BTreeMap<u64, u64>, point: u64) -> bool {
    map.range(..=point)
        .next_back()
        .map_or(false, |(_, &end)| point < end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiesce_net::NodeId;

    fn rooted(gen: u32) -> EpochId {
        EpochId::make_rooted(NodeId::new(1), Category::Ds, gen)
    }

    #[test]
    fn merges_contiguous_runs() {
        let mut w = EpochWindow::new();
        for g in 0..10 {
            w.insert(rooted(g));
        }
        assert_eq!(w.lane_interval_count(rooted(0)), 1);
        for g in 0..10 {
            assert!(w.contains(rooted(g)));
        }
        assert!(!w.contains(rooted(10)));
    }

    #[test]
    fn merges_out_of_order_inserts() {
        let mut w = EpochWindow::new();
        for g in [5u32, 3, 4, 1, 0, 2, 7, 8] {
            w.insert(rooted(g));
        }
        // [0,6) and [7,9) -- 6 is still missing
        assert!(w.contains(rooted(0)));
        assert!(w.contains(rooted(5)));
        assert!(!w.contains(rooted(6)));
        assert!(w.contains(rooted(7)));
        assert!(w.contains(rooted(8)));
        assert_eq!(w.lane_interval_count(rooted(0)), 2);
        w.insert(rooted(6));
        assert_eq!(w.lane_interval_count(rooted(0)), 1);
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let mut w = EpochWindow::new();
        w.insert(rooted(3));
        w.insert(rooted(3));
        assert_eq!(w.lane_interval_count(rooted(0)), 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut w = EpochWindow::new();
        w.insert(rooted(3));
        w.clear();
        assert!(!w.contains(rooted(3)));
    }
}
