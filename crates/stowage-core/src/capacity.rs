//! Running storage-capacity totals.
//!
//! Four sums over the pod population: capacity, weight in use, weight
//! reserved for bundles on their way, and the backlog of bundles not yet
//! assigned to a pod. The totals are seeded once from a full scan when the
//! instance is finalized and are maintained purely by deltas afterwards.
//! [`CapacityTotals::scan`] recomputes them from scratch, which is what the
//! reconciliation check compares against.

use crate::entity::{BundleState, ItemBundle, Pod};
use crate::fixed::{Weight, ratio};

/// A point-in-time copy of the four totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub capacity: Weight,
    pub usage: Weight,
    pub reserved: Weight,
    pub backlog: Weight,
}

impl CapacitySnapshot {
    /// `usage + reserved + backlog`.
    pub fn committed(&self) -> Weight {
        self.usage + self.reserved + self.backlog
    }
}

/// Fill ratios derived from the totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FillLevels {
    /// usage / capacity
    pub used: f64,
    /// (usage + reserved) / capacity
    pub used_and_reserved: f64,
    /// (usage + reserved + backlog) / capacity
    pub used_reserved_and_backlog: f64,
}

/// Incrementally maintained totals. Only reachable from kernel operations.
#[derive(Debug, Clone, Default)]
pub struct CapacityTotals {
    current: Option<CapacitySnapshot>,
}

impl CapacityTotals {
    /// Full recomputation from the pod and bundle populations.
    pub fn scan<'a>(
        pods: impl IntoIterator<Item = &'a Pod>,
        bundles: impl IntoIterator<Item = &'a ItemBundle>,
    ) -> CapacitySnapshot {
        let mut snap = CapacitySnapshot::default();
        for pod in pods {
            snap.capacity += pod.capacity;
            snap.usage += pod.capacity_in_use;
            snap.reserved += pod.capacity_reserved;
        }
        for bundle in bundles {
            if bundle.state == BundleState::Backlog {
                snap.backlog += bundle.weight;
            }
        }
        snap
    }

    /// Set the totals from a scan. Called once when the instance is finalized.
    pub(crate) fn seed(&mut self, snapshot: CapacitySnapshot) {
        self.current = Some(snapshot);
    }

    pub fn is_seeded(&self) -> bool {
        self.current.is_some()
    }

    /// Current totals; all zero before seeding.
    pub fn snapshot(&self) -> CapacitySnapshot {
        self.current.unwrap_or_default()
    }

    pub fn fill_levels(&self) -> FillLevels {
        let s = self.snapshot();
        FillLevels {
            used: ratio(s.usage, s.capacity),
            used_and_reserved: ratio(s.usage + s.reserved, s.capacity),
            used_reserved_and_backlog: ratio(s.committed(), s.capacity),
        }
    }

    fn apply(&mut self, f: impl FnOnce(&mut CapacitySnapshot)) {
        let snap = self.current.get_or_insert_with(CapacitySnapshot::default);
        f(snap);
    }

    // -- Deltas ------------------------------------------------------------

    pub(crate) fn bundle_placed(&mut self, w: Weight) {
        self.apply(|s| s.backlog += w);
    }

    /// Backlog -> reserved.
    pub(crate) fn bundle_registered(&mut self, w: Weight) {
        self.apply(|s| {
            s.reserved += w;
            s.backlog -= w;
        });
    }

    /// Reserved -> usage.
    pub(crate) fn bundle_stored(&mut self, w: Weight) {
        self.apply(|s| {
            s.usage += w;
            s.reserved -= w;
        });
    }

    /// Reserved -> backlog, used when a reserving pod disappears.
    pub(crate) fn registration_dropped(&mut self, w: Weight) {
        self.apply(|s| {
            s.reserved -= w;
            s.backlog += w;
        });
    }

    pub(crate) fn initial_bundle_stored(&mut self, w: Weight) {
        self.apply(|s| s.usage += w);
    }

    pub(crate) fn item_extracted(&mut self, w: Weight) {
        self.apply(|s| s.usage -= w);
    }

    pub(crate) fn pod_added(&mut self, pod: &Pod) {
        self.apply(|s| {
            s.capacity += pod.capacity;
            s.usage += pod.capacity_in_use;
            s.reserved += pod.capacity_reserved;
        });
    }

    pub(crate) fn pod_removed(&mut self, pod: &Pod) {
        self.apply(|s| {
            s.capacity -= pod.capacity;
            s.usage -= pod.capacity_in_use;
            s.reserved -= pod.capacity_reserved;
        });
    }
}
