//! Static checks of the navigation graph.
//!
//! [`check`] is read-only and never fails: it returns every finding for the
//! caller to act on. How a run reacts is decided by
//! [`SanityPolicy`](crate::config::SanityPolicy).

use std::fmt;

use crate::entity::Waypoint;
use crate::graph::WaypointGraph;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SanityErrorKind {
    /// A waypoint without outgoing edges.
    DeadEnd,
    /// A waypoint whose outgoing edges all lead to storage locations.
    DeadEndByBlocking,
    /// A storage location that no non-storage waypoint leads into.
    BlockableStorageLocation,
    /// Fewer free storage locations than bots.
    InsufficientRestingPositions,
}

impl SanityErrorKind {
    pub const ALL: [SanityErrorKind; 4] = [
        SanityErrorKind::DeadEnd,
        SanityErrorKind::DeadEndByBlocking,
        SanityErrorKind::BlockableStorageLocation,
        SanityErrorKind::InsufficientRestingPositions,
    ];

    /// Fixed human-readable description of the problem and its remedy.
    pub fn description(self) -> &'static str {
        match self {
            SanityErrorKind::DeadEnd => {
                "No outgoing connection from at least one waypoint detected. \
                 Ensure that the graph is completely connected."
            }
            SanityErrorKind::DeadEndByBlocking => {
                "No unblockable outgoing connection from a waypoint detected. \
                 Ensure that the graph is completely connected without relying on \
                 storage location waypoints."
            }
            SanityErrorKind::BlockableStorageLocation => {
                "Detected a storage location that might be blocked throughout the simulation. \
                 Ensure that storage locations cannot be blocked by pods, i.e. have a \
                 bi-directional connection to an aisle."
            }
            SanityErrorKind::InsufficientRestingPositions => {
                "Insufficient amount of resting positions for all robots. \
                 Remove some pods or some robots."
            }
        }
    }
}

impl fmt::Display for SanityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SanityErrorKind::DeadEnd => "DeadEnd",
            SanityErrorKind::DeadEndByBlocking => "DeadEndByBlocking",
            SanityErrorKind::BlockableStorageLocation => "BlockableStorageLocation",
            SanityErrorKind::InsufficientRestingPositions => "InsufficientRestingPositions",
        };
        f.write_str(name)
    }
}

/// One finding: what is wrong and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityFinding {
    pub kind: SanityErrorKind,
    pub location: String,
}

impl fmt::Display for SanityFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)
    }
}

/// Run every check. Waypoint findings come in waypoint creation order, the
/// resting-position finding last.
pub fn check(store: &EntityStore, graph: &WaypointGraph) -> Vec<SanityFinding> {
    let waypoints = store.waypoints();
    let is_storage = |wp| waypoints.get(wp).is_ok_and(|w: &Waypoint| w.storage_location);
    let mut findings = Vec::new();

    for wp in waypoints.iter() {
        let outgoing = graph.outgoing(wp.id);
        if outgoing.is_empty() {
            findings.push(SanityFinding {
                kind: SanityErrorKind::DeadEnd,
                location: wp.to_string(),
            });
        } else if outgoing.iter().all(|&to| is_storage(to)) {
            findings.push(SanityFinding {
                kind: SanityErrorKind::DeadEndByBlocking,
                location: wp.to_string(),
            });
        }
    }

    for wp in waypoints.iter().filter(|w| w.storage_location) {
        if !graph.incoming(wp.id).iter().any(|&from| !is_storage(from)) {
            findings.push(SanityFinding {
                kind: SanityErrorKind::BlockableStorageLocation,
                location: wp.to_string(),
            });
        }
    }

    let storage = waypoints.iter().filter(|w| w.storage_location).count() as i64;
    let pods = store.pods().len() as i64;
    let bots = store.bots().len() as i64;
    if storage - pods < bots {
        findings.push(SanityFinding {
            kind: SanityErrorKind::InsufficientRestingPositions,
            location: format!("StorageLocations-Pods<Bots:{storage}-{pods}<{bots}"),
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_are_distinct() {
        let mut seen: Vec<&str> = SanityErrorKind::ALL.iter().map(|k| k.description()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), SanityErrorKind::ALL.len());
    }

    #[test]
    fn empty_instance_has_no_findings() {
        let store = EntityStore::new();
        let graph = WaypointGraph::new();
        assert!(check(&store, &graph).is_empty());
    }

    #[test]
    fn finding_display() {
        let f = SanityFinding {
            kind: SanityErrorKind::DeadEnd,
            location: "WP1(0.00,0.00)@T0".to_string(),
        };
        assert_eq!(f.to_string(), "DeadEnd at WP1(0.00,0.00)@T0");
    }
}
