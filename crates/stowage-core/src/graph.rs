//! Directed navigation graph over waypoints.
//!
//! Nodes are waypoint IDs; the waypoint's attributes (storage location,
//! queue flag, handover point) live on the `Waypoint` entity. Edges are
//! directed paths. Both directions of adjacency are kept so removing a
//! waypoint can drop its incident edges without scanning the whole graph.
//! Iteration order is deterministic (ordered by waypoint ID, then by edge
//! insertion order).

use std::collections::BTreeMap;

use crate::id::WaypointId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("waypoint not in graph: {0}")]
    WaypointNotFound(WaypointId),
    #[error("self loop on {0}")]
    SelfLoop(WaypointId),
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Outgoing and incoming paths of a single waypoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    pub outgoing: Vec<WaypointId>,
    pub incoming: Vec<WaypointId>,
}

/// The navigation graph.
#[derive(Debug, Clone, Default)]
pub struct WaypointGraph {
    adjacency: BTreeMap<WaypointId, Adjacency>,
    edge_count: usize,
}

impl WaypointGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an isolated waypoint. Adding an existing one is a no-op.
    pub fn add_waypoint(&mut self, wp: WaypointId) {
        self.adjacency.entry(wp).or_default();
    }

    /// Add a directed path. Returns false if the path already existed.
    pub fn add_path(&mut self, from: WaypointId, to: WaypointId) -> Result<bool, GraphError> {
        if from == to {
            return Err(GraphError::SelfLoop(from));
        }
        if !self.adjacency.contains_key(&to) {
            return Err(GraphError::WaypointNotFound(to));
        }
        let adj = self
            .adjacency
            .get_mut(&from)
            .ok_or(GraphError::WaypointNotFound(from))?;
        if adj.outgoing.contains(&to) {
            return Ok(false);
        }
        adj.outgoing.push(to);
        if let Some(target) = self.adjacency.get_mut(&to) {
            target.incoming.push(from);
        }
        self.edge_count += 1;
        Ok(true)
    }

    /// Remove a directed path. Returns false if it did not exist.
    pub fn remove_path(&mut self, from: WaypointId, to: WaypointId) -> bool {
        let Some(adj) = self.adjacency.get_mut(&from) else {
            return false;
        };
        let before = adj.outgoing.len();
        adj.outgoing.retain(|&w| w != to);
        if adj.outgoing.len() == before {
            return false;
        }
        if let Some(target) = self.adjacency.get_mut(&to) {
            target.incoming.retain(|&w| w != from);
        }
        self.edge_count -= 1;
        true
    }

    /// Remove a waypoint and every edge touching it. Returns the removed
    /// adjacency, or `None` if the waypoint was not in the graph.
    pub fn remove_waypoint(&mut self, wp: WaypointId) -> Option<Adjacency> {
        let adj = self.adjacency.remove(&wp)?;
        for to in &adj.outgoing {
            if let Some(target) = self.adjacency.get_mut(to) {
                target.incoming.retain(|&w| w != wp);
            }
        }
        for from in &adj.incoming {
            if let Some(source) = self.adjacency.get_mut(from) {
                source.outgoing.retain(|&w| w != wp);
            }
        }
        self.edge_count -= adj.outgoing.len() + adj.incoming.len();
        Some(adj)
    }

    pub fn contains(&self, wp: WaypointId) -> bool {
        self.adjacency.contains_key(&wp)
    }

    pub fn has_path(&self, from: WaypointId, to: WaypointId) -> bool {
        self.adjacency
            .get(&from)
            .is_some_and(|adj| adj.outgoing.contains(&to))
    }

    /// Waypoints reachable from `wp` in one step.
    pub fn outgoing(&self, wp: WaypointId) -> &[WaypointId] {
        self.adjacency
            .get(&wp)
            .map(|a| a.outgoing.as_slice())
            .unwrap_or(&[])
    }

    /// Waypoints with a direct path into `wp`.
    pub fn incoming(&self, wp: WaypointId) -> &[WaypointId] {
        self.adjacency
            .get(&wp)
            .map(|a| a.incoming.as_slice())
            .unwrap_or(&[])
    }

    pub fn waypoints(&self) -> impl Iterator<Item = WaypointId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn waypoint_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
