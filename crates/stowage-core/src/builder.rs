//! Two-phase construction: add entities in any order, then finalize.
//!
//! Factories only create entities and record the references they declare.
//! [`InstanceBuilder::finalize`] resolves every reference, fills all
//! [`Link`](crate::entity::Link)s, seeds the storage-location pool and the
//! capacity totals, freezes the observer lists and hands back an
//! [`Instance`]. Reading a link is only possible through the finalized
//! instance.

use std::collections::{BTreeMap, BTreeSet};

use stowage_stats::{DiscardSink, StatSink};

use crate::capacity::CapacityTotals;
use crate::collision::CollisionDetector;
use crate::config::{SimConfig, StatFileLevel};
use crate::entity::*;
use crate::error::KernelError;
use crate::event::{EventBusBuilder, EventFilter, EventKind, Observer};
use crate::fixed::Weight;
use crate::graph::{GraphError, WaypointGraph};
use crate::id::*;
use crate::instance::{Instance, Kernel};
use crate::resource::ResourceManager;
use crate::rng::SimRng;
use crate::scheduler::ControllerSet;
use crate::sim::SimClock;
use crate::statistics::InstanceStatistics;
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TierSpec {
    pub id: Option<TierId>,
    pub length: f64,
    pub width: f64,
}

impl TierSpec {
    pub fn new(length: f64, width: f64) -> Self {
        Self {
            id: None,
            length,
            width,
        }
    }

    pub fn with_id(mut self, id: TierId) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaypointSpec {
    pub id: Option<WaypointId>,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub storage_location: bool,
    pub queue: bool,
    pub station: Option<StationRef>,
    pub elevator: Option<ElevatorId>,
}

impl WaypointSpec {
    pub fn new(tier: TierId, x: f64, y: f64) -> Self {
        Self {
            id: None,
            tier,
            x,
            y,
            storage_location: false,
            queue: false,
            station: None,
            elevator: None,
        }
    }

    pub fn with_id(mut self, id: WaypointId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn storage(mut self) -> Self {
        self.storage_location = true;
        self
    }

    pub fn queue(mut self) -> Self {
        self.queue = true;
        self
    }

    pub fn station(mut self, station: StationRef) -> Self {
        self.station = Some(station);
        self
    }

    pub fn elevator(mut self, elevator: ElevatorId) -> Self {
        self.elevator = Some(elevator);
        self
    }
}

/// A bot placed at `waypoint` takes the waypoint's tier and position.
#[derive(Debug, Clone, PartialEq)]
pub struct BotSpec {
    pub id: Option<BotId>,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub waypoint: Option<WaypointId>,
}

impl BotSpec {
    pub fn new(tier: TierId, x: f64, y: f64, radius: f64) -> Self {
        Self {
            id: None,
            tier,
            x,
            y,
            radius,
            waypoint: None,
        }
    }

    pub fn with_id(mut self, id: BotId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at(mut self, waypoint: WaypointId) -> Self {
        self.waypoint = Some(waypoint);
        self
    }
}

/// A pod stored at `waypoint` takes the waypoint's tier and position.
/// Pods start empty; stock them with `Kernel::store_initial_bundle`.
#[derive(Debug, Clone, PartialEq)]
pub struct PodSpec {
    pub id: Option<PodId>,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub capacity: Weight,
    pub waypoint: Option<WaypointId>,
}

impl PodSpec {
    pub fn new(tier: TierId, capacity: Weight) -> Self {
        Self {
            id: None,
            tier,
            x: 0.0,
            y: 0.0,
            capacity,
            waypoint: None,
        }
    }

    pub fn with_id(mut self, id: PodId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at(mut self, waypoint: WaypointId) -> Self {
        self.waypoint = Some(waypoint);
        self
    }

    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub(crate) fn build(&self, id: PodId, volatile: VolatileIndex) -> Pod {
        Pod {
            id,
            volatile,
            tier: self.tier,
            x: self.x,
            y: self.y,
            capacity: self.capacity,
            capacity_in_use: Weight::ZERO,
            capacity_reserved: Weight::ZERO,
            location: Link::unwired(),
            claimed_by: None,
            contents: BTreeMap::new(),
            reserved_items: BTreeMap::new(),
            stat_items_handled: 0,
            stat_bundles_handled: 0,
        }
    }
}

/// Input and output stations share a shape. The handover waypoint names
/// the station through [`WaypointSpec::station`].
#[derive(Debug, Clone, PartialEq)]
pub struct StationSpec {
    pub id: Option<u32>,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub capacity: u32,
}

impl StationSpec {
    pub fn new(tier: TierId, x: f64, y: f64, capacity: u32) -> Self {
        Self {
            id: None,
            tier,
            x,
            y,
            capacity,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemaphoreSpec {
    pub id: Option<SemaphoreId>,
    pub capacity: u32,
    pub guards: Vec<QueueGuard>,
}

impl SemaphoreSpec {
    pub fn new(capacity: u32) -> Self {
        Self {
            id: None,
            capacity,
            guards: Vec::new(),
        }
    }

    pub fn guard(mut self, from: WaypointId, to: WaypointId, entry: bool) -> Self {
        self.guards.push(QueueGuard { from, to, entry });
        self
    }
}

// ---------------------------------------------------------------------------
// InstanceBuilder
// ---------------------------------------------------------------------------

pub struct InstanceBuilder {
    config: SimConfig,
    store: EntityStore,
    graph: WaypointGraph,
    paths: Vec<(WaypointId, WaypointId)>,
    pod_waypoints: BTreeMap<PodId, WaypointId>,
    bus: EventBusBuilder,
    sink: Option<Box<dyn StatSink>>,
}

impl std::fmt::Debug for InstanceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceBuilder")
            .field("store", &self.store)
            .field("paths", &self.paths.len())
            .finish_non_exhaustive()
    }
}

impl InstanceBuilder {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            store: EntityStore::new(),
            graph: WaypointGraph::new(),
            paths: Vec::new(),
            pod_waypoints: BTreeMap::new(),
            bus: EventBusBuilder::new(),
            sink: None,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Destination of flushed series. Without one, flushed points are
    /// dropped.
    pub fn with_sink(mut self, sink: Box<dyn StatSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn register_next_id(&mut self, kind: EntityKind) -> Result<u32, KernelError> {
        self.store.register_next_id(kind)
    }

    pub fn subscribe(&mut self, kind: EventKind, observer: Observer) {
        self.bus.subscribe(kind, observer);
    }

    pub fn subscribe_filtered(&mut self, kind: EventKind, filter: EventFilter, observer: Observer) {
        self.bus.subscribe_filtered(kind, Some(filter), observer);
    }

    // -- Factories ---------------------------------------------------------

    pub fn add_tier(&mut self, spec: TierSpec) -> Result<TierId, KernelError> {
        self.store.create::<Tier>(spec.id, |id, volatile| Tier {
            id,
            volatile,
            length: spec.length,
            width: spec.width,
            roster: Link::unwired(),
        })
    }

    pub fn add_waypoint(&mut self, spec: WaypointSpec) -> Result<WaypointId, KernelError> {
        let id = self.store.create::<Waypoint>(spec.id, |id, volatile| Waypoint {
            id,
            volatile,
            tier: spec.tier,
            x: spec.x,
            y: spec.y,
            storage_location: spec.storage_location,
            queue: spec.queue,
            station: spec.station,
            elevator: spec.elevator,
            pod: Link::unwired(),
            stat_bot_visits: 0,
        })?;
        self.graph.add_waypoint(id);
        Ok(id)
    }

    /// Directed edge `from -> to`, resolved at finalize.
    pub fn add_path(&mut self, from: WaypointId, to: WaypointId) {
        self.paths.push((from, to));
    }

    pub fn add_bidirectional_path(&mut self, a: WaypointId, b: WaypointId) {
        self.add_path(a, b);
        self.add_path(b, a);
    }

    pub fn add_bot(&mut self, spec: BotSpec) -> Result<BotId, KernelError> {
        self.store.create::<Bot>(spec.id, |id, volatile| Bot {
            id,
            volatile,
            tier: spec.tier,
            x: spec.x,
            y: spec.y,
            radius: spec.radius,
            waypoint: spec.waypoint,
            pod: None,
            stat_distance_traveled: 0.0,
            stat_assigned_tasks: 0,
            stat_collisions: 0,
        })
    }

    pub fn add_pod(&mut self, spec: PodSpec) -> Result<PodId, KernelError> {
        let id = self
            .store
            .create::<Pod>(spec.id, |id, volatile| spec.build(id, volatile))?;
        if let Some(wp) = spec.waypoint {
            self.pod_waypoints.insert(id, wp);
        }
        Ok(id)
    }

    pub fn add_input_station(&mut self, spec: StationSpec) -> Result<InputStationId, KernelError> {
        self.store
            .create::<InputStation>(spec.id.map(InputStationId), |id, volatile| InputStation {
                id,
                volatile,
                tier: spec.tier,
                x: spec.x,
                y: spec.y,
                capacity: spec.capacity,
                assigned_bundles: BTreeSet::new(),
                waypoint: Link::unwired(),
                stat_bundles_handled: 0,
            })
    }

    pub fn add_output_station(&mut self, spec: StationSpec) -> Result<OutputStationId, KernelError> {
        self.store
            .create::<OutputStation>(spec.id.map(OutputStationId), |id, volatile| OutputStation {
                id,
                volatile,
                tier: spec.tier,
                x: spec.x,
                y: spec.y,
                capacity: spec.capacity,
                assigned_orders: BTreeSet::new(),
                waypoint: Link::unwired(),
                stat_items_handled: 0,
                stat_orders_handled: 0,
            })
    }

    pub fn add_elevator(&mut self, id: Option<ElevatorId>) -> Result<ElevatorId, KernelError> {
        self.store.create::<Elevator>(id, |id, volatile| Elevator {
            id,
            volatile,
            connected: Link::unwired(),
        })
    }

    pub fn add_semaphore(&mut self, spec: SemaphoreSpec) -> Result<SemaphoreId, KernelError> {
        self.store.create::<Semaphore>(spec.id, |id, volatile| Semaphore {
            id,
            volatile,
            capacity: spec.capacity,
            guards: spec.guards,
        })
    }

    pub fn add_item_description(
        &mut self,
        id: Option<ItemDescriptionId>,
        kind: ItemKind,
        weight: Weight,
    ) -> Result<ItemDescriptionId, KernelError> {
        self.store
            .create::<ItemDescription>(id, |id, volatile| ItemDescription {
                id,
                volatile,
                kind,
                weight,
            })
    }

    // -- Finalize ----------------------------------------------------------

    /// Resolve and wire every reference and hand back the live instance.
    pub fn finalize(self, controllers: ControllerSet) -> Result<Instance, KernelError> {
        let InstanceBuilder {
            config,
            mut store,
            mut graph,
            paths,
            pod_waypoints,
            bus,
            sink,
        } = self;
        config.validate()?;
        let file_level = config.file_level()?;

        for tier in ids::<Tier>(&store) {
            store.get_mut::<Tier>(tier)?.roster.wire(TierRoster::default());
        }
        for elevator in ids::<Elevator>(&store) {
            store
                .get_mut::<Elevator>(elevator)?
                .connected
                .wire(BTreeSet::new());
        }

        for wp in ids::<Waypoint>(&store) {
            let w = store.get_mut::<Waypoint>(wp)?;
            w.pod.wire(None);
            let (tier, station, elevator) = (w.tier, w.station, w.elevator);
            roster_mut(&mut store, tier)?.waypoints.insert(wp);
            match station {
                Some(StationRef::Input(s)) => {
                    let st = store.get_mut::<InputStation>(s)?;
                    if st.waypoint.is_wired() {
                        return Err(KernelError::invalid(s, "station has two waypoints"));
                    }
                    st.waypoint.wire(wp);
                }
                Some(StationRef::Output(s)) => {
                    let st = store.get_mut::<OutputStation>(s)?;
                    if st.waypoint.is_wired() {
                        return Err(KernelError::invalid(s, "station has two waypoints"));
                    }
                    st.waypoint.wire(wp);
                }
                None => {}
            }
            if let Some(e) = elevator {
                store
                    .get_mut::<Elevator>(e)?
                    .connected
                    .get_mut()
                    .insert(wp);
            }
        }

        for (from, to) in paths {
            graph.add_path(from, to).map_err(|err| match err {
                GraphError::WaypointNotFound(wp) => KernelError::not_found(wp),
                other => other.into(),
            })?;
        }

        for s in ids::<InputStation>(&store) {
            let st = store.get::<InputStation>(s)?;
            if !st.waypoint.is_wired() {
                return Err(KernelError::invalid(s, "station has no waypoint"));
            }
            let tier = st.tier;
            roster_mut(&mut store, tier)?.input_stations.insert(s);
        }
        for s in ids::<OutputStation>(&store) {
            let st = store.get::<OutputStation>(s)?;
            if !st.waypoint.is_wired() {
                return Err(KernelError::invalid(s, "station has no waypoint"));
            }
            let tier = st.tier;
            roster_mut(&mut store, tier)?.output_stations.insert(s);
        }

        for bot in ids::<Bot>(&store) {
            let b = store.get::<Bot>(bot)?;
            let mut tier = b.tier;
            if let Some(wp) = b.waypoint {
                let w = store.get::<Waypoint>(wp)?;
                let (wt, x, y) = (w.tier, w.x, w.y);
                tier = wt;
                let b = store.get_mut::<Bot>(bot)?;
                b.tier = wt;
                b.x = x;
                b.y = y;
            }
            roster_mut(&mut store, tier)?.bots.insert(bot);
        }

        for pod in ids::<Pod>(&store) {
            let mut tier = store.get::<Pod>(pod)?.tier;
            let location = match pod_waypoints.get(&pod) {
                Some(&wp) => {
                    let w = store.get_mut::<Waypoint>(wp)?;
                    if w.pod.get().is_some() {
                        return Err(KernelError::invalid(wp, "waypoint holds two pods"));
                    }
                    *w.pod.get_mut() = Some(pod);
                    let (wt, x, y) = (w.tier, w.x, w.y);
                    tier = wt;
                    let p = store.get_mut::<Pod>(pod)?;
                    p.tier = wt;
                    p.x = x;
                    p.y = y;
                    PodLocation::Stored(wp)
                }
                None => PodLocation::Unplaced,
            };
            store.get_mut::<Pod>(pod)?.location.wire(location);
            roster_mut(&mut store, tier)?.pods.insert(pod);
        }

        for sem in store.semaphores().iter() {
            for guard in &sem.guards {
                for wp in [guard.from, guard.to] {
                    if !store.contains::<Waypoint>(wp) {
                        return Err(KernelError::not_found(wp));
                    }
                }
            }
        }

        let mut resources = ResourceManager::new();
        resources.seed_storage(
            store
                .waypoints()
                .iter()
                .filter(|w| w.storage_location && w.pod.get().is_none())
                .map(|w| w.id),
        );

        let mut capacity = CapacityTotals::default();
        capacity.seed(CapacityTotals::scan(
            store.pods().iter(),
            store.bundles().iter(),
        ));

        let sink: Box<dyn StatSink> = match (file_level, sink) {
            (StatFileLevel::All, Some(sink)) => sink,
            _ => Box::new(DiscardSink),
        };

        tracing::info!(
            tiers = store.tiers().len(),
            waypoints = store.waypoints().len(),
            paths = graph.edge_count(),
            bots = store.bots().len(),
            pods = store.pods().len(),
            input_stations = store.input_stations().len(),
            output_stations = store.output_stations().len(),
            elevators = store.elevators().len(),
            semaphores = store.semaphores().len(),
            item_descriptions = store.item_descriptions().len(),
            "instance finalized"
        );

        let kernel = Kernel {
            stats: InstanceStatistics::new(config.series_config()),
            rng: SimRng::new(config.seed),
            next_fill_sample: config.statistics.observer_interval,
            config,
            store,
            graph,
            capacity,
            bus: bus.build(),
            sink,
            sink_error: None,
            resources,
            collisions: CollisionDetector::new(),
            clock: SimClock::new(),
        };
        Ok(Instance::new(kernel, controllers))
    }
}

fn ids<E: crate::store::Stored>(store: &EntityStore) -> Vec<E::Id> {
    store.arena::<E>().ids().collect()
}

fn roster_mut(store: &mut EntityStore, tier: TierId) -> Result<&mut TierRoster, KernelError> {
    Ok(store.get_mut::<Tier>(tier)?.roster.get_mut())
}
