//! Entity types owned by the kernel.
//!
//! Entities never own each other. Relationships are stored as stable IDs and
//! resolved through the [`EntityStore`](crate::store::EntityStore). Links that
//! can only be resolved once every entity exists are held in a [`Link`],
//! which `InstanceBuilder::finalize` fills in.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::KernelError;
use crate::fixed::{SimTime, Weight};
use crate::id::*;

// ---------------------------------------------------------------------------
// Entity trait
// ---------------------------------------------------------------------------

/// Common surface of every stored entity.
pub trait Entity: fmt::Debug {
    type Id: StableId;

    fn id(&self) -> Self::Id;
    fn volatile_index(&self) -> VolatileIndex;
}

macro_rules! impl_entity {
    ($($ty:ty => $id:ty),* $(,)?) => {
        $(
            impl Entity for $ty {
                type Id = $id;

                fn id(&self) -> $id {
                    self.id
                }

                fn volatile_index(&self) -> VolatileIndex {
                    self.volatile
                }
            }
        )*
    };
}

impl_entity! {
    Bot => BotId,
    Pod => PodId,
    Waypoint => WaypointId,
    InputStation => InputStationId,
    OutputStation => OutputStationId,
    Elevator => ElevatorId,
    Tier => TierId,
    Semaphore => SemaphoreId,
    ItemDescription => ItemDescriptionId,
    ItemBundle => BundleId,
    Order => OrderId,
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A reference that is only resolvable once every entity exists.
///
/// Unwired until finalize. Entities are only reachable through a finalized
/// instance, so reading an unwired link is a kernel bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link<T>(Option<T>);

impl<T> Link<T> {
    pub(crate) const fn unwired() -> Self {
        Link(None)
    }

    pub(crate) fn wire(&mut self, value: T) {
        self.0 = Some(value);
    }

    pub fn is_wired(&self) -> bool {
        self.0.is_some()
    }

    /// # Panics
    ///
    /// Panics if the link has not been wired.
    pub fn get(&self) -> &T {
        match &self.0 {
            Some(v) => v,
            None => panic!("link read before finalize"),
        }
    }

    /// # Panics
    ///
    /// Panics if the link has not been wired.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        match &mut self.0 {
            Some(v) => v,
            None => panic!("link written before finalize"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Members of a tier, built by finalize and kept current on removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierRoster {
    pub bots: BTreeSet<BotId>,
    pub pods: BTreeSet<PodId>,
    pub waypoints: BTreeSet<WaypointId>,
    pub input_stations: BTreeSet<InputStationId>,
    pub output_stations: BTreeSet<OutputStationId>,
}

#[derive(Debug, Clone)]
pub struct Tier {
    pub(crate) id: TierId,
    pub(crate) volatile: VolatileIndex,
    pub length: f64,
    pub width: f64,
    pub roster: Link<TierRoster>,
}

impl Tier {
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        (0.0..=self.length).contains(&x) && (0.0..=self.width).contains(&y)
    }
}

// ---------------------------------------------------------------------------
// Waypoint
// ---------------------------------------------------------------------------

/// A station a waypoint serves as handover point for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StationRef {
    Input(InputStationId),
    Output(OutputStationId),
}

#[derive(Debug, Clone)]
pub struct Waypoint {
    pub(crate) id: WaypointId,
    pub(crate) volatile: VolatileIndex,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub storage_location: bool,
    pub queue: bool,
    pub station: Option<StationRef>,
    pub elevator: Option<ElevatorId>,
    /// Pod currently stored here.
    pub pod: Link<Option<PodId>>,
    pub stat_bot_visits: u64,
}

impl Waypoint {
    pub fn reset_statistics(&mut self) {
        self.stat_bot_visits = 0;
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:.2},{:.2})@{}", self.id, self.x, self.y, self.tier)
    }
}

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Bot {
    pub(crate) id: BotId,
    pub(crate) volatile: VolatileIndex,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Waypoint the bot is currently at, if any.
    pub waypoint: Option<WaypointId>,
    pub pod: Option<PodId>,
    pub stat_distance_traveled: f64,
    pub stat_assigned_tasks: u64,
    pub stat_collisions: u64,
}

impl Bot {
    pub fn reset_statistics(&mut self) {
        self.stat_distance_traveled = 0.0;
        self.stat_assigned_tasks = 0;
        self.stat_collisions = 0;
    }

    /// Whether the discs of two bots overlap.
    pub fn overlaps(&self, other: &Bot) -> bool {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let reach = self.radius + other.radius;
        dx * dx + dy * dy < reach * reach
    }
}

// ---------------------------------------------------------------------------
// Pod
// ---------------------------------------------------------------------------

/// Where a pod currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodLocation {
    Unplaced,
    Stored(WaypointId),
    Carried(BotId),
}

#[derive(Debug, Clone)]
pub struct Pod {
    pub(crate) id: PodId,
    pub(crate) volatile: VolatileIndex,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    pub capacity: Weight,
    pub capacity_in_use: Weight,
    pub capacity_reserved: Weight,
    pub location: Link<PodLocation>,
    pub claimed_by: Option<BotId>,
    /// Units stored per item description.
    pub contents: BTreeMap<ItemDescriptionId, u32>,
    /// Units promised to orders per item description.
    pub reserved_items: BTreeMap<ItemDescriptionId, u32>,
    pub stat_items_handled: u64,
    pub stat_bundles_handled: u64,
}

impl Pod {
    /// Stored units of `item` not yet promised to an order.
    pub fn available_units(&self, item: ItemDescriptionId) -> u32 {
        let stored = self.contents.get(&item).copied().unwrap_or(0);
        let reserved = self.reserved_items.get(&item).copied().unwrap_or(0);
        stored.saturating_sub(reserved)
    }

    /// Whether `weight` fits into the unused part of the pod.
    pub fn fits(&self, weight: Weight) -> bool {
        self.capacity_in_use + weight <= self.capacity
    }

    /// Whether `weight` fits once every pending reservation is stored.
    pub fn fits_for_reservation(&self, weight: Weight) -> bool {
        self.capacity_in_use + self.capacity_reserved + weight <= self.capacity
    }

    /// Weight still available for reservations.
    pub fn available(&self) -> Weight {
        self.capacity - self.capacity_in_use - self.capacity_reserved
    }

    pub fn reset_statistics(&mut self) {
        self.stat_items_handled = 0;
        self.stat_bundles_handled = 0;
    }
}

// ---------------------------------------------------------------------------
// Stations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InputStation {
    pub(crate) id: InputStationId,
    pub(crate) volatile: VolatileIndex,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    /// Number of bundles the station can hold at once.
    pub capacity: u32,
    pub assigned_bundles: BTreeSet<BundleId>,
    pub waypoint: Link<WaypointId>,
    pub stat_bundles_handled: u64,
}

impl InputStation {
    pub fn reset_statistics(&mut self) {
        self.stat_bundles_handled = 0;
    }
}

#[derive(Debug, Clone)]
pub struct OutputStation {
    pub(crate) id: OutputStationId,
    pub(crate) volatile: VolatileIndex,
    pub tier: TierId,
    pub x: f64,
    pub y: f64,
    /// Number of orders the station can work on at once.
    pub capacity: u32,
    pub assigned_orders: BTreeSet<OrderId>,
    pub waypoint: Link<WaypointId>,
    pub stat_items_handled: u64,
    pub stat_orders_handled: u64,
}

impl OutputStation {
    pub fn reset_statistics(&mut self) {
        self.stat_items_handled = 0;
        self.stat_orders_handled = 0;
    }
}

// ---------------------------------------------------------------------------
// Elevator & semaphore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Elevator {
    pub(crate) id: ElevatorId,
    pub(crate) volatile: VolatileIndex,
    /// Waypoints naming this elevator, collected by finalize.
    pub connected: Link<BTreeSet<WaypointId>>,
}

/// Entry or exit point of a semaphore-controlled zone: the path `from -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueGuard {
    pub from: WaypointId,
    pub to: WaypointId,
    pub entry: bool,
}

impl QueueGuard {
    pub fn touches(&self, wp: WaypointId) -> bool {
        self.from == wp || self.to == wp
    }
}

#[derive(Debug, Clone)]
pub struct Semaphore {
    pub(crate) id: SemaphoreId,
    pub(crate) volatile: VolatileIndex,
    pub capacity: u32,
    pub guards: Vec<QueueGuard>,
}

// ---------------------------------------------------------------------------
// Items, bundles, orders
// ---------------------------------------------------------------------------

/// Kind of a stock-keeping unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Simple,
    Letter,
}

impl FromStr for ItemKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ItemKind::Simple),
            "letter" => Ok(ItemKind::Letter),
            _ => Err(KernelError::UnknownVariant {
                selector: "item kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemDescription {
    pub(crate) id: ItemDescriptionId,
    pub(crate) volatile: VolatileIndex,
    pub kind: ItemKind,
    pub weight: Weight,
}

/// Lifecycle of an incoming bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    /// Arrived, not yet assigned to a pod.
    Backlog,
    /// A pod has reserved room for it.
    Registered(PodId),
    /// Physically placed in the pod.
    Stored(PodId),
}

#[derive(Debug, Clone)]
pub struct ItemBundle {
    pub(crate) id: BundleId,
    pub(crate) volatile: VolatileIndex,
    pub description: ItemDescriptionId,
    pub count: u32,
    /// `count * description.weight`, fixed at creation.
    pub weight: Weight,
    pub state: BundleState,
    pub station: Option<InputStationId>,
    pub placed_at: SimTime,
    pub allocated_at: Option<SimTime>,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) volatile: VolatileIndex,
    /// Ordered quantity per item description.
    pub positions: BTreeMap<ItemDescriptionId, u32>,
    /// Quantity already picked per item description.
    pub served: BTreeMap<ItemDescriptionId, u32>,
    pub station: Option<OutputStationId>,
    pub placed_at: SimTime,
    pub allocated_at: Option<SimTime>,
    pub due_time: SimTime,
    pub completed: bool,
}

impl Order {
    pub fn total_units(&self) -> u64 {
        self.positions.values().map(|&q| q as u64).sum()
    }

    pub fn open_units(&self, item: ItemDescriptionId) -> u32 {
        let ordered = self.positions.get(&item).copied().unwrap_or(0);
        let served = self.served.get(&item).copied().unwrap_or(0);
        ordered.saturating_sub(served)
    }

    pub fn line_complete(&self, item: ItemDescriptionId) -> bool {
        self.positions.contains_key(&item) && self.open_units(item) == 0
    }

    pub fn is_fulfilled(&self) -> bool {
        self.positions.keys().all(|&item| self.open_units(item) == 0)
    }
}
