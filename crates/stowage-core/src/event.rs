//! Domain events and the synchronous observer bus.
//!
//! Every event has exactly one publication point inside the kernel. The
//! publishing operation first updates the kernel's own aggregates and then
//! hands the same payload to the bus, which calls the observers registered
//! for that kind in registration order before returning.
//!
//! # Subscribers
//!
//! Observers are registered on an [`EventBusBuilder`] while the instance is
//! being built. Finalizing the instance freezes the list into an
//! [`EventBus`] that has no way to add or remove subscribers. Observers
//! receive `&Event`, a self-contained value with no access to kernel state,
//! so they can only read.

use crate::fixed::{SimTime, Weight};
use crate::id::*;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Direction of a completed station trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TripKind {
    /// A trip to an output (picking) station.
    Output,
    /// A trip to an input (replenishment) station.
    Input,
}

impl TripKind {
    pub fn code(self) -> &'static str {
        match self {
            TripKind::Output => "O",
            TripKind::Input => "I",
        }
    }
}

/// A station where a pod was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationVisit {
    Input(InputStationId),
    Output(OutputStationId),
}

/// A kernel event. Every event carries the simulation time it occurred at.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // -- Picking --
    ItemHandled {
        bot: Option<BotId>,
        pod: PodId,
        station: OutputStationId,
        order: OrderId,
        item: ItemDescriptionId,
        time: SimTime,
    },
    LineHandled {
        station: OutputStationId,
        order: OrderId,
        item: ItemDescriptionId,
        time: SimTime,
    },
    OrderCompleted {
        station: OutputStationId,
        order: OrderId,
        turnover: f64,
        throughput: f64,
        lateness: f64,
        time: SimTime,
    },

    // -- Movement --
    Collision {
        bot: BotId,
        tier: TierId,
        time: SimTime,
    },
    TripCompleted {
        bot: BotId,
        trip: TripKind,
        duration: f64,
        time: SimTime,
    },
    RepositioningStarted {
        bot: BotId,
        pod: PodId,
        target: WaypointId,
        time: SimTime,
    },

    // -- Pods --
    PodClaimed {
        bot: BotId,
        pod: PodId,
        time: SimTime,
    },
    PodPickedUp {
        bot: BotId,
        pod: PodId,
        waypoint: WaypointId,
        time: SimTime,
    },
    PodSetDown {
        bot: BotId,
        pod: PodId,
        waypoint: WaypointId,
        time: SimTime,
    },
    PodHandled {
        pod: PodId,
        station: StationVisit,
        time: SimTime,
    },
    PodAdded {
        pod: PodId,
        time: SimTime,
    },

    // -- Storage decisions --
    ItemStorageDecided {
        bundle: BundleId,
        pod: PodId,
        time: SimTime,
    },
    StorageAllocationAvailable {
        bundle: BundleId,
        pod: PodId,
        station: InputStationId,
        time: SimTime,
    },
    ReplenishmentBatchDecided {
        pod: PodId,
        station: InputStationId,
        time: SimTime,
    },

    // -- Bundles --
    BundleRegistered {
        bundle: BundleId,
        pod: PodId,
        weight: Weight,
        time: SimTime,
    },
    BundleStored {
        bundle: BundleId,
        pod: PodId,
        station: Option<InputStationId>,
        bot: Option<BotId>,
        weight: Weight,
        time: SimTime,
    },
    BundleAllocated {
        bundle: BundleId,
        station: InputStationId,
        time: SimTime,
    },
    InitialBundleStored {
        bundle: BundleId,
        pod: PodId,
        weight: Weight,
        time: SimTime,
    },

    // -- Items --
    ItemExtracted {
        pod: PodId,
        item: ItemDescriptionId,
        weight: Weight,
        time: SimTime,
    },
    ItemReserved {
        pod: PodId,
        item: ItemDescriptionId,
        order: OrderId,
        time: SimTime,
    },
    ItemUnreserved {
        pod: PodId,
        item: ItemDescriptionId,
        order: OrderId,
        time: SimTime,
    },

    // -- Orders --
    OrderAllocated {
        order: OrderId,
        station: OutputStationId,
        time: SimTime,
    },

    // -- Arrivals --
    BundlePlaced {
        bundle: BundleId,
        weight: Weight,
        time: SimTime,
    },
    OrderPlaced {
        order: OrderId,
        units: u64,
        time: SimTime,
    },
    BundleRejected {
        item: ItemDescriptionId,
        count: u32,
        time: SimTime,
    },
    OrderRejected {
        units: u64,
        time: SimTime,
    },
    BundleGenerationPaused {
        time: SimTime,
    },
    OrderGenerationPaused {
        time: SimTime,
    },
}

/// Discriminant tag for event types, used for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ItemHandled,
    LineHandled,
    OrderCompleted,
    Collision,
    TripCompleted,
    RepositioningStarted,
    PodClaimed,
    PodPickedUp,
    PodSetDown,
    PodHandled,
    PodAdded,
    ItemStorageDecided,
    StorageAllocationAvailable,
    ReplenishmentBatchDecided,
    BundleRegistered,
    BundleStored,
    BundleAllocated,
    InitialBundleStored,
    ItemExtracted,
    ItemReserved,
    ItemUnreserved,
    OrderAllocated,
    BundlePlaced,
    OrderPlaced,
    BundleRejected,
    OrderRejected,
    BundleGenerationPaused,
    OrderGenerationPaused,
}

/// Total number of event kinds.
pub const EVENT_KIND_COUNT: usize = 28;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ItemHandled { .. } => EventKind::ItemHandled,
            Event::LineHandled { .. } => EventKind::LineHandled,
            Event::OrderCompleted { .. } => EventKind::OrderCompleted,
            Event::Collision { .. } => EventKind::Collision,
            Event::TripCompleted { .. } => EventKind::TripCompleted,
            Event::RepositioningStarted { .. } => EventKind::RepositioningStarted,
            Event::PodClaimed { .. } => EventKind::PodClaimed,
            Event::PodPickedUp { .. } => EventKind::PodPickedUp,
            Event::PodSetDown { .. } => EventKind::PodSetDown,
            Event::PodHandled { .. } => EventKind::PodHandled,
            Event::PodAdded { .. } => EventKind::PodAdded,
            Event::ItemStorageDecided { .. } => EventKind::ItemStorageDecided,
            Event::StorageAllocationAvailable { .. } => EventKind::StorageAllocationAvailable,
            Event::ReplenishmentBatchDecided { .. } => EventKind::ReplenishmentBatchDecided,
            Event::BundleRegistered { .. } => EventKind::BundleRegistered,
            Event::BundleStored { .. } => EventKind::BundleStored,
            Event::BundleAllocated { .. } => EventKind::BundleAllocated,
            Event::InitialBundleStored { .. } => EventKind::InitialBundleStored,
            Event::ItemExtracted { .. } => EventKind::ItemExtracted,
            Event::ItemReserved { .. } => EventKind::ItemReserved,
            Event::ItemUnreserved { .. } => EventKind::ItemUnreserved,
            Event::OrderAllocated { .. } => EventKind::OrderAllocated,
            Event::BundlePlaced { .. } => EventKind::BundlePlaced,
            Event::OrderPlaced { .. } => EventKind::OrderPlaced,
            Event::BundleRejected { .. } => EventKind::BundleRejected,
            Event::OrderRejected { .. } => EventKind::OrderRejected,
            Event::BundleGenerationPaused { .. } => EventKind::BundleGenerationPaused,
            Event::OrderGenerationPaused { .. } => EventKind::OrderGenerationPaused,
        }
    }

    /// Simulation time the event occurred at.
    pub fn time(&self) -> SimTime {
        match *self {
            Event::ItemHandled { time, .. }
            | Event::LineHandled { time, .. }
            | Event::OrderCompleted { time, .. }
            | Event::Collision { time, .. }
            | Event::TripCompleted { time, .. }
            | Event::RepositioningStarted { time, .. }
            | Event::PodClaimed { time, .. }
            | Event::PodPickedUp { time, .. }
            | Event::PodSetDown { time, .. }
            | Event::PodHandled { time, .. }
            | Event::PodAdded { time, .. }
            | Event::ItemStorageDecided { time, .. }
            | Event::StorageAllocationAvailable { time, .. }
            | Event::ReplenishmentBatchDecided { time, .. }
            | Event::BundleRegistered { time, .. }
            | Event::BundleStored { time, .. }
            | Event::BundleAllocated { time, .. }
            | Event::InitialBundleStored { time, .. }
            | Event::ItemExtracted { time, .. }
            | Event::ItemReserved { time, .. }
            | Event::ItemUnreserved { time, .. }
            | Event::OrderAllocated { time, .. }
            | Event::BundlePlaced { time, .. }
            | Event::OrderPlaced { time, .. }
            | Event::BundleRejected { time, .. }
            | Event::OrderRejected { time, .. }
            | Event::BundleGenerationPaused { time }
            | Event::OrderGenerationPaused { time } => time,
        }
    }
}

impl EventKind {
    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Observers & filters
// ---------------------------------------------------------------------------

/// An observer receives events read-only. It must return promptly.
pub type Observer = Box<dyn FnMut(&Event)>;

/// Optional predicate that filters events for an observer.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

struct SubscriberEntry {
    observer: Observer,
    filter: Option<EventFilter>,
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("observer", &"<fn>")
            .field(
                "filter",
                &if self.filter.is_some() {
                    "Some(<fn>)"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventBusBuilder
// ---------------------------------------------------------------------------

/// Collects observers before the instance is finalized.
#[derive(Debug)]
pub struct EventBusBuilder {
    subscribers: [Vec<SubscriberEntry>; EVENT_KIND_COUNT],
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self {
            subscribers: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Register an observer for one event kind. Observers of a kind are
    /// called in registration order.
    pub fn subscribe(&mut self, kind: EventKind, observer: Observer) {
        self.subscribe_filtered(kind, None, observer);
    }

    /// Register an observer that only sees events passing `filter`.
    pub fn subscribe_filtered(
        &mut self,
        kind: EventKind,
        filter: Option<EventFilter>,
        observer: Observer,
    ) {
        self.subscribers[kind.index()].push(SubscriberEntry { observer, filter });
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers[kind.index()].len()
    }

    /// Freeze the subscriber lists.
    pub fn build(self) -> EventBus {
        EventBus {
            subscribers: self.subscribers,
            published: [0; EVENT_KIND_COUNT],
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Frozen fan-out to observers.
#[derive(Debug)]
pub struct EventBus {
    subscribers: [Vec<SubscriberEntry>; EVENT_KIND_COUNT],
    published: [u64; EVENT_KIND_COUNT],
}

impl Default for EventBus {
    fn default() -> Self {
        EventBusBuilder::new().build()
    }
}

impl EventBus {
    /// Deliver `event` to every observer of its kind, in registration order.
    pub(crate) fn publish(&mut self, event: &Event) {
        let idx = event.kind().index();
        self.published[idx] += 1;
        for entry in &mut self.subscribers[idx] {
            if let Some(ref filter) = entry.filter
                && !filter(event)
            {
                continue;
            }
            (entry.observer)(event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers[kind.index()].len()
    }

    /// Events of `kind` published so far. Not affected by statistics resets.
    pub fn published_count(&self, kind: EventKind) -> u64 {
        self.published[kind.index()]
    }
}

// ===========================================================================
// Tests
// ===========================================================================
