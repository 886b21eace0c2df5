//! Kernel operations: the only way subsystems change shared state.
//!
//! Each operation validates first and mutates after, so a failed call
//! leaves the kernel untouched. Every event kind is published from exactly
//! one place: either a `notify_*` function, when the event also moves
//! capacity totals or statistics, or the operation itself. The aggregates
//! are updated before the bus sees the event. A sink failure while recording
//! does not fail the operation; it is held on the kernel and raised by the
//! next observer pass or the final flush.

use std::collections::BTreeMap;

use crate::builder::PodSpec;
use crate::entity::*;
use crate::error::KernelError;
use crate::event::{Event, StationVisit, TripKind};
use crate::fixed::{SimTime, Weight};
use crate::id::*;
use crate::instance::Kernel;

/// What a pick completed besides the unit itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PickOutcome {
    pub line_completed: bool,
    pub order_completed: bool,
}

impl Kernel {
    fn publish(&mut self, event: Event) {
        self.bus.publish(&event);
    }

    fn carrier_of(&self, pod: PodId) -> Result<Option<BotId>, KernelError> {
        let pod = self.store.get::<Pod>(pod)?;
        Ok(match *pod.location.get() {
            PodLocation::Carried(bot) => Some(bot),
            _ => None,
        })
    }

    // -----------------------------------------------------------------------
    // Picking
    // -----------------------------------------------------------------------

    /// Pick one unit of `item` for `order` from `pod` at `station`.
    ///
    /// Serves a request reserved on `pod` if there is one, otherwise an open
    /// request, in which case the pod needs an unreserved unit. Completes the
    /// order line and the order when they fill up.
    pub fn pick_item(
        &mut self,
        station: OutputStationId,
        order: OrderId,
        pod: PodId,
        item: ItemDescriptionId,
    ) -> Result<PickOutcome, KernelError> {
        self.store.get::<OutputStation>(station)?;
        let o = self.store.get::<Order>(order)?;
        if o.completed {
            return Err(KernelError::invalid(order, "order already completed"));
        }
        if o.station != Some(station) {
            return Err(KernelError::invalid(order, "order is not allocated to the station"));
        }
        if o.open_units(item) == 0 {
            return Err(KernelError::invalid(order, "item is not open in the order"));
        }
        let p = self.store.get::<Pod>(pod)?;
        if p.contents.get(&item).copied().unwrap_or(0) == 0 {
            return Err(KernelError::invalid(pod, "pod does not hold the item"));
        }
        let reserved = self.resources.is_reserved(order, item, pod);
        if !reserved && p.available_units(item) == 0 {
            return Err(KernelError::invalid(pod, "every unit of the item is reserved"));
        }
        let bot = self.carrier_of(pod)?;

        self.resources.complete(order, item, pod)?;
        self.extract_unit(pod, item, reserved)?;

        let p = self.store.get_mut::<Pod>(pod)?;
        p.stat_items_handled += 1;
        let pod_items = p.stat_items_handled;
        self.store.get_mut::<OutputStation>(station)?.stat_items_handled += 1;
        let o = self.store.get_mut::<Order>(order)?;
        *o.served.entry(item).or_insert(0) += 1;
        let line_completed = o.line_complete(item);
        let order_completed = o.is_fulfilled();

        self.notify_item_handled(bot, pod, station, order, item, pod_items);
        if line_completed {
            self.notify_line_handled(station, order, item);
        }
        if order_completed {
            self.complete_order(station, order)?;
        }
        Ok(PickOutcome {
            line_completed,
            order_completed,
        })
    }

    fn complete_order(&mut self, station: OutputStationId, order: OrderId) -> Result<(), KernelError> {
        let now = self.now();
        let o = self.store.get_mut::<Order>(order)?;
        o.completed = true;
        let turnover = now - o.placed_at;
        let throughput = now - o.allocated_at.unwrap_or(o.placed_at);
        // Orders without a due time are never late.
        let lateness = if o.due_time.is_finite() { now - o.due_time } else { 0.0 };
        let s = self.store.get_mut::<OutputStation>(station)?;
        s.assigned_orders.remove(&order);
        s.stat_orders_handled += 1;
        self.resources.drop_order(order);
        self.notify_order_completed(station, order, turnover, throughput, lateness);
        Ok(())
    }

    /// Remove one unreserved unit of `item` from `pod` without an order.
    pub fn extract_item(&mut self, pod: PodId, item: ItemDescriptionId) -> Result<Weight, KernelError> {
        if self.store.get::<Pod>(pod)?.available_units(item) == 0 {
            return Err(KernelError::invalid(pod, "no unreserved unit of the item"));
        }
        self.extract_unit(pod, item, false)
    }

    fn extract_unit(
        &mut self,
        pod: PodId,
        item: ItemDescriptionId,
        release_reservation: bool,
    ) -> Result<Weight, KernelError> {
        let weight = self.store.get::<ItemDescription>(item)?.weight;
        let p = self.store.get_mut::<Pod>(pod)?;
        decrement(&mut p.contents, item);
        if release_reservation {
            decrement(&mut p.reserved_items, item);
        }
        p.capacity_in_use -= weight;
        self.notify_item_extracted(pod, item, weight);
        Ok(weight)
    }

    /// Promise one unit of `item` in `pod` to `order`.
    pub fn reserve_item(
        &mut self,
        pod: PodId,
        order: OrderId,
        item: ItemDescriptionId,
    ) -> Result<(), KernelError> {
        if self.store.get::<Pod>(pod)?.available_units(item) == 0 {
            return Err(KernelError::invalid(pod, "no unreserved unit of the item"));
        }
        self.store.get::<Order>(order)?;
        self.resources.reserve(order, item, pod)?;
        let p = self.store.get_mut::<Pod>(pod)?;
        *p.reserved_items.entry(item).or_insert(0) += 1;
        let time = self.now();
        self.publish(Event::ItemReserved {
            pod,
            item,
            order,
            time,
        });
        Ok(())
    }

    pub fn release_item_reservation(
        &mut self,
        pod: PodId,
        order: OrderId,
        item: ItemDescriptionId,
    ) -> Result<(), KernelError> {
        self.store.get::<Pod>(pod)?;
        self.resources.unreserve(order, item, pod)?;
        let p = self.store.get_mut::<Pod>(pod)?;
        decrement(&mut p.reserved_items, item);
        let time = self.now();
        self.publish(Event::ItemUnreserved {
            pod,
            item,
            order,
            time,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Movement
    // -----------------------------------------------------------------------

    /// Move `bot` to `(x, y)`, optionally arriving at `waypoint`. A carried
    /// pod moves along; arriving at a waypoint on another tier moves both to
    /// that tier.
    pub fn move_bot(
        &mut self,
        bot: BotId,
        x: f64,
        y: f64,
        waypoint: Option<WaypointId>,
    ) -> Result<(), KernelError> {
        let b = self.store.get::<Bot>(bot)?;
        let (from_tier, carried, previous) = (b.tier, b.pod, b.waypoint);
        let to_tier = match waypoint {
            Some(wp) => self.store.get::<Waypoint>(wp)?.tier,
            None => from_tier,
        };

        let b = self.store.get_mut::<Bot>(bot)?;
        b.stat_distance_traveled += (x - b.x).hypot(y - b.y);
        b.x = x;
        b.y = y;
        b.waypoint = waypoint;
        b.tier = to_tier;
        if let Some(pod) = carried {
            let p = self.store.get_mut::<Pod>(pod)?;
            p.x = x;
            p.y = y;
            p.tier = to_tier;
        }
        if let Some(wp) = waypoint
            && previous != Some(wp)
        {
            self.store.get_mut::<Waypoint>(wp)?.stat_bot_visits += 1;
        }
        if to_tier != from_tier {
            self.roster_mut(from_tier)?.bots.remove(&bot);
            self.roster_mut(to_tier)?.bots.insert(bot);
            if let Some(pod) = carried {
                self.roster_mut(from_tier)?.pods.remove(&pod);
                self.roster_mut(to_tier)?.pods.insert(pod);
            }
        }
        Ok(())
    }

    pub(crate) fn roster_mut(&mut self, tier: TierId) -> Result<&mut TierRoster, KernelError> {
        Ok(self.store.get_mut::<Tier>(tier)?.roster.get_mut())
    }

    pub fn assign_task(&mut self, bot: BotId) -> Result<(), KernelError> {
        self.store.get_mut::<Bot>(bot)?.stat_assigned_tasks += 1;
        Ok(())
    }

    /// Ask the crash handler to check `bot` at the end of this tick.
    pub fn flag_potential_collision(&mut self, bot: BotId) -> Result<(), KernelError> {
        self.store.get::<Bot>(bot)?;
        self.collisions.flag(bot);
        Ok(())
    }

    /// Record a collision detected outside the crash handler.
    pub fn report_collision(&mut self, bot: BotId) -> Result<(), KernelError> {
        let tier = self.store.get::<Bot>(bot)?.tier;
        self.notify_collision(bot, tier)
    }

    pub fn complete_trip(&mut self, bot: BotId, trip: TripKind, duration: f64) -> Result<(), KernelError> {
        self.store.get::<Bot>(bot)?;
        let now = self.now();
        let recorded = self.stats.record_trip(now, trip, duration, self.sink.as_mut());
        self.defer_sink_error(recorded);
        self.publish(Event::TripCompleted {
            bot,
            trip,
            duration,
            time: now,
        });
        Ok(())
    }

    pub fn start_repositioning(
        &mut self,
        bot: BotId,
        pod: PodId,
        target: WaypointId,
    ) -> Result<(), KernelError> {
        self.store.get::<Bot>(bot)?;
        self.store.get::<Pod>(pod)?;
        if !self.store.get::<Waypoint>(target)?.storage_location {
            return Err(KernelError::invalid(target, "target is not a storage location"));
        }
        let now = self.now();
        let recorded = self
            .stats
            .record_repositioning(now, bot, pod, target, self.sink.as_mut());
        self.defer_sink_error(recorded);
        self.publish(Event::RepositioningStarted {
            bot,
            pod,
            target,
            time: now,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pods
    // -----------------------------------------------------------------------

    pub fn claim_pod(&mut self, bot: BotId, pod: PodId) -> Result<(), KernelError> {
        self.store.get::<Bot>(bot)?;
        let p = self.store.get_mut::<Pod>(pod)?;
        if p.claimed_by.is_some_and(|other| other != bot) {
            return Err(KernelError::invalid(pod, "pod is claimed by another bot"));
        }
        p.claimed_by = Some(bot);
        let time = self.now();
        self.publish(Event::PodClaimed { bot, pod, time });
        Ok(())
    }

    /// Drop a claim without publishing.
    pub fn release_claim(&mut self, bot: BotId, pod: PodId) -> Result<(), KernelError> {
        let p = self.store.get_mut::<Pod>(pod)?;
        if p.claimed_by != Some(bot) {
            return Err(KernelError::invalid(pod, "pod is not claimed by the bot"));
        }
        p.claimed_by = None;
        Ok(())
    }

    /// Lift `pod` from the waypoint `bot` stands on.
    pub fn pickup_pod(&mut self, bot: BotId, pod: PodId) -> Result<(), KernelError> {
        let b = self.store.get::<Bot>(bot)?;
        if b.pod.is_some() {
            return Err(KernelError::invalid(bot, "bot already carries a pod"));
        }
        let p = self.store.get::<Pod>(pod)?;
        let PodLocation::Stored(wp) = *p.location.get() else {
            return Err(KernelError::invalid(pod, "pod is not stored"));
        };
        if b.waypoint != Some(wp) {
            return Err(KernelError::invalid(bot, "bot is not at the pod's waypoint"));
        }
        if p.claimed_by.is_some_and(|other| other != bot) {
            return Err(KernelError::invalid(pod, "pod is claimed by another bot"));
        }

        let w = self.store.get_mut::<Waypoint>(wp)?;
        *w.pod.get_mut() = None;
        let storage = w.storage_location;
        let p = self.store.get_mut::<Pod>(pod)?;
        *p.location.get_mut() = PodLocation::Carried(bot);
        p.claimed_by = Some(bot);
        self.store.get_mut::<Bot>(bot)?.pod = Some(pod);
        if storage {
            self.resources.vacate(wp);
        }
        let time = self.now();
        self.publish(Event::PodPickedUp {
            bot,
            pod,
            waypoint: wp,
            time,
        });
        Ok(())
    }

    /// Put the carried pod down on the bot's waypoint.
    pub fn setdown_pod(&mut self, bot: BotId) -> Result<PodId, KernelError> {
        let b = self.store.get::<Bot>(bot)?;
        let pod = b.pod.ok_or_else(|| KernelError::invalid(bot, "bot carries no pod"))?;
        let wp = b
            .waypoint
            .ok_or_else(|| KernelError::invalid(bot, "bot is not at a waypoint"))?;
        let w = self.store.get::<Waypoint>(wp)?;
        if w.pod.get().is_some() {
            return Err(KernelError::invalid(wp, "waypoint already holds a pod"));
        }
        let (x, y, storage) = (w.x, w.y, w.storage_location);

        *self.store.get_mut::<Waypoint>(wp)?.pod.get_mut() = Some(pod);
        let p = self.store.get_mut::<Pod>(pod)?;
        *p.location.get_mut() = PodLocation::Stored(wp);
        p.x = x;
        p.y = y;
        p.claimed_by = None;
        self.store.get_mut::<Bot>(bot)?.pod = None;
        if storage {
            self.resources.occupy(wp);
        }
        let time = self.now();
        self.publish(Event::PodSetDown {
            bot,
            pod,
            waypoint: wp,
            time,
        });
        Ok(pod)
    }

    /// Record that `pod` was used at a station.
    pub fn handle_pod(&mut self, pod: PodId, station: StationVisit) -> Result<(), KernelError> {
        self.store.get::<Pod>(pod)?;
        match station {
            StationVisit::Input(s) => {
                self.store.get::<InputStation>(s)?;
            }
            StationVisit::Output(s) => {
                self.store.get::<OutputStation>(s)?;
            }
        }
        let time = self.now();
        self.publish(Event::PodHandled { pod, station, time });
        Ok(())
    }

    /// Add a pod while the instance is live.
    pub fn add_pod(&mut self, spec: PodSpec) -> Result<PodId, KernelError> {
        let (tier, x, y) = match spec.waypoint {
            Some(wp) => {
                let w = self.store.get::<Waypoint>(wp)?;
                if w.pod.get().is_some() {
                    return Err(KernelError::invalid(wp, "waypoint already holds a pod"));
                }
                (w.tier, w.x, w.y)
            }
            None => (spec.tier, spec.x, spec.y),
        };
        self.store.get::<Tier>(tier)?;

        let location = spec.waypoint.map_or(PodLocation::Unplaced, PodLocation::Stored);
        let id = self.store.create::<Pod>(spec.id, |id, volatile| {
            let mut pod = spec.build(id, volatile);
            pod.tier = tier;
            pod.x = x;
            pod.y = y;
            pod.location.wire(location);
            pod
        })?;
        self.roster_mut(tier)?.pods.insert(id);
        if let Some(wp) = spec.waypoint {
            let w = self.store.get_mut::<Waypoint>(wp)?;
            *w.pod.get_mut() = Some(id);
            if w.storage_location {
                self.resources.occupy(wp);
            }
        }
        self.notify_pod_added(id)?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Storage decisions
    // -----------------------------------------------------------------------

    pub fn decide_item_storage(&mut self, bundle: BundleId, pod: PodId) -> Result<(), KernelError> {
        self.store.get::<ItemBundle>(bundle)?;
        self.store.get::<Pod>(pod)?;
        let time = self.now();
        self.publish(Event::ItemStorageDecided { bundle, pod, time });
        Ok(())
    }

    pub fn signal_storage_allocation_available(
        &mut self,
        bundle: BundleId,
        pod: PodId,
        station: InputStationId,
    ) -> Result<(), KernelError> {
        self.store.get::<ItemBundle>(bundle)?;
        self.store.get::<Pod>(pod)?;
        self.store.get::<InputStation>(station)?;
        let time = self.now();
        self.publish(Event::StorageAllocationAvailable {
            bundle,
            pod,
            station,
            time,
        });
        Ok(())
    }

    pub fn decide_replenishment_batch(
        &mut self,
        pod: PodId,
        station: InputStationId,
    ) -> Result<(), KernelError> {
        self.store.get::<Pod>(pod)?;
        self.store.get::<InputStation>(station)?;
        let time = self.now();
        self.publish(Event::ReplenishmentBatchDecided { pod, station, time });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bundles
    // -----------------------------------------------------------------------

    /// A new bundle arrives in the backlog.
    pub fn place_bundle(&mut self, item: ItemDescriptionId, count: u32) -> Result<BundleId, KernelError> {
        if count == 0 {
            return Err(KernelError::Empty {
                kind: EntityKind::ItemBundle,
            });
        }
        let weight = units_weight(self.store.get::<ItemDescription>(item)?.weight, count)?;
        let now = self.now();
        let id = self.store.create::<ItemBundle>(None, |id, volatile| ItemBundle {
            id,
            volatile,
            description: item,
            count,
            weight,
            state: BundleState::Backlog,
            station: None,
            placed_at: now,
            allocated_at: None,
        })?;
        self.notify_bundle_placed(id, weight);
        Ok(id)
    }

    pub fn reject_bundle(&mut self, item: ItemDescriptionId, count: u32) -> Result<(), KernelError> {
        self.store.get::<ItemDescription>(item)?;
        self.stats.record_bundle_rejected();
        let time = self.now();
        self.publish(Event::BundleRejected { item, count, time });
        Ok(())
    }

    pub fn allocate_bundle(&mut self, bundle: BundleId, station: InputStationId) -> Result<(), KernelError> {
        let b = self.store.get::<ItemBundle>(bundle)?;
        if matches!(b.state, BundleState::Stored(_)) {
            return Err(KernelError::invalid(bundle, "bundle is already stored"));
        }
        if b.station.is_some() {
            return Err(KernelError::invalid(bundle, "bundle is already allocated"));
        }
        let s = self.store.get::<InputStation>(station)?;
        if s.assigned_bundles.len() >= s.capacity as usize {
            return Err(KernelError::invalid(station, "station is full"));
        }

        let now = self.now();
        let b = self.store.get_mut::<ItemBundle>(bundle)?;
        b.station = Some(station);
        b.allocated_at = Some(now);
        self.store
            .get_mut::<InputStation>(station)?
            .assigned_bundles
            .insert(bundle);
        self.publish(Event::BundleAllocated {
            bundle,
            station,
            time: now,
        });
        Ok(())
    }

    /// Reserve room in `pod` for a backlog bundle.
    pub fn register_bundle(&mut self, bundle: BundleId, pod: PodId) -> Result<(), KernelError> {
        let b = self.store.get::<ItemBundle>(bundle)?;
        if b.state != BundleState::Backlog {
            return Err(KernelError::invalid(bundle, "bundle is not in the backlog"));
        }
        let weight = b.weight;
        let p = self.store.get::<Pod>(pod)?;
        if !p.fits_for_reservation(weight) {
            return Err(KernelError::InsufficientCapacity {
                pod,
                requested: weight,
                available: p.available(),
            });
        }

        self.store.get_mut::<Pod>(pod)?.capacity_reserved += weight;
        self.store.get_mut::<ItemBundle>(bundle)?.state = BundleState::Registered(pod);
        self.notify_bundle_registered(bundle, pod, weight);
        Ok(())
    }

    /// Physically place a registered bundle into its pod.
    pub fn store_bundle(&mut self, bundle: BundleId, bot: Option<BotId>) -> Result<(), KernelError> {
        let b = self.store.get::<ItemBundle>(bundle)?;
        let BundleState::Registered(pod) = b.state else {
            return Err(KernelError::invalid(bundle, "bundle is not registered"));
        };
        let (weight, item, count, station) = (b.weight, b.description, b.count, b.station);
        let now = self.now();
        let turnover = now - b.placed_at;
        let throughput = now - b.allocated_at.unwrap_or(b.placed_at);
        if let Some(bot) = bot {
            self.store.get::<Bot>(bot)?;
        }

        let p = self.store.get_mut::<Pod>(pod)?;
        p.capacity_reserved -= weight;
        p.capacity_in_use += weight;
        *p.contents.entry(item).or_insert(0) += count;
        p.stat_bundles_handled += 1;
        let pod_bundles = p.stat_bundles_handled;
        self.store.get_mut::<ItemBundle>(bundle)?.state = BundleState::Stored(pod);
        if let Some(s) = station {
            let s = self.store.get_mut::<InputStation>(s)?;
            s.assigned_bundles.remove(&bundle);
            s.stat_bundles_handled += 1;
        }
        self.notify_bundle_stored(BundleStored {
            bundle,
            pod,
            station,
            bot,
            weight,
            pod_bundles,
            turnover,
            throughput,
        });
        Ok(())
    }

    /// Stock a pod with inventory that exists before the run starts.
    pub fn store_initial_bundle(
        &mut self,
        pod: PodId,
        item: ItemDescriptionId,
        count: u32,
    ) -> Result<BundleId, KernelError> {
        if count == 0 {
            return Err(KernelError::Empty {
                kind: EntityKind::ItemBundle,
            });
        }
        let weight = units_weight(self.store.get::<ItemDescription>(item)?.weight, count)?;
        let p = self.store.get::<Pod>(pod)?;
        // Room promised to registered bundles is not free stock space.
        if !p.fits_for_reservation(weight) {
            return Err(KernelError::InsufficientCapacity {
                pod,
                requested: weight,
                available: p.available(),
            });
        }

        let now = self.now();
        let id = self.store.create::<ItemBundle>(None, |id, volatile| ItemBundle {
            id,
            volatile,
            description: item,
            count,
            weight,
            state: BundleState::Stored(pod),
            station: None,
            placed_at: now,
            allocated_at: Some(now),
        })?;
        let p = self.store.get_mut::<Pod>(pod)?;
        p.capacity_in_use += weight;
        *p.contents.entry(item).or_insert(0) += count;
        self.notify_initial_bundle_stored(id, pod, weight);
        Ok(id)
    }

    pub fn pause_bundle_generation(&mut self) {
        self.stats.record_bundle_generation_paused();
        let time = self.now();
        self.publish(Event::BundleGenerationPaused { time });
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// A new order arrives. Positions with zero quantity are dropped, and
    /// orders above `max_order_units` are refused.
    pub fn place_order(
        &mut self,
        positions: BTreeMap<ItemDescriptionId, u32>,
        due_time: Option<SimTime>,
    ) -> Result<OrderId, KernelError> {
        let positions: BTreeMap<_, _> = positions.into_iter().filter(|&(_, q)| q > 0).collect();
        if positions.is_empty() {
            return Err(KernelError::Empty {
                kind: EntityKind::Order,
            });
        }
        for &item in positions.keys() {
            self.store.get::<ItemDescription>(item)?;
        }
        let units: u64 = positions.values().map(|&q| u64::from(q)).sum();
        let limit = self.config.max_order_units;
        if units > limit {
            return Err(KernelError::OrderTooLarge { units, limit });
        }
        let now = self.now();
        let id = self.store.create::<Order>(None, |id, volatile| Order {
            id,
            volatile,
            positions,
            served: BTreeMap::new(),
            station: None,
            placed_at: now,
            allocated_at: None,
            due_time: due_time.unwrap_or(SimTime::INFINITY),
            completed: false,
        })?;
        self.notify_order_placed(id)?;
        Ok(id)
    }

    pub fn reject_order(&mut self, units: u64) {
        self.stats.record_order_rejected();
        let time = self.now();
        self.publish(Event::OrderRejected { units, time });
    }

    pub fn allocate_order(&mut self, order: OrderId, station: OutputStationId) -> Result<(), KernelError> {
        let o = self.store.get::<Order>(order)?;
        if o.completed {
            return Err(KernelError::invalid(order, "order already completed"));
        }
        if o.station.is_some() {
            return Err(KernelError::invalid(order, "order is already allocated"));
        }
        let s = self.store.get::<OutputStation>(station)?;
        if s.assigned_orders.len() >= s.capacity as usize {
            return Err(KernelError::invalid(station, "station is full"));
        }

        let now = self.now();
        let o = self.store.get_mut::<Order>(order)?;
        o.station = Some(station);
        o.allocated_at = Some(now);
        self.store
            .get_mut::<OutputStation>(station)?
            .assigned_orders
            .insert(order);
        self.resources.assign_station(order, Some(station));
        self.publish(Event::OrderAllocated {
            order,
            station,
            time: now,
        });
        Ok(())
    }

    pub fn pause_order_generation(&mut self) {
        self.stats.record_order_generation_paused();
        let time = self.now();
        self.publish(Event::OrderGenerationPaused { time });
    }

    // -----------------------------------------------------------------------
    // Publication points with aggregate effects
    // -----------------------------------------------------------------------

    fn notify_item_handled(
        &mut self,
        bot: Option<BotId>,
        pod: PodId,
        station: OutputStationId,
        order: OrderId,
        item: ItemDescriptionId,
        pod_items: u64,
    ) {
        let time = self.now();
        let recorded = self
            .stats
            .record_item_handled(time, bot, pod, pod_items, station, self.sink.as_mut());
        self.defer_sink_error(recorded);
        self.publish(Event::ItemHandled {
            bot,
            pod,
            station,
            order,
            item,
            time,
        });
    }

    fn notify_line_handled(&mut self, station: OutputStationId, order: OrderId, item: ItemDescriptionId) {
        self.stats.record_line_handled();
        let time = self.now();
        self.publish(Event::LineHandled {
            station,
            order,
            item,
            time,
        });
    }

    fn notify_order_completed(
        &mut self,
        station: OutputStationId,
        order: OrderId,
        turnover: f64,
        throughput: f64,
        lateness: f64,
    ) {
        let time = self.now();
        let recorded = self.stats.record_order_completed(
            time,
            station,
            turnover,
            throughput,
            lateness,
            self.sink.as_mut(),
        );
        self.defer_sink_error(recorded);
        self.publish(Event::OrderCompleted {
            station,
            order,
            turnover,
            throughput,
            lateness,
            time,
        });
    }

    pub(crate) fn notify_collision(&mut self, bot: BotId, tier: TierId) -> Result<(), KernelError> {
        self.store.get_mut::<Bot>(bot)?.stat_collisions += 1;
        let time = self.now();
        let recorded = self
            .stats
            .record_collision(time, bot, tier, self.sink.as_mut());
        self.defer_sink_error(recorded);
        self.publish(Event::Collision { bot, tier, time });
        Ok(())
    }

    fn notify_bundle_registered(&mut self, bundle: BundleId, pod: PodId, weight: Weight) {
        self.capacity.bundle_registered(weight);
        let time = self.now();
        self.publish(Event::BundleRegistered {
            bundle,
            pod,
            weight,
            time,
        });
    }

    fn notify_bundle_stored(&mut self, s: BundleStored) {
        self.capacity.bundle_stored(s.weight);
        let time = self.now();
        let recorded = self.stats.record_bundle_stored(
            time,
            s.bot,
            s.pod,
            s.pod_bundles,
            s.station,
            s.turnover,
            s.throughput,
            self.sink.as_mut(),
        );
        self.defer_sink_error(recorded);
        self.publish(Event::BundleStored {
            bundle: s.bundle,
            pod: s.pod,
            station: s.station,
            bot: s.bot,
            weight: s.weight,
            time,
        });
    }

    fn notify_initial_bundle_stored(&mut self, bundle: BundleId, pod: PodId, weight: Weight) {
        self.capacity.initial_bundle_stored(weight);
        let time = self.now();
        self.publish(Event::InitialBundleStored {
            bundle,
            pod,
            weight,
            time,
        });
    }

    fn notify_item_extracted(&mut self, pod: PodId, item: ItemDescriptionId, weight: Weight) {
        self.capacity.item_extracted(weight);
        let time = self.now();
        self.publish(Event::ItemExtracted {
            pod,
            item,
            weight,
            time,
        });
    }

    fn notify_bundle_placed(&mut self, bundle: BundleId, weight: Weight) {
        self.capacity.bundle_placed(weight);
        let time = self.now();
        let recorded = self.stats.record_bundle_placed(time, self.sink.as_mut());
        self.defer_sink_error(recorded);
        self.publish(Event::BundlePlaced {
            bundle,
            weight,
            time,
        });
    }

    /// Also the trigger for extract request generation.
    fn notify_order_placed(&mut self, order: OrderId) -> Result<(), KernelError> {
        let o = self.store.get::<Order>(order)?;
        let units = o.total_units();
        self.resources.create_requests(o);
        let time = self.now();
        let recorded = self.stats.record_order_placed(time, units, self.sink.as_mut());
        self.defer_sink_error(recorded);
        self.publish(Event::OrderPlaced { order, units, time });
        Ok(())
    }

    fn notify_pod_added(&mut self, pod: PodId) -> Result<(), KernelError> {
        self.capacity.pod_added(self.store.get::<Pod>(pod)?);
        let time = self.now();
        self.publish(Event::PodAdded { pod, time });
        Ok(())
    }
}

/// Payload of a bundle-stored notification.
struct BundleStored {
    bundle: BundleId,
    pod: PodId,
    station: Option<InputStationId>,
    bot: Option<BotId>,
    weight: Weight,
    pod_bundles: u64,
    turnover: f64,
    throughput: f64,
}

/// Weight of `count` units, or an error when it leaves the fixed-point range.
fn units_weight(unit: Weight, count: u32) -> Result<Weight, KernelError> {
    Weight::checked_from_num(count)
        .and_then(|n| unit.checked_mul(n))
        .ok_or(KernelError::WeightOverflow { unit, count })
}

fn decrement(map: &mut BTreeMap<ItemDescriptionId, u32>, item: ItemDescriptionId) {
    if let Some(n) = map.get_mut(&item) {
        *n = n.saturating_sub(1);
        if *n == 0 {
            map.remove(&item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::event::EventKind;
    use crate::instance::Instance;
    use crate::scheduler::ControllerSet;
    use crate::test_utils::*;

    fn kinds(log: &std::cell::RefCell<Vec<Event>>) -> Vec<EventKind> {
        log.borrow().iter().map(Event::kind).collect()
    }

    fn invalid(result: Result<impl std::fmt::Debug, KernelError>) -> bool {
        matches!(result, Err(KernelError::InvalidState { .. }))
    }

    // -----------------------------------------------------------------------
    // Test 1: A pod travels claim -> pickup -> move -> setdown
    // -----------------------------------------------------------------------
    #[test]
    fn pod_handling_cycle() {
        let mut wh = warehouse(SimConfig::default());
        let log = record_events(
            &mut wh.builder,
            &[EventKind::PodClaimed, EventKind::PodPickedUp, EventKind::PodSetDown],
        );
        let (pod, bot, other) = (wh.pods[0], wh.bots[0], wh.bots[1]);
        let (from, to) = (wh.grid[1][1], wh.grid[2][1]);
        let mut instance: Instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();

        k.claim_pod(bot, pod).unwrap();
        assert!(invalid(k.claim_pod(other, pod)));
        assert!(invalid(k.pickup_pod(bot, pod)), "bot is not at the pod");

        k.move_bot(bot, 1.0, 1.0, Some(from)).unwrap();
        k.pickup_pod(bot, pod).unwrap();
        assert_eq!(*k.get::<Pod>(pod).unwrap().location.get(), PodLocation::Carried(bot));
        assert_eq!(*k.get::<Waypoint>(from).unwrap().pod.get(), None);
        assert!(k.resources().is_free_storage(from));

        k.move_bot(bot, 1.0, 2.0, Some(to)).unwrap();
        let p = k.get::<Pod>(pod).unwrap();
        assert_eq!((p.x, p.y), (1.0, 2.0));

        assert_eq!(k.setdown_pod(bot).unwrap(), pod);
        let p = k.get::<Pod>(pod).unwrap();
        assert_eq!(*p.location.get(), PodLocation::Stored(to));
        assert_eq!(p.claimed_by, None);
        assert!(!k.resources().is_free_storage(to));
        assert!(invalid(k.setdown_pod(bot)), "nothing left to set down");

        let b = k.get::<Bot>(bot).unwrap();
        assert!((b.stat_distance_traveled - (5f64.sqrt() + 1.0)).abs() < 1e-9);
        assert_eq!(k.get::<Waypoint>(from).unwrap().stat_bot_visits, 1);
        assert_eq!(
            kinds(&log),
            vec![EventKind::PodClaimed, EventKind::PodPickedUp, EventKind::PodSetDown]
        );
    }

    #[test]
    fn release_claim_requires_the_claimant() {
        let wh = warehouse(SimConfig::default());
        let (pod, bot, other) = (wh.pods[0], wh.bots[0], wh.bots[1]);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        k.claim_pod(bot, pod).unwrap();
        assert!(invalid(k.release_claim(other, pod)));
        k.release_claim(bot, pod).unwrap();
        assert_eq!(k.get::<Pod>(pod).unwrap().claimed_by, None);
        k.claim_pod(other, pod).unwrap();
    }

    // -----------------------------------------------------------------------
    // Test 2: Reserved units cannot be extracted until released
    // -----------------------------------------------------------------------
    #[test]
    fn reservation_blocks_extraction() {
        let mut wh = warehouse(SimConfig::default());
        let log = record_events(
            &mut wh.builder,
            &[EventKind::ItemReserved, EventKind::ItemUnreserved, EventKind::ItemExtracted],
        );
        let (pod, item) = (wh.pods[0], wh.item);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        k.store_initial_bundle(pod, item, 2).unwrap();
        let order = k.place_order(BTreeMap::from([(item, 1)]), None).unwrap();

        k.reserve_item(pod, order, item).unwrap();
        assert_eq!(k.get::<Pod>(pod).unwrap().available_units(item), 1);
        assert_eq!(k.extract_item(pod, item).unwrap(), w(1.0));
        assert!(invalid(k.extract_item(pod, item)));

        k.release_item_reservation(pod, order, item).unwrap();
        assert!(k.get::<Pod>(pod).unwrap().reserved_items.is_empty());
        k.extract_item(pod, item).unwrap();
        assert!(k.get::<Pod>(pod).unwrap().contents.is_empty());
        assert_eq!(k.capacity().usage, Weight::ZERO);
        assert_eq!(k.capacity(), k.scan_capacity());
        assert_eq!(
            kinds(&log),
            vec![
                EventKind::ItemReserved,
                EventKind::ItemExtracted,
                EventKind::ItemUnreserved,
                EventKind::ItemExtracted,
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Test 3: Trips, repositioning and reported collisions feed statistics
    // -----------------------------------------------------------------------
    #[test]
    fn movement_statistics() {
        let wh = warehouse(SimConfig::default());
        let (a, b, pod) = (wh.bots[0], wh.bots[1], wh.pods[0]);
        let (storage, aisle) = (wh.grid[2][2], wh.grid[0][1]);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();

        k.complete_trip(a, TripKind::Output, 12.0).unwrap();
        k.complete_trip(a, TripKind::Output, 8.0).unwrap();
        k.complete_trip(b, TripKind::Input, 5.0).unwrap();
        k.start_repositioning(a, pod, storage).unwrap();
        assert!(invalid(k.start_repositioning(a, pod, aisle)));
        k.report_collision(b).unwrap();

        let stats = k.statistics();
        assert_eq!(stats.mean_output_trip(), 10.0);
        assert_eq!(stats.mean_input_trip(), 5.0);
        assert_eq!(stats.trip_count(TripKind::Output), 2);
        assert_eq!(stats.station_trips().len(), 3);
        assert_eq!(stats.counters().repositioning_moves, 1);
        assert_eq!(stats.repositioning().len(), 1);
        assert_eq!(stats.counters().collisions, 1);
        assert_eq!(k.get::<Bot>(b).unwrap().stat_collisions, 1);
    }

    // -----------------------------------------------------------------------
    // Test 4: Decision and generation signals publish and count
    // -----------------------------------------------------------------------
    #[test]
    fn signals_publish_once() {
        let mut wh = warehouse(SimConfig::default());
        let log = record_events(
            &mut wh.builder,
            &[
                EventKind::ItemStorageDecided,
                EventKind::StorageAllocationAvailable,
                EventKind::ReplenishmentBatchDecided,
                EventKind::PodHandled,
                EventKind::BundleRejected,
                EventKind::OrderRejected,
                EventKind::BundleGenerationPaused,
                EventKind::OrderGenerationPaused,
            ],
        );
        let (pod, bot, item, input, output) = (wh.pods[1], wh.bots[0], wh.item, wh.input, wh.output);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        let bundle = k.place_bundle(item, 2).unwrap();

        k.decide_item_storage(bundle, pod).unwrap();
        k.signal_storage_allocation_available(bundle, pod, input).unwrap();
        k.decide_replenishment_batch(pod, input).unwrap();
        k.handle_pod(pod, StationVisit::Output(output)).unwrap();
        assert!(matches!(
            k.handle_pod(pod, StationVisit::Output(OutputStationId(99))),
            Err(KernelError::NotFound { id: 99, .. })
        ));
        k.reject_bundle(item, 3).unwrap();
        k.reject_order(4);
        k.pause_bundle_generation();
        k.pause_order_generation();
        k.assign_task(bot).unwrap();
        k.assign_task(bot).unwrap();

        assert_eq!(
            kinds(&log),
            vec![
                EventKind::ItemStorageDecided,
                EventKind::StorageAllocationAvailable,
                EventKind::ReplenishmentBatchDecided,
                EventKind::PodHandled,
                EventKind::BundleRejected,
                EventKind::OrderRejected,
                EventKind::BundleGenerationPaused,
                EventKind::OrderGenerationPaused,
            ]
        );
        let c = k.statistics().counters();
        assert_eq!((c.bundles_rejected, c.orders_rejected), (1, 1));
        assert_eq!((c.bundle_generation_stops, c.order_generation_stops), (1, 1));
        assert_eq!(k.get::<Bot>(bot).unwrap().stat_assigned_tasks, 2);
    }

    // -----------------------------------------------------------------------
    // Test 5: A live pod added on a storage location leaves the free pool
    // -----------------------------------------------------------------------
    #[test]
    fn live_pod_occupies_storage() {
        let wh = warehouse(SimConfig::default());
        let (tier, free, taken) = (wh.tier, wh.grid[2][3], wh.grid[1][3]);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        let before = k.capacity().capacity;

        assert!(invalid(k.add_pod(PodSpec::new(tier, w(5.0)).at(taken))));
        let pod = k.add_pod(PodSpec::new(tier, w(5.0)).at(free)).unwrap();
        assert!(!k.resources().is_free_storage(free));
        assert_eq!(*k.get::<Waypoint>(free).unwrap().pod.get(), Some(pod));
        assert_eq!(k.capacity().capacity, before + w(5.0));
        assert!(k.get::<Tier>(tier).unwrap().roster.get().pods.contains(&pod));
    }

    // -----------------------------------------------------------------------
    // Test 6: Initial stock cannot take room promised to a registered bundle
    // -----------------------------------------------------------------------
    #[test]
    fn initial_stock_respects_reservations() {
        let wh = warehouse(SimConfig::default());
        let (pod, item) = (wh.pods[0], wh.item);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        let bundle = k.place_bundle(item, 6).unwrap();
        k.register_bundle(bundle, pod).unwrap();

        match k.store_initial_bundle(pod, item, 6) {
            Err(KernelError::InsufficientCapacity {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, w(6.0));
                assert_eq!(available, w(4.0));
            }
            other => panic!("expected InsufficientCapacity, got: {other:?}"),
        }
        k.store_initial_bundle(pod, item, 4).unwrap();
        let p = k.get::<Pod>(pod).unwrap();
        assert_eq!(p.capacity_in_use + p.capacity_reserved, p.capacity);
        assert_eq!(k.capacity(), k.scan_capacity());
    }

    // -----------------------------------------------------------------------
    // Test 7: Counts beyond the weight range are errors, not panics
    // -----------------------------------------------------------------------
    #[test]
    fn oversized_counts_overflow_weight() {
        let wh = warehouse(SimConfig::default());
        let (pod, item) = (wh.pods[0], wh.item);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        let before = k.capacity();

        assert!(matches!(
            k.place_bundle(item, 3_000_000_000),
            Err(KernelError::WeightOverflow {
                count: 3_000_000_000,
                ..
            })
        ));
        assert!(matches!(
            k.store_initial_bundle(pod, item, u32::MAX),
            Err(KernelError::WeightOverflow { .. })
        ));
        assert!(k.store().bundles().is_empty());
        assert_eq!(k.capacity(), before);
    }

    // -----------------------------------------------------------------------
    // Test 8: Orders above the unit limit are refused before any request exists
    // -----------------------------------------------------------------------
    #[test]
    fn order_unit_limit() {
        let config = SimConfig {
            max_order_units: 5,
            ..Default::default()
        };
        let wh = warehouse(config);
        let item = wh.item;
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();

        match k.place_order(BTreeMap::from([(item, u32::MAX)]), None) {
            Err(KernelError::OrderTooLarge { units, limit }) => {
                assert_eq!(units, u64::from(u32::MAX));
                assert_eq!(limit, 5);
            }
            other => panic!("expected OrderTooLarge, got: {other:?}"),
        }
        assert!(k.store().orders().is_empty());
        assert_eq!(k.resources().request_count(), 0);
        assert_eq!(k.statistics().counters().orders_placed, 0);

        k.place_order(BTreeMap::from([(item, 5)]), None).unwrap();
        assert_eq!(k.resources().request_count(), 5);
    }

    // -----------------------------------------------------------------------
    // Test 9: A failing sink does not interrupt a pick; the error surfaces later
    // -----------------------------------------------------------------------
    #[test]
    fn sink_failure_is_raised_after_the_pick() {
        let mut config = SimConfig::default();
        config.statistics.max_data_points = 1;
        config.statistics.observer_interval = 0.0;
        let mut wh = warehouse(config);
        wh.builder = wh.builder.with_sink(Box::new(ClosedSink));
        let log = record_events(&mut wh.builder, &[EventKind::OrderCompleted]);
        let (pod, item, station) = (wh.pods[0], wh.item, wh.output);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        k.store_initial_bundle(pod, item, 3).unwrap();
        let order = k.place_order(BTreeMap::from([(item, 2)]), None).unwrap();
        k.allocate_order(order, station).unwrap();

        k.pick_item(station, order, pod, item).unwrap();
        assert!(k.pending_sink_error().is_none());
        // The second point overflows the one-point buffer into the closed sink.
        let outcome = k.pick_item(station, order, pod, item).unwrap();
        assert!(outcome.order_completed);
        assert!(k.pending_sink_error().is_some());

        assert!(k.get::<Order>(order).unwrap().completed);
        assert!(!k.get::<OutputStation>(station).unwrap().assigned_orders.contains(&order));
        assert_eq!(kinds(&log), vec![EventKind::OrderCompleted]);
        let c = k.statistics().counters();
        assert_eq!((c.items_handled, c.orders_handled), (2, 1));
        assert_eq!(k.capacity(), k.scan_capacity());

        match instance.tick(1.0) {
            Err(KernelError::SubsystemFailure { subsystem, .. }) => assert_eq!(subsystem, "observer"),
            other => panic!("expected SubsystemFailure, got: {other:?}"),
        }
        assert!(instance.kernel().pending_sink_error().is_none());
    }
}
