//! The finalized instance and its tick loop.
//!
//! [`Kernel`] owns all shared state: entities, the navigation graph, the
//! capacity totals, statistics and the event bus. Subsystems receive
//! `&mut Kernel` during their slot and may only change state through its
//! operations (see `ops.rs`). [`Instance`] adds the controllers and the
//! frozen update list on top and drives time forward.

use std::fmt;
use std::hash::Hasher;

use stowage_stats::{SinkError, StatSink};

use crate::capacity::{CapacitySnapshot, CapacityTotals, FillLevels};
use crate::collision::CollisionDetector;
use crate::config::{SanityPolicy, SimConfig};
use crate::entity::BundleState;
use crate::error::{KernelError, SubsystemError};
use crate::event::EventBus;
use crate::fixed::SimTime;
use crate::graph::WaypointGraph;
use crate::id::EntityKind;
use crate::resource::ResourceManager;
use crate::rng::SimRng;
use crate::sanity::{self, SanityFinding};
use crate::scheduler::{Agent, ControllerSet, Slot, build_schedule};
use crate::sim::{SimClock, StateHash};
use crate::statistics::{InstanceStatistics, StatCounters};
use crate::store::{EntityRef, EntityStore, Stored};

/// Shortest tick the event-driven loop takes when a subsystem asks for a
/// time that is not in the future.
pub const MIN_TICK: SimTime = 1e-6;

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

pub struct Kernel {
    pub(crate) config: SimConfig,
    pub(crate) store: EntityStore,
    pub(crate) graph: WaypointGraph,
    pub(crate) capacity: CapacityTotals,
    pub(crate) stats: InstanceStatistics,
    pub(crate) bus: EventBus,
    pub(crate) sink: Box<dyn StatSink>,
    /// First sink failure not yet reported.
    pub(crate) sink_error: Option<SinkError>,
    pub(crate) resources: ResourceManager,
    pub(crate) collisions: CollisionDetector,
    pub(crate) clock: SimClock,
    pub(crate) rng: SimRng,
    pub(crate) next_fill_sample: SimTime,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("clock", &self.clock)
            .field("capacity", &self.capacity)
            .field("bots", &self.store.bots().len())
            .field("pods", &self.store.pods().len())
            .field("waypoints", &self.store.waypoints().len())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    // -- Queries -----------------------------------------------------------

    /// Current simulation time. During a tick this is the time being
    /// advanced to.
    pub fn now(&self) -> SimTime {
        self.clock.time
    }

    pub fn ticks(&self) -> u64 {
        self.clock.ticks
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn graph(&self) -> &WaypointGraph {
        &self.graph
    }

    pub fn get<E: Stored>(&self, id: E::Id) -> Result<&E, KernelError> {
        self.store.get(id)
    }

    pub fn get_by_id(&self, kind: EntityKind, id: u32) -> Result<EntityRef<'_>, KernelError> {
        self.store.get_by_id(kind, id)
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        self.capacity.snapshot()
    }

    pub fn fill_levels(&self) -> FillLevels {
        self.capacity.fill_levels()
    }

    /// Totals recomputed from the current pods and bundles.
    pub fn scan_capacity(&self) -> CapacitySnapshot {
        CapacityTotals::scan(self.store.pods().iter(), self.store.bundles().iter())
    }

    /// Compare the incremental totals against a full scan.
    pub fn verify_capacity(&self) -> Result<(), KernelError> {
        let incremental = self.capacity.snapshot();
        let scanned = self.scan_capacity();
        if incremental == scanned {
            Ok(())
        } else {
            Err(KernelError::CapacityDrift {
                incremental,
                scanned,
            })
        }
    }

    pub fn statistics(&self) -> &InstanceStatistics {
        &self.stats
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn collisions(&self) -> &CollisionDetector {
        &self.collisions
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The run's random stream. Draw order is part of the determinism
    /// contract, so subsystems draw only inside their own slot.
    pub fn rng(&mut self) -> &mut SimRng {
        &mut self.rng
    }

    /// Fingerprint of clock, counters, capacity totals, RNG and entity
    /// state. Equal seeds and equal injected events give equal hashes.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_f64(self.clock.time);
        h.write_u64(self.clock.ticks);
        h.write_u64(self.rng.state());

        let c = self.stats.counters();
        for v in [
            c.items_handled,
            c.bundles_handled,
            c.lines_handled,
            c.orders_handled,
            c.orders_late,
            c.items_ordered,
            c.bundles_placed,
            c.orders_placed,
            c.bundles_rejected,
            c.orders_rejected,
            c.repositioning_moves,
            c.collisions,
        ] {
            h.write_u64(v);
        }

        let cap = self.capacity.snapshot();
        for w in [cap.capacity, cap.usage, cap.reserved, cap.backlog] {
            h.write_weight(w);
        }

        for bot in self.store.bots().iter() {
            h.write_u32(bot.id.0);
            h.write_f64(bot.x);
            h.write_f64(bot.y);
            h.write_f64(bot.stat_distance_traveled);
        }
        for pod in self.store.pods().iter() {
            h.write_u32(pod.id.0);
            h.write_f64(pod.x);
            h.write_f64(pod.y);
            h.write_weight(pod.capacity_in_use);
            h.write_weight(pod.capacity_reserved);
        }
        for bundle in self.store.bundles().iter() {
            h.write_u32(bundle.id.0);
            let state = match bundle.state {
                BundleState::Backlog => u32::MAX,
                BundleState::Registered(p) => p.0,
                BundleState::Stored(p) => p.0 ^ 0x8000_0000,
            };
            h.write_u32(state);
        }
        for order in self.store.orders().iter() {
            h.write_u32(order.id.0);
            h.write_u32(order.served.values().sum());
        }
        h.finish()
    }

    // -- Kernel-owned slots ------------------------------------------------

    pub(crate) fn update_resource_manager(&mut self) -> Result<(), SubsystemError> {
        if self.config.verify_capacity_each_tick {
            self.verify_capacity()?;
        }
        Ok(())
    }

    pub(crate) fn update_compound(&mut self) {
        self.collisions.refresh(&self.store);
    }

    pub(crate) fn observer_next_event_time(&self) -> SimTime {
        if self.config.statistics.observer_interval > 0.0 {
            self.next_fill_sample
        } else {
            SimTime::INFINITY
        }
    }

    /// Sample fill levels for every observer period reached by now.
    pub(crate) fn update_observer(&mut self) -> Result<(), SubsystemError> {
        self.raise_sink_error()?;
        let interval = self.config.statistics.observer_interval;
        if interval <= 0.0 {
            return Ok(());
        }
        let now = self.clock.time;
        while self.next_fill_sample <= now {
            let levels = self.capacity.fill_levels();
            self.stats
                .record_fill_levels(self.next_fill_sample, levels, self.sink.as_mut())?;
            self.next_fill_sample += interval;
        }
        Ok(())
    }

    pub(crate) fn update_crash_handler(&mut self) -> Result<(), SubsystemError> {
        let hits = self
            .collisions
            .detect(&self.store, self.config.collision.check_tier_bounds);
        for (bot, tier) in hits {
            tracing::warn!(%bot, %tier, time = self.clock.time, "collision detected");
            self.notify_collision(bot, tier)?;
            if self.config.collision.abort_on_collision {
                return Err(SubsystemError::Failed(format!("{bot} crashed on {tier}")));
            }
        }
        Ok(())
    }

    // -- Statistics lifecycle ----------------------------------------------

    /// Zero the kernel statistics, drop pre-warmup points from the sink and
    /// reset every entity's counters.
    pub(crate) fn reset_statistics(&mut self) -> Result<(), KernelError> {
        let now = self.clock.time;
        self.stats.reset(now);
        self.sink.clear()?;
        for bot in self.store.arena_mut::<crate::entity::Bot>().iter_mut() {
            bot.reset_statistics();
        }
        for pod in self.store.arena_mut::<crate::entity::Pod>().iter_mut() {
            pod.reset_statistics();
        }
        for wp in self.store.arena_mut::<crate::entity::Waypoint>().iter_mut() {
            wp.reset_statistics();
        }
        for station in self.store.arena_mut::<crate::entity::InputStation>().iter_mut() {
            station.reset_statistics();
        }
        for station in self.store.arena_mut::<crate::entity::OutputStation>().iter_mut() {
            station.reset_statistics();
        }
        Ok(())
    }

    pub(crate) fn flush_statistics(&mut self) -> Result<usize, KernelError> {
        self.raise_sink_error()?;
        Ok(self.stats.flush_all(self.sink.as_mut())?)
    }

    /// Hold a failed series push until the observer slot or the final flush.
    pub(crate) fn defer_sink_error(&mut self, result: Result<(), SinkError>) {
        if let Err(err) = result {
            tracing::error!(time = self.clock.time, error = %err, "statistics sink failed");
            self.sink_error.get_or_insert(err);
        }
    }

    /// A sink failure waiting to be raised by the observer slot or the final
    /// flush.
    pub fn pending_sink_error(&self) -> Option<&SinkError> {
        self.sink_error.as_ref()
    }

    fn raise_sink_error(&mut self) -> Result<(), KernelError> {
        match self.sink_error.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn counters(&self) -> StatCounters {
        *self.stats.counters()
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// Summary of a finished [`Instance::execute`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub end_time: SimTime,
    pub ticks: u64,
    pub counters: StatCounters,
    pub capacity: CapacitySnapshot,
    pub fill_levels: FillLevels,
    pub sanity_findings: usize,
    /// Points written to the sink by the final flush.
    pub flushed_points: usize,
    pub state_hash: u64,
}

/// A finalized instance: the kernel, its controllers and the update list.
#[derive(Debug)]
pub struct Instance {
    pub(crate) kernel: Kernel,
    pub(crate) controllers: ControllerSet,
    pub(crate) schedule: Option<Vec<Slot>>,
    pub(crate) failed: bool,
}

impl Instance {
    pub(crate) fn new(kernel: Kernel, controllers: ControllerSet) -> Self {
        Self {
            kernel,
            controllers,
            schedule: None,
            failed: false,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Mutable access for drivers that inject orders and bundles between
    /// ticks.
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    pub fn now(&self) -> SimTime {
        self.kernel.now()
    }

    /// The frozen update list, once the first tick has run.
    pub fn schedule(&self) -> Option<&[Slot]> {
        self.schedule.as_deref()
    }

    pub fn is_frozen(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    // -- Sanity ------------------------------------------------------------

    pub fn sanity_check(&self) -> Vec<SanityFinding> {
        sanity::check(&self.kernel.store, &self.kernel.graph)
    }

    /// Apply the configured [`SanityPolicy`]. Returns the findings that were
    /// tolerated.
    pub fn check_sanity_policy(&self) -> Result<Vec<SanityFinding>, KernelError> {
        let policy = self.kernel.config.sanity.policy;
        if policy == SanityPolicy::Ignore {
            return Ok(Vec::new());
        }
        let findings = self.sanity_check();
        for finding in &findings {
            tracing::warn!(kind = %finding.kind, location = %finding.location, "{}", finding.kind.description());
        }
        if policy == SanityPolicy::Refuse && !findings.is_empty() {
            return Err(KernelError::SanityRefused(findings));
        }
        Ok(findings)
    }

    // -- Tick loop ---------------------------------------------------------

    fn ensure_schedule(&mut self) {
        if self.schedule.is_none() {
            let schedule = build_schedule(&self.kernel, &self.controllers);
            let order: Vec<String> = schedule.iter().map(Slot::to_string).collect();
            tracing::info!(slots = schedule.len(), order = %order.join(","), "update list frozen");
            self.schedule = Some(schedule);
        }
    }

    /// Earliest time any slot needs a tick.
    pub fn next_event_time(&self) -> SimTime {
        let now = self.kernel.now();
        let schedule = self.schedule.as_deref().unwrap_or(&[]);
        self.kernel
            .observer_next_event_time()
            .min(self.controllers.next_event_time(&self.kernel, schedule, now))
    }

    /// Run every slot once, advancing the clock to `next_time`.
    ///
    /// An error out of any slot is fatal: the instance is marked failed and
    /// every later call returns [`KernelError::RunAborted`].
    pub fn tick(&mut self, next_time: SimTime) -> Result<(), KernelError> {
        if self.failed {
            return Err(KernelError::RunAborted);
        }
        self.ensure_schedule();
        let last = self.kernel.clock.time;
        let now = next_time.max(last);
        self.kernel.clock.time = now;

        let schedule = self.schedule.as_deref().unwrap_or(&[]);
        for &slot in schedule {
            if let Err(source) = run_slot(&mut self.kernel, &mut self.controllers, slot, last, now) {
                self.failed = true;
                tracing::error!(%slot, time = now, error = %source, "subsystem failed, run aborted");
                return Err(KernelError::SubsystemFailure {
                    subsystem: slot.to_string(),
                    time: now,
                    source,
                });
            }
        }
        self.kernel.clock.ticks += 1;
        Ok(())
    }

    /// Event-driven loop over `duration`. Returns the number of ticks run.
    pub fn advance(&mut self, duration: SimTime) -> Result<u64, KernelError> {
        if self.failed {
            return Err(KernelError::RunAborted);
        }
        self.ensure_schedule();
        let finish = self.kernel.now() + duration;
        let step = self.kernel.config.min_update_interval.max(MIN_TICK);
        let mut ticks = 0;
        while self.kernel.now() < finish {
            let now = self.kernel.now();
            let floor = (now + step).min(finish);
            let next = self.next_event_time().min(finish).max(floor);
            self.tick(next)?;
            ticks += 1;
        }
        Ok(ticks)
    }

    /// Reset statistics at the warmup boundary: kernel aggregates, the sink,
    /// every entity and every controller.
    pub fn stat_reset(&mut self) -> Result<(), KernelError> {
        self.kernel.reset_statistics()?;
        self.controllers.stat_reset();
        tracing::info!(time = self.kernel.now(), "statistics reset");
        Ok(())
    }

    /// Call every controller's finish hook and flush every series. Returns
    /// the number of points flushed.
    pub fn stat_finish(&mut self) -> Result<usize, KernelError> {
        self.controllers.stat_finish(&self.kernel);
        self.kernel.flush_statistics()
    }

    /// Warmup, statistics reset, measured run, final flush.
    pub fn execute(&mut self) -> Result<RunReport, KernelError> {
        let findings = self.check_sanity_policy()?;
        let warmup = self.kernel.config.warmup_time;
        if warmup > 0.0 {
            tracing::info!(warmup, "warmup started");
            self.advance(warmup)?;
        }
        self.stat_reset()?;
        let measured = self.kernel.config.simulation_time;
        self.advance(measured)?;
        let flushed_points = self.stat_finish()?;

        let report = RunReport {
            end_time: self.kernel.now(),
            ticks: self.kernel.ticks(),
            counters: self.kernel.counters(),
            capacity: self.kernel.capacity(),
            fill_levels: self.kernel.fill_levels(),
            sanity_findings: findings.len(),
            flushed_points,
            state_hash: self.kernel.state_hash(),
        };
        tracing::info!(
            end_time = report.end_time,
            ticks = report.ticks,
            items = report.counters.items_handled,
            orders = report.counters.orders_handled,
            "run finished"
        );
        Ok(report)
    }
}

fn run_slot(
    kernel: &mut Kernel,
    controllers: &mut ControllerSet,
    slot: Slot,
    last: SimTime,
    now: SimTime,
) -> Result<(), SubsystemError> {
    match slot {
        Slot::ResourceManager => kernel.update_resource_manager(),
        Slot::Compound => {
            kernel.update_compound();
            Ok(())
        }
        Slot::Controller(role) => match controllers.controller_mut(role) {
            Some(controller) => controller.update(kernel, last, now),
            None => Ok(()),
        },
        Slot::Observer => kernel.update_observer(),
        Slot::Agent(agent @ Agent::Bot(_)) => match controllers.bot_driver_mut() {
            Some(driver) => driver.update_agent(kernel, agent, last, now),
            None => Ok(()),
        },
        Slot::Agent(agent) => match controllers.station_driver_mut() {
            Some(driver) => driver.update_agent(kernel, agent, last, now),
            None => Ok(()),
        },
        Slot::CrashHandler => kernel.update_crash_handler(),
    }
}
