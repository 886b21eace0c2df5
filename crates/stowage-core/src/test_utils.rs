//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::cell::RefCell;
use std::rc::Rc;

use stowage_stats::{MemorySink, SinkError, StatSink};

use crate::builder::*;
use crate::config::SimConfig;
use crate::entity::*;
use crate::error::SubsystemError;
use crate::event::{Event, EventKind};
use crate::fixed::{SimTime, Weight};
use crate::id::*;
use crate::instance::{Instance, Kernel};
use crate::scheduler::{ControllerSet, Updateable};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn w(v: f64) -> Weight {
    Weight::from_num(v)
}

// ===========================================================================
// Layouts
// ===========================================================================

/// Add a `cols` x `rows` grid of waypoints one unit apart, with
/// bidirectional paths between 4-neighbours. `decorate` sees each spec
/// before it is added. Returns the IDs as `grid[row][col]`.
pub fn add_grid(
    b: &mut InstanceBuilder,
    tier: TierId,
    cols: usize,
    rows: usize,
    mut decorate: impl FnMut(usize, usize, WaypointSpec) -> WaypointSpec,
) -> Vec<Vec<WaypointId>> {
    let mut grid = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut line = Vec::with_capacity(cols);
        for col in 0..cols {
            let spec = decorate(col, row, WaypointSpec::new(tier, col as f64, row as f64));
            line.push(b.add_waypoint(spec).unwrap());
        }
        grid.push(line);
    }
    for row in 0..rows {
        for col in 0..cols {
            if col + 1 < cols {
                b.add_bidirectional_path(grid[row][col], grid[row][col + 1]);
            }
            if row + 1 < rows {
                b.add_bidirectional_path(grid[row][col], grid[row + 1][col]);
            }
        }
    }
    grid
}

/// A small warehouse, not yet finalized.
///
/// ```text
/// row 3   .  .  .  .  .      bots at (0,3) and (4,3)
/// row 2   .  S  S  S  .
/// row 1   .  P  P  P  .      pods on the row-1 storage locations
/// row 0   O  .  .  .  I      output station (0,0), input station (4,0)
/// ```
pub struct Warehouse {
    pub builder: InstanceBuilder,
    pub tier: TierId,
    pub grid: Vec<Vec<WaypointId>>,
    pub input: InputStationId,
    pub output: OutputStationId,
    pub pods: Vec<PodId>,
    pub bots: Vec<BotId>,
    pub item: ItemDescriptionId,
}

impl Warehouse {
    pub fn finalize(self, controllers: ControllerSet) -> Instance {
        self.builder.finalize(controllers).unwrap()
    }

    pub fn storage_locations(&self) -> Vec<WaypointId> {
        (1..=2)
            .flat_map(|row| (1..=3).map(move |col| (row, col)))
            .map(|(row, col)| self.grid[row][col])
            .collect()
    }
}

pub fn warehouse(config: SimConfig) -> Warehouse {
    let mut b = InstanceBuilder::new(config);
    let tier = b.add_tier(TierSpec::new(4.0, 3.0)).unwrap();
    let output = b
        .add_output_station(StationSpec::new(tier, 0.0, 0.0, 2))
        .unwrap();
    let input = b
        .add_input_station(StationSpec::new(tier, 4.0, 0.0, 2))
        .unwrap();
    let item = b
        .add_item_description(None, ItemKind::Simple, w(1.0))
        .unwrap();
    let grid = add_grid(&mut b, tier, 5, 4, |col, row, spec| match (col, row) {
        (0, 0) => spec.station(StationRef::Output(output)),
        (4, 0) => spec.station(StationRef::Input(input)),
        (1..=3, 1..=2) => spec.storage(),
        _ => spec,
    });
    let pods = (1..=3)
        .map(|col| {
            b.add_pod(PodSpec::new(tier, w(10.0)).at(grid[1][col]))
                .unwrap()
        })
        .collect();
    let bots = [grid[3][0], grid[3][4]]
        .into_iter()
        .map(|wp| b.add_bot(BotSpec::new(tier, 0.0, 0.0, 0.3).at(wp)).unwrap())
        .collect();
    Warehouse {
        builder: b,
        tier,
        grid,
        input,
        output,
        pods,
        bots,
        item,
    }
}

/// Entities of every type that reference `wp`. Empty when the instance is
/// free of dangling references to it.
pub fn references_to(kernel: &Kernel, wp: WaypointId) -> Vec<String> {
    let store = kernel.store();
    let mut refs = Vec::new();
    for bot in store.bots().iter() {
        if bot.waypoint == Some(wp) {
            refs.push(bot.id().to_string());
        }
    }
    for pod in store.pods().iter() {
        if *pod.location.get() == PodLocation::Stored(wp) {
            refs.push(pod.id().to_string());
        }
    }
    for s in store.input_stations().iter() {
        if *s.waypoint.get() == wp {
            refs.push(s.id().to_string());
        }
    }
    for s in store.output_stations().iter() {
        if *s.waypoint.get() == wp {
            refs.push(s.id().to_string());
        }
    }
    for e in store.elevators().iter() {
        if e.connected.get().contains(&wp) {
            refs.push(e.id().to_string());
        }
    }
    for s in store.semaphores().iter() {
        if s.guards.iter().any(|g| g.touches(wp)) {
            refs.push(s.id().to_string());
        }
    }
    for t in store.tiers().iter() {
        if t.roster.get().waypoints.contains(&wp) {
            refs.push(t.id().to_string());
        }
    }
    let graph = kernel.graph();
    for other in graph.waypoints() {
        if graph.outgoing(other).contains(&wp) || graph.incoming(other).contains(&wp) {
            refs.push(format!("edge from {other}"));
        }
    }
    if kernel.resources().is_free_storage(wp) {
        refs.push("storage pool".to_string());
    }
    refs
}

// ===========================================================================
// Sinks and observers
// ===========================================================================

/// A memory sink the test keeps a handle to after handing it to the builder.
#[derive(Debug, Clone, Default)]
pub struct SharedSink(pub Rc<RefCell<MemorySink>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn StatSink> {
        Box::new(self.clone())
    }

    pub fn lines(&self, series: &str) -> Vec<String> {
        self.0.borrow().lines(series).to_vec()
    }

    pub fn batch_count(&self, series: &str) -> usize {
        self.0.borrow().batch_count(series)
    }

    pub fn total_lines(&self) -> usize {
        self.0.borrow().total_lines()
    }
}

impl StatSink for SharedSink {
    fn append(
        &mut self,
        series: &'static str,
        header: &str,
        lines: &[String],
    ) -> Result<(), SinkError> {
        self.0.borrow_mut().append(series, header, lines)
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.0.borrow_mut().clear()
    }
}

/// A sink whose every append fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedSink;

impl StatSink for ClosedSink {
    fn append(&mut self, series: &'static str, _: &str, _: &[String]) -> Result<(), SinkError> {
        Err(SinkError::Rejected {
            series,
            reason: "sink closed".to_string(),
        })
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Subscribe a recorder to `kinds` and return the shared log.
pub fn record_events(b: &mut InstanceBuilder, kinds: &[EventKind]) -> Rc<RefCell<Vec<Event>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for &kind in kinds {
        let log = Rc::clone(&log);
        b.subscribe(kind, Box::new(move |e: &Event| log.borrow_mut().push(e.clone())));
    }
    log
}

// ===========================================================================
// Controllers
// ===========================================================================

/// Appends `name@time` to a shared log on every update. Optionally asks for
/// a tick every `interval`.
pub struct RecordingController {
    pub name: String,
    pub log: Rc<RefCell<Vec<String>>>,
    pub interval: Option<SimTime>,
    pub resets: u32,
}

impl RecordingController {
    pub fn new(name: &str, log: &Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log: Rc::clone(log),
            interval: None,
            resets: 0,
        }
    }

    pub fn every(mut self, interval: SimTime) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn boxed(self) -> Box<dyn Updateable> {
        Box::new(self)
    }
}

impl Updateable for RecordingController {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_event_time(&self, _kernel: &Kernel, now: SimTime) -> SimTime {
        match self.interval {
            Some(step) => ((now / step).floor() + 1.0) * step,
            None => SimTime::INFINITY,
        }
    }

    fn update(&mut self, _kernel: &mut Kernel, _last: SimTime, now: SimTime) -> Result<(), SubsystemError> {
        self.log.borrow_mut().push(format!("{}@{now}", self.name));
        Ok(())
    }

    fn stat_reset(&mut self) {
        self.resets += 1;
    }
}

/// Fails on its `fail_on`-th update (1-based).
pub struct FailingController {
    pub fail_on: u32,
    pub calls: Rc<RefCell<u32>>,
}

impl FailingController {
    pub fn new(fail_on: u32) -> Self {
        Self {
            fail_on,
            calls: Rc::new(RefCell::new(0)),
        }
    }
}

impl Updateable for FailingController {
    fn name(&self) -> &str {
        "failing"
    }

    fn update(&mut self, _kernel: &mut Kernel, _last: SimTime, _now: SimTime) -> Result<(), SubsystemError> {
        let mut calls = self.calls.borrow_mut();
        *calls += 1;
        if *calls >= self.fail_on {
            return Err(SubsystemError::Failed("injected failure".to_string()));
        }
        Ok(())
    }
}

/// Places an order for one unit of `item` every `interval`.
pub struct OrderFeeder {
    pub item: ItemDescriptionId,
    pub interval: SimTime,
    pub next: SimTime,
}

impl OrderFeeder {
    pub fn new(item: ItemDescriptionId, interval: SimTime) -> Self {
        Self {
            item,
            interval,
            next: interval,
        }
    }
}

impl Updateable for OrderFeeder {
    fn name(&self) -> &str {
        "order-feeder"
    }

    fn next_event_time(&self, _kernel: &Kernel, _now: SimTime) -> SimTime {
        self.next
    }

    fn update(&mut self, kernel: &mut Kernel, _last: SimTime, now: SimTime) -> Result<(), SubsystemError> {
        while self.next <= now {
            kernel.place_order([(self.item, 1)].into_iter().collect(), None)?;
            self.next += self.interval;
        }
        Ok(())
    }
}
