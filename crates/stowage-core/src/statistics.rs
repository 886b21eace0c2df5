//! Statistics aggregated from kernel events.
//!
//! Counters and running means are plain fields. Timestamped records go to
//! [`BoundedSeries`] buffers that drain to the instance's sink when they
//! overflow. Order and bundle turnover samples are kept in full in
//! [`SummarySeries`] lists for end-of-run percentiles; those lists are not
//! capped and only log a warning past their soft limit.
//!
//! Timestamps in series are relative to the statistics start, which
//! [`InstanceStatistics::reset`] moves to the warmup boundary.

use stowage_stats::{
    BoundedSeries, DataPoint, RunningMean, SeriesConfig, SinkError, StatSink, SummarySeries,
    join_values,
};

use crate::capacity::FillLevels;
use crate::event::TripKind;
use crate::fixed::SimTime;
use crate::id::*;

// ---------------------------------------------------------------------------
// Data points
// ---------------------------------------------------------------------------

fn opt<I: StableId>(id: Option<I>) -> String {
    id.map(|i| i.raw().to_string())
        .unwrap_or_else(|| "-1".to_string())
}

fn cols(names: &[&str]) -> String {
    names.join(";")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemHandledPoint {
    pub time: f64,
    pub bot: Option<BotId>,
    pub pod: PodId,
    pub station: OutputStationId,
}

impl DataPoint for ItemHandledPoint {
    const SERIES: &'static str = "itemhandled";

    fn header() -> String {
        cols(&["TimeStamp", "Bot", "Pod", "OutputStation"])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            opt(self.bot),
            self.pod.raw().to_string(),
            self.station.raw().to_string(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleHandledPoint {
    pub time: f64,
    pub bot: Option<BotId>,
    pub pod: PodId,
    pub station: Option<InputStationId>,
}

impl DataPoint for BundleHandledPoint {
    const SERIES: &'static str = "bundlehandled";

    fn header() -> String {
        cols(&["TimeStamp", "Bot", "Pod", "InputStation"])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            opt(self.bot),
            self.pod.raw().to_string(),
            opt(self.station),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandledPoint {
    pub time: f64,
    pub station: OutputStationId,
    pub turnover: f64,
    pub throughput: f64,
    pub lateness: f64,
}

impl DataPoint for OrderHandledPoint {
    const SERIES: &'static str = "orderhandled";

    fn header() -> String {
        cols(&["TimeStamp", "OutputStation", "Turnover", "Throughput", "Lateness"])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            self.station.raw().to_string(),
            self.turnover.to_string(),
            self.throughput.to_string(),
            self.lateness.to_string(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundlePlacedPoint {
    pub time: f64,
}

impl DataPoint for BundlePlacedPoint {
    const SERIES: &'static str = "bundleplaced";

    fn header() -> String {
        cols(&["TimeStamp"])
    }

    fn line(&self) -> String {
        self.time.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlacedPoint {
    pub time: f64,
}

impl DataPoint for OrderPlacedPoint {
    const SERIES: &'static str = "orderplaced";

    fn header() -> String {
        cols(&["TimeStamp"])
    }

    fn line(&self) -> String {
        self.time.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollisionPoint {
    pub time: f64,
    pub bot: BotId,
    pub tier: TierId,
}

impl DataPoint for CollisionPoint {
    const SERIES: &'static str = "collisions";

    fn header() -> String {
        cols(&["TimeStamp", "Bot", "Tier"])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            self.bot.raw().to_string(),
            self.tier.raw().to_string(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositioningPoint {
    pub time: f64,
    pub bot: BotId,
    pub pod: PodId,
    pub target: WaypointId,
}

impl DataPoint for RepositioningPoint {
    const SERIES: &'static str = "repositioning";

    fn header() -> String {
        cols(&["TimeStamp", "Bot", "Pod", "Target"])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            self.bot.raw().to_string(),
            self.pod.raw().to_string(),
            self.target.raw().to_string(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationTripPoint {
    pub time: f64,
    pub trip_time: f64,
    pub kind: TripKind,
}

impl DataPoint for StationTripPoint {
    const SERIES: &'static str = "stationtrips";

    fn header() -> String {
        cols(&["TimeStamp", "TripTime", "Type"])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            self.trip_time.to_string(),
            self.kind.code().to_string(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillLevelPoint {
    pub time: f64,
    pub levels: FillLevels,
}

impl DataPoint for FillLevelPoint {
    const SERIES: &'static str = "filllevels";

    fn header() -> String {
        cols(&[
            "TimeStamp",
            "StorageUsage",
            "StorageUsageAndReserved",
            "StorageUsageReservedAndBacklog",
        ])
    }

    fn line(&self) -> String {
        join_values(&[
            self.time.to_string(),
            self.levels.used.to_string(),
            self.levels.used_and_reserved.to_string(),
            self.levels.used_reserved_and_backlog.to_string(),
        ])
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Plain counters over the measured window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatCounters {
    pub items_handled: u64,
    pub bundles_handled: u64,
    pub lines_handled: u64,
    pub orders_handled: u64,
    pub orders_late: u64,
    pub items_ordered: u64,
    pub bundles_placed: u64,
    pub orders_placed: u64,
    pub bundles_rejected: u64,
    pub orders_rejected: u64,
    pub repositioning_moves: u64,
    pub collisions: u64,
    pub bundle_generation_stops: u64,
    pub order_generation_stops: u64,
    /// Highest item count handled by a single pod.
    pub max_items_handled_by_pod: u64,
    /// Highest bundle count handled by a single pod.
    pub max_bundles_handled_by_pod: u64,
}

// ---------------------------------------------------------------------------
// InstanceStatistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InstanceStatistics {
    counters: StatCounters,
    output_trips: RunningMean,
    input_trips: RunningMean,

    item_handled: BoundedSeries<ItemHandledPoint>,
    bundle_handled: BoundedSeries<BundleHandledPoint>,
    order_handled: BoundedSeries<OrderHandledPoint>,
    bundle_placed: BoundedSeries<BundlePlacedPoint>,
    order_placed: BoundedSeries<OrderPlacedPoint>,
    collision: BoundedSeries<CollisionPoint>,
    repositioning: BoundedSeries<RepositioningPoint>,
    station_trip: BoundedSeries<StationTripPoint>,
    fill_level: BoundedSeries<FillLevelPoint>,

    order_turnover: SummarySeries,
    order_throughput: SummarySeries,
    order_lateness: SummarySeries,
    bundle_turnover: SummarySeries,
    bundle_throughput: SummarySeries,

    stat_time_start: SimTime,
    warmup_reset_done: bool,
}

impl InstanceStatistics {
    pub fn new(config: SeriesConfig) -> Self {
        let cap = config.max_points;
        let soft = config.summary_soft_limit;
        Self {
            counters: StatCounters::default(),
            output_trips: RunningMean::new(),
            input_trips: RunningMean::new(),
            item_handled: BoundedSeries::new(cap),
            bundle_handled: BoundedSeries::new(cap),
            order_handled: BoundedSeries::new(cap),
            bundle_placed: BoundedSeries::new(cap),
            order_placed: BoundedSeries::new(cap),
            collision: BoundedSeries::new(cap),
            repositioning: BoundedSeries::new(cap),
            station_trip: BoundedSeries::new(cap),
            fill_level: BoundedSeries::new(cap),
            order_turnover: SummarySeries::new("order-turnover", soft),
            order_throughput: SummarySeries::new("order-throughput", soft),
            order_lateness: SummarySeries::new("order-lateness", soft),
            bundle_turnover: SummarySeries::new("bundle-turnover", soft),
            bundle_throughput: SummarySeries::new("bundle-throughput", soft),
            stat_time_start: 0.0,
            warmup_reset_done: false,
        }
    }

    fn relative(&self, now: SimTime) -> f64 {
        now - self.stat_time_start
    }

    // -- Recording ---------------------------------------------------------

    pub(crate) fn record_item_handled(
        &mut self,
        now: SimTime,
        bot: Option<BotId>,
        pod: PodId,
        pod_items_handled: u64,
        station: OutputStationId,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.items_handled += 1;
        self.counters.max_items_handled_by_pod =
            self.counters.max_items_handled_by_pod.max(pod_items_handled);
        let point = ItemHandledPoint {
            time: self.relative(now),
            bot,
            pod,
            station,
        };
        self.item_handled.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_line_handled(&mut self) {
        self.counters.lines_handled += 1;
    }

    pub(crate) fn record_order_completed(
        &mut self,
        now: SimTime,
        station: OutputStationId,
        turnover: f64,
        throughput: f64,
        lateness: f64,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.orders_handled += 1;
        if lateness > 0.0 {
            self.counters.orders_late += 1;
        }
        self.order_turnover.push(turnover);
        self.order_throughput.push(throughput);
        self.order_lateness.push(lateness);
        let point = OrderHandledPoint {
            time: self.relative(now),
            station,
            turnover,
            throughput,
            lateness,
        };
        self.order_handled.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_collision(
        &mut self,
        now: SimTime,
        bot: BotId,
        tier: TierId,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.collisions += 1;
        let point = CollisionPoint {
            time: self.relative(now),
            bot,
            tier,
        };
        self.collision.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_trip(
        &mut self,
        now: SimTime,
        kind: TripKind,
        duration: f64,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        match kind {
            TripKind::Output => self.output_trips.add(duration),
            TripKind::Input => self.input_trips.add(duration),
        }
        let point = StationTripPoint {
            time: self.relative(now),
            trip_time: duration,
            kind,
        };
        self.station_trip.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_repositioning(
        &mut self,
        now: SimTime,
        bot: BotId,
        pod: PodId,
        target: WaypointId,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.repositioning_moves += 1;
        let point = RepositioningPoint {
            time: self.relative(now),
            bot,
            pod,
            target,
        };
        self.repositioning.push(point, sink)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record_bundle_stored(
        &mut self,
        now: SimTime,
        bot: Option<BotId>,
        pod: PodId,
        pod_bundles_handled: u64,
        station: Option<InputStationId>,
        turnover: f64,
        throughput: f64,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.bundles_handled += 1;
        self.counters.max_bundles_handled_by_pod = self
            .counters
            .max_bundles_handled_by_pod
            .max(pod_bundles_handled);
        self.bundle_turnover.push(turnover);
        self.bundle_throughput.push(throughput);
        let point = BundleHandledPoint {
            time: self.relative(now),
            bot,
            pod,
            station,
        };
        self.bundle_handled.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_bundle_placed(
        &mut self,
        now: SimTime,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.bundles_placed += 1;
        let point = BundlePlacedPoint {
            time: self.relative(now),
        };
        self.bundle_placed.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_order_placed(
        &mut self,
        now: SimTime,
        units: u64,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        self.counters.orders_placed += 1;
        self.counters.items_ordered += units;
        let point = OrderPlacedPoint {
            time: self.relative(now),
        };
        self.order_placed.push(point, sink)?;
        Ok(())
    }

    pub(crate) fn record_bundle_rejected(&mut self) {
        self.counters.bundles_rejected += 1;
    }

    pub(crate) fn record_order_rejected(&mut self) {
        self.counters.orders_rejected += 1;
    }

    pub(crate) fn record_bundle_generation_paused(&mut self) {
        self.counters.bundle_generation_stops += 1;
    }

    pub(crate) fn record_order_generation_paused(&mut self) {
        self.counters.order_generation_stops += 1;
    }

    pub(crate) fn record_fill_levels(
        &mut self,
        now: SimTime,
        levels: FillLevels,
        sink: &mut dyn StatSink,
    ) -> Result<(), SinkError> {
        let point = FillLevelPoint {
            time: self.relative(now),
            levels,
        };
        self.fill_level.push(point, sink)?;
        Ok(())
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Zero every counter, clear every buffer and list, and start the
    /// measured window at `now`.
    pub(crate) fn reset(&mut self, now: SimTime) {
        self.counters = StatCounters::default();
        self.output_trips.reset();
        self.input_trips.reset();
        self.item_handled.clear();
        self.bundle_handled.clear();
        self.order_handled.clear();
        self.bundle_placed.clear();
        self.order_placed.clear();
        self.collision.clear();
        self.repositioning.clear();
        self.station_trip.clear();
        self.fill_level.clear();
        self.order_turnover.clear();
        self.order_throughput.clear();
        self.order_lateness.clear();
        self.bundle_turnover.clear();
        self.bundle_throughput.clear();
        self.stat_time_start = now;
        self.warmup_reset_done = true;
    }

    /// Drain every bounded series to the sink. Returns the number of points
    /// written.
    pub(crate) fn flush_all(&mut self, sink: &mut dyn StatSink) -> Result<usize, SinkError> {
        let mut n = 0;
        n += self.item_handled.flush(sink)?;
        n += self.bundle_handled.flush(sink)?;
        n += self.order_handled.flush(sink)?;
        n += self.bundle_placed.flush(sink)?;
        n += self.order_placed.flush(sink)?;
        n += self.collision.flush(sink)?;
        n += self.repositioning.flush(sink)?;
        n += self.station_trip.flush(sink)?;
        n += self.fill_level.flush(sink)?;
        Ok(n)
    }

    // -- Queries -----------------------------------------------------------

    pub fn counters(&self) -> &StatCounters {
        &self.counters
    }

    /// Mean duration of completed output-station trips.
    pub fn mean_output_trip(&self) -> f64 {
        self.output_trips.mean()
    }

    /// Mean duration of completed input-station trips.
    pub fn mean_input_trip(&self) -> f64 {
        self.input_trips.mean()
    }

    pub fn trip_count(&self, kind: TripKind) -> u64 {
        match kind {
            TripKind::Output => self.output_trips.count(),
            TripKind::Input => self.input_trips.count(),
        }
    }

    pub fn stat_time_start(&self) -> SimTime {
        self.stat_time_start
    }

    pub fn warmup_reset_done(&self) -> bool {
        self.warmup_reset_done
    }

    pub fn item_handled(&self) -> &BoundedSeries<ItemHandledPoint> {
        &self.item_handled
    }

    pub fn bundle_handled(&self) -> &BoundedSeries<BundleHandledPoint> {
        &self.bundle_handled
    }

    pub fn order_handled(&self) -> &BoundedSeries<OrderHandledPoint> {
        &self.order_handled
    }

    pub fn bundle_placed(&self) -> &BoundedSeries<BundlePlacedPoint> {
        &self.bundle_placed
    }

    pub fn order_placed(&self) -> &BoundedSeries<OrderPlacedPoint> {
        &self.order_placed
    }

    pub fn collisions(&self) -> &BoundedSeries<CollisionPoint> {
        &self.collision
    }

    pub fn repositioning(&self) -> &BoundedSeries<RepositioningPoint> {
        &self.repositioning
    }

    pub fn station_trips(&self) -> &BoundedSeries<StationTripPoint> {
        &self.station_trip
    }

    pub fn fill_levels(&self) -> &BoundedSeries<FillLevelPoint> {
        &self.fill_level
    }

    pub fn order_turnover(&self) -> &SummarySeries {
        &self.order_turnover
    }

    pub fn order_throughput(&self) -> &SummarySeries {
        &self.order_throughput
    }

    pub fn order_lateness(&self) -> &SummarySeries {
        &self.order_lateness
    }

    pub fn bundle_turnover(&self) -> &SummarySeries {
        &self.bundle_turnover
    }

    pub fn bundle_throughput(&self) -> &SummarySeries {
        &self.bundle_throughput
    }

    /// Points currently buffered across every bounded series.
    pub fn buffered_points(&self) -> usize {
        self.item_handled.len()
            + self.bundle_handled.len()
            + self.order_handled.len()
            + self.bundle_placed.len()
            + self.order_placed.len()
            + self.collision.len()
            + self.repositioning.len()
            + self.station_trip.len()
            + self.fill_level.len()
    }

    /// Samples currently held across every summary list.
    pub fn summary_samples(&self) -> usize {
        self.order_turnover.len()
            + self.order_throughput.len()
            + self.order_lateness.len()
            + self.bundle_turnover.len()
            + self.bundle_throughput.len()
    }
}

impl Default for InstanceStatistics {
    fn default() -> Self {
        Self::new(SeriesConfig::default())
    }
}
