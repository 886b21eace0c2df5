//! Integration tests for the Stowage kernel.
//!
//! These tests exercise end-to-end behavior across a finalized instance:
//! layout checks, capacity bookkeeping, statistics flushing, structural
//! removal, the tick order, failure handling, collisions and picking.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use stowage_core::builder::*;
use stowage_core::config::{SanityPolicy, SimConfig};
use stowage_core::entity::*;
use stowage_core::error::{KernelError, SubsystemError};
use stowage_core::event::{Event, EventKind};
use stowage_core::fixed::{SimTime, Weight};
use stowage_core::id::*;
use stowage_core::instance::Kernel;
use stowage_core::sanity::SanityErrorKind;
use stowage_core::scheduler::{Agent, AgentDriver, ControllerRole, ControllerSet, Slot};
use stowage_core::test_utils::*;

fn order_of(item: ItemDescriptionId, qty: u32) -> BTreeMap<ItemDescriptionId, u32> {
    BTreeMap::from([(item, qty)])
}

// ===========================================================================
// Test 1: A one-way corner is a dead end
// ===========================================================================

#[test]
fn one_way_corner_is_dead_end() {
    let mut b = InstanceBuilder::new(SimConfig::default());
    let tier = b.add_tier(TierSpec::new(2.0, 2.0)).unwrap();
    let a = b.add_waypoint(WaypointSpec::new(tier, 0.0, 0.0)).unwrap();
    let c = b.add_waypoint(WaypointSpec::new(tier, 1.0, 0.0)).unwrap();
    b.add_path(a, c);
    let instance = b.finalize(ControllerSet::new()).unwrap();

    let findings = instance.sanity_check();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, SanityErrorKind::DeadEnd);
    assert!(findings[0].location.starts_with(&c.to_string()), "{}", findings[0]);
}

#[test]
fn isolated_corner_of_grid_is_only_dead_end() {
    let mut b = InstanceBuilder::new(SimConfig::default());
    let tier = b.add_tier(TierSpec::new(3.0, 3.0)).unwrap();
    let grid: Vec<Vec<WaypointId>> = (0..3)
        .map(|row| {
            (0..3)
                .map(|col| {
                    b.add_waypoint(WaypointSpec::new(tier, col as f64, row as f64))
                        .unwrap()
                })
                .collect()
        })
        .collect();
    let corner = grid[0][0];
    for row in 0..3 {
        for col in 0..3 {
            let here = grid[row][col];
            if here == corner {
                continue;
            }
            if col + 1 < 3 && grid[row][col + 1] != corner {
                b.add_bidirectional_path(here, grid[row][col + 1]);
            }
            if row + 1 < 3 && grid[row + 1][col] != corner {
                b.add_bidirectional_path(here, grid[row + 1][col]);
            }
        }
    }
    let instance = b.finalize(ControllerSet::new()).unwrap();

    let findings = instance.sanity_check();
    assert_eq!(findings.len(), 1, "{findings:?}");
    assert_eq!(findings[0].kind, SanityErrorKind::DeadEnd);
    assert!(findings[0].location.starts_with(&corner.to_string()), "{}", findings[0]);
}

// ===========================================================================
// Test 2: Storage reachable only through storage is blockable
// ===========================================================================
//
// aisle <-> storage T <-> storage S

#[test]
fn storage_behind_storage_is_blockable() {
    let mut b = InstanceBuilder::new(SimConfig::default());
    let tier = b.add_tier(TierSpec::new(3.0, 1.0)).unwrap();
    let aisle = b.add_waypoint(WaypointSpec::new(tier, 0.0, 0.0)).unwrap();
    let t = b.add_waypoint(WaypointSpec::new(tier, 1.0, 0.0).storage()).unwrap();
    let s = b.add_waypoint(WaypointSpec::new(tier, 2.0, 0.0).storage()).unwrap();
    b.add_bidirectional_path(aisle, t);
    b.add_bidirectional_path(t, s);
    let instance = b.finalize(ControllerSet::new()).unwrap();

    let findings = instance.sanity_check();
    let kinds: Vec<_> = findings.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SanityErrorKind::DeadEndByBlocking,
            SanityErrorKind::DeadEndByBlocking,
            SanityErrorKind::BlockableStorageLocation,
        ]
    );
    assert!(findings[0].location.starts_with(&aisle.to_string()));
    assert!(findings[1].location.starts_with(&s.to_string()));
    assert!(findings[2].location.starts_with(&s.to_string()));
}

// ===========================================================================
// Test 3: Resting positions: 5 storage, 3 pods, 3 bots
// ===========================================================================

fn resting_layout(bots: usize, policy: SanityPolicy) -> stowage_core::instance::Instance {
    let mut config = SimConfig::default();
    config.sanity.policy = policy;
    config.simulation_time = 1.0;
    let mut b = InstanceBuilder::new(config);
    let tier = b.add_tier(TierSpec::new(4.0, 1.0)).unwrap();
    let grid = add_grid(&mut b, tier, 5, 2, |_, row, spec| {
        if row == 1 { spec.storage() } else { spec }
    });
    for col in 0..3 {
        b.add_pod(PodSpec::new(tier, w(5.0)).at(grid[1][col])).unwrap();
    }
    for col in 0..bots {
        b.add_bot(BotSpec::new(tier, 0.0, 0.0, 0.3).at(grid[0][col])).unwrap();
    }
    b.finalize(ControllerSet::new()).unwrap()
}

#[test]
fn insufficient_resting_positions() {
    let instance = resting_layout(3, SanityPolicy::Warn);
    let findings = instance.sanity_check();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, SanityErrorKind::InsufficientRestingPositions);
    assert_eq!(findings[0].location, "StorageLocations-Pods<Bots:5-3<3");

    assert!(resting_layout(2, SanityPolicy::Warn).sanity_check().is_empty());
}

#[test]
fn refuse_policy_stops_the_run() {
    let mut instance = resting_layout(3, SanityPolicy::Refuse);
    match instance.execute() {
        Err(KernelError::SanityRefused(findings)) => assert_eq!(findings.len(), 1),
        other => panic!("expected SanityRefused, got: {other:?}"),
    }
    assert_eq!(instance.kernel().ticks(), 0);

    let mut instance = resting_layout(3, SanityPolicy::Warn);
    let report = instance.execute().unwrap();
    assert_eq!(report.sanity_findings, 1);

    let instance = resting_layout(3, SanityPolicy::Ignore);
    assert!(instance.check_sanity_policy().unwrap().is_empty());
}

// ===========================================================================
// Test 4: Register then store moves weight backlog -> reserved -> usage
// ===========================================================================

#[test]
fn register_then_store_capacity() {
    let wh = warehouse(SimConfig::default());
    let (item, pod, input) = (wh.item, wh.pods[0], wh.input);
    let mut instance = wh.finalize(ControllerSet::new());
    let k = instance.kernel_mut();

    let bundle = k.place_bundle(item, 4).unwrap();
    assert_eq!(k.capacity().backlog, w(4.0));
    k.allocate_bundle(bundle, input).unwrap();
    k.register_bundle(bundle, pod).unwrap();
    let snap = k.capacity();
    assert_eq!((snap.backlog, snap.reserved), (Weight::ZERO, w(4.0)));
    assert_eq!(k.get::<Pod>(pod).unwrap().capacity_reserved, w(4.0));
    k.verify_capacity().unwrap();

    k.store_bundle(bundle, None).unwrap();
    let snap = k.capacity();
    assert_eq!((snap.reserved, snap.usage), (Weight::ZERO, w(4.0)));
    assert_eq!(k.get::<Pod>(pod).unwrap().available_units(item), 4);
    assert!(k.get::<InputStation>(input).unwrap().assigned_bundles.is_empty());
    assert_eq!(k.statistics().counters().bundles_handled, 1);
    k.verify_capacity().unwrap();

    let big = k.place_bundle(item, 11).unwrap();
    assert!(matches!(
        k.register_bundle(big, pod),
        Err(KernelError::InsufficientCapacity { .. })
    ));
    assert!(matches!(
        k.store_bundle(big, None),
        Err(KernelError::InvalidState { .. })
    ));
    k.verify_capacity().unwrap();
}

// ===========================================================================
// Test 5: A bounded series flushes everything on its cap + 1-th point
// ===========================================================================

#[test]
fn series_flushes_on_overflow() {
    let mut config = SimConfig::default();
    config.statistics.max_data_points = 3;
    let sink = SharedSink::new();
    let mut wh = warehouse(config);
    wh.builder = wh.builder.with_sink(sink.boxed());
    let item = wh.item;
    let mut instance = wh.finalize(ControllerSet::new());
    let k = instance.kernel_mut();

    for _ in 0..3 {
        k.place_order(order_of(item, 1), None).unwrap();
    }
    assert_eq!(sink.lines("orderplaced").len(), 0);
    assert_eq!(k.statistics().order_placed().len(), 3);

    k.place_order(order_of(item, 1), None).unwrap();
    assert_eq!(sink.lines("orderplaced").len(), 4);
    assert_eq!(sink.batch_count("orderplaced"), 1);
    assert!(k.statistics().order_placed().is_empty());

    k.place_order(order_of(item, 2), None).unwrap();
    assert_eq!(k.statistics().order_placed().len(), 1);
    let flushed = instance.stat_finish().unwrap();
    assert_eq!(flushed, 1);
    assert_eq!(sink.lines("orderplaced").len(), 5);
    assert_eq!(sink.batch_count("orderplaced"), 2);
    assert_eq!(instance.kernel().statistics().counters().items_ordered, 6);
}

#[test]
fn footprint_level_discards_series() {
    let mut config = SimConfig::default();
    config.statistics.max_data_points = 1;
    config.statistics.file_level = "footprint".to_string();
    let sink = SharedSink::new();
    let mut wh = warehouse(config);
    wh.builder = wh.builder.with_sink(sink.boxed());
    let item = wh.item;
    let mut instance = wh.finalize(ControllerSet::new());
    for _ in 0..5 {
        instance.kernel_mut().place_order(order_of(item, 1), None).unwrap();
    }
    instance.stat_finish().unwrap();
    assert_eq!(sink.total_lines(), 0);
    assert_eq!(instance.kernel().statistics().counters().orders_placed, 5);
}

// ===========================================================================
// Test 6: Removing a waypoint leaves no dangling references
// ===========================================================================

#[test]
fn waypoint_removal_cascades() {
    let mut wh = warehouse(SimConfig::default());
    let elevator = wh.builder.add_elevator(None).unwrap();
    let e1 = wh
        .builder
        .add_waypoint(WaypointSpec::new(wh.tier, 2.0, 3.0).elevator(elevator))
        .unwrap();
    wh.builder.add_bidirectional_path(e1, wh.grid[3][2]);
    let guarded = wh
        .builder
        .add_semaphore(SemaphoreSpec::new(1).guard(wh.grid[3][1], wh.grid[3][2], true))
        .unwrap();
    let (item, pod, output) = (wh.item, wh.pods[0], wh.output);
    let storage = wh.grid[1][1];
    let output_wp = wh.grid[0][0];
    let guarded_wp = wh.grid[3][2];
    let mut instance = wh.finalize(ControllerSet::new());

    let k = instance.kernel_mut();
    let stocked = k.store_initial_bundle(pod, item, 2).unwrap();
    let pending = k.place_bundle(item, 3).unwrap();
    k.register_bundle(pending, pod).unwrap();
    let order = k.place_order(order_of(item, 1), None).unwrap();
    k.allocate_order(order, output).unwrap();
    k.reserve_item(pod, order, item).unwrap();

    // Storage location with a stocked pod.
    let report = instance.remove_waypoint(storage).unwrap();
    assert_eq!(report.waypoints, vec![storage]);
    assert_eq!(report.pods, vec![pod]);
    assert_eq!(report.dropped_bundles, vec![stocked]);
    assert_eq!(report.returned_bundles, vec![pending]);
    let k = instance.kernel();
    assert!(references_to(k, storage).is_empty());
    assert!(matches!(k.get::<Pod>(pod), Err(KernelError::NotFound { .. })));
    assert_eq!(k.get::<ItemBundle>(pending).unwrap().state, BundleState::Backlog);
    assert_eq!(k.capacity().capacity, w(20.0));
    assert_eq!(k.capacity().backlog, w(3.0));
    assert_eq!(k.resources().open_requests().count(), 1);
    k.verify_capacity().unwrap();

    // Handover point of the output station.
    let report = instance.remove_waypoint(output_wp).unwrap();
    assert_eq!(report.output_stations, vec![output]);
    let k = instance.kernel();
    assert!(references_to(k, output_wp).is_empty());
    assert_eq!(k.get::<Order>(order).unwrap().station, None);
    assert!(k.resources().requests_of(order).all(|r| r.station.is_none()));

    // Guarded aisle point next to the elevator stop.
    let report = instance.remove_waypoint(guarded_wp).unwrap();
    assert_eq!(report.semaphores, vec![guarded]);
    assert!(report.elevators.is_empty());
    assert!(references_to(instance.kernel(), guarded_wp).is_empty());
    assert!(instance.kernel().graph().outgoing(e1).is_empty());
    let report = instance.remove_waypoint(e1).unwrap();
    assert_eq!(report.elevators, vec![elevator]);
    assert!(instance.kernel().store().elevators().is_empty());

    assert!(matches!(
        instance.remove_waypoint(storage),
        Err(KernelError::NotFound { .. })
    ));
}

#[test]
fn rectangle_removal_takes_bots_and_pods() {
    let wh = warehouse(SimConfig::default());
    let (tier, bots, row3) = (wh.tier, wh.bots.clone(), wh.grid[3].clone());
    let mut instance = wh.finalize(ControllerSet::new());

    let report = instance.remove_waypoints_in(tier, 0.0, 3.0, 4.0, 3.0).unwrap();
    assert_eq!(report.waypoints, row3);
    assert_eq!(report.bots, bots);
    assert_eq!(report.detached_bots, bots);
    let k = instance.kernel();
    assert!(k.store().bots().is_empty());
    let roster = k.get::<Tier>(tier).unwrap().roster.get();
    assert!(roster.bots.is_empty());
    assert_eq!(roster.waypoints.len(), 15);
    for wp in row3 {
        assert!(references_to(k, wp).is_empty());
    }
}

#[test]
fn removal_after_first_tick_is_frozen() {
    let wh = warehouse(SimConfig::default());
    let wp = wh.grid[2][2];
    let mut instance = wh.finalize(ControllerSet::new());
    instance.tick(1.0).unwrap();
    assert!(matches!(
        instance.remove_waypoint(wp),
        Err(KernelError::ScheduleFrozen)
    ));
    assert!(instance.kernel().store().waypoints().contains(wp));
}

// ===========================================================================
// Test 7: Statistics reset at the warmup boundary
// ===========================================================================

#[test]
fn stat_reset_zeroes_everything() {
    let sink = SharedSink::new();
    let mut config = SimConfig::default();
    config.statistics.max_data_points = 1;
    let mut wh = warehouse(config);
    wh.builder = wh.builder.with_sink(sink.boxed());
    let (item, bot) = (wh.item, wh.bots[0]);
    let log = Rc::new(RefCell::new(Vec::new()));
    let controllers = ControllerSet::new().with(
        ControllerRole::OrderManager,
        RecordingController::new("orders", &log).boxed(),
    );
    let mut instance = wh.finalize(controllers);

    let k = instance.kernel_mut();
    for _ in 0..3 {
        k.place_order(order_of(item, 1), None).unwrap();
    }
    k.move_bot(bot, 1.0, 3.0, None).unwrap();
    assert!(sink.total_lines() > 0);
    instance.tick(5.0).unwrap();

    instance.stat_reset().unwrap();
    let k = instance.kernel();
    assert_eq!(k.statistics().counters().orders_placed, 0);
    assert_eq!(k.statistics().stat_time_start(), 5.0);
    assert!(k.statistics().warmup_reset_done());
    assert_eq!(k.get::<Bot>(bot).unwrap().stat_distance_traveled, 0.0);
    assert_eq!(sink.total_lines(), 0);
    assert_eq!(k.resources().request_count(), 3);
}

// ===========================================================================
// Test 8: Slots run in the fixed order, whatever the insertion order
// ===========================================================================

#[test]
fn slots_run_in_fixed_order() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let controllers = ControllerSet::new()
        .with(ControllerRole::ItemManager, RecordingController::new("items", &log).boxed())
        .with(ControllerRole::PathManager, RecordingController::new("paths", &log).boxed())
        .with(ControllerRole::BotManager, RecordingController::new("bots", &log).boxed())
        .with(ControllerRole::OrderManager, RecordingController::new("orders", &log).boxed());
    let mut instance = warehouse(SimConfig::default()).finalize(controllers);
    assert!(instance.schedule().is_none());

    instance.tick(1.0).unwrap();
    instance.tick(2.0).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            "orders@1", "bots@1", "paths@1", "items@1", "orders@2", "bots@2", "paths@2",
            "items@2",
        ]
    );

    let schedule = instance.schedule().unwrap();
    assert_eq!(schedule.first(), Some(&Slot::ResourceManager));
    assert_eq!(schedule[1], Slot::Compound);
    assert_eq!(schedule.last(), Some(&Slot::CrashHandler));
    let observer = schedule.iter().position(|s| *s == Slot::Observer).unwrap();
    let items = schedule
        .iter()
        .position(|s| *s == Slot::Controller(ControllerRole::ItemManager))
        .unwrap();
    assert!(items < observer);
    assert_eq!(schedule.len(), 8);
}

/// Logs every agent it advances and walks bots a quarter unit towards y = 0.
struct Stepper {
    log: Rc<RefCell<Vec<String>>>,
}

impl AgentDriver for Stepper {
    fn name(&self) -> &str {
        "stepper"
    }

    fn update_agent(
        &mut self,
        kernel: &mut Kernel,
        agent: Agent,
        _last: SimTime,
        _now: SimTime,
    ) -> Result<(), SubsystemError> {
        self.log.borrow_mut().push(Slot::Agent(agent).to_string());
        if let Agent::Bot(bot) = agent {
            let b = kernel.get::<Bot>(bot)?;
            let (x, y) = (b.x, b.y);
            kernel.move_bot(bot, x, y - 0.25, None)?;
        }
        Ok(())
    }
}

#[test]
fn agents_run_after_controllers() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let wh = warehouse(SimConfig::default());
    let (tier, bots, input, output) = (wh.tier, wh.bots.clone(), wh.input, wh.output);
    let controllers = ControllerSet::new()
        .with(ControllerRole::BotManager, RecordingController::new("bots", &log).boxed())
        .with_bot_driver(Box::new(Stepper { log: Rc::clone(&log) }))
        .with_station_driver(Box::new(Stepper { log: Rc::clone(&log) }));
    let mut instance = wh.finalize(controllers);

    instance.tick(1.0).unwrap();
    instance.tick(2.0).unwrap();

    let one_tick = |t: u32| {
        vec![
            format!("bots@{t}"),
            bots[0].to_string(),
            bots[1].to_string(),
            input.to_string(),
            output.to_string(),
        ]
    };
    let expected: Vec<String> = one_tick(1).into_iter().chain(one_tick(2)).collect();
    assert_eq!(*log.borrow(), expected);

    let schedule = instance.schedule().unwrap();
    assert_eq!(schedule.len(), 9);
    assert_eq!(schedule[4], Slot::Agent(Agent::Bot(bots[0])));
    assert_eq!(schedule.last(), Some(&Slot::CrashHandler));
    for &bot in &bots {
        assert_eq!(instance.kernel().get::<Bot>(bot).unwrap().y, 2.5);
    }
    let sweep: Vec<BotId> = instance.kernel().collisions().tier_bots(tier).collect();
    assert_eq!(sweep, bots);
}

#[test]
fn advance_jumps_to_next_event() {
    let mut config = SimConfig::default();
    config.statistics.observer_interval = 0.0;
    let log = Rc::new(RefCell::new(Vec::new()));
    let controllers = ControllerSet::new().with(
        ControllerRole::TaskAllocator,
        RecordingController::new("alloc", &log).every(10.0).boxed(),
    );
    let mut instance = warehouse(config).finalize(controllers);

    let ticks = instance.advance(30.0).unwrap();
    assert_eq!(ticks, 3);
    assert_eq!(instance.now(), 30.0);
    assert_eq!(*log.borrow(), vec!["alloc@10", "alloc@20", "alloc@30"]);
}

// ===========================================================================
// Test 9: A failing subsystem aborts the run
// ===========================================================================

#[test]
fn subsystem_failure_aborts_run() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let controllers = ControllerSet::new()
        .with(ControllerRole::BotManager, Box::new(FailingController::new(2)))
        .with(ControllerRole::ItemManager, RecordingController::new("items", &log).boxed());
    let mut instance = warehouse(SimConfig::default()).finalize(controllers);

    instance.tick(1.0).unwrap();
    match instance.tick(2.0) {
        Err(KernelError::SubsystemFailure {
            subsystem, time, ..
        }) => {
            assert_eq!(subsystem, "bot-manager");
            assert_eq!(time, 2.0);
        }
        other => panic!("expected SubsystemFailure, got: {other:?}"),
    }
    assert!(instance.has_failed());
    assert_eq!(*log.borrow(), vec!["items@1"]);
    assert!(matches!(instance.tick(3.0), Err(KernelError::RunAborted)));
    assert!(matches!(instance.advance(5.0), Err(KernelError::RunAborted)));
    assert_eq!(instance.kernel().ticks(), 1);
}

// ===========================================================================
// Test 10: Equal seeds and inputs give equal state hashes
// ===========================================================================

fn seeded_run(seed: u64) -> u64 {
    let mut config = SimConfig::default();
    config.seed = seed;
    config.simulation_time = 120.0;
    config.statistics.observer_interval = 15.0;
    let wh = warehouse(config);
    let item = wh.item;
    let pod = wh.pods[1];
    let controllers = ControllerSet::new()
        .with(ControllerRole::OrderManager, Box::new(OrderFeeder::new(item, 7.5)));
    let mut instance = wh.finalize(controllers);
    instance.kernel_mut().store_initial_bundle(pod, item, 5).unwrap();
    instance.kernel_mut().rng().next_u64();
    let report = instance.execute().unwrap();
    assert_eq!(report.state_hash, instance.kernel().state_hash());
    report.state_hash
}

#[test]
fn equal_seeds_give_equal_hashes() {
    assert_eq!(seeded_run(7), seeded_run(7));
    assert_ne!(seeded_run(7), seeded_run(8));
}

// ===========================================================================
// Test 11: Collisions from overlap and from leaving the tier
// ===========================================================================

#[test]
fn crash_handler_detects_overlap() {
    let mut wh = warehouse(SimConfig::default());
    let log = record_events(&mut wh.builder, &[EventKind::Collision]);
    let (a, b) = (wh.bots[0], wh.bots[1]);
    let mut instance = wh.finalize(ControllerSet::new());

    let k = instance.kernel_mut();
    k.move_bot(b, 0.2, 3.0, None).unwrap();
    k.flag_potential_collision(b).unwrap();
    instance.tick(1.0).unwrap();

    let events = log.borrow();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::Collision { bot, time, .. } if bot == b && time == 1.0));
    let k = instance.kernel();
    assert_eq!(k.statistics().counters().collisions, 1);
    assert_eq!(k.get::<Bot>(b).unwrap().stat_collisions, 1);
    assert_eq!(k.get::<Bot>(a).unwrap().stat_collisions, 0);
    assert_eq!(k.collisions().flagged().count(), 0);
}

#[test]
fn leaving_the_tier_can_abort() {
    let mut config = SimConfig::default();
    config.collision.abort_on_collision = true;
    let wh = warehouse(config);
    let bot = wh.bots[0];
    let mut instance = wh.finalize(ControllerSet::new());

    instance.kernel_mut().move_bot(bot, 9.0, 9.0, None).unwrap();
    instance.kernel_mut().flag_potential_collision(bot).unwrap();
    match instance.tick(1.0) {
        Err(KernelError::SubsystemFailure { subsystem, .. }) => {
            assert_eq!(subsystem, "crash-handler")
        }
        other => panic!("expected SubsystemFailure, got: {other:?}"),
    }
}

// ===========================================================================
// Test 12: Picking a reserved order to completion
// ===========================================================================

#[test]
fn pick_flow_completes_order() {
    let mut wh = warehouse(SimConfig::default());
    let log = record_events(
        &mut wh.builder,
        &[EventKind::ItemHandled, EventKind::LineHandled, EventKind::OrderCompleted],
    );
    let (item, pod, output) = (wh.item, wh.pods[0], wh.output);
    let mut instance = wh.finalize(ControllerSet::new());
    let k = instance.kernel_mut();

    k.store_initial_bundle(pod, item, 3).unwrap();
    let order = k.place_order(order_of(item, 2), Some(100.0)).unwrap();
    assert!(matches!(
        k.pick_item(output, order, pod, item),
        Err(KernelError::InvalidState { .. })
    ));
    k.allocate_order(order, output).unwrap();
    k.reserve_item(pod, order, item).unwrap();
    k.reserve_item(pod, order, item).unwrap();
    assert_eq!(k.get::<Pod>(pod).unwrap().available_units(item), 1);

    let first = k.pick_item(output, order, pod, item).unwrap();
    assert!(!first.line_completed && !first.order_completed);
    let second = k.pick_item(output, order, pod, item).unwrap();
    assert!(second.line_completed && second.order_completed);

    let kinds: Vec<_> = log.borrow().iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ItemHandled,
            EventKind::ItemHandled,
            EventKind::LineHandled,
            EventKind::OrderCompleted,
        ]
    );
    let p = k.get::<Pod>(pod).unwrap();
    assert_eq!(p.available_units(item), 1);
    assert!(p.reserved_items.is_empty());
    assert_eq!(k.capacity().usage, w(1.0));
    assert_eq!(k.resources().request_count(), 0);
    let s = k.get::<OutputStation>(output).unwrap();
    assert_eq!((s.stat_items_handled, s.stat_orders_handled), (2, 1));
    assert!(s.assigned_orders.is_empty());
    let c = k.statistics().counters();
    assert_eq!((c.items_handled, c.lines_handled, c.orders_handled, c.orders_late), (2, 1, 1, 0));
    assert!(matches!(
        k.pick_item(output, order, pod, item),
        Err(KernelError::InvalidState { .. })
    ));
    k.verify_capacity().unwrap();
}

#[test]
fn station_capacity_is_a_hard_limit() {
    let wh = warehouse(SimConfig::default());
    let (item, output) = (wh.item, wh.output);
    let mut instance = wh.finalize(ControllerSet::new());
    let k = instance.kernel_mut();
    for n in 0..3 {
        let order = k.place_order(order_of(item, 1), None).unwrap();
        let res = k.allocate_order(order, output);
        if n < 2 {
            res.unwrap();
        } else {
            assert!(matches!(res, Err(KernelError::InvalidState { .. })));
        }
    }
    assert!(matches!(
        k.place_order(order_of(item, 0), None),
        Err(KernelError::Empty { kind: EntityKind::Order })
    ));
}

// ===========================================================================
// Test 13: Full execute with warmup samples fill levels after the reset
// ===========================================================================

#[test]
fn execute_samples_after_warmup() {
    let mut config = SimConfig::default();
    config.warmup_time = 10.0;
    config.simulation_time = 20.0;
    config.statistics.observer_interval = 5.0;
    let sink = SharedSink::new();
    let mut wh = warehouse(config);
    wh.builder = wh.builder.with_sink(sink.boxed());
    let mut instance = wh.finalize(ControllerSet::new());

    let report = instance.execute().unwrap();
    assert_eq!(report.end_time, 30.0);
    assert_eq!(report.ticks, 6);
    assert_eq!(report.flushed_points, 4);
    let lines = sink.lines("filllevels");
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("5;"), "{}", lines[0]);
}
