//! Property-based tests for the Stowage kernel.
//!
//! Uses proptest to drive a small warehouse through random operation
//! sequences, then verify that the capacity totals, the identity pools and
//! the state hash behave.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use stowage_core::builder::PodSpec;
use stowage_core::config::SimConfig;
use stowage_core::entity::Entity;
use stowage_core::id::*;
use stowage_core::instance::Instance;
use stowage_core::scheduler::ControllerSet;
use stowage_core::test_utils::*;

// ===========================================================================
// Generators
// ===========================================================================

/// Kernel operations. Indices pick among the live entities of a type, modulo
/// their count.
#[derive(Debug, Clone)]
enum Op {
    PlaceBundle(u32),
    Register(usize, usize),
    Store(usize),
    Stock(usize, u32),
    /// Register a fresh bundle on a pod, then stock that same pod.
    RegisterAndStock(usize, u32, u32),
    PlaceOrder(u32),
    Allocate(usize),
    Reserve(usize, usize),
    Pick(usize, usize),
    AddPod(u8),
    RemoveStorage(usize),
    Tick,
}

fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![
            (1..6u32).prop_map(Op::PlaceBundle),
            (0..20usize, 0..20usize).prop_map(|(b, p)| Op::Register(b, p)),
            (0..20usize).prop_map(Op::Store),
            (0..20usize, 1..4u32).prop_map(|(p, n)| Op::Stock(p, n)),
            (0..20usize, 1..8u32, 1..8u32).prop_map(|(p, r, n)| Op::RegisterAndStock(p, r, n)),
            (1..4u32).prop_map(Op::PlaceOrder),
            (0..20usize).prop_map(Op::Allocate),
            (0..20usize, 0..20usize).prop_map(|(p, o)| Op::Reserve(p, o)),
            (0..20usize, 0..20usize).prop_map(|(p, o)| Op::Pick(p, o)),
            (1..20u8).prop_map(Op::AddPod),
            (0..6usize).prop_map(Op::RemoveStorage),
            Just(Op::Tick),
        ],
        1..=max_ops,
    )
}

// ===========================================================================
// Driver
// ===========================================================================

struct Run {
    instance: Instance,
    tier: TierId,
    item: ItemDescriptionId,
    input: InputStationId,
    output: OutputStationId,
    storage: Vec<WaypointId>,
}

fn start(seed: u64) -> Run {
    let mut config = SimConfig::default();
    config.seed = seed;
    let wh = warehouse(config);
    let (tier, item, input, output) = (wh.tier, wh.item, wh.input, wh.output);
    let storage = wh.storage_locations();
    Run {
        instance: wh.finalize(ControllerSet::new()),
        tier,
        item,
        input,
        output,
        storage,
    }
}

fn pick<T: Copy>(items: &[T], i: usize) -> Option<T> {
    (!items.is_empty()).then(|| items[i % items.len()])
}

/// Apply one operation. Rejected operations are part of the property: they
/// must leave the totals consistent too.
fn apply(run: &mut Run, op: &Op) {
    let item = run.item;
    let k = run.instance.kernel_mut();
    let bundles: Vec<BundleId> = k.store().bundles().ids().collect();
    let pods: Vec<PodId> = k.store().pods().ids().collect();
    let orders: Vec<OrderId> = k.store().orders().ids().collect();
    match *op {
        Op::PlaceBundle(n) => {
            let _ = k
                .place_bundle(item, n)
                .and_then(|b| k.allocate_bundle(b, run.input).map(|_| b));
        }
        Op::Register(b, p) => {
            if let (Some(b), Some(p)) = (pick(&bundles, b), pick(&pods, p)) {
                let _ = k.register_bundle(b, p);
            }
        }
        Op::Store(b) => {
            if let Some(b) = pick(&bundles, b) {
                let _ = k.store_bundle(b, None);
            }
        }
        Op::Stock(p, n) => {
            if let Some(p) = pick(&pods, p) {
                let _ = k.store_initial_bundle(p, item, n);
            }
        }
        Op::RegisterAndStock(p, r, n) => {
            if let Some(p) = pick(&pods, p) {
                let _ = k
                    .place_bundle(item, r)
                    .and_then(|b| k.register_bundle(b, p));
                let _ = k.store_initial_bundle(p, item, n);
            }
        }
        Op::PlaceOrder(n) => {
            let _ = k.place_order(BTreeMap::from([(item, n)]), None);
        }
        Op::Allocate(o) => {
            if let Some(o) = pick(&orders, o) {
                let _ = k.allocate_order(o, run.output);
            }
        }
        Op::Reserve(p, o) => {
            if let (Some(p), Some(o)) = (pick(&pods, p), pick(&orders, o)) {
                let _ = k.reserve_item(p, o, item);
            }
        }
        Op::Pick(p, o) => {
            if let (Some(p), Some(o)) = (pick(&pods, p), pick(&orders, o)) {
                let _ = k.pick_item(run.output, o, p, item);
            }
        }
        Op::AddPod(cap) => {
            let _ = k.add_pod(PodSpec::new(run.tier, w(f64::from(cap))));
        }
        Op::RemoveStorage(i) => {
            if let Some(wp) = pick(&run.storage, i) {
                let _ = run.instance.remove_waypoint(wp);
            }
        }
        Op::Tick => {
            let next = run.instance.now() + 1.0;
            let _ = run.instance.tick(next);
        }
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The incremental totals equal a full scan after every operation.
    #[test]
    fn capacity_reconciles(ops in arb_ops(60)) {
        let mut run = start(0);
        for op in &ops {
            apply(&mut run, op);
            let k = run.instance.kernel();
            prop_assert_eq!(k.capacity(), k.scan_capacity(), "after {:?}", op);
            for pod in k.store().pods().iter() {
                prop_assert!(
                    pod.capacity_in_use + pod.capacity_reserved <= pod.capacity,
                    "{} overfilled after {:?}",
                    pod.id(),
                    op
                );
            }
            let totals = k.capacity();
            prop_assert!(totals.usage + totals.reserved <= totals.capacity);
        }
    }

    /// Stable IDs are never handed out twice, and volatile indices stay
    /// inside the pool's high-water mark with free slots reused first.
    #[test]
    fn identities_stay_dense_and_unique(ops in arb_ops(60)) {
        let mut run = start(0);
        let mut seen: BTreeSet<(EntityKind, u32)> = BTreeSet::new();
        for op in &ops {
            apply(&mut run, op);
            let store = run.instance.kernel().store();
            for pod in store.pods().ids() {
                seen.insert((EntityKind::Pod, pod.0));
            }
            for bundle in store.bundles().ids() {
                seen.insert((EntityKind::ItemBundle, bundle.0));
            }
            for order in store.orders().ids() {
                seen.insert((EntityKind::Order, order.0));
            }
        }

        let k = run.instance.kernel_mut();
        let fresh = k.add_pod(PodSpec::new(run.tier, w(1.0))).unwrap();
        prop_assert!(!seen.contains(&(EntityKind::Pod, fresh.0)));

        let store = run.instance.kernel().store();
        let pool = store.identities().index_pool(EntityKind::Pod);
        let held = store.pods().held_indices();
        prop_assert_eq!(held.len(), pool.held_count());
        for idx in &held {
            prop_assert!(idx.0 < pool.high_water());
            prop_assert_eq!(store.pods().by_index(*idx).map(|p| p.volatile_index()), Some(*idx));
        }
        let wp_pool = store.identities().index_pool(EntityKind::Waypoint);
        prop_assert_eq!(store.waypoints().len(), wp_pool.held_count());
    }

    /// Identical seeds and operation sequences give identical state hashes.
    #[test]
    fn deterministic_state_hash(ops in arb_ops(40), seed in 0..1000u64) {
        let mut a = start(seed);
        let mut b = start(seed);
        for op in &ops {
            apply(&mut a, op);
            apply(&mut b, op);
        }
        prop_assert_eq!(a.instance.kernel().state_hash(), b.instance.kernel().state_hash());
    }

    /// A statistics reset zeroes the counters whatever happened before.
    #[test]
    fn reset_zeroes_counters(ops in arb_ops(40)) {
        let mut run = start(0);
        for op in &ops {
            apply(&mut run, op);
        }
        let before = run.instance.kernel().capacity();
        run.instance.stat_reset().unwrap();
        let k = run.instance.kernel();
        prop_assert_eq!(*k.statistics().counters(), Default::default());
        prop_assert!(k.statistics().warmup_reset_done());
        prop_assert_eq!(k.capacity(), before);
        for pod in k.store().pods().iter() {
            prop_assert_eq!(pod.stat_items_handled, 0);
        }
    }
}
