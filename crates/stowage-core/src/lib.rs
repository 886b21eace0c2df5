//! Stowage Core -- the simulation kernel of a robotic mobile fulfillment
//! system.
//!
//! Bots carry movable pods between storage locations and picking or
//! replenishment stations on a waypoint graph spread over one or more tiers.
//! This crate owns the entities, their identities, the deterministic update
//! order, the event bus that drives statistics and capacity totals, and the
//! layout sanity checker. Decision making (which bot, which pod, which path)
//! lives in controllers plugged into the scheduler.
//!
//! # Lifecycle
//!
//! 1. Add entities to an [`builder::InstanceBuilder`] in any order.
//! 2. [`builder::InstanceBuilder::finalize`] wires every cross-reference,
//!    seeds the capacity totals and freezes the observer lists.
//! 3. Optional structural edits (waypoint removal) while the update list is
//!    not frozen yet.
//! 4. [`instance::Instance::tick`] / [`instance::Instance::advance`] run the
//!    fixed slot order; the first tick freezes it.
//!
//! # Tick order
//!
//! Resource manager, compound, controllers (order manager through item
//! manager), statistics observer, bots, input stations, output stations,
//! crash handler. See [`scheduler`].
//!
//! # Key Types
//!
//! - [`store::EntityStore`] -- one arena per entity type, lookup by stable ID
//!   or volatile index.
//! - [`identity::IdentityRegistry`] -- stable IDs and dense volatile indices.
//! - [`instance::Kernel`] -- shared state and the operations that change it.
//! - [`event::EventBus`] -- synchronous fan-out of kernel events.
//! - [`statistics::InstanceStatistics`] -- counters and bounded series.
//! - [`fixed::Weight`] -- Q32.32 fixed-point weight for exact capacity sums.

pub mod builder;
pub mod capacity;
pub mod collision;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod fixed;
pub mod graph;
pub mod id;
pub mod identity;
pub mod instance;
pub mod modification;
pub mod ops;
pub mod resource;
pub mod rng;
pub mod sanity;
pub mod scheduler;
pub mod sim;
pub mod statistics;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use stowage_stats as stats;
