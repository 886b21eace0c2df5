//! Update contract and the fixed per-tick order.
//!
//! Every tick walks one frozen list of [`Slot`]s. Kernel-owned slots
//! (resource manager, compound, statistics observer, crash handler) are
//! always present; controller slots exist only for the roles filled in the
//! [`ControllerSet`], and per-agent slots only when a driver for that agent
//! type is installed. The list is built on the first tick and never changes
//! afterwards.
//!
//! # Order
//!
//! 1. resource manager
//! 2. compound
//! 3. order manager, task allocator, bundle manager
//! 4. bot manager
//! 5. station manager
//! 6. pod storage manager, repositioning manager, item storage manager
//! 7. path manager
//! 8. shared control elements
//! 9. item manager
//! 10. statistics observer
//! 11. bots
//! 12. input stations, then output stations
//! 13. crash handler

use std::collections::BTreeMap;
use std::fmt;

use crate::error::SubsystemError;
use crate::fixed::SimTime;
use crate::id::{BotId, InputStationId, OutputStationId};
use crate::instance::Kernel;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A subsystem advanced once per tick.
///
/// Subsystems read kernel state freely and change it only through the
/// operations on [`Kernel`], so the event bus and the capacity totals stay
/// authoritative.
pub trait Updateable {
    fn name(&self) -> &str;

    /// Earliest time this subsystem needs a tick. `INFINITY` when idle.
    fn next_event_time(&self, kernel: &Kernel, now: SimTime) -> SimTime {
        let _ = (kernel, now);
        SimTime::INFINITY
    }

    /// Advance from `last_time` to `current_time`. Any error aborts the run.
    fn update(
        &mut self,
        kernel: &mut Kernel,
        last_time: SimTime,
        current_time: SimTime,
    ) -> Result<(), SubsystemError>;

    /// Drop everything measured so far. Called at the warmup boundary.
    fn stat_reset(&mut self) {}

    /// Called once at the end of a run, before the final flush.
    fn stat_finish(&mut self, kernel: &Kernel) {
        let _ = kernel;
    }
}

/// An agent advanced by its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Agent {
    Bot(BotId),
    InputStation(InputStationId),
    OutputStation(OutputStationId),
}

/// Behaviour shared by every agent of one type.
pub trait AgentDriver {
    fn name(&self) -> &str;

    fn next_event_time(&self, kernel: &Kernel, agent: Agent, now: SimTime) -> SimTime {
        let _ = (kernel, agent, now);
        SimTime::INFINITY
    }

    fn update_agent(
        &mut self,
        kernel: &mut Kernel,
        agent: Agent,
        last_time: SimTime,
        current_time: SimTime,
    ) -> Result<(), SubsystemError>;

    fn stat_reset(&mut self) {}
}

// ---------------------------------------------------------------------------
// Controller roles
// ---------------------------------------------------------------------------

/// Pluggable controller roles, declared in tick order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControllerRole {
    OrderManager,
    TaskAllocator,
    BundleManager,
    BotManager,
    StationManager,
    PodStorageManager,
    RepositioningManager,
    ItemStorageManager,
    PathManager,
    SharedControl,
    ItemManager,
}

impl ControllerRole {
    pub const ALL: [ControllerRole; 11] = [
        ControllerRole::OrderManager,
        ControllerRole::TaskAllocator,
        ControllerRole::BundleManager,
        ControllerRole::BotManager,
        ControllerRole::StationManager,
        ControllerRole::PodStorageManager,
        ControllerRole::RepositioningManager,
        ControllerRole::ItemStorageManager,
        ControllerRole::PathManager,
        ControllerRole::SharedControl,
        ControllerRole::ItemManager,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ControllerRole::OrderManager => "order-manager",
            ControllerRole::TaskAllocator => "task-allocator",
            ControllerRole::BundleManager => "bundle-manager",
            ControllerRole::BotManager => "bot-manager",
            ControllerRole::StationManager => "station-manager",
            ControllerRole::PodStorageManager => "pod-storage-manager",
            ControllerRole::RepositioningManager => "repositioning-manager",
            ControllerRole::ItemStorageManager => "item-storage-manager",
            ControllerRole::PathManager => "path-manager",
            ControllerRole::SharedControl => "shared-control",
            ControllerRole::ItemManager => "item-manager",
        }
    }
}

impl fmt::Display for ControllerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The external subsystems of one run.
#[derive(Default)]
pub struct ControllerSet {
    roles: BTreeMap<ControllerRole, Box<dyn Updateable>>,
    bot_driver: Option<Box<dyn AgentDriver>>,
    station_driver: Option<Box<dyn AgentDriver>>,
}

impl fmt::Debug for ControllerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerSet")
            .field("roles", &self.roles.keys().collect::<Vec<_>>())
            .field("bot_driver", &self.bot_driver.as_ref().map(|d| d.name().to_string()))
            .field(
                "station_driver",
                &self.station_driver.as_ref().map(|d| d.name().to_string()),
            )
            .finish()
    }
}

impl ControllerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `role`, replacing any previous controller.
    pub fn with(mut self, role: ControllerRole, controller: Box<dyn Updateable>) -> Self {
        self.roles.insert(role, controller);
        self
    }

    pub fn with_bot_driver(mut self, driver: Box<dyn AgentDriver>) -> Self {
        self.bot_driver = Some(driver);
        self
    }

    pub fn with_station_driver(mut self, driver: Box<dyn AgentDriver>) -> Self {
        self.station_driver = Some(driver);
        self
    }

    pub fn has(&self, role: ControllerRole) -> bool {
        self.roles.contains_key(&role)
    }

    pub fn controller(&self, role: ControllerRole) -> Option<&dyn Updateable> {
        self.roles.get(&role).map(|c| c.as_ref())
    }

    pub(crate) fn controller_mut(&mut self, role: ControllerRole) -> Option<&mut (dyn Updateable + 'static)> {
        self.roles.get_mut(&role).map(|c| c.as_mut())
    }

    pub(crate) fn bot_driver_mut(&mut self) -> Option<&mut (dyn AgentDriver + 'static)> {
        self.bot_driver.as_deref_mut()
    }

    pub(crate) fn station_driver_mut(&mut self) -> Option<&mut (dyn AgentDriver + 'static)> {
        self.station_driver.as_deref_mut()
    }

    /// Earliest event time over every controller and driver.
    pub(crate) fn next_event_time(&self, kernel: &Kernel, schedule: &[Slot], now: SimTime) -> SimTime {
        let mut next = SimTime::INFINITY;
        for slot in schedule {
            let t = match *slot {
                Slot::Controller(role) => self
                    .roles
                    .get(&role)
                    .map_or(SimTime::INFINITY, |c| c.next_event_time(kernel, now)),
                Slot::Agent(agent @ Agent::Bot(_)) => self
                    .bot_driver
                    .as_ref()
                    .map_or(SimTime::INFINITY, |d| d.next_event_time(kernel, agent, now)),
                Slot::Agent(agent) => self
                    .station_driver
                    .as_ref()
                    .map_or(SimTime::INFINITY, |d| d.next_event_time(kernel, agent, now)),
                _ => SimTime::INFINITY,
            };
            next = next.min(t);
        }
        next
    }

    pub(crate) fn stat_reset(&mut self) {
        for controller in self.roles.values_mut() {
            controller.stat_reset();
        }
        if let Some(d) = self.bot_driver.as_mut() {
            d.stat_reset();
        }
        if let Some(d) = self.station_driver.as_mut() {
            d.stat_reset();
        }
    }

    pub(crate) fn stat_finish(&mut self, kernel: &Kernel) {
        for controller in self.roles.values_mut() {
            controller.stat_finish(kernel);
        }
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// One entry of the tick order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    ResourceManager,
    Compound,
    Controller(ControllerRole),
    Observer,
    Agent(Agent),
    CrashHandler,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::ResourceManager => f.write_str("resource-manager"),
            Slot::Compound => f.write_str("compound"),
            Slot::Controller(role) => write!(f, "{role}"),
            Slot::Observer => f.write_str("observer"),
            Slot::Agent(Agent::Bot(id)) => write!(f, "{id}"),
            Slot::Agent(Agent::InputStation(id)) => write!(f, "{id}"),
            Slot::Agent(Agent::OutputStation(id)) => write!(f, "{id}"),
            Slot::CrashHandler => f.write_str("crash-handler"),
        }
    }
}

/// Build the tick order from what is present in this run.
pub(crate) fn build_schedule(kernel: &Kernel, controllers: &ControllerSet) -> Vec<Slot> {
    let mut slots = vec![Slot::ResourceManager, Slot::Compound];
    slots.extend(
        ControllerRole::ALL
            .into_iter()
            .filter(|role| controllers.has(*role))
            .map(Slot::Controller),
    );
    slots.push(Slot::Observer);
    if controllers.bot_driver.is_some() {
        slots.extend(kernel.store().bots().ids().map(|id| Slot::Agent(Agent::Bot(id))));
    }
    if controllers.station_driver.is_some() {
        let store = kernel.store();
        slots.extend(
            store
                .input_stations()
                .ids()
                .map(|id| Slot::Agent(Agent::InputStation(id))),
        );
        slots.extend(
            store
                .output_stations()
                .ids()
                .map(|id| Slot::Agent(Agent::OutputStation(id))),
        );
    }
    slots.push(Slot::CrashHandler);
    slots
}
