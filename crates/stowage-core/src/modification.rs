//! Structural edits of a finalized instance before its first tick.
//!
//! Removing a waypoint is a manual teardown: every entity that references
//! it is detached, and entities whose only anchor was the waypoint go with
//! it. Afterwards no live entity refers to a removed one.

use crate::entity::*;
use crate::error::KernelError;
use crate::fixed::Weight;
use crate::id::*;
use crate::instance::{Instance, Kernel};

/// Everything a removal took out or detached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub waypoints: Vec<WaypointId>,
    pub semaphores: Vec<SemaphoreId>,
    pub input_stations: Vec<InputStationId>,
    pub output_stations: Vec<OutputStationId>,
    pub elevators: Vec<ElevatorId>,
    pub pods: Vec<PodId>,
    pub bots: Vec<BotId>,
    /// Bots that stood on a removed waypoint and stay in the instance.
    pub detached_bots: Vec<BotId>,
    /// Bundles registered to a removed pod, back in the backlog.
    pub returned_bundles: Vec<BundleId>,
    /// Bundles stored in a removed pod.
    pub dropped_bundles: Vec<BundleId>,
}

impl RemovalReport {
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty() && self.pods.is_empty() && self.bots.is_empty()
    }
}

impl Instance {
    fn ensure_editable(&self) -> Result<(), KernelError> {
        if self.is_frozen() {
            return Err(KernelError::ScheduleFrozen);
        }
        Ok(())
    }

    /// Remove one waypoint and everything anchored to it.
    pub fn remove_waypoint(&mut self, wp: WaypointId) -> Result<RemovalReport, KernelError> {
        self.ensure_editable()?;
        self.kernel.store.get::<Waypoint>(wp)?;
        let mut report = RemovalReport::default();
        self.kernel.remove_waypoint_cascade(wp, &mut report)?;
        Ok(report)
    }

    /// Remove every waypoint of `tier` inside the rectangle (bounds
    /// inclusive), then every bot and pod positioned inside it.
    pub fn remove_waypoints_in(
        &mut self,
        tier: TierId,
        x_min: f64,
        y_min: f64,
        x_max: f64,
        y_max: f64,
    ) -> Result<RemovalReport, KernelError> {
        self.ensure_editable()?;
        let k = &mut self.kernel;
        k.store.get::<Tier>(tier)?;
        let inside = |t: TierId, x: f64, y: f64| {
            t == tier && (x_min..=x_max).contains(&x) && (y_min..=y_max).contains(&y)
        };

        let mut report = RemovalReport::default();
        let waypoints: Vec<WaypointId> = k
            .store
            .waypoints()
            .iter()
            .filter(|w| inside(w.tier, w.x, w.y))
            .map(|w| w.id)
            .collect();
        for wp in waypoints {
            k.remove_waypoint_cascade(wp, &mut report)?;
        }

        let bots: Vec<BotId> = k
            .store
            .bots()
            .iter()
            .filter(|b| inside(b.tier, b.x, b.y))
            .map(|b| b.id)
            .collect();
        for bot in bots {
            k.remove_bot(bot, &mut report)?;
        }

        let pods: Vec<PodId> = k
            .store
            .pods()
            .iter()
            .filter(|p| inside(p.tier, p.x, p.y))
            .map(|p| p.id)
            .collect();
        for pod in pods {
            k.remove_pod(pod, &mut report)?;
        }

        tracing::info!(
            %tier,
            waypoints = report.waypoints.len(),
            bots = report.bots.len(),
            pods = report.pods.len(),
            "removed rectangle"
        );
        Ok(report)
    }
}

impl Kernel {
    fn remove_waypoint_cascade(
        &mut self,
        wp: WaypointId,
        report: &mut RemovalReport,
    ) -> Result<(), KernelError> {
        let w = self.store.get::<Waypoint>(wp)?;
        let (tier, station, elevator, pod, storage) =
            (w.tier, w.station, w.elevator, *w.pod.get(), w.storage_location);

        let edges = self
            .graph
            .remove_waypoint(wp)
            .map_or(0, |adj| adj.outgoing.len() + adj.incoming.len());

        let guarded: Vec<SemaphoreId> = self
            .store
            .semaphores()
            .iter()
            .filter(|s| s.guards.iter().any(|g| g.touches(wp)))
            .map(|s| s.id)
            .collect();
        for sem in guarded {
            let s = self.store.get_mut::<Semaphore>(sem)?;
            s.guards.retain(|g| !g.touches(wp));
            if s.guards.is_empty() {
                self.store.remove::<Semaphore>(sem)?;
                tracing::debug!(%sem, "removed guardless semaphore");
                report.semaphores.push(sem);
            }
        }

        match station {
            Some(StationRef::Input(s)) if self.store.contains::<InputStation>(s) => {
                self.remove_input_station(s, report)?;
            }
            Some(StationRef::Output(s)) if self.store.contains::<OutputStation>(s) => {
                self.remove_output_station(s, report)?;
            }
            _ => {}
        }

        if let Some(pod) = pod {
            self.remove_pod(pod, report)?;
        }

        if let Some(e) = elevator
            && self.store.contains::<Elevator>(e)
        {
            let connected = self.store.get_mut::<Elevator>(e)?.connected.get_mut();
            connected.remove(&wp);
            if connected.is_empty() {
                self.store.remove::<Elevator>(e)?;
                tracing::debug!(elevator = %e, "removed unconnected elevator");
                report.elevators.push(e);
            }
        }

        if storage {
            self.resources.remove_storage_location(wp);
        }

        for bot in self.store.arena_mut::<Bot>().iter_mut() {
            if bot.waypoint == Some(wp) {
                bot.waypoint = None;
                report.detached_bots.push(bot.id);
            }
        }

        self.roster_mut(tier)?.waypoints.remove(&wp);
        self.store.remove::<Waypoint>(wp)?;
        tracing::debug!(%wp, edges, "removed waypoint");
        report.waypoints.push(wp);
        Ok(())
    }

    fn remove_input_station(
        &mut self,
        station: InputStationId,
        report: &mut RemovalReport,
    ) -> Result<(), KernelError> {
        for bundle in self.store.arena_mut::<ItemBundle>().iter_mut() {
            if bundle.station == Some(station) {
                bundle.station = None;
            }
        }
        let tier = self.store.get::<InputStation>(station)?.tier;
        self.roster_mut(tier)?.input_stations.remove(&station);
        self.store.remove::<InputStation>(station)?;
        tracing::debug!(%station, "removed input station");
        report.input_stations.push(station);
        Ok(())
    }

    fn remove_output_station(
        &mut self,
        station: OutputStationId,
        report: &mut RemovalReport,
    ) -> Result<(), KernelError> {
        let mut orphaned = Vec::new();
        for order in self.store.arena_mut::<Order>().iter_mut() {
            if order.station == Some(station) {
                order.station = None;
                orphaned.push(order.id);
            }
        }
        for order in orphaned {
            self.resources.assign_station(order, None);
        }
        let tier = self.store.get::<OutputStation>(station)?.tier;
        self.roster_mut(tier)?.output_stations.remove(&station);
        self.store.remove::<OutputStation>(station)?;
        tracing::debug!(%station, "removed output station");
        report.output_stations.push(station);
        Ok(())
    }

    /// Registered bundles go back to the backlog, stored ones go with the
    /// pod, and reservations against the pod reopen.
    fn remove_pod(&mut self, pod: PodId, report: &mut RemovalReport) -> Result<(), KernelError> {
        let p = self.store.get::<Pod>(pod)?;
        let (tier, location) = (p.tier, *p.location.get());

        let held: Vec<(BundleId, BundleState, Weight)> = self
            .store
            .bundles()
            .iter()
            .filter(|b| {
                matches!(
                    b.state,
                    BundleState::Registered(owner) | BundleState::Stored(owner) if owner == pod
                )
            })
            .map(|b| (b.id, b.state, b.weight))
            .collect();
        for (bundle, state, weight) in held {
            if let BundleState::Registered(_) = state {
                self.store.get_mut::<ItemBundle>(bundle)?.state = BundleState::Backlog;
                self.store.get_mut::<Pod>(pod)?.capacity_reserved -= weight;
                self.capacity.registration_dropped(weight);
                report.returned_bundles.push(bundle);
            } else {
                self.store.remove::<ItemBundle>(bundle)?;
                report.dropped_bundles.push(bundle);
            }
        }
        let reopened: u32 = self.resources.release_pod(pod).values().sum();

        match location {
            PodLocation::Stored(wp) => {
                if let Ok(w) = self.store.get_mut::<Waypoint>(wp) {
                    *w.pod.get_mut() = None;
                    if w.storage_location {
                        self.resources.vacate(wp);
                    }
                }
            }
            PodLocation::Carried(bot) => {
                if let Ok(b) = self.store.get_mut::<Bot>(bot) {
                    b.pod = None;
                }
            }
            PodLocation::Unplaced => {}
        }

        self.roster_mut(tier)?.pods.remove(&pod);
        let removed = self.store.remove::<Pod>(pod)?;
        self.capacity.pod_removed(&removed);
        tracing::debug!(%pod, reopened, "removed pod");
        report.pods.push(pod);
        Ok(())
    }

    /// A carried pod is set down where the bot was, unplaced.
    fn remove_bot(&mut self, bot: BotId, report: &mut RemovalReport) -> Result<(), KernelError> {
        let b = self.store.get::<Bot>(bot)?;
        let (tier, carried, x, y) = (b.tier, b.pod, b.x, b.y);
        if let Some(pod) = carried {
            let p = self.store.get_mut::<Pod>(pod)?;
            *p.location.get_mut() = PodLocation::Unplaced;
            p.x = x;
            p.y = y;
        }
        for p in self.store.arena_mut::<Pod>().iter_mut() {
            if p.claimed_by == Some(bot) {
                p.claimed_by = None;
            }
        }
        self.collisions.forget(bot);
        self.roster_mut(tier)?.bots.remove(&bot);
        self.store.remove::<Bot>(bot)?;
        tracing::debug!(%bot, "removed bot");
        report.bots.push(bot);
        Ok(())
    }
}
