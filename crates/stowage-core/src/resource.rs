//! Resource manager: free storage locations and open extract requests.
//!
//! A storage location is free while no pod is stored on it. An extract
//! request stands for one ordered unit that still has to leave a pod; it is
//! created when the order is placed, can be reserved against a pod that
//! holds the item, and disappears when the unit is picked.

use std::collections::{BTreeMap, BTreeSet};

use slotmap::SlotMap;

use crate::entity::Order;
use crate::error::KernelError;
use crate::id::*;

/// Where an extract request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Open,
    Reserved(PodId),
}

/// One ordered unit waiting to be picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    pub order: OrderId,
    pub item: ItemDescriptionId,
    pub station: Option<OutputStationId>,
    pub state: RequestState,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    requests: SlotMap<ExtractRequestId, ExtractRequest>,
    /// Requests per order in creation order; keeps lookups deterministic.
    by_order: BTreeMap<OrderId, Vec<ExtractRequestId>>,
    free_storage: BTreeSet<WaypointId>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Storage locations -------------------------------------------------

    pub(crate) fn seed_storage(&mut self, free: impl IntoIterator<Item = WaypointId>) {
        self.free_storage = free.into_iter().collect();
    }

    pub(crate) fn occupy(&mut self, wp: WaypointId) {
        self.free_storage.remove(&wp);
    }

    pub(crate) fn vacate(&mut self, wp: WaypointId) {
        self.free_storage.insert(wp);
    }

    /// Drop a waypoint from the pool for good.
    pub(crate) fn remove_storage_location(&mut self, wp: WaypointId) -> bool {
        self.free_storage.remove(&wp)
    }

    /// Free storage locations, ascending by ID.
    pub fn free_storage_locations(&self) -> impl Iterator<Item = WaypointId> + '_ {
        self.free_storage.iter().copied()
    }

    pub fn is_free_storage(&self, wp: WaypointId) -> bool {
        self.free_storage.contains(&wp)
    }

    pub fn free_storage_count(&self) -> usize {
        self.free_storage.len()
    }

    // -- Extract requests --------------------------------------------------

    /// One request per ordered unit.
    pub(crate) fn create_requests(&mut self, order: &Order) -> usize {
        let ids = self.by_order.entry(order.id).or_default();
        let mut created = 0;
        for (&item, &quantity) in &order.positions {
            for _ in 0..quantity {
                ids.push(self.requests.insert(ExtractRequest {
                    order: order.id,
                    item,
                    station: order.station,
                    state: RequestState::Open,
                }));
                created += 1;
            }
        }
        created
    }

    pub(crate) fn assign_station(&mut self, order: OrderId, station: Option<OutputStationId>) {
        for key in self.by_order.get(&order).into_iter().flatten() {
            if let Some(req) = self.requests.get_mut(*key) {
                req.station = station;
            }
        }
    }

    fn find(
        &self,
        order: OrderId,
        item: ItemDescriptionId,
        state: RequestState,
    ) -> Option<ExtractRequestId> {
        self.by_order
            .get(&order)?
            .iter()
            .copied()
            .find(|key| {
                self.requests
                    .get(*key)
                    .is_some_and(|r| r.item == item && r.state == state)
            })
    }

    /// Whether a request of `order` for `item` is reserved on `pod`.
    pub fn is_reserved(&self, order: OrderId, item: ItemDescriptionId, pod: PodId) -> bool {
        self.find(order, item, RequestState::Reserved(pod)).is_some()
    }

    /// Reserve an open request of `order` for `item` against `pod`.
    pub(crate) fn reserve(
        &mut self,
        order: OrderId,
        item: ItemDescriptionId,
        pod: PodId,
    ) -> Result<ExtractRequestId, KernelError> {
        let key = self
            .find(order, item, RequestState::Open)
            .ok_or_else(|| KernelError::invalid(order, "no open extract request for item"))?;
        if let Some(req) = self.requests.get_mut(key) {
            req.state = RequestState::Reserved(pod);
        }
        Ok(key)
    }

    /// Turn a request reserved against `pod` back into an open one.
    pub(crate) fn unreserve(
        &mut self,
        order: OrderId,
        item: ItemDescriptionId,
        pod: PodId,
    ) -> Result<ExtractRequestId, KernelError> {
        let key = self
            .find(order, item, RequestState::Reserved(pod))
            .ok_or_else(|| KernelError::invalid(order, "no extract request reserved on pod"))?;
        if let Some(req) = self.requests.get_mut(key) {
            req.state = RequestState::Open;
        }
        Ok(key)
    }

    /// Remove the request served by a pick from `pod`. A request reserved on
    /// that pod is preferred over an open one. Returns whether the served
    /// request was a reservation.
    pub(crate) fn complete(
        &mut self,
        order: OrderId,
        item: ItemDescriptionId,
        pod: PodId,
    ) -> Result<bool, KernelError> {
        let (key, reserved) = match self.find(order, item, RequestState::Reserved(pod)) {
            Some(key) => (key, true),
            None => (
                self.find(order, item, RequestState::Open)
                    .ok_or_else(|| KernelError::invalid(order, "no extract request for item"))?,
                false,
            ),
        };
        self.requests.remove(key);
        if let Some(ids) = self.by_order.get_mut(&order) {
            ids.retain(|&k| k != key);
            if ids.is_empty() {
                self.by_order.remove(&order);
            }
        }
        Ok(reserved)
    }

    /// Reopen every request reserved against `pod`. Returns how many units
    /// per item were reopened.
    pub(crate) fn release_pod(&mut self, pod: PodId) -> BTreeMap<ItemDescriptionId, u32> {
        let mut reopened = BTreeMap::new();
        for ids in self.by_order.values() {
            for key in ids {
                if let Some(req) = self.requests.get_mut(*key)
                    && req.state == RequestState::Reserved(pod)
                {
                    req.state = RequestState::Open;
                    *reopened.entry(req.item).or_insert(0) += 1;
                }
            }
        }
        reopened
    }

    pub(crate) fn drop_order(&mut self, order: OrderId) {
        for key in self.by_order.remove(&order).unwrap_or_default() {
            self.requests.remove(key);
        }
    }

    pub fn request(&self, key: ExtractRequestId) -> Option<&ExtractRequest> {
        self.requests.get(key)
    }

    /// Requests of `order`, in creation order.
    pub fn requests_of(&self, order: OrderId) -> impl Iterator<Item = &ExtractRequest> + '_ {
        self.by_order
            .get(&order)
            .into_iter()
            .flatten()
            .filter_map(|key| self.requests.get(*key))
    }

    /// Every open request, ordered by order ID then creation.
    pub fn open_requests(&self) -> impl Iterator<Item = &ExtractRequest> + '_ {
        self.by_order
            .values()
            .flatten()
            .filter_map(|key| self.requests.get(*key))
            .filter(|r| r.state == RequestState::Open)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn reserved_count(&self, pod: PodId) -> usize {
        self.requests
            .values()
            .filter(|r| r.state == RequestState::Reserved(pod))
            .count()
    }
}
