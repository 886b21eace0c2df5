//! Entity store: one arena per entity type plus the identity registry.
//!
//! An [`Arena`] keeps entities in a slot vector indexed by volatile index,
//! a map from stable ID to slot, and the creation order of live IDs so
//! iteration is deterministic.

use std::collections::BTreeMap;

use crate::entity::*;
use crate::error::KernelError;
use crate::id::*;
use crate::identity::IdentityRegistry;

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Arena<E: Entity> {
    slots: Vec<Option<E>>,
    by_id: BTreeMap<E::Id, VolatileIndex>,
    order: Vec<E::Id>,
}

impl<E: Entity> Default for Arena<E> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            by_id: BTreeMap::new(),
            order: Vec::new(),
        }
    }
}

impl<E: Entity> Arena<E> {
    pub fn get(&self, id: E::Id) -> Result<&E, KernelError> {
        self.by_id
            .get(&id)
            .and_then(|idx| self.slots.get(idx.as_usize()))
            .and_then(Option::as_ref)
            .ok_or_else(|| KernelError::not_found(id))
    }

    pub(crate) fn get_mut(&mut self, id: E::Id) -> Result<&mut E, KernelError> {
        let idx = *self.by_id.get(&id).ok_or_else(|| KernelError::not_found(id))?;
        self.slots
            .get_mut(idx.as_usize())
            .and_then(Option::as_mut)
            .ok_or_else(|| KernelError::not_found(id))
    }

    /// O(1) lookup by volatile index.
    pub fn by_index(&self, index: VolatileIndex) -> Option<&E> {
        self.slots.get(index.as_usize()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: E::Id) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Live IDs in creation order.
    pub fn ids(&self) -> impl Iterator<Item = E::Id> + '_ {
        self.order.iter().copied()
    }

    /// Live entities in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.order.iter().filter_map(move |id| self.get(*id).ok())
    }

    /// Live entities in slot order.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut E> + '_ {
        self.slots.iter_mut().flatten()
    }

    /// Volatile indices currently held, ascending.
    pub fn held_indices(&self) -> Vec<VolatileIndex> {
        let mut held: Vec<_> = self.by_id.values().copied().collect();
        held.sort();
        held
    }

    fn insert(&mut self, entity: E) {
        let idx = entity.volatile_index().as_usize();
        if self.slots.len() <= idx {
            self.slots.resize_with(idx + 1, || None);
        }
        self.by_id.insert(entity.id(), entity.volatile_index());
        self.order.push(entity.id());
        self.slots[idx] = Some(entity);
    }

    fn remove(&mut self, id: E::Id) -> Option<E> {
        let idx = self.by_id.remove(&id)?;
        self.order.retain(|&other| other != id);
        let entity = self.slots.get_mut(idx.as_usize()).and_then(Option::take);
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        entity
    }
}

// ---------------------------------------------------------------------------
// Stored trait
// ---------------------------------------------------------------------------

/// Maps an entity type to its arena inside the store.
pub trait Stored: Entity + Sized {
    fn arena(store: &EntityStore) -> &Arena<Self>;
    fn arena_mut(store: &mut EntityStore) -> &mut Arena<Self>;
}

macro_rules! stored {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl Stored for $ty {
                fn arena(store: &EntityStore) -> &Arena<Self> {
                    &store.$field
                }

                fn arena_mut(store: &mut EntityStore) -> &mut Arena<Self> {
                    &mut store.$field
                }
            }
        )*
    };
}

stored! {
    Bot => bots,
    Pod => pods,
    Waypoint => waypoints,
    InputStation => input_stations,
    OutputStation => output_stations,
    Elevator => elevators,
    Tier => tiers,
    Semaphore => semaphores,
    ItemDescription => item_descriptions,
    ItemBundle => bundles,
    Order => orders,
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// A borrowed entity of any type, as returned by [`EntityStore::get_by_id`].
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Bot(&'a Bot),
    Pod(&'a Pod),
    Waypoint(&'a Waypoint),
    InputStation(&'a InputStation),
    OutputStation(&'a OutputStation),
    Elevator(&'a Elevator),
    Tier(&'a Tier),
    Semaphore(&'a Semaphore),
    ItemDescription(&'a ItemDescription),
    ItemBundle(&'a ItemBundle),
    Order(&'a Order),
}

impl EntityRef<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Bot(_) => EntityKind::Bot,
            EntityRef::Pod(_) => EntityKind::Pod,
            EntityRef::Waypoint(_) => EntityKind::Waypoint,
            EntityRef::InputStation(_) => EntityKind::InputStation,
            EntityRef::OutputStation(_) => EntityKind::OutputStation,
            EntityRef::Elevator(_) => EntityKind::Elevator,
            EntityRef::Tier(_) => EntityKind::Tier,
            EntityRef::Semaphore(_) => EntityKind::Semaphore,
            EntityRef::ItemDescription(_) => EntityKind::ItemDescription,
            EntityRef::ItemBundle(_) => EntityKind::ItemBundle,
            EntityRef::Order(_) => EntityKind::Order,
        }
    }
}

/// Owns every entity of an instance.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    identities: IdentityRegistry,
    bots: Arena<Bot>,
    pods: Arena<Pod>,
    waypoints: Arena<Waypoint>,
    input_stations: Arena<InputStation>,
    output_stations: Arena<OutputStation>,
    elevators: Arena<Elevator>,
    tiers: Arena<Tier>,
    semaphores: Arena<Semaphore>,
    item_descriptions: Arena<ItemDescription>,
    bundles: Arena<ItemBundle>,
    orders: Arena<Order>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<E: Stored>(&self, id: E::Id) -> Result<&E, KernelError> {
        E::arena(self).get(id)
    }

    pub(crate) fn get_mut<E: Stored>(&mut self, id: E::Id) -> Result<&mut E, KernelError> {
        E::arena_mut(self).get_mut(id)
    }

    pub fn arena<E: Stored>(&self) -> &Arena<E> {
        E::arena(self)
    }

    pub(crate) fn arena_mut<E: Stored>(&mut self) -> &mut Arena<E> {
        E::arena_mut(self)
    }

    pub fn contains<E: Stored>(&self, id: E::Id) -> bool {
        E::arena(self).contains(id)
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Issue a fresh stable ID for `kind` without creating an entity.
    pub fn register_next_id(&mut self, kind: EntityKind) -> Result<u32, KernelError> {
        self.identities.register_next_id(kind)
    }

    /// Look up any entity by kind and raw stable ID.
    pub fn get_by_id(&self, kind: EntityKind, id: u32) -> Result<EntityRef<'_>, KernelError> {
        Ok(match kind {
            EntityKind::Bot => EntityRef::Bot(self.bots.get(BotId(id))?),
            EntityKind::Pod => EntityRef::Pod(self.pods.get(PodId(id))?),
            EntityKind::Waypoint => EntityRef::Waypoint(self.waypoints.get(WaypointId(id))?),
            EntityKind::InputStation => {
                EntityRef::InputStation(self.input_stations.get(InputStationId(id))?)
            }
            EntityKind::OutputStation => {
                EntityRef::OutputStation(self.output_stations.get(OutputStationId(id))?)
            }
            EntityKind::Elevator => EntityRef::Elevator(self.elevators.get(ElevatorId(id))?),
            EntityKind::Tier => EntityRef::Tier(self.tiers.get(TierId(id))?),
            EntityKind::Semaphore => EntityRef::Semaphore(self.semaphores.get(SemaphoreId(id))?),
            EntityKind::ItemDescription => {
                EntityRef::ItemDescription(self.item_descriptions.get(ItemDescriptionId(id))?)
            }
            EntityKind::ItemBundle => EntityRef::ItemBundle(self.bundles.get(BundleId(id))?),
            EntityKind::Order => EntityRef::Order(self.orders.get(OrderId(id))?),
        })
    }

    /// Admit a new entity: claim its stable ID (or issue one), allocate its
    /// volatile index, build it and insert it.
    pub(crate) fn create<E: Stored>(
        &mut self,
        requested: Option<E::Id>,
        build: impl FnOnce(E::Id, VolatileIndex) -> E,
    ) -> Result<E::Id, KernelError> {
        let kind = <E::Id as StableId>::KIND;
        let (raw, index) = self.identities.admit(kind, requested.map(StableId::raw))?;
        let id = E::Id::from_raw(raw);
        E::arena_mut(self).insert(build(id, index));
        Ok(id)
    }

    /// Remove an entity and return its stable ID and volatile index to the
    /// registry.
    pub(crate) fn remove<E: Stored>(&mut self, id: E::Id) -> Result<E, KernelError> {
        let entity = E::arena_mut(self)
            .remove(id)
            .ok_or_else(|| KernelError::not_found(id))?;
        self.identities
            .retire(<E::Id as StableId>::KIND, id.raw(), entity.volatile_index());
        Ok(entity)
    }

    pub fn bots(&self) -> &Arena<Bot> {
        &self.bots
    }

    pub fn pods(&self) -> &Arena<Pod> {
        &self.pods
    }

    pub fn waypoints(&self) -> &Arena<Waypoint> {
        &self.waypoints
    }

    pub fn input_stations(&self) -> &Arena<InputStation> {
        &self.input_stations
    }

    pub fn output_stations(&self) -> &Arena<OutputStation> {
        &self.output_stations
    }

    pub fn elevators(&self) -> &Arena<Elevator> {
        &self.elevators
    }

    pub fn tiers(&self) -> &Arena<Tier> {
        &self.tiers
    }

    pub fn semaphores(&self) -> &Arena<Semaphore> {
        &self.semaphores
    }

    pub fn item_descriptions(&self) -> &Arena<ItemDescription> {
        &self.item_descriptions
    }

    pub fn bundles(&self) -> &Arena<ItemBundle> {
        &self.bundles
    }

    pub fn orders(&self) -> &Arena<Order> {
        &self.orders
    }
}
