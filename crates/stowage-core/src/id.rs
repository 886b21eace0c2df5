use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies an open extract request in the resource manager.
    pub struct ExtractRequestId;
}

/// The eleven entity types the kernel owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Bot,
    Pod,
    Waypoint,
    InputStation,
    OutputStation,
    Elevator,
    Tier,
    Semaphore,
    ItemDescription,
    ItemBundle,
    Order,
}

/// Number of entity kinds.
pub const ENTITY_KIND_COUNT: usize = 11;

impl EntityKind {
    pub const ALL: [EntityKind; ENTITY_KIND_COUNT] = [
        EntityKind::Bot,
        EntityKind::Pod,
        EntityKind::Waypoint,
        EntityKind::InputStation,
        EntityKind::OutputStation,
        EntityKind::Elevator,
        EntityKind::Tier,
        EntityKind::Semaphore,
        EntityKind::ItemDescription,
        EntityKind::ItemBundle,
        EntityKind::Order,
    ];

    /// Convert to usize index for array lookups.
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Bot => "bot",
            EntityKind::Pod => "pod",
            EntityKind::Waypoint => "waypoint",
            EntityKind::InputStation => "input station",
            EntityKind::OutputStation => "output station",
            EntityKind::Elevator => "elevator",
            EntityKind::Tier => "tier",
            EntityKind::Semaphore => "semaphore",
            EntityKind::ItemDescription => "item description",
            EntityKind::ItemBundle => "item bundle",
            EntityKind::Order => "order",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stable, externally meaningful identifier of one entity type.
pub trait StableId: Copy + Ord + fmt::Debug + fmt::Display {
    const KIND: EntityKind;

    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

macro_rules! stable_ids {
    ($($(#[$doc:meta])* $name:ident => $kind:ident, $prefix:literal;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            pub struct $name(pub u32);

            impl StableId for $name {
                const KIND: EntityKind = EntityKind::$kind;

                fn from_raw(raw: u32) -> Self {
                    Self(raw)
                }

                fn raw(self) -> u32 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }
        )*
    };
}

stable_ids! {
    /// Identifies a robot.
    BotId => Bot, "Bot";
    /// Identifies a movable storage pod.
    PodId => Pod, "Pod";
    /// Identifies a node of the navigation graph.
    WaypointId => Waypoint, "WP";
    /// Identifies a replenishment (input) station.
    InputStationId => InputStation, "IS";
    /// Identifies a picking (output) station.
    OutputStationId => OutputStation, "OS";
    /// Identifies an elevator connecting tiers.
    ElevatorId => Elevator, "E";
    /// Identifies a floor of the warehouse.
    TierId => Tier, "T";
    /// Identifies a queue semaphore.
    SemaphoreId => Semaphore, "S";
    /// Identifies an item description (SKU).
    ItemDescriptionId => ItemDescription, "I";
    /// Identifies an incoming item bundle.
    BundleId => ItemBundle, "B";
    /// Identifies a customer order.
    OrderId => Order, "O";
}

/// Dense, recyclable slot number of a live entity within its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolatileIndex(pub u32);

impl VolatileIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(BotId(3).to_string(), "Bot3");
        assert_eq!(WaypointId(12).to_string(), "WP12");
        assert_eq!(OutputStationId(0).to_string(), "OS0");
    }

    #[test]
    fn ids_carry_their_kind() {
        assert_eq!(BotId::KIND, EntityKind::Bot);
        assert_eq!(OrderId::KIND, EntityKind::Order);
        assert_eq!(PodId::from_raw(7).raw(), 7);
    }

    #[test]
    fn kind_indices_are_dense() {
        for (i, kind) in EntityKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn ids_order_numerically() {
        let mut ids = vec![PodId(10), PodId(2), PodId(7)];
        ids.sort();
        assert_eq!(ids, vec![PodId(2), PodId(7), PodId(10)]);
    }
}
