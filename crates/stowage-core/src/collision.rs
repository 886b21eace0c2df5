//! Per-tier spatial index and collision detection.
//!
//! The compound slot rebuilds a sweep list per tier (bots sorted by x) at
//! the start of every tick for subsystems that query neighbourhoods. The
//! crash-handler slot, last in the tick, checks every bot flagged as a
//! potential collider against its neighbours on a fresh sweep list and,
//! optionally, against the tier bounds.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::Bot;
use crate::id::{BotId, TierId};
use crate::store::EntityStore;

#[derive(Debug, Clone, Default)]
pub struct CollisionDetector {
    flagged: BTreeSet<BotId>,
    sweep: BTreeMap<TierId, Vec<(f64, BotId)>>,
    max_radius: f64,
}

impl CollisionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn flag(&mut self, bot: BotId) {
        self.flagged.insert(bot);
    }

    pub(crate) fn forget(&mut self, bot: BotId) {
        self.flagged.remove(&bot);
        for list in self.sweep.values_mut() {
            list.retain(|&(_, b)| b != bot);
        }
    }

    pub fn flagged(&self) -> impl Iterator<Item = BotId> + '_ {
        self.flagged.iter().copied()
    }

    /// Bots of `tier` ordered by x, as of the last refresh.
    pub fn tier_bots(&self, tier: TierId) -> impl Iterator<Item = BotId> + '_ {
        self.sweep.get(&tier).into_iter().flatten().map(|&(_, b)| b)
    }

    /// Rebuild the sweep lists from current bot positions.
    pub(crate) fn refresh(&mut self, store: &EntityStore) {
        self.sweep.clear();
        self.max_radius = 0.0;
        for bot in store.bots().iter() {
            self.max_radius = self.max_radius.max(bot.radius);
            self.sweep.entry(bot.tier).or_default().push((bot.x, bot.id));
        }
        for list in self.sweep.values_mut() {
            list.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        }
    }

    /// Check and clear the flagged bots. Returns each colliding bot once,
    /// ascending by ID.
    pub(crate) fn detect(&mut self, store: &EntityStore, check_bounds: bool) -> Vec<(BotId, TierId)> {
        let flagged = std::mem::take(&mut self.flagged);
        if flagged.is_empty() {
            return Vec::new();
        }
        // Bots have moved since the compound slot ran.
        self.refresh(store);
        let mut hits = Vec::new();
        for id in flagged {
            let Ok(bot) = store.bots().get(id) else {
                continue;
            };
            if self.overlaps_any(store, bot) || (check_bounds && out_of_bounds(store, bot)) {
                hits.push((id, bot.tier));
            }
        }
        hits
    }

    fn overlaps_any(&self, store: &EntityStore, bot: &Bot) -> bool {
        let Some(list) = self.sweep.get(&bot.tier) else {
            return false;
        };
        let reach = bot.radius + self.max_radius;
        let start = list.partition_point(|&(x, _)| x < bot.x - reach);
        list[start..]
            .iter()
            .take_while(|&&(x, _)| x <= bot.x + reach)
            .filter(|&&(_, other)| other != bot.id)
            .filter_map(|&(_, other)| store.bots().get(other).ok())
            .any(|other| bot.overlaps(other))
    }
}

fn out_of_bounds(store: &EntityStore, bot: &Bot) -> bool {
    store
        .tiers()
        .get(bot.tier)
        .is_ok_and(|tier| !tier.contains_point(bot.x, bot.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::scheduler::ControllerSet;
    use crate::test_utils::*;

    #[test]
    fn flagged_overlap_is_reported_once() {
        let wh = warehouse(SimConfig::default());
        let (tier, a, b) = (wh.tier, wh.bots[0], wh.bots[1]);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        k.move_bot(b, 0.4, 3.0, None).unwrap();

        let mut detector = CollisionDetector::new();
        detector.refresh(k.store());
        assert_eq!(detector.tier_bots(tier).collect::<Vec<_>>(), vec![a, b]);

        detector.flag(a);
        assert_eq!(detector.detect(k.store(), false), vec![(a, tier)]);
        assert_eq!(detector.flagged().count(), 0);
        assert!(detector.detect(k.store(), false).is_empty());
    }

    #[test]
    fn bounds_are_checked_only_on_request() {
        let wh = warehouse(SimConfig::default());
        let (tier, bot) = (wh.tier, wh.bots[1]);
        let mut instance = wh.finalize(ControllerSet::new());
        let k = instance.kernel_mut();
        k.move_bot(bot, 9.0, 9.0, None).unwrap();

        let mut detector = CollisionDetector::new();
        detector.flag(bot);
        assert!(detector.detect(k.store(), false).is_empty());
        detector.flag(bot);
        assert_eq!(detector.detect(k.store(), true), vec![(bot, tier)]);
    }

    #[test]
    fn forgotten_bots_leave_the_sweep() {
        let wh = warehouse(SimConfig::default());
        let (tier, a, b) = (wh.tier, wh.bots[0], wh.bots[1]);
        let instance = wh.finalize(ControllerSet::new());
        let mut detector = CollisionDetector::new();
        detector.refresh(instance.kernel().store());
        detector.flag(a);
        detector.forget(a);
        assert_eq!(detector.flagged().count(), 0);
        assert_eq!(detector.tier_bots(tier).collect::<Vec<_>>(), vec![b]);
    }
}
