use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use gacha_domain::{CharacterId, EmissionTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::DrawError;

/// Uniform source of draw rolls. Implementations must return a value in
/// `[0, bound)`; callers never pass `bound == 0`.
pub trait DrawRng: Send + Sync {
    fn roll_below(&self, bound: u64) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDrawRng;

impl DrawRng for ThreadDrawRng {
    fn roll_below(&self, bound: u64) -> u64 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Reproducible source for tests and replays.
#[derive(Debug)]
pub struct SeededDrawRng {
    rng: Mutex<StdRng>,
}

impl SeededDrawRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl DrawRng for SeededDrawRng {
    fn roll_below(&self, bound: u64) -> u64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..bound)
    }
}

/// Always rolls the same value (reduced modulo the bound).
#[derive(Debug, Clone, Copy)]
pub struct FixedDrawRng(pub u64);

impl DrawRng for FixedDrawRng {
    fn roll_below(&self, bound: u64) -> u64 {
        self.0 % bound
    }
}

/// Maps `roll` onto the table: the first entry whose cumulative weight
/// exceeds `roll` wins. Zero-weight entries own an empty interval and are
/// never selected.
pub fn select(table: &EmissionTable, roll: u64) -> Result<&CharacterId, DrawError> {
    let total = table.total_weight();
    if total == 0 {
        return Err(DrawError::EmptyDistribution {
            gacha_id: table.gacha_id().0.clone(),
        });
    }
    if roll >= total {
        return Err(DrawError::RollOutOfRange { roll, total });
    }
    let mut cumulative = 0_u64;
    for entry in table.entries() {
        cumulative += u64::from(entry.weight);
        if cumulative > roll {
            return Ok(&entry.character_id);
        }
    }
    // cumulative == total > roll after the last entry.
    Err(DrawError::RollOutOfRange { roll, total })
}

pub fn draw<'a>(table: &'a EmissionTable, rng: &dyn DrawRng) -> Result<&'a CharacterId, DrawError> {
    let total = table.total_weight();
    if total == 0 {
        return Err(DrawError::EmptyDistribution {
            gacha_id: table.gacha_id().0.clone(),
        });
    }
    let roll = rng.roll_below(total);
    let selected = select(table, roll)?;
    debug!(
        gacha_id = %table.gacha_id(),
        roll,
        total,
        character_id = %selected,
        "gacha draw resolved"
    );
    Ok(selected)
}

/// Half-open roll interval owned by each entry, in table order.
#[must_use]
pub fn partition(table: &EmissionTable) -> Vec<(CharacterId, Range<u64>)> {
    let mut start = 0_u64;
    table
        .entries()
        .iter()
        .map(|entry| {
            let end = start + u64::from(entry.weight);
            let interval = (entry.character_id.clone(), start..end);
            start = end;
            interval
        })
        .collect()
}

#[derive(Clone)]
pub struct Drawer {
    rng: Arc<dyn DrawRng>,
}

impl Drawer {
    #[must_use]
    pub fn new(rng: Arc<dyn DrawRng>) -> Self {
        Self { rng }
    }

    #[must_use]
    pub fn thread_local() -> Self {
        Self::new(Arc::new(ThreadDrawRng))
    }

    pub fn draw<'a>(&self, table: &'a EmissionTable) -> Result<&'a CharacterId, DrawError> {
        draw(table, self.rng.as_ref())
    }
}

impl std::fmt::Debug for Drawer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drawer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use gacha_domain::{EmissionEntry, GachaId};

    use super::*;

    fn table(entries: &[(&str, u32)]) -> EmissionTable {
        EmissionTable::new(
            GachaId::from("gacha-test"),
            entries
                .iter()
                .map(|(id, w)| EmissionEntry::new(*id, *w))
                .collect(),
        )
        .expect("table")
    }

    #[test]
    fn two_entry_table_maps_rolls_in_table_order() {
        let t = table(&[("A", 1), ("B", 3)]);
        assert_eq!(select(&t, 0).expect("r0").as_str(), "A");
        for roll in 1..4 {
            assert_eq!(select(&t, roll).expect("roll").as_str(), "B");
        }
        assert_eq!(
            select(&t, 4),
            Err(DrawError::RollOutOfRange { roll: 4, total: 4 })
        );
    }

    #[test]
    fn every_roll_maps_to_exactly_one_entry() {
        let t = table(&[("A", 2), ("Z", 0), ("B", 5), ("C", 1), ("D", 0), ("E", 7)]);
        let total = t.total_weight();
        let intervals = partition(&t);

        let covered: u64 = intervals.iter().map(|(_, r)| r.end - r.start).sum();
        assert_eq!(covered, total);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].1.end, pair[1].1.start);
        }

        for roll in 0..total {
            let owners: Vec<&CharacterId> = intervals
                .iter()
                .filter(|(_, r)| r.contains(&roll))
                .map(|(id, _)| id)
                .collect();
            assert_eq!(owners.len(), 1, "roll {roll}");
            assert_eq!(select(&t, roll).expect("select"), owners[0]);
        }
    }

    #[test]
    fn zero_weight_entries_are_never_selected() {
        let t = table(&[("ghost", 0), ("A", 1), ("ghost2", 0)]);
        for roll in 0..t.total_weight() {
            assert_eq!(select(&t, roll).expect("select").as_str(), "A");
        }
    }

    #[test]
    fn zero_total_weight_always_fails() {
        let zero = table(&[("A", 0), ("B", 0)]);
        let empty = table(&[]);
        for t in [&zero, &empty] {
            assert!(matches!(
                draw(t, &FixedDrawRng(0)),
                Err(DrawError::EmptyDistribution { .. })
            ));
            assert!(matches!(
                select(t, 0),
                Err(DrawError::EmptyDistribution { .. })
            ));
        }
    }

    #[test]
    fn seeded_source_is_reproducible() {
        let t = table(&[("A", 1), ("B", 3), ("C", 6)]);
        let first: Vec<String> = {
            let rng = SeededDrawRng::new(7);
            (0..32)
                .map(|_| draw(&t, &rng).expect("draw").0.clone())
                .collect()
        };
        let second: Vec<String> = {
            let rng = SeededDrawRng::new(7);
            (0..32)
                .map(|_| draw(&t, &rng).expect("draw").0.clone())
                .collect()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn seeded_draws_follow_weights_roughly() {
        let t = table(&[("A", 1), ("B", 3)]);
        let drawer = Drawer::new(Arc::new(SeededDrawRng::new(2024)));
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..4_000 {
            *counts
                .entry(drawer.draw(&t).expect("draw").0.clone())
                .or_default() += 1;
        }
        let a = counts.get("A").copied().unwrap_or(0);
        let b = counts.get("B").copied().unwrap_or(0);
        assert_eq!(a + b, 4_000);
        // Expected 1000 / 3000.
        assert!((800..1_200).contains(&a), "A drawn {a} times");
    }

    #[test]
    fn fixed_source_wraps_into_bound() {
        assert_eq!(FixedDrawRng(6).roll_below(4), 2);
        assert_eq!(ThreadDrawRng.roll_below(1), 0);
    }
}
