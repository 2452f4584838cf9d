use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::ids::{CharacterId, GachaId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionEntry {
    pub character_id: CharacterId,
    pub weight: u32,
}

impl EmissionEntry {
    #[must_use]
    pub fn new(character_id: impl Into<CharacterId>, weight: u32) -> Self {
        Self {
            character_id: character_id.into(),
            weight,
        }
    }
}

/// Ordered weighted distribution of characters for one gacha. Entry order is
/// preserved exactly as supplied and doubles as the draw tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmissionTable {
    gacha_id: GachaId,
    entries: Vec<EmissionEntry>,
}

impl EmissionTable {
    pub fn new(gacha_id: GachaId, entries: Vec<EmissionEntry>) -> Result<Self, DomainError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(&entry.character_id) {
                return Err(DomainError::DuplicateCharacter {
                    gacha_id: gacha_id.0.clone(),
                    character_id: entry.character_id.0.clone(),
                });
            }
        }
        Ok(Self { gacha_id, entries })
    }

    #[must_use]
    pub fn gacha_id(&self) -> &GachaId {
        &self.gacha_id
    }

    #[must_use]
    pub fn entries(&self) -> &[EmissionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.weight)).sum()
    }

    #[must_use]
    pub fn is_drawable(&self) -> bool {
        self.total_weight() > 0
    }

    pub fn character_ids(&self) -> impl Iterator<Item = &CharacterId> {
        self.entries.iter().map(|e| &e.character_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_keeps_entry_order_and_sums_weights() {
        let table = EmissionTable::new(
            GachaId::from("g1"),
            vec![
                EmissionEntry::new("B", 3),
                EmissionEntry::new("A", 1),
                EmissionEntry::new("C", 0),
            ],
        )
        .expect("table");
        let order: Vec<&str> = table.character_ids().map(CharacterId::as_str).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert_eq!(table.total_weight(), 4);
        assert!(table.is_drawable());
    }

    #[test]
    fn zero_weight_table_is_not_drawable() {
        let table = EmissionTable::new(GachaId::from("g0"), vec![EmissionEntry::new("A", 0)])
            .expect("table");
        assert!(!table.is_drawable());
        let empty = EmissionTable::new(GachaId::from("g0"), Vec::new()).expect("empty");
        assert_eq!(empty.total_weight(), 0);
    }

    #[test]
    fn duplicate_character_is_rejected() {
        let err = EmissionTable::new(
            GachaId::from("g1"),
            vec![EmissionEntry::new("A", 1), EmissionEntry::new("A", 2)],
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate character A"));
    }

    #[test]
    fn total_weight_does_not_overflow_u32() {
        let table = EmissionTable::new(
            GachaId::from("big"),
            vec![
                EmissionEntry::new("A", u32::MAX),
                EmissionEntry::new("B", u32::MAX),
            ],
        )
        .expect("table");
        assert_eq!(table.total_weight(), 2 * u64::from(u32::MAX));
    }
}
