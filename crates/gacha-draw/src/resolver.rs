use std::collections::HashMap;

use gacha_domain::{CharacterId, EmissionTable, RewardAmount};

use crate::DrawError;

/// Business rule mapping a drawn character to the token amount owed.
pub trait RewardRule: Send + Sync {
    fn amount_for(&self, character_id: &CharacterId) -> Result<RewardAmount, DrawError>;
}

/// Per-character amounts with an optional fallback. With only a fallback this
/// is the flat "same reward for every draw" rule.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredRewardResolver {
    per_character: HashMap<CharacterId, RewardAmount>,
    default_amount: Option<RewardAmount>,
}

impl ConfiguredRewardResolver {
    pub fn new(
        default_amount: Option<RewardAmount>,
        per_character: HashMap<CharacterId, RewardAmount>,
    ) -> Result<Self, DrawError> {
        if default_amount.is_some_and(RewardAmount::is_zero) {
            return Err(DrawError::ZeroReward("default".to_string()));
        }
        if let Some((character_id, _)) = per_character.iter().find(|(_, a)| a.is_zero()) {
            return Err(DrawError::ZeroReward(character_id.0.clone()));
        }
        Ok(Self {
            per_character,
            default_amount,
        })
    }

    pub fn flat(amount: RewardAmount) -> Result<Self, DrawError> {
        Self::new(Some(amount), HashMap::new())
    }

    /// Every character that can be drawn from `table` must resolve to a
    /// reward; run when a table is loaded, not per draw.
    pub fn ensure_covers(&self, table: &EmissionTable) -> Result<(), DrawError> {
        for entry in table.entries().iter().filter(|e| e.weight > 0) {
            self.amount_for(&entry.character_id)?;
        }
        Ok(())
    }
}

impl RewardRule for ConfiguredRewardResolver {
    fn amount_for(&self, character_id: &CharacterId) -> Result<RewardAmount, DrawError> {
        self.per_character
            .get(character_id)
            .copied()
            .or(self.default_amount)
            .ok_or_else(|| DrawError::UnknownCharacter {
                character_id: character_id.0.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use gacha_domain::{EmissionEntry, GachaId};

    use super::*;

    fn ten_tokens() -> RewardAmount {
        RewardAmount::from_whole_tokens("10", 18).expect("amount")
    }

    #[test]
    fn flat_rule_pays_same_amount_for_any_character() {
        let resolver = ConfiguredRewardResolver::flat(ten_tokens()).expect("resolver");
        assert_eq!(
            resolver.amount_for(&CharacterId::from("A")).expect("A"),
            ten_tokens()
        );
        assert_eq!(
            resolver.amount_for(&CharacterId::from("anything")).expect("any"),
            ten_tokens()
        );
    }

    #[test]
    fn per_character_amount_overrides_default() {
        let mut per_character = HashMap::new();
        per_character.insert(CharacterId::from("SSR"), RewardAmount::from_u128(500));
        let resolver =
            ConfiguredRewardResolver::new(Some(RewardAmount::from_u128(5)), per_character)
                .expect("resolver");
        assert_eq!(
            resolver.amount_for(&CharacterId::from("SSR")).expect("ssr"),
            RewardAmount::from_u128(500)
        );
        assert_eq!(
            resolver.amount_for(&CharacterId::from("N")).expect("n"),
            RewardAmount::from_u128(5)
        );
    }

    #[test]
    fn unknown_character_without_default_fails_loudly() {
        let mut per_character = HashMap::new();
        per_character.insert(CharacterId::from("A"), RewardAmount::from_u128(1));
        let resolver = ConfiguredRewardResolver::new(None, per_character).expect("resolver");
        assert_eq!(
            resolver.amount_for(&CharacterId::from("B")),
            Err(DrawError::UnknownCharacter {
                character_id: "B".to_string()
            })
        );
    }

    #[test]
    fn zero_rewards_are_rejected_at_construction() {
        assert!(matches!(
            ConfiguredRewardResolver::flat(RewardAmount::ZERO),
            Err(DrawError::ZeroReward(_))
        ));
        let mut per_character = HashMap::new();
        per_character.insert(CharacterId::from("A"), RewardAmount::ZERO);
        assert!(matches!(
            ConfiguredRewardResolver::new(None, per_character),
            Err(DrawError::ZeroReward(id)) if id == "A"
        ));
    }

    #[test]
    fn coverage_check_ignores_zero_weight_entries() {
        let mut per_character = HashMap::new();
        per_character.insert(CharacterId::from("A"), RewardAmount::from_u128(1));
        let resolver = ConfiguredRewardResolver::new(None, per_character).expect("resolver");
        let covered = EmissionTable::new(
            GachaId::from("g"),
            vec![EmissionEntry::new("A", 4), EmissionEntry::new("retired", 0)],
        )
        .expect("table");
        resolver.ensure_covers(&covered).expect("covered");

        let uncovered = EmissionTable::new(
            GachaId::from("g"),
            vec![EmissionEntry::new("A", 4), EmissionEntry::new("B", 1)],
        )
        .expect("table");
        assert!(matches!(
            resolver.ensure_covers(&uncovered),
            Err(DrawError::UnknownCharacter { .. })
        ));
    }
}
