pub mod drawer;
pub mod resolver;

pub use drawer::{
    DrawRng, Drawer, FixedDrawRng, SeededDrawRng, ThreadDrawRng, draw, partition, select,
};
pub use resolver::{ConfiguredRewardResolver, RewardRule};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrawError {
    #[error("gacha {gacha_id} has zero total weight")]
    EmptyDistribution { gacha_id: String },
    #[error("no reward configured for character {character_id}")]
    UnknownCharacter { character_id: String },
    #[error("roll {roll} outside [0, {total})")]
    RollOutOfRange { roll: u64, total: u64 },
    #[error("reward for {0} must be greater than zero")]
    ZeroReward(String),
}
