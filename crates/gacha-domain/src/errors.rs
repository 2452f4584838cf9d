use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("duplicate character {character_id} in emission table for gacha {gacha_id}")]
    DuplicateCharacter {
        gacha_id: String,
        character_id: String,
    },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
