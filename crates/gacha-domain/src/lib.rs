pub mod address;
pub mod amount;
pub mod emission;
pub mod errors;
pub mod ids;

pub use address::{Address, format_address, parse_address};
pub use amount::{AmountError, RewardAmount};
pub use emission::{EmissionEntry, EmissionTable};
pub use errors::DomainError;
pub use ethabi::ethereum_types::{H256, U256};
pub use ids::{CharacterId, GachaId, TraceId};
