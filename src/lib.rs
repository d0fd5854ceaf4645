pub mod shared;
pub mod chain;
pub mod registry;
pub mod duties;
pub mod detection;
pub mod network;
pub mod events;
pub mod messaging;
pub mod infrastructure;

// Re-export commonly used types
pub use shared::types::{Epoch, Pubkey, Slot, ValidatorIndex, H160, H256};
pub use events::{Emission, OutcomeEvent, OutcomeKind};
pub use infrastructure::app::Watcher;

// Re-export result type
pub type Result<T> = anyhow::Result<T>;
