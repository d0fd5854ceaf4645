// Validator registry - watched keys and their chain identities

pub mod key_source;
pub mod watched;

pub use key_source::{FileKeySource, KeySource, Web3SignerKeySource};
pub use watched::{Validator, ValidatorRegistry, WatchedSet};
