use crate::shared::constants::chain::SLOTS_PER_EPOCH;
use crate::shared::error::WatcherError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Slot = u64;
pub type Epoch = u64;
pub type ValidatorIndex = u64;
pub type CommitteeIndex = u64;

/// Epoch containing `slot`.
pub fn epoch_of(slot: Slot) -> Epoch {
    slot / SLOTS_PER_EPOCH
}

/// Position of `slot` inside its epoch.
pub fn slot_in_epoch(slot: Slot) -> u64 {
    slot % SLOTS_PER_EPOCH
}

pub fn first_slot_of(epoch: Epoch) -> Slot {
    epoch * SLOTS_PER_EPOCH
}

/// 20-byte execution layer address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct H160(pub [u8; 20]);

/// 32-byte root or hash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct H256(pub [u8; 32]);

/// BLS public key of a validator, kept as lowercase `0x`-prefixed hex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey(String);

impl Pubkey {
    pub const HEX_LEN: usize = 96;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First ten characters, used when listing keys in logs and alerts.
    pub fn short(&self) -> &str {
        &self.0[..10.min(self.0.len())]
    }
}

impl FromStr for Pubkey {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if body.len() != Self::HEX_LEN {
            return Err(WatcherError::InvalidPubkey(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                body.len()
            )));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WatcherError::InvalidPubkey(format!("non-hex character in {}", trimmed)));
        }
        Ok(Pubkey(format!("0x{}", body.to_lowercase())))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for H160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::shared::utils::hex::encode(&self.0))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::shared::utils::hex::encode(&self.0))
    }
}

impl From<[u8; 20]> for H160 {
    fn from(bytes: [u8; 20]) -> Self {
        H160(bytes)
    }
}

impl From<[u8; 32]> for H256 {
    fn from(bytes: [u8; 32]) -> Self {
        H256(bytes)
    }
}

impl FromStr for H160 {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::shared::utils::hex::decode_to_fixed::<20>(s)
            .map(H160)
            .map_err(|e| WatcherError::InvalidAddress(format!("{}: {}", s, e)))
    }
}

impl FromStr for H256 {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::shared::utils::hex::decode_to_fixed::<32>(s)
            .map(H256)
            .map_err(|e| WatcherError::InvalidHash(format!("{}: {}", s, e)))
    }
}
