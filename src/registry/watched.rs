use crate::chain::domain::{ChainClient, ChainValidator, Lifecycle, ValidatorStatus};
use crate::registry::key_source::KeySource;
use crate::shared::types::{Epoch, Pubkey, ValidatorIndex};
use crate::Result;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A watched validator resolved to its chain index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub pubkey: Pubkey,
    pub index: ValidatorIndex,
    pub status: ValidatorStatus,
    pub slashed: bool,
}

impl Validator {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::of(self.status, self.slashed)
    }
}

impl From<ChainValidator> for Validator {
    fn from(v: ChainValidator) -> Self {
        Self {
            pubkey: v.pubkey,
            index: v.index,
            status: v.status,
            slashed: v.slashed,
        }
    }
}

/// Immutable snapshot of the watched validators, resolved at the start of an epoch.
#[derive(Debug, Clone, Default)]
pub struct WatchedSet {
    epoch: Option<Epoch>,
    by_index: BTreeMap<ValidatorIndex, Validator>,
    /// Keys the beacon node does not know yet; retried on the next refresh.
    unresolved: BTreeSet<Pubkey>,
}

impl WatchedSet {
    pub fn new(
        epoch: Epoch,
        validators: impl IntoIterator<Item = Validator>,
        unresolved: impl IntoIterator<Item = Pubkey>,
    ) -> Self {
        Self {
            epoch: Some(epoch),
            by_index: validators.into_iter().map(|v| (v.index, v)).collect(),
            unresolved: unresolved.into_iter().collect(),
        }
    }

    /// Epoch whose start this set was resolved at.
    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    pub fn lookup(&self, index: ValidatorIndex) -> Option<&Validator> {
        self.by_index.get(&index)
    }

    pub fn contains(&self, index: ValidatorIndex) -> bool {
        self.by_index.contains_key(&index)
    }

    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.by_index.values()
    }

    pub fn indexes(&self) -> impl Iterator<Item = ValidatorIndex> + '_ {
        self.by_index.keys().copied()
    }

    pub fn resolved_pubkeys(&self) -> Vec<Pubkey> {
        self.by_index.values().map(|v| v.pubkey.clone()).collect()
    }

    pub fn unresolved(&self) -> &BTreeSet<Pubkey> {
        &self.unresolved
    }

    /// Every configured key, resolved or not.
    pub fn keys_count(&self) -> usize {
        self.by_index.len() + self.unresolved.len()
    }

    pub fn count(&self, lifecycle: Lifecycle) -> usize {
        let resolved = self.by_index.values().filter(|v| v.lifecycle() == lifecycle).count();
        if lifecycle == Lifecycle::Pending {
            resolved + self.unresolved.len()
        } else {
            resolved
        }
    }

    pub fn queued_count(&self) -> usize {
        self.by_index.values().filter(|v| v.status.is_queued()).count()
    }
}

/// Owns the watched key set. Refreshes build a complete new snapshot and
/// replace the published one in a single assignment.
pub struct ValidatorRegistry {
    sources: Vec<Box<dyn KeySource>>,
    current: Arc<WatchedSet>,
}

impl ValidatorRegistry {
    pub fn new(sources: Vec<Box<dyn KeySource>>) -> Self {
        Self {
            sources,
            current: Arc::new(WatchedSet::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<WatchedSet> {
        Arc::clone(&self.current)
    }

    pub fn lookup(&self, index: ValidatorIndex) -> Option<&Validator> {
        self.current.lookup(index)
    }

    /// Reloads every key source, resolves the keys on chain and publishes the
    /// result for `epoch`. On any failure the previous snapshot stays published.
    pub async fn refresh(&mut self, epoch: Epoch, client: &dyn ChainClient) -> Result<Arc<WatchedSet>> {
        let results = join_all(self.sources.iter().map(|source| source.load())).await;

        let mut keys: HashSet<Pubkey> = HashSet::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(loaded) => keys.extend(loaded),
                Err(e) => {
                    warn!(
                        "Key source {} unavailable, keeping {} previously watched keys: {}",
                        source.name(),
                        self.current.keys_count(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        let mut requested: Vec<Pubkey> = keys.into_iter().collect();
        requested.sort();

        let resolved: HashMap<Pubkey, ChainValidator> = if requested.is_empty() {
            HashMap::new()
        } else {
            client
                .validators(&requested)
                .await?
                .into_iter()
                .map(|v| (v.pubkey.clone(), v))
                .collect()
        };

        let mut validators = Vec::with_capacity(resolved.len());
        let mut unresolved = Vec::new();
        for key in requested {
            match resolved.get(&key) {
                Some(chain_validator) => validators.push(Validator::from(chain_validator.clone())),
                None => unresolved.push(key),
            }
        }

        let next = Arc::new(WatchedSet::new(epoch, validators, unresolved));
        info!(
            "Watching {} keys for epoch {} ({} resolved, {} not yet on chain)",
            next.keys_count(),
            epoch,
            next.keys_count() - next.unresolved().len(),
            next.unresolved().len()
        );

        self.current = Arc::clone(&next);
        Ok(next)
    }
}
