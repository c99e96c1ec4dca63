use crate::core::error::ContractorError;
use async_trait::async_trait;
use orbit_common::{
    account::Allowance,
    contract::ContractMetadata,
    crypto::PublicKey,
    currency::Currency,
    host::HostEntry,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

// Scored, filterable registry of the hosts known to the network
#[async_trait]
pub trait HostDirectory: Send + Sync {
    // Look up a single host by its public key
    async fn host(&self, key: &PublicKey) -> Result<Option<HostEntry>, ContractorError>;

    // Return up to n candidate hosts honouring both blacklists,
    // best scored first
    async fn random_hosts_with_limits(
        &self,
        n: usize,
        blacklist: &[PublicKey],
        address_blacklist: &[PublicKey],
        allowance: &Allowance,
    ) -> Result<Vec<HostEntry>, ContractorError>;

    // Score of a host under the directory's weighting
    async fn score_breakdown(&self, entry: &HostEntry) -> Result<Currency, ContractorError>;

    // Subset of the given hosts that violate the IP range policy
    async fn check_for_ip_violations(
        &self,
        keys: &[PublicKey],
    ) -> Result<Vec<PublicKey>, ContractorError>;

    // Give the directory a fresh view of the active contracts so it can
    // weigh hosts accordingly
    async fn update_contracts(
        &self,
        contracts: Vec<ContractMetadata>,
    ) -> Result<(), ContractorError>;
}

// In-memory host directory for tests
#[derive(Default)]
pub struct ConfigurableHostDirectory {
    hosts: Mutex<HashMap<PublicKey, HostEntry>>,
    scores: Mutex<HashMap<PublicKey, Currency>>,
    ip_violations: Mutex<Vec<PublicKey>>,
    pushed_contracts: Mutex<Vec<ContractMetadata>>,
}

impl ConfigurableHostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, entry: HostEntry, score: Currency) {
        let mut scores = self.scores.lock().unwrap();
        scores.insert(entry.public_key.clone(), score);
        let mut hosts = self.hosts.lock().unwrap();
        hosts.insert(entry.public_key.clone(), entry);
    }

    pub fn remove_host(&self, key: &PublicKey) {
        self.hosts.lock().unwrap().remove(key);
        self.scores.lock().unwrap().remove(key);
    }

    pub fn set_filtered(&self, key: &PublicKey, filtered: bool) {
        if let Some(entry) = self.hosts.lock().unwrap().get_mut(key) {
            entry.filtered = filtered;
        }
    }

    pub fn set_ip_violations(&self, keys: Vec<PublicKey>) {
        *self.ip_violations.lock().unwrap() = keys;
    }

    // Last contract view pushed through update_contracts
    pub fn pushed_contracts(&self) -> Vec<ContractMetadata> {
        self.pushed_contracts.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostDirectory for ConfigurableHostDirectory {
    async fn host(&self, key: &PublicKey) -> Result<Option<HostEntry>, ContractorError> {
        Ok(self.hosts.lock().unwrap().get(key).cloned())
    }

    async fn random_hosts_with_limits(
        &self,
        n: usize,
        blacklist: &[PublicKey],
        address_blacklist: &[PublicKey],
        _allowance: &Allowance,
    ) -> Result<Vec<HostEntry>, ContractorError> {
        let excluded: HashSet<&PublicKey> =
            blacklist.iter().chain(address_blacklist.iter()).collect();

        let scores = self.scores.lock().unwrap();
        let mut candidates: Vec<HostEntry> = self
            .hosts
            .lock()
            .unwrap()
            .values()
            .filter(|entry| {
                !entry.filtered
                    && entry.scanned
                    && entry.settings.accepting_contracts
                    && !excluded.contains(&entry.public_key)
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            let score_a = scores.get(&a.public_key).copied().unwrap_or_default();
            let score_b = scores.get(&b.public_key).copied().unwrap_or_default();
            score_b.cmp(&score_a)
        });
        candidates.truncate(n);
        Ok(candidates)
    }

    async fn score_breakdown(&self, entry: &HostEntry) -> Result<Currency, ContractorError> {
        Ok(self
            .scores
            .lock()
            .unwrap()
            .get(&entry.public_key)
            .copied()
            .unwrap_or_default())
    }

    async fn check_for_ip_violations(
        &self,
        keys: &[PublicKey],
    ) -> Result<Vec<PublicKey>, ContractorError> {
        let violations = self.ip_violations.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|key| violations.contains(key))
            .cloned()
            .collect())
    }

    async fn update_contracts(
        &self,
        contracts: Vec<ContractMetadata>,
    ) -> Result<(), ContractorError> {
        *self.pushed_contracts.lock().unwrap() = contracts;
        Ok(())
    }
}
