use crate::core::error::ContractorError;
use async_trait::async_trait;
use log::trace;
use orbit_common::{
    account::Renter,
    contract::{ContractId, ContractMetadata},
};
use std::{collections::HashMap, path::Path, sync::Mutex};

// Persistent records of the satellite: renter accounts, live contract
// metadata, renewal lineage pairs and the archive of superseded
// contracts. Writes are full-record updates.
#[async_trait]
pub trait RenterStore: Send + Sync {
    async fn renters(&self) -> Result<Vec<Renter>, ContractorError>;

    // Insert or replace a renter record, keyed by email
    async fn update_renter(&self, renter: &Renter) -> Result<(), ContractorError>;

    async fn remove_renter(&self, email: &str) -> Result<(), ContractorError>;

    async fn contracts(&self) -> Result<Vec<ContractMetadata>, ContractorError>;

    async fn update_contract(&self, contract: &ContractMetadata) -> Result<(), ContractorError>;

    async fn remove_contract(&self, id: &ContractId) -> Result<(), ContractorError>;

    // Lineage pairs (old id, new id)
    async fn renewals(&self) -> Result<Vec<(ContractId, ContractId)>, ContractorError>;

    async fn add_renewal(
        &self,
        old_id: &ContractId,
        new_id: &ContractId,
    ) -> Result<(), ContractorError>;

    async fn archived_contracts(&self) -> Result<Vec<ContractMetadata>, ContractorError>;

    async fn archive_contract(&self, contract: &ContractMetadata) -> Result<(), ContractorError>;
}

// Sled-backed store. Records are JSON values, currency amounts end up as
// stringified big integers.
pub struct SledStore {
    renters: sled::Tree,
    contracts: sled::Tree,
    renewals: sled::Tree,
    archive: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContractorError> {
        let db = sled::open(path).map_err(|e| ContractorError::Store(e.into()))?;
        Ok(SledStore {
            renters: db
                .open_tree("renters")
                .map_err(|e| ContractorError::Store(e.into()))?,
            contracts: db
                .open_tree("contracts")
                .map_err(|e| ContractorError::Store(e.into()))?,
            renewals: db
                .open_tree("renewals")
                .map_err(|e| ContractorError::Store(e.into()))?,
            archive: db
                .open_tree("archive")
                .map_err(|e| ContractorError::Store(e.into()))?,
        })
    }

    fn load_all<V: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
    ) -> Result<Vec<V>, ContractorError> {
        let mut values = Vec::new();
        for entry in tree.iter() {
            let (_, raw) = entry.map_err(|e| ContractorError::Store(e.into()))?;
            let value = serde_json::from_slice(&raw).map_err(|e| ContractorError::Store(e.into()))?;
            values.push(value);
        }
        Ok(values)
    }

    fn save<V: serde::Serialize>(
        tree: &sled::Tree,
        key: &[u8],
        value: &V,
    ) -> Result<(), ContractorError> {
        let raw = serde_json::to_vec(value).map_err(|e| ContractorError::Store(e.into()))?;
        tree.insert(key, raw)
            .map_err(|e| ContractorError::Store(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl RenterStore for SledStore {
    async fn renters(&self) -> Result<Vec<Renter>, ContractorError> {
        Self::load_all(&self.renters)
    }

    async fn update_renter(&self, renter: &Renter) -> Result<(), ContractorError> {
        trace!("update renter {}", renter.email);
        Self::save(&self.renters, renter.email.as_bytes(), renter)
    }

    async fn remove_renter(&self, email: &str) -> Result<(), ContractorError> {
        self.renters
            .remove(email.as_bytes())
            .map_err(|e| ContractorError::Store(e.into()))?;
        Ok(())
    }

    async fn contracts(&self) -> Result<Vec<ContractMetadata>, ContractorError> {
        Self::load_all(&self.contracts)
    }

    async fn update_contract(&self, contract: &ContractMetadata) -> Result<(), ContractorError> {
        Self::save(&self.contracts, contract.id.0.as_bytes(), contract)
    }

    async fn remove_contract(&self, id: &ContractId) -> Result<(), ContractorError> {
        self.contracts
            .remove(id.0.as_bytes())
            .map_err(|e| ContractorError::Store(e.into()))?;
        Ok(())
    }

    async fn renewals(&self) -> Result<Vec<(ContractId, ContractId)>, ContractorError> {
        Self::load_all(&self.renewals)
    }

    async fn add_renewal(
        &self,
        old_id: &ContractId,
        new_id: &ContractId,
    ) -> Result<(), ContractorError> {
        Self::save(
            &self.renewals,
            old_id.0.as_bytes(),
            &(old_id.clone(), new_id.clone()),
        )
    }

    async fn archived_contracts(&self) -> Result<Vec<ContractMetadata>, ContractorError> {
        Self::load_all(&self.archive)
    }

    async fn archive_contract(&self, contract: &ContractMetadata) -> Result<(), ContractorError> {
        Self::save(&self.archive, contract.id.0.as_bytes(), contract)
    }
}

// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    renters: Mutex<HashMap<String, Renter>>,
    contracts: Mutex<HashMap<ContractId, ContractMetadata>>,
    renewals: Mutex<HashMap<ContractId, ContractId>>,
    archive: Mutex<HashMap<ContractId, ContractMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RenterStore for MemoryStore {
    async fn renters(&self) -> Result<Vec<Renter>, ContractorError> {
        Ok(self.renters.lock().unwrap().values().cloned().collect())
    }

    async fn update_renter(&self, renter: &Renter) -> Result<(), ContractorError> {
        self.renters
            .lock()
            .unwrap()
            .insert(renter.email.clone(), renter.clone());
        Ok(())
    }

    async fn remove_renter(&self, email: &str) -> Result<(), ContractorError> {
        self.renters.lock().unwrap().remove(email);
        Ok(())
    }

    async fn contracts(&self) -> Result<Vec<ContractMetadata>, ContractorError> {
        Ok(self.contracts.lock().unwrap().values().cloned().collect())
    }

    async fn update_contract(&self, contract: &ContractMetadata) -> Result<(), ContractorError> {
        self.contracts
            .lock()
            .unwrap()
            .insert(contract.id.clone(), contract.clone());
        Ok(())
    }

    async fn remove_contract(&self, id: &ContractId) -> Result<(), ContractorError> {
        self.contracts.lock().unwrap().remove(id);
        Ok(())
    }

    async fn renewals(&self) -> Result<Vec<(ContractId, ContractId)>, ContractorError> {
        Ok(self
            .renewals
            .lock()
            .unwrap()
            .iter()
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect())
    }

    async fn add_renewal(
        &self,
        old_id: &ContractId,
        new_id: &ContractId,
    ) -> Result<(), ContractorError> {
        self.renewals
            .lock()
            .unwrap()
            .insert(old_id.clone(), new_id.clone());
        Ok(())
    }

    async fn archived_contracts(&self) -> Result<Vec<ContractMetadata>, ContractorError> {
        Ok(self.archive.lock().unwrap().values().cloned().collect())
    }

    async fn archive_contract(&self, contract: &ContractMetadata) -> Result<(), ContractorError> {
        self.archive
            .lock()
            .unwrap()
            .insert(contract.id.clone(), contract.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_common::{
        account::Allowance,
        crypto::PublicKey,
        currency::Currency,
    };

    fn renter(email: &str) -> Renter {
        Renter {
            email: email.to_string(),
            public_key: PublicKey::zero(),
            current_period: 0,
            allowance: Allowance {
                funds: Currency::from(10_000u64),
                hosts: 2,
                period: 1000,
                renew_window: 100,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_sled_renter_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let r = renter("renter@example.com");
        store.update_renter(&r).await.unwrap();

        let loaded = store.renters().await.unwrap();
        assert_eq!(loaded, vec![r]);

        store.remove_renter("renter@example.com").await.unwrap();
        assert!(store.renters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sled_renewal_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let old_id = ContractId(orbit_common::crypto::hash(b"old"));
        let new_id = ContractId(orbit_common::crypto::hash(b"new"));
        store.add_renewal(&old_id, &new_id).await.unwrap();

        let pairs = store.renewals().await.unwrap();
        assert_eq!(pairs, vec![(old_id, new_id)]);
    }
}
