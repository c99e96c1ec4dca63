use crate::core::{
    error::ContractorError,
    providers::FundingBuilder,
};
use async_trait::async_trait;
use log::trace;
use orbit_common::{
    block::BlockHeight,
    contract::{ContractId, ContractMetadata, ContractRevision, ContractSpending, Utility},
    crypto::{hash, Address, Hash, PublicKey, RenterSeed},
    currency::{contract_tax, Currency},
    host::HostEntry,
    transaction::{Transaction, TransactionSet},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, RwLock,
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard};

// A live contract owned by the contract set
#[derive(Clone, Debug)]
pub struct FileContract {
    pub metadata: ContractMetadata,
    // Latest revision transaction, rebroadcast by the watchdog when the
    // contract is renewed or its inputs are double spent
    pub revision_txn: Transaction,
}

// Exclusive handle on a live contract. The contract is returned to the
// set when the guard is dropped.
pub type SafeContract = OwnedMutexGuard<FileContract>;

// Negotiation request sent to a host when forming or renewing
#[derive(Clone, Debug)]
pub struct ContractRequest {
    pub renter_public_key: PublicKey,
    pub host_public_key: PublicKey,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    // Initial revision proposed by the satellite
    pub proposed: ContractRevision,
    // Authorization derived from the renter seed over the proposal
    pub renter_authorization: Hash,
    // Set when this request renews an existing contract
    pub renewed_from: Option<ContractId>,
}

// Network leg of the form and renew protocols. The wire codec lives with
// the transport implementation, the engine only sees the countersigned
// revision.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn form_contract(
        &self,
        host: &HostEntry,
        request: &ContractRequest,
    ) -> Result<ContractRevision, ContractorError>;

    async fn renew_contract(
        &self,
        host: &HostEntry,
        request: &ContractRequest,
    ) -> Result<ContractRevision, ContractorError>;
}

// Parameters shared by contract formation and renewal
#[derive(Clone, Debug)]
pub struct ContractParams {
    pub renter_public_key: PublicKey,
    pub host: HostEntry,
    // Total amount committed by the renter, fees included
    pub funding: Currency,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    pub refund_address: Address,
    // Fee reserved for the whole transaction set
    pub txn_fee: Currency,
}

// The set of live contracts. The set exclusively owns each contract,
// mutation requires acquiring the contract first.
#[derive(Default)]
pub struct ContractSet {
    contracts: RwLock<HashMap<ContractId, Arc<Mutex<FileContract>>>>,
}

impl ContractSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<ContractId> {
        self.contracts.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.contracts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ContractId) -> bool {
        self.contracts.read().unwrap().contains_key(id)
    }

    // Snapshot of the metadata of every live contract
    pub async fn metadata(&self) -> Vec<ContractMetadata> {
        let handles: Vec<Arc<Mutex<FileContract>>> =
            self.contracts.read().unwrap().values().cloned().collect();
        let mut all = Vec::with_capacity(handles.len());
        for handle in handles {
            all.push(handle.lock().await.metadata.clone());
        }
        all
    }

    // Metadata of a single contract without acquiring it for mutation
    pub async fn view(&self, id: &ContractId) -> Option<ContractMetadata> {
        let handle = self.contracts.read().unwrap().get(id).cloned()?;
        let contract = handle.lock().await;
        Some(contract.metadata.clone())
    }

    // Take exclusive ownership of a contract. Returns None if the id is
    // not in the live set.
    pub async fn acquire(&self, id: &ContractId) -> Option<SafeContract> {
        let handle = self.contracts.read().unwrap().get(id).cloned()?;
        Some(handle.lock_owned().await)
    }

    pub fn insert(&self, contract: FileContract) {
        let id = contract.metadata.id.clone();
        trace!("inserting contract {}", id);
        self.contracts
            .write()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(contract)));
    }

    // Remove a contract from the live set, returning its final state
    pub async fn delete(&self, id: &ContractId) -> Option<FileContract> {
        let handle = self.contracts.write().unwrap().remove(id)?;
        let contract = handle.lock().await;
        Some(contract.clone())
    }

    // Replace the stored metadata of a contract
    pub async fn apply_metadata(&self, metadata: ContractMetadata) {
        if let Some(mut contract) = self.acquire(&metadata.id).await {
            contract.metadata = metadata;
        }
    }

    // Negotiate a brand new contract with a host.
    //
    // Produces the signed transaction set to broadcast and a sweep
    // transaction that returns the funding to the refund address should
    // the host never countersign. The contract is inserted into the live
    // set before returning.
    pub async fn form_contract(
        &self,
        params: &ContractParams,
        seed: RenterSeed,
        builder: &mut Box<dyn FundingBuilder>,
        transport: &dyn HostTransport,
    ) -> Result<(ContractMetadata, TransactionSet, Transaction), ContractorError> {
        self.negotiate(params, seed, builder, transport, None, 0)
            .await
    }

    // Negotiate the renewal of an existing contract. The caller holds
    // the acquired predecessor, its stored data carries over.
    pub async fn renew_contract(
        &self,
        old_contract: &SafeContract,
        params: &ContractParams,
        seed: RenterSeed,
        builder: &mut Box<dyn FundingBuilder>,
        transport: &dyn HostTransport,
    ) -> Result<(ContractMetadata, TransactionSet, Transaction), ContractorError> {
        let old_id = old_contract.metadata.id.clone();
        let stored = old_contract.metadata.revision.filesize;
        self.negotiate(params, seed, builder, transport, Some(old_id), stored)
            .await
    }

    async fn negotiate(
        &self,
        params: &ContractParams,
        seed: RenterSeed,
        builder: &mut Box<dyn FundingBuilder>,
        transport: &dyn HostTransport,
        renewed_from: Option<ContractId>,
        stored_bytes: u64,
    ) -> Result<(ContractMetadata, TransactionSet, Transaction), ContractorError> {
        let settings = &params.host.settings;

        // Funds actually spendable by the renter after the host fee, the
        // network levy and the transaction fee are taken out
        let renter_funds = params
            .funding
            .checked_sub(&settings.contract_price)
            .and_then(|left| left.checked_sub(&contract_tax(&params.funding)))
            .and_then(|left| left.checked_sub(&params.txn_fee))
            .ok_or(ContractorError::InsufficientAllowance)?;

        builder.fund(params.funding).await?;

        // The funding inputs make the id unique per negotiation
        let id = derive_contract_id(
            &params.renter_public_key,
            &params.host.public_key,
            params.end_height,
            &builder.funding_inputs(),
        );

        let proposed = ContractRevision {
            revision_number: 1,
            filesize: stored_bytes,
            renter_funds,
        };
        // Authorize the proposal on behalf of the renter. The seed is
        // key material and gets zeroed as soon as it is dropped here.
        let renter_authorization = authorize_request(&seed, &id, params.end_height);
        drop(seed);

        let request = ContractRequest {
            renter_public_key: params.renter_public_key.clone(),
            host_public_key: params.host.public_key.clone(),
            start_height: params.start_height,
            end_height: params.end_height,
            proposed,
            renter_authorization,
            renewed_from: renewed_from.clone(),
        };

        let revision = match renewed_from {
            Some(_) => transport.renew_contract(&params.host, &request).await?,
            None => transport.form_contract(&params.host, &request).await?,
        };

        let contract_txn = Transaction {
            inputs: Vec::new(),
            outputs: Vec::new(),
            arbitrary_data: id.0.clone().to_bytes().to_vec(),
        };
        let txn_set = builder.sign(contract_txn).await?;
        let sweep = builder.sweep(&params.refund_address).await?;

        let metadata = ContractMetadata {
            id: id.clone(),
            renter_public_key: params.renter_public_key.clone(),
            host_public_key: params.host.public_key.clone(),
            start_height: params.start_height,
            end_height: params.end_height,
            total_cost: params.funding,
            renter_funds: revision.renter_funds,
            spending: ContractSpending::default(),
            utility: Utility::active(),
            revision,
        };

        let revision_txn = txn_set.last().cloned().unwrap_or_default();
        self.insert(FileContract {
            metadata: metadata.clone(),
            revision_txn,
        });

        Ok((metadata, txn_set, sweep))
    }
}

fn authorize_request(seed: &RenterSeed, id: &ContractId, end_height: BlockHeight) -> Hash {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(seed.as_bytes());
    bytes.extend_from_slice(id.0.as_bytes());
    bytes.extend_from_slice(&end_height.to_le_bytes());
    hash(&bytes)
}

fn derive_contract_id(
    renter: &PublicKey,
    host: &PublicKey,
    end_height: BlockHeight,
    inputs: &[orbit_common::transaction::Input],
) -> ContractId {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(renter.as_bytes());
    bytes.extend_from_slice(host.as_bytes());
    bytes.extend_from_slice(&end_height.to_le_bytes());
    for input in inputs {
        bytes.extend_from_slice(input.parent_id.as_bytes());
    }
    ContractId(hash(&bytes))
}

// Scriptable host side of the negotiation, used in tests. Hosts accept
// by default and can be told to fail a number of times or reject
// everything.
#[derive(Default)]
pub struct ConfigurableTransport {
    fail_counts: StdMutex<HashMap<PublicKey, u64>>,
    reject_all: AtomicBool,
}

impl ConfigurableTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // Make the next count negotiations with this host fail
    pub fn fail_times(&self, host: &PublicKey, count: u64) {
        self.fail_counts.lock().unwrap().insert(host.clone(), count);
    }

    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    fn check(&self, host: &PublicKey) -> Result<(), ContractorError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(ContractorError::Negotiation(
                "host rejected the contract".to_string(),
            ));
        }
        let mut counts = self.fail_counts.lock().unwrap();
        if let Some(remaining) = counts.get_mut(host) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ContractorError::Negotiation(
                    "host dropped the connection".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HostTransport for ConfigurableTransport {
    async fn form_contract(
        &self,
        host: &HostEntry,
        request: &ContractRequest,
    ) -> Result<ContractRevision, ContractorError> {
        self.check(&host.public_key)?;
        Ok(request.proposed.clone())
    }

    async fn renew_contract(
        &self,
        host: &HostEntry,
        request: &ContractRequest,
    ) -> Result<ContractRevision, ContractorError> {
        self.check(&host.public_key)?;
        Ok(request.proposed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(id_seed: &[u8]) -> ContractMetadata {
        ContractMetadata {
            id: ContractId(hash(id_seed)),
            renter_public_key: PublicKey::zero(),
            host_public_key: PublicKey::zero(),
            start_height: 0,
            end_height: 100,
            total_cost: Currency::from(1000u64),
            renter_funds: Currency::from(900u64),
            spending: ContractSpending::default(),
            utility: Utility::active(),
            revision: ContractRevision::default(),
        }
    }

    #[tokio::test]
    async fn test_acquire_returns_none_for_unknown() {
        let set = ContractSet::new();
        let id = ContractId(hash(b"unknown"));
        assert!(set.acquire(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let set = ContractSet::new();
        let meta = metadata(b"contract");
        let id = meta.id.clone();
        set.insert(FileContract {
            metadata: meta,
            revision_txn: Transaction::default(),
        });

        let guard = set.acquire(&id).await.expect("contract should exist");

        // A second acquire must wait until the guard is returned
        let set_ref = &set;
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            set_ref.acquire(&id),
        )
        .await;
        assert!(second.is_err(), "second acquire should block");

        drop(guard);
        assert!(set.acquire(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_from_live_set() {
        let set = ContractSet::new();
        let meta = metadata(b"contract");
        let id = meta.id.clone();
        set.insert(FileContract {
            metadata: meta.clone(),
            revision_txn: Transaction::default(),
        });

        let deleted = set.delete(&id).await.expect("delete should find it");
        assert_eq!(deleted.metadata, meta);
        assert!(!set.contains(&id));
    }
}
