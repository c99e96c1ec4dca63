use crate::core::error::ContractorError;
use async_trait::async_trait;
use orbit_common::{
    crypto::{hash, Address, WalletSeed, WALLET_SEED_SIZE},
    currency::Currency,
    transaction::{Input, Transaction, TransactionSet},
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};

// A funded transaction under construction.
//
// Builders hold reserved wallet outputs. A builder that is not signed
// must be discarded so the wallet can release them.
#[async_trait]
pub trait FundingBuilder: Send {
    // Reserve outputs worth at least the given amount
    async fn fund(&mut self, amount: Currency) -> Result<(), ContractorError>;

    // Inputs the builder has reserved so far
    fn funding_inputs(&self) -> Vec<Input>;

    // Attach the reserved inputs to the transaction and sign, producing
    // the set to hand to the transaction pool
    async fn sign(&mut self, txn: Transaction) -> Result<TransactionSet, ContractorError>;

    // A transaction returning the reserved outputs to the refund address,
    // used if the counterparty never countersigns
    async fn sweep(&self, refund: &Address) -> Result<Transaction, ContractorError>;

    // Release the reserved outputs without signing
    async fn discard(&mut self);
}

// Wallet of the satellite, holds the funds of all renters
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn unlocked(&self) -> Result<bool, ContractorError>;

    async fn next_address(&self) -> Result<Address, ContractorError>;

    // Return an address obtained from next_address to the pool of
    // unused addresses
    async fn mark_address_unused(&self, address: &Address) -> Result<(), ContractorError>;

    async fn primary_seed(&self) -> Result<WalletSeed, ContractorError>;

    async fn start_transaction(&self) -> Result<Box<dyn FundingBuilder>, ContractorError>;
}

// In-memory wallet for tests
pub struct ConfigurableWallet {
    seed: [u8; WALLET_SEED_SIZE],
    unlocked: AtomicBool,
    fail_funding: AtomicBool,
    address_counter: AtomicU64,
    marked_unused: Mutex<Vec<Address>>,
}

impl ConfigurableWallet {
    pub fn new() -> Self {
        ConfigurableWallet {
            seed: [42; WALLET_SEED_SIZE],
            unlocked: AtomicBool::new(true),
            fail_funding: AtomicBool::new(false),
            address_counter: AtomicU64::new(0),
            marked_unused: Mutex::new(Vec::new()),
        }
    }

    pub fn set_unlocked(&self, unlocked: bool) {
        self.unlocked.store(unlocked, Ordering::SeqCst);
    }

    pub fn set_fail_funding(&self, fail: bool) {
        self.fail_funding.store(fail, Ordering::SeqCst);
    }

    pub fn marked_unused(&self) -> Vec<Address> {
        self.marked_unused.lock().unwrap().clone()
    }
}

impl Default for ConfigurableWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletProvider for ConfigurableWallet {
    async fn unlocked(&self) -> Result<bool, ContractorError> {
        Ok(self.unlocked.load(Ordering::SeqCst))
    }

    async fn next_address(&self) -> Result<Address, ContractorError> {
        let index = self.address_counter.fetch_add(1, Ordering::SeqCst);
        let digest = hash(&index.to_le_bytes());
        Ok(Address::new(digest.to_bytes()))
    }

    async fn mark_address_unused(&self, address: &Address) -> Result<(), ContractorError> {
        self.marked_unused.lock().unwrap().push(address.clone());
        Ok(())
    }

    async fn primary_seed(&self) -> Result<WalletSeed, ContractorError> {
        Ok(WalletSeed::new(self.seed))
    }

    async fn start_transaction(&self) -> Result<Box<dyn FundingBuilder>, ContractorError> {
        if self.fail_funding.load(Ordering::SeqCst) {
            return Err(ContractorError::Wallet("funding disabled".to_string()));
        }
        Ok(Box::new(ConfigurableFundingBuilder::default()))
    }
}

// Builder double: funding always succeeds and reserves one synthetic
// input per call, unique across builders
#[derive(Default)]
pub struct ConfigurableFundingBuilder {
    funded: Currency,
    inputs: Vec<Input>,
    discarded: bool,
}

static NEXT_OUTPUT: AtomicU64 = AtomicU64::new(0);

#[async_trait]
impl FundingBuilder for ConfigurableFundingBuilder {
    async fn fund(&mut self, amount: Currency) -> Result<(), ContractorError> {
        self.funded += amount;
        let output = NEXT_OUTPUT.fetch_add(1, Ordering::SeqCst);
        let parent_id = hash(&output.to_le_bytes());
        self.inputs.push(Input { parent_id });
        Ok(())
    }

    fn funding_inputs(&self) -> Vec<Input> {
        self.inputs.clone()
    }

    async fn sign(&mut self, mut txn: Transaction) -> Result<TransactionSet, ContractorError> {
        if self.discarded {
            return Err(ContractorError::Wallet("builder was discarded".to_string()));
        }
        txn.inputs = self.inputs.clone();
        Ok(vec![txn])
    }

    async fn sweep(&self, refund: &Address) -> Result<Transaction, ContractorError> {
        Ok(Transaction {
            inputs: self.inputs.clone(),
            outputs: vec![orbit_common::transaction::Output {
                value: self.funded,
                address: refund.clone(),
            }],
            arbitrary_data: Vec::new(),
        })
    }

    async fn discard(&mut self) {
        self.discarded = true;
        self.inputs.clear();
    }
}
