use crate::core::error::ContractorError;
use async_trait::async_trait;
use orbit_common::{currency::Currency, transaction::TransactionSet};
use std::sync::Mutex;

// Gateway to the unconfirmed transaction pool of the chain
#[async_trait]
pub trait TransactionPool: Send + Sync {
    // Estimated (minimum, maximum) fee per transaction
    async fn fee_estimation(&self) -> Result<(Currency, Currency), ContractorError>;

    // Submit a transaction set for propagation
    async fn broadcast(&self, txns: TransactionSet) -> Result<(), ContractorError>;
}

// In-memory pool for tests, records every broadcast set
pub struct ConfigurableTransactionPool {
    min_fee: Currency,
    max_fee: Currency,
    broadcasted: Mutex<Vec<TransactionSet>>,
}

impl ConfigurableTransactionPool {
    pub fn new(min_fee: Currency, max_fee: Currency) -> Self {
        ConfigurableTransactionPool {
            min_fee,
            max_fee,
            broadcasted: Mutex::new(Vec::new()),
        }
    }

    pub fn broadcasted(&self) -> Vec<TransactionSet> {
        self.broadcasted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionPool for ConfigurableTransactionPool {
    async fn fee_estimation(&self) -> Result<(Currency, Currency), ContractorError> {
        Ok((self.min_fee, self.max_fee))
    }

    async fn broadcast(&self, txns: TransactionSet) -> Result<(), ContractorError> {
        self.broadcasted.lock().unwrap().push(txns);
        Ok(())
    }
}
