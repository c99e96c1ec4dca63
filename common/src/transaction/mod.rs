use crate::{
    crypto::{hash, Address, Hash},
    currency::Currency,
};
use serde::{Deserialize, Serialize};

// Chain-facing transaction types.
//
// The satellite moves transactions around opaquely: it funds them, hands
// them to the transaction pool and watches their inputs. The full chain
// encoding lives with the wallet and consensus collaborators.

// Spend of a previous output
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Input {
    // Output being consumed
    pub parent_id: Hash,
}

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Output {
    pub value: Currency,
    pub address: Address,
}

#[derive(Eq, PartialEq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub arbitrary_data: Vec<u8>,
}

impl Transaction {
    // Content hash identifying the transaction
    pub fn id(&self) -> Hash {
        // A fixed struct always encodes, failure here is a developer error
        let bytes = bincode::serialize(self).expect("transaction encoding is infallible");
        hash(&bytes)
    }
}

// Transactions that must be accepted by the chain together
pub type TransactionSet = Vec<Transaction>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_changes_with_content() {
        let a = Transaction::default();
        let mut b = Transaction::default();
        b.arbitrary_data = vec![1];
        assert_ne!(a.id(), b.id());
    }
}
