use crate::{block::BlockHeight, crypto::PublicKey, currency::Currency};
use serde::{Deserialize, Serialize};

// Budget envelope of a renter.
//
// The satellite forms and renews contracts on behalf of the renter within
// this envelope. Price ceilings of zero mean "no ceiling" for that
// resource.
#[derive(PartialEq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct Allowance {
    // Total funds the renter wants spread over its contracts
    pub funds: Currency,
    // Number of hosts to keep contracts with
    pub hosts: u64,
    // Length of a billing cycle in blocks
    pub period: BlockHeight,
    // Number of blocks before the end height at which a contract
    // becomes eligible for renewal
    pub renew_window: BlockHeight,

    // Usage expectations, used for host scoring and funding estimates
    pub expected_storage: u64,
    pub expected_upload: u64,
    pub expected_download: u64,
    pub expected_redundancy: f64,

    // Per-resource price ceilings
    pub max_rpc_price: Currency,
    pub max_contract_price: Currency,
    // Per byte per block
    pub max_storage_price: Currency,
    // Per byte
    pub max_upload_price: Currency,
    // Per byte
    pub max_download_price: Currency,
    pub max_sector_access_price: Currency,
}

impl Allowance {
    // An allowance is usable once funds, hosts and period are all set
    pub fn is_set(&self) -> bool {
        !self.funds.is_zero() && self.hosts > 0 && self.period > 0
    }
}

// A renter account tracked by the satellite
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Renter {
    // Unique account email, also the seed derivation input
    pub email: String,
    pub public_key: PublicKey,
    // Height at which the present billing cycle began
    pub current_period: BlockHeight,
    pub allowance: Allowance,
}

// Spending of a renter over the current billing cycle
#[derive(PartialEq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeriodSpending {
    // Funds committed into contract formations and renewals
    pub contract_fees: Currency,
    pub uploads: Currency,
    pub downloads: Currency,
    pub fund_account: Currency,
    pub maintenance: Currency,
    // Allowance funds not yet allocated to any contract
    pub funds_remaining: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowance_is_set() {
        let mut allowance = Allowance::default();
        assert!(!allowance.is_set());

        allowance.funds = Currency::from(1000u64);
        allowance.hosts = 2;
        assert!(!allowance.is_set());

        allowance.period = 100;
        assert!(allowance.is_set());
    }
}
