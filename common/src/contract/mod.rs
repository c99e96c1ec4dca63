use crate::{
    block::BlockHeight,
    crypto::{Hash, PublicKey},
    currency::Currency,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};

// Stable identifier of a file contract on the chain
#[derive(Eq, PartialEq, PartialOrd, Ord, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct ContractId(pub Hash);

impl ContractId {
    pub fn zero() -> Self {
        ContractId(Hash::zero())
    }
}

impl Display for ContractId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.0)
    }
}

impl From<Hash> for ContractId {
    fn from(hash: Hash) -> Self {
        ContractId(hash)
    }
}

// Usability flags of a live contract.
//
// A contract starts good for upload and good for renew. It can be demoted
// to renew-only (no new data accepted) and finally locked, which is
// terminal for this contract id: the contract still exists on chain until
// its end height, but the satellite stops working with it.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Utility {
    pub good_for_upload: bool,
    pub good_for_renew: bool,
    pub locked: bool,
}

impl Utility {
    // Fresh contracts are fully usable
    pub fn active() -> Self {
        Utility {
            good_for_upload: true,
            good_for_renew: true,
            locked: false,
        }
    }

    // Terminal state, the contract is never used again
    pub fn bad() -> Self {
        Utility {
            good_for_upload: false,
            good_for_renew: false,
            locked: true,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.good_for_upload && self.good_for_renew && !self.locked
    }

    // Stop accepting new data but keep the contract renewable
    pub fn demote_upload(&mut self) {
        self.good_for_upload = false;
    }

    // Lock the contract permanently
    pub fn lock(&mut self) {
        self.good_for_upload = false;
        self.good_for_renew = false;
        self.locked = true;
    }
}

impl Default for Utility {
    fn default() -> Self {
        Utility::active()
    }
}

// Cumulative spending of a contract, by category
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ContractSpending {
    pub uploads: Currency,
    pub downloads: Currency,
    // Funding moved into ephemeral accounts on the host
    pub fund_account: Currency,
    // Renewals, revision submissions and other upkeep
    pub maintenance: Currency,
}

impl ContractSpending {
    pub fn total(&self) -> Currency {
        self.uploads + self.downloads + self.fund_account + self.maintenance
    }
}

// The satellite's view of the most recent revision of a contract.
// Only the fields the engine consumes are tracked here.
#[derive(Eq, PartialEq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractRevision {
    pub revision_number: u64,
    // Bytes currently stored under the contract
    pub filesize: u64,
    // Funds the renter can still spend from the contract
    pub renter_funds: Currency,
}

// Metadata of a file contract tracked by the satellite
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct ContractMetadata {
    pub id: ContractId,
    pub renter_public_key: PublicKey,
    pub host_public_key: PublicKey,

    pub start_height: BlockHeight,
    pub end_height: BlockHeight,

    // Everything the renter paid to create the contract,
    // including fees and the initial contract funds
    pub total_cost: Currency,
    // Funds still spendable from the contract
    pub renter_funds: Currency,

    pub spending: ContractSpending,
    pub utility: Utility,
    pub revision: ContractRevision,
}

impl ContractMetadata {
    pub fn is_expired(&self, height: BlockHeight) -> bool {
        height >= self.end_height
    }

    // Identity of the contract relation, one live contract allowed per pair
    pub fn key_pair(&self) -> (PublicKey, PublicKey) {
        (
            self.renter_public_key.clone(),
            self.host_public_key.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utility_transitions() {
        let mut utility = Utility::active();
        assert!(utility.is_ok());

        utility.demote_upload();
        assert!(!utility.good_for_upload);
        assert!(utility.good_for_renew);
        assert!(!utility.locked);

        utility.lock();
        assert_eq!(utility, Utility::bad());
    }

    #[test]
    fn test_spending_total() {
        let spending = ContractSpending {
            uploads: Currency::from(1u64),
            downloads: Currency::from(2u64),
            fund_account: Currency::from(3u64),
            maintenance: Currency::from(4u64),
        };
        assert_eq!(spending.total(), Currency::from(10u64));
    }
}
