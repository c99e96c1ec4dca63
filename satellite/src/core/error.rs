use orbit_common::contract::ContractId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractorError {
    #[error("renter is not being tracked by the satellite")]
    RenterNotFound,

    #[error("contract {0} not found")]
    ContractNotFound(ContractId),

    #[error("allowance funds are insufficient for this operation")]
    InsufficientAllowance,

    #[error("host price exceeds the satellite ceiling")]
    HostTooExpensive,

    #[error("host is filtered or blocked")]
    HostBlocked,

    #[error("host not found in the directory")]
    HostNotFound,

    #[error("contract has already ended")]
    ContractEnded,

    #[error("contract is not good for renew")]
    ContractNotGoodForRenew,

    #[error("price gouging detected: {0}")]
    PriceGouging(String),

    #[error("wallet is locked")]
    WalletLocked,

    #[error("consensus is not synced")]
    NotSynced,

    #[error("operation interrupted by shutdown")]
    Stopped,

    // Host misbehaved during the form or renew protocol. These failures
    // count towards the consecutive renewal failure limit.
    #[error("negotiation with host failed: {0}")]
    Negotiation(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("persistent store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ContractorError {
    // Failures attributable to the host rather than the satellite.
    // Gouging counts: the host changed its pricing under us.
    pub fn is_host_fault(&self) -> bool {
        matches!(
            self,
            ContractorError::Negotiation(_) | ContractorError::PriceGouging(_)
        )
    }
}
