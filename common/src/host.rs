use crate::{block::BlockHeight, crypto::PublicKey, currency::Currency};
use serde::{Deserialize, Serialize};

// Settings a host announces to the network
#[derive(PartialEq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostSettings {
    pub accepting_contracts: bool,
    // Longest contract duration the host accepts, in blocks
    pub max_duration: BlockHeight,
    // Collateral the host is willing to lock into a single contract
    pub max_collateral: Currency,

    // Flat price for forming or renewing a contract
    pub contract_price: Currency,
    // Per byte per block
    pub storage_price: Currency,
    // Per byte
    pub upload_price: Currency,
    // Per byte
    pub download_price: Currency,
    // Flat price per RPC call
    pub base_rpc_price: Currency,
    // Flat price per sector access
    pub sector_access_price: Currency,
}

// A host as seen through the host directory
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct HostEntry {
    pub public_key: PublicKey,
    pub net_address: String,
    pub settings: HostSettings,
    // Set when the operator filtered the host out
    pub filtered: bool,
    // Set once the host answered a scan
    pub scanned: bool,
}

impl HostEntry {
    pub fn new(public_key: PublicKey, net_address: String, settings: HostSettings) -> Self {
        HostEntry {
            public_key,
            net_address,
            settings,
            filtered: false,
            scanned: true,
        }
    }
}
