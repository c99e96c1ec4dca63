use lazy_static::lazy_static;
use orbit_common::currency::Currency;
use std::time::Duration;

// How often the maintenance loop wakes up on its own.
// Consensus tip changes trigger an additional pass.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10 * 60);

// Fraction of the per-host allowance share that is the floor for funding
// a single contract: allowance.funds * 15% / allowance.hosts
pub const FILE_CONTRACT_MINIMUM_FUNDING_NUM: u64 = 15;
pub const FILE_CONTRACT_MINIMUM_FUNDING_DEN: u64 = 100;

// A contract whose remaining funds dropped below 6% of its total cost
// is refreshed early instead of waiting for the renew window
pub const MIN_CONTRACT_FUND_RENEWAL_THRESHOLD_NUM: u64 = 6;
pub const MIN_CONTRACT_FUND_RENEWAL_THRESHOLD_DEN: u64 = 100;

// A contract is also refreshed when its remaining funds cannot pay for
// this many more sectors
pub const MIN_SECTOR_PRICE_MULTIPLIER: u64 = 3;

// Consecutive failed renewals in the second half of the renew window
// before the contract is locked for good
pub const CONSECUTIVE_RENEWALS_BEFORE_REPLACEMENT: u64 = 12;

// Initial contract funding is (contract price + txn fee) times this factor
pub const CONTRACT_FEE_FUNDING_MUL_FACTOR: u64 = 4;

// Clamp bounds for initial contract funding, relative to the per-host
// allowance share: [share / 20, share * 3 / 2]
pub const MIN_INITIAL_CONTRACT_FUNDING_DIV_FACTOR: u64 = 20;
pub const MAX_INITIAL_CONTRACT_FUNDING_MUL_FACTOR: u64 = 3;
pub const MAX_INITIAL_CONTRACT_FUNDING_DIV_FACTOR: u64 = 2;

// Extra hosts requested beyond the needed count when asking the
// directory for candidates, and the sample size buffer used when
// computing minimum acceptable scores
pub const RANDOM_HOSTS_BUFFER_FOR_SCORE: u64 = 50;
pub const HOST_REQUEST_MULTIPLIER: u64 = 4;

// Leeway factors applied to the lowest sampled host score. Contracts with
// hosts scoring below lowest/leeway lose the corresponding utility flag.
pub const SCORE_LEEWAY_GOOD_FOR_RENEW: u64 = 500;
pub const SCORE_LEEWAY_GOOD_FOR_UPLOAD: u64 = 100;

// Upper bound on walking a renewal lineage, guards against a
// pathological cycle in the persisted chain
pub const MAX_LINEAGE_WALK: u64 = 10_000;

// Transactions in a typical file contract set: the funding transaction,
// the contract transaction and a fee bumping parent. Multiplies the
// per-transaction fee estimate.
pub const FILE_CONTRACT_TRANSACTION_SET_SIZE: u64 = 3;

// Margin added on top of a renewal funding estimate to absorb host price
// volatility over the next period
pub const FUNDING_VOLATILITY_MARGIN_NUM: u64 = 33;
pub const FUNDING_VOLATILITY_MARGIN_DEN: u64 = 100;

lazy_static! {
    // Global ceiling on the storage price of any host the satellite is
    // willing to renew with, per byte per block
    pub static ref MAX_STORAGE_PRICE: Currency = Currency::from(100_000u64);

    // Collateral cap applied to whatever the host declares
    pub static ref MAX_COLLATERAL: Currency =
        Currency::from(1_000u64).mul_u64(1_000_000_000).mul_u64(1_000_000_000);
}

// Tunable knobs of the contractor. Production uses the defaults above,
// tests tighten them.
#[derive(Clone, Debug)]
pub struct ContractorConfig {
    pub consecutive_renewals_before_replacement: u64,
    pub max_storage_price: Currency,
    pub max_collateral: Currency,
}

impl Default for ContractorConfig {
    fn default() -> Self {
        ContractorConfig {
            consecutive_renewals_before_replacement: CONSECUTIVE_RENEWALS_BEFORE_REPLACEMENT,
            max_storage_price: *MAX_STORAGE_PRICE,
            max_collateral: *MAX_COLLATERAL,
        }
    }
}
