use crate::{
    config::{
        ContractorConfig, FILE_CONTRACT_MINIMUM_FUNDING_DEN, FILE_CONTRACT_MINIMUM_FUNDING_NUM,
        FILE_CONTRACT_TRANSACTION_SET_SIZE, FUNDING_VOLATILITY_MARGIN_DEN,
        FUNDING_VOLATILITY_MARGIN_NUM, MAX_LINEAGE_WALK,
    },
    core::{
        contractor::ContractorState,
        error::ContractorError,
        providers::{HostDirectory, TransactionPool},
    },
};
use log::{trace, warn};
use orbit_common::{
    account::Allowance,
    contract::ContractMetadata,
    currency::{contract_tax, Currency},
};
use tokio::sync::RwLock;

// Lowest amount any single contract is funded with
pub(crate) fn minimum_funding(allowance: &Allowance) -> Currency {
    if allowance.hosts == 0 {
        return Currency::zero();
    }
    allowance
        .funds
        .mul_frac(
            FILE_CONTRACT_MINIMUM_FUNDING_NUM,
            FILE_CONTRACT_MINIMUM_FUNDING_DEN,
        )
        .div_u64(allowance.hosts)
}

// Estimate the funds needed to renew a contract for another period.
//
// The estimate projects the next period from what the renter spent over
// the current one, walking the renewal lineage back to the start of the
// period. Directory and fee lookups happen before the contractor state
// is locked, the lock is only held for the in-memory walk.
pub(crate) async fn estimate_renew_funding(
    hdb: &dyn HostDirectory,
    tpool: &dyn TransactionPool,
    state: &RwLock<ContractorState>,
    contract: &ContractMetadata,
    config: &ContractorConfig,
) -> Result<Currency, ContractorError> {
    let (allowance, current_period) = {
        let state = state.read().await;
        let renter = state
            .renters
            .get(&contract.renter_public_key)
            .ok_or(ContractorError::RenterNotFound)?;
        (renter.allowance.clone(), renter.current_period)
    };

    let host = hdb
        .host(&contract.host_public_key)
        .await?
        .ok_or(ContractorError::HostNotFound)?;
    if host.filtered {
        return Err(ContractorError::HostBlocked);
    }
    let settings = &host.settings;
    if settings.storage_price > config.max_storage_price {
        return Err(ContractorError::HostTooExpensive);
    }
    let (_, max_fee) = tpool.fee_estimation().await?;

    // Cost of keeping the currently stored data for another period
    let stored = contract.revision.filesize;
    let storage_cost = settings
        .storage_price
        .mul_u64(stored)
        .mul_u64(allowance.period);

    // Accumulate the spending of this contract and its predecessors
    // within the current period
    let mut prior_uploads = contract.spending.uploads;
    let mut prior_downloads = contract.spending.downloads;
    let mut prior_fund_account = contract.spending.fund_account;
    let mut prior_maintenance = contract.spending.maintenance;
    {
        let state = state.read().await;
        let mut current = contract.id.clone();
        let mut hops = 0u64;
        while let Some(prev_id) = state.renewed_from.get(&current) {
            hops += 1;
            if hops > MAX_LINEAGE_WALK {
                warn!("lineage walk of contract {} exceeded the cap", contract.id);
                break;
            }
            let prev = match state.old_contracts.get(prev_id) {
                Some(prev) => prev,
                // Unknown predecessor, use what was gathered so far
                None => break,
            };
            if prev.start_height < current_period {
                break;
            }
            prior_uploads += prev.spending.uploads;
            prior_downloads += prev.spending.downloads;
            prior_fund_account += prev.spending.fund_account;
            prior_maintenance += prev.spending.maintenance;
            current = prev_id.clone();
        }
    }

    // Project the upload volume of the next period from the upload
    // budget spent in this one, never above what is already stored
    let upload_data = if settings.upload_price.is_zero() {
        prior_uploads
    } else {
        prior_uploads
            .checked_div(&settings.upload_price)
            .unwrap_or_else(Currency::zero)
    };
    let upload_bytes = upload_data.min(Currency::from(stored)).as_u64();
    let new_uploads_cost = prior_uploads
        + settings
            .storage_price
            .mul_u64(upload_bytes)
            .mul_u64(allowance.period);

    let mut estimate = storage_cost
        + new_uploads_cost
        + prior_downloads
        + prior_fund_account
        + prior_maintenance
        + settings.contract_price;

    // Network levy and transaction fees for the renewal set
    estimate += contract_tax(&estimate);
    estimate += max_fee.mul_u64(FILE_CONTRACT_TRANSACTION_SET_SIZE);

    // Host prices move between periods, pad the estimate
    estimate += estimate.mul_frac(FUNDING_VOLATILITY_MARGIN_NUM, FUNDING_VOLATILITY_MARGIN_DEN);

    let floor = minimum_funding(&allowance);
    if estimate < floor {
        trace!(
            "estimate {} for contract {} raised to the funding floor {}",
            estimate,
            contract.id,
            floor
        );
        estimate = floor;
    }
    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::{
        ConfigurableHostDirectory, ConfigurableTransactionPool,
    };
    use orbit_common::{
        account::Renter,
        contract::{ContractId, ContractRevision, ContractSpending, Utility},
        crypto::{hash, PublicKey},
        host::{HostEntry, HostSettings},
    };

    fn renter_key() -> PublicKey {
        PublicKey::new(hash(b"renter").to_bytes())
    }

    fn host_key() -> PublicKey {
        PublicKey::new(hash(b"host").to_bytes())
    }

    fn allowance() -> Allowance {
        Allowance {
            funds: Currency::from(100_000u64),
            hosts: 2,
            period: 1000,
            renew_window: 100,
            ..Default::default()
        }
    }

    fn state_with_renter() -> ContractorState {
        let mut state = ContractorState::new();
        state.renters.insert(
            renter_key(),
            Renter {
                email: "renter@example.com".to_string(),
                public_key: renter_key(),
                current_period: 0,
                allowance: allowance(),
            },
        );
        state
    }

    fn contract(id_seed: &[u8], spending: ContractSpending) -> ContractMetadata {
        ContractMetadata {
            id: ContractId(hash(id_seed)),
            renter_public_key: renter_key(),
            host_public_key: host_key(),
            start_height: 10,
            end_height: 1010,
            total_cost: Currency::from(5_000u64),
            renter_funds: Currency::from(100u64),
            spending,
            utility: Utility::active(),
            revision: ContractRevision {
                revision_number: 5,
                filesize: 0,
                renter_funds: Currency::from(100u64),
            },
        }
    }

    fn directory_with_host(settings: HostSettings) -> ConfigurableHostDirectory {
        let hdb = ConfigurableHostDirectory::new();
        hdb.add_host(
            HostEntry::new(host_key(), "host.example.com:9982".to_string(), settings),
            Currency::from(1_000u64),
        );
        hdb
    }

    #[tokio::test]
    async fn test_estimate_respects_funding_floor() {
        let hdb = directory_with_host(HostSettings::default());
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());
        let state = RwLock::new(state_with_renter());

        let metadata = contract(b"c1", ContractSpending::default());
        let estimate = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &metadata,
            &ContractorConfig::default(),
        )
        .await
        .unwrap();

        // 15% of 100000 spread over 2 hosts
        assert!(estimate >= Currency::from(7_500u64));
    }

    #[tokio::test]
    async fn test_estimate_fails_for_unknown_host() {
        let hdb = ConfigurableHostDirectory::new();
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());
        let state = RwLock::new(state_with_renter());

        let metadata = contract(b"c1", ContractSpending::default());
        let result = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &metadata,
            &ContractorConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ContractorError::HostNotFound)));
    }

    #[tokio::test]
    async fn test_estimate_fails_for_filtered_host() {
        let hdb = directory_with_host(HostSettings::default());
        hdb.set_filtered(&host_key(), true);
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());
        let state = RwLock::new(state_with_renter());

        let metadata = contract(b"c1", ContractSpending::default());
        let result = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &metadata,
            &ContractorConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ContractorError::HostBlocked)));
    }

    #[tokio::test]
    async fn test_prior_spending_is_walked_within_the_period() {
        let settings = HostSettings {
            upload_price: Currency::from(1u64),
            ..Default::default()
        };
        let hdb = directory_with_host(settings);
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());

        let mut state = state_with_renter();
        // Predecessor inside the current period, its download spending
        // must be carried forward
        let mut prev = contract(
            b"prev",
            ContractSpending {
                downloads: Currency::from(40_000u64),
                ..Default::default()
            },
        );
        prev.start_height = 5;
        let current = contract(b"current", ContractSpending::default());
        state.record_renewal(&prev.id, &current.id);
        state.old_contracts.insert(prev.id.clone(), prev);
        let state = RwLock::new(state);

        let with_lineage = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &current,
            &ContractorConfig::default(),
        )
        .await
        .unwrap();

        // Same contract without the lineage entry
        let alone = contract(b"alone", ContractSpending::default());
        let without_lineage = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &alone,
            &ContractorConfig::default(),
        )
        .await
        .unwrap();

        assert!(with_lineage > without_lineage);
    }

    #[tokio::test]
    async fn test_predecessor_before_period_is_ignored() {
        let hdb = directory_with_host(HostSettings::default());
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());

        let mut state = state_with_renter();
        state.renters.get_mut(&renter_key()).unwrap().current_period = 100;
        let mut prev = contract(
            b"prev",
            ContractSpending {
                downloads: Currency::from(1_000_000_000u64),
                ..Default::default()
            },
        );
        // Started before the current period
        prev.start_height = 50;
        let mut current = contract(b"current", ContractSpending::default());
        current.start_height = 150;
        state.record_renewal(&prev.id, &current.id);
        state.old_contracts.insert(prev.id.clone(), prev);
        let state = RwLock::new(state);

        let estimate = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &current,
            &ContractorConfig::default(),
        )
        .await
        .unwrap();

        // The huge download spend of the old period is not carried over,
        // only the floor remains
        assert_eq!(estimate, minimum_funding(&allowance()));
    }

    #[tokio::test]
    async fn test_lineage_cycle_is_capped() {
        let hdb = directory_with_host(HostSettings::default());
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());

        let mut state = state_with_renter();
        let a = contract(b"a", ContractSpending::default());
        let b = contract(b"b", ContractSpending::default());
        // A corrupted chain pointing in a circle
        state.record_renewal(&a.id, &b.id);
        state.record_renewal(&b.id, &a.id);
        state.old_contracts.insert(a.id.clone(), a.clone());
        state.old_contracts.insert(b.id.clone(), b.clone());
        let state = RwLock::new(state);

        // Must terminate
        let estimate = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &a,
            &ContractorConfig::default(),
        )
        .await
        .unwrap();
        assert!(!estimate.is_zero());
    }

    #[tokio::test]
    async fn test_zero_upload_price_skips_division() {
        let settings = HostSettings {
            storage_price: Currency::from(1u64),
            // Free uploads
            upload_price: Currency::zero(),
            ..Default::default()
        };
        let hdb = directory_with_host(settings);
        let tpool = ConfigurableTransactionPool::new(Currency::zero(), Currency::zero());
        let state = RwLock::new(state_with_renter());

        let mut metadata = contract(
            b"c1",
            ContractSpending {
                uploads: Currency::from(3u64),
                ..Default::default()
            },
        );
        metadata.revision.filesize = 10;

        // The upload estimate equals the spent upload budget: 3 bytes
        // stored for 1000 blocks at price 1, plus 10 stored bytes for
        // the same, plus the spend itself, taxed, padded and floored
        let estimate = estimate_renew_funding(
            &hdb,
            &tpool,
            &state,
            &metadata,
            &ContractorConfig::default(),
        )
        .await
        .unwrap();
        assert!(estimate >= minimum_funding(&allowance()));
    }
}
