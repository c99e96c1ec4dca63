use super::Contractor;
use crate::{
    config::{
        FILE_CONTRACT_TRANSACTION_SET_SIZE, MIN_CONTRACT_FUND_RENEWAL_THRESHOLD_DEN,
        MIN_CONTRACT_FUND_RENEWAL_THRESHOLD_NUM, MIN_SECTOR_PRICE_MULTIPLIER,
    },
    core::{
        error::ContractorError,
        funding::{estimate_renew_funding, minimum_funding},
        watchdog::MonitorContractArgs,
    },
};
use log::{debug, info, warn};
use metrics::counter;
use orbit_common::{
    account::{Allowance, Renter},
    block::BlockHeight,
    config::SECTOR_SIZE,
    contract::{ContractId, ContractMetadata},
    crypto::PublicKey,
    currency::Currency,
    host::{HostEntry, HostSettings},
    transaction::Transaction,
};

// What the renew classifier decided for a contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RenewAction {
    // Nothing to do this pass
    Keep,
    // The renew window has been entered, extend the term
    Renew,
    // The contract is running out of funds before running out of time,
    // renew early with the given amount
    Refresh(Currency),
}

// Cost of uploading one more sector and keeping it for a full period
fn sector_price(settings: &HostSettings, period: BlockHeight) -> Currency {
    settings.base_rpc_price
        + settings.sector_access_price
        + settings.upload_price.mul_u64(SECTOR_SIZE)
        + settings.storage_price.mul_u64(SECTOR_SIZE).mul_u64(period)
}

pub(crate) fn classify(
    metadata: &ContractMetadata,
    settings: &HostSettings,
    allowance: &Allowance,
    height: BlockHeight,
) -> RenewAction {
    if metadata.utility.locked || !metadata.utility.good_for_renew {
        return RenewAction::Keep;
    }

    // Time based renewal has priority over fund based refreshing
    if height + allowance.renew_window >= metadata.end_height {
        return RenewAction::Renew;
    }

    let min_funds = sector_price(settings, allowance.period).mul_u64(MIN_SECTOR_PRICE_MULTIPLIER);
    let below_ratio = metadata
        .renter_funds
        .mul_u64(MIN_CONTRACT_FUND_RENEWAL_THRESHOLD_DEN)
        < metadata
            .total_cost
            .mul_u64(MIN_CONTRACT_FUND_RENEWAL_THRESHOLD_NUM);
    if metadata.renter_funds < min_funds || below_ratio {
        let amount = metadata
            .total_cost
            .mul_u64(2)
            .max(minimum_funding(allowance));
        return RenewAction::Refresh(amount);
    }

    RenewAction::Keep
}

impl Contractor {
    // Renew or refresh the given contracts of a renter. Contracts inside
    // the renew window are processed before contracts that merely ran
    // low on funds, in the order their ids were passed in.
    //
    // Returns the live contracts of the renter after the pass.
    pub async fn renew_contracts(
        &self,
        renter_key: &PublicKey,
        ids: &[ContractId],
    ) -> Result<Vec<ContractMetadata>, ContractorError> {
        self.check_stopped()?;
        if !self.consensus.synced().await {
            return Err(ContractorError::NotSynced);
        }
        let height = self.consensus.height().await;

        let renter = self.renter(renter_key).await?;
        let allowance = renter.allowance.clone();
        if !allowance.is_set() {
            return Err(ContractorError::InsufficientAllowance);
        }

        // Classify in input order
        let mut renew_set: Vec<(ContractMetadata, HostEntry)> = Vec::new();
        let mut refresh_set: Vec<(ContractMetadata, HostEntry, Currency)> = Vec::new();
        for id in ids {
            let metadata = match self.contracts.view(id).await {
                Some(metadata) => metadata,
                None => {
                    debug!("skipping unknown contract {}", id);
                    continue;
                }
            };
            if metadata.renter_public_key != *renter_key {
                warn!("contract {} does not belong to renter {}", id, renter_key);
                continue;
            }
            let host = match self.hdb.host(&metadata.host_public_key).await? {
                Some(host) => host,
                None => {
                    debug!(
                        "host {} of contract {} is gone from the directory",
                        metadata.host_public_key, id
                    );
                    continue;
                }
            };
            match classify(&metadata, &host.settings, &allowance, height) {
                RenewAction::Keep => {}
                RenewAction::Renew => renew_set.push((metadata, host)),
                RenewAction::Refresh(amount) => refresh_set.push((metadata, host, amount)),
            }
        }
        debug!(
            "renter {}: {} to renew, {} to refresh",
            renter_key,
            renew_set.len(),
            refresh_set.len()
        );

        let (min_fee, _) = self.tpool.fee_estimation().await?;
        let txn_fee = min_fee.mul_u64(FILE_CONTRACT_TRANSACTION_SET_SIZE);
        let mut funds_remaining = self.period_spending(renter_key).await?.funds_remaining;
        let mut low_funds = false;

        for (metadata, host) in renew_set {
            self.check_stopped()?;
            let amount = match estimate_renew_funding(
                &*self.hdb,
                &*self.tpool,
                &self.state,
                &metadata,
                &self.config,
            )
            .await
            {
                Ok(amount) => amount,
                Err(e) => {
                    debug!("cannot estimate renewal of contract {}: {}", metadata.id, e);
                    continue;
                }
            };
            if amount > funds_remaining {
                warn!(
                    "allowance of renter {} cannot cover renewing contract {}",
                    renter_key, metadata.id
                );
                low_funds = true;
                continue;
            }
            // A renewal extends the term by one more period
            let end_height = metadata.end_height + allowance.period;
            self.managed_renew(
                &renter,
                &metadata,
                &host,
                amount,
                height,
                end_height,
                txn_fee,
                &mut funds_remaining,
            )
            .await?;
        }

        for (metadata, host, amount) in refresh_set {
            self.check_stopped()?;
            if amount > funds_remaining {
                warn!(
                    "allowance of renter {} cannot cover refreshing contract {}",
                    renter_key, metadata.id
                );
                low_funds = true;
                continue;
            }
            // A refresh only tops up the funds, the term stays
            let end_height = metadata.end_height;
            self.managed_renew(
                &renter,
                &metadata,
                &host,
                amount,
                height,
                end_height,
                txn_fee,
                &mut funds_remaining,
            )
            .await?;
        }

        self.update_low_funds_alert(renter_key, low_funds);
        Ok(self.contracts_by_renter(renter_key).await)
    }

    // Renew one contract and perform the bookkeeping of a successful
    // renewal: lock the old contract, record the lineage, archive the
    // old metadata, persist everything, drop the old contract from the
    // live set and have the watchdog broadcast its final revision.
    //
    // Host induced failures feed the consecutive failure counter and
    // only bubble up the errors that must abort the whole batch.
    async fn managed_renew(
        &self,
        renter: &Renter,
        old_metadata: &ContractMetadata,
        host: &HostEntry,
        amount: Currency,
        height: BlockHeight,
        end_height: BlockHeight,
        txn_fee: Currency,
        funds_remaining: &mut Currency,
    ) -> Result<(), ContractorError> {
        let result = self
            .negotiator
            .renew_contract(
                renter,
                &old_metadata.id,
                amount,
                height,
                end_height,
                txn_fee,
                host,
            )
            .await;

        let (new_metadata, txn_set, sweep) = match result {
            Ok(renewed) => renewed,
            Err(e @ ContractorError::Stopped)
            | Err(e @ ContractorError::WalletLocked)
            | Err(e @ ContractorError::Wallet(_))
            | Err(e @ ContractorError::NotSynced) => return Err(e),
            Err(e) => {
                self.record_renew_failure(renter, old_metadata, height, &e).await;
                return Ok(());
            }
        };

        // The old contract is done, lock it and remember its final state
        let old_contract = match self.contracts.acquire(&old_metadata.id).await {
            Some(mut contract) => {
                contract.metadata.utility.lock();
                contract.clone()
            }
            None => {
                warn!(
                    "contract {} vanished while being renewed",
                    old_metadata.id
                );
                return Ok(());
            }
        };

        {
            let mut state = self.state.write().await;
            state.record_renewal(&old_metadata.id, &new_metadata.id);
            state
                .old_contracts
                .insert(old_contract.metadata.id.clone(), old_contract.metadata.clone());
            state
                .pub_keys_to_contract_id
                .insert(new_metadata.key_pair(), new_metadata.id.clone());
            state.num_failed_renews.remove(&old_metadata.id);
        }

        // Archiving and persisting are not atomic. A crash in between is
        // repaired on boot, when the first maintenance pass replays
        // duplicate detection over the loaded contracts.
        if let Err(e) = self.store.add_renewal(&old_metadata.id, &new_metadata.id).await {
            warn!("failed to persist renewal of {}: {}", old_metadata.id, e);
        }
        if let Err(e) = self.store.archive_contract(&old_contract.metadata).await {
            warn!("failed to archive contract {}: {}", old_metadata.id, e);
        }
        if let Err(e) = self.store.update_contract(&new_metadata).await {
            warn!("failed to persist contract {}: {}", new_metadata.id, e);
        }
        if let Err(e) = self.store.remove_contract(&old_metadata.id).await {
            warn!("failed to remove contract {}: {}", old_metadata.id, e);
        }

        self.contracts.delete(&old_metadata.id).await;

        let revision_txn = txn_set.last().cloned().unwrap_or_else(Transaction::default);
        self.tpool.broadcast(txn_set.clone()).await?;
        self.watchdog.monitor_contract(MonitorContractArgs {
            id: new_metadata.id.clone(),
            formation_set: txn_set,
            sweep,
            revision_txn,
            start_height: height,
        });

        // Get the last known revision of the old contract on chain
        if let Err(e) = self.watchdog.send_most_recent_revision(&old_contract).await {
            warn!(
                "failed to broadcast final revision of {}: {}",
                old_metadata.id, e
            );
        }
        self.watchdog.stop_monitoring(&old_metadata.id);

        *funds_remaining = funds_remaining.saturating_sub(&new_metadata.total_cost);
        counter!("satellite_contracts_renewed_total").increment(1);
        info!(
            "renewed contract {} into {} for renter {}",
            old_metadata.id, new_metadata.id, renter.public_key
        );
        Ok(())
    }

    // Track a failed renewal. A contract that keeps failing through the
    // second half of its renew window is locked for good, it simply runs
    // out its remaining term on chain.
    async fn record_renew_failure(
        &self,
        renter: &Renter,
        metadata: &ContractMetadata,
        height: BlockHeight,
        error: &ContractorError,
    ) {
        if !error.is_host_fault() {
            debug!("failed to renew contract {}: {}", metadata.id, error);
            return;
        }

        let failures = {
            let mut state = self.state.write().await;
            let count = state
                .num_failed_renews
                .entry(metadata.id.clone())
                .or_insert(0);
            *count += 1;
            *count
        };
        warn!(
            "host {} failed to renew contract {} ({} consecutive failures): {}",
            metadata.host_public_key, metadata.id, failures, error
        );

        let second_half =
            height + renter.allowance.renew_window / 2 >= metadata.end_height;
        if failures > 1
            && second_half
            && failures >= self.config.consecutive_renewals_before_replacement
        {
            warn!(
                "giving up on renewing contract {}, it will run out its term",
                metadata.id
            );
            self.mark_contract_bad(&metadata.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_common::contract::{ContractRevision, ContractSpending, Utility};
    use orbit_common::crypto::hash;

    fn metadata(renter_funds: u64, total_cost: u64, end_height: BlockHeight) -> ContractMetadata {
        ContractMetadata {
            id: ContractId(hash(b"contract")),
            renter_public_key: PublicKey::zero(),
            host_public_key: PublicKey::zero(),
            start_height: 0,
            end_height,
            total_cost: Currency::from(total_cost),
            renter_funds: Currency::from(renter_funds),
            spending: ContractSpending::default(),
            utility: Utility::active(),
            revision: ContractRevision::default(),
        }
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

    #[test]
    fn test_classify_keeps_healthy_contract() {
        let metadata = metadata(10_000, 10_000, 2000);
        let action = classify(&metadata, &HostSettings::default(), &allowance(), 100);
        assert_eq!(action, RenewAction::Keep);
    }

    #[test]
    fn test_classify_renews_inside_window() {
        let metadata = metadata(10_000, 10_000, 2000);
        // 1900 + 100 >= 2000
        let action = classify(&metadata, &HostSettings::default(), &allowance(), 1900);
        assert_eq!(action, RenewAction::Renew);
    }

    #[test]
    fn test_classify_refreshes_exhausted_contract() {
        // 1% of the funds left at 500 blocks before the end, far outside
        // the renew window
        let metadata = metadata(100, 10_000, 2000);
        let action = classify(&metadata, &HostSettings::default(), &allowance(), 1500);
        let expected = Currency::from(20_000u64).max(minimum_funding(&allowance()));
        assert_eq!(action, RenewAction::Refresh(expected));
    }

    #[test]
    fn test_classify_window_beats_refresh() {
        let metadata = metadata(100, 10_000, 2000);
        let action = classify(&metadata, &HostSettings::default(), &allowance(), 1900);
        assert_eq!(action, RenewAction::Renew);
    }

    #[test]
    fn test_classify_skips_locked_contract() {
        let mut metadata = metadata(100, 10_000, 2000);
        metadata.utility.lock();
        let action = classify(&metadata, &HostSettings::default(), &allowance(), 1900);
        assert_eq!(action, RenewAction::Keep);
    }
}
