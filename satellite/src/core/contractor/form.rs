use super::Contractor;
use crate::{
    config::{
        CONTRACT_FEE_FUNDING_MUL_FACTOR, FILE_CONTRACT_TRANSACTION_SET_SIZE,
        MAX_INITIAL_CONTRACT_FUNDING_DIV_FACTOR, MAX_INITIAL_CONTRACT_FUNDING_MUL_FACTOR,
        MIN_INITIAL_CONTRACT_FUNDING_DIV_FACTOR,
    },
    core::{
        error::ContractorError,
        providers::{Alert, AlertId, AlertSeverity},
        selector,
        watchdog::MonitorContractArgs,
    },
};
use log::{debug, info, warn};
use metrics::counter;
use orbit_common::{contract::ContractMetadata, crypto::PublicKey, transaction::Transaction};
use std::collections::HashSet;

impl Contractor {
    // Form enough contracts to give the renter its target number of
    // usable hosts. Returns the contracts that are good for upload.
    //
    // Hosts the renter already has any contract with are excluded, as
    // are hosts sharing an IP range with an active contract. Failures
    // with individual hosts are logged and the batch moves on, wallet
    // and consensus failures abort the batch.
    pub async fn form_contracts(
        &self,
        renter_key: &PublicKey,
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

        let renter_contracts = self.contracts_by_renter(renter_key).await;
        let good_for_upload: Vec<ContractMetadata> = renter_contracts
            .iter()
            .filter(|metadata| metadata.utility.good_for_upload && !metadata.utility.locked)
            .cloned()
            .collect();

        let needed = allowance
            .hosts
            .saturating_sub(good_for_upload.len() as u64);
        if needed == 0 {
            return Ok(good_for_upload);
        }
        debug!(
            "renter {} needs {} more contracts",
            renter_key, needed
        );

        // Every host this renter has ever contracted with is off limits,
        // hosts with an active contract also block their IP range
        let mut blacklist: HashSet<PublicKey> = renter_contracts
            .iter()
            .map(|metadata| metadata.host_public_key.clone())
            .collect();
        {
            let state = self.state.read().await;
            for metadata in state.old_contracts.values() {
                if metadata.renter_public_key == *renter_key {
                    blacklist.insert(metadata.host_public_key.clone());
                }
            }
        }
        let address_blacklist: Vec<PublicKey> = renter_contracts
            .iter()
            .filter(|metadata| !metadata.utility.locked)
            .map(|metadata| metadata.host_public_key.clone())
            .collect();
        let blacklist: Vec<PublicKey> = blacklist.into_iter().collect();

        let candidates = selector::candidate_hosts(
            &*self.hdb,
            &allowance,
            needed,
            &blacklist,
            &address_blacklist,
        )
        .await?;

        let (min_fee, _) = self.tpool.fee_estimation().await?;
        let txn_fee = min_fee.mul_u64(FILE_CONTRACT_TRANSACTION_SET_SIZE);

        let mut funds_remaining = self.period_spending(renter_key).await?.funds_remaining;
        let end_height = renter.current_period + allowance.period;

        let share = allowance.funds.div_u64(allowance.hosts);
        let min_initial = share.div_u64(MIN_INITIAL_CONTRACT_FUNDING_DIV_FACTOR);
        let max_initial = share.mul_frac(
            MAX_INITIAL_CONTRACT_FUNDING_MUL_FACTOR,
            MAX_INITIAL_CONTRACT_FUNDING_DIV_FACTOR,
        );

        let mut formed = 0u64;
        let mut low_funds = false;
        for host in candidates {
            if formed >= needed {
                break;
            }
            self.check_stopped()?;

            let mut funds = (host.settings.contract_price + txn_fee)
                .mul_u64(CONTRACT_FEE_FUNDING_MUL_FACTOR);
            if funds < min_initial {
                funds = min_initial;
            }
            if funds > max_initial {
                funds = max_initial;
            }

            if !self.wallet.unlocked().await? {
                return Err(ContractorError::WalletLocked);
            }
            if funds_remaining < funds {
                warn!(
                    "allowance of renter {} ran out while forming contracts",
                    renter_key
                );
                low_funds = true;
                break;
            }

            let (metadata, txn_set, sweep) = match self
                .negotiator
                .form_contract(&renter, &host, funds, height, end_height, txn_fee)
                .await
            {
                Ok(negotiated) => negotiated,
                Err(e @ ContractorError::Stopped)
                | Err(e @ ContractorError::WalletLocked)
                | Err(e @ ContractorError::Wallet(_))
                | Err(e @ ContractorError::NotSynced) => return Err(e),
                Err(e) => {
                    debug!(
                        "could not form a contract with host {}: {}",
                        host.public_key, e
                    );
                    continue;
                }
            };

            // One live contract per (renter, host). Losing the race means
            // the funds were committed on chain regardless, so they stay
            // in the accounting even though the transaction is dropped.
            let duplicate = {
                let mut state = self.state.write().await;
                let key = metadata.key_pair();
                if state.pub_keys_to_contract_id.contains_key(&key) {
                    state
                        .old_contracts
                        .insert(metadata.id.clone(), metadata.clone());
                    true
                } else {
                    state
                        .pub_keys_to_contract_id
                        .insert(key, metadata.id.clone());
                    false
                }
            };
            if duplicate {
                warn!(
                    "renter {} already has a contract with host {}, dropping the new transaction",
                    renter_key, host.public_key
                );
                self.contracts.delete(&metadata.id).await;
                if let Err(e) = self.store.archive_contract(&metadata).await {
                    warn!("failed to archive contract {}: {}", metadata.id, e);
                }
                funds_remaining = funds_remaining.saturating_sub(&metadata.total_cost);
                continue;
            }

            let revision_txn = txn_set.last().cloned().unwrap_or_else(Transaction::default);
            self.tpool.broadcast(txn_set.clone()).await?;
            self.watchdog.monitor_contract(MonitorContractArgs {
                id: metadata.id.clone(),
                formation_set: txn_set,
                sweep,
                revision_txn,
                start_height: height,
            });
            if let Err(e) = self.store.update_contract(&metadata).await {
                warn!("failed to persist contract {}: {}", metadata.id, e);
            }

            funds_remaining = funds_remaining.saturating_sub(&metadata.total_cost);
            formed += 1;
            counter!("satellite_contracts_formed_total").increment(1);
            info!(
                "formed contract {} with host {} for renter {}",
                metadata.id, host.public_key, renter_key
            );
        }

        if formed < needed && !low_funds {
            debug!(
                "formed {} of {} wanted contracts for renter {}",
                formed, needed, renter_key
            );
        }
        self.update_low_funds_alert(renter_key, low_funds);

        Ok(self
            .contracts_by_renter(renter_key)
            .await
            .into_iter()
            .filter(|metadata| metadata.utility.good_for_upload && !metadata.utility.locked)
            .collect())
    }

    // Keep exactly one persistent low funds alert per renter: raised
    // when a batch hits the allowance limit, cleared by the first batch
    // that does not.
    pub(crate) fn update_low_funds_alert(&self, renter_key: &PublicKey, low_funds: bool) {
        let id = AlertId::RenterLowFunds(renter_key.clone());
        if low_funds {
            self.alerter.register_alert(Alert {
                id,
                message: format!(
                    "allowance of renter {} is too low to maintain its contracts",
                    renter_key
                ),
                severity: AlertSeverity::Warning,
            });
        } else {
            self.alerter.unregister_alert(&id);
        }
    }
}
