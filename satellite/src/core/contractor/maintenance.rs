use super::{
    renew::{classify, RenewAction},
    Contractor,
};
use crate::core::{error::ContractorError, gouging::check_form_gouging, selector};
use log::{debug, info, trace, warn};
use metrics::gauge;
use orbit_common::{
    account::Renter,
    block::BlockHeight,
    contract::{ContractId, ContractMetadata, Utility},
    crypto::PublicKey,
    currency::Currency,
};
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::Ordering,
};

impl Contractor {
    // One maintenance pass over all renters and contracts.
    //
    // Skips silently when consensus is still syncing or another pass
    // holds the maintenance lock. The pass yields between steps when a
    // caller requests an interruption.
    pub async fn run_maintenance(&self) -> Result<(), ContractorError> {
        self.check_stopped()?;
        if !self.consensus.synced().await {
            debug!("skipping maintenance, consensus is not synced");
            return Ok(());
        }
        let _guard = match self.maintenance_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("skipping maintenance, another pass is running");
                return Ok(());
            }
        };
        trace!("starting maintenance pass");

        let height = self.consensus.height().await;
        {
            let mut state = self.state.write().await;
            state.block_height = height;
        }
        self.roll_periods(height).await;

        if self.maintenance_checkpoint()? {
            return Ok(());
        }
        self.archive_expired_contracts(height).await;

        if self.maintenance_checkpoint()? {
            return Ok(());
        }
        self.check_for_duplicates().await;

        if self.maintenance_checkpoint()? {
            return Ok(());
        }
        self.rebuild_pub_keys().await;
        self.prune_ip_violations().await?;

        if self.maintenance_checkpoint()? {
            return Ok(());
        }
        let all_contracts = self.contracts.metadata().await;
        if let Err(e) = self.hdb.update_contracts(all_contracts).await {
            warn!("failed to push the contract view to the directory: {}", e);
        }

        if self.maintenance_checkpoint()? {
            return Ok(());
        }
        self.update_utilities(height).await?;
        self.reset_failed_renews(height).await;

        gauge!("satellite_live_contracts").set(self.contracts.len() as f64);
        trace!("maintenance pass finished");
        Ok(())
    }

    // Err on shutdown, true when an interruption was requested and
    // acknowledged, false to keep going.
    pub(crate) fn maintenance_checkpoint(&self) -> Result<bool, ContractorError> {
        self.check_stopped()?;
        if self.interrupt_requested.swap(false, Ordering::SeqCst) {
            debug!("maintenance pass interrupted");
            self.interrupt_ack.notify_waiters();
            return Ok(true);
        }
        Ok(false)
    }

    // Advance the billing cycle of every renter whose period elapsed
    async fn roll_periods(&self, height: BlockHeight) {
        let rolled: Vec<Renter> = {
            let mut state = self.state.write().await;
            let mut rolled = Vec::new();
            for renter in state.renters.values_mut() {
                if !renter.allowance.is_set() {
                    continue;
                }
                let mut changed = false;
                while height >= renter.current_period + renter.allowance.period {
                    renter.current_period += renter.allowance.period;
                    changed = true;
                }
                if changed {
                    rolled.push(renter.clone());
                }
            }
            rolled
        };
        for renter in rolled {
            debug!(
                "renter {} entered a new period at height {}",
                renter.public_key, renter.current_period
            );
            if let Err(e) = self.store.update_renter(&renter).await {
                warn!("failed to persist renter {}: {}", renter.email, e);
            }
        }
    }

    // Move contracts past their end height into the archive
    async fn archive_expired_contracts(&self, height: BlockHeight) {
        let expired: Vec<ContractMetadata> = self
            .contracts
            .metadata()
            .await
            .into_iter()
            .filter(|metadata| metadata.is_expired(height))
            .collect();

        for metadata in expired {
            info!("contract {} expired at height {}", metadata.id, height);
            self.contracts.delete(&metadata.id).await;
            self.watchdog.stop_monitoring(&metadata.id);
            {
                let mut state = self.state.write().await;
                state
                    .old_contracts
                    .insert(metadata.id.clone(), metadata.clone());
            }
            if let Err(e) = self.store.archive_contract(&metadata).await {
                warn!("failed to archive contract {}: {}", metadata.id, e);
            }
            if let Err(e) = self.store.remove_contract(&metadata.id).await {
                warn!("failed to remove contract {}: {}", metadata.id, e);
            }
        }
    }

    // Enforce one live contract per (renter, host) pair. The contract
    // with the greater start height survives, the other is archived and
    // linked to the survivor like a renewal.
    pub(crate) async fn check_for_duplicates(&self) {
        let mut by_pair: HashMap<(PublicKey, PublicKey), ContractMetadata> = HashMap::new();
        let mut losers: Vec<(ContractMetadata, ContractId)> = Vec::new();

        for metadata in self.contracts.metadata().await {
            let key = metadata.key_pair();
            match by_pair.get(&key) {
                Some(existing) => {
                    // Keep the younger contract
                    let (winner, loser) = if existing.start_height >= metadata.start_height {
                        (existing.clone(), metadata)
                    } else {
                        let loser = existing.clone();
                        by_pair.insert(key, metadata.clone());
                        (metadata, loser)
                    };
                    losers.push((loser, winner.id.clone()));
                }
                None => {
                    by_pair.insert(key, metadata);
                }
            }
        }

        for (loser, winner_id) in losers {
            warn!(
                "duplicate contract {} superseded by {}, archiving",
                loser.id, winner_id
            );
            self.contracts.delete(&loser.id).await;
            self.watchdog.stop_monitoring(&loser.id);
            {
                let mut state = self.state.write().await;
                state.record_renewal(&loser.id, &winner_id);
                state.old_contracts.insert(loser.id.clone(), loser.clone());
            }
            if let Err(e) = self.store.add_renewal(&loser.id, &winner_id).await {
                warn!("failed to persist lineage of {}: {}", loser.id, e);
            }
            if let Err(e) = self.store.archive_contract(&loser).await {
                warn!("failed to archive contract {}: {}", loser.id, e);
            }
            if let Err(e) = self.store.remove_contract(&loser.id).await {
                warn!("failed to remove contract {}: {}", loser.id, e);
            }
        }
    }

    // Rebuild the (renter, host) index from the live set
    async fn rebuild_pub_keys(&self) {
        let live = self.contracts.metadata().await;
        let mut state = self.state.write().await;
        state.pub_keys_to_contract_id.clear();
        for metadata in live {
            state
                .pub_keys_to_contract_id
                .insert(metadata.key_pair(), metadata.id.clone());
        }
    }

    // Cancel contracts with hosts the directory flags for IP range
    // violations. Locked contracts are already out of rotation and are
    // left alone.
    async fn prune_ip_violations(&self) -> Result<(), ContractorError> {
        let live = self.contracts.metadata().await;
        let keys: Vec<PublicKey> = live
            .iter()
            .map(|metadata| metadata.host_public_key.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let violations: HashSet<PublicKey> = self
            .hdb
            .check_for_ip_violations(&keys)
            .await?
            .into_iter()
            .collect();
        if violations.is_empty() {
            return Ok(());
        }

        for metadata in live {
            if metadata.utility.locked || !violations.contains(&metadata.host_public_key) {
                continue;
            }
            info!(
                "cancelling contract {}, host {} violates the IP range policy",
                metadata.id, metadata.host_public_key
            );
            self.mark_contract_bad(&metadata.id).await;
        }
        Ok(())
    }

    // Re-check the utility of every live contract against the directory
    // and cap the number of upload contracts per renter at its host
    // count, demoting the lowest scoring surplus.
    async fn update_utilities(&self, _height: BlockHeight) -> Result<(), ContractorError> {
        let renters: Vec<Renter> = {
            let state = self.state.read().await;
            state.renters.values().cloned().collect()
        };

        for renter in renters {
            if !renter.allowance.is_set() {
                continue;
            }
            let min_scores = selector::min_scores(&*self.hdb, &renter.allowance).await?;
            let contracts = self.contracts_by_renter(&renter.public_key).await;

            // Per contract utility checks
            let mut scored: Vec<(ContractMetadata, Currency)> = Vec::new();
            for mut metadata in contracts {
                if metadata.utility.locked {
                    continue;
                }
                let old_utility = metadata.utility;
                let mut score = None;

                match self.hdb.host(&metadata.host_public_key).await? {
                    None => {
                        debug!(
                            "host of contract {} is gone, dropping its utility",
                            metadata.id
                        );
                        metadata.utility.good_for_upload = false;
                        metadata.utility.good_for_renew = false;
                    }
                    Some(host) if host.filtered => {
                        debug!(
                            "host of contract {} is filtered, dropping its utility",
                            metadata.id
                        );
                        metadata.utility.good_for_upload = false;
                        metadata.utility.good_for_renew = false;
                    }
                    Some(host) => {
                        if let Err(reason) =
                            check_form_gouging(&renter.allowance, &host.settings)
                        {
                            debug!(
                                "host of contract {} is gouging, no more uploads: {}",
                                metadata.id, reason
                            );
                            metadata.utility.demote_upload();
                        }
                        let host_score = self.hdb.score_breakdown(&host).await?;
                        if let Some(min) = min_scores {
                            if host_score < min.good_for_renew {
                                metadata.utility.good_for_upload = false;
                                metadata.utility.good_for_renew = false;
                            } else if host_score < min.good_for_upload {
                                metadata.utility.demote_upload();
                            }
                        }
                        score = Some(host_score);
                    }
                }

                if metadata.utility != old_utility {
                    self.apply_utility(&metadata, metadata.utility).await;
                }
                if let Some(score) = score {
                    scored.push((metadata, score));
                }
            }

            // Cap the upload contracts at the wanted host count
            let mut upload_contracts: Vec<(ContractMetadata, Currency)> = scored
                .into_iter()
                .filter(|(metadata, _)| {
                    metadata.utility.good_for_upload && !metadata.utility.locked
                })
                .collect();
            if upload_contracts.len() as u64 > renter.allowance.hosts {
                upload_contracts.sort_by(|a, b| a.1.cmp(&b.1));
                let surplus = upload_contracts.len() as u64 - renter.allowance.hosts;
                for (metadata, _) in upload_contracts.iter().take(surplus as usize) {
                    debug!(
                        "demoting surplus upload contract {} of renter {}",
                        metadata.id, renter.public_key
                    );
                    let mut utility = metadata.utility;
                    utility.demote_upload();
                    self.apply_utility(metadata, utility).await;
                }
            }
        }
        Ok(())
    }

    async fn apply_utility(&self, metadata: &ContractMetadata, utility: Utility) {
        let updated = match self.contracts.acquire(&metadata.id).await {
            Some(mut contract) => {
                contract.metadata.utility = utility;
                contract.metadata.clone()
            }
            None => return,
        };
        if let Err(e) = self.store.update_contract(&updated).await {
            warn!("failed to persist contract {}: {}", updated.id, e);
        }
    }

    // Forget failure counts of contracts that are no longer up for
    // renewal or refresh
    async fn reset_failed_renews(&self, height: BlockHeight) {
        let live = self.contracts.metadata().await;
        let mut eligible: HashSet<ContractId> = HashSet::new();
        {
            let state = self.state.read().await;
            for metadata in &live {
                let renter = match state.renters.get(&metadata.renter_public_key) {
                    Some(renter) => renter,
                    None => continue,
                };
                // The classifier needs host settings only for the fund
                // based refresh check, defaults keep the time based
                // decision intact
                let action = classify(metadata, &Default::default(), &renter.allowance, height);
                if action != RenewAction::Keep {
                    eligible.insert(metadata.id.clone());
                }
            }
        }
        let mut state = self.state.write().await;
        state
            .num_failed_renews
            .retain(|id, _| eligible.contains(id));
    }
}
