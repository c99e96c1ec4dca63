use crate::{
    config::ContractorConfig,
    core::{
        contract_store::{ContractParams, ContractSet, HostTransport},
        error::ContractorError,
        gouging::check_form_gouging,
        providers::WalletProvider,
    },
};
use log::debug;
use orbit_common::{
    account::Renter,
    block::BlockHeight,
    contract::{ContractId, ContractMetadata},
    crypto::{derive_renter_seed, Address},
    currency::Currency,
    host::HostEntry,
    transaction::{Transaction, TransactionSet},
};
use std::sync::Arc;

// Executes the form and renew protocols with a single host.
//
// The negotiator performs all network and wallet I/O of a contract
// operation. Callers must not hold the contractor lock across a call.
pub struct Negotiator {
    contracts: Arc<ContractSet>,
    wallet: Arc<dyn WalletProvider>,
    transport: Arc<dyn HostTransport>,
    config: ContractorConfig,
}

impl Negotiator {
    pub fn new(
        contracts: Arc<ContractSet>,
        wallet: Arc<dyn WalletProvider>,
        transport: Arc<dyn HostTransport>,
        config: ContractorConfig,
    ) -> Self {
        Negotiator {
            contracts,
            wallet,
            transport,
            config,
        }
    }

    // Form a brand new contract with the host. Returns the metadata of
    // the inserted contract, the transaction set to broadcast and the
    // sweep transaction for the watchdog.
    pub async fn form_contract(
        &self,
        renter: &Renter,
        host: &HostEntry,
        funding: Currency,
        height: BlockHeight,
        end_height: BlockHeight,
        txn_fee: Currency,
    ) -> Result<(ContractMetadata, TransactionSet, Transaction), ContractorError> {
        let host = self.check_host(renter, host)?;
        let refund_address = self.wallet.next_address().await?;

        let result = self
            .negotiate(renter, &host, None, funding, height, end_height, txn_fee, &refund_address)
            .await;
        if result.is_err() {
            // The address was never used, hand it back to the wallet
            let _ = self.wallet.mark_address_unused(&refund_address).await;
        }
        result
    }

    // Renew an existing contract. The old contract is acquired for the
    // duration of the exchange and released on every path.
    pub async fn renew_contract(
        &self,
        renter: &Renter,
        old_id: &ContractId,
        funding: Currency,
        height: BlockHeight,
        end_height: BlockHeight,
        txn_fee: Currency,
        host: &HostEntry,
    ) -> Result<(ContractMetadata, TransactionSet, Transaction), ContractorError> {
        let host = self.check_host(renter, host)?;
        let refund_address = self.wallet.next_address().await?;

        let result = self
            .negotiate(
                renter,
                &host,
                Some(old_id),
                funding,
                height,
                end_height,
                txn_fee,
                &refund_address,
            )
            .await;
        if result.is_err() {
            let _ = self.wallet.mark_address_unused(&refund_address).await;
        }
        result
    }

    // Shared prologue: price ceilings, gouging, collateral cap and
    // duration check. Returns the host with its collateral capped.
    fn check_host(
        &self,
        renter: &Renter,
        host: &HostEntry,
    ) -> Result<HostEntry, ContractorError> {
        let mut host = host.clone();
        let settings = &host.settings;

        if settings.storage_price > self.config.max_storage_price {
            return Err(ContractorError::HostTooExpensive);
        }
        check_form_gouging(&renter.allowance, settings).map_err(ContractorError::PriceGouging)?;
        if settings.max_duration < renter.allowance.period {
            return Err(ContractorError::Negotiation(format!(
                "host max duration {} is below the allowance period {}",
                settings.max_duration, renter.allowance.period
            )));
        }

        if host.settings.max_collateral > self.config.max_collateral {
            host.settings.max_collateral = self.config.max_collateral;
        }
        Ok(host)
    }

    async fn negotiate(
        &self,
        renter: &Renter,
        host: &HostEntry,
        old_id: Option<&ContractId>,
        funding: Currency,
        height: BlockHeight,
        end_height: BlockHeight,
        txn_fee: Currency,
        refund_address: &Address,
    ) -> Result<(ContractMetadata, TransactionSet, Transaction), ContractorError> {
        let params = ContractParams {
            renter_public_key: renter.public_key.clone(),
            host: host.clone(),
            funding,
            start_height: height,
            end_height,
            refund_address: refund_address.clone(),
            txn_fee,
        };

        // Derived key material lives only for the duration of this
        // exchange and is zeroed on drop
        let primary_seed = self.wallet.primary_seed().await?;
        let seed = derive_renter_seed(&primary_seed, &renter.email);
        drop(primary_seed);

        let mut builder = self.wallet.start_transaction().await?;
        let result = match old_id {
            Some(old_id) => {
                let old_contract = match self.contracts.acquire(old_id).await {
                    Some(contract) => contract,
                    None => {
                        builder.discard().await;
                        return Err(ContractorError::ContractNotFound(old_id.clone()));
                    }
                };
                if old_contract.metadata.is_expired(height) {
                    drop(old_contract);
                    builder.discard().await;
                    return Err(ContractorError::ContractEnded);
                }
                if !old_contract.metadata.utility.good_for_renew {
                    // Release the handle before bailing out
                    drop(old_contract);
                    builder.discard().await;
                    return Err(ContractorError::ContractNotGoodForRenew);
                }
                self.contracts
                    .renew_contract(&old_contract, &params, seed, &mut builder, &*self.transport)
                    .await
            }
            None => {
                self.contracts
                    .form_contract(&params, seed, &mut builder, &*self.transport)
                    .await
            }
        };

        match result {
            Ok(output) => Ok(output),
            Err(e) => {
                debug!("negotiation with host {} failed: {}", host.public_key, e);
                // Release the reserved outputs
                builder.discard().await;
                Err(e)
            }
        }
    }
}
