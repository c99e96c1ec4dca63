mod form;
mod maintenance;
mod renew;

use crate::{
    config::ContractorConfig,
    core::{
        contract_store::{ContractSet, FileContract, HostTransport},
        error::ContractorError,
        negotiator::Negotiator,
        providers::{
            Alerter, ConsensusProvider, HostDirectory, RenterStore, TransactionPool,
            WalletProvider,
        },
        watchdog::Watchdog,
    },
};
use log::{debug, error, trace, warn};
use orbit_common::{
    account::{Allowance, PeriodSpending, Renter},
    block::BlockHeight,
    contract::{ContractId, ContractMetadata},
    crypto::PublicKey,
    transaction::Transaction,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::{
    select,
    sync::{mpsc, watch, Mutex, Notify, RwLock},
    task::JoinHandle,
};

// In-memory bookkeeping of the contractor. Everything in here is guarded
// by one coarse reader/writer lock: lineage updates have to become
// visible atomically with archive insertion. The lock is held for short
// sections only and never across network or wallet I/O.
pub(crate) struct ContractorState {
    pub renters: HashMap<PublicKey, Renter>,

    // Renewal lineage, per (renter, host) chain
    pub renewed_from: HashMap<ContractId, ContractId>,
    pub renewed_to: HashMap<ContractId, ContractId>,

    // Superseded contracts, indexed by id
    pub old_contracts: HashMap<ContractId, ContractMetadata>,

    // The live contract of each (renter, host) pair
    pub pub_keys_to_contract_id: HashMap<(PublicKey, PublicKey), ContractId>,

    // Consecutive failed renewals per contract
    pub num_failed_renews: HashMap<ContractId, u64>,

    // Contracts whose funding inputs were double spent, by the height
    // the double spend was observed at
    pub double_spent: HashMap<ContractId, BlockHeight>,

    pub block_height: BlockHeight,
}

impl ContractorState {
    pub(crate) fn new() -> Self {
        ContractorState {
            renters: HashMap::new(),
            renewed_from: HashMap::new(),
            renewed_to: HashMap::new(),
            old_contracts: HashMap::new(),
            pub_keys_to_contract_id: HashMap::new(),
            num_failed_renews: HashMap::new(),
            double_spent: HashMap::new(),
            block_height: 0,
        }
    }

    // Link a superseded contract to its successor
    pub(crate) fn record_renewal(&mut self, old_id: &ContractId, new_id: &ContractId) {
        self.renewed_from.insert(new_id.clone(), old_id.clone());
        self.renewed_to.insert(old_id.clone(), new_id.clone());
    }
}

// Forms, renews and refreshes the contracts of every tracked renter.
//
// The contractor owns the live contract set and the renewal lineage. It
// is driven by a periodic maintenance task plus the explicit entry
// points form_contracts and renew_contracts, which may run concurrently
// with maintenance and with each other.
pub struct Contractor {
    pub(crate) state: RwLock<ContractorState>,
    pub(crate) contracts: Arc<ContractSet>,
    pub(crate) watchdog: Arc<Watchdog>,
    pub(crate) negotiator: Negotiator,

    pub(crate) hdb: Arc<dyn HostDirectory>,
    pub(crate) wallet: Arc<dyn WalletProvider>,
    pub(crate) tpool: Arc<dyn TransactionPool>,
    pub(crate) consensus: Arc<dyn ConsensusProvider>,
    pub(crate) store: Arc<dyn RenterStore>,
    pub(crate) alerter: Arc<dyn Alerter>,

    pub(crate) config: ContractorConfig,

    // At most one maintenance pass runs at a time
    pub(crate) maintenance_lock: Mutex<()>,
    // Cooperative interruption of a running maintenance pass
    pub(crate) interrupt_requested: AtomicBool,
    pub(crate) interrupt_ack: Notify,

    stop_tx: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    notify_rx: StdMutex<Option<mpsc::UnboundedReceiver<(ContractId, BlockHeight)>>>,
}

impl Contractor {
    // Build a contractor, restoring renters, contracts and lineage from
    // the persistent store. Duplicate detection is replayed by the first
    // maintenance pass, which also repairs any lineage entry orphaned by
    // an earlier crash between archiving and persisting.
    pub async fn new(
        hdb: Arc<dyn HostDirectory>,
        wallet: Arc<dyn WalletProvider>,
        tpool: Arc<dyn TransactionPool>,
        consensus: Arc<dyn ConsensusProvider>,
        store: Arc<dyn RenterStore>,
        alerter: Arc<dyn Alerter>,
        transport: Arc<dyn HostTransport>,
        config: ContractorConfig,
    ) -> Result<Arc<Self>, ContractorError> {
        let contracts = Arc::new(ContractSet::new());
        let mut state = ContractorState::new();

        for renter in store.renters().await? {
            state.renters.insert(renter.public_key.clone(), renter);
        }
        for metadata in store.contracts().await? {
            state
                .pub_keys_to_contract_id
                .insert(metadata.key_pair(), metadata.id.clone());
            contracts.insert(FileContract {
                metadata,
                revision_txn: Transaction::default(),
            });
        }
        for (old_id, new_id) in store.renewals().await? {
            state.record_renewal(&old_id, &new_id);
        }
        for metadata in store.archived_contracts().await? {
            state.old_contracts.insert(metadata.id.clone(), metadata);
        }
        debug!(
            "loaded {} renters, {} contracts, {} archived",
            state.renters.len(),
            contracts.len(),
            state.old_contracts.len()
        );

        let (watchdog, notify_rx) = Watchdog::new(tpool.clone());
        let negotiator = Negotiator::new(
            contracts.clone(),
            wallet.clone(),
            transport,
            config.clone(),
        );
        let (stop_tx, _) = watch::channel(false);

        Ok(Arc::new(Contractor {
            state: RwLock::new(state),
            contracts,
            watchdog: Arc::new(watchdog),
            negotiator,
            hdb,
            wallet,
            tpool,
            consensus,
            store,
            alerter,
            config,
            maintenance_lock: Mutex::new(()),
            interrupt_requested: AtomicBool::new(false),
            interrupt_ack: Notify::new(),
            stop_tx,
            tasks: StdMutex::new(Vec::new()),
            notify_rx: StdMutex::new(Some(notify_rx)),
        }))
    }

    // Spawn the periodic maintenance task and the watchdog notification
    // drain. Stopped again with stop().
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            warn!("contractor is already running");
            return;
        }

        let zelf = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                select! {
                    _ = ticker.tick() => {
                        if let Err(e) = zelf.run_maintenance().await {
                            match e {
                                ContractorError::Stopped => break,
                                e => warn!("maintenance pass failed: {}", e),
                            }
                        }
                    },
                    _ = stop_rx.changed() => break,
                }
            }
            trace!("maintenance task exited");
        }));

        let zelf = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        let mut notify_rx = self
            .notify_rx
            .lock()
            .unwrap()
            .take()
            .expect("notification receiver is taken once");
        tasks.push(tokio::spawn(async move {
            loop {
                select! {
                    notification = notify_rx.recv() => match notification {
                        Some((id, height)) => zelf.notify_double_spend(&id, height).await,
                        None => break,
                    },
                    _ = stop_rx.changed() => break,
                }
            }
            trace!("watchdog drain task exited");
        }));
    }

    // Signal shutdown and wait for the background tasks to exit. Long
    // running operations observe the signal at their next suspension
    // point and return a stopped error.
    pub async fn stop(&self) {
        debug!("stopping contractor");
        let _ = self.stop_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("contractor task panicked: {}", e);
            }
        }
    }

    pub(crate) fn check_stopped(&self) -> Result<(), ContractorError> {
        if *self.stop_tx.borrow() {
            return Err(ContractorError::Stopped);
        }
        Ok(())
    }

    // Called by the consensus glue when the chain tip moves, runs an
    // extra maintenance pass on top of the periodic cadence
    pub async fn tip_advanced(&self) {
        if let Err(e) = self.run_maintenance().await {
            warn!("maintenance pass on tip change failed: {}", e);
        }
    }

    // Interrupt a running maintenance pass and wait until the pass
    // acknowledges. Keeps requesting until either the acknowledgement
    // arrives or the maintenance lock becomes free.
    pub async fn interrupt_maintenance(&self) {
        loop {
            if self.maintenance_lock.try_lock().is_ok() {
                // Nothing is running
                self.interrupt_requested.store(false, Ordering::SeqCst);
                return;
            }
            self.interrupt_requested.store(true, Ordering::SeqCst);
            select! {
                _ = self.interrupt_ack.notified() => return,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    // ===== Renter management =====

    pub async fn renter(&self, key: &PublicKey) -> Result<Renter, ContractorError> {
        let state = self.state.read().await;
        state
            .renters
            .get(key)
            .cloned()
            .ok_or(ContractorError::RenterNotFound)
    }

    pub async fn renters(&self) -> Vec<Renter> {
        self.state.read().await.renters.values().cloned().collect()
    }

    pub async fn add_renter(&self, renter: Renter) -> Result<(), ContractorError> {
        {
            let mut state = self.state.write().await;
            state.renters.insert(renter.public_key.clone(), renter.clone());
        }
        self.store.update_renter(&renter).await
    }

    pub async fn remove_renter(&self, key: &PublicKey) -> Result<(), ContractorError> {
        let removed = {
            let mut state = self.state.write().await;
            state.renters.remove(key)
        };
        match removed {
            Some(renter) => self.store.remove_renter(&renter.email).await,
            None => Err(ContractorError::RenterNotFound),
        }
    }

    // Replace the allowance of a renter. The current period starts at
    // the present height the first time a usable allowance is set.
    pub async fn set_allowance(
        &self,
        key: &PublicKey,
        allowance: Allowance,
    ) -> Result<(), ContractorError> {
        if allowance.is_set() && allowance.renew_window > allowance.period {
            return Err(ContractorError::Other(anyhow::anyhow!(
                "renew window is larger than the period"
            )));
        }

        let height = self.consensus.height().await;
        let updated = {
            let mut state = self.state.write().await;
            let renter = state
                .renters
                .get_mut(key)
                .ok_or(ContractorError::RenterNotFound)?;
            let had_allowance = renter.allowance.is_set();
            renter.allowance = allowance;
            if !had_allowance && renter.allowance.is_set() {
                renter.current_period = height;
            }
            renter.clone()
        };
        self.store.update_renter(&updated).await
    }

    // ===== Contract views =====

    pub async fn contracts(&self) -> Vec<ContractMetadata> {
        self.contracts.metadata().await
    }

    pub async fn contract(&self, id: &ContractId) -> Option<ContractMetadata> {
        self.contracts.view(id).await
    }

    pub async fn contracts_by_renter(&self, key: &PublicKey) -> Vec<ContractMetadata> {
        self.contracts
            .metadata()
            .await
            .into_iter()
            .filter(|metadata| metadata.renter_public_key == *key)
            .collect()
    }

    pub async fn old_contracts_by_renter(&self, key: &PublicKey) -> Vec<ContractMetadata> {
        let state = self.state.read().await;
        state
            .old_contracts
            .values()
            .filter(|metadata| metadata.renter_public_key == *key)
            .cloned()
            .collect()
    }

    pub async fn block_height(&self) -> BlockHeight {
        self.state.read().await.block_height
    }

    // Predecessor of a contract in its renewal lineage
    pub async fn renewed_from(&self, id: &ContractId) -> Option<ContractId> {
        self.state.read().await.renewed_from.get(id).cloned()
    }

    // Successor of a contract in its renewal lineage
    pub async fn renewed_to(&self, id: &ContractId) -> Option<ContractId> {
        self.state.read().await.renewed_to.get(id).cloned()
    }

    // Spending of a renter over its current billing cycle. Contracts
    // whose funding was double spent are excluded, the chain never
    // charged the renter for them.
    pub async fn period_spending(&self, key: &PublicKey) -> Result<PeriodSpending, ContractorError> {
        let live = self.contracts.metadata().await;
        let state = self.state.read().await;
        let renter = state
            .renters
            .get(key)
            .ok_or(ContractorError::RenterNotFound)?;

        let mut spending = PeriodSpending::default();
        let mut allocated = orbit_common::currency::Currency::zero();
        let in_period = |metadata: &ContractMetadata| {
            metadata.renter_public_key == *key
                && metadata.start_height >= renter.current_period
                && !state.double_spent.contains_key(&metadata.id)
        };
        for metadata in live.iter().chain(state.old_contracts.values()) {
            if !in_period(metadata) {
                continue;
            }
            allocated += metadata.total_cost;
            spending.contract_fees +=
                metadata.total_cost.saturating_sub(&metadata.renter_funds)
                    .saturating_sub(&metadata.spending.total());
            spending.uploads += metadata.spending.uploads;
            spending.downloads += metadata.spending.downloads;
            spending.fund_account += metadata.spending.fund_account;
            spending.maintenance += metadata.spending.maintenance;
        }
        spending.funds_remaining = renter.allowance.funds.saturating_sub(&allocated);
        Ok(spending)
    }

    // ===== Double spend handling =====

    // Called by the watchdog when the funding of a contract was spent
    // out from under it. The contract is excluded from period spending
    // and never used again.
    pub async fn notify_double_spend(&self, id: &ContractId, height: BlockHeight) {
        warn!("contract {} was double spent at height {}", id, height);
        {
            let mut state = self.state.write().await;
            state.double_spent.insert(id.clone(), height);
        }
        self.mark_contract_bad(id).await;
    }

    // Move a contract to its terminal utility state and persist it. A
    // persistence failure keeps the in-memory state, the record is
    // regenerated on the next pass.
    pub(crate) async fn mark_contract_bad(&self, id: &ContractId) {
        let metadata = match self.contracts.acquire(id).await {
            Some(mut contract) => {
                contract.metadata.utility.lock();
                contract.metadata.clone()
            }
            None => return,
        };
        if let Err(e) = self.store.update_contract(&metadata).await {
            warn!("failed to persist contract {}: {}", id, e);
        }
    }
}
