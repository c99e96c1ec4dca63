use crate::core::{
    contract_store::FileContract,
    error::ContractorError,
    providers::TransactionPool,
};
use log::{debug, warn};
use orbit_common::{
    block::BlockHeight,
    contract::ContractId,
    crypto::Hash,
    transaction::{Transaction, TransactionSet},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;

// Registration of a contract with the watchdog
#[derive(Clone, Debug)]
pub struct MonitorContractArgs {
    pub id: ContractId,
    // Transaction set that created the contract on chain
    pub formation_set: TransactionSet,
    // Recovers the funding if the host never countersigns
    pub sweep: Transaction,
    // Most recent known revision of the contract
    pub revision_txn: Transaction,
    pub start_height: BlockHeight,
}

struct MonitoredContract {
    // Outputs consumed to fund the contract. If one of them is spent by
    // a foreign transaction, the contract funding was double spent.
    funding_inputs: HashSet<Hash>,
    sweep: Transaction,
    revision_txn: Transaction,
    double_spent: bool,
}

// Watches the funding inputs of every live contract and raises a
// notification when one of them is spent out from under a contract.
pub struct Watchdog {
    tpool: Arc<dyn TransactionPool>,
    contracts: Mutex<HashMap<ContractId, MonitoredContract>>,
    notify_tx: mpsc::UnboundedSender<(ContractId, BlockHeight)>,
}

impl Watchdog {
    // The receiver side carries (contract id, height) double spend
    // notifications and is drained by the contractor.
    pub fn new(
        tpool: Arc<dyn TransactionPool>,
    ) -> (Self, mpsc::UnboundedReceiver<(ContractId, BlockHeight)>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        (
            Watchdog {
                tpool,
                contracts: Mutex::new(HashMap::new()),
                notify_tx,
            },
            notify_rx,
        )
    }

    // Register a contract. Every contract is registered exactly once,
    // a repeated registration is ignored.
    pub fn monitor_contract(&self, args: MonitorContractArgs) {
        let mut contracts = self.contracts.lock().unwrap();
        if contracts.contains_key(&args.id) {
            warn!("contract {} is already being monitored", args.id);
            return;
        }

        let funding_inputs = args
            .formation_set
            .iter()
            .flat_map(|txn| txn.inputs.iter())
            .map(|input| input.parent_id.clone())
            .collect();

        contracts.insert(
            args.id,
            MonitoredContract {
                funding_inputs,
                sweep: args.sweep,
                revision_txn: args.revision_txn,
                double_spent: false,
            },
        );
    }

    pub fn stop_monitoring(&self, id: &ContractId) {
        self.contracts.lock().unwrap().remove(id);
    }

    pub fn is_monitoring(&self, id: &ContractId) -> bool {
        self.contracts.lock().unwrap().contains_key(id)
    }

    // Broadcast the last known revision of a contract, called when the
    // contract is renewed so the final revision makes it on chain.
    pub async fn send_most_recent_revision(
        &self,
        contract: &FileContract,
    ) -> Result<(), ContractorError> {
        debug!(
            "broadcasting most recent revision of contract {}",
            contract.metadata.id
        );
        self.tpool
            .broadcast(vec![contract.revision_txn.clone()])
            .await
    }

    // Check the monitored funding inputs against outputs spent by
    // foreign transactions at the given height. Affected contracts are
    // reported once and their sweep transaction is broadcast to recover
    // whatever funding remains recoverable.
    pub async fn process_consensus_change(
        &self,
        height: BlockHeight,
        spent: &[Hash],
    ) -> Result<(), ContractorError> {
        let mut affected = Vec::new();
        {
            let mut contracts = self.contracts.lock().unwrap();
            for (id, monitored) in contracts.iter_mut() {
                if monitored.double_spent {
                    continue;
                }
                if spent
                    .iter()
                    .any(|output| monitored.funding_inputs.contains(output))
                {
                    monitored.double_spent = true;
                    affected.push((id.clone(), monitored.sweep.clone()));
                }
            }
        }

        for (id, sweep) in affected {
            warn!("funding of contract {} was double spent at height {}", id, height);
            // Recovering the funds can fail if the sweep inputs are the
            // very outputs that were spent, keep going either way
            if let Err(e) = self.tpool.broadcast(vec![sweep]).await {
                warn!("failed to broadcast sweep for contract {}: {}", id, e);
            }
            if self.notify_tx.send((id, height)).is_err() {
                debug!("double spend receiver is gone");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::ConfigurableTransactionPool;
    use orbit_common::{currency::Currency, transaction::Input};

    fn args(id_seed: &[u8], parent: Hash) -> MonitorContractArgs {
        MonitorContractArgs {
            id: ContractId(orbit_common::crypto::hash(id_seed)),
            formation_set: vec![Transaction {
                inputs: vec![Input { parent_id: parent }],
                outputs: Vec::new(),
                arbitrary_data: Vec::new(),
            }],
            sweep: Transaction::default(),
            revision_txn: Transaction::default(),
            start_height: 0,
        }
    }

    #[tokio::test]
    async fn test_registration_is_exactly_once() {
        let tpool = Arc::new(ConfigurableTransactionPool::new(
            Currency::zero(),
            Currency::zero(),
        ));
        let (watchdog, _rx) = Watchdog::new(tpool);

        let parent = orbit_common::crypto::hash(b"parent");
        watchdog.monitor_contract(args(b"c1", parent.clone()));
        watchdog.monitor_contract(args(b"c1", parent));

        assert_eq!(watchdog.contracts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_double_spend_notification() {
        let tpool = Arc::new(ConfigurableTransactionPool::new(
            Currency::zero(),
            Currency::zero(),
        ));
        let (watchdog, mut rx) = Watchdog::new(tpool.clone());

        let parent = orbit_common::crypto::hash(b"parent");
        let registration = args(b"c1", parent.clone());
        let id = registration.id.clone();
        watchdog.monitor_contract(registration);

        watchdog
            .process_consensus_change(42, &[parent.clone()])
            .await
            .unwrap();

        let (notified_id, height) = rx.try_recv().expect("a notification should be queued");
        assert_eq!(notified_id, id);
        assert_eq!(height, 42);
        // The sweep was broadcast to recover the funds
        assert_eq!(tpool.broadcasted().len(), 1);

        // A second change with the same spent output does not notify again
        watchdog
            .process_consensus_change(43, &[parent])
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unmonitored_inputs_are_ignored() {
        let tpool = Arc::new(ConfigurableTransactionPool::new(
            Currency::zero(),
            Currency::zero(),
        ));
        let (watchdog, mut rx) = Watchdog::new(tpool);

        watchdog.monitor_contract(args(b"c1", orbit_common::crypto::hash(b"parent")));
        watchdog
            .process_consensus_change(42, &[orbit_common::crypto::hash(b"other")])
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
