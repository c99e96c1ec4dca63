use async_trait::async_trait;
use orbit_common::block::BlockHeight;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// View of the consensus state the engine depends on
#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    async fn synced(&self) -> bool;

    async fn height(&self) -> BlockHeight;
}

// Consensus double with settable height and sync flag
pub struct ConfigurableConsensus {
    synced: AtomicBool,
    height: AtomicU64,
}

impl ConfigurableConsensus {
    pub fn new(height: BlockHeight) -> Self {
        ConfigurableConsensus {
            synced: AtomicBool::new(true),
            height: AtomicU64::new(height),
        }
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn set_height(&self, height: BlockHeight) {
        self.height.store(height, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConsensusProvider for ConfigurableConsensus {
    async fn synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }
}
