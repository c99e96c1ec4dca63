// External collaborators of the contract maintenance engine.
//
// Each provider is an async trait with a configurable in-memory
// implementation used as a test double. The production implementations
// live with the subsystems they belong to (host database, wallet,
// transaction pool, consensus), outside of this crate.

mod alerter;
mod consensus;
mod host_directory;
mod renter_store;
mod tx_pool;
mod wallet;

pub use alerter::*;
pub use consensus::*;
pub use host_directory::*;
pub use renter_store::*;
pub use tx_pool::*;
pub use wallet::*;
