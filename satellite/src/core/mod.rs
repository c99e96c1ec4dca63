pub mod contract_store;
pub mod contractor;
pub mod error;
pub mod funding;
pub mod gouging;
pub mod negotiator;
pub mod providers;
pub mod selector;
pub mod watchdog;
