pub mod batch;
pub mod client;
pub mod config;
pub mod contract;
pub mod correlator;
pub mod error;
pub mod ledger;
pub mod sponsor;
pub mod store;
pub mod tasks;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchFailure, RunCheckpoint, RunSummary};
pub use correlator::{Correlation, CorrelationState, Correlator, Fulfillment, PendingRequest};
pub use error::{Error, Result, SubmitError};
pub use ledger::{Ledger, TxReceipt, TxRequest, TxStatus};
pub use store::{Document, Store, WriteMode};
