use thiserror::Error;
use web3::types::H256;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("submission failed: {0}")]
    Submit(#[from] SubmitError),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("oracle failed request {request_id:?}: {message}")]
    OracleFailed { request_id: H256, message: String },
    #[error("listener for request {0:?} ended before fulfillment")]
    Abandoned(H256),
    #[error("interrupted")]
    Interrupted,
    #[error("ledger error: {0}")]
    Ledger(#[from] web3::Error),
    #[error("abi error: {0}")]
    Abi(#[from] web3::ethabi::Error),
    #[error("key derivation error: {0}")]
    Derivation(#[from] bip32::Error),
    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a transaction did not reach a confirmed receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("transaction {0:?} reverted")]
    Reverted(H256),
    #[error("transaction {0:?} not confirmed")]
    Unconfirmed(H256),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl SubmitError {
    /// Classifies a node error message, the way node responses only carry text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("insufficient funds") {
            SubmitError::InsufficientFunds(message)
        } else if lower.contains("nonce") {
            SubmitError::InvalidNonce(message)
        } else {
            SubmitError::Rejected(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_node_messages() {
        assert!(matches!(
            SubmitError::classify("insufficient funds for gas * price + value"),
            SubmitError::InsufficientFunds(_)
        ));
        assert!(matches!(SubmitError::classify("nonce too low"), SubmitError::InvalidNonce(_)));
        assert!(matches!(
            SubmitError::classify("execution reverted: not owner"),
            SubmitError::Rejected(_)
        ));
    }
}
