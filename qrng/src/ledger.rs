//! The chain as the engine sees it: send a transaction, read state, watch logs.

use crate::error::{Result, SubmitError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use web3::ethabi::{Function, Token};
use web3::types::{Address, Log, H256, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Reverted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub hash: H256,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
    pub logs: Vec<EventLog>,
}

impl TxReceipt {
    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }

    /// Passes confirmed receipts through; anything else is a [`SubmitError`].
    pub fn into_confirmed(self) -> Result<TxReceipt> {
        match self.status {
            TxStatus::Confirmed => Ok(self),
            TxStatus::Reverted => Err(SubmitError::Reverted(self.hash).into()),
            TxStatus::Pending => Err(SubmitError::Unconfirmed(self.hash).into()),
        }
    }
}

/// A transaction before signing. `to == None` deploys `data` as init code.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub to: Option<Address>,
    pub data: Vec<u8>,
    pub value: U256,
}

impl TxRequest {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to: Some(to),
            data,
            value: U256::zero(),
        }
    }

    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            data: Vec::new(),
            value,
        }
    }

    pub fn deploy(init_code: Vec<u8>) -> Self {
        Self {
            to: None,
            data: init_code,
            value: U256::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: Option<u64>,
}

impl From<Log> for EventLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.address,
            topics: log.topics,
            data: log.data.0,
            block_number: log.block_number.map(|n| n.as_u64()),
        }
    }
}

/// Log filter on one contract. Each topic slot is `None` (any) or a set of
/// accepted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: [Option<Vec<H256>>; 4],
    pub from_block: Option<u64>,
}

impl LogFilter {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            topics: [None, None, None, None],
            from_block: None,
        }
    }

    pub fn topic(mut self, position: usize, accepted: Vec<H256>) -> Self {
        self.topics[position] = Some(accepted);
        self
    }

    pub fn from_block(mut self, block: Option<u64>) -> Self {
        self.from_block = block;
        self
    }

    pub fn matches(&self, log: &EventLog) -> bool {
        if log.address != self.address {
            return false;
        }
        if let (Some(from), Some(block)) = (self.from_block, log.block_number) {
            if block < from {
                return false;
            }
        }
        self.topics.iter().enumerate().all(|(i, slot)| match slot {
            None => true,
            Some(accepted) => log.topics.get(i).map_or(false, |t| accepted.contains(t)),
        })
    }
}

pub type LogStream = BoxStream<'static, Result<EventLog>>;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Account that signs every transaction.
    fn address(&self) -> Address;

    /// Signs and sends, then waits for a receipt. A receipt that never showed
    /// up comes back as [`TxStatus::Pending`].
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt>;

    async fn receipt(&self, hash: H256) -> Result<TxReceipt>;

    async fn call(&self, contract: Address, function: &Function, args: &[Token]) -> Result<Vec<Token>>;

    /// Logs matching `filter`, starting from `filter.from_block` when given.
    async fn subscribe(&self, filter: LogFilter) -> Result<LogStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(address: u64, topics: &[u64], block: Option<u64>) -> EventLog {
        EventLog {
            address: Address::from_low_u64_be(address),
            topics: topics.iter().map(|t| H256::from_low_u64_be(*t)).collect(),
            data: Vec::new(),
            block_number: block,
        }
    }

    #[test]
    fn filter_checks_address_topics_and_block() {
        let filter = LogFilter::new(Address::from_low_u64_be(9))
            .topic(0, vec![H256::from_low_u64_be(1), H256::from_low_u64_be(2)])
            .topic(2, vec![H256::from_low_u64_be(7)])
            .from_block(Some(10));

        assert!(filter.matches(&log(9, &[1, 5, 7], Some(10))));
        assert!(filter.matches(&log(9, &[2, 6, 7], None)));
        assert!(!filter.matches(&log(8, &[1, 5, 7], Some(10))));
        assert!(!filter.matches(&log(9, &[3, 5, 7], Some(10))));
        assert!(!filter.matches(&log(9, &[1, 5, 8], Some(10))));
        assert!(!filter.matches(&log(9, &[1, 5], Some(10))));
        assert!(!filter.matches(&log(9, &[1, 5, 7], Some(9))));
    }
}
