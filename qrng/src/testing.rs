//! In-memory ledger for unit tests.

use crate::error::{Error, Result};
use crate::ledger::{EventLog, Ledger, LogFilter, LogStream, TxReceipt, TxRequest, TxStatus};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use web3::ethabi::{self, Event, Function, Token};
use web3::types::{Address, H256};

type Responder = Box<dyn FnMut(&TxRequest, u64) -> Result<TxReceipt> + Send>;

struct Inner {
    bus: Option<broadcast::Sender<EventLog>>,
    history: Vec<EventLog>,
    sent: Vec<TxRequest>,
    receipts: Vec<TxReceipt>,
    responder: Responder,
    block: u64,
}

/// Every sent transaction mines its own block; the responder decides the
/// receipt. Receipt logs and [`MockLedger::emit`]ted logs go on one bus.
pub(crate) struct MockLedger {
    account: Address,
    inner: Mutex<Inner>,
}

impl MockLedger {
    pub(crate) fn new() -> Self {
        Self::with_responder(|_, block| Ok(Self::receipt(block, TxStatus::Confirmed, Vec::new())))
    }

    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&TxRequest, u64) -> Result<TxReceipt> + Send + 'static,
    {
        let (bus, _) = broadcast::channel(256);
        Self {
            account: Address::repeat_byte(0xf3),
            inner: Mutex::new(Inner {
                bus: Some(bus),
                history: Vec::new(),
                sent: Vec::new(),
                receipts: Vec::new(),
                responder: Box::new(responder),
                block: 0,
            }),
        }
    }

    pub(crate) fn receipt(block: u64, status: TxStatus, logs: Vec<EventLog>) -> TxReceipt {
        TxReceipt {
            hash: H256::from_low_u64_be(0x7000 + block),
            status,
            block_number: Some(block),
            contract_address: None,
            logs,
        }
    }

    pub(crate) fn emit(&self, log: EventLog) {
        let mut inner = self.inner.lock().unwrap();
        Self::publish(&mut inner, log);
    }

    fn publish(inner: &mut Inner, log: EventLog) {
        inner.history.push(log.clone());
        if let Some(bus) = &inner.bus {
            let _ = bus.send(log);
        }
    }

    /// Ends every open subscription.
    pub(crate) fn close(&self) {
        self.inner.lock().unwrap().bus = None;
    }

    pub(crate) fn listeners(&self) -> usize {
        self.inner.lock().unwrap().bus.as_ref().map_or(0, |b| b.receiver_count())
    }

    pub(crate) fn sent(&self) -> Vec<TxRequest> {
        self.inner.lock().unwrap().sent.clone()
    }
}

/// Log of `event` with the given indexed topics and ABI-encoded data.
pub(crate) fn event_log(address: Address, event: &Event, indexed: &[H256], data: &[Token], block: u64) -> EventLog {
    let mut topics = vec![event.signature()];
    topics.extend_from_slice(indexed);
    EventLog {
        address,
        topics,
        data: ethabi::encode(data),
        block_number: Some(block),
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn address(&self) -> Address {
        self.account
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt> {
        let mut inner = self.inner.lock().unwrap();
        inner.block += 1;
        let block = inner.block;
        inner.sent.push(tx.clone());
        let receipt = (inner.responder)(&tx, block)?;
        if receipt.is_confirmed() {
            for log in receipt.logs.clone() {
                Self::publish(&mut inner, log);
            }
        }
        inner.receipts.push(receipt.clone());
        Ok(receipt)
    }

    async fn receipt(&self, hash: H256) -> Result<TxReceipt> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.receipts.iter().find(|r| r.hash == hash).cloned().unwrap_or(TxReceipt {
            hash,
            status: TxStatus::Pending,
            block_number: None,
            contract_address: None,
            logs: Vec::new(),
        }))
    }

    async fn call(&self, _contract: Address, function: &Function, _args: &[Token]) -> Result<Vec<Token>> {
        Err(Error::InvalidInput(format!("no result scripted for {}", function.name)))
    }

    async fn subscribe(&self, filter: LogFilter) -> Result<LogStream> {
        let (backlog, receiver) = {
            let inner = self.inner.lock().unwrap();
            let receiver = match &inner.bus {
                Some(bus) => bus.subscribe(),
                None => broadcast::channel(1).1,
            };
            (inner.history.clone(), receiver)
        };
        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(log) => return Some((log, receiver)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream::iter(backlog)
            .chain(live)
            .filter(move |log| future::ready(filter.matches(log)))
            .map(Ok)
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_sees_past_and_future_logs() {
        let ledger = MockLedger::new();
        let log = |n: u64| EventLog {
            address: Address::repeat_byte(1),
            topics: vec![H256::from_low_u64_be(n)],
            data: Vec::new(),
            block_number: Some(n),
        };
        ledger.emit(log(1));
        let filter = LogFilter::new(Address::repeat_byte(1)).topic(0, vec![H256::from_low_u64_be(1), H256::from_low_u64_be(3)]);
        let stream = ledger.subscribe(filter).await.unwrap();
        ledger.emit(log(2));
        ledger.emit(log(3));
        ledger.close();
        let seen: Vec<u64> = stream.map(|l| l.unwrap().block_number.unwrap()).collect().await;
        assert_eq!(seen, vec![1, 3]);
    }

    #[tokio::test]
    async fn records_sent_transactions() {
        let ledger = MockLedger::new();
        let receipt = ledger.send_transaction(TxRequest::call(Address::zero(), vec![1])).await.unwrap();
        assert!(receipt.is_confirmed());
        assert_eq!(ledger.receipt(receipt.hash).await.unwrap(), receipt);
        assert_eq!(ledger.sent().len(), 1);
    }
}
