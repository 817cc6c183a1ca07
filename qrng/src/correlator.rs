//! Joins a submitted randomness request with the oracle's answer.
//!
//! Each watched request gets its own listener task holding a filtered log
//! stream. The task reports progress over a `watch` channel and hands the
//! single result over a `oneshot`; dropping the [`Correlation`] tears the
//! listener down.

use crate::contract::{Response, ResponseShape, RrpContract};
use crate::error::{Error, Result};
use crate::ledger::{EventLog, Ledger, LogFilter, LogStream, TxReceipt, TxRequest};
use crate::utils::checksum;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use web3::ethabi::{Event, RawLog, Token};
use web3::types::{Address, H256};

const FULFILLED_REQUEST: &str = "FulfilledRequest";
const FAILED_REQUEST: &str = "FailedRequest";
const REQUESTED_WITHDRAWAL: &str = "RequestedWithdrawal";
const FULFILLED_WITHDRAWAL: &str = "FulfilledWithdrawal";

// Position of the id among the topics of each oracle event.
const REQUEST_ID_TOPIC: usize = 2;
const WITHDRAWAL_ID_TOPIC: usize = 3;
const NODE_TOPIC: usize = 1;

/// Consecutive log stream errors after which a listener gives up.
const MAX_STREAM_ERRORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Idle,
    Submitted,
    AwaitingFulfillment,
    Fulfilled,
    DecodeFailed,
    OracleFailed,
    Abandoned,
}

impl CorrelationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CorrelationState::Fulfilled
                | CorrelationState::DecodeFailed
                | CorrelationState::OracleFailed
                | CorrelationState::Abandoned
        )
    }
}

/// A request whose id was read from a confirmed receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: H256,
    pub requester: Address,
    pub submitted_at: DateTime<Utc>,
    pub block_number: Option<u64>,
    pub tx_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfillment {
    pub request_id: H256,
    pub response: Response,
    pub block_number: Option<u64>,
}

/// Which oracle events a correlation accepts besides the id match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Node(Address),
    Unscoped,
}

pub struct Correlator<L: Ledger + ?Sized> {
    ledger: Arc<L>,
    rrp: RrpContract,
    scope: Scope,
}

impl<L: Ledger + ?Sized> Correlator<L> {
    pub fn new(ledger: Arc<L>, rrp: RrpContract, oracle_node: Address) -> Self {
        Self {
            ledger,
            rrp,
            scope: Scope::Node(oracle_node),
        }
    }

    /// Matches on the id alone. Another node answering the same id would be
    /// taken as ours.
    pub fn unscoped(ledger: Arc<L>, rrp: RrpContract) -> Self {
        warn!("correlating on request id only, fulfillments from any oracle node will match");
        Self {
            ledger,
            rrp,
            scope: Scope::Unscoped,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Sends a request transaction and reads the id from the `event` its
    /// target emits.
    pub async fn submit(&self, tx: TxRequest, event: &Event) -> Result<PendingRequest> {
        let requester = tx
            .to
            .ok_or_else(|| Error::InvalidInput("a request must be sent to a contract".into()))?;
        self.submit_to(tx, requester, event).await
    }

    pub async fn submit_withdrawal(&self, airnode: Address, sponsor_wallet: Address) -> Result<PendingRequest> {
        let tx = self.rrp.request_withdrawal_tx(airnode, sponsor_wallet)?;
        let event = self.rrp.event(REQUESTED_WITHDRAWAL)?.clone();
        self.submit_to(tx, self.rrp.address, &event).await
    }

    async fn submit_to(&self, tx: TxRequest, emitter: Address, event: &Event) -> Result<PendingRequest> {
        debug!("{} request to {}: {:?}", event.name, checksum(&emitter), CorrelationState::Idle);
        let receipt = self.ledger.send_transaction(tx).await?.into_confirmed()?;
        let request_id = request_id_in(&receipt, emitter, event)?;
        let pending = PendingRequest {
            request_id,
            requester: emitter,
            submitted_at: Utc::now(),
            block_number: receipt.block_number,
            tx_hash: receipt.hash,
        };
        info!("Request {:?} submitted in tx {:?}", request_id, receipt.hash);
        debug!("{:?}: {:?}", request_id, CorrelationState::Submitted);
        Ok(pending)
    }

    /// Starts listening for the oracle's answer to `pending`.
    pub async fn watch(&self, pending: PendingRequest, shape: ResponseShape) -> Result<Correlation> {
        let matcher = Matcher {
            request_id: pending.request_id,
            scope: self.scope,
            id_topic: REQUEST_ID_TOPIC,
            fulfilled: self.rrp.event(FULFILLED_REQUEST)?.clone(),
            failed: Some(self.rrp.event(FAILED_REQUEST)?.clone()),
            payload: Payload::Randomness(shape),
        };
        self.listen(pending, matcher).await
    }

    pub async fn watch_withdrawal(&self, pending: PendingRequest) -> Result<Correlation> {
        let matcher = Matcher {
            request_id: pending.request_id,
            scope: self.scope,
            id_topic: WITHDRAWAL_ID_TOPIC,
            fulfilled: self.rrp.event(FULFILLED_WITHDRAWAL)?.clone(),
            failed: None,
            payload: Payload::Withdrawal,
        };
        self.listen(pending, matcher).await
    }

    /// Submit and watch in one step.
    pub async fn request(&self, tx: TxRequest, event: &Event, shape: ResponseShape) -> Result<Correlation> {
        let pending = self.submit(tx, event).await?;
        self.watch(pending, shape).await
    }

    async fn listen(&self, pending: PendingRequest, matcher: Matcher) -> Result<Correlation> {
        let filter = matcher.filter(self.rrp.address, pending.block_number);
        let stream = self.ledger.subscribe(filter).await?;
        let (state_tx, state_rx) = watch::channel(CorrelationState::AwaitingFulfillment);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        debug!("{:?}: {:?}", pending.request_id, CorrelationState::AwaitingFulfillment);
        let listener = tokio::spawn(run_listener(stream, matcher, state_tx, outcome_tx));
        Ok(Correlation {
            request: pending,
            state: state_rx,
            outcome: Some(outcome_rx),
            listener,
        })
    }
}

/// First 32-byte fixed parameter of `event` as emitted by `emitter` in the receipt.
fn request_id_in(receipt: &TxReceipt, emitter: Address, event: &Event) -> Result<H256> {
    let signature = event.signature();
    for log in receipt.logs.iter().filter(|l| l.address == emitter) {
        if log.topics.first() != Some(&signature) {
            continue;
        }
        let parsed = event.parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.clone(),
        })?;
        let id = parsed.params.into_iter().find_map(|p| match p.value {
            Token::FixedBytes(bytes) if bytes.len() == 32 => Some(H256::from_slice(&bytes)),
            _ => None,
        });
        if let Some(id) = id {
            return Ok(id);
        }
    }
    Err(Error::Decode(format!(
        "no {} event from {} in tx {:?}",
        event.name,
        checksum(&emitter),
        receipt.hash
    )))
}

enum Payload {
    Randomness(ResponseShape),
    Withdrawal,
}

struct Matcher {
    request_id: H256,
    scope: Scope,
    id_topic: usize,
    fulfilled: Event,
    failed: Option<Event>,
    payload: Payload,
}

impl Matcher {
    fn filter(&self, rrp: Address, from_block: Option<u64>) -> LogFilter {
        let mut signatures = vec![self.fulfilled.signature()];
        if let Some(failed) = &self.failed {
            signatures.push(failed.signature());
        }
        let filter = LogFilter::new(rrp)
            .topic(0, signatures)
            .topic(self.id_topic, vec![self.request_id])
            .from_block(from_block);
        match self.scope {
            Scope::Node(node) => filter.topic(NODE_TOPIC, vec![H256::from(node)]),
            Scope::Unscoped => filter,
        }
    }

    /// `None` for logs that belong to someone else.
    fn resolve(&self, log: &EventLog) -> Option<Result<Fulfillment>> {
        if log.topics.get(self.id_topic) != Some(&self.request_id) {
            return None;
        }
        if let Scope::Node(node) = self.scope {
            if log.topics.get(NODE_TOPIC) != Some(&H256::from(node)) {
                return None;
            }
        }
        let topic0 = log.topics.first()?;
        if *topic0 == self.fulfilled.signature() {
            return Some(self.decode_fulfilled(log));
        }
        match &self.failed {
            Some(failed) if *topic0 == failed.signature() => Some(self.decode_failed(failed, log)),
            _ => None,
        }
    }

    fn decode_fulfilled(&self, log: &EventLog) -> Result<Fulfillment> {
        let (param, shape) = match &self.payload {
            Payload::Randomness(shape) => ("data", Some(*shape)),
            Payload::Withdrawal => ("amount", None),
        };
        let value = param_of(&self.fulfilled, log, param)?;
        let response = match (shape, value) {
            (Some(shape), Token::Bytes(bytes)) => shape.decode(&bytes)?,
            (None, Token::Uint(amount)) => Response::Uint(amount),
            (_, other) => return Err(Error::Decode(format!("unexpected `{}` value {:?}", param, other))),
        };
        Ok(Fulfillment {
            request_id: self.request_id,
            response,
            block_number: log.block_number,
        })
    }

    fn decode_failed(&self, failed: &Event, log: &EventLog) -> Result<Fulfillment> {
        let message = match param_of(failed, log, "errorMessage")? {
            Token::String(message) => message,
            other => format!("{:?}", other),
        };
        Err(Error::OracleFailed {
            request_id: self.request_id,
            message,
        })
    }
}

fn param_of(event: &Event, log: &EventLog, name: &str) -> Result<Token> {
    let parsed = event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.clone(),
        })
        .map_err(|e| Error::Decode(format!("{} log: {}", event.name, e)))?;
    parsed
        .params
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.value)
        .ok_or_else(|| Error::Decode(format!("{} log has no `{}`", event.name, name)))
}

async fn run_listener(
    mut stream: LogStream,
    matcher: Matcher,
    state: watch::Sender<CorrelationState>,
    outcome: oneshot::Sender<Result<Fulfillment>>,
) {
    let id = matcher.request_id;
    let mut failures = 0;
    while let Some(item) = stream.next().await {
        let log = match item {
            Ok(log) => {
                failures = 0;
                log
            }
            Err(e) if failures + 1 >= MAX_STREAM_ERRORS => {
                error!("giving up on {:?} after {} log stream errors, last: {}", id, MAX_STREAM_ERRORS, e);
                state.send_replace(CorrelationState::Abandoned);
                return;
            }
            Err(e) => {
                failures += 1;
                warn!("log stream error while awaiting {:?}: {}", id, e);
                continue;
            }
        };
        let result = match matcher.resolve(&log) {
            Some(result) => result,
            None => continue,
        };
        let next = match &result {
            Ok(fulfillment) => {
                info!("Request {:?} fulfilled with {}", id, fulfillment.response);
                CorrelationState::Fulfilled
            }
            Err(Error::OracleFailed { message, .. }) => {
                error!("Oracle failed request {:?}: {}", id, message);
                CorrelationState::OracleFailed
            }
            Err(e) => {
                error!("Fulfillment of {:?} could not be decoded: {}", id, e);
                CorrelationState::DecodeFailed
            }
        };
        state.send_replace(next);
        if outcome.send(result).is_err() {
            debug!("{:?}: nobody is waiting for the result", id);
        }
        return;
    }
    warn!("log stream for {:?} ended before fulfillment", id);
    state.send_replace(CorrelationState::Abandoned);
}

/// One outstanding request and its listener.
pub struct Correlation {
    request: PendingRequest,
    state: watch::Receiver<CorrelationState>,
    outcome: Option<oneshot::Receiver<Result<Fulfillment>>>,
    listener: JoinHandle<()>,
}

impl Correlation {
    pub fn request(&self) -> &PendingRequest {
        &self.request
    }

    pub fn state(&self) -> CorrelationState {
        let current = *self.state.borrow();
        if !current.is_terminal() && self.state.has_changed().is_err() {
            CorrelationState::Abandoned
        } else {
            current
        }
    }

    /// Waits until the listener reaches a terminal state.
    pub async fn settled(&mut self) -> CorrelationState {
        loop {
            let current = self.state();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// The single result for this request. No timeout is applied.
    pub async fn wait(mut self) -> Result<Fulfillment> {
        let id = self.request.request_id;
        match self.outcome.take() {
            Some(outcome) => outcome.await.unwrap_or(Err(Error::Abandoned(id))),
            None => Err(Error::Abandoned(id)),
        }
    }

    pub fn abandon(self) {
        info!("Abandoning request {:?}", self.request.request_id);
    }
}

impl Drop for Correlation {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
