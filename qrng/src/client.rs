use crate::config::{Config, RpcMode};
use crate::error::{Error, Result, SubmitError};
use crate::ledger::{EventLog, Ledger, LogFilter, LogStream, TxReceipt, TxRequest, TxStatus};
use crate::utils::{checksum, extract_keypair_from_str};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use log::{debug, info, warn};
use reqwest::{Client, Url};
use std::time::Duration;
use web3::signing::SecretKey;
use web3::ethabi::{Function, Token};
use web3::transports::{Either, Http, WebSocket};
use web3::types::{
    Address, BlockNumber, Bytes, CallRequest, Filter, FilterBuilder, TransactionParameters, TransactionReceipt, H256,
    U256, U64,
};

pub type Transport = Either<WebSocket, Http>;

/// Ledger over a JSON-RPC endpoint, signing locally with the configured key.
pub struct Web3Ledger {
    web3: web3::Web3<Transport>,
    secret: SecretKey,
    address: Address,
    chain_id: u64,
    poll_interval: Duration,
    max_receipt_polls: u64,
}

impl Web3Ledger {
    pub async fn connect(config: &Config) -> Result<Self> {
        let (secret, address) = extract_keypair_from_str(config.signing_key()?)?;
        let endpoint = config.rpc_url()?;
        let transport = match config.rpc_mode {
            RpcMode::Http => {
                let client = Client::builder()
                    .timeout(config.timeout)
                    .build()
                    .map_err(|e| Error::Configuration(format!("cannot build http client: {}", e)))?;
                let url = Url::parse(endpoint)
                    .map_err(|e| Error::Configuration(format!("invalid rpc url {}: {}", endpoint, e)))?;
                Either::Right(Http::with_client(client, url))
            }
            RpcMode::Socket => Either::Left(WebSocket::new(endpoint).await?),
        };
        let web3 = web3::Web3::new(transport);

        let chain_id = web3.eth().chain_id().await?.as_u64();
        if chain_id != config.network.chain_id() {
            return Err(Error::Configuration(format!(
                "endpoint serves chain {} but {} is chain {}",
                chain_id,
                config.network.name(),
                config.network.chain_id()
            )));
        }
        info!(
            "Connected to {} (chain {}) as {}",
            config.network.name(),
            chain_id,
            checksum(&address)
        );

        Ok(Self {
            web3,
            secret,
            address,
            chain_id,
            poll_interval: config.poll_interval,
            max_receipt_polls: config.max_receipt_polls,
        })
    }

    async fn wait_for_tx_receipt(&self, hash: H256) -> Result<TxReceipt> {
        for retry in 0..self.max_receipt_polls {
            if let Some(receipt) = self.web3.eth().transaction_receipt(hash).await? {
                if receipt.block_number.is_some() {
                    debug!("receipt for {:?} after {} polls", hash, retry + 1);
                    return Ok(convert_receipt(receipt));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        warn!("no receipt for {:?} after {} polls", hash, self.max_receipt_polls);
        Ok(pending_receipt(hash))
    }
}

/// Node-side rejections become [`SubmitError`]s; transport failures stay ledger errors.
fn submit_error(err: web3::Error) -> Error {
    match err {
        web3::Error::Rpc(rpc) => SubmitError::classify(rpc.message).into(),
        other => Error::Ledger(other),
    }
}

fn pending_receipt(hash: H256) -> TxReceipt {
    TxReceipt {
        hash,
        status: TxStatus::Pending,
        block_number: None,
        contract_address: None,
        logs: Vec::new(),
    }
}

fn receipt_status(block_number: Option<U64>, status: Option<U64>) -> TxStatus {
    match (block_number, status) {
        (None, _) => TxStatus::Pending,
        (Some(_), Some(s)) if s == U64::from(1) => TxStatus::Confirmed,
        (Some(_), Some(_)) => TxStatus::Reverted,
        // pre-byzantium receipts carry no status
        (Some(_), None) => TxStatus::Confirmed,
    }
}

fn convert_receipt(receipt: TransactionReceipt) -> TxReceipt {
    TxReceipt {
        hash: receipt.transaction_hash,
        status: receipt_status(receipt.block_number, receipt.status),
        block_number: receipt.block_number.map(|n| n.as_u64()),
        contract_address: receipt.contract_address,
        logs: receipt.logs.into_iter().map(EventLog::from).collect(),
    }
}

fn build_filter(filter: &LogFilter, from_block: Option<u64>) -> Filter {
    let [t0, t1, t2, t3] = filter.topics.clone();
    let builder = FilterBuilder::default().address(vec![filter.address]).topics(t0, t1, t2, t3);
    match from_block {
        Some(block) => builder.from_block(BlockNumber::Number(U64::from(block))).build(),
        None => builder.build(),
    }
}

#[async_trait]
impl Ledger for Web3Ledger {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt> {
        let eth = self.web3.eth();
        let call = CallRequest {
            from: Some(self.address),
            to: tx.to,
            value: Some(tx.value),
            data: Some(Bytes(tx.data.clone())),
            ..Default::default()
        };
        let gas = eth.estimate_gas(call, None).await.map_err(submit_error)?;
        let params = TransactionParameters {
            to: tx.to,
            gas: gas + gas / U256::from(5),
            value: tx.value,
            data: Bytes(tx.data),
            chain_id: Some(self.chain_id),
            ..Default::default()
        };
        let signed = self.web3.accounts().sign_transaction(params, &self.secret).await?;
        let hash = eth
            .send_raw_transaction(signed.raw_transaction)
            .await
            .map_err(submit_error)?;
        info!("Sent tx {:?}", hash);
        self.wait_for_tx_receipt(hash).await
    }

    async fn receipt(&self, hash: H256) -> Result<TxReceipt> {
        Ok(self
            .web3
            .eth()
            .transaction_receipt(hash)
            .await?
            .map(convert_receipt)
            .unwrap_or_else(|| pending_receipt(hash)))
    }

    async fn call(&self, contract: Address, function: &Function, args: &[Token]) -> Result<Vec<Token>> {
        let request = CallRequest {
            to: Some(contract),
            data: Some(Bytes(function.encode_input(args)?)),
            ..Default::default()
        };
        let output = self.web3.eth().call(request, None).await?;
        Ok(function.decode_output(&output.0)?)
    }

    async fn subscribe(&self, filter: LogFilter) -> Result<LogStream> {
        // live filter first so nothing mined during the backfill is lost
        let live = self
            .web3
            .eth_filter()
            .create_logs_filter(build_filter(&filter, None))
            .await?
            .stream(self.poll_interval);
        let past = match filter.from_block {
            Some(block) => self.web3.eth().logs(build_filter(&filter, Some(block))).await?,
            None => Vec::new(),
        };
        debug!("backfilled {} logs from {:?}", past.len(), filter.from_block);

        let past = stream::iter(past.into_iter().map(Ok));
        Ok(past
            .chain(live)
            .map(|item| item.map(EventLog::from).map_err(Error::from))
            .filter(move |item| future::ready(item.as_ref().map_or(true, |log| filter.matches(log))))
            .boxed())
    }
}
