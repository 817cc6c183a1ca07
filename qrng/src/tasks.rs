//! Deploy, fund, configure and drive the requester contracts.

use crate::batch::{self, RunSummary};
use crate::config::{Config, OracleConfig};
use crate::contract::{Artifact, ContractKind, RequesterContract, RrpContract};
use crate::correlator::{Correlation, Correlator, Fulfillment};
use crate::error::{Error, Result};
use crate::ledger::{Ledger, TxRequest};
use crate::sponsor::derive_sponsor_wallet;
use crate::store::Store;
use crate::utils::{checksum, load_address_column, parse_ether};
use futures::future::join_all;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use web3::types::{Address, U256};

pub const DEFAULT_BASE_URI: &str = "https://api.coolcatsnft.com/cat/";

/// Sponsor wallet of every deployed kind in `kinds`. Needs no chain access.
pub fn sponsor_wallets(config: &Config, kinds: &[ContractKind]) -> Result<Vec<(ContractKind, Address)>> {
    let oracle = config.oracle()?;
    let store = config.store();
    kinds
        .iter()
        .map(|kind| {
            let contract = deployed_address(&store, config, *kind)?;
            Ok((*kind, derive_for(&oracle, &contract)?))
        })
        .collect()
}

fn derive_for(oracle: &OracleConfig, contract: &Address) -> Result<Address> {
    derive_sponsor_wallet(&oracle.extended_public_key, &oracle.oracle_node_id, contract)
}

fn deployed_address(store: &Store, config: &Config, kind: ContractKind) -> Result<Address> {
    store.deployment(config.network.name(), kind).ok_or_else(|| {
        Error::Configuration(format!(
            "no {} deployment recorded for {}, deploy it first",
            kind,
            config.network.name()
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub count: usize,
    pub max: u8,
    pub recipient: Option<Address>,
    pub unscoped: bool,
}

pub struct Tasks<L: Ledger + ?Sized> {
    config: Config,
    store: Store,
    ledger: Arc<L>,
}

impl<L: Ledger + ?Sized> Tasks<L> {
    pub fn new(config: Config, ledger: Arc<L>) -> Self {
        let store = config.store();
        Self { config, store, ledger }
    }

    fn network(&self) -> &'static str {
        self.config.network.name()
    }

    fn artifact(&self, kind: ContractKind) -> Result<Artifact> {
        Artifact::load(self.config.artifacts_dir(), kind)
    }

    pub fn contract(&self, kind: ContractKind) -> Result<RequesterContract> {
        let address = deployed_address(&self.store, &self.config, kind)?;
        Ok(RequesterContract::new(kind, address, self.artifact(kind)?))
    }

    async fn send(&self, tx: TxRequest) -> Result<()> {
        let receipt = self.ledger.send_transaction(tx).await?.into_confirmed()?;
        info!("Confirmed in tx {:?}", receipt.hash);
        Ok(())
    }

    /// Deploys each kind against the protocol contract and records its address.
    pub async fn deploy(&self, kinds: &[ContractKind]) -> Result<Vec<(ContractKind, Address)>> {
        let mut deployed = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let artifact = self.artifact(*kind)?;
            let tx = artifact.deploy_tx(&kind.constructor_args(self.config.rrp))?;
            let receipt = self.ledger.send_transaction(tx).await?.into_confirmed()?;
            let address = receipt
                .contract_address
                .ok_or_else(|| Error::Decode(format!("receipt {:?} has no contract address", receipt.hash)))?;
            info!("{} contract deployed with address: {}", kind, checksum(&address));
            self.store.record_deployment(self.network(), *kind, &address)?;
            deployed.push((*kind, address));
        }
        Ok(deployed)
    }

    /// Sends `amount` (or the network default) to each kind's sponsor wallet.
    pub async fn fund(&self, kinds: &[ContractKind], amount: Option<U256>) -> Result<()> {
        let (default_value, unit) = self.config.network.default_funding();
        let amount = match amount {
            Some(amount) => amount,
            None => parse_ether(default_value)?,
        };
        for (kind, wallet) in sponsor_wallets(&self.config, kinds)? {
            info!(
                "Funding {} sponsor wallet at {} with {} wei ({})",
                kind,
                checksum(&wallet),
                amount,
                unit
            );
            self.send(TxRequest::transfer(wallet, amount)).await?;
        }
        info!("Sponsor wallets funded");
        Ok(())
    }

    /// Points each contract at the oracle; the NFT also gets its base URI.
    pub async fn setup(&self, kinds: &[ContractKind], base_uri: &str) -> Result<()> {
        let oracle = self.config.oracle()?;
        for kind in kinds {
            let contract = self.contract(*kind)?;
            let wallet = derive_for(&oracle, &contract.address)?;
            info!("Setting up {} contract", kind);
            if *kind == ContractKind::Nft {
                info!("Setting base URI to {}", base_uri);
                self.send(contract.set_base_uri_tx(base_uri)?).await?;
            }
            info!("Setting request parameters, sponsor wallet {}", checksum(&wallet));
            self.send(contract.set_request_parameters_tx(oracle.oracle_node_id, oracle.endpoint_id, wallet)?)
                .await?;
        }
        info!("Done setting up");
        Ok(())
    }

    /// Asks the oracle node to return each sponsor wallet's balance to the sponsor.
    /// With `wait`, returns the withdrawn amounts once fulfilled.
    pub async fn withdraw(&self, kinds: &[ContractKind], wait: bool) -> Result<Vec<Fulfillment>> {
        let oracle = self.config.oracle()?;
        let correlator = Correlator::new(
            self.ledger.clone(),
            RrpContract::new(self.config.rrp)?,
            oracle.oracle_node_id,
        );
        let mut fulfilled = Vec::new();
        for (kind, wallet) in sponsor_wallets(&self.config, kinds)? {
            info!("Requesting withdrawal from {} sponsor wallet {}", kind, checksum(&wallet));
            let pending = correlator.submit_withdrawal(oracle.oracle_node_id, wallet).await?;
            info!("Withdrawal request id: {:?}", pending.request_id);
            if wait {
                let fulfillment = correlator.watch_withdrawal(pending).await?.wait().await?;
                info!("Withdrew {} wei from {}", fulfillment.response, checksum(&wallet));
                fulfilled.push(fulfillment);
            }
        }
        Ok(fulfilled)
    }

    /// Submits `count` requests one after another, then waits for all answers.
    pub async fn request(&self, kind: ContractKind, options: RequestOptions) -> Result<Vec<Fulfillment>> {
        let oracle = self.config.oracle()?;
        let rrp = RrpContract::new(self.config.rrp)?;
        let correlator = if options.unscoped {
            Correlator::unscoped(self.ledger.clone(), rrp)
        } else {
            Correlator::new(self.ledger.clone(), rrp, oracle.oracle_node_id)
        };
        let contract = self.contract(kind)?;
        let call = contract.request_call()?;
        let event = contract.request_event()?.clone();
        let recipient = options.recipient.unwrap_or_else(|| self.ledger.address());

        let mut correlations = Vec::with_capacity(options.count);
        for n in 0..options.count {
            info!("Requesting {} {}/{}", call.function, n + 1, options.count);
            let tx = contract.request_tx(recipient, options.max)?;
            correlations.push(correlator.request(tx, &event, call.shape).await?);
        }
        info!("Waiting for {} oracle responses", correlations.len());
        join_all(correlations.into_iter().map(Correlation::wait))
            .await
            .into_iter()
            .collect()
    }

    /// Resumable mint over the first column of `addresses`.
    pub async fn mint(&self, kind: ContractKind, addresses: &Path, checkpoint: &Path) -> Result<RunSummary> {
        let contract = self.contract(kind)?;
        let list = load_address_column(self.store.path_of(addresses))?;
        let done = self.store.checkpoint(checkpoint);
        info!(
            "Already done for {}, pending: {}, total: {}",
            done.len(),
            done.pending_in(&list),
            list.len()
        );

        let result = batch::run(
            &list,
            done,
            |target| {
                let tx = contract.batch_tx(target);
                async move { self.ledger.send_transaction(tx?).await }
            },
            |progress| self.store.save_checkpoint(checkpoint, progress),
        )
        .await;
        match result {
            Ok((_, summary)) => {
                info!("Done minting for all! {} submitted, {} skipped", summary.submitted, summary.skipped);
                Ok(summary)
            }
            Err(failure) => {
                error!("{}", failure);
                Err(failure.error)
            }
        }
    }
}
