use clap::{Args, Parser, Subcommand};
use log::warn;
use qrng::{
    client::Web3Ledger,
    config::{Config, Network, RpcMode, DEFAULT_RRP_ADDRESS},
    contract::ContractKind,
    error::{Error, Result},
    tasks::{sponsor_wallets, RequestOptions, Tasks, DEFAULT_BASE_URI},
    utils::{checksum, parse_address, parse_ether},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use web3::types::{Address, U256};

fn address_arg(raw: &str) -> std::result::Result<Address, String> {
    parse_address(raw).map_err(|e| e.to_string())
}

fn ether_arg(raw: &str) -> std::result::Result<U256, String> {
    parse_ether(raw).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// goerli, mumbai, polygon, arbitrum or optimism
    #[clap(long, env = "NETWORK", default_value = "goerli", global = true)]
    network: Network,

    /// http or socket
    #[clap(long, default_value = "http", global = true)]
    rpc_mode: RpcMode,

    /// Endpoint, defaults to ${NETWORK}_URL or ${NETWORK}WS_URL
    #[clap(long, global = true)]
    rpc_url: Option<String>,

    #[clap(long, env = "WALLET_PK", hide_env_values = true, global = true)]
    signing_key: Option<String>,

    #[clap(long, default_value = "qrng.json", global = true)]
    oracle_config: PathBuf,

    /// Directory holding every document this tool reads or writes
    #[clap(long, default_value = ".", global = true)]
    root: PathBuf,

    #[clap(long, default_value = "artifacts", global = true)]
    artifacts: PathBuf,

    /// RPC request timeout in seconds
    #[clap(long, default_value_t = 30, global = true)]
    timeout: u64,

    #[clap(long, default_value_t = 1000, global = true)]
    poll_interval_ms: u64,

    #[clap(long, default_value_t = 120, global = true)]
    max_receipt_polls: u64,

    /// AirnodeRrpV0 address override
    #[clap(long, parse(try_from_str = address_arg), global = true)]
    rrp: Option<Address>,

    #[clap(subcommand)]
    command: Commands,
}

/// Contract kinds a command applies to; none given means the command's defaults.
#[derive(Args, Debug, Default, Clone, Copy)]
pub(crate) struct Kinds {
    #[clap(long)]
    nft: bool,
    #[clap(long)]
    raffle: bool,
    #[clap(long)]
    picker: bool,
    #[clap(long)]
    spooky: bool,
}

impl Kinds {
    fn chosen(&self) -> Vec<ContractKind> {
        [
            (self.nft, ContractKind::Nft),
            (self.raffle, ContractKind::Raffle),
            (self.picker, ContractKind::Picker),
            (self.spooky, ContractKind::Spooky),
        ]
        .into_iter()
        .filter_map(|(on, kind)| on.then(|| kind))
        .collect()
    }

    pub(crate) fn or(&self, defaults: &[ContractKind]) -> Vec<ContractKind> {
        let chosen = self.chosen();
        if chosen.is_empty() {
            defaults.to_vec()
        } else {
            chosen
        }
    }

    pub(crate) fn single(&self, default: ContractKind) -> Result<ContractKind> {
        match self.chosen().as_slice() {
            [] => Ok(default),
            [kind] => Ok(*kind),
            _ => Err(Error::InvalidInput("select exactly one contract".into())),
        }
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Deploy contracts and record their addresses
    Deploy {
        #[clap(flatten)]
        kinds: Kinds,
    },
    /// Fund sponsor wallets
    Fund {
        #[clap(flatten)]
        kinds: Kinds,
        /// Amount in ether units, defaults per network
        #[clap(long, parse(try_from_str = ether_arg))]
        amount: Option<U256>,
    },
    /// Set base URI and oracle request parameters
    Setup {
        #[clap(flatten)]
        kinds: Kinds,
        #[clap(long, default_value = DEFAULT_BASE_URI)]
        base_uri: String,
    },
    /// Request a withdrawal of sponsor wallet funds
    Withdraw {
        #[clap(flatten)]
        kinds: Kinds,
        /// Wait for the oracle node to fulfill the withdrawal
        #[clap(long)]
        wait: bool,
    },
    /// Request random numbers and print them as they are fulfilled
    Request {
        #[clap(flatten)]
        kinds: Kinds,
        #[clap(long, default_value_t = 1)]
        count: usize,
        /// Upper bound handed to the picker
        #[clap(long, default_value_t = 255)]
        max: u8,
        /// Token recipient, defaults to the signing account
        #[clap(long, parse(try_from_str = address_arg))]
        to: Option<Address>,
        /// Match fulfillments on request id only
        #[clap(long)]
        unscoped: bool,
    },
    /// Mint for every address in a CSV file, resuming from a checkpoint
    Mint {
        #[clap(flatten)]
        kinds: Kinds,
        #[clap(long, default_value = "addresses.csv")]
        addresses: PathBuf,
        #[clap(long, default_value = "done.json")]
        checkpoint: PathBuf,
    },
    /// Print the AirnodeRrpV0 address
    Airnode,
    /// Print derived sponsor wallets
    Sponsor {
        #[clap(flatten)]
        kinds: Kinds,
    },
}

const DEFAULT_KINDS: [ContractKind; 3] = [ContractKind::Nft, ContractKind::Raffle, ContractKind::Picker];

impl Cli {
    pub(crate) fn parse_args() -> Self {
        Cli::parse()
    }

    fn config(&self) -> Result<Config> {
        let rpc_url = self
            .rpc_url
            .clone()
            .or_else(|| std::env::var(self.network.url_var(self.rpc_mode)).ok());
        let rrp = match self.rrp {
            Some(rrp) => rrp,
            None => parse_address(DEFAULT_RRP_ADDRESS)?,
        };
        Ok(Config {
            network: self.network,
            rpc_mode: self.rpc_mode,
            rpc_url,
            signing_key: self.signing_key.clone(),
            oracle_config_path: self.oracle_config.clone(),
            root: self.root.clone(),
            artifacts: self.artifacts.clone(),
            rrp,
            timeout: Duration::from_secs(self.timeout),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_receipt_polls: self.max_receipt_polls,
        })
    }

    pub(crate) async fn run(self) -> Result<()> {
        let config = self.config()?;
        match &self.command {
            Commands::Airnode => {
                println!("{}", checksum(&config.rrp));
                Ok(())
            }
            Commands::Sponsor { kinds } => {
                for (kind, wallet) in sponsor_wallets(&config, &kinds.or(&DEFAULT_KINDS))? {
                    println!("{}: {}", kind, checksum(&wallet));
                }
                Ok(())
            }
            command => {
                let ledger = Arc::new(Web3Ledger::connect(&config).await?);
                command.execute(&Tasks::new(config, ledger)).await
            }
        }
    }
}

impl Commands {
    async fn execute(&self, tasks: &Tasks<Web3Ledger>) -> Result<()> {
        match self {
            Commands::Deploy { kinds } => tasks.deploy(&kinds.or(&DEFAULT_KINDS)).await.map(|_| ()),
            Commands::Fund { kinds, amount } => tasks.fund(&kinds.or(&DEFAULT_KINDS), *amount).await,
            Commands::Setup { kinds, base_uri } => {
                tasks.setup(&kinds.or(&[ContractKind::Nft, ContractKind::Raffle]), base_uri).await
            }
            Commands::Withdraw { kinds, wait } => tasks.withdraw(&kinds.or(&[ContractKind::Nft]), *wait).await.map(|_| ()),
            Commands::Request {
                kinds,
                count,
                max,
                to,
                unscoped,
            } => {
                let options = RequestOptions {
                    count: *count,
                    max: *max,
                    recipient: *to,
                    unscoped: *unscoped,
                };
                for fulfillment in tasks.request(kinds.single(ContractKind::Picker)?, options).await? {
                    println!("{:?}: {}", fulfillment.request_id, fulfillment.response);
                }
                Ok(())
            }
            Commands::Mint {
                kinds,
                addresses,
                checkpoint,
            } => {
                let kind = kinds.single(ContractKind::Spooky)?;
                tokio::select! {
                    result = tasks.mint(kind, addresses, checkpoint) => result.map(|_| ()),
                    _ = tokio::signal::ctrl_c() => {
                        warn!("Interrupted, progress so far is in {}", checkpoint.display());
                        Err(Error::Interrupted)
                    }
                }
            }
            Commands::Airnode | Commands::Sponsor { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_selects_defaults() {
        let kinds = Kinds::default();
        assert_eq!(kinds.or(&DEFAULT_KINDS), DEFAULT_KINDS.to_vec());
        assert_eq!(kinds.single(ContractKind::Picker).unwrap(), ContractKind::Picker);
    }

    #[test]
    fn flags_override_defaults() {
        let kinds = Kinds {
            raffle: true,
            spooky: true,
            ..Default::default()
        };
        assert_eq!(kinds.or(&DEFAULT_KINDS), vec![ContractKind::Raffle, ContractKind::Spooky]);
        assert!(kinds.single(ContractKind::Picker).is_err());
    }

    #[test]
    fn parses_mint_invocation() {
        let cli = Cli::try_parse_from([
            "qrng",
            "--network",
            "arbitrum",
            "--rpc-url",
            "http://localhost:8545",
            "mint",
            "--nft",
            "--checkpoint",
            "minted.json",
        ])
        .unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.network, Network::Arbitrum);
        assert_eq!(config.rpc_url.as_deref(), Some("http://localhost:8545"));
        assert_eq!(config.rrp, parse_address(DEFAULT_RRP_ADDRESS).unwrap());
        match cli.command {
            Commands::Mint { kinds, checkpoint, addresses } => {
                assert_eq!(kinds.single(ContractKind::Spooky).unwrap(), ContractKind::Nft);
                assert_eq!(checkpoint, PathBuf::from("minted.json"));
                assert_eq!(addresses, PathBuf::from("addresses.csv"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_network() {
        assert!(Cli::try_parse_from(["qrng", "--network", "mainnet", "airnode"]).is_err());
    }
}
