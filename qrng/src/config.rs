use crate::error::{Error, Result};
use crate::store::{Document, Store};
use crate::utils::parse_address;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use web3::types::{Address, H256};

/// AirnodeRrpV0 deployment shared by the supported chains.
pub const DEFAULT_RRP_ADDRESS: &str = "0xa0AD79D995DdeeB18a14eAef56A549A04e3Aa1Bd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMode {
    Http,
    Socket,
}

impl FromStr for RpcMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "socket" | "ws" => Ok(Self::Socket),
            _ => Err("Invalid rpc mode: http and socket are supported".to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Goerli,
    Mumbai,
    Polygon,
    Arbitrum,
    Optimism,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Goerli => "goerli",
            Network::Mumbai => "mumbai",
            Network::Polygon => "polygon",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Goerli => 5,
            Network::Mumbai => 80001,
            Network::Polygon => 137,
            Network::Arbitrum => 42161,
            Network::Optimism => 10,
        }
    }

    /// Default sponsor wallet top-up as (amount in ether units, currency).
    pub fn default_funding(&self) -> (&'static str, &'static str) {
        match self {
            Network::Goerli => ("0.1", "ETH"),
            Network::Mumbai => ("0.1", "MATIC"),
            Network::Polygon => ("10", "MATIC"),
            Network::Arbitrum => ("0.008", "ETH"),
            Network::Optimism => ("0.012", "ETH"),
        }
    }

    /// Environment variable holding the endpoint for `mode`.
    pub fn url_var(&self, mode: RpcMode) -> String {
        match mode {
            RpcMode::Http => format!("{}_URL", self.name().to_uppercase()),
            RpcMode::Socket => format!("{}WS_URL", self.name().to_uppercase()),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "goerli" => Ok(Self::Goerli),
            "mumbai" => Ok(Self::Mumbai),
            "polygon" => Ok(Self::Polygon),
            "arbitrum" => Ok(Self::Arbitrum),
            "optimism" => Ok(Self::Optimism),
            _ => Err("Invalid network".to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub rpc_mode: RpcMode,
    pub rpc_url: Option<String>,
    pub signing_key: Option<String>,
    pub oracle_config_path: PathBuf,
    pub root: PathBuf,
    pub artifacts: PathBuf,
    pub rrp: Address,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_receipt_polls: u64,
}

impl Config {
    pub fn store(&self) -> Store {
        Store::new(self.root.clone())
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.store().path_of(&self.artifacts)
    }

    pub fn signing_key(&self) -> Result<&str> {
        self.signing_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Configuration("there is no signing key available".into()))
    }

    pub fn rpc_url(&self) -> Result<&str> {
        self.rpc_url.as_deref().filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            Error::Configuration(format!(
                "no endpoint for {}, set {}",
                self.network.name(),
                self.network.url_var(self.rpc_mode)
            ))
        })
    }

    pub fn oracle(&self) -> Result<OracleConfig> {
        OracleConfig::from_document(&self.store().load(&self.oracle_config_path))
    }
}

/// Oracle node parameters, read once and never written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleConfig {
    pub oracle_node_id: Address,
    pub extended_public_key: String,
    pub endpoint_id: H256,
    pub endpoint_id_array: Option<H256>,
}

#[derive(Deserialize)]
struct OracleDocument {
    airnode: String,
    xpub: String,
    #[serde(rename = "endpointIdUint256")]
    endpoint_id_uint256: String,
    #[serde(rename = "endpointIdUint256Array", default)]
    endpoint_id_uint256_array: Option<String>,
}

fn parse_endpoint(name: &str, raw: &str) -> Result<H256> {
    let hex_part = raw.trim().trim_start_matches("0x");
    if hex_part.len() != 64 {
        return Err(Error::Configuration(format!("`{}` is not a 32-byte id", name)));
    }
    H256::from_str(hex_part).map_err(|_| Error::Configuration(format!("`{}` is not a 32-byte id", name)))
}

impl OracleConfig {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let raw: OracleDocument = serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|e| Error::Configuration(format!("oracle config: {}", e)))?;
        let oracle_node_id = parse_address(&raw.airnode)
            .map_err(|_| Error::Configuration("`airnode` is not an address".into()))?;
        let endpoint_id_array = match raw.endpoint_id_uint256_array {
            Some(id) => Some(parse_endpoint("endpointIdUint256Array", &id)?),
            None => None,
        };
        Ok(Self {
            oracle_node_id,
            extended_public_key: raw.xpub,
            endpoint_id: parse_endpoint("endpointIdUint256", &raw.endpoint_id_uint256)?,
            endpoint_id_array,
        })
    }
}
