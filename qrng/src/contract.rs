use crate::error::{Error, Result};
use crate::ledger::TxRequest;
use std::fmt;
use std::fs;
use std::path::Path;
use web3::ethabi::{self, Contract, Event, ParamType, Token};
use web3::types::{Address, H256, U256};

/// Fragment of the oracle's request-response protocol contract (AirnodeRrpV0).
const RRP_ABI: &str = r#"[
  {"type":"function","name":"requestWithdrawal","stateMutability":"nonpayable","constant":false,
   "inputs":[{"name":"airnode","type":"address"},{"name":"sponsorWallet","type":"address"}],"outputs":[]},
  {"type":"event","name":"FulfilledRequest","anonymous":false,
   "inputs":[{"name":"airnode","type":"address","indexed":true},
             {"name":"requestId","type":"bytes32","indexed":true},
             {"name":"data","type":"bytes","indexed":false}]},
  {"type":"event","name":"FailedRequest","anonymous":false,
   "inputs":[{"name":"airnode","type":"address","indexed":true},
             {"name":"requestId","type":"bytes32","indexed":true},
             {"name":"errorMessage","type":"string","indexed":false}]},
  {"type":"event","name":"RequestedWithdrawal","anonymous":false,
   "inputs":[{"name":"airnode","type":"address","indexed":true},
             {"name":"sponsor","type":"address","indexed":true},
             {"name":"withdrawalRequestId","type":"bytes32","indexed":true},
             {"name":"sponsorWallet","type":"address","indexed":false}]},
  {"type":"event","name":"FulfilledWithdrawal","anonymous":false,
   "inputs":[{"name":"airnode","type":"address","indexed":true},
             {"name":"sponsor","type":"address","indexed":true},
             {"name":"withdrawalRequestId","type":"bytes32","indexed":true},
             {"name":"sponsorWallet","type":"address","indexed":false},
             {"name":"amount","type":"uint256","indexed":false}]}
]"#;

/// Number of special tokens the NFT contract is deployed with.
pub const NFT_TOTAL_SPECIALS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    Nft,
    Raffle,
    Picker,
    Spooky,
}

/// How a requester contract wants its fulfillment payload read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Uint256,
    Uint256Array,
    Bytes,
}

/// Request entry point of a requester contract and the event it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCall {
    pub function: &'static str,
    pub event: &'static str,
    pub shape: ResponseShape,
}

impl ContractKind {
    pub const ALL: [ContractKind; 4] = [ContractKind::Nft, ContractKind::Raffle, ContractKind::Picker, ContractKind::Spooky];

    /// Key in the deployment registry, both file name prefix and field name.
    pub fn key(&self) -> &'static str {
        match self {
            ContractKind::Nft => "nft",
            ContractKind::Raffle => "raffle",
            ContractKind::Picker => "picker",
            ContractKind::Spooky => "spooky",
        }
    }

    pub fn artifact_name(&self) -> &'static str {
        match self {
            ContractKind::Nft => "NFT",
            ContractKind::Raffle => "Raffle",
            ContractKind::Picker => "Picker",
            ContractKind::Spooky => "Spooky",
        }
    }

    pub fn request(&self) -> Option<RequestCall> {
        match self {
            ContractKind::Nft | ContractKind::Spooky => Some(RequestCall {
                function: "requestToken",
                event: "RequestedToken",
                shape: ResponseShape::Uint256,
            }),
            ContractKind::Picker => Some(RequestCall {
                function: "requestNumber",
                event: "RequestedUint",
                shape: ResponseShape::Uint256,
            }),
            ContractKind::Raffle => None,
        }
    }

    /// Per-address call the batch minter issues.
    pub fn batch_function(&self) -> Option<&'static str> {
        match self {
            ContractKind::Nft => Some("mintShinny"),
            ContractKind::Spooky => Some("requestToken"),
            ContractKind::Raffle | ContractKind::Picker => None,
        }
    }

    pub fn constructor_args(&self, rrp: Address) -> Vec<Token> {
        match self {
            ContractKind::Nft => vec![Token::Address(rrp), Token::Uint(NFT_TOTAL_SPECIALS.into())],
            _ => vec![Token::Address(rrp)],
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.artifact_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Uint(U256),
    Uints(Vec<U256>),
    Bytes(Vec<u8>),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Uint(v) => write!(f, "{}", v),
            Response::Uints(vs) => {
                let parts: Vec<String> = vs.iter().map(U256::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Response::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl ResponseShape {
    pub fn decode(&self, payload: &[u8]) -> Result<Response> {
        let decode_err = |e: ethabi::Error| Error::Decode(format!("{:?} payload of {} bytes: {}", self, payload.len(), e));
        match self {
            ResponseShape::Uint256 => match ethabi::decode(&[ParamType::Uint(256)], payload).map_err(decode_err)?.pop() {
                Some(Token::Uint(v)) => Ok(Response::Uint(v)),
                other => Err(Error::Decode(format!("expected uint256, got {:?}", other))),
            },
            ResponseShape::Uint256Array => {
                let kind = ParamType::Array(Box::new(ParamType::Uint(256)));
                match ethabi::decode(&[kind], payload).map_err(decode_err)?.pop() {
                    Some(Token::Array(items)) => items
                        .into_iter()
                        .map(|t| t.into_uint().ok_or_else(|| Error::Decode("non-integer array item".into())))
                        .collect::<Result<Vec<_>>>()
                        .map(Response::Uints),
                    other => Err(Error::Decode(format!("expected uint256[], got {:?}", other))),
                }
            }
            ResponseShape::Bytes => Ok(Response::Bytes(payload.to_vec())),
        }
    }
}

/// Compiled contract as written by the hardhat toolchain.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub abi: Contract,
    pub bytecode: Vec<u8>,
}

impl Artifact {
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw)?;
        let abi = value
            .get("abi")
            .cloned()
            .ok_or_else(|| Error::Configuration("artifact has no abi".into()))?;
        let abi: Contract = serde_json::from_value(abi)?;
        let bytecode = value.get("bytecode").and_then(|b| b.as_str()).unwrap_or("0x");
        let bytecode = hex::decode(bytecode.trim_start_matches("0x"))
            .map_err(|e| Error::Configuration(format!("artifact bytecode is not hex: {}", e)))?;
        Ok(Self { abi, bytecode })
    }

    /// Reads `<dir>/contracts/<Name>.sol/<Name>.json`.
    pub fn load<P: AsRef<Path>>(dir: P, kind: ContractKind) -> Result<Self> {
        let name = kind.artifact_name();
        let path = dir.as_ref().join("contracts").join(format!("{}.sol", name)).join(format!("{}.json", name));
        let raw = fs::read(&path)
            .map_err(|e| Error::Configuration(format!("cannot read artifact {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn deploy_tx(&self, args: &[Token]) -> Result<TxRequest> {
        if self.bytecode.is_empty() {
            return Err(Error::Configuration("artifact has no bytecode".into()));
        }
        let init_code = match &self.abi.constructor {
            Some(constructor) => constructor.encode_input(self.bytecode.clone(), args)?,
            None if args.is_empty() => self.bytecode.clone(),
            None => return Err(Error::InvalidInput("constructor arguments given to a contract without constructor".into())),
        };
        Ok(TxRequest::deploy(init_code))
    }
}

/// A deployed requester contract.
#[derive(Debug, Clone)]
pub struct RequesterContract {
    pub kind: ContractKind,
    pub address: Address,
    pub artifact: Artifact,
}

impl RequesterContract {
    pub fn new(kind: ContractKind, address: Address, artifact: Artifact) -> Self {
        Self { kind, address, artifact }
    }

    pub fn call_tx(&self, function: &str, args: &[Token]) -> Result<TxRequest> {
        let data = self.artifact.abi.function(function)?.encode_input(args)?;
        Ok(TxRequest::call(self.address, data))
    }

    pub fn request_call(&self) -> Result<RequestCall> {
        self.kind
            .request()
            .ok_or_else(|| Error::InvalidInput(format!("{} does not take randomness requests", self.kind)))
    }

    /// Request transaction. Picker takes an upper bound, token contracts a recipient.
    pub fn request_tx(&self, recipient: Address, max: u8) -> Result<TxRequest> {
        let call = self.request_call()?;
        let args = match self.kind {
            ContractKind::Picker => vec![Token::Uint(max.into())],
            _ => vec![Token::Address(recipient)],
        };
        self.call_tx(call.function, &args)
    }

    pub fn request_event(&self) -> Result<&Event> {
        Ok(self.artifact.abi.event(self.request_call()?.event)?)
    }

    pub fn batch_tx(&self, target: Address) -> Result<TxRequest> {
        let function = self
            .kind
            .batch_function()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no batch mint", self.kind)))?;
        self.call_tx(function, &[Token::Address(target)])
    }

    pub fn set_request_parameters_tx(&self, airnode: Address, endpoint_id: H256, sponsor_wallet: Address) -> Result<TxRequest> {
        self.call_tx(
            "setRequestParameters",
            &[
                Token::Address(airnode),
                Token::FixedBytes(endpoint_id.as_bytes().to_vec()),
                Token::Address(sponsor_wallet),
            ],
        )
    }

    pub fn set_base_uri_tx(&self, base_uri: &str) -> Result<TxRequest> {
        self.call_tx("setBaseURI", &[Token::String(base_uri.to_string())])
    }
}

/// The oracle's request-response protocol contract.
#[derive(Debug, Clone)]
pub struct RrpContract {
    pub address: Address,
    pub abi: Contract,
}

impl RrpContract {
    pub fn new(address: Address) -> Result<Self> {
        Ok(Self {
            address,
            abi: Contract::load(RRP_ABI.as_bytes())?,
        })
    }

    pub fn event(&self, name: &str) -> Result<&Event> {
        Ok(self.abi.event(name)?)
    }

    pub fn request_withdrawal_tx(&self, airnode: Address, sponsor_wallet: Address) -> Result<TxRequest> {
        let data = self
            .abi
            .function("requestWithdrawal")?
            .encode_input(&[Token::Address(airnode), Token::Address(sponsor_wallet)])?;
        Ok(TxRequest::call(self.address, data))
    }
}
