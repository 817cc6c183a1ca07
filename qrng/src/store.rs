//! Small JSON documents persisted under a project root.
//!
//! A missing or unparsable document reads as empty; writes are last writer wins.
//! A write lands in a sibling temp file that is renamed over the target, so a
//! reader sees either the old document or the new one.

use crate::batch::RunCheckpoint;
use crate::contract::ContractKind;
use crate::error::Result;
use crate::utils::{checksum, parse_address};
use log::{info, warn};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use web3::types::Address;

pub type Document = Map<String, Value>;

const CHECKPOINT_FIELD: &str = "addresses";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The document becomes the full file contents.
    Replace,
    /// Shallow merge over the existing document; keys absent from the new one survive.
    Merge,
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Loads the document at `path`, `{}` when absent or unreadable.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Document {
        let full = self.path_of(path);
        let raw = match fs::read(&full) {
            Ok(raw) => raw,
            Err(_) => return Document::new(),
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) | Err(_) => {
                warn!("ignoring unparsable document {}", full.display());
                Document::new()
            }
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P, document: Document, mode: WriteMode) -> Result<()> {
        let full = self.path_of(&path);
        let merged = match mode {
            WriteMode::Replace => document,
            WriteMode::Merge => {
                let mut previous = self.load(&path);
                previous.extend(document);
                previous
            }
        };
        stage(&full, &Value::Object(merged))?
            .persist(&full)
            .map_err(|e| e.error)?;
        info!("File written to: {}", full.display());
        Ok(())
    }

    pub fn deployment_path(network: &str, kind: ContractKind) -> PathBuf {
        PathBuf::from("addresses").join(format!("{}{}.json", kind.key(), network))
    }

    /// Deployed address of `kind` on `network`, if one was recorded.
    pub fn deployment(&self, network: &str, kind: ContractKind) -> Option<Address> {
        let doc = self.load(Self::deployment_path(network, kind));
        doc.get(kind.key()).and_then(Value::as_str).and_then(|raw| parse_address(raw).ok())
    }

    pub fn record_deployment(&self, network: &str, kind: ContractKind, address: &Address) -> Result<()> {
        let mut doc = Document::new();
        doc.insert(kind.key().to_string(), Value::String(checksum(address)));
        self.write(Self::deployment_path(network, kind), doc, WriteMode::Replace)
    }

    /// Loads a run checkpoint; unparsable entries are dropped with a warning.
    pub fn checkpoint<P: AsRef<Path>>(&self, path: P) -> RunCheckpoint {
        let doc = self.load(path);
        let entries = doc.get(CHECKPOINT_FIELD).and_then(Value::as_array).cloned().unwrap_or_default();
        let mut checkpoint = RunCheckpoint::default();
        for entry in entries {
            match entry.as_str().map(parse_address) {
                Some(Ok(address)) => {
                    checkpoint.insert(address);
                }
                _ => warn!("skipping malformed checkpoint entry {}", entry),
            }
        }
        checkpoint
    }

    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P, checkpoint: &RunCheckpoint) -> Result<()> {
        let addresses = checkpoint.iter().map(|a| Value::String(format!("{:?}", a))).collect();
        let mut doc = Document::new();
        doc.insert(CHECKPOINT_FIELD.to_string(), Value::Array(addresses));
        self.write(path, doc, WriteMode::Replace)
    }
}

/// Writes `value` to a synced temp file next to `full`, ready to be renamed over it.
fn stage(full: &Path, value: &Value) -> Result<NamedTempFile> {
    let dir = match full.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut staged, value)?;
    staged.as_file().sync_all()?;
    Ok(staged)
}
