//! Layered pipeline configuration.
//!
//! Precedence: built-in defaults < TOML file < `MEDLEDGER_*` environment
//! variables (nested keys separated by `__`, e.g.
//! `MEDLEDGER_LEDGER__CHAIN_ID=1337`).
//!
//! The custodial signing key is deliberately not part of this struct; load it
//! with `Signer::from_hex` from wherever secrets live.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::MedledgerError;
use crate::eth::Address;
use crate::ledger::{JsonRpcLedger, LedgerClient, LedgerSettings, DEFAULT_GAS_LIMIT};
use crate::retry::RetryPolicy;
use crate::store::{BlobStore, IpfsStore, DEFAULT_IPFS_API};

const WEI_PER_GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStoreConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_IPFS_API.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Address of the deployed records contract. Required.
    pub contract_address: Option<String>,
    pub gas_limit: u64,
    pub gas_price_gwei: u64,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:7545".to_string(),
            chain_id: 1337,
            contract_address: None,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price_gwei: 20,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub content_store: ContentStoreConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Defaults, then `path` (if it exists), then the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MedledgerError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("MEDLEDGER_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, MedledgerError> {
        Ok(figment.extract()?)
    }

    pub fn contract_address(&self) -> Result<Address, MedledgerError> {
        let raw = self
            .ledger
            .contract_address
            .as_deref()
            .ok_or_else(|| MedledgerError::Config("ledger.contract_address is not set".into()))?;
        raw.parse()
            .map_err(|_| MedledgerError::Config(format!("invalid contract address: {}", raw)))
    }

    pub fn ledger_settings(&self) -> Result<LedgerSettings, MedledgerError> {
        let mut settings = LedgerSettings::new(self.contract_address()?, self.ledger.chain_id);
        settings.gas_limit = self.ledger.gas_limit;
        settings.gas_price_wei = u128::from(self.ledger.gas_price_gwei) * WEI_PER_GWEI;
        settings.timeout = Duration::from_secs(self.ledger.timeout_secs);
        settings.retry = self.retry;
        Ok(settings)
    }

    /// Blob client over the configured IPFS API.
    pub fn blob_store(&self) -> Result<BlobStore, MedledgerError> {
        let timeout = Duration::from_secs(self.content_store.timeout_secs);
        let ipfs = IpfsStore::new(&self.content_store.api_url, timeout)?;
        Ok(BlobStore::new(Arc::new(ipfs), timeout))
    }

    /// Ledger client over the configured JSON-RPC endpoint.
    pub fn ledger_client(&self) -> Result<LedgerClient, MedledgerError> {
        let settings = self.ledger_settings()?;
        let rpc = JsonRpcLedger::new(&self.ledger.rpc_url, settings.timeout)?;
        Ok(LedgerClient::new(Arc::new(rpc), settings))
    }
}
