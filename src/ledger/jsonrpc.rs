//! `LedgerRpc` over Ethereum JSON-RPC 2.0 via HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::LedgerRpc;
use crate::error::{MedledgerError, TransportKind};
use crate::eth::{from_hex_prefixed, to_hex_prefixed, Address, SignedTransaction};

/// Error messages a node uses when it refuses, rather than fails to process,
/// a request.
const REJECTION_MARKERS: [&str; 6] = [
    "revert",
    "nonce",
    "insufficient funds",
    "gas",
    "underpriced",
    "invalid sender",
];

/// Responses to a re-broadcast of a transaction the node already holds.
const ALREADY_KNOWN_MARKERS: [&str; 2] = ["already known", "known transaction"];

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

pub struct JsonRpcLedger {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, MedledgerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, MedledgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MedledgerError::transport(
                TransportKind::Protocol,
                format!("{} returned HTTP {}", method, status),
            ));
        }

        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| MedledgerError::transport(TransportKind::Protocol, e.to_string()))?;

        if let Some(error) = envelope.error {
            return Err(classify_rpc_error(method, error));
        }
        envelope.result.ok_or_else(|| {
            MedledgerError::transport(TransportKind::Protocol, format!("{} returned no result", method))
        })
    }
}

/// Code 3 is the standard "execution reverted" code; other refusals are
/// recognised by message.
fn classify_rpc_error(method: &str, error: RpcErrorObject) -> MedledgerError {
    let message = error.message.to_ascii_lowercase();
    if error.code == 3 || REJECTION_MARKERS.iter().any(|m| message.contains(m)) {
        MedledgerError::LedgerRejected(error.message)
    } else {
        MedledgerError::transport(
            TransportKind::Protocol,
            format!("{} failed ({}): {}", method, error.code, error.message),
        )
    }
}

fn parse_quantity(text: &str) -> Result<u64, MedledgerError> {
    let digits = text.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|_| MedledgerError::malformed(format!("invalid quantity: {}", text)))
}

#[async_trait]
impl LedgerRpc for JsonRpcLedger {
    async fn transaction_count(&self, address: &Address) -> Result<u64, MedledgerError> {
        let count: String = self
            .request("eth_getTransactionCount", json!([address.to_checksum(), "pending"]))
            .await?;
        parse_quantity(&count)
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, MedledgerError> {
        match self
            .request::<String>("eth_sendRawTransaction", json!([tx.raw_hex()]))
            .await
        {
            Ok(hash) => Ok(hash),
            Err(MedledgerError::LedgerRejected(message))
            | Err(MedledgerError::Transport { detail: message, .. })
                if ALREADY_KNOWN_MARKERS
                    .iter()
                    .any(|m| message.to_ascii_lowercase().contains(m)) =>
            {
                Ok(tx.hash_hex())
            }
            Err(err) => Err(err),
        }
    }

    async fn call(&self, from: &Address, to: &Address, data: &[u8]) -> Result<Vec<u8>, MedledgerError> {
        let output: String = self
            .request(
                "eth_call",
                json!([
                    {
                        "from": from.to_checksum(),
                        "to": to.to_checksum(),
                        "data": to_hex_prefixed(data),
                    },
                    "latest"
                ]),
            )
            .await?;
        from_hex_prefixed(&output)
    }
}
