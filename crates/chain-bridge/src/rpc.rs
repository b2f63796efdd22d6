//! Chain RPC - the node-facing collaborator
//!
//! Every interaction with a main or side chain node goes through [`ChainRpc`],
//! so the synchronizer and builders can be driven by an in-memory chain in tests.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use cross_chain_types::{BlockInfo, Hash256, ProgramHash, UtxoInfo};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Connection details of a chain node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpoint {
    /// JSON-RPC url, e.g. http://127.0.0.1:20336
    pub url: String,
    /// Optional basic-auth user
    #[serde(default)]
    pub user: Option<String>,
    /// Optional basic-auth password
    #[serde(default)]
    pub pass: Option<String>,
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            pass: None,
        }
    }
}

/// Calls the arbiter needs from a chain node
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Height of the chain tip
    async fn get_current_height(&self) -> Result<u32, RpcError>;

    /// Full block at `height`
    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, RpcError>;

    /// Submit a serialized transaction, returning its id
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash256, RpcError>;

    /// Unspent outputs the node knows for `addresses`
    async fn get_unspent_utxos(&self, addresses: &[ProgramHash]) -> Result<Vec<UtxoInfo>, RpcError>;

    /// Subset of `source_txs` whose cross-chain transfer has already been executed
    async fn get_exist_cross_chain_transactions(
        &self,
        source_txs: &[Hash256],
    ) -> Result<Vec<Hash256>, RpcError>;
}

/// JSON-RPC client for a chain node
pub struct JsonRpcChainClient {
    client: HttpClient,
    url: String,
}

impl JsonRpcChainClient {
    /// Create a client; nothing is sent until the first call
    pub fn new(endpoint: &RpcEndpoint, timeout: Duration) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        if let (Some(user), Some(pass)) = (&endpoint.user, &endpoint.pass) {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
            let value = HeaderValue::from_str(&format!("Basic {}", token))
                .map_err(|e| RpcError::Transport(format!("invalid credentials: {}", e)))?;
            headers.insert("Authorization", value);
        }

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .set_headers(headers)
            .build(&endpoint.url)
            .map_err(RpcError::from)?;

        Ok(Self {
            client,
            url: endpoint.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn params<I>(entries: I) -> Result<ObjectParams, RpcError>
    where
        I: IntoIterator<Item = (&'static str, serde_json::Value)>,
    {
        let mut params = ObjectParams::new();
        for (name, value) in entries {
            params
                .insert(name, value)
                .map_err(|e| RpcError::Decode(e.to_string()))?;
        }
        Ok(params)
    }
}

#[async_trait]
impl ChainRpc for JsonRpcChainClient {
    async fn get_current_height(&self) -> Result<u32, RpcError> {
        let count: u32 = self.client.request("getblockcount", rpc_params![]).await?;
        // block count includes genesis
        Ok(count.saturating_sub(1))
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, RpcError> {
        let params = Self::params([("height", serde_json::json!(height))])?;
        let block: BlockInfo = self.client.request("getblockbyheight", params).await?;
        if block.height != height {
            return Err(RpcError::Decode(format!(
                "requested block {} but node returned {}",
                height, block.height
            )));
        }
        Ok(block)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash256, RpcError> {
        let data = base64::engine::general_purpose::STANDARD.encode(raw);
        let params = Self::params([("data", serde_json::json!(data))])?;
        let tx_id: Hash256 = self.client.request("sendrawtransaction", params).await?;
        tracing::debug!("Node {} accepted transaction {}", self.url, tx_id);
        Ok(tx_id)
    }

    async fn get_unspent_utxos(&self, addresses: &[ProgramHash]) -> Result<Vec<UtxoInfo>, RpcError> {
        let addresses: Vec<String> = addresses.iter().map(|a| a.to_address()).collect();
        let params = Self::params([("addresses", serde_json::json!(addresses))])?;
        Ok(self.client.request("listunspent", params).await?)
    }

    async fn get_exist_cross_chain_transactions(
        &self,
        source_txs: &[Hash256],
    ) -> Result<Vec<Hash256>, RpcError> {
        let txs: Vec<String> = source_txs.iter().map(|h| h.to_string()).collect();
        let params = Self::params([("txs", serde_json::json!(txs))])?;
        Ok(self
            .client
            .request("getexistcrosschaintransactions", params)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults_without_credentials() {
        let endpoint: RpcEndpoint =
            serde_json::from_str(r#"{"url":"http://127.0.0.1:20336"}"#).unwrap();
        assert!(endpoint.user.is_none());
        assert!(endpoint.pass.is_none());
    }

    #[test]
    fn test_client_builds_with_basic_auth() {
        let endpoint = RpcEndpoint {
            url: "http://127.0.0.1:20336".to_string(),
            user: Some("arbiter".to_string()),
            pass: Some("secret".to_string()),
        };
        let client = JsonRpcChainClient::new(&endpoint, Duration::from_secs(5)).unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:20336");
    }

    #[test]
    fn test_client_rejects_bad_url() {
        let endpoint = RpcEndpoint::new("not a url");
        assert!(JsonRpcChainClient::new(&endpoint, Duration::from_secs(5)).is_err());
    }
}
