//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints over HTTP and a
//! `newHeads` subscription over websocket.
//! Handles hex string parsing and error handling.

use crate::chain::{ChainClient, HeaderStream};
use crate::types::{parse_hex_u256, parse_hex_u64, Block, BlockHeader};
use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Request id used for the `eth_subscribe` call on a fresh connection.
const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    ws_url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(url: String, ws_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            ws_url,
        }
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error from {}: {}", method, error);
        }

        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    async fn call_str(&self, method: &str, params: Value) -> Result<String> {
        let result = self.call(method, params).await?;
        result
            .as_str()
            .map(str::to_string)
            .with_context(|| format!("{} response is not a string", method))
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn current_height(&self) -> Result<u64> {
        let height = self.call_str("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&height).context("Failed to parse block number")
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let params = json!([format!("0x{:x}", number), true]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .with_context(|| format!("Failed to deserialize block {}", number))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        let params = json!([format!("0x{:x}", address), "latest"]);
        let count = self.call_str("eth_getTransactionCount", params).await?;
        parse_hex_u64(&count).context("Failed to parse transaction count")
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let params = json!([format!("0x{:x}", address), "latest"]);
        let balance = self.call_str("eth_getBalance", params).await?;
        debug!("RPC balance({:?}) returned raw: {}", address, balance);
        parse_hex_u256(&balance).context("Failed to parse balance")
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream> {
        let (mut ws, _response) = connect_async(self.ws_url.as_str())
            .await
            .with_context(|| format!("Failed connecting to {}", self.ws_url))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"]
        });
        ws.send(Message::Text(request.to_string()))
            .await
            .context("Failed to send eth_subscribe")?;

        // Wait for the ack carrying the subscription id
        loop {
            let message = ws
                .next()
                .await
                .context("Websocket closed before subscription was acknowledged")?
                .context("Websocket error while subscribing")?;
            match message {
                Message::Text(text) => {
                    if let Some(id) = parse_subscribe_ack(&text)? {
                        debug!("Subscribed to newHeads with id {}", id);
                        break;
                    }
                }
                Message::Close(frame) => {
                    anyhow::bail!("Websocket closed during subscribe: {:?}", frame)
                }
                _ => {}
            }
        }

        Ok(header_stream(ws))
    }
}

/// Turn an acknowledged websocket into a header stream.
///
/// A close frame or EOF ends the stream. A transport error or an
/// unparsable notification is yielded once, then the stream ends.
fn header_stream(ws: WsStream) -> HeaderStream {
    stream::unfold(Some(ws), |state| async move {
        let mut ws = state?;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match parse_head_notification(&text) {
                    Ok(Some(header)) => return Some((Ok(header), Some(ws))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("newHeads websocket closed: {:?}", frame);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some((Err(anyhow!(e).context("newHeads websocket error")), None))
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// Extract the subscription id from the response to `eth_subscribe`.
///
/// Returns `None` for unrelated messages.
fn parse_subscribe_ack(text: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(text).context("Invalid JSON from websocket")?;
    if json.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
        return Ok(None);
    }
    if let Some(error) = json.get("error") {
        anyhow::bail!("eth_subscribe rejected: {}", error);
    }
    json.get("result")
        .and_then(Value::as_str)
        .map(|id| Some(id.to_string()))
        .context("eth_subscribe response missing subscription id")
}

/// Parse an `eth_subscription` notification into a block header.
///
/// Returns `None` for messages that are not subscription notifications.
fn parse_head_notification(text: &str) -> Result<Option<BlockHeader>> {
    let json: Value = serde_json::from_str(text).context("Invalid JSON from websocket")?;
    if json.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let result = json
        .pointer("/params/result")
        .cloned()
        .context("Notification missing params.result")?;
    serde_json::from_value(result)
        .map(Some)
        .context("Failed to deserialize new head")
}
