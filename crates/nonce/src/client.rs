//! Nonce RPC client.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::errors::RpcError;
use crate::protocol::{
    read_frame, write_frame, NonceMessage, RpcCall, RpcReply, RpcRequest, RpcResponse,
    ValidMessage, PROTOCOL_VERSION,
};
use crate::redeem::{Getter, RedeemRequest, Redeemer};

/// Idle connections kept per client.
const DEFAULT_MAX_IDLE: usize = 8;

/// Client for a remote nonce service.
///
/// Connections are dialed lazily and pooled. A call takes a connection out
/// of the pool and only returns it after a complete response was read, so a
/// call that times out or is dropped mid-flight never leaves a half-read
/// stream for the next caller.
pub struct NonceClient {
    /// Remote address
    address: String,
    /// Timeout for a single call, including dialing
    timeout: Duration,
    /// Idle connections
    idle: Mutex<Vec<TcpStream>>,
    max_idle: usize,
}

impl NonceClient {
    /// Create a client; no connection is made until the first call.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            idle: Mutex::new(Vec::new()),
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    /// Create a client and dial one connection up front.
    pub async fn connect(address: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = Self::new(address, timeout);
        let stream = tokio::time::timeout(timeout, client.dial())
            .await
            .map_err(|_| RpcError::Timeout(timeout))??;
        client.idle.lock().push(stream);
        Ok(client)
    }

    /// Get the remote address
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn dial(&self) -> Result<TcpStream, RpcError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| RpcError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        stream.set_nodelay(true)?;
        debug!(address = %self.address, "Connected to nonce service");
        Ok(stream)
    }

    async fn call(&self, call: RpcCall) -> Result<RpcReply, RpcError> {
        let request = RpcRequest {
            version: PROTOCOL_VERSION,
            call,
        };

        let pooled = self.idle.lock().pop();
        let (stream, frame) = tokio::time::timeout(self.timeout, async {
            let mut stream = match pooled {
                Some(stream) => stream,
                None => self.dial().await?,
            };
            write_frame(&mut stream, &request).await?;
            let frame = read_frame(&mut stream)
                .await?
                .ok_or(RpcError::ConnectionClosed)?;
            Ok::<_, RpcError>((stream, frame))
        })
        .await
        .map_err(|_| RpcError::Timeout(self.timeout))??;

        let response: RpcResponse = serde_json::from_slice(&frame)
            .map_err(|e| RpcError::InvalidMessage(e.to_string()))?;

        if response.version != PROTOCOL_VERSION {
            return Err(RpcError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: response.version,
            });
        }

        {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_idle {
                idle.push(stream);
            }
        }

        match response.reply {
            RpcReply::Error(message) => Err(RpcError::Remote(message)),
            reply => Ok(reply),
        }
    }
}

#[async_trait]
impl Getter for NonceClient {
    async fn nonce(&self) -> Result<NonceMessage, RpcError> {
        match self.call(RpcCall::Nonce).await? {
            RpcReply::Nonce(message) => Ok(message),
            other => Err(RpcError::InvalidMessage(format!(
                "unexpected reply to nonce call: {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Redeemer for NonceClient {
    async fn redeem(&self, request: RedeemRequest) -> Result<ValidMessage, RpcError> {
        trace!(address = %self.address, "Redeeming nonce remotely");
        let call = RpcCall::Redeem(NonceMessage {
            nonce: request.nonce,
        });
        match self.call(call).await? {
            RpcReply::Valid(message) => Ok(message),
            other => Err(RpcError::InvalidMessage(format!(
                "unexpected reply to redeem call: {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for NonceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
