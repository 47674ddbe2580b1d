//! Nonce RPC server.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::errors::RpcError;
use crate::protocol::{
    read_frame, write_frame, NonceMessage, RpcCall, RpcReply, RpcRequest, RpcResponse,
    ValidMessage, PROTOCOL_VERSION,
};
use crate::redeem::{Getter, RedeemRequest, Redeemer};
use crate::service::NonceService;

/// First pause after a failed accept.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest pause between accept retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before the next accept after a failure; doubles up to the cap.
fn accept_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => ACCEPT_BACKOFF_MIN,
        Some(delay) => (delay * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

/// Exposes a [`NonceService`] in-process and over TCP.
#[derive(Clone)]
pub struct NonceServer {
    service: Arc<NonceService>,
}

impl NonceServer {
    pub fn new(service: Arc<NonceService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &NonceService {
        &self.service
    }

    /// Answer one call.
    pub fn dispatch(&self, call: RpcCall) -> RpcReply {
        match call {
            RpcCall::Nonce => match self.service.nonce() {
                Ok(nonce) => RpcReply::Nonce(NonceMessage { nonce }),
                Err(e) => {
                    error!(error = %e, "Failed to generate nonce");
                    RpcReply::Error(format!("unable to create nonce: {}", e))
                }
            },
            RpcCall::Redeem(message) => RpcReply::Valid(ValidMessage {
                valid: self.service.valid(&message.nonce),
            }),
        }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RpcError> {
        let local = listener.local_addr()?;
        info!(
            address = %local,
            prefix = %self.service.prefix(),
            "Nonce server listening"
        );

        let mut backoff = None;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    backoff = None;
                    debug!(peer = %peer, "Accepted nonce connection");
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            warn!(peer = %peer, error = %e, "Nonce connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    // Typically EMFILE; retrying at once would spin.
                    let delay = accept_backoff(backoff);
                    backoff = Some(delay);
                    error!(error = %e, retry_in = ?delay, "Failed to accept connection");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Handle a single connection
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), RpcError> {
        stream.set_nodelay(true)?;

        while let Some(frame) = read_frame(&mut stream).await? {
            let request: RpcRequest = serde_json::from_slice(&frame)
                .map_err(|e| RpcError::InvalidMessage(e.to_string()))?;

            if request.version != PROTOCOL_VERSION {
                let reply = RpcResponse {
                    version: PROTOCOL_VERSION,
                    reply: RpcReply::Error(format!(
                        "unsupported protocol version {}",
                        request.version
                    )),
                };
                write_frame(&mut stream, &reply).await?;
                return Err(RpcError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    actual: request.version,
                });
            }

            // The call runs to completion before anything is written, so a
            // client that goes away mid-call cannot leave a redemption half
            // applied.
            let reply = self.dispatch(request.call);
            let response = RpcResponse {
                version: PROTOCOL_VERSION,
                reply,
            };
            write_frame(&mut stream, &response).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Getter for NonceServer {
    async fn nonce(&self) -> Result<NonceMessage, RpcError> {
        let nonce = self
            .service
            .nonce()
            .map_err(|e| RpcError::Remote(format!("unable to create nonce: {}", e)))?;
        Ok(NonceMessage { nonce })
    }
}

#[async_trait]
impl Redeemer for NonceServer {
    async fn redeem(&self, request: RedeemRequest) -> Result<ValidMessage, RpcError> {
        Ok(ValidMessage {
            valid: self.service.valid(&request.nonce),
        })
    }
}
