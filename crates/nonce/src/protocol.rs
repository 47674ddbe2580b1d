//! Nonce RPC wire types and framing.
//!
//! Frames are a 4-byte big-endian length followed by a JSON document. A
//! connection carries any number of request/response pairs in sequence.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::RpcError;

/// Nonce protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (64KB). Nonce messages are tiny; anything larger is
/// a confused or hostile peer.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// `Nonce()` response and `Redeem()` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceMessage {
    pub nonce: String,
}

/// `Redeem()` response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidMessage {
    pub valid: bool,
}

/// RPC method selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcCall {
    /// Issue a new nonce
    Nonce,
    /// Redeem a nonce
    Redeem(NonceMessage),
}

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub version: u32,
    pub call: RpcCall,
}

/// Response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    Nonce(NonceMessage),
    Valid(ValidMessage),
    Error(String),
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub version: u32,
    pub reply: RpcReply,
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(stream: &mut W, message: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes =
        serde_json::to_vec(message).map_err(|e| RpcError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    // Write message length (4 bytes, big-endian)
    let len_bytes = (bytes.len() as u32).to_be_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream before the length prefix.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let message_len = u32::from_be_bytes(len_bytes) as usize;
    if message_len > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge {
            size: message_len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buffer = vec![0u8; message_len];
    stream.read_exact(&mut buffer).await?;
    Ok(Some(buffer))
}
