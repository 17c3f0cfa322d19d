//! Wire framing between client and ingest server
//!
//! Every frame is a big-endian `u32` length followed by a bincode body.
//! Requests carry a [`MessageSet`](crate::MessageSet), replies an
//! [`Ack`](crate::Ack). A connection carries any number of request/ack pairs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ContractError;

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a value into a frame body
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ContractError> {
    let body = bincode::serialize(value).map_err(|e| ContractError::wire(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ContractError::wire(format!(
            "frame too large: {} > {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    Ok(body)
}

/// Decode a frame body
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ContractError> {
    bincode::deserialize(body).map_err(|e| ContractError::wire(e.to_string()))
}

/// Write one length-prefixed frame and flush
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ContractError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(value)?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
///
/// Returns `Ok(None)` on a clean end-of-stream before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ContractError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(ContractError::wire(format!(
            "frame too large: {} > {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body).map(Some)
}
