use crate::error::ProtocolError;
use crate::messages::ReliableMessage;

/// Maximum frame payload: 1 MiB.
pub const MAX_MSG_SIZE: u32 = 1_048_576;

/// Encode a `ReliableMessage` into a length-prefixed frame.
pub fn encode_reliable_msg(msg: &ReliableMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = postcard::to_allocvec(msg)?;
    if payload.len() > MAX_MSG_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a `ReliableMessage` from a payload (without length prefix).
pub fn decode_reliable_msg(payload: &[u8]) -> Result<ReliableMessage, ProtocolError> {
    Ok(postcard::from_bytes(payload)?)
}
