// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for packets on a byte stream.
//!
//! Each packet is written as one frame:
//! - 4 bytes: length of everything that follows (big-endian)
//! - 4 bytes: channel id
//! - 16 bytes: unique id
//! - 4 bytes: header length
//! - N bytes: header (JSON object)
//! - remaining bytes: body

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::packet::{Header, Packet};

/// Maximum frame size (64 MB)
/// Large enough for zipped templates pushed between nodes
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Size of the length prefix
pub const LENGTH_SIZE: usize = 4;

/// Fixed part of a frame after the length prefix (channel + uuid + header length)
pub const FIXED_SIZE: usize = 4 + 16 + 4;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("header JSON error: {0}")]
    Header(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Encode a packet to bytes for wire transmission
pub fn encode(packet: &Packet) -> Result<Bytes, FrameError> {
    let header = serde_json::to_vec(&packet.header)?;
    let length = FIXED_SIZE + header.len() + packet.body.len();
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_SIZE + length);
    buf.put_u32(length as u32);
    buf.put_u32(packet.channel);
    buf.put_slice(packet.unique_id.as_bytes());
    buf.put_u32(header.len() as u32);
    buf.put_slice(&header);
    buf.put(packet.body.clone());
    Ok(buf.freeze())
}

/// Decode a packet from a complete frame (length prefix included)
pub fn decode(mut bytes: Bytes) -> Result<Packet, FrameError> {
    if bytes.len() < LENGTH_SIZE {
        return Err(FrameError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "incomplete frame header",
        )));
    }

    let length = bytes.get_u32() as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }
    if bytes.len() < length {
        return Err(FrameError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "incomplete frame payload",
        )));
    }

    decode_payload(bytes.split_to(length))
}

/// Decode the part of a frame after the length prefix
fn decode_payload(mut payload: Bytes) -> Result<Packet, FrameError> {
    if payload.len() < FIXED_SIZE {
        return Err(FrameError::Malformed("payload shorter than fixed fields"));
    }

    let channel = payload.get_u32();
    let mut id = [0u8; 16];
    payload.copy_to_slice(&mut id);
    let header_len = payload.get_u32() as usize;
    if payload.len() < header_len {
        return Err(FrameError::Malformed("header length exceeds payload"));
    }

    let header_bytes = payload.split_to(header_len);
    let header: Header = if header_bytes.is_empty() {
        Header::new()
    } else {
        serde_json::from_slice(&header_bytes)?
    };

    Ok(Packet {
        channel,
        unique_id: Uuid::from_bytes(id),
        header,
        body: payload,
    })
}

/// Write a packet to an async writer
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), FrameError> {
    let encoded = encode(packet)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a packet from an async reader
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, FrameError> {
    let mut prefix = [0u8; LENGTH_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    decode_payload(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::channels;
    use serde_json::json;

    fn sample() -> Packet {
        Packet::from_value(
            channels::SERVICE_INFO_PUBLISHER,
            &json!({ "type": "STARTED", "name": "Lobby-1" }),
        )
        .unwrap()
        .with_body(vec![1u8, 2, 3])
    }

    #[test]
    fn test_encode_structure() {
        let packet = sample();
        let encoded = encode(&packet).unwrap();

        let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(length, encoded.len() - LENGTH_SIZE);

        let channel = u32::from_be_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(channel, channels::SERVICE_INFO_PUBLISHER);
        assert_eq!(&encoded[8..24], packet.unique_id.as_bytes());
        assert_eq!(&encoded[encoded.len() - 3..], &[1, 2, 3]);
    }

    #[test]
    fn test_encode_decode_preserves_packet() {
        let packet = sample();
        let decoded = decode(encode(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_incomplete_header() {
        let result = decode(Bytes::from_static(&[0, 0, 0]));
        match result.unwrap_err() {
            FrameError::Io(e) => assert!(e.to_string().contains("incomplete frame header")),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(100);
        bytes.put(&[0u8; 10][..]);

        match decode(bytes.freeze()).unwrap_err() {
            FrameError::Io(e) => assert!(e.to_string().contains("incomplete frame payload")),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_too_large() {
        let mut bytes = BytesMut::new();
        bytes.put_u32((MAX_FRAME_SIZE + 1) as u32);

        match decode(bytes.freeze()).unwrap_err() {
            FrameError::FrameTooLarge(size) => assert_eq!(size, MAX_FRAME_SIZE + 1),
            other => panic!("Expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_header_length_overflow() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(FIXED_SIZE as u32);
        bytes.put_u32(channels::AUTH);
        bytes.put_slice(&[0u8; 16]);
        bytes.put_u32(50);

        assert!(matches!(
            decode(bytes.freeze()),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_header_decodes_to_empty_object() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(FIXED_SIZE as u32);
        bytes.put_u32(channels::CHANNEL_MESSAGE);
        bytes.put_slice(&[7u8; 16]);
        bytes.put_u32(0);

        let packet = decode(bytes.freeze()).unwrap();
        assert!(packet.header.is_empty());
        assert!(packet.body.is_empty());
        assert_eq!(packet.unique_id, Uuid::from_bytes([7u8; 16]));
    }

    #[test]
    fn test_frame_error_display() {
        let msg = format!("{}", FrameError::FrameTooLarge(100_000_000));
        assert!(msg.contains("frame too large"));
        assert!(msg.contains(&MAX_FRAME_SIZE.to_string()));
        assert!(format!("{}", FrameError::ConnectionClosed).contains("connection closed"));
    }

    #[tokio::test]
    async fn test_read_write_multiple_packets() {
        use tokio::io::duplex;

        let (mut writer, mut reader) = duplex(4096);
        let first = sample();
        let second = Packet::from_value(channels::AUTH, &json!({ "nodeId": "Node-2" })).unwrap();

        write_packet(&mut writer, &first).await.unwrap();
        write_packet(&mut writer, &second).await.unwrap();
        drop(writer);

        assert_eq!(read_packet(&mut reader).await.unwrap(), first);
        assert_eq!(read_packet(&mut reader).await.unwrap(), second);
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(FrameError::ConnectionClosed)
        ));
    }
}
