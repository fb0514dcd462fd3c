use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::RconError;

/// SERVERDATA_AUTH, client -> server.
pub const TYPE_AUTH: i32 = 3;
/// SERVERDATA_EXECCOMMAND, client -> server.
pub const TYPE_EXEC_COMMAND: i32 = 2;
/// SERVERDATA_AUTH_RESPONSE, server -> client. Shares the value 2 on the wire.
pub const TYPE_AUTH_RESPONSE: i32 = 2;
/// SERVERDATA_RESPONSE_VALUE, server -> client.
pub const TYPE_RESPONSE_VALUE: i32 = 0;

/// id (4) + type (4) + empty body + two NUL terminators.
const MIN_PAYLOAD: usize = 10;
/// Game servers cap the body at 4096 bytes.
const MAX_BODY: usize = 4096;
const MAX_PAYLOAD: usize = MIN_PAYLOAD + MAX_BODY;

/// One RCON frame. On the wire: little-endian 32-bit length (of everything
/// after the length field), little-endian id, little-endian type, the body,
/// a NUL terminating the body and one trailing NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl RconPacket {
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            packet_type: TYPE_AUTH,
            body: password.to_string(),
        }
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self {
            id,
            packet_type: TYPE_EXEC_COMMAND,
            body: command.to_string(),
        }
    }

    pub fn response(id: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type: TYPE_RESPONSE_VALUE,
            body: body.into(),
        }
    }

    pub fn auth_response(id: i32) -> Self {
        Self {
            id,
            packet_type: TYPE_AUTH_RESPONSE,
            body: String::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let body = self.body.as_bytes();
        let payload_len = 4 + 4 + body.len() + 2;
        let mut buf = BytesMut::with_capacity(4 + payload_len);
        buf.put_i32_le(payload_len as i32);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.packet_type);
        buf.put_slice(body);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.freeze()
    }

    /// Reads exactly one frame. An EOF mid-frame surfaces as an IO error.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, RconError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let payload_len = i32::from_le_bytes(len_buf);
        if payload_len < MIN_PAYLOAD as i32 || payload_len > MAX_PAYLOAD as i32 {
            return Err(RconError::protocol(format!(
                "invalid packet length {payload_len}"
            )));
        }
        let payload_len = payload_len as usize;

        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload).await?;
        if payload[payload_len - 2] != 0 || payload[payload_len - 1] != 0 {
            return Err(RconError::protocol("missing NUL terminators"));
        }

        let mut cursor = &payload[..];
        let id = cursor.get_i32_le();
        let packet_type = cursor.get_i32_le();
        let body = String::from_utf8_lossy(&payload[8..payload_len - 2]).into_owned();

        Ok(Self {
            id,
            packet_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_packet_is_bit_exact() {
        let encoded = RconPacket::auth(7, "hunter2").encode();
        let expected: &[u8] = &[
            0x11, 0x00, 0x00, 0x00, // length = 4 + 4 + 7 + 2 = 17
            0x07, 0x00, 0x00, 0x00, // request id
            0x03, 0x00, 0x00, 0x00, // SERVERDATA_AUTH
            b'h', b'u', b'n', b't', b'e', b'r', b'2', // password
            0x00, 0x00, // body NUL + trailing NUL
        ];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn empty_body_packet_is_ten_bytes_of_payload() {
        let encoded = RconPacket::auth_response(42).encode();
        assert_eq!(encoded.len(), 14);
        assert_eq!(&encoded[0..4], &10i32.to_le_bytes());
    }

    #[tokio::test]
    async fn decode_round_trips_encode() {
        let packet = RconPacket::command(12345, "list");
        let encoded = packet.encode();
        let mut reader = &encoded[..];
        let decoded = RconPacket::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn negative_id_survives_the_wire() {
        let packet = RconPacket::auth_response(-1);
        let encoded = packet.encode();
        let mut reader = &encoded[..];
        let decoded = RconPacket::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded.id, -1);
    }

    #[tokio::test]
    async fn oversized_length_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(MAX_PAYLOAD as i32 + 1).to_le_bytes());
        frame.resize(frame.len() + 16, 0);
        let mut reader = &frame[..];
        assert!(matches!(
            RconPacket::read_from(&mut reader).await,
            Err(RconError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn missing_terminators_rejected() {
        let mut frame = RconPacket::command(1, "say hi").encode().to_vec();
        let last = frame.len() - 1;
        frame[last] = b'!';
        let mut reader = &frame[..];
        assert!(matches!(
            RconPacket::read_from(&mut reader).await,
            Err(RconError::Protocol(_))
        ));
    }
}
