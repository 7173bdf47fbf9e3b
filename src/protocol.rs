//! Protocol-significant packets (Minecraft protocol 110 / 1.9.4)
//!
//! Only six packet kinds matter to the proxy; everything else is forwarded
//! opaquely. This module holds their ids, typed parse/build for the login
//! sub-protocol, and the Entity Velocity rewrite used on the relay path.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec;
use crate::error::{ProxyError, Result};
use crate::velocity::VelocityState;

/// Packet ids of interest. Handshake/Login ids overlap by state; Entity
/// Velocity is a Play-state clientbound packet.
pub mod packet_id {
    pub const HANDSHAKE: i32 = 0x00;
    pub const LOGIN_START: i32 = 0x00;
    pub const ENCRYPTION_REQUEST: i32 = 0x01;
    pub const ENCRYPTION_RESPONSE: i32 = 0x01;
    pub const LOGIN_SUCCESS: i32 = 0x02;
    pub const SET_COMPRESSION: i32 = 0x03;
    pub const ENTITY_VELOCITY: i32 = 0x3B;
}

/// Next-state field of the client handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status = 1,
    Login = 2,
}

impl TryFrom<i32> for NextState {
    type Error = ProxyError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(NextState::Status),
            2 => Ok(NextState::Login),
            other => Err(ProxyError::Protocol(format!(
                "invalid handshake next state: {}",
                other
            ))),
        }
    }
}

/// Client handshake: protocol version, declared target, next state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl Handshake {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let protocol_version = codec::get_varint(&mut buf)?;
        let server_address = codec::get_string(&mut buf)?;
        let server_port = codec::get_short(&mut buf)? as u16;
        let next_state = NextState::try_from(codec::get_varint(&mut buf)?)?;
        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    /// Re-encode the handshake with the declared target replaced by the
    /// real upstream host and port.
    pub fn encode_with_target(&self, host: &str, port: u16) -> BytesMut {
        let mut buf = BytesMut::with_capacity(host.len() + 16);
        codec::put_varint(&mut buf, self.protocol_version);
        codec::put_string(&mut buf, host);
        codec::put_short(&mut buf, port as i16);
        codec::put_varint(&mut buf, self.next_state as i32);
        buf
    }
}

/// Client Login Start: the declared username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub username: String,
}

impl LoginStart {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let username = codec::get_string(&mut buf)?;
        Ok(Self { username })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.username.len() + 4);
        codec::put_string(&mut buf, &self.username);
        buf
    }
}

/// Upstream Encryption Request: server id, DER public key, verify token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Bytes,
    pub verify_token: Bytes,
}

impl EncryptionRequest {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let server_id = codec::get_string(&mut buf)?;
        let public_key = codec::get_byte_array(&mut buf)?;
        let verify_token = codec::get_byte_array(&mut buf)?;
        Ok(Self {
            server_id,
            public_key,
            verify_token,
        })
    }
}

/// Build the Encryption Response payload from the RSA-encrypted secret and
/// verify token.
pub fn encode_encryption_response(encrypted_secret: &[u8], encrypted_token: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(encrypted_secret.len() + encrypted_token.len() + 8);
    codec::put_byte_array(&mut buf, encrypted_secret);
    codec::put_byte_array(&mut buf, encrypted_token);
    buf
}

/// Rewrite the velocity shorts of an Entity Velocity packet body.
///
/// `body` is a complete uncompressed packet (id VarInt + payload). The
/// entity id is parsed as a proper VarInt, so ids of any width are handled;
/// only the three trailing shorts are rewritten, every other byte is left
/// untouched. Returns `None` when the packet is not an Entity Velocity or
/// does not decode, in which case the caller forwards the raw bytes
/// unmodified — decode failure is never fatal on the relay path.
pub fn rewrite_velocity(body: &[u8], velocity: &VelocityState) -> Option<Vec<u8>> {
    let mut buf = body;
    let id = codec::get_varint(&mut buf).ok()?;
    if id != packet_id::ENTITY_VELOCITY {
        return None;
    }
    let entity_id_start = body.len() - buf.remaining();
    let _entity_id = codec::get_varint(&mut buf).ok()?;
    let velocity_start = body.len() - buf.remaining();
    // Exactly three shorts must follow the entity id
    if buf.remaining() != 6 {
        return None;
    }
    let vx = buf.get_i16();
    let vy = buf.get_i16();
    let vz = buf.get_i16();

    let (nx, ny, nz) = velocity.modify(vx, vy, vz);

    let mut out = body.to_vec();
    out[velocity_start..velocity_start + 2].copy_from_slice(&nx.to_be_bytes());
    out[velocity_start + 2..velocity_start + 4].copy_from_slice(&ny.to_be_bytes());
    out[velocity_start + 4..velocity_start + 6].copy_from_slice(&nz.to_be_bytes());
    debug_assert!(entity_id_start < velocity_start);
    Some(out)
}
