//! Minecraft wire primitives
//!
//! VarInt, big-endian short and length-prefixed string encode/decode on top
//! of `bytes` buffers. Frame framing (length prefix, compression, cipher) is
//! layered on these primitives by the `stream` module.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProxyError, Result};

/// A VarInt never occupies more than 5 bytes (7 value bits per byte).
pub const VARINT_MAX_BYTES: usize = 5;

/// Number of bytes the VarInt encoding of `value` occupies
pub fn varint_len(value: i32) -> usize {
    let mut v = value as u32;
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Append the VarInt encoding of `value`
pub fn put_varint(buf: &mut BytesMut, value: i32) {
    let mut v = value as u32;
    while v >= 0x80 {
        buf.put_u8((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Decode a VarInt, consuming its bytes.
///
/// Truncated input is a protocol violation here: callers on this path
/// already hold a complete frame.
pub fn get_varint(buf: &mut impl Buf) -> Result<i32> {
    let mut value: u32 = 0;
    let mut position = 0;
    loop {
        if !buf.has_remaining() {
            return Err(ProxyError::protocol("truncated VarInt"));
        }
        let b = buf.get_u8();
        value |= ((b & 0x7F) as u32) << position;
        position += 7;
        if b & 0x80 == 0 {
            return Ok(value as i32);
        }
        if position >= VARINT_MAX_BYTES * 7 {
            return Err(ProxyError::protocol("VarInt too big"));
        }
    }
}

/// Try to decode a VarInt from the front of `buf` without consuming.
///
/// Returns `Ok(None)` when the buffer ends mid-VarInt (caller reads more),
/// `Ok(Some((value, consumed)))` on success.
pub fn peek_varint(buf: &[u8]) -> Result<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    let mut position = 0;
    for (i, &b) in buf.iter().enumerate() {
        value |= ((b & 0x7F) as u32) << position;
        position += 7;
        if b & 0x80 == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
        if position >= VARINT_MAX_BYTES * 7 {
            return Err(ProxyError::protocol("VarInt too big"));
        }
    }
    Ok(None)
}

/// Decode a signed 16-bit big-endian short
pub fn get_short(buf: &mut impl Buf) -> Result<i16> {
    if buf.remaining() < 2 {
        return Err(ProxyError::protocol("truncated short"));
    }
    Ok(buf.get_i16())
}

/// Append a signed 16-bit big-endian short
pub fn put_short(buf: &mut BytesMut, value: i16) {
    buf.put_i16(value);
}

/// Decode a VarInt-length-prefixed UTF-8 string
pub fn get_string(buf: &mut impl Buf) -> Result<String> {
    let len = get_varint(buf)?;
    if len < 0 {
        return Err(ProxyError::protocol("negative string length"));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(ProxyError::protocol("truncated string"));
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ProxyError::protocol("invalid UTF-8 in string"))
}

/// Append a VarInt-length-prefixed UTF-8 string
pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Decode a VarInt-length-prefixed byte array
pub fn get_byte_array(buf: &mut impl Buf) -> Result<Bytes> {
    let len = get_varint(buf)?;
    if len < 0 {
        return Err(ProxyError::protocol("negative array length"));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(ProxyError::protocol("truncated byte array"));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Append a VarInt-length-prefixed byte array
pub fn put_byte_array(buf: &mut BytesMut, data: &[u8]) {
    put_varint(buf, data.len() as i32);
    buf.put_slice(data);
}

/// One decoded packet: id plus opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Decode an unframed packet body (id VarInt + payload)
    pub fn decode(body: &[u8]) -> Result<Frame> {
        let mut buf = body;
        let id = get_varint(&mut buf)?;
        Ok(Frame {
            id,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Encode to an unframed packet body (id VarInt + payload, no length prefix)
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(VARINT_MAX_BYTES + self.payload.len());
        put_varint(&mut buf, self.id);
        buf.put_slice(&self.payload);
        buf
    }
}
