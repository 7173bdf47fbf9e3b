//! Threshold compression
//!
//! After upstream announces Set Compression, every upstream frame switches to
//! the compressed format: a declared-uncompressed-length VarInt followed by
//! the body, zlib-deflated only when the packet meets the threshold. Bodies
//! below the threshold travel unchanged behind a declared length of 0.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{ProxyError, Result};
use crate::logger::log;

/// Compression state for one direction of a session.
///
/// Disabled until the Login-phase Set Compression packet; once enabled the
/// threshold is immutable for the remainder of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    threshold: i32,
}

impl Compression {
    /// Initial state: no compression negotiated (-1)
    pub fn disabled() -> Self {
        Self { threshold: -1 }
    }

    /// One-shot activation with the negotiated threshold (>= 0)
    pub fn enable(&mut self, threshold: i32) {
        debug_assert!(threshold >= 0);
        self.threshold = threshold;
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold >= 0
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Compress a packet body for the wire.
    ///
    /// Returns the declared uncompressed length and the body to send after
    /// it: `(0, payload)` below the threshold, `(len, deflated)` otherwise.
    pub fn compress(&self, payload: &[u8]) -> Result<(i32, Vec<u8>)> {
        if (payload.len() as i32) < self.threshold {
            return Ok((0, payload.to_vec()));
        }
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(payload.len() / 2 + 16),
            flate2::Compression::default(),
        );
        encoder
            .write_all(payload)
            .and_then(|_| encoder.finish())
            .map(|deflated| (payload.len() as i32, deflated))
            .map_err(|e| ProxyError::protocol(format!("zlib deflate failed: {}", e)))
    }

    /// Decompress a received body given its declared uncompressed length.
    ///
    /// A declared length of 0 means the body was never compressed; it must
    /// otherwise be positive. A length mismatch after inflating is logged
    /// and tolerated: the best-effort inflated bytes are returned as-is,
    /// never padded or truncated to fit.
    pub fn decompress(&self, body: &[u8], declared_len: i32) -> Result<Vec<u8>> {
        if declared_len < 0 {
            return Err(ProxyError::protocol(format!(
                "negative declared length: {}",
                declared_len
            )));
        }
        if declared_len == 0 {
            return Ok(body.to_vec());
        }
        let mut inflated = Vec::with_capacity(declared_len as usize);
        ZlibDecoder::new(body)
            .read_to_end(&mut inflated)
            .map_err(|e| ProxyError::protocol(format!("zlib inflate failed: {}", e)))?;
        if inflated.len() != declared_len as usize {
            log::warn!(
                declared = declared_len,
                actual = inflated.len(),
                "Decompression length mismatch, using inflated bytes as-is"
            );
        }
        Ok(inflated)
    }
}
