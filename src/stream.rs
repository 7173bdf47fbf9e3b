//! Framed stream I/O
//!
//! `FrameReader` and `FrameWriter` wrap the two halves of a socket and
//! translate between raw bytes and packet frames. Compression and cipher
//! state negotiated during Login are spliced in here, once, and are
//! immutable afterwards. The client-facing pair never has either enabled:
//! from the client's point of view the connection stays plaintext and
//! uncompressed for its whole life.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, Frame};
use crate::compression::Compression;
use crate::crypto::{StreamDecryptor, StreamEncryptor};
use crate::error::{ProxyError, Result};

/// Upper bound on a single frame; matches the protocol's 3-byte length cap.
/// Protects against absurd allocations from a malicious peer.
const MAX_FRAME_LEN: usize = 1 << 21;

/// Buffered, frame-oriented reader over one socket half.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    chunk_size: usize,
    compression: Compression,
    cipher: Option<StreamDecryptor>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, buffer_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(buffer_size),
            chunk_size: buffer_size,
            compression: Compression::disabled(),
            cipher: None,
        }
    }

    /// Record the negotiated threshold; all subsequent frames read through
    /// this reader use the compressed format.
    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression.enable(threshold);
    }

    /// Splice the decryption cipher in. Bytes already buffered were
    /// received before the Encryption Response and stay plaintext; only
    /// bytes read from the socket after this point are decrypted.
    pub fn enable_cipher(&mut self, cipher: StreamDecryptor) {
        self.cipher = Some(cipher);
    }

    /// Tear the reader apart, yielding the socket half and any bytes that
    /// were buffered past the last consumed frame.
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.buf)
    }

    /// Read one length-prefixed frame off the wire, without undoing
    /// compression. Returns `Ok(None)` on end of stream — including an EOF
    /// that cuts a frame short, which is a terminal signal, not an error.
    async fn read_raw(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some((len, consumed)) = codec::peek_varint(&self.buf)? {
                if len < 0 || len as usize > MAX_FRAME_LEN {
                    return Err(ProxyError::Protocol(format!(
                        "invalid frame length: {}",
                        len
                    )));
                }
                let len = len as usize;
                if self.buf.len() >= consumed + len {
                    self.buf.advance(consumed);
                    return Ok(Some(self.buf.split_to(len).freeze()));
                }
            }

            let mut chunk = vec![0u8; self.chunk_size];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            let start = self.buf.len();
            self.buf.extend_from_slice(&chunk[..n]);
            if let Some(cipher) = &mut self.cipher {
                cipher.decrypt(&mut self.buf[start..]);
            }
        }
    }

    /// Read one frame body (packet id + payload), decompressed according to
    /// the negotiated state. Never returns a partial body.
    pub async fn read_frame_body(&mut self) -> Result<Option<Vec<u8>>> {
        let raw = match self.read_raw().await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        if !self.compression.is_enabled() {
            return Ok(Some(raw.to_vec()));
        }
        let mut buf = &raw[..];
        let declared_len = codec::get_varint(&mut buf)?;
        let body = self.compression.decompress(buf, declared_len)?;
        Ok(Some(body))
    }

    /// Read and decode one frame. `Ok(None)` on clean end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.read_frame_body().await? {
            Some(body) => Ok(Some(Frame::decode(&body)?)),
            None => Ok(None),
        }
    }
}

/// Frame-oriented writer over one socket half.
pub struct FrameWriter<W> {
    inner: W,
    compression: Compression,
    cipher: Option<StreamEncryptor>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            compression: Compression::disabled(),
            cipher: None,
        }
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression.enable(threshold);
    }

    pub fn enable_cipher(&mut self, cipher: StreamEncryptor) {
        self.cipher = Some(cipher);
    }

    /// Give the socket half back, for switching to raw passthrough
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Frame and send one packet body (id + payload), applying the
    /// negotiated compression and cipher state, then flush.
    pub async fn write_frame_body(&mut self, body: &[u8]) -> Result<()> {
        let mut wire = BytesMut::with_capacity(body.len() + 8);
        if self.compression.is_enabled() {
            let (declared_len, data) = self.compression.compress(body)?;
            codec::put_varint(
                &mut wire,
                (codec::varint_len(declared_len) + data.len()) as i32,
            );
            codec::put_varint(&mut wire, declared_len);
            wire.put_slice(&data);
        } else {
            codec::put_varint(&mut wire, body.len() as i32);
            wire.put_slice(body);
        }
        if let Some(cipher) = &mut self.cipher {
            cipher.encrypt(&mut wire);
        }
        self.inner.write_all(&wire).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode and send one frame
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_frame_body(&frame.encode()).await
    }
}
