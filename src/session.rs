//! Per-connection proxy session
//!
//! Runs the Handshake -> {Status, Login} -> Play state machine. The login
//! phase is a strict request/response ping-pong handled sequentially on the
//! connection task; reaching Play spawns exactly two relay tasks that live
//! until teardown. Compression and encryption only ever exist on the
//! upstream leg — the client is kept believing neither was negotiated.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::auth::MojangAuth;
use crate::codec::{self, Frame};
use crate::config::ConnConfig;
use crate::crypto;
use crate::error::{ProxyError, Result};
use crate::logger::log;
use crate::protocol::{self, packet_id, EncryptionRequest, Handshake, LoginStart, NextState};
use crate::stream::{FrameReader, FrameWriter};
use crate::velocity::VelocityState;

/// One session per accepted client connection
pub struct ProxySession {
    upstream_host: String,
    upstream_port: u16,
    conn_config: ConnConfig,
    velocity: Arc<VelocityState>,
    auth: Arc<MojangAuth>,
    peer_addr: String,
}

impl ProxySession {
    pub fn new(
        upstream_host: String,
        upstream_port: u16,
        conn_config: ConnConfig,
        velocity: Arc<VelocityState>,
        auth: Arc<MojangAuth>,
        peer_addr: String,
    ) -> Self {
        Self {
            upstream_host,
            upstream_port,
            conn_config,
            velocity,
            auth,
            peer_addr,
        }
    }

    /// Drive the session to completion. Any error tears down this session
    /// only; both sockets are closed when the last owner drops.
    pub async fn run(self, client: TcpStream) -> Result<()> {
        let upstream = self.connect_upstream().await?;
        tune_socket(&client, &self.conn_config);
        tune_socket(&upstream, &self.conn_config);

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let mut client_reader = FrameReader::new(client_read, self.conn_config.buffer_size);
        let mut upstream_writer = FrameWriter::new(upstream_write);

        // Handshake: first client frame, always plaintext and uncompressed
        let handshake_frame = match client_reader.read_frame().await? {
            Some(frame) => frame,
            None => return Ok(()),
        };
        if handshake_frame.id != packet_id::HANDSHAKE {
            return Err(ProxyError::Protocol(format!(
                "expected handshake, got packet 0x{:02X}",
                handshake_frame.id
            )));
        }
        let handshake = Handshake::decode(&handshake_frame.payload)?;
        log::info!(
            peer = %self.peer_addr,
            protocol = handshake.protocol_version,
            declared = %format!("{}:{}", handshake.server_address, handshake.server_port),
            target = %format!("{}:{}", self.upstream_host, self.upstream_port),
            state = ?handshake.next_state,
            "Handshake"
        );

        // Rewrite the declared target to the real upstream and forward
        let rewritten = handshake.encode_with_target(&self.upstream_host, self.upstream_port);
        upstream_writer
            .write_frame(&Frame::new(packet_id::HANDSHAKE, rewritten.freeze()))
            .await?;

        match handshake.next_state {
            NextState::Status => {
                self.run_status_passthrough(
                    client_reader,
                    client_write,
                    upstream_read,
                    upstream_writer,
                )
                .await
            }
            NextState::Login => {
                self.run_login(client_reader, client_write, upstream_read, upstream_writer)
                    .await
            }
        }
    }

    async fn connect_upstream(&self) -> Result<TcpStream> {
        let target = (self.upstream_host.as_str(), self.upstream_port);
        match tokio::time::timeout(self.conn_config.connect_timeout, TcpStream::connect(target))
            .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                log::debug!(peer = %self.peer_addr, error = %e, "Upstream connect failed");
                Err(e.into())
            }
            Err(_) => {
                log::debug!(peer = %self.peer_addr, "Upstream connect timeout");
                Err(ProxyError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "upstream connect timeout",
                )))
            }
        }
    }

    /// Status mode: after the rewritten handshake, both directions are a
    /// byte-for-byte copy with no decoding at all.
    async fn run_status_passthrough(
        &self,
        client_reader: FrameReader<OwnedReadHalf>,
        mut client_write: OwnedWriteHalf,
        mut upstream_read: OwnedReadHalf,
        upstream_writer: FrameWriter<OwnedWriteHalf>,
    ) -> Result<()> {
        log::debug!(peer = %self.peer_addr, "Status mode, raw passthrough");

        let (mut client_read, leftover) = client_reader.into_parts();
        let mut upstream_write = upstream_writer.into_inner();
        // The status request is usually pipelined behind the handshake
        if !leftover.is_empty() {
            upstream_write.write_all(&leftover).await?;
            upstream_write.flush().await?;
        }

        let c2s = tokio::io::copy(&mut client_read, &mut upstream_write);
        let s2c = tokio::io::copy(&mut upstream_read, &mut client_write);
        tokio::select! {
            _ = c2s => {}
            _ = s2c => {}
        }
        Ok(())
    }

    /// Login phase: sequential ping-pong until Login Success, then Play.
    async fn run_login(
        self,
        mut client_reader: FrameReader<OwnedReadHalf>,
        client_write: OwnedWriteHalf,
        upstream_read: OwnedReadHalf,
        mut upstream_writer: FrameWriter<OwnedWriteHalf>,
    ) -> Result<()> {
        let mut client_writer = FrameWriter::new(client_write);
        let mut upstream_reader = FrameReader::new(upstream_read, self.conn_config.buffer_size);

        // Client's Login Start
        let login_frame = match client_reader.read_frame().await? {
            Some(frame) => frame,
            None => return Ok(()),
        };
        if login_frame.id != packet_id::LOGIN_START {
            return Err(ProxyError::Protocol(format!(
                "expected Login Start, got packet 0x{:02X}",
                login_frame.id
            )));
        }
        let login_start = LoginStart::decode(&login_frame.payload)?;
        log::info!(peer = %self.peer_addr, username = %login_start.username, "Login Start");

        // Substitute the authenticated identity's name when one exists
        let username_to_send = match self.auth.identity_name().await {
            Some(name) if self.auth.has_identity().await => {
                if name != login_start.username {
                    log::info!(from = %login_start.username, to = %name, "Username override");
                }
                name
            }
            _ => login_start.username.clone(),
        };
        let forwarded = LoginStart {
            username: username_to_send,
        };
        upstream_writer
            .write_frame(&Frame::new(packet_id::LOGIN_START, forwarded.encode().freeze()))
            .await?;

        // Upstream drives the rest of the login sub-protocol
        loop {
            let body = match upstream_reader.read_frame_body().await? {
                Some(body) => body,
                None => return Ok(()),
            };
            let frame = Frame::decode(&body)?;

            match frame.id {
                packet_id::ENCRYPTION_REQUEST => {
                    self.handle_encryption_request(
                        &frame.payload,
                        &mut upstream_reader,
                        &mut upstream_writer,
                    )
                    .await?;
                }
                packet_id::SET_COMPRESSION => {
                    let mut buf = &frame.payload[..];
                    let threshold = codec::get_varint(&mut buf)?;
                    log::info!(
                        peer = %self.peer_addr,
                        threshold = threshold,
                        "Set Compression (consumed, client stays uncompressed)"
                    );
                    // Applies to the upstream leg only; never forwarded
                    upstream_reader.enable_compression(threshold);
                    upstream_writer.enable_compression(threshold);
                }
                packet_id::LOGIN_SUCCESS => {
                    log::info!(peer = %self.peer_addr, "Login Success, entering Play");
                    // Always uncompressed toward the client
                    client_writer.write_frame_body(&body).await?;
                    break;
                }
                _ => {
                    client_writer.write_frame_body(&body).await?;
                }
            }
        }

        self.run_relay(client_reader, client_writer, upstream_reader, upstream_writer)
            .await;
        Ok(())
    }

    /// Encryption bootstrap: generate the secret, authenticate on the
    /// client's behalf, answer upstream, then swap the upstream streams to
    /// the derived ciphers. The client-facing leg is never encrypted.
    async fn handle_encryption_request(
        &self,
        payload: &[u8],
        upstream_reader: &mut FrameReader<OwnedReadHalf>,
        upstream_writer: &mut FrameWriter<OwnedWriteHalf>,
    ) -> Result<()> {
        let request = EncryptionRequest::decode(payload)?;
        log::info!(
            peer = %self.peer_addr,
            server_id = %request.server_id,
            key_len = request.public_key.len(),
            token_len = request.verify_token.len(),
            "Encryption Request"
        );

        let secret = crypto::generate_shared_secret();

        if self.auth.has_identity().await {
            let server_hash =
                crypto::compute_server_hash(&request.server_id, &secret, &request.public_key);
            log::debug!(server_hash = %server_hash, "Computed server hash");
            // Join failure is non-fatal: upstream may still let us in,
            // or reject on its own terms
            let _ = self.auth.join_upstream_session(&server_hash).await;
        } else {
            log::warn!(
                peer = %self.peer_addr,
                "No authenticated identity, online-mode upstream will likely reject"
            );
        }

        let encrypted_secret = crypto::encrypt_rsa(&request.public_key, &secret)?;
        let encrypted_token = crypto::encrypt_rsa(&request.public_key, &request.verify_token)?;
        let response = protocol::encode_encryption_response(&encrypted_secret, &encrypted_token);

        // Last plaintext packet on the upstream leg
        upstream_writer
            .write_frame(&Frame::new(packet_id::ENCRYPTION_RESPONSE, response.freeze()))
            .await?;

        let (decryptor, encryptor) = crypto::create_cipher_pair(&secret)?;
        upstream_reader.enable_cipher(decryptor);
        upstream_writer.enable_cipher(encryptor);
        log::info!(peer = %self.peer_addr, "Upstream encryption enabled");
        Ok(())
    }

    /// Play state: two relay tasks pump frames until either direction ends.
    /// The cancellation token propagates teardown to the sibling task.
    async fn run_relay(
        &self,
        mut client_reader: FrameReader<OwnedReadHalf>,
        mut client_writer: FrameWriter<OwnedWriteHalf>,
        mut upstream_reader: FrameReader<OwnedReadHalf>,
        mut upstream_writer: FrameWriter<OwnedWriteHalf>,
    ) {
        let cancel = CancellationToken::new();
        let velocity = Arc::clone(&self.velocity);

        // Upstream -> client: decompress, rewrite velocity, re-frame
        // uncompressed for the client
        let s2c_cancel = cancel.clone();
        let s2c_peer = self.peer_addr.clone();
        let s2c = tokio::spawn(async move {
            loop {
                let body = tokio::select! {
                    res = upstream_reader.read_frame_body() => match res {
                        Ok(Some(body)) => body,
                        Ok(None) => break,
                        Err(e) => {
                            if !s2c_cancel.is_cancelled() {
                                log::debug!(peer = %s2c_peer, error = %e, "S2C relay error");
                            }
                            break;
                        }
                    },
                    _ = s2c_cancel.cancelled() => break,
                };

                // Fast path: identity multipliers skip reconstruction
                let out = if velocity.is_identity() {
                    body
                } else {
                    match protocol::rewrite_velocity(&body, &velocity) {
                        Some(modified) => modified,
                        // Decode failure or unrelated packet: raw bytes
                        // pass through unmodified
                        None => body,
                    }
                };

                if let Err(e) = client_writer.write_frame_body(&out).await {
                    if !s2c_cancel.is_cancelled() {
                        log::debug!(peer = %s2c_peer, error = %e, "S2C write error");
                    }
                    break;
                }
            }
            s2c_cancel.cancel();
        });

        // Client -> upstream: always-plain client frames re-framed with the
        // negotiated threshold
        let c2s_cancel = cancel.clone();
        let c2s_peer = self.peer_addr.clone();
        let c2s = tokio::spawn(async move {
            loop {
                let body = tokio::select! {
                    res = client_reader.read_frame_body() => match res {
                        Ok(Some(body)) => body,
                        Ok(None) => break,
                        Err(e) => {
                            if !c2s_cancel.is_cancelled() {
                                log::debug!(peer = %c2s_peer, error = %e, "C2S relay error");
                            }
                            break;
                        }
                    },
                    _ = c2s_cancel.cancelled() => break,
                };

                if let Err(e) = upstream_writer.write_frame_body(&body).await {
                    if !c2s_cancel.is_cancelled() {
                        log::debug!(peer = %c2s_peer, error = %e, "C2S write error");
                    }
                    break;
                }
            }
            c2s_cancel.cancel();
        });

        let _ = tokio::join!(s2c, c2s);
        log::debug!(peer = %self.peer_addr, "Relay finished");
    }
}

/// Apply TCP_NODELAY and explicit socket buffer sizing to one socket
fn tune_socket(stream: &TcpStream, config: &ConnConfig) {
    use socket2::SockRef;

    if config.tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    let sock = SockRef::from(stream);
    let _ = sock.set_recv_buffer_size(config.buffer_size);
    let _ = sock.set_send_buffer_size(config.buffer_size);
}
