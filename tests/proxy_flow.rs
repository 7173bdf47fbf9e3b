//! End-to-end session tests over real sockets: a scripted upstream server
//! on one side, a scripted client on the other, the session engine in
//! between.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use kbproxy::auth::MojangAuth;
use kbproxy::codec::{self, Frame};
use kbproxy::config::ConnConfig;
use kbproxy::crypto;
use kbproxy::protocol::{packet_id, Handshake, LoginStart, NextState};
use kbproxy::session::ProxySession;
use kbproxy::stream::{FrameReader, FrameWriter};
use kbproxy::velocity::VelocityState;

fn conn_config() -> ConnConfig {
    ConnConfig {
        connect_timeout: Duration::from_secs(2),
        buffer_size: 8 * 1024,
        tcp_backlog: 16,
        tcp_nodelay: true,
    }
}

type Framed = (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>);

fn frame_halves(stream: TcpStream) -> Framed {
    let (read, write) = stream.into_split();
    (FrameReader::new(read, 8 * 1024), FrameWriter::new(write))
}

/// Connect a scripted client through a freshly spawned session to the given
/// upstream port.
async fn connect_through_proxy(
    up_port: u16,
    velocity: Arc<VelocityState>,
    auth: Arc<MojangAuth>,
) -> TcpStream {
    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    let client = TcpStream::connect(proxy_addr).await.unwrap();
    let (server_side, peer) = proxy_listener.accept().await.unwrap();

    let session = ProxySession::new(
        "127.0.0.1".to_string(),
        up_port,
        conn_config(),
        velocity,
        auth,
        peer.to_string(),
    );
    tokio::spawn(async move {
        let _ = session.run(server_side).await;
    });
    client
}

fn handshake_frame(next_state: NextState) -> Frame {
    let hs = Handshake {
        protocol_version: 110,
        server_address: "localhost".to_string(),
        server_port: 25566,
        next_state,
    };
    // encode_with_target with the declared values gives the plain encoding
    Frame::new(
        packet_id::HANDSHAKE,
        hs.encode_with_target("localhost", 25566).freeze(),
    )
}

fn login_success_payload(uuid: &str, name: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    codec::put_string(&mut buf, uuid);
    codec::put_string(&mut buf, name);
    buf
}

#[tokio::test]
async fn status_mode_is_a_transparent_pipe() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up_port = upstream.local_addr().unwrap().port();

    let client = connect_through_proxy(
        up_port,
        Arc::new(VelocityState::new()),
        Arc::new(MojangAuth::new()),
    )
    .await;
    let (mut client_read, mut client_write) = frame_halves(client);

    // Handshake with a pipelined status request behind it
    client_write
        .write_frame(&handshake_frame(NextState::Status))
        .await
        .unwrap();
    client_write
        .write_frame(&Frame::new(0x00, bytes::Bytes::new()))
        .await
        .unwrap();

    let (up_stream, _) = upstream.accept().await.unwrap();
    let (mut up_read, mut up_write) = frame_halves(up_stream);

    // Upstream sees the handshake rewritten to its own address
    let hs_frame = up_read.read_frame().await.unwrap().unwrap();
    let hs = Handshake::decode(&hs_frame.payload).unwrap();
    assert_eq!(hs.server_address, "127.0.0.1");
    assert_eq!(hs.server_port, up_port);
    assert_eq!(hs.next_state, NextState::Status);

    // The pipelined request survives the switch to raw passthrough
    let req = up_read.read_frame().await.unwrap().unwrap();
    assert_eq!(req.id, 0x00);
    assert!(req.payload.is_empty());

    // Response flows back byte for byte
    let json = br#"{"version":{"name":"1.9.4","protocol":110}}"#;
    up_write
        .write_frame(&Frame::new(0x00, json.to_vec()))
        .await
        .unwrap();
    let resp = client_read.read_frame().await.unwrap().unwrap();
    assert_eq!(resp.id, 0x00);
    assert_eq!(&resp.payload[..], &json[..]);
}

#[tokio::test]
async fn login_compression_stays_on_the_upstream_leg() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up_port = upstream.local_addr().unwrap().port();

    let velocity = Arc::new(VelocityState::new());
    velocity.set_horizontal(2.0);
    let client =
        connect_through_proxy(up_port, Arc::clone(&velocity), Arc::new(MojangAuth::new())).await;
    let (mut client_read, mut client_write) = frame_halves(client);

    client_write
        .write_frame(&handshake_frame(NextState::Login))
        .await
        .unwrap();
    let login = LoginStart {
        username: "Steve".to_string(),
    };
    client_write
        .write_frame(&Frame::new(packet_id::LOGIN_START, login.encode().freeze()))
        .await
        .unwrap();

    let (up_stream, _) = upstream.accept().await.unwrap();
    let (mut up_read, mut up_write) = frame_halves(up_stream);

    let _hs = up_read.read_frame().await.unwrap().unwrap();
    let login_frame = up_read.read_frame().await.unwrap().unwrap();
    // No authenticated identity: the declared username passes through
    assert_eq!(
        LoginStart::decode(&login_frame.payload).unwrap().username,
        "Steve"
    );

    // Negotiate compression, then finish login compressed
    let mut threshold_payload = BytesMut::new();
    codec::put_varint(&mut threshold_payload, 64);
    up_write
        .write_frame(&Frame::new(packet_id::SET_COMPRESSION, threshold_payload.freeze()))
        .await
        .unwrap();
    up_write.enable_compression(64);
    up_read.enable_compression(64);
    up_write
        .write_frame(&Frame::new(
            packet_id::LOGIN_SUCCESS,
            login_success_payload("069a79f4-44e9-4726-a5be-fca90e38aaf5", "Steve").freeze(),
        ))
        .await
        .unwrap();

    // Client reads Login Success without ever enabling compression
    let success = client_read.read_frame().await.unwrap().unwrap();
    assert_eq!(success.id, packet_id::LOGIN_SUCCESS);
    let mut buf = &success.payload[..];
    let _uuid = codec::get_string(&mut buf).unwrap();
    assert_eq!(codec::get_string(&mut buf).unwrap(), "Steve");

    // Play: a compressed velocity packet arrives rescaled and uncompressed
    let mut vel_payload = BytesMut::new();
    codec::put_varint(&mut vel_payload, 5);
    codec::put_short(&mut vel_payload, 100);
    codec::put_short(&mut vel_payload, 50);
    codec::put_short(&mut vel_payload, -100);
    up_write
        .write_frame(&Frame::new(packet_id::ENTITY_VELOCITY, vel_payload.freeze()))
        .await
        .unwrap();

    let vel = client_read.read_frame().await.unwrap().unwrap();
    assert_eq!(vel.id, packet_id::ENTITY_VELOCITY);
    let mut buf = &vel.payload[..];
    assert_eq!(codec::get_varint(&mut buf).unwrap(), 5);
    assert_eq!(codec::get_short(&mut buf).unwrap(), 200);
    assert_eq!(codec::get_short(&mut buf).unwrap(), 50);
    assert_eq!(codec::get_short(&mut buf).unwrap(), -200);

    // Client-to-upstream frames get re-framed with the threshold
    client_write
        .write_frame(&Frame::new(0x14, b"chat message".to_vec()))
        .await
        .unwrap();
    let chat = up_read.read_frame().await.unwrap().unwrap();
    assert_eq!(chat.id, 0x14);
    assert_eq!(&chat.payload[..], b"chat message");

    // Client disconnect propagates to the upstream leg
    drop(client_read);
    drop(client_write);
    assert!(up_read.read_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn encryption_bootstrap_yields_a_working_cipher() {
    use rsa::pkcs8::EncodePublicKey;
    use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up_port = upstream.local_addr().unwrap().port();

    let client = connect_through_proxy(
        up_port,
        Arc::new(VelocityState::new()),
        Arc::new(MojangAuth::new()),
    )
    .await;
    let (mut client_read, mut client_write) = frame_halves(client);

    client_write
        .write_frame(&handshake_frame(NextState::Login))
        .await
        .unwrap();
    client_write
        .write_frame(&Frame::new(
            packet_id::LOGIN_START,
            LoginStart {
                username: "Alex".to_string(),
            }
            .encode()
            .freeze(),
        ))
        .await
        .unwrap();

    let (up_stream, _) = upstream.accept().await.unwrap();
    let (mut up_read, mut up_write) = frame_halves(up_stream);
    let _hs = up_read.read_frame().await.unwrap().unwrap();
    let _login = up_read.read_frame().await.unwrap().unwrap();

    // Challenge the session the way an online-mode server does
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public_der = RsaPublicKey::from(&private_key)
        .to_public_key_der()
        .unwrap();
    let verify_token = [0x11u8, 0x22, 0x33, 0x44];

    let mut request = BytesMut::new();
    codec::put_string(&mut request, "");
    codec::put_byte_array(&mut request, public_der.as_bytes());
    codec::put_byte_array(&mut request, &verify_token);
    up_write
        .write_frame(&Frame::new(packet_id::ENCRYPTION_REQUEST, request.freeze()))
        .await
        .unwrap();

    // The proxy answers on the client's behalf
    let response = up_read.read_frame().await.unwrap().unwrap();
    assert_eq!(response.id, packet_id::ENCRYPTION_RESPONSE);
    let mut buf = &response.payload[..];
    let enc_secret = codec::get_byte_array(&mut buf).unwrap();
    let enc_token = codec::get_byte_array(&mut buf).unwrap();

    let secret = private_key.decrypt(Pkcs1v15Encrypt, &enc_secret).unwrap();
    let token = private_key.decrypt(Pkcs1v15Encrypt, &enc_token).unwrap();
    assert_eq!(secret.len(), 16);
    assert_eq!(&token[..], &verify_token[..]);

    // Everything after the response is ciphered on this leg only
    let mut key = [0u8; 16];
    key.copy_from_slice(&secret);
    let (dec, enc) = crypto::create_cipher_pair(&key).unwrap();
    up_read.enable_cipher(dec);
    up_write.enable_cipher(enc);

    up_write
        .write_frame(&Frame::new(
            packet_id::LOGIN_SUCCESS,
            login_success_payload("6b1a0d4a-c3a2-4a78-9a2d-1f9c8a7b6e5d", "Alex").freeze(),
        ))
        .await
        .unwrap();

    // The client still reads plaintext
    let success = client_read.read_frame().await.unwrap().unwrap();
    assert_eq!(success.id, packet_id::LOGIN_SUCCESS);

    // Upstream disconnect propagates to the client leg
    drop(up_read);
    drop(up_write);
    assert!(client_read.read_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn unreachable_upstream_fails_the_session_not_the_process() {
    // Bind and drop a listener so the port is very likely closed
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let client = connect_through_proxy(
        dead_port,
        Arc::new(VelocityState::new()),
        Arc::new(MojangAuth::new()),
    )
    .await;
    let (mut client_read, _client_write) = frame_halves(client);

    // The session closes the client socket without sending anything
    assert!(client_read.read_frame().await.unwrap().is_none());
}
