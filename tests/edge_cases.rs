#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: malformed frames, boundary sizes, and hostile peers
//! driving a connection actor over an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use realm_protocol::config::NetworkConfig;
use realm_protocol::core::bitstream::{BitReader, PacketWriter};
use realm_protocol::core::codec::FrameCodec;
use realm_protocol::core::frame::{Frame, HEADER_LEN};
use realm_protocol::core::opcode::Opcode;
use realm_protocol::crypto::legacy_cipher::LegacyCipher;
use realm_protocol::crypto::packet_cipher::{CipherPair, PacketCipher};
use realm_protocol::error::ProtocolError;
use realm_protocol::protocol::dispatcher::Dispatcher;
use realm_protocol::protocol::message::{ClientHeartbeat, ConnectionRole, ServerHeartbeat};
use realm_protocol::protocol::session::{SessionContext, SessionServices};
use realm_protocol::service::connection::{run_connection, run_sts_connection};
use realm_protocol::store::{AccountStore, MemoryAccountStore};
use realm_protocol::sts::codec::{StsCodec, MAX_HEAD_LEN};
use realm_protocol::utils::timeout::with_timeout;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, Framed};

// ============================================================================
// FRAME CODEC EDGE CASES
// ============================================================================

#[test]
fn test_frame_empty_payload() {
    let frame = Frame::raw(0x1234, Vec::new());
    let bytes = frame.to_bytes();
    assert_eq!(bytes, vec![2, 0, 0, 0, 0x34, 0x12]);
    assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
}

#[test]
fn test_frame_length_below_opcode_rejected() {
    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::from(&[1u8, 0, 0, 0, 0xFF][..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_frame_oversized_rejected_before_buffering() {
    let mut codec = FrameCodec::new(1024);
    let mut buffer = BytesMut::from(&(4096u32).to_le_bytes()[..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::OversizedFrame(4096))
    ));

    let mut out = BytesMut::new();
    let result = codec.encode(Frame::raw(1, vec![0; 2048]), &mut out);
    assert!(matches!(result, Err(ProtocolError::OversizedFrame(_))));
}

#[test]
fn test_frame_exactly_max_accepted() {
    let max = 1024;
    let mut codec = FrameCodec::new(max);
    let frame = Frame::raw(9, vec![0xAB; max - 2]);

    let mut buffer = BytesMut::new();
    codec.encode(frame.clone(), &mut buffer).unwrap();
    assert_eq!(buffer.len(), max + 4);
    assert_eq!(codec.decode(&mut buffer).unwrap(), Some(frame));
}

#[test]
fn test_frame_truncated_header() {
    assert!(matches!(
        Frame::from_bytes(&[5, 0, 0]),
        Err(ProtocolError::UnexpectedEof { .. })
    ));

    let mut codec = FrameCodec::default();
    let mut buffer = BytesMut::from(&[8u8, 0, 0, 0, 1][..]);
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.len(), 5, "incomplete frame must stay buffered");
}

#[test]
fn test_frame_trailing_bytes_rejected() {
    let mut bytes = Frame::raw(3, vec![1, 2]).to_bytes();
    bytes.push(0);
    assert!(matches!(
        Frame::from_bytes(&bytes),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_header_len() {
    assert_eq!(HEADER_LEN, 6);
    assert_eq!(Frame::raw(1, vec![0; 10]).wire_len(), 16);
}

// ============================================================================
// ENVELOPE EDGE CASES
// ============================================================================

#[test]
fn test_envelope_length_mismatch() {
    let mut cipher = CipherPair::from_seed(7);
    let mut sealed = Frame::raw(0x55, vec![1, 2, 3])
        .seal(Opcode::ClientEncrypted, &mut cipher.encrypt)
        .unwrap();
    sealed.payload.push(0);
    assert!(matches!(
        sealed.open(&mut cipher.decrypt),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_open_requires_envelope_opcode() {
    let mut cipher = CipherPair::from_seed(7);
    let plain = Frame::raw(Opcode::ClientHeartbeat.as_u16(), vec![0; 8]);
    assert!(matches!(
        plain.open(&mut cipher.decrypt),
        Err(ProtocolError::UnexpectedMessage)
    ));
}

#[test]
fn test_short_key_table_rejected() {
    assert!(matches!(
        PacketCipher::from_parts(&[0u8; 64], 1),
        Err(ProtocolError::KeyTooShort(64))
    ));
    assert!(LegacyCipher::new(&[0u8; 16]).is_err());
}

#[test]
fn test_empty_buffer_cipher_noop() {
    let mut cipher = CipherPair::from_seed(1);
    let mut empty: [u8; 0] = [];
    cipher.encrypt.encrypt(&mut empty).unwrap();
    assert_eq!(cipher.encrypt.processed(), 0);
}

// ============================================================================
// BITSTREAM EDGE CASES
// ============================================================================

#[test]
fn test_wide_string_empty_and_unicode() {
    let mut writer = PacketWriter::new();
    writer.write_wide_string("").unwrap();
    writer.write_wide_string("Ærø ✓ 𝄞").unwrap();
    let bytes = writer.finish();

    let mut reader = BitReader::new(&bytes);
    assert_eq!(reader.read_wide_string().unwrap(), "");
    assert_eq!(reader.read_wide_string().unwrap(), "Ærø ✓ 𝄞");
}

#[test]
fn test_wide_string_switches_to_extended_length() {
    let long = "x".repeat(200);
    let mut writer = PacketWriter::new();
    writer.write_wide_string(&long).unwrap();
    let bytes = writer.finish();
    assert_eq!(bytes.len(), 2 + 400);

    let mut reader = BitReader::new(&bytes);
    assert!(reader.read_bool().unwrap());
    assert_eq!(reader.read_bits(15).unwrap(), 200);
}

#[test]
fn test_wide_string_too_long() {
    let mut writer = PacketWriter::new();
    assert!(writer.write_wide_string(&"y".repeat(40_000)).is_err());
}

#[test]
fn test_wide_string_truncated() {
    let mut writer = PacketWriter::new();
    writer.write_wide_string("truncate me").unwrap();
    let bytes = writer.finish();
    let mut reader = BitReader::new(&bytes[..bytes.len() - 3]);
    assert!(matches!(
        reader.read_wide_string(),
        Err(ProtocolError::UnexpectedEof { .. })
    ));
}

#[test]
fn test_unpaired_surrogate_rejected() {
    let mut writer = PacketWriter::new();
    writer.write_bool(false);
    writer.write_bits(1, 7);
    writer.write_u16(0xD800);
    let bytes = writer.finish();
    assert!(matches!(
        BitReader::new(&bytes).read_wide_string(),
        Err(ProtocolError::Decode(_))
    ));
}

// ============================================================================
// HOSTILE PEERS ON A LIVE CONNECTION
// ============================================================================

fn services() -> SessionServices {
    let config = NetworkConfig::default();
    let store = Arc::new(MemoryAccountStore::new(config.session.ticket_ttl));
    store.register("alice", "wonderland").unwrap();
    SessionServices::new(
        config,
        store as Arc<dyn AccountStore>,
        Arc::new(Dispatcher::default()),
    )
}

struct Actor {
    client: DuplexStream,
    services: SessionServices,
    handle: JoinHandle<()>,
    _close: watch::Sender<bool>,
}

fn spawn_actor(role: ConnectionRole) -> Actor {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let services = services();
    let (close, close_rx) = watch::channel(false);
    let ctx = SessionContext::new(1, role, None);
    let handle = tokio::spawn(run_connection(server, ctx, services.clone(), close_rx));
    Actor {
        client,
        services,
        handle,
        _close: close,
    }
}

async fn finished(handle: JoinHandle<()>) {
    with_timeout(Duration::from_secs(5), async {
        handle.await.unwrap();
        Ok(())
    })
    .await
    .expect("actor should have stopped");
}

#[tokio::test]
async fn test_envelope_before_cipher_disconnects() {
    let Actor {
        client,
        services,
        handle,
        _close,
    } = spawn_actor(ConnectionRole::Auth);
    let mut framed = Framed::new(client, FrameCodec::default());
    let hello = framed.next().await.unwrap().unwrap();
    assert_eq!(hello.opcode, Opcode::ServerHello.as_u16());

    framed
        .send(Frame::new(Opcode::ClientEncrypted, vec![8, 0, 0, 0, 1, 2, 3, 4]))
        .await
        .unwrap();
    finished(handle).await;
    assert!(framed.next().await.is_none());
    assert_eq!(services.metrics.snapshot().decode_errors, 1);
}

#[tokio::test]
async fn test_garbage_length_disconnects() {
    let mut actor = spawn_actor(ConnectionRole::Auth);
    actor.client.write_all(&[1, 0, 0, 0, 0xFF]).await.unwrap();
    finished(actor.handle).await;
    assert_eq!(actor.services.metrics.snapshot().connections_active, 0);
}

#[tokio::test]
async fn test_plain_frame_on_realm_is_ignored() {
    let actor = spawn_actor(ConnectionRole::Realm);
    let mut framed = Framed::new(actor.client, FrameCodec::default());
    let mut cipher = CipherPair::auth(16042, 0x0979_98A0);

    let greeting = framed.next().await.unwrap().unwrap();
    let hello = greeting.open(&mut cipher.decrypt).unwrap();
    assert_eq!(hello.opcode, Opcode::ServerHello.as_u16());

    // Not authenticated and not encrypted: dropped without a reply.
    framed
        .send(Frame::from_message(&ClientHeartbeat { sequence: 1 }).unwrap())
        .await
        .unwrap();
    let nothing = tokio::time::timeout(Duration::from_millis(200), framed.next()).await;
    assert!(nothing.is_err(), "server should stay silent");
    assert!(!actor.handle.is_finished());
}

#[tokio::test]
async fn test_heartbeat_before_login_is_not_answered() {
    let actor = spawn_actor(ConnectionRole::Auth);
    let mut framed = Framed::new(actor.client, FrameCodec::default());
    framed.next().await.unwrap().unwrap();

    framed
        .send(Frame::from_message(&ClientHeartbeat { sequence: 5 }).unwrap())
        .await
        .unwrap();
    let nothing = tokio::time::timeout(Duration::from_millis(200), framed.next()).await;
    assert!(nothing.is_err());
    assert!(!actor.handle.is_finished());

    // Decoding a heartbeat reply type still works on its own.
    let beat = Frame::from_message(&ServerHeartbeat { sequence: 5 }).unwrap();
    assert_eq!(beat.decode_message::<ServerHeartbeat>().unwrap().sequence, 5);
}

#[tokio::test]
async fn test_peer_hangup_is_quiet() {
    let actor = spawn_actor(ConnectionRole::Auth);
    drop(actor.client);
    finished(actor.handle).await;
    let snapshot = actor.services.metrics.snapshot();
    assert_eq!(snapshot.connection_errors, 0);
    assert_eq!(snapshot.decode_errors, 0);
}

#[tokio::test]
async fn test_sts_oversized_head_disconnects() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (_close_tx, close_rx) = watch::channel(false);
    let handle = tokio::spawn(run_sts_connection(server, 9, services(), close_rx));

    client
        .write_all(&vec![b'A'; MAX_HEAD_LEN + 16])
        .await
        .unwrap();
    finished(handle).await;
}

#[tokio::test]
async fn test_sts_unknown_path_gets_404() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (_close_tx, close_rx) = watch::channel(false);
    tokio::spawn(run_sts_connection(server, 10, services(), close_rx));

    let mut framed = Framed::new(client, StsCodec::new());
    framed
        .send(realm_protocol::sts::StsMessage::request(
            "POST",
            "/Presence/Whatever",
            Some(1),
            "",
        ))
        .await
        .unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply.error_code(), Some(404));
    assert_eq!(reply.header("s"), Some("1R"));
}
