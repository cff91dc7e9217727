use bytes::BytesMut;
use realm_protocol::core::codec::FrameCodec;
use realm_protocol::core::frame::Frame;
use realm_protocol::core::opcode::Opcode;
use realm_protocol::crypto::packet_cipher::CipherPair;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_sealed_frames_large_series() {
    // Long-lived cipher pair across many frames of varying size
    let mut codec = FrameCodec::default();
    let mut sender = CipherPair::auth(16042, 0x0979_98A0);
    let mut receiver = CipherPair::auth(16042, 0x0979_98A0);
    let mut buf = BytesMut::new();

    for size in [0usize, 1, 7, 8, 9, 64, 512, 4096, 65536] {
        for i in 0..500u16 {
            let frame = Frame::raw(i, vec![(i & 0xFF) as u8; size]);
            let sealed = frame.seal(Opcode::ServerEncrypted, &mut sender.encrypt).unwrap();
            codec.encode(sealed, &mut buf).unwrap();

            let wire = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(wire.open(&mut receiver.decrypt).unwrap(), frame);
            assert!(buf.is_empty());
        }
    }
}
