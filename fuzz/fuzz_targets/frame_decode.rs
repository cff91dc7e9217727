#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use realm_protocol::core::codec::FrameCodec;
use realm_protocol::core::frame::Frame;
use realm_protocol::crypto::packet_cipher::CipherPair;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::from_bytes(data);

    // Stream decode, then try every frame as an envelope
    let mut codec = FrameCodec::new(64 * 1024);
    let mut buffer = BytesMut::from(data);
    let mut cipher = CipherPair::from_seed(0);
    while let Ok(Some(frame)) = codec.decode(&mut buffer) {
        let _ = frame.open(&mut cipher.decrypt);
    }
});
