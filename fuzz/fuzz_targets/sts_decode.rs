#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use realm_protocol::sts::StsCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = StsCodec::new();
    let mut buffer = BytesMut::from(data);
    while let Ok(Some(message)) = codec.decode(&mut buffer) {
        let _ = message.method_and_path();
        let _ = message.status();
        let _ = message.error_code();
    }
});
