#![no_main]

use libfuzzer_sys::fuzz_target;
use realm_protocol::core::bitstream::{BitReader, Readable};
use realm_protocol::protocol::message::{
    ClientLoginProof, ClientLoginStart, ClientTicketLogin, ServerHello, ServerLoginDenied,
};

fuzz_target!(|data: &[u8]| {
    let _ = ServerHello::read(&mut BitReader::new(data));
    let _ = ClientLoginStart::read(&mut BitReader::new(data));
    let _ = ClientLoginProof::read(&mut BitReader::new(data));
    let _ = ClientTicketLogin::read(&mut BitReader::new(data));
    let _ = ServerLoginDenied::read(&mut BitReader::new(data));

    let mut reader = BitReader::new(data);
    while reader.read_wide_string().is_ok() {}
});
