use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use realm_protocol::core::frame::Frame;
use realm_protocol::core::opcode::Opcode;
use realm_protocol::crypto::legacy_cipher::LegacyCipher;
use realm_protocol::crypto::packet_cipher::{derive_key, CipherPair};
use realm_protocol::crypto::srp6::{generate_account, HandshakeSession, SrpClient};

#[allow(clippy::unwrap_used)]
fn bench_packet_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_cipher");
    let pair = CipherPair::auth(16042, 0x0979_98A0);

    for &size in &[64usize, 1024, 16384] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encrypt_{size}b"), |b| {
            let mut cipher = pair.encrypt.clone();
            b.iter_batched(
                || vec![0x5Au8; size],
                |mut data| cipher.encrypt(&mut data).unwrap(),
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("seal_open_{size}b"), |b| {
            let mut encrypt = pair.encrypt.clone();
            let mut decrypt = pair.decrypt.clone();
            let frame = Frame::raw(0x01C3, vec![0x5Au8; size]);
            b.iter(|| {
                let sealed = frame.seal(Opcode::ClientEncrypted, &mut encrypt).unwrap();
                sealed.open(&mut decrypt).unwrap()
            })
        });
    }

    group.bench_function("derive_key", |b| b.iter(|| derive_key(0x1234_5678_9ABC_DEF0)));
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_legacy_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("legacy_cipher");
    group.throughput(Throughput::Bytes(4096));
    group.bench_function("encrypt_4096b", |b| {
        let mut cipher = LegacyCipher::new(&[7u8; 64]).unwrap();
        let mut data = vec![0u8; 4096];
        b.iter(|| cipher.encrypt(&mut data))
    });
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_srp6(c: &mut Criterion) {
    let mut group = c.benchmark_group("srp6");
    group.sample_size(20);
    let (salt, verifier) = generate_account("bench@example.com", "password");

    group.bench_function("full_handshake", |b| {
        b.iter(|| {
            let server = HandshakeSession::begin("bench@example.com", salt, &verifier);
            let client = SrpClient::new("bench@example.com", "password");
            let proof = client.respond(&salt, &server.server_public()).unwrap();
            let outcome = server.verify(&proof.public, &proof.evidence).unwrap();
            proof.verify_server(&outcome.server_evidence).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_packet_cipher, bench_legacy_cipher, bench_srp6);
criterion_main!(benches);
