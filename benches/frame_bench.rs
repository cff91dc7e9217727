use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use realm_protocol::core::bitstream::{BitReader, PacketWriter};
use realm_protocol::core::codec::FrameCodec;
use realm_protocol::core::frame::Frame;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || Frame::raw(0x07E0, vec![0u8; size]),
                |frame| {
                    let mut buf = BytesMut::with_capacity(size + 8);
                    FrameCodec::default().encode(frame, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let wire = Frame::raw(0x07E0, vec![0u8; size]).to_bytes();
            b.iter_batched(
                || BytesMut::from(&wire[..]),
                |mut buf| {
                    let frame = FrameCodec::default().decode(&mut buf).unwrap();
                    assert!(frame.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_bitstream(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitstream");
    let fields: Vec<(u64, u32)> = (0..256u64).map(|i| (i * 0x9E37, (i % 63 + 1) as u32)).collect();
    let total_bits: usize = fields.iter().map(|(_, bits)| *bits as usize).sum();
    group.throughput(Throughput::Bytes(total_bits.div_ceil(8) as u64));

    group.bench_function("write_unaligned_fields", |b| {
        b.iter(|| {
            let mut writer = PacketWriter::with_capacity(total_bits / 8 + 1);
            for (value, bits) in &fields {
                writer.write_bits(*value, *bits);
            }
            writer.finish()
        })
    });

    let mut writer = PacketWriter::new();
    for (value, bits) in &fields {
        writer.write_bits(*value, *bits);
    }
    let bytes = writer.finish();
    group.bench_function("read_unaligned_fields", |b| {
        b.iter(|| {
            let mut reader = BitReader::new(&bytes);
            for (_, bits) in &fields {
                reader.read_bits(*bits).unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_bitstream);
criterion_main!(benches);
