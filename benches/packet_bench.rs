use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use netcode_server::config::{MAX_PACKET_BYTES, MAX_PAYLOAD_BYTES};
use netcode_server::core::packet::{decode, encode, AllowedPackets, DecodeContext, Packet};
use netcode_server::protocol::replay_guard::ReplayGuard;
use netcode_server::utils::crypto::Key;

const PROTOCOL_ID: u64 = 0x1122_3344_5566_7788;

#[allow(clippy::unwrap_used)]
fn bench_payload_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_encode_decode");
    let key = Key::from_bytes([7; 32]);
    let payload_sizes = [16usize, 128, 512, MAX_PAYLOAD_BYTES];

    for &size in &payload_sizes {
        let packet = Packet::Payload(vec![0xAB; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            let mut out = [0u8; MAX_PACKET_BYTES];
            let mut sequence = 0u64;
            b.iter(|| {
                sequence += 1;
                encode(black_box(&packet), sequence, &key, PROTOCOL_ID, &mut out).unwrap()
            })
        });

        let mut out = [0u8; MAX_PACKET_BYTES];
        let n = encode(&packet, 1_000, &key, PROTOCOL_ID, &mut out).unwrap();
        let sealed = out[..n].to_vec();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter(|| {
                let ctx = DecodeContext {
                    protocol_id: PROTOCOL_ID,
                    current_timestamp: 0,
                    allowed: AllowedPackets::server_default(),
                    read_key: Some(&key),
                    replay_guard: None,
                };
                decode(black_box(&sealed), ctx).unwrap()
            })
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_keep_alive_with_replay_guard(c: &mut Criterion) {
    let key = Key::from_bytes([9; 32]);
    let sealed: Vec<Vec<u8>> = (0..256u64)
        .map(|sequence| {
            let mut out = [0u8; MAX_PACKET_BYTES];
            let packet = Packet::KeepAlive {
                client_index: 0,
                max_clients: 64,
            };
            let n = encode(&packet, sequence, &key, PROTOCOL_ID, &mut out).unwrap();
            out[..n].to_vec()
        })
        .collect();

    c.bench_function("keep_alive_decode_256_guarded", |b| {
        b.iter_batched(
            ReplayGuard::new,
            |mut guard| {
                for bytes in &sealed {
                    let ctx = DecodeContext {
                        protocol_id: PROTOCOL_ID,
                        current_timestamp: 0,
                        allowed: AllowedPackets::server_default(),
                        read_key: Some(&key),
                        replay_guard: Some(&mut guard),
                    };
                    decode(bytes, ctx).unwrap();
                }
                guard
            },
            BatchSize::SmallInput,
        )
    });
}

#[allow(clippy::unwrap_used)]
fn bench_rejections(c: &mut Criterion) {
    let mut group = c.benchmark_group("rejections");
    let garbage = vec![0x5Fu8; 64];
    group.bench_function("unknown_type", |b| {
        b.iter(|| {
            let ctx = DecodeContext {
                protocol_id: PROTOCOL_ID,
                current_timestamp: 0,
                allowed: AllowedPackets::server_default(),
                read_key: None,
                replay_guard: None,
            };
            decode(black_box(&garbage), ctx).is_err()
        })
    });

    let key = Key::from_bytes([1; 32]);
    let forged = {
        let mut out = [0u8; MAX_PACKET_BYTES];
        let n = encode(&Packet::Payload(vec![1; 256]), 5, &Key::from_bytes([2; 32]), PROTOCOL_ID, &mut out)
            .unwrap();
        out[..n].to_vec()
    };
    group.bench_function("forged_payload", |b| {
        b.iter(|| {
            let ctx = DecodeContext {
                protocol_id: PROTOCOL_ID,
                current_timestamp: 0,
                allowed: AllowedPackets::server_default(),
                read_key: Some(&key),
                replay_guard: None,
            };
            decode(black_box(&forged), ctx).is_err()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_payload_encode_decode,
    bench_keep_alive_with_replay_guard,
    bench_rejections
);
criterion_main!(benches);
