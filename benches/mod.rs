use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    codec::bench_encode_sample,
    codec::bench_decode_command,
    session::bench_publish,
    session::bench_drain_inbound
);
criterion_main!(benches);
