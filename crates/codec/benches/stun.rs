use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use waf_edge_codec::{
    Decoder,
    crypto::{PasswordAlgorithm, generate_password},
    message::{MessageEncoder, attributes::*, methods::*},
};

fn criterion_benchmark(c: &mut Criterion) {
    let token: [u8; 12] = *b"ABCDEFGHIJKL";
    let password = generate_password("user1", "secret", "localhost", PasswordAlgorithm::Md5);

    let mut allocate_response = BytesMut::with_capacity(128);
    {
        let mut message = MessageEncoder::new(ALLOCATE_RESPONSE, &token, &mut allocate_response);
        message.append::<XorRelayedAddress>("203.0.113.9:51000".parse().unwrap());
        message.append::<XorMappedAddress>("198.51.100.2:4000".parse().unwrap());
        message.append::<Lifetime>(600);
        message.flush(Some(&password)).unwrap();
    }

    let mut create_permission_request = BytesMut::with_capacity(128);
    {
        let mut message =
            MessageEncoder::new(CREATE_PERMISSION_REQUEST, &token, &mut create_permission_request);
        message.append::<XorPeerAddress>("203.0.113.9:51000".parse().unwrap());
        message.append::<UserName>("user1");
        message.append::<Realm>("localhost");
        message.append::<Nonce>("9jLBcjff3xrKRAES");
        message.flush(Some(&password)).unwrap();
    }

    let mut samples = [&allocate_response[..], &create_permission_request[..]]
        .into_iter()
        .cycle();

    let mut decoder = Decoder::default();
    let mut stun_criterion = c.benchmark_group("stun");

    stun_criterion.throughput(Throughput::Elements(1));
    stun_criterion.bench_function("decode_all_samples", |bencher| {
        bencher.iter(|| {
            decoder.decode(samples.next().unwrap()).unwrap();
        })
    });

    stun_criterion.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
