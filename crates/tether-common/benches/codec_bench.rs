// Criterion benchmarks for the tether-common codec and framer
//
// Run benchmarks with:
//   cargo bench -p tether-common
//
// For detailed output with plots:
//   cargo bench -p tether-common -- --save-baseline main

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_common::{
    Codec, CodecConfig, FrameCodec, InvokeResult, InvokeSpec, MethodSignature, TypeRef,
    TypeRegistry, TypeSpec, Value,
};
use tokio_util::codec::{Decoder, Encoder};

fn codec() -> Codec {
    let registry = TypeRegistry::builder()
        .register_object(1, "bench.Point", &["x", "y"])
        .unwrap()
        .build();
    Codec::new(CodecConfig::default().with_registry(registry))
}

fn add_spec() -> InvokeSpec {
    let signature = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
        .param(TypeSpec::boxed(TypeRef::Double))
        .param(TypeSpec::boxed(TypeRef::Double));
    InvokeSpec::new(
        "DoubleService",
        "add",
        signature,
        vec![Value::Double(1.0), Value::Double(8.0)],
    )
}

fn points(count: usize) -> Value {
    Value::list((0..count).map(|i| {
        Value::object(
            "bench.Point",
            vec![Value::Int(i as i32), Value::Int(-(i as i32))],
        )
    }))
}

fn bench_envelopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelopes");
    let codec = codec();

    group.bench_function("encode_spec", |b| {
        let spec = add_spec();
        b.iter(|| codec.encode_spec(black_box(&spec)).unwrap());
    });

    group.bench_function("decode_spec", |b| {
        let body = codec.encode_spec(&add_spec()).unwrap();
        b.iter(|| codec.decode_spec(black_box(&body)).unwrap());
    });

    group.bench_function("encode_result", |b| {
        let result = InvokeResult::ok(1, Value::Double(9.0));
        b.iter(|| codec.encode_result(black_box(&result)).unwrap());
    });

    group.finish();
}

fn bench_object_graphs(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_graphs");
    let codec = codec();

    for count in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("encode_points", count), count, |b, &count| {
            let value = points(count);
            b.iter(|| codec.encode_value(black_box(&value)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("decode_points", count), count, |b, &count| {
            let bytes = codec.encode_value(&points(count)).unwrap();
            b.iter(|| codec.decode_value(black_box(&bytes)).unwrap());
        });
    }

    group.bench_function("shared_instance_100x", |b| {
        let shared = points(10);
        let value = Value::list(std::iter::repeat(shared).take(100));
        b.iter(|| codec.encode_value(black_box(&value)).unwrap());
    });

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    for size in [64usize, 4096, 65536].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let body = Bytes::from(vec![0u8; size]);
            b.iter(|| {
                let mut framer = FrameCodec::new();
                let mut wire = BytesMut::new();
                framer.encode(body.clone(), &mut wire).unwrap();
                black_box(framer.decode(&mut wire).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_envelopes, bench_object_graphs, bench_framing);
criterion_main!(benches);
