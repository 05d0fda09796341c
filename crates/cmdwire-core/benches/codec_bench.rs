//! Criterion benchmarks for the cmdwire wire codec.
//!
//! Measures encode and decode latency for both body grammars and for the
//! payload type cast that runs before every typed handler.
//!
//! Run with:
//! ```bash
//! cargo bench --package cmdwire-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cmdwire_core::protocol::{Control, FrameCodec, Grammar, Message, WireCodec};
use cmdwire_core::typecast::{cast, PayloadType};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_greet() -> Message {
    Message::command("greet", Some(b"hi".to_vec()))
}

fn make_bare() -> Message {
    Message::command("ping", None)
}

fn make_large() -> Message {
    Message::command("blob", Some(vec![b'x'; 64 * 1024]))
}

fn make_keepalive() -> Message {
    Message::Control(Control::KeepAlive)
}

fn fixtures() -> Vec<(&'static str, Message)> {
    vec![
        ("Greet", make_greet()),
        ("Bare", make_bare()),
        ("Large64K", make_large()),
        ("KeepAlive", make_keepalive()),
    ]
}

fn codecs() -> Vec<(&'static str, WireCodec)> {
    vec![
        ("marker", WireCodec::new(FrameCodec::default(), Grammar::Marker)),
        ("tagged", WireCodec::new(FrameCodec::default(), Grammar::Tagged)),
    ]
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (grammar, codec) in codecs() {
        for (name, msg) in fixtures() {
            group.bench_with_input(BenchmarkId::new(grammar, name), &msg, |b, msg| {
                b.iter(|| codec.encode(black_box(msg)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (grammar, codec) in codecs() {
        for (name, msg) in fixtures() {
            let wire = codec.encode(&msg).expect("encode must succeed for benchmark setup");
            group.bench_with_input(BenchmarkId::new(grammar, name), &wire, |b, wire| {
                b.iter(|| codec.decode(black_box(wire)).unwrap())
            });
        }
    }
    group.finish();
}

/// Cast cost for the payload types handlers declare most often.
fn bench_cast(c: &mut Criterion) {
    let mut group = c.benchmark_group("cast");
    let list = br#"[1,2,3,4,5,6,7,8,9,10]"#.to_vec();
    let cases: Vec<(&str, Vec<u8>, PayloadType)> = vec![
        ("text", b"hello world".to_vec(), PayloadType::Text),
        ("int", b"123456".to_vec(), PayloadType::Int),
        ("list_int", list, PayloadType::list_of(PayloadType::Int)),
    ];
    for (name, payload, target) in cases {
        group.bench_function(name, |b| {
            b.iter(|| cast(Some(black_box(payload.as_slice())), black_box(&target)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_cast);
criterion_main!(benches);
