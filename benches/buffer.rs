use criterion::{black_box, criterion_group, criterion_main, Criterion};
use positron::prelude::*;
use rand::{Rng, SeedableRng};

fn bench_buffer(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(8008);
    let payload: Vec<u8> = (0..4096).map(|_| rng.gen()).collect();

    c.bench_function("buffer_assign_4k", |b| {
        let mut buffer = ByteBuffer::new();
        b.iter(|| {
            buffer.assign(black_box(&payload));
            black_box(buffer.len())
        })
    });

    c.bench_function("buffer_extend_overwrite", |b| {
        b.iter(|| {
            let mut buffer = ByteBuffer::new();
            for chunk in payload.chunks(256) {
                let offset = buffer.len();
                buffer.set_length(offset + chunk.len());
                buffer.overwrite(offset, chunk);
            }
            black_box(buffer.len())
        })
    });

    c.bench_function("buffer_transfer", |b| {
        b.iter(|| {
            let mut source = ByteBuffer::new();
            source.assign(&payload);
            let mut destination = ByteBuffer::new();
            source.transfer(&mut destination);
            black_box(destination.len())
        })
    });
}

fn bench_codec(c: &mut Criterion) {
    let mut response = Response::with_body(200, "{\"status\":\"ok\"}");
    response.set_header("Content-Type", "application/json");

    c.bench_function("response_serialize", |b| {
        b.iter(|| black_box(response.serialize().len()))
    });

    let wire = response.serialize();

    c.bench_function("response_parse", |b| {
        b.iter(|| black_box(Response::parse(&wire).unwrap().status))
    });

    let request = ByteBuffer::from(
        "GET /health?probe=1 HTTP/1.0\r\nHost: localhost\r\nAccept: text/html, text/plain\r\n\r\n",
    );

    c.bench_function("request_parse", |b| {
        b.iter(|| black_box(Request::parse(&request).unwrap().url.len()))
    });
}

criterion_group!(benches, bench_buffer, bench_codec);
criterion_main!(benches);
