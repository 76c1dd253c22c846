use asim_core::screen;
use asim_core::srec::{self, encode_data_record};
use asim_core::{BreakpointManager, Encoding, MemoryManager, MockEngine, ScreenConfig, SessionConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fmt::Write as _;

fn bench_srec_load(c: &mut Criterion) {
    let mut image = String::new();
    for chunk in 0..1024u32 {
        let payload: Vec<u8> = (0..32).map(|i| (chunk + i) as u8).collect();
        if let Ok(record) = encode_data_record(0x8000 + chunk * 32, &payload) {
            let _ = writeln!(image, "{}", record);
        }
    }
    let engine = MockEngine::new();
    let config = SessionConfig::default();

    c.bench_function("srec_load_32k", |b| {
        b.iter(|| {
            let mut breakpoints = BreakpointManager::new();
            let _ = black_box(srec::load(image.as_bytes(), &engine, &mut breakpoints, &config));
        })
    });
}

fn bench_screen_compose(c: &mut Criterion) {
    let engine = MockEngine::new();
    let config = ScreenConfig::default();
    c.bench_function("screen_compose_256x256", |b| {
        b.iter(|| {
            let _ = black_box(screen::compose(&engine, &config, config.base_address));
        })
    });
}

fn bench_watch_decode(c: &mut Criterion) {
    let engine = MockEngine::new();
    let memory = MemoryManager::new();
    c.bench_function("decode_all_encodings", |b| {
        b.iter(|| {
            for encoding in Encoding::ALL {
                let _ = black_box(memory.decode(&engine, 0x8000, encoding));
            }
        })
    });
}

criterion_group!(benches, bench_srec_load, bench_screen_compose, bench_watch_decode);
criterion_main!(benches);
