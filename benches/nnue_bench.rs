use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vela::misc::Prng;
use vela::nnue;
use vela::position::Position;
use vela::uci::to_move;

fn install_net() {
    vela::init();
    let mut rng = Prng::new(0x5EED);
    let mut data = Vec::with_capacity(nnue::WEIGHT_FILE_BYTES);
    let n16 = (nnue::WEIGHT_FILE_BYTES - 4) / 2;
    for _ in 0..n16 {
        let w = (rng.rand64() % 13) as i16 - 6;
        data.extend_from_slice(&w.to_le_bytes());
    }
    data.extend_from_slice(&0i32.to_le_bytes());
    nnue::load_bytes(&data).unwrap();
}

// Full rebuild of both accumulators plus a forward pass.
fn full_refresh(c: &mut Criterion) {
    install_net();
    c.bench_function("nnue full refresh", |b| {
        let mut pos = Position::startpos();
        pos.reset_eval();
        b.iter(|| black_box(pos.predict()));
    });
}

// Incremental path across a short move sequence, the hot case in search.
fn incremental_updates(c: &mut Criterion) {
    install_net();
    c.bench_function("nnue incremental do/undo", |b| {
        let mut pos = Position::startpos();
        pos.reset_eval();
        let moves: Vec<_> = ["e2e4", "e7e5", "g1f3", "b8c6"]
            .iter()
            .map(|s| {
                let m = to_move(&pos, s);
                pos.do_move(m);
                m
            })
            .collect();
        for &m in moves.iter().rev() {
            pos.undo_move(m);
        }

        b.iter(|| {
            for &m in &moves {
                pos.do_move(m);
                black_box(pos.evaluate());
            }
            for &m in moves.iter().rev() {
                pos.undo_move(m);
            }
        });
    });
}

criterion_group!(benches, full_refresh, incremental_updates);
criterion_main!(benches);
