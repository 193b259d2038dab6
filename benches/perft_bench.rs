use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vela::position::Position;
use vela::search::perft;

const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

fn perft_startpos(c: &mut Criterion) {
    vela::init();
    c.bench_function("perft 4 startpos", |b| {
        let mut pos = Position::startpos();
        b.iter(|| black_box(perft(&mut pos, 4)));
    });
}

fn perft_kiwipete(c: &mut Criterion) {
    vela::init();
    c.bench_function("perft 3 kiwipete", |b| {
        let mut pos = Position::from_fen(KIWIPETE, false).unwrap();
        b.iter(|| black_box(perft(&mut pos, 3)));
    });
}

criterion_group!(benches, perft_startpos, perft_kiwipete);
criterion_main!(benches);
