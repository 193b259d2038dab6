mod common;

use vela::position::{Position, START_FEN};
use vela::search::perft;

const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

fn run(fen: &str, depth: i32, expected: u64) {
    common::setup();
    let mut pos = Position::from_fen(fen, false).unwrap();
    assert_eq!(perft(&mut pos, depth), expected, "{} depth {}", fen, depth);
}

#[test]
fn startpos_shallow() {
    run(START_FEN, 1, 20);
    run(START_FEN, 2, 400);
    run(START_FEN, 3, 8_902);
    run(START_FEN, 4, 197_281);
}

#[test]
fn startpos_depth_five() {
    run(START_FEN, 5, 4_865_609);
}

#[test]
#[ignore] // ~2 minutes unoptimized; run with --ignored before releases
fn startpos_depth_six() {
    run(START_FEN, 6, 119_060_324);
}

#[test]
fn kiwipete_shallow() {
    run(KIWIPETE, 1, 48);
    run(KIWIPETE, 2, 2_039);
    run(KIWIPETE, 3, 97_862);
    run(KIWIPETE, 4, 4_085_603);
}

#[test]
#[ignore] // ~4 minutes unoptimized; run with --ignored before releases
fn kiwipete_depth_five() {
    run(KIWIPETE, 5, 193_690_690);
}

// Standard tricky positions: en passant pins, promotions, castling through
// and out of attacks.
#[test]
fn tactical_positions() {
    run("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", 4, 43_238);
    run("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", 5, 674_624);
    run(
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        4,
        422_333,
    );
    run(
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        4,
        2_103_487,
    );
    run(
        "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
        4,
        3_894_594,
    );
}
