mod common;

use vela::position::Position;
use vela::types::*;
use vela::uci::{move_str, to_move, value};

#[test]
fn move_formatting() {
    common::setup();
    assert_eq!(move_str(Move::NONE, false), "(none)");
    assert_eq!(move_str(Move::NULL, false), "0000");
    assert_eq!(move_str(Move::make(Square::E2, Square::E4), false), "e2e4");
    assert_eq!(
        move_str(Move::make_prom(Square::A7, Square::A8, QUEEN), false),
        "a7a8q"
    );
    assert_eq!(
        move_str(Move::make_prom(Square::A7, Square::A8, KNIGHT), false),
        "a7a8n"
    );

    // Castling is stored as king-takes-rook and rendered king-to-g1/c1
    // outside Chess960.
    let castle = Move::make_special(CASTLING, Square::E1, Square::H1);
    assert_eq!(move_str(castle, false), "e1g1");
    assert_eq!(move_str(castle, true), "e1h1");
    let long = Move::make_special(CASTLING, Square::E8, Square::A8);
    assert_eq!(move_str(long, false), "e8c8");
}

#[test]
fn parse_round_trips_all_legal_moves() {
    common::setup();
    for fen in [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    ] {
        let pos = Position::from_fen(fen, false).unwrap();
        for m in common::legal_moves(&pos) {
            let s = move_str(m, pos.is_chess960());
            assert_eq!(to_move(&pos, &s), m, "{} in {}", s, fen);
        }
    }
}

#[test]
fn bogus_move_strings_resolve_to_none() {
    common::setup();
    let pos = Position::startpos();
    for s in ["e2e5", "e7e5", "0000", "a1a1", "hello", ""] {
        assert_eq!(to_move(&pos, s), Move::NONE, "{}", s);
    }
}

#[test]
fn score_formatting() {
    common::setup();
    assert_eq!(value(0), "cp 0");
    assert_eq!(value(-135), "cp -135");
    assert_eq!(value(mate_in(1)), "mate 1");
    assert_eq!(value(mate_in(4)), "mate 2");
    assert_eq!(value(mated_in(3)), "mate -2");
    assert_eq!(value(mated_in(2)), "mate -1");
}
