mod common;

use vela::position::Position;
use vela::types::*;
use vela::uci::to_move;

fn see_of(fen: &str, mv: &str) -> Value {
    common::setup();
    let pos = Position::from_fen(fen, false).unwrap();
    let m = to_move(&pos, mv);
    assert!(m.is_ok(), "move {} not legal in {}", mv, fen);
    pos.see(m)
}

#[test]
fn undefended_pawn_is_free() {
    assert_eq!(see_of("k7/8/3p4/8/3R4/8/8/K7 w - - 0 1", "d4d6"), piece_value(PAWN));
}

#[test]
fn defended_pawn_loses_the_rook() {
    // Rxd6 exd6 nets a pawn for a rook.
    assert_eq!(
        see_of("k7/4p3/3p4/8/3R4/8/8/K7 w - - 0 1", "d4d6"),
        piece_value(PAWN) - piece_value(ROOK)
    );
}

#[test]
fn recapture_chain_is_resolved() {
    // Nxe5 dxe5 Rxe5: two pawns for the knight, and the chain stops there.
    assert_eq!(
        see_of("k7/8/3p4/4p3/8/4N3/4R3/K7 w - - 0 1", "e3e5"),
        piece_value(PAWN) + piece_value(PAWN) - piece_value(KNIGHT)
    );
}

#[test]
fn xray_attackers_are_counted() {
    // Doubled rooks against a defended pawn: Rxd5 cxd5 Rxd5 wins the pawn
    // back with interest for the first rook only after the x-ray joins in.
    let v = see_of("k2r4/8/8/3p4/8/3R4/3R4/K7 w - - 0 1", "d3d5");
    assert_eq!(v, piece_value(PAWN) - piece_value(ROOK) + piece_value(ROOK));
}

#[test]
fn see_is_monotone_in_victim_value() {
    common::setup();
    // The same capture geometry with increasingly valuable victims on d5.
    let mut last = -VALUE_INFINITE;
    for victim in ["p", "n", "b", "r", "q"] {
        let fen = format!("k7/8/4p3/3{}4/8/3R4/8/K7 w - - 0 1", victim);
        let pos = Position::from_fen(&fen, false).unwrap();
        let m = to_move(&pos, "d3d5");
        assert!(m.is_ok());
        let v = pos.see(m);
        assert!(v >= last, "victim {} gave {} after {}", victim, v, last);
        last = v;
    }
}

#[test]
fn quiet_and_special_moves_score_zero() {
    common::setup();
    let pos = Position::startpos();
    assert_eq!(pos.see(to_move(&pos, "e2e4")), 0);
    assert_eq!(pos.see(to_move(&pos, "g1f3")), 0);
}
