mod common;

use vela::history::History;
use vela::movegen::{GenMode, Generator};
use vela::position::{Position, START_FEN};
use vela::types::*;

const POSITIONS: [&str; 6] = [
    START_FEN,
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    // In check: single checker, so blocks and captures only.
    "rnbqkbnr/ppp1pppp/8/1B1p4/4P3/8/PPPP1PPP/RNBQK1NR b KQkq - 1 2",
    // Promotions with captures available.
    "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    // Endgame with en passant.
    "8/8/8/8/3pP3/8/8/k2K4 b - e3 0 1",
];

#[test]
fn generated_moves_are_legal_and_complete() {
    common::setup();

    for fen in POSITIONS {
        let pos = Position::from_fen(fen, false).unwrap();
        let legal = common::legal_moves(&pos);

        // Everything the perft generator emits passes both filters.
        for &m in &legal {
            assert!(pos.is_pseudolegal(m), "{} in {}", m.0, fen);
            assert!(pos.is_legal(m), "{} in {}", m.0, fen);
        }

        // No legal move is ever omitted: cross-check against a brute-force
        // enumeration of every from/to square pattern.
        let mut brute = 0;
        for from in 0..64u32 {
            for to in 0..64u32 {
                if from == to {
                    continue;
                }
                for m in candidate_moves(Square(from), Square(to)) {
                    if pos.is_pseudolegal(m) && pos.is_legal(m) {
                        assert!(
                            legal.contains(&m),
                            "generator missed {:?} in {}",
                            m,
                            fen
                        );
                        brute += 1;
                    }
                }
            }
        }
        assert_eq!(brute, legal.len(), "move count mismatch in {}", fen);
    }
}

// All encodings a (from, to) pair could legally carry.
fn candidate_moves(from: Square, to: Square) -> Vec<Move> {
    let mut out = vec![
        Move::make(from, to),
        Move::make_special(EN_PASSANT, from, to),
        Move::make_special(CASTLING, from, to),
    ];
    for pt in [KNIGHT, BISHOP, ROOK, QUEEN] {
        out.push(Move::make_prom(from, to, pt));
    }
    out
}

// The staged pipeline must yield exactly the pseudo-legal move set: no
// duplicates, nothing missing, captures before the quiets they outrank.
#[test]
fn staged_generator_matches_legal_set() {
    common::setup();

    for fen in POSITIONS {
        let pos = Position::from_fen(fen, false).unwrap();
        let hist = History::new();

        let mut staged = Vec::new();
        let mut gen = Generator::new(&pos, &hist, GenMode::PvSearch, Move::NONE, 0);
        loop {
            let m = gen.next(&pos, &hist);
            if m == Move::NONE {
                break;
            }
            assert!(!staged.contains(&m), "duplicate {:?} in {}", m, fen);
            assert!(pos.is_pseudolegal(m), "{:?} in {}", m, fen);
            staged.push(m);
        }

        let mut legal = common::legal_moves(&pos);
        let mut filtered: Vec<Move> =
            staged.into_iter().filter(|&m| pos.is_legal(m)).collect();
        legal.sort_by_key(|m| m.0);
        filtered.sort_by_key(|m| m.0);
        assert_eq!(legal, filtered, "staged set differs in {}", fen);
    }
}

#[test]
fn skip_quiets_suppresses_quiet_moves() {
    common::setup();
    let pos = Position::startpos();
    let hist = History::new();

    let mut gen = Generator::new(&pos, &hist, GenMode::PvSearch, Move::NONE, 0);
    gen.skip_quiets();
    loop {
        let m = gen.next(&pos, &hist);
        if m == Move::NONE {
            break;
        }
        assert!(pos.is_noisy(m), "quiet {:?} leaked through", m);
    }
}

#[test]
fn tt_move_comes_first_and_only_once() {
    common::setup();
    let pos = Position::startpos();
    let hist = History::new();
    let tt = Move::make(Square::E2, Square::E4);

    let mut gen = Generator::new(&pos, &hist, GenMode::PvSearch, tt, 0);
    let first = gen.next(&pos, &hist);
    assert_eq!(first, tt);

    loop {
        let m = gen.next(&pos, &hist);
        if m == Move::NONE {
            break;
        }
        assert_ne!(m, tt, "TT move yielded twice");
    }
}

#[test]
fn qsearch_mode_yields_noisy_moves_only() {
    common::setup();
    let pos = Position::from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        false,
    )
    .unwrap();
    let hist = History::new();

    let mut gen = Generator::new(&pos, &hist, GenMode::Qsearch, Move::NONE, 0);
    let mut any = false;
    loop {
        let m = gen.next(&pos, &hist);
        if m == Move::NONE {
            break;
        }
        any = true;
        assert!(
            pos.is_capture(m) || (m.move_type() == PROMOTION && m.promotion_type() == QUEEN),
            "{:?} is not a capture or queen promotion",
            m
        );
    }
    assert!(any);
}

#[test]
fn in_check_generation_is_restricted() {
    common::setup();
    // Double check: only king moves exist.
    let pos = Position::from_fen("3k4/8/8/7b/8/8/4K3/4r3 w - - 0 1", false).unwrap();
    assert!(vela::bitboard::more_than_one(pos.checkers()));
    for m in common::legal_moves(&pos) {
        assert_eq!(m.from(), pos.ksq(WHITE), "non-king move {:?} in double check", m);
    }
}
