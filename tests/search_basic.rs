mod common;

use std::sync::Mutex;

use vela::position::Position;
use vela::search::Search;
use vela::timeman::TimeManager;
use vela::tt;
use vela::types::*;
use vela::uci::move_str;

// The transposition table is process-global and resize is not safe while
// another search runs, so the search tests take turns.
static TT_LOCK: Mutex<()> = Mutex::new(());

fn search_depth(fen: &str, depth: Depth) -> (Move, Value) {
    common::setup();
    let _guard = TT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    tt::resize(16);

    let pos = Position::from_fen(fen, false).unwrap();
    let mut search = Search::new();
    search.info_strings = false;

    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_depth_limit(depth);

    let report = search.search(&pos, &tm);
    (report.best_move, report.score)
}

#[test]
fn finds_mate_in_one() {
    let (best, score) = search_depth("4k3/8/4K3/8/8/8/8/R7 w - - 0 1", 2);
    assert_eq!(move_str(best, false), "a1a8");
    assert_eq!(score, mate_in(1));
}

#[test]
fn reports_mate_for_back_rank() {
    // White mates with Qd8 or Rd8; either way the score is mate in 1.
    let (best, score) = search_depth("6k1/5ppp/8/8/8/8/8/3QK2R w - - 0 1", 3);
    assert_eq!(score, mate_in(1));
    assert_eq!(move_str(best, false), "d1d8");
}

#[test]
fn stalemate_scores_zero_with_no_move() {
    // Black to move has no legal moves and is not in check.
    let (best, score) = search_depth("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 4);
    assert_eq!(best, Move::NONE);
    assert_eq!(score, VALUE_DRAW);
}

#[test]
fn checkmated_root_scores_mate_zero() {
    // Fool's mate delivered; the mated side has nothing to say.
    let (best, score) =
        search_depth("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3", 2);
    assert_eq!(best, Move::NONE);
    assert_eq!(score, -VALUE_MATE);
}

#[test]
fn finds_forced_mate_in_two() {
    // Several move orders mate in two; all of them score mate in 3 plies.
    let (best, score) = search_depth("7k/8/8/6K1/8/8/8/1Q6 w - - 0 1", 5);
    assert!(best.is_ok());
    assert_eq!(score, mate_in(3));
}

#[test]
fn returns_some_legal_move_from_startpos() {
    let (best, score) = search_depth(
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        5,
    );
    assert!(best.is_ok());
    assert!(score.abs() < VALUE_WIN_MAX_PLY);

    let pos = Position::startpos();
    assert!(common::legal_moves(&pos).contains(&best));
}

#[test]
fn respects_node_limit() {
    common::setup();
    let _guard = TT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    tt::resize(16);

    let pos = Position::startpos();
    let mut search = Search::new();
    search.info_strings = false;

    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_node_limit(20_000);

    let report = search.search(&pos, &tm);
    assert!(report.best_move.is_ok());
    // The limit is polled every 1024 nodes, so allow slack.
    assert!(report.nodes < 200_000, "searched {} nodes", report.nodes);
}

#[test]
fn draw_by_fifty_rule_is_scored_as_draw() {
    // One reversible move from the counter expiring: every line ends in a
    // draw, so the reported score collapses to the jittered draw band.
    let (_, score) = search_depth("4k3/8/8/8/8/8/8/4K2R w - - 98 120", 6);
    assert!(score.abs() <= 16, "expected near-draw score, got {}", score);
}
