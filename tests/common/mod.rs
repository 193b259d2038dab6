#![allow(dead_code)]

use vela::misc::Prng;
use vela::movegen::Generator;
use vela::position::Position;
use vela::types::Move;

pub fn setup() {
    vela::init();
}

// All legal moves of a position, through the perft-mode generator.
pub fn legal_moves(pos: &Position) -> Vec<Move> {
    let mut gen = Generator::perft(pos);
    let mut moves = Vec::new();
    loop {
        let m = gen.next_legal();
        if m == Move::NONE {
            break;
        }
        moves.push(m);
    }
    moves
}

// Play a pseudo-random legal game of at most max_plies, calling the visitor
// after every move. Returns the moves actually played so the caller can
// rewind.
pub fn random_playout<F: FnMut(&mut Position)>(
    pos: &mut Position,
    seed: u64,
    max_plies: usize,
    mut visit: F,
) -> Vec<Move> {
    let mut rng = Prng::new(seed);
    let mut played = Vec::new();

    for _ in 0..max_plies {
        let moves = legal_moves(pos);
        if moves.is_empty() || pos.is_draw() {
            break;
        }
        let m = moves[(rng.rand64() % moves.len() as u64) as usize];
        pos.do_move(m);
        played.push(m);
        visit(pos);
    }
    played
}
