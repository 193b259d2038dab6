// SPDX-License-Identifier: GPL-3.0-or-later

pub mod benchmark;
pub mod bitboard;
pub mod history;
pub mod misc;
pub mod movegen;
pub mod nnue;
pub mod position;
pub mod search;
pub mod timeman;
pub mod tt;
pub mod types;
pub mod uci;

use std::sync::Once;

static INIT: Once = Once::new();

// Process-wide table initialization: bitboard attacks, zobrist and cuckoo
// keys, reduction tables and zeroed network storage. Must run before any
// Position is constructed; safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        bitboard::init();
        position::zobrist::init();
        search::init();
        nnue::init();
    });
}
