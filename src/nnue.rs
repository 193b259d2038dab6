// SPDX-License-Identifier: GPL-3.0-or-later

// NNUE-style evaluator. One sparse input layer of 16 king buckets x 12
// piece-color channels x 64 squares feeds two 512-wide perspective
// accumulators, followed by a single output layer over the clipped
// activations of both perspectives (side to move first).
//
// The accumulators live in a ply-indexed stack owned by the Position. A move
// pushes only a small delta record; the 512-wide arithmetic happens on
// demand in evaluate(), walking back to the nearest computed ancestor, or
// through the king-bucket refresh table when the king crossed a bucket or
// half-board boundary. All accumulator arithmetic is wrapping int16 with
// int32 multiply-accumulate, so lane width never changes the result.

use crate::bitboard::*;
use crate::position::Position;
use crate::types::*;

use anyhow::{bail, Context, Result};
use std::path::Path;

pub const L0_SIZE: usize = 16 * 12 * 64;
pub const L1_SIZE: usize = 512;

// Weight bundle layout on disk, little endian, in order:
// L0 weights (i16), L0 bias (i16), L1 weights (i16), L1 bias (i32).
pub const WEIGHT_FILE_BYTES: usize = 2 * (L0_SIZE * L1_SIZE + L1_SIZE + 2 * L1_SIZE) + 4;

static mut L0_WEIGHT: Vec<i16> = Vec::new();
static mut L0_BIAS: [i16; L1_SIZE] = [0; L1_SIZE];
static mut L1_WEIGHT: [i16; 2 * L1_SIZE] = [0; 2 * L1_SIZE];
static mut L1_BIAS: i32 = 0;

fn l0_row(idx: usize) -> &'static [i16] {
    unsafe {
        let w = &*std::ptr::addr_of!(L0_WEIGHT);
        &w[idx * L1_SIZE..(idx + 1) * L1_SIZE]
    }
}

fn l0_bias() -> &'static [i16; L1_SIZE] {
    unsafe { &*std::ptr::addr_of!(L0_BIAS) }
}

fn l1_weight() -> &'static [i16; 2 * L1_SIZE] {
    unsafe { &*std::ptr::addr_of!(L1_WEIGHT) }
}

fn l1_bias() -> i32 {
    unsafe { L1_BIAS }
}

// init() reserves zeroed weight storage so the evaluator is usable (and
// returns 0) before a network has been installed. Called once at startup.
pub fn init() {
    unsafe {
        let w = &mut *std::ptr::addr_of_mut!(L0_WEIGHT);
        if w.is_empty() {
            *w = vec![0; L0_SIZE * L1_SIZE];
        }
    }
}

// Install a weight bundle. Not safe concurrently with a running search; the
// caller loads weights during startup or between searches.
pub fn load_bytes(data: &[u8]) -> Result<()> {
    if data.len() != WEIGHT_FILE_BYTES {
        bail!(
            "network bundle is {} bytes, expected {}",
            data.len(),
            WEIGHT_FILE_BYTES
        );
    }

    init();

    let mut off = 0usize;
    let mut read16 = |n: usize| {
        let slice = &data[off..off + 2 * n];
        off += 2 * n;
        slice
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<i16>>()
    };

    let l0w = read16(L0_SIZE * L1_SIZE);
    let l0b = read16(L1_SIZE);
    let l1w = read16(2 * L1_SIZE);

    unsafe {
        (*std::ptr::addr_of_mut!(L0_WEIGHT)).copy_from_slice(&l0w);
        (*std::ptr::addr_of_mut!(L0_BIAS)).copy_from_slice(&l0b);
        (*std::ptr::addr_of_mut!(L1_WEIGHT)).copy_from_slice(&l1w);
        let tail = &data[WEIGHT_FILE_BYTES - 4..];
        L1_BIAS = i32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    }

    Ok(())
}

pub fn load_file(path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open network file {}", path.display()))?;
    let map = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("cannot map network file {}", path.display()))?;
    load_bytes(&map).with_context(|| format!("bad network file {}", path.display()))
}

// King buckets, mirrored across the board's vertical axis. Black's table is
// White's flipped by rank.
#[rustfmt::skip]
const KING_BUCKETS: [[u16; 64]; 2] = [
    [
        0,  1,  2,  3,  3,  2,  1,  0,
        4,  5,  6,  7,  7,  6,  5,  4,
        8,  9,  10, 11, 11, 10, 9,  8,
        8,  9,  10, 11, 11, 10, 9,  8,
        12, 12, 13, 13, 13, 13, 12, 12,
        12, 12, 13, 13, 13, 13, 12, 12,
        14, 14, 15, 15, 15, 15, 14, 14,
        14, 14, 15, 15, 15, 15, 14, 14,
    ],
    [
        14, 14, 15, 15, 15, 15, 14, 14,
        14, 14, 15, 15, 15, 15, 14, 14,
        12, 12, 13, 13, 13, 13, 12, 12,
        12, 12, 13, 13, 13, 13, 12, 12,
        8,  9,  10, 11, 11, 10, 9,  8,
        8,  9,  10, 11, 11, 10, 9,  8,
        4,  5,  6,  7,  7,  6,  5,  4,
        0,  1,  2,  3,  3,  2,  1,  0,
    ],
];

fn king_bucket(side: Color, ksq: Square) -> usize {
    KING_BUCKETS[side.0 as usize][ksq.0 as usize] as usize
}

fn orient(side: Color, s: Square) -> u32 {
    s.0 ^ (56 * side.0)
}

// Feature index for (square, piece, king square, perspective). The square is
// mirrored horizontally when the king sits on the king-side files, which
// halves the number of distinct king placements each bucket must cover.
fn make_index(sq: Square, pc: Piece, ksq: Square, side: Color) -> usize {
    let mut s = orient(side, sq) as usize;
    if ksq.file() >= FILE_E {
        s ^= 7;
    }

    let idx = s
        + (pc.piece_type().0 as usize - 1) * 64
        + (pc.color() != side) as usize * 64 * 6
        + king_bucket(side, ksq) * 64 * 6 * 2;

    debug_assert!(idx < L0_SIZE);
    idx
}

// A move forces a refresh for its own side when the king crosses the
// board's vertical mirror axis or lands in a different bucket.
fn refresh_required(pc: Piece, from: Square, to: Square) -> bool {
    if pc.piece_type() != KING {
        return false;
    }
    if from.file() + to.file() == 7 {
        return true;
    }
    king_bucket(pc.color(), from) != king_bucket(pc.color(), to)
}

fn add_row(acc: &mut [i16; L1_SIZE], idx: usize) {
    let row = l0_row(idx);
    for (a, w) in acc.iter_mut().zip(row) {
        *a = a.wrapping_add(*w);
    }
}

fn sub_row(acc: &mut [i16; L1_SIZE], idx: usize) {
    let row = l0_row(idx);
    for (a, w) in acc.iter_mut().zip(row) {
        *a = a.wrapping_sub(*w);
    }
}

// One refresh-table slot per (king half, king bucket) and color, holding the
// accumulator and the piece placement it was computed from, so a refresh
// only has to diff the changed squares.
#[derive(Clone)]
struct RefreshEntry {
    values: [i16; L1_SIZE],
    pieces: [Bitboard; 16],
}

impl RefreshEntry {
    fn new() -> RefreshEntry {
        RefreshEntry {
            values: *l0_bias(),
            pieces: [EMPTY_BB; 16],
        }
    }
}

#[derive(Clone)]
struct RefreshTable {
    entries: Vec<RefreshEntry>, // [color][32]
}

impl RefreshTable {
    fn new() -> RefreshTable {
        RefreshTable {
            entries: vec![RefreshEntry::new(); 2 * 32],
        }
    }

    fn entry_mut(&mut self, side: Color, slot: usize) -> &mut RefreshEntry {
        &mut self.entries[side.0 as usize * 32 + slot]
    }
}

#[derive(Clone, Copy)]
struct Delta {
    m: Move,
    pc: Piece,
    cap: Piece,
}

const NO_DELTA: Delta = Delta {
    m: Move::NONE,
    pc: NO_PIECE,
    cap: NO_PIECE,
};

#[derive(Clone)]
struct Accumulator {
    values: [[i16; L1_SIZE]; 2],
    computed: [bool; 2],
    delta: Delta,
}

impl Accumulator {
    fn new() -> Accumulator {
        Accumulator {
            values: [[0; L1_SIZE]; 2],
            computed: [false; 2],
            delta: NO_DELTA,
        }
    }
}

#[derive(Clone)]
pub struct Evaluator {
    stack: Vec<Accumulator>,
    idx: usize,
    refresh: RefreshTable,
}

impl Evaluator {
    pub fn new() -> Evaluator {
        let mut stack = Vec::with_capacity(MAX_PLY as usize + 1);
        stack.push(Accumulator::new());
        Evaluator {
            stack,
            idx: 0,
            refresh: RefreshTable::new(),
        }
    }

    // Rebase the stack onto the given position: one fully computed entry.
    // The refresh table starts over too, in case the weights changed since
    // its entries were cached.
    pub fn reset(&mut self, pos: &Position) {
        self.stack.truncate(1);
        self.idx = 0;
        self.stack[0].delta = NO_DELTA;
        self.refresh = RefreshTable::new();
        self.full_reset(pos);
    }

    // Record a move without doing any accumulator arithmetic yet. For
    // castling the capture slot carries the rook.
    pub fn push(&mut self, m: Move, pc: Piece, cap: Piece) {
        self.idx += 1;
        if self.idx == self.stack.len() {
            self.stack.push(Accumulator::new());
        }
        let e = &mut self.stack[self.idx];
        e.computed = [false; 2];
        e.delta = Delta { m, pc, cap };
    }

    pub fn pop(&mut self) {
        debug_assert!(self.idx > 0);
        self.stack[self.idx].computed = [false; 2];
        self.idx -= 1;
    }

    pub fn evaluate(&mut self, pos: &Position) -> Value {
        self.ensure(pos, WHITE);
        self.ensure(pos, BLACK);
        self.propagate(pos.side())
    }

    // Full rebuild of the current entry followed by a forward pass. The
    // incremental path must agree with this bit for bit.
    pub fn predict(&mut self, pos: &Position) -> Value {
        self.full_reset(pos);
        self.propagate(pos.side())
    }

    fn full_reset(&mut self, pos: &Position) {
        for c in [WHITE, BLACK] {
            let ksq = pos.ksq(c);
            let entry = &mut self.stack[self.idx];
            entry.values[c.0 as usize] = *l0_bias();
            for sq in pos.pieces() {
                add_row(
                    &mut entry.values[c.0 as usize],
                    make_index(sq, pos.piece_on(sq), ksq, c),
                );
            }
            entry.computed[c.0 as usize] = true;
        }
    }

    // Make the current entry's accumulator for one perspective valid: walk
    // back to the nearest computed ancestor and replay the deltas, or fall
    // back to the refresh table when a king move invalidated the chain.
    fn ensure(&mut self, pos: &Position, side: Color) {
        let c = side.0 as usize;
        if self.stack[self.idx].computed[c] {
            return;
        }

        let mut i = self.idx;
        while !self.stack[i].computed[c] {
            let d = self.stack[i].delta;
            if d.m == Move::NONE
                || (d.pc.color() == side && refresh_required(d.pc, d.m.from(), d.m.to()))
            {
                self.refresh(pos, side);
                return;
            }
            if i == 0 {
                self.refresh(pos, side);
                return;
            }
            i -= 1;
        }

        // No refresh barrier in between, so this perspective's king bucket
        // and mirror state are unchanged along the whole chain and the
        // current king square indexes every delta correctly.
        let ksq = pos.ksq(side);
        for j in i + 1..=self.idx {
            self.apply_delta(j, side, ksq);
        }
    }

    fn apply_delta(&mut self, j: usize, side: Color, ksq: Square) {
        let c = side.0 as usize;
        let d = self.stack[j].delta;
        let (lo, hi) = self.stack.split_at_mut(j);
        let src = &lo[j - 1].values[c];
        let entry = &mut hi[0];
        let dst = &mut entry.values[c];
        *dst = *src;

        let mover = d.pc.color();
        let from = d.m.from();
        let to = d.m.to();

        if d.m.move_type() == CASTLING {
            let king_side = to > from;
            let king_to = Square::make(if king_side { FILE_G } else { FILE_C }, from.rank());
            let rook_to = Square::make(if king_side { FILE_F } else { FILE_D }, from.rank());

            sub_row(dst, make_index(from, d.pc, ksq, side));
            sub_row(dst, make_index(to, d.cap, ksq, side));
            add_row(dst, make_index(king_to, d.pc, ksq, side));
            add_row(dst, make_index(rook_to, d.cap, ksq, side));
        } else {
            let pc_to = if d.m.move_type() == PROMOTION {
                Piece::make(mover, d.m.promotion_type())
            } else {
                d.pc
            };

            sub_row(dst, make_index(from, d.pc, ksq, side));
            if d.cap != NO_PIECE {
                let capsq = if d.m.move_type() == EN_PASSANT {
                    to - pawn_push(mover)
                } else {
                    to
                };
                sub_row(dst, make_index(capsq, d.cap, ksq, side));
            }
            add_row(dst, make_index(to, pc_to, ksq, side));
        }

        entry.computed[c] = true;
    }

    // Bring the cached bucket accumulator up to date by diffing piece
    // placements, then copy it into the current entry.
    fn refresh(&mut self, pos: &Position, side: Color) {
        let ksq = pos.ksq(side);
        let slot = 16 * (ksq.file() >= FILE_E) as usize + king_bucket(side, ksq);
        let entry = self.refresh.entry_mut(side, slot);

        for c in [WHITE, BLACK] {
            for pt in 1..=6 {
                let pc = Piece::make(c, PieceType(pt));
                let occupied = pos.pieces_cp(c, PieceType(pt));
                let pre = entry.pieces[pc.0 as usize];

                for sq in pre & !occupied {
                    sub_row(&mut entry.values, make_index(sq, pc, ksq, side));
                }
                for sq in occupied & !pre {
                    add_row(&mut entry.values, make_index(sq, pc, ksq, side));
                }

                entry.pieces[pc.0 as usize] = occupied;
            }
        }

        let values = entry.values;
        let cur = &mut self.stack[self.idx];
        cur.values[side.0 as usize] = values;
        cur.computed[side.0 as usize] = true;
    }

    // Forward pass: clipped ReLU on both perspective accumulators, own side
    // first, multiply-accumulate into i32 and scale down.
    fn propagate(&self, side: Color) -> Value {
        let entry = &self.stack[self.idx];
        let own = &entry.values[side.0 as usize];
        let opp = &entry.values[(!side).0 as usize];
        let weights = l1_weight();

        let mut sum: i32 = 0;
        for i in 0..L1_SIZE {
            sum += i32::from(own[i].max(0)) * i32::from(weights[i]);
        }
        for i in 0..L1_SIZE {
            sum += i32::from(opp[i].max(0)) * i32::from(weights[L1_SIZE + i]);
        }

        (sum + l1_bias()) / 32 / 128
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}
