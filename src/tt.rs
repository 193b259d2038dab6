// SPDX-License-Identifier: GPL-3.0-or-later

use crate::position::Key;
use crate::types::*;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

// One 16-byte entry:
//
//   key     32 bits  (low bits of the zobrist key)
//   score   16 bits
//   eval    16 bits
//   move    16 bits
//   depth    8 bits
//   node     8 bits  (PV flag in bit 2, bound in bits 0..1)
//   age      8 bits
//
// packed into two words stored with relaxed atomics. All threads probe and
// save concurrently; a torn pair of words can at worst misreport score or
// move for a key, which the probe's key check and the searcher's
// is_pseudolegal() filter absorb. Bucket index comes from the high half of
// the zobrist key, so index and stored key share no bits.
struct TTEntry {
    word0: AtomicU64, // key32 | move16 << 32 | score16 << 48
    word1: AtomicU64, // eval16 | depth8 << 16 | node8 << 24 | age8 << 32
}

impl TTEntry {
    const fn empty() -> TTEntry {
        TTEntry {
            word0: AtomicU64::new(0),
            word1: AtomicU64::new(0),
        }
    }
}

#[derive(Clone, Copy)]
pub struct TTData {
    pub score: Value,
    pub eval: Value,
    pub mov: Move,
    pub depth: Depth,
    pub bound: Bound,
    pub is_pv: bool,
}

static mut TABLE: Vec<TTEntry> = Vec::new();
static GENERATION: AtomicU8 = AtomicU8::new(0);

fn table() -> &'static [TTEntry] {
    unsafe { &*std::ptr::addr_of!(TABLE) }
}

fn index(key: Key) -> usize {
    let t = table();
    debug_assert!(t.len().is_power_of_two());
    ((key >> 32) as usize) & (t.len() - 1)
}

pub fn generation() -> u8 {
    GENERATION.load(Ordering::Relaxed)
}

// Each search increments the shared age; entries from earlier searches lose
// their replacement protection.
pub fn new_search() {
    let g = GENERATION.load(Ordering::Relaxed);
    GENERATION.store(if g == 255 { 0 } else { g + 1 }, Ordering::Relaxed);
}

// resize() reallocates the table to the largest power-of-two entry count
// fitting in the requested megabytes. Never call while a search is running.
pub fn resize(mb: usize) {
    let bytes = mb.max(1) * 1024 * 1024;
    let mut n = (bytes / std::mem::size_of::<TTEntry>()).next_power_of_two();
    if n * std::mem::size_of::<TTEntry>() > bytes {
        n /= 2;
    }

    log::debug!("resizing transposition table to {} entries ({} MB)", n, mb);

    unsafe {
        let table = &mut *std::ptr::addr_of_mut!(TABLE);
        table.clear();
        table.reserve_exact(n);
        for _ in 0..n {
            table.push(TTEntry::empty());
        }
    }
    GENERATION.store(0, Ordering::Relaxed);
}

pub fn clear() {
    for e in table() {
        e.word0.store(0, Ordering::Relaxed);
        e.word1.store(0, Ordering::Relaxed);
    }
    GENERATION.store(0, Ordering::Relaxed);
}

// probe() returns the stored data when the 32-bit key matches. It also
// refreshes the entry's age so a hit from an earlier search regains its
// replacement protection.
pub fn probe(key: Key) -> Option<TTData> {
    if table().is_empty() {
        return None;
    }
    let e = &table()[index(key)];
    let w0 = e.word0.load(Ordering::Relaxed);
    let w1 = e.word1.load(Ordering::Relaxed);

    if w0 as u32 == 0 && w1 == 0 {
        return None;
    }
    if w0 as u32 != key as u32 {
        return None;
    }

    let age = ((w1 >> 32) & 0xff) as u8;
    if age != generation() {
        let refreshed = (w1 & !(0xffu64 << 32)) | ((generation() as u64) << 32);
        e.word1.store(refreshed, Ordering::Relaxed);
    }

    let node = ((w1 >> 24) & 0xff) as u8;
    Some(TTData {
        score: (w0 >> 48) as u16 as i16 as Value,
        eval: (w1 & 0xffff) as u16 as i16 as Value,
        mov: Move((w0 >> 32) as u16),
        depth: ((w1 >> 16) & 0xff) as Depth,
        bound: Bound(node & 3),
        is_pv: node & 4 != 0,
    })
}

// Single-slot replacement. The new entry wins if it is exact, the slot holds
// a different position, the slot is from an earlier search, or the slot is
// not deeper than the incoming entry.
pub fn save(key: Key, depth: Depth, score: Value, eval: Value, m: Move, bound: Bound, is_pv: bool) {
    debug_assert!(depth >= 0 && depth <= MAX_PLY);
    debug_assert!(score > -VALUE_INFINITE && score < VALUE_INFINITE);

    if table().is_empty() {
        return;
    }
    let e = &table()[index(key)];
    let w0 = e.word0.load(Ordering::Relaxed);
    let w1 = e.word1.load(Ordering::Relaxed);

    let same_key = w0 as u32 == key as u32 && (w0 != 0 || w1 != 0);
    let stored_depth = ((w1 >> 16) & 0xff) as Depth;
    let stored_age = ((w1 >> 32) & 0xff) as u8;

    // Preserve the stored move when the new entry has none for the same key.
    let m = if m == Move::NONE && same_key {
        Move((w0 >> 32) as u16)
    } else {
        m
    };

    if bound == Bound::EXACT || !same_key || stored_age != generation() || stored_depth <= depth {
        let node = ((is_pv as u8) << 2 | bound.0) as u64;
        let new0 =
            (key as u32 as u64) | ((m.0 as u64) << 32) | (((score as i16 as u16) as u64) << 48);
        let new1 = ((eval as i16 as u16) as u64)
            | ((depth as u64 & 0xff) << 16)
            | (node << 24)
            | ((generation() as u64) << 32);
        e.word0.store(new0, Ordering::Relaxed);
        e.word1.store(new1, Ordering::Relaxed);
    }
}

// An approximation in [0, 1000] of table usage, sampling the first thousand
// entries for the current generation.
pub fn hashfull() -> i32 {
    let t = table();
    let mut count = 0;
    for e in t.iter().take(1000) {
        let w0 = e.word0.load(Ordering::Relaxed);
        let w1 = e.word1.load(Ordering::Relaxed);
        if w0 as u32 != 0 && ((w1 >> 32) & 0xff) as u8 == generation() {
            count += 1;
        }
    }
    count
}

pub fn prefetch(key: Key) {
    if table().is_empty() {
        return;
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        let e = &table()[index(key)] as *const TTEntry as *const i8;
        _mm_prefetch(e, _MM_HINT_T0);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = key;
}
