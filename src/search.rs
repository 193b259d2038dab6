// SPDX-License-Identifier: GPL-3.0-or-later

use crate::history::History;
use crate::movegen::{GenMode, Generator};
use crate::position::Position;
use crate::timeman::TimeManager;
use crate::tt;
use crate::types::*;
use crate::uci;

use std::io::Write;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

// Helper threads get a generous stack; each search frame carries a
// generator's move lists.
const THREAD_STACK_SIZE: usize = 16 * 1024 * 1024;

// Reductions lookup table, filled at startup.
static mut LMR: [[i8; 64]; 64] = [[0; 64]; 64];

fn lmr(depth: Depth, move_cnt: i32) -> i32 {
    unsafe {
        LMR[std::cmp::min(depth, 63) as usize][std::cmp::min(move_cnt, 63) as usize] as i32
    }
}

pub fn init() {
    unsafe {
        for d in 1..64usize {
            for m in 1..64usize {
                LMR[d][m] =
                    (1.25 + (d as f64).ln() * (m as f64).ln() / 3.0).round() as i8;
            }
        }
    }
}

fn stat_bonus(d: Depth) -> Value {
    std::cmp::min(300 * d - 250, 1500)
}

fn stat_malus(d: Depth) -> Value {
    std::cmp::min(350 * d - 200, 1700)
}

// Slightly randomized draw score, so the search does not steer into
// deterministic repetition lines it cannot distinguish.
fn draw_value(nodes: u64) -> Value {
    8 - (nodes & 0xf) as Value
}

#[derive(Clone)]
pub struct RootMove {
    pub m: Move,
    pub average: Value,
    pub current: Value,
}

impl RootMove {
    fn new(m: Move) -> RootMove {
        RootMove {
            m,
            average: -VALUE_INFINITE,
            current: -VALUE_INFINITE,
        }
    }
}

// Triangular PV table: line at ply p is the move searched there plus the
// child's line.
pub struct PvTable {
    moves: Vec<Move>, // [MAX_PLY + 1][MAX_PLY + 1]
    sizes: Vec<usize>,
}

const PV_STRIDE: usize = MAX_PLY as usize + 1;

impl PvTable {
    fn new() -> PvTable {
        PvTable {
            moves: vec![Move::NONE; PV_STRIDE * PV_STRIDE],
            sizes: vec![0; PV_STRIDE],
        }
    }

    fn reset(&mut self) {
        self.sizes.iter_mut().for_each(|s| *s = 0);
    }

    fn reset_ply(&mut self, ply: i32) {
        self.sizes[ply as usize] = 0;
    }

    fn update(&mut self, m: Move, ply: i32) {
        let p = ply as usize;
        let child_size = if p + 1 < PV_STRIDE { self.sizes[p + 1] } else { 0 };
        self.moves[p * PV_STRIDE] = m;
        for i in 0..child_size {
            self.moves[p * PV_STRIDE + 1 + i] = self.moves[(p + 1) * PV_STRIDE + i];
        }
        self.sizes[p] = child_size + 1;
    }

    pub fn line(&self) -> &[Move] {
        &self.moves[..self.sizes[0]]
    }
}

pub struct SearchReport {
    pub best_move: Move,
    pub score: Value,
    pub depth: Depth,
    pub nodes: u64,
}

struct ThreadData {
    history: History,
}

// The search owner: a fixed pool of worker slots with persistent per-thread
// history. Workers are spawned per search() call and joined before it
// returns; they share only the transposition table and the stop flag.
pub struct Search {
    thread_count: usize,
    pub info_strings: bool,
    threads: Vec<ThreadData>,
}

impl Search {
    pub fn new() -> Search {
        Search {
            thread_count: 1,
            info_strings: true,
            threads: vec![ThreadData {
                history: History::new(),
            }],
        }
    }

    pub fn set_threads(&mut self, n: usize) {
        let max = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1)
            .max(1);
        self.thread_count = n.clamp(1, max);
        self.threads.clear();
        for _ in 0..self.thread_count {
            self.threads.push(ThreadData {
                history: History::new(),
            });
        }
        log::debug!("search pool set to {} threads", self.thread_count);
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn clear(&mut self) {
        for td in &mut self.threads {
            td.history.clear();
        }
    }

    // Run a search on the given position. All workers run the same
    // iterative deepening loop over independent clones; the main worker's
    // best move is authoritative and returned once every helper has joined.
    pub fn search(&mut self, pos: &Position, tm: &TimeManager) -> SearchReport {
        tt::new_search();

        let mut root_moves = Vec::new();
        let mut gen = Generator::perft(pos);
        loop {
            let m = gen.next_legal();
            if m == Move::NONE {
                break;
            }
            root_moves.push(RootMove::new(m));
        }

        if root_moves.is_empty() {
            // Mate or stalemate at the root; the evaluator is never invoked.
            if self.info_strings {
                let score = if pos.checkers().any() { "mate 0" } else { "cp 0" };
                println!("info depth 0 score {}", score);
                let _ = std::io::stdout().flush();
            }
            return SearchReport {
                best_move: Move::NONE,
                score: if pos.checkers().any() { -VALUE_MATE } else { VALUE_DRAW },
                depth: 0,
                nodes: 0,
            };
        }

        let max_depth = if tm.depth_limit.enabled {
            std::cmp::min(MAX_PLY - 1, tm.depth_limit.max as Depth)
        } else {
            MAX_PLY - 1
        };

        let info_strings = self.info_strings;
        let shared_nodes: Vec<AtomicU64> =
            (0..self.thread_count).map(|_| AtomicU64::new(0)).collect();
        let shared_seldepth: Vec<AtomicI32> =
            (0..self.thread_count).map(|_| AtomicI32::new(0)).collect();

        let (main_td, helper_tds) = self.threads.split_at_mut(1);

        let report = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (i, td) in helper_tds.iter_mut().enumerate() {
                let id = i + 1;
                let mut worker_pos = pos.clone();
                let worker_roots = root_moves.clone();
                let shared_nodes = &shared_nodes;
                let shared_seldepth = &shared_seldepth;
                let handle = std::thread::Builder::new()
                    .stack_size(THREAD_STACK_SIZE)
                    .spawn_scoped(scope, move || {
                        worker_pos.reset_eval();
                        let chess960 = worker_pos.is_chess960();
                        let mut w = Worker::new(
                            id,
                            &mut td.history,
                            worker_roots,
                            tm,
                            shared_nodes,
                            shared_seldepth,
                            max_depth,
                            false,
                            chess960,
                        );
                        w.iterate(&mut worker_pos);
                    })
                    .expect("failed to spawn search thread");
                handles.push(handle);
            }

            let mut main_pos = pos.clone();
            main_pos.reset_eval();
            let chess960 = main_pos.is_chess960();
            let mut w = Worker::new(
                0,
                &mut main_td[0].history,
                root_moves,
                tm,
                &shared_nodes,
                &shared_seldepth,
                max_depth,
                info_strings,
                chess960,
            );
            let report = w.iterate(&mut main_pos);

            tm.stop();
            for h in handles {
                let _ = h.join();
            }
            report
        });

        report
    }
}

impl Default for Search {
    fn default() -> Self {
        Search::new()
    }
}

struct Worker<'a> {
    id: usize,
    ply: i32,
    root_depth: Depth,
    sel_depth: i32,
    nodes: u64,
    root_delta: Value,
    nmp_min_ply: i32,
    best_move: Move,
    score: Value,
    completed_depth: Depth,
    aborted: bool,
    excluded: Vec<Move>,
    pv: PvTable,
    root_moves: Vec<RootMove>,
    history: &'a mut History,
    tm: &'a TimeManager,
    shared_nodes: &'a [AtomicU64],
    shared_seldepth: &'a [AtomicI32],
    max_depth: Depth,
    info_strings: bool,
    chess960: bool,
}

impl<'a> Worker<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: usize,
        history: &'a mut History,
        root_moves: Vec<RootMove>,
        tm: &'a TimeManager,
        shared_nodes: &'a [AtomicU64],
        shared_seldepth: &'a [AtomicI32],
        max_depth: Depth,
        info_strings: bool,
        chess960: bool,
    ) -> Worker<'a> {
        Worker {
            id,
            ply: 0,
            root_depth: 0,
            sel_depth: 0,
            nodes: 0,
            root_delta: 2 * VALUE_INFINITE,
            nmp_min_ply: 0,
            best_move: Move::NONE,
            score: -VALUE_INFINITE,
            completed_depth: 0,
            aborted: false,
            excluded: vec![Move::NONE; MAX_PLY as usize + 1],
            pv: PvTable::new(),
            root_moves,
            history,
            tm,
            shared_nodes,
            shared_seldepth,
            max_depth,
            info_strings,
            chess960,
        }
    }

    fn is_main(&self) -> bool {
        self.id == 0
    }

    fn total_nodes(&self) -> u64 {
        self.shared_nodes
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .sum()
    }

    fn max_seldepth(&self) -> i32 {
        self.shared_seldepth
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }

    fn publish_counters(&self) {
        self.shared_nodes[self.id].store(self.nodes, Ordering::Relaxed);
        self.shared_seldepth[self.id].store(self.sel_depth, Ordering::Relaxed);
    }

    // Cooperative stop check, once every 1024 visited nodes. Only the main
    // worker consults the clock; everyone observes the shared flag.
    fn poll_stop(&mut self) -> bool {
        if self.tm.is_stopped() {
            self.aborted = true;
            return true;
        }
        if self.nodes % 1024 == 0 {
            self.publish_counters();
            if self.is_main() && !self.tm.can_continue(self.total_nodes()) {
                self.tm.stop();
                self.aborted = true;
                return true;
            }
        }
        false
    }

    // Iterative deepening with aspiration windows around the rolling
    // average of the best root move's score.
    fn iterate(&mut self, pos: &mut Position) -> SearchReport {
        // Always have a legal answer ready, even if the very first
        // iteration gets aborted.
        self.best_move = self.root_moves[0].m;

        for depth in 1..=self.max_depth {
            self.root_depth = depth;
            self.sel_depth = 0;
            self.pv.reset();

            let average = self.root_moves[0].average;
            let mut delta = VALUE_INFINITE;
            let mut alpha = -VALUE_INFINITE;
            let mut beta = VALUE_INFINITE;
            if depth >= 4 && average != -VALUE_INFINITE {
                delta = 20 + average * average / 10000;
                alpha = std::cmp::max(average - delta, -VALUE_INFINITE);
                beta = std::cmp::min(average + delta, VALUE_INFINITE);
            }

            let mut failed_high = 0;

            loop {
                let adjusted = std::cmp::max(1, depth - failed_high);
                self.root_delta = std::cmp::max(beta - alpha, 1);
                let score = self.alphabeta(pos, alpha, beta, adjusted);

                if self.aborted {
                    break;
                }

                if score <= alpha {
                    beta = (alpha + beta) / 2;
                    alpha = std::cmp::max(score - delta, -VALUE_INFINITE);
                    failed_high = 0;
                    if self.is_main() && self.info_strings && self.tm.elapsed() > 3000 {
                        self.print_info(score, Bound::UPPER);
                    }
                } else if score >= beta {
                    beta = std::cmp::min(score + delta, VALUE_INFINITE);
                    failed_high += 1;
                    if self.is_main() && self.info_strings && self.tm.elapsed() > 3000 {
                        self.print_info(score, Bound::LOWER);
                    }
                } else {
                    self.score = score;
                    break;
                }

                delta += delta / 4 + 5;
            }

            if self.aborted {
                break;
            }

            self.completed_depth = depth;
            self.publish_counters();

            if self.is_main() && self.info_strings {
                self.print_info(self.score, Bound::NONE);
            }

            if self.is_main() && !self.tm.can_start_iteration(self.total_nodes()) {
                self.tm.stop();
                break;
            }
        }

        self.publish_counters();

        SearchReport {
            best_move: self.best_move,
            score: self.score,
            depth: self.completed_depth,
            nodes: self.total_nodes(),
        }
    }

    fn print_info(&self, score: Value, bound: Bound) {
        let elapsed = self.tm.elapsed();
        let nodes = self.total_nodes();
        let nps = nodes * 1000 / (elapsed + 1);
        let seldepth = std::cmp::max(self.sel_depth, self.max_seldepth());

        print!(
            "info depth {} seldepth {} score {}",
            self.root_depth,
            seldepth,
            uci::value(score)
        );
        if bound == Bound::LOWER {
            print!(" lowerbound");
        } else if bound == Bound::UPPER {
            print!(" upperbound");
        }
        print!(
            " nodes {} nps {} time {} hashfull {}",
            nodes,
            nps,
            elapsed,
            tt::hashfull()
        );

        print!(" pv");
        let line = self.pv.line();
        if line.is_empty() {
            print!(" {}", uci::move_str(self.best_move, self.chess960));
        } else {
            for &m in line {
                print!(" {}", uci::move_str(m, self.chess960));
            }
        }
        println!();
        let _ = std::io::stdout().flush();
    }

    fn alphabeta(&mut self, pos: &mut Position, mut alpha: Value, mut beta: Value, mut depth: Depth) -> Value {
        let pv_node = beta - alpha != 1;
        let root = self.ply == 0;
        let us = pos.side();

        debug_assert!(-VALUE_INFINITE <= alpha && alpha < beta && beta <= VALUE_INFINITE);
        debug_assert!(self.ply >= 0 && self.ply < MAX_PLY);

        if pv_node {
            self.pv.reset_ply(self.ply);
        }

        // Step 1: horizon and ply cap hand over to quiescence.
        if depth <= 0 || self.ply >= MAX_PLY - 1 {
            return self.qsearch(pos, alpha, beta);
        }

        // Step 2: periodic stop check; failing nodes return beta.
        if self.poll_stop() {
            return beta;
        }

        // Step 3.
        self.nodes += 1;
        if self.ply > self.sel_depth {
            self.sel_depth = self.ply;
        }

        let in_check = pos.checkers().any();
        let key = pos.key();
        let excluded = self.excluded[self.ply as usize];

        if !root {
            // Step 4: upcoming repetition can already secure a draw score.
            if alpha < VALUE_DRAW && pos.has_game_cycled(self.ply) {
                alpha = std::cmp::max(alpha, draw_value(self.nodes));
                if alpha >= beta {
                    return alpha;
                }
            }

            // Step 5: actual repetition or fifty-move draw.
            if pos.is_draw() {
                return draw_value(self.nodes);
            }

            // Step 6: mate distance pruning.
            alpha = std::cmp::max(mated_in(self.ply), alpha);
            beta = std::cmp::min(mate_in(self.ply + 1), beta);
            if alpha >= beta {
                return alpha;
            }
        }

        // Step 7: the grandchildren's killers are stale now.
        self.history.clear_killers_grandchildren(us, self.ply);

        // Step 8: transposition table probe.
        let tt_entry = tt::probe(key);
        let tt_hit = tt_entry.is_some();
        let mut tt_move = Move::NONE;
        let mut tt_score = VALUE_NONE;
        let mut tt_eval = VALUE_NONE;
        let mut tt_bound = Bound::NONE;
        let mut tt_depth = 0;
        let mut tt_pv = false;
        if let Some(e) = tt_entry {
            tt_move = e.mov;
            tt_score = value_from_tt(e.score, self.ply, pos.fifty_rule());
            tt_eval = e.eval;
            tt_bound = e.bound;
            tt_depth = e.depth;
            tt_pv = e.is_pv;
        }

        if !pv_node
            && excluded == Move::NONE
            && tt_hit
            && tt_depth >= depth
            && tt_score != VALUE_NONE
            && pos.fifty_rule() < 90
            && (if tt_score >= beta {
                tt_bound & Bound::LOWER != Bound::NONE
            } else {
                tt_bound & Bound::UPPER != Bound::NONE
            })
        {
            return tt_score;
        }

        // Step 9: static evaluation.
        let standpat;
        let mut eval;
        if in_check {
            standpat = -VALUE_MATE + self.ply;
            eval = standpat;
        } else {
            if tt_hit && tt_eval != VALUE_NONE && !is_extremity(tt_eval) {
                standpat = tt_eval;
            } else {
                standpat = pos.evaluate();
            }
            eval = standpat;

            // The TT score is a better bound on the position than the raw
            // evaluation when its bound agrees with the direction.
            if tt_score != VALUE_NONE
                && (if tt_score > standpat {
                    tt_bound & Bound::LOWER != Bound::NONE
                } else {
                    tt_bound & Bound::UPPER != Bound::NONE
                })
            {
                eval = tt_score;
            }
        }

        // Step 10.
        if !in_check {
            self.history.set_eval(us, self.ply, standpat);
        }
        let improving = !in_check && self.history.is_improving(us, self.ply, standpat);

        if !pv_node && !in_check && excluded == Move::NONE && !root {
            // Step 11: razoring.
            if eval < alpha - 500 - 300 * depth * depth {
                return self.qsearch(pos, alpha, beta);
            }

            // Step 12: futility pruning.
            if depth < 10
                && tt_move == Move::NONE
                && eval - 100 * depth >= beta
                && !is_extremity(eval)
                && !is_extremity(beta)
            {
                return beta + (eval - beta) / 3;
            }

            // Step 13: null move pruning with verification at high depth.
            if eval >= beta
                && beta > VALUE_LOSS_MAX_PLY
                && pos.plies_from_null() > 0
                && pos.non_pawn_material(us) > VALUE_ZERO
                && self.ply >= self.nmp_min_ply
            {
                let r = std::cmp::min((eval - beta) / 200, 6) + depth / 3 + 5;

                pos.do_null();
                self.ply += 1;
                let mut null_value = -self.alphabeta(pos, -beta, -beta + 1, depth - r);
                self.ply -= 1;
                pos.undo_null();

                if self.aborted {
                    return beta;
                }

                if null_value >= beta {
                    if is_win(null_value) {
                        null_value = beta;
                    }

                    if self.nmp_min_ply != 0 || depth < 14 {
                        return null_value;
                    }

                    // Verification search: forbid null moves in the upper
                    // part of the remaining tree and re-search. Failing high
                    // again confirms the cutoff; zugzwang does not.
                    self.nmp_min_ply = self.ply + 3 * (depth - r) / 4;
                    let v = self.alphabeta(pos, beta - 1, beta, depth - r);
                    self.nmp_min_ply = 0;

                    if v >= beta {
                        return null_value;
                    }
                }
            }
        }

        // Step 14: internal iterative reduction in PV nodes with no TT move.
        if pv_node && depth >= 4 && tt_move == Move::NONE {
            depth -= 2;
        }

        // Step 15: the move loop.
        let mut gen = Generator::new(pos, self.history, GenMode::PvSearch, tt_move, self.ply);

        let mut best_score = -VALUE_INFINITE;
        let mut best_move = Move::NONE;
        let mut move_cnt = 0;

        loop {
            let m = gen.next(pos, self.history);
            if m == Move::NONE {
                break;
            }

            if m == excluded {
                continue;
            }
            if !pos.is_legal(m) {
                continue;
            }

            move_cnt += 1;

            if root && self.is_main() && self.info_strings && self.tm.elapsed() > 3000 {
                println!(
                    "info depth {} currmove {} currmovenumber {}",
                    self.root_depth,
                    uci::move_str(m, pos.is_chess960()),
                    move_cnt
                );
                let _ = std::io::stdout().flush();
            }

            let is_capture = pos.is_capture(m);
            let hist_score = self.history.get_history(pos, m, self.ply);

            // Base reduction from the table, adjusted by how far the window
            // has drifted from the root's.
            let mut r = lmr(depth, move_cnt);
            r += (1.5 - (beta - alpha) as f64 / self.root_delta as f64).round() as i32;

            let mut new_depth = depth - 1;

            // Pre-move pruning, never at the root and never when already
            // lost anyway.
            if !root && pos.non_pawn_material(us) > VALUE_ZERO && best_score > VALUE_LOSS_MAX_PLY
            {
                // Move-count pruning: late enough quiets are not worth
                // generating, let alone searching.
                if move_cnt >= (3 + depth * depth) / (2 - improving as i32) {
                    gen.skip_quiets();
                }

                if is_capture {
                    let move_depth = std::cmp::max(new_depth - r, 0);
                    let cap = if m.move_type() == EN_PASSANT {
                        PAWN
                    } else {
                        pos.piece_on(m.to()).piece_type()
                    };
                    let cap_hist = self.history.get_capture(pos.piece_moved(m), m.to(), cap);
                    if move_depth < 7
                        && !pos.gives_check(m)
                        && standpat + 250 + 250 * move_depth + piece_value(cap) + cap_hist / 10
                            <= alpha
                    {
                        continue;
                    }
                }
            }

            // Singular extension: if every alternative fails well below the
            // TT score, the TT move is singular and gets extended. A very
            // strong exclusion result instead proves multiple refutations
            // (multicut); a weak one negatively extends the TT move.
            let mut extension = 0;
            if m == tt_move
                && !root
                && depth >= 8
                && excluded == Move::NONE
                && tt_score != VALUE_NONE
                && !is_extremity(tt_score)
                && tt_bound & Bound::LOWER != Bound::NONE
                && tt_depth >= depth - 3
            {
                let s_beta = tt_score - 2 * depth;
                self.excluded[self.ply as usize] = m;
                let value = self.alphabeta(pos, s_beta - 1, s_beta, (depth - 1) / 2);
                self.excluded[self.ply as usize] = Move::NONE;

                if self.aborted {
                    return beta;
                }

                if value < s_beta {
                    extension = 1 + (!pv_node) as i32;
                } else if value >= beta && !is_extremity(value) {
                    return value;
                } else if tt_score >= beta {
                    extension = -2 - (!pv_node) as i32;
                }
            }

            new_depth += extension;

            // Remaining reduction adjustments.
            r += std::cmp::min(2, (eval - alpha).abs() / 400);
            if self.history.is_killer(us, m, self.ply) {
                r -= 1;
            }
            if pv_node {
                r -= 2;
            }
            if improving {
                r -= 1;
            }
            if m == tt_move {
                r -= 1;
            }
            r -= hist_score / 10000;

            let reduced = (new_depth - r).clamp(1, new_depth + 1);

            pos.do_move(m);
            self.ply += 1;

            let mut score;
            let mut researched = false;
            if depth >= 2 && move_cnt > 1 {
                score = -self.alphabeta(pos, -alpha - 1, -alpha, reduced);

                if score > alpha && reduced < new_depth {
                    score = -self.alphabeta(pos, -alpha - 1, -alpha, new_depth);
                    researched = true;
                }
            } else {
                score = if !pv_node || move_cnt > 1 {
                    -self.alphabeta(pos, -alpha - 1, -alpha, new_depth)
                } else {
                    alpha + 1 // force the PV search below
                };
            }

            if pv_node && (move_cnt == 1 || score > alpha) {
                score = -self.alphabeta(pos, -beta, -alpha, new_depth);
            }

            self.ply -= 1;
            pos.undo_move(m);
            gen.add_searched(m);

            // A stopped search's scores cannot be trusted.
            if self.aborted || self.tm.is_stopped() {
                self.aborted = true;
                return beta;
            }

            // Tell the continuation history how a re-search after a failed
            // reduction went.
            if researched {
                let b = if score > best_score {
                    stat_bonus(new_depth)
                } else {
                    -stat_malus(new_depth)
                };
                self.history
                    .update_continuation(pos.piece_moved(m), m.to(), self.ply - 1, b);
            }

            debug_assert!(score > -VALUE_INFINITE && score < VALUE_INFINITE);

            if root {
                let rm = self
                    .root_moves
                    .iter_mut()
                    .find(|rm| rm.m == m)
                    .expect("root move list is fixed");
                rm.current = score;
                if move_cnt == 1 || score > alpha {
                    rm.average = if rm.average == -VALUE_INFINITE {
                        score
                    } else {
                        (2 * score + rm.average) / 3
                    };
                }
            }

            if score > best_score {
                best_score = score;

                if score > alpha {
                    best_move = m;

                    if root {
                        self.best_move = m;
                        // Keep the best root move in front for the next
                        // iteration's ordering.
                        if let Some(i) = self.root_moves.iter().position(|rm| rm.m == m) {
                            self.root_moves[..=i].rotate_right(1);
                        }
                    }

                    if pv_node {
                        self.pv.update(m, self.ply);
                    }

                    if score >= beta {
                        if excluded == Move::NONE {
                            tt::save(
                                key,
                                depth,
                                value_to_tt(score, self.ply),
                                if in_check { VALUE_NONE } else { standpat },
                                m,
                                Bound::LOWER,
                                pv_node || tt_pv,
                            );
                        }
                        self.update_histories(pos, &gen, m, depth, in_check);
                        return score;
                    }

                    alpha = score;
                }
            }
        }

        // Step 16: no legal moves is mate or stalemate, or a fail low in an
        // exclusion search.
        if move_cnt == 0 {
            return if excluded != Move::NONE {
                alpha
            } else if in_check {
                mated_in(self.ply)
            } else {
                VALUE_DRAW
            };
        }

        if excluded == Move::NONE {
            let bound = if best_move != Move::NONE && pv_node {
                Bound::EXACT
            } else {
                Bound::UPPER
            };
            tt::save(
                key,
                depth,
                value_to_tt(best_score, self.ply),
                if in_check { VALUE_NONE } else { standpat },
                best_move,
                bound,
                pv_node || tt_pv,
            );
        }

        debug_assert!(best_score > -VALUE_INFINITE && best_score < VALUE_INFINITE);
        best_score
    }

    fn qsearch(&mut self, pos: &mut Position, mut alpha: Value, beta: Value) -> Value {
        let pv_node = beta - alpha != 1;

        if self.poll_stop() {
            return beta;
        }
        self.nodes += 1;

        if pos.is_draw() {
            return draw_value(self.nodes);
        }

        let in_check = pos.checkers().any();

        if self.ply >= MAX_PLY - 1 {
            return if in_check { VALUE_DRAW } else { pos.evaluate() };
        }

        let key = pos.key();
        let tt_gate: Depth = in_check as Depth;

        let tt_entry = tt::probe(key);
        let mut tt_move = Move::NONE;
        let mut tt_score = VALUE_NONE;
        let mut tt_eval = VALUE_NONE;
        let mut tt_bound = Bound::NONE;
        let mut tt_pv = false;
        if let Some(e) = tt_entry {
            tt_move = e.mov;
            tt_score = value_from_tt(e.score, self.ply, pos.fifty_rule());
            tt_eval = e.eval;
            tt_bound = e.bound;
            tt_pv = e.is_pv;

            if !pv_node
                && e.depth >= tt_gate
                && tt_score != VALUE_NONE
                && (if tt_score >= beta {
                    tt_bound & Bound::LOWER != Bound::NONE
                } else {
                    tt_bound & Bound::UPPER != Bound::NONE
                })
            {
                return tt_score;
            }
        }

        let mut best_score;
        let standpat;

        if in_check {
            standpat = -VALUE_MATE + self.ply;
            best_score = -VALUE_INFINITE;
        } else {
            if tt_eval != VALUE_NONE && !is_extremity(tt_eval) {
                standpat = tt_eval;
            } else {
                standpat = pos.evaluate();
            }
            best_score = standpat;

            if tt_score != VALUE_NONE
                && (if tt_score > standpat {
                    tt_bound & Bound::LOWER != Bound::NONE
                } else {
                    tt_bound & Bound::UPPER != Bound::NONE
                })
            {
                best_score = tt_score;
            }

            // Stand pat.
            if best_score >= beta {
                if tt_entry.is_none() {
                    tt::save(
                        key,
                        tt_gate,
                        value_to_tt(best_score, self.ply),
                        standpat,
                        Move::NONE,
                        Bound::LOWER,
                        false,
                    );
                }
                return best_score;
            }
            if best_score > alpha {
                alpha = best_score;
            }
        }

        let mode = if in_check {
            GenMode::QsearchCheck
        } else {
            GenMode::Qsearch
        };
        let mut gen = Generator::new(pos, self.history, mode, tt_move, self.ply);

        let mut best_move = Move::NONE;
        let mut move_cnt = 0;

        loop {
            let m = gen.next(pos, self.history);
            if m == Move::NONE {
                break;
            }
            if !pos.is_legal(m) {
                continue;
            }

            move_cnt += 1;

            if best_score > VALUE_LOSS_MAX_PLY {
                // Beyond the first couple of moves the position has had its
                // chances.
                if move_cnt > 2 {
                    break;
                }

                if !in_check && pos.is_capture(m) {
                    let cap = if m.move_type() == EN_PASSANT {
                        PAWN
                    } else {
                        pos.piece_on(m.to()).piece_type()
                    };

                    // Futility: even winning the piece cannot reach alpha.
                    if alpha >= standpat + piece_value(cap) + 400 {
                        continue;
                    }

                    let see = pos.see(m);
                    if see <= alpha - standpat - 400 {
                        continue;
                    }
                    if see < -50 {
                        continue;
                    }
                } else if !in_check && pos.see(m) < -50 {
                    continue;
                }

                // Quiet evasions with a cold continuation history rarely
                // save the day.
                if in_check
                    && pos.is_quiet(m)
                    && self
                        .history
                        .get_continuation(pos.piece_moved(m), m.to(), self.ply - 1)
                        <= 2000
                {
                    continue;
                }
            }

            pos.do_move(m);
            self.ply += 1;
            let score = -self.qsearch(pos, -beta, -alpha);
            self.ply -= 1;
            pos.undo_move(m);

            if self.aborted || self.tm.is_stopped() {
                self.aborted = true;
                return beta;
            }

            if score > best_score {
                best_score = score;
                if score > alpha {
                    best_move = m;
                    if score >= beta {
                        break;
                    }
                    alpha = score;
                }
            }
        }

        if in_check && best_score == -VALUE_INFINITE {
            debug_assert!(move_cnt == 0);
            return mated_in(self.ply);
        }

        tt::save(
            key,
            tt_gate,
            value_to_tt(best_score, self.ply),
            if in_check { VALUE_NONE } else { standpat },
            best_move,
            if best_score >= beta { Bound::LOWER } else { Bound::UPPER },
            tt_pv,
        );

        debug_assert!(best_score > -VALUE_INFINITE && best_score < VALUE_INFINITE);
        best_score
    }

    // History updates after a beta cutoff. The best move gets the bonus, the
    // other tried moves of the same class get the malus; quiet cutoffs also
    // refresh the killer slot and the continuation plies.
    fn update_histories(
        &mut self,
        pos: &Position,
        gen: &Generator,
        best: Move,
        depth: Depth,
        in_check: bool,
    ) {
        let bonus = stat_bonus(depth);
        let malus = stat_malus(depth);
        let us = pos.side();

        let captured_type = |m: Move| {
            if m.move_type() == EN_PASSANT {
                PAWN
            } else {
                pos.piece_on(m.to()).piece_type()
            }
        };

        if pos.is_capture(best) {
            self.history
                .update_capture(pos.piece_moved(best), best.to(), captured_type(best), bonus);

            for &m in gen.searched() {
                if m != best && pos.is_capture(m) {
                    self.history.update_capture(
                        pos.piece_moved(m),
                        m.to(),
                        captured_type(m),
                        -malus,
                    );
                }
            }
        } else {
            self.history.set_killer(us, best, self.ply);
            self.history.update_butterfly(us, best, bonus);
            self.update_continuations(pos.piece_moved(best), best.to(), bonus, in_check);

            for &m in gen.searched() {
                if m != best && pos.is_quiet(m) {
                    self.history.update_butterfly(us, m, -malus);
                    self.update_continuations(pos.piece_moved(m), m.to(), -malus, in_check);
                }
            }
        }
    }

    fn update_continuations(&mut self, pc: Piece, to: Square, bonus: Value, in_check: bool) {
        for off in [1, 2, 3, 4, 6] {
            if in_check && off > 2 {
                break;
            }
            self.history.update_continuation(pc, to, self.ply - off, bonus);
        }
    }
}

// perft() verifies move generation: all leaf nodes up to the given depth are
// counted. The depth-2 frontier is counted with a plain legal-list size.
pub fn perft(pos: &mut Position, depth: Depth) -> u64 {
    if depth <= 0 {
        return 1;
    }

    let leaf = depth == 2;
    let mut nodes = 0;
    let mut gen = Generator::perft(pos);

    loop {
        let m = gen.next_legal();
        if m == Move::NONE {
            break;
        }
        if depth == 1 {
            nodes += 1;
            continue;
        }
        pos.do_move(m);
        nodes += if leaf {
            Generator::perft(pos).legal_count() as u64
        } else {
            perft(pos, depth - 1)
        };
        pos.undo_move(m);
    }
    nodes
}

// Root-split perft printing per-move counts, for the `go perft` command.
pub fn perft_divide(pos: &mut Position, depth: Depth) -> u64 {
    let mut total = 0;
    let mut gen = Generator::perft(pos);

    loop {
        let m = gen.next_legal();
        if m == Move::NONE {
            break;
        }
        pos.do_move(m);
        let cnt = perft(pos, depth - 1);
        pos.undo_move(m);
        total += cnt;
        println!("{}: {}", uci::move_str(m, pos.is_chess960()), cnt);
    }

    println!("\nNodes searched: {}", total);
    let _ = std::io::stdout().flush();
    total
}
