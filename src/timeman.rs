// SPDX-License-Identifier: GPL-3.0-or-later

use crate::types::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Clone, Copy, Default)]
pub struct Limit {
    pub enabled: bool,
    pub max: u64,
}

#[derive(Clone, Copy, Default)]
pub struct TimeLimit {
    pub enabled: bool,
    pub max: u64,
    pub optimal: u64,
}

// Per-search budgets plus the cooperative stop flag. Depth, node and move
// time limits are hard caps taken verbatim from the go command; the clock
// limits are turned into an optimal and a maximum budget. The searcher polls
// can_continue() every 1024 nodes and between iterations.
pub struct TimeManager {
    pub depth_limit: Limit,
    pub node_limit: Limit,
    pub move_time_limit: Limit,
    pub time_limit: TimeLimit,
    move_overhead: u64,
    force_stop: AtomicBool,
    start: Instant,
}

impl TimeManager {
    pub fn new() -> TimeManager {
        TimeManager {
            depth_limit: Limit::default(),
            node_limit: Limit::default(),
            move_time_limit: Limit::default(),
            time_limit: TimeLimit::default(),
            move_overhead: 0,
            force_stop: AtomicBool::new(false),
            start: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.force_stop.store(false, Ordering::Relaxed);
        self.depth_limit = Limit::default();
        self.node_limit = Limit::default();
        self.move_time_limit = Limit::default();
        self.time_limit = TimeLimit::default();
    }

    pub fn elapsed(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn set_move_overhead(&mut self, ms: u64) {
        self.move_overhead = ms;
    }

    pub fn set_depth_limit(&mut self, d: Depth) {
        self.depth_limit = Limit {
            enabled: true,
            max: d.max(1) as u64,
        };
    }

    pub fn set_node_limit(&mut self, nodes: u64) {
        self.node_limit = Limit {
            enabled: true,
            max: nodes,
        };
    }

    pub fn set_move_time_limit(&mut self, ms: u64) {
        self.move_time_limit = Limit {
            enabled: true,
            max: ms,
        };
    }

    // Turn the clock situation into an optimal and a maximum budget for this
    // move. With movestogo the remaining time is spread over the horizon;
    // without it the scales are extrapolated from the logarithm of the time
    // left and the game ply.
    pub fn set_time_limit(&mut self, time: u64, inc: u64, moves_left: i32, ply: i32) {
        let overhead = if inc == 0 {
            10 + self.move_overhead
        } else {
            self.move_overhead
        };

        let mut mtg: i32 = if moves_left != 0 {
            moves_left.min(50)
        } else {
            50
        };

        // With almost no time and no increment, plan for fewer moves.
        if time < 1000 && inc == 0 {
            mtg = (time / 20) as i32;
        }
        mtg = mtg.max(1);

        let time_left = (time as i64 + inc as i64 * mtg as i64 - overhead as i64 * mtg as i64)
            .max(1) as f64;

        let (optimal_scale, max_scale): (f64, f64);
        if moves_left == 0 {
            let log_time = (time_left / 1000.0).log10();
            let optimal = (0.003 + 0.0005 * log_time).min(0.005);
            let max = (3.5 + 3.0 * log_time).max(2.9);

            optimal_scale = (0.01 + (ply as f64).sqrt() * optimal)
                .min(0.2 * time as f64 / time_left);
            max_scale = 6.0f64.min(max + ply as f64 / 10.0);
        } else {
            optimal_scale =
                (ply as f64 / 500.0 + 0.5 / mtg as f64).min(0.9 * time as f64 / time_left);
            max_scale = 6.0f64.min(1.5 + 0.1 * mtg as f64);
        }

        let optimal_time = (time_left * optimal_scale) as u64;
        let max_time = ((0.7 * time as f64 - overhead as f64).max(1.0) as u64)
            .min((max_scale * optimal_time as f64) as u64)
            .max(1);

        self.time_limit = TimeLimit {
            enabled: true,
            max: max_time,
            optimal: optimal_time.max(1),
        };
    }

    pub fn stop(&self) {
        self.force_stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.force_stop.load(Ordering::Relaxed)
    }

    // Hard ceiling, polled during search. Node counts come from the polling
    // thread.
    pub fn can_continue(&self, nodes: u64) -> bool {
        if self.is_stopped() {
            return false;
        }
        if self.move_time_limit.enabled && self.elapsed() >= self.move_time_limit.max {
            return false;
        }
        if self.node_limit.enabled && nodes >= self.node_limit.max {
            return false;
        }
        if self.time_limit.enabled && self.elapsed() >= self.time_limit.max {
            return false;
        }
        true
    }

    // Whether starting another iteration is worth it: past the optimal
    // budget the next depth will rarely finish.
    pub fn can_start_iteration(&self, nodes: u64) -> bool {
        if !self.can_continue(nodes) {
            return false;
        }
        if self.time_limit.enabled && self.elapsed() >= self.time_limit.optimal {
            return false;
        }
        true
    }
}

impl Default for TimeManager {
    fn default() -> Self {
        TimeManager::new()
    }
}
