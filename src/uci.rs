// SPDX-License-Identifier: GPL-3.0-or-later

use crate::benchmark;
use crate::misc;
use crate::movegen::Generator;
use crate::nnue;
use crate::position::{Position, START_FEN};
use crate::search::{self, Search};
use crate::timeman::TimeManager;
use crate::tt;
use crate::types::*;

use anyhow::Result;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

// value() renders a score for the UCI protocol: centipawns, or moves to
// mate (negative when we are the one getting mated).
pub fn value(v: Value) -> String {
    if v.abs() >= VALUE_MATE_IN_MAX_PLY {
        let moves = (VALUE_MATE - v.abs() + 1) / 2;
        format!("mate {}", if v > 0 { moves } else { -moves })
    } else {
        format!("cp {}", v)
    }
}

// move_str() renders a move in long algebraic notation. Castling is encoded
// internally as king-captures-rook; outside Chess960 it is printed as the
// king landing on the g- or c-file.
pub fn move_str(m: Move, chess960: bool) -> String {
    if m == Move::NONE {
        return String::from("(none)");
    }
    if m == Move::NULL {
        return String::from("0000");
    }

    let from = m.from();
    let mut to = m.to();

    if m.move_type() == CASTLING && !chess960 {
        to = Square::make(if to > from { FILE_G } else { FILE_C }, from.rank());
    }

    let mut s = format!("{}{}", from, to);
    if m.move_type() == PROMOTION {
        s.push(
            [' ', ' ', 'n', 'b', 'r', 'q'][m.promotion_type().0 as usize],
        );
    }
    s
}

// to_move() resolves a move string against the legal moves of the position.
pub fn to_move(pos: &Position, s: &str) -> Move {
    let lowered = s.to_ascii_lowercase();
    let mut gen = Generator::perft(pos);
    loop {
        let m = gen.next_legal();
        if m == Move::NONE {
            return Move::NONE;
        }
        if lowered == move_str(m, pos.is_chess960()) {
            return m;
        }
    }
}

pub struct Uci {
    pos: Position,
    searcher: Option<Search>,
    tm: Arc<TimeManager>,
    handle: Option<JoinHandle<Search>>,
    chess960: bool,
    move_overhead: u64,
}

impl Uci {
    pub fn new() -> Uci {
        tt::resize(16);
        Uci {
            pos: Position::startpos(),
            searcher: Some(Search::new()),
            tm: Arc::new(TimeManager::new()),
            handle: None,
            chess960: false,
            move_overhead: 0,
        }
    }

    // Process commands from stdin until quit or EOF.
    pub fn cmd_loop(&mut self) {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if !self.parse(line.trim()) {
                break;
            }
        }
        self.stop_search();
    }

    // Returns false when the loop should exit.
    pub fn parse(&mut self, cmd: &str) -> bool {
        let (token, args) = match cmd.find(char::is_whitespace) {
            Some(i) => (&cmd[..i], cmd[i..].trim()),
            None => (cmd, ""),
        };

        match token {
            "uci" => {
                println!("id name {}", misc::engine_info(true));
                println!("option name Hash type spin default 16 min 1 max 1048576");
                println!(
                    "option name Threads type spin default 1 min 1 max {}",
                    std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1)
                );
                println!("option name MoveOverhead type spin default 0 min 0 max 1000");
                println!("option name EvalFile type string default vela.nnue");
                println!("option name UCI_Chess960 type check default false");
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "setoption" => {
                if let Err(e) = self.setoption(args) {
                    log::warn!("setoption: {:#}", e);
                }
            }
            "position" => {
                self.stop_search();
                if let Err(e) = self.position(args) {
                    log::warn!("position: {:#}", e);
                }
            }
            "go" => self.go(args),
            "stop" => self.stop_search(),
            "ucinewgame" => {
                self.stop_search();
                tt::clear();
                if let Some(s) = self.searcher.as_mut() {
                    s.clear();
                }
            }
            "bench" => {
                self.stop_search();
                let depth = args
                    .split_whitespace()
                    .next()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(benchmark::BENCH_DEPTH);
                benchmark::run(depth);
            }
            "d" => println!("{}", self.pos),
            "eval" => println!("{}", self.pos.evaluate()),
            "quit" | "exit" => return false,
            "" => {}
            _ => println!("Unknown command: {}", cmd),
        }
        true
    }

    fn setoption(&mut self, args: &str) -> Result<()> {
        let name_idx = args.find("name").map(|i| i + 4);
        let value_idx = args.find("value");

        let name = match (name_idx, value_idx) {
            (Some(n), Some(v)) => args[n..v].trim(),
            (Some(n), None) => args[n..].trim(),
            _ => return Ok(()),
        };
        let val = value_idx.map(|v| args[v + 5..].trim()).unwrap_or("");

        match name {
            "Hash" => {
                self.stop_search();
                let mb: usize = val.parse().unwrap_or(16);
                tt::resize(mb.clamp(1, 1 << 20));
            }
            "Threads" => {
                self.stop_search();
                let n: usize = val.parse().unwrap_or(1);
                if let Some(s) = self.searcher.as_mut() {
                    s.set_threads(n);
                }
            }
            "MoveOverhead" => {
                self.move_overhead = val.parse().unwrap_or(0);
            }
            "EvalFile" => {
                self.stop_search();
                nnue::load_file(Path::new(val))?;
                self.pos.reset_eval();
                log::info!("loaded network from {}", val);
            }
            "UCI_Chess960" => {
                self.chess960 = val == "true";
            }
            _ => log::debug!("ignoring unknown option '{}'", name),
        }
        Ok(())
    }

    fn position(&mut self, args: &str) -> Result<()> {
        let moves_idx = args.find("moves");
        let head = args[..moves_idx.unwrap_or(args.len())].trim();

        if head.starts_with("startpos") {
            self.pos = Position::from_fen(START_FEN, false)?;
        } else if let Some(fen) = head.strip_prefix("fen") {
            self.pos = Position::from_fen(fen.trim(), self.chess960)?;
        } else {
            return Ok(());
        }

        if let Some(idx) = moves_idx {
            for token in args[idx + 5..].split_whitespace() {
                let m = to_move(&self.pos, token);
                // A malformed move stops processing; the position stays at
                // the last valid move.
                if m == Move::NONE {
                    break;
                }
                self.pos.do_move(m);
            }
        }
        Ok(())
    }

    fn go(&mut self, args: &str) {
        self.stop_search();

        let mut tm = TimeManager::new();
        tm.reset();
        tm.set_move_overhead(self.move_overhead);

        let mut wtime = 0u64;
        let mut btime = 0u64;
        let mut winc = 0u64;
        let mut binc = 0u64;
        let mut movestogo = 0i32;
        let mut perft_depth: Depth = 0;

        let mut iter = args.split_whitespace();
        while let Some(token) = iter.next() {
            let mut next_u64 = || iter.next().and_then(|t| t.parse::<u64>().ok()).unwrap_or(0);
            match token {
                "wtime" => wtime = next_u64(),
                "btime" => btime = next_u64(),
                "winc" => winc = next_u64(),
                "binc" => binc = next_u64(),
                "movestogo" => movestogo = next_u64() as i32,
                "depth" => tm.set_depth_limit(next_u64() as Depth),
                "nodes" => tm.set_node_limit(next_u64()),
                "movetime" => tm.set_move_time_limit(next_u64()),
                "perft" => perft_depth = next_u64() as Depth,
                "infinite" => {}
                _ => {}
            }
        }

        if perft_depth > 0 {
            let mut pos = self.pos.clone();
            search::perft_divide(&mut pos, perft_depth);
            return;
        }

        if wtime != 0 || btime != 0 || winc != 0 || binc != 0 || movestogo != 0 {
            let (time, inc) = if self.pos.side() == WHITE {
                (wtime, winc)
            } else {
                (btime, binc)
            };
            tm.set_time_limit(time, inc, movestogo, self.pos.game_ply());
        }

        self.tm = Arc::new(tm);

        let tm = self.tm.clone();
        let pos = self.pos.clone();
        let mut searcher = self.searcher.take().expect("searcher is parked between searches");
        let chess960 = self.pos.is_chess960();

        self.handle = Some(
            std::thread::Builder::new()
                .stack_size(16 * 1024 * 1024)
                .spawn(move || {
                    let report = searcher.search(&pos, &tm);
                    println!("bestmove {}", move_str(report.best_move, chess960));
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                    searcher
                })
                .expect("failed to spawn search thread"),
        );
    }

    fn stop_search(&mut self) {
        self.tm.stop();
        if let Some(handle) = self.handle.take() {
            if let Ok(searcher) = handle.join() {
                self.searcher = Some(searcher);
            }
        }
        if self.searcher.is_none() {
            self.searcher = Some(Search::new());
        }
    }
}

impl Default for Uci {
    fn default() -> Self {
        Uci::new()
    }
}
