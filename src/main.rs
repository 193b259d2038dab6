// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vela::benchmark;
use vela::misc;
use vela::nnue;
use vela::position::{Position, START_FEN};
use vela::search;
use vela::tt;
use vela::uci::Uci;

#[derive(Parser)]
#[command(name = "vela", version, about = "UCI chess engine")]
struct Cli {
    /// NNUE network file to load at startup
    #[arg(long)]
    eval_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Search the fixed 50-position suite and report total nodes
    Bench {
        #[arg(default_value_t = benchmark::BENCH_DEPTH)]
        depth: i32,
    },
    /// Count leaf nodes of the move generator to the given depth
    Perft {
        depth: i32,
        fen: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    vela::init();

    let cli = Cli::parse();

    // The evaluator runs on zero weights until a network is installed. An
    // explicitly requested file that fails to load is fatal.
    match &cli.eval_file {
        Some(path) => nnue::load_file(path)?,
        None => {
            let default = PathBuf::from("vela.nnue");
            if default.exists() {
                nnue::load_file(&default)?;
            } else {
                log::warn!("no network file found, evaluating with zero weights");
            }
        }
    }

    match cli.command {
        Some(Command::Bench { depth }) => {
            tt::resize(16);
            benchmark::run(depth);
        }
        Some(Command::Perft { depth, fen }) => {
            let fen = fen.unwrap_or_else(|| String::from(START_FEN));
            let mut pos = Position::from_fen(&fen, false).context("bad FEN")?;
            search::perft_divide(&mut pos, depth.max(1));
        }
        None => {
            println!("{}", misc::engine_info(false));
            Uci::new().cmd_loop();
        }
    }

    Ok(())
}
