// src/bin/minish.rs

use std::env;
use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use minish::cli::Cli;
use minish::constants::PATH_VAR;
use minish::repl::Repl;

fn main() {
    env_logger::init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Capture the search path and the environment once: every later resolve
    // and launch uses these snapshots instead of re-reading process globals.
    let raw_search_path = match cli.search_path {
        Some(path) => path,
        None => env::var(PATH_VAR).with_context(|| {
            format!("{PATH_VAR} is not set and --search-path was not given")
        })?,
    };
    let env_snapshot: Vec<_> = env::vars_os().collect();

    let mut repl = Repl::new(raw_search_path, env_snapshot);
    match cli.command {
        Some(line) => {
            repl.run_line(&line);
            repl.poll_background();
            Ok(())
        }
        None => repl.run(io::stdin().lock()),
    }
}
