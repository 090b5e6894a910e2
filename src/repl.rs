// src/repl.rs

use std::ffi::OsString;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use colored::Colorize;
use log::debug;

use crate::constants::PROMPT;
use crate::core::resolver;
use crate::core::search_path::SearchPath;
use crate::core::tokenizer;
use crate::system::jobs::{BackgroundSlot, PollOutcome};
use crate::system::process::{LaunchMode, LaunchOutcome, ProcessHandle};

/// The control loop.
///
/// The raw search path and the environment are captured once at construction
/// and threaded through every resolve/launch; nothing below this layer reads
/// ambient process globals. Every failure underneath the loop is recovered
/// and reported here; none of them terminate the shell.
#[derive(Debug)]
pub struct Repl {
    raw_search_path: String,
    env: Vec<(OsString, OsString)>,
    slot: BackgroundSlot,
}

impl Repl {
    /// Builds a loop over a search-path string and an environment snapshot.
    pub fn new(raw_search_path: String, env: Vec<(OsString, OsString)>) -> Self {
        Self {
            raw_search_path,
            env,
            slot: BackgroundSlot::new(),
        }
    }

    /// Reads command lines from `input` until end-of-file, launching each one
    /// and polling the background slot once per iteration.
    ///
    /// Only the prompt/read plumbing can fail here; command failures are
    /// reported to stderr and the loop continues.
    pub fn run(&mut self, input: impl BufRead) -> Result<()> {
        let mut lines = input.lines();
        loop {
            print!("{PROMPT}");
            io::stdout().flush().context("failed to flush the prompt")?;

            let Some(line) = lines.next() else {
                break; // EOF ends the session.
            };
            let line = line.context("failed to read a command line")?;

            self.run_line(&line);
            self.poll_background();
        }
        Ok(())
    }

    /// Tokenizes, resolves and launches a single command line.
    pub fn run_line(&mut self, line: &str) {
        let Some(tokenized) = tokenizer::tokenize(line) else {
            return;
        };
        let Some(program) = tokenized.args.first() else {
            return;
        };

        let search_path = SearchPath::new(&self.raw_search_path);
        let resolved = match resolver::resolve(program, search_path) {
            Ok(resolved) => resolved,
            Err(e) => {
                report(&e);
                return;
            }
        };
        debug!("'{}' resolved to '{}'", program, resolved.full_path().display());

        let mut handle = ProcessHandle::new(resolved, tokenized.args, self.env.clone());
        if tokenized.background {
            self.launch_background(handle);
        } else {
            match handle.launch(LaunchMode::Sync) {
                Ok(LaunchOutcome::Completed(status)) => {
                    debug!("'{}' completed: {}", handle.name(), status);
                }
                Ok(LaunchOutcome::Running { .. }) => unreachable!("sync launch cannot stay running"),
                Err(e) => report(&e),
            }
        }
    }

    /// Launches a command into the background slot.
    ///
    /// The slot is checked *before* spawning: refusing afterwards would leave
    /// a live child that nothing tracks or reaps.
    fn launch_background(&mut self, mut handle: ProcessHandle) {
        if let Some(pid) = self.slot.occupant_pid() {
            eprintln!(
                "{}: a background job is already running (pid {}); not launching '{}'",
                "minish".red().bold(),
                pid,
                handle.name()
            );
            return;
        }
        match handle.launch(LaunchMode::Async) {
            Ok(LaunchOutcome::Running { pid }) => {
                eprintln!("(child pid: {pid})");
                if let Err(e) = self.slot.assign(handle) {
                    // Unreachable in practice: the slot was checked above and
                    // nothing else assigns between the check and here.
                    report(&e);
                }
            }
            Ok(LaunchOutcome::Completed(_)) => unreachable!("async launch cannot block"),
            Err(e) => report(&e),
        }
    }

    /// One non-blocking check of the background slot, announcing a reap.
    pub fn poll_background(&mut self) {
        match self.slot.poll() {
            PollOutcome::Reaped { pid, status } => {
                eprintln!("(child {pid} exited: {status})");
            }
            PollOutcome::StillRunning | PollOutcome::Empty => {}
        }
    }
}

fn report(error: &dyn std::error::Error) {
    eprintln!("{}: {}", "minish".red().bold(), error);
}
