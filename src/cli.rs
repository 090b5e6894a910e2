// src/cli.rs

use clap::Parser;

/// A minimal interactive shell: resolves a command against the search path,
/// verifies it is safe to run, and launches it in the foreground or (with a
/// trailing `&`) as the single tracked background job.
#[derive(Parser, Debug)]
#[command(name = "minish", version, about)]
pub struct Cli {
    /// Override the executable search path (defaults to the inherited PATH).
    #[arg(long, value_name = "DIRS")]
    pub search_path: Option<String>,

    /// Run a single command line and exit instead of reading from stdin.
    /// A background marker in this mode leaves the job to the OS.
    #[arg(short = 'c', long, value_name = "LINE")]
    pub command: Option<String>,
}
