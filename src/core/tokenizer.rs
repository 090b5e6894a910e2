// src/core/tokenizer.rs

use crate::constants::BACKGROUND_MARKER;

/// The result of splitting one raw command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenized {
    /// Argument vector; the program name is `args[0]`.
    pub args: Vec<String>,
    /// True when the line ended with the background marker.
    pub background: bool,
}

/// Splits a raw command line into an argument vector, detecting a trailing
/// background marker (`&`).
///
/// The marker is recognized either as its own final token (`sleep 10 &`) or
/// glued to the last token (`sleep 10&`), and is removed from the argument
/// vector either way. Returns `None` for blank lines, lines that reduce to
/// just the marker, and lines `shlex` cannot split (e.g. an unterminated
/// quote).
pub fn tokenize(line: &str) -> Option<Tokenized> {
    let mut args = shlex::split(line)?;
    let mut background = false;

    if let Some(last) = args.last_mut() {
        if last.len() == 1 && last.starts_with(BACKGROUND_MARKER) {
            background = true;
            args.pop();
        } else if let Some(stripped) = last.strip_suffix(BACKGROUND_MARKER) {
            background = true;
            *last = stripped.to_string();
        }
    }

    if args.is_empty() {
        return None;
    }
    Some(Tokenized { args, background })
}
