// src/constants.rs

/// The prompt written before each read of the control loop.
pub const PROMPT: &str = "$ ";

/// Trailing token requesting a background launch.
pub const BACKGROUND_MARKER: char = '&';

/// Environment variable holding the colon-delimited executable search path.
pub const PATH_VAR: &str = "PATH";
