//! # Core Resolution Logic
//!
//! Pure, OS-light building blocks of the shell: turning a raw command line
//! and a `PATH`-style string into a verified executable location.
//!
//! - **`search_path`**: a borrowed, ordered view over the colon-delimited
//!   directory list.
//! - **`tokenizer`**: raw line → argument vector + background flag.
//! - **`resolver`**: first-match-wins lookup of a program name across the
//!   search path, capturing the device/inode fingerprint that the launcher
//!   later re-verifies.

pub mod resolver;
pub mod search_path;
pub mod tokenizer;
