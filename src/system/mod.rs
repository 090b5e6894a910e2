//! # System Interaction Layer
//!
//! The privileged boundary between a resolved command and OS-level process
//! creation.
//!
//! - **`process`**: the launch/wait state machine. Forks, re-verifies the
//!   executable's identity in the child immediately before exec, and exposes
//!   synchronous (blocking wait) and asynchronous (fire-and-forget) modes.
//! - **`jobs`**: the single-slot background job tracker, polled once per
//!   control-loop iteration to reap finished children.

pub mod jobs;
pub mod process;
