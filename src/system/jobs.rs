// src/system/jobs.rs

use std::process::ExitStatus;

use log::{debug, warn};
use thiserror::Error;

use crate::system::process::ProcessHandle;

/// The slot already tracks a live background job.
///
/// The rejected handle is handed back so the caller decides what to do with
/// it; silently replacing the occupant would leak a child that could then
/// never be reaped.
#[derive(Error, Debug)]
#[error("a background job is already running (pid {occupied_pid})")]
pub struct SlotOccupied {
    /// Pid of the job currently occupying the slot.
    pub occupied_pid: u32,
    /// The handle that was refused, returned to the caller unchanged.
    pub rejected: ProcessHandle,
}

/// Outcome of one non-blocking poll of the slot.
#[derive(Debug)]
pub enum PollOutcome {
    /// The tracked child exited; the slot is empty again and the handle's
    /// resources have been released. Carries the status for diagnostics.
    Reaped { pid: u32, status: ExitStatus },
    /// The tracked child is still alive; the slot is unchanged.
    StillRunning,
    /// Nothing is being tracked.
    Empty,
}

/// Tracks at most one in-flight background process.
///
/// The controlling process is single-threaded: the slot is only ever touched
/// from the control loop, which polls it once per iteration. There is no
/// signal handler and no background thread, so no synchronization is needed,
/// only correct ordering of `assign`/`poll` relative to loop iterations.
/// There is likewise no way to forcibly kill the tracked child; it runs to
/// completion on its own.
#[derive(Debug, Default)]
pub struct BackgroundSlot {
    occupant: Option<ProcessHandle>,
}

impl BackgroundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no job is being tracked.
    pub fn is_empty(&self) -> bool {
        self.occupant.is_none()
    }

    /// Pid of the tracked job, if any.
    pub fn occupant_pid(&self) -> Option<u32> {
        self.occupant.as_ref().and_then(ProcessHandle::pid)
    }

    /// Stores a launched handle if the slot is empty; otherwise rejects it
    /// and hands it back.
    pub fn assign(&mut self, handle: ProcessHandle) -> Result<(), SlotOccupied> {
        debug_assert!(handle.is_launched(), "only launched handles are trackable");
        if let Some(occupant) = &self.occupant {
            return Err(SlotOccupied {
                occupied_pid: occupant.pid().unwrap_or_default(),
                rejected: handle,
            });
        }
        debug!("tracking background pid {:?}", handle.pid());
        self.occupant = Some(handle);
        Ok(())
    }

    /// Non-blocking status check on the occupant's exact pid.
    ///
    /// A terminated child is reaped exactly once: the handle is dropped here,
    /// releasing its resolved path, and the slot becomes empty.
    pub fn poll(&mut self) -> PollOutcome {
        let Some(handle) = self.occupant.as_mut() else {
            return PollOutcome::Empty;
        };
        match handle.try_wait() {
            Ok(Some(status)) => {
                let pid = handle.pid().unwrap_or_default();
                debug!("reaped background pid {} ({})", pid, status);
                self.occupant = None;
                PollOutcome::Reaped { pid, status }
            }
            Ok(None) => PollOutcome::StillRunning,
            Err(e) => {
                // The child's status is unknowable; free the slot rather
                // than poll a dead pid forever.
                warn!("failed to poll background job: {}", e);
                self.occupant = None;
                PollOutcome::Empty
            }
        }
    }
}
