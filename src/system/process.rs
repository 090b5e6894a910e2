// src/system/process.rs

use std::ffi::{CString, OsString};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};

use log::debug;
use thiserror::Error;

use crate::core::resolver::ResolvedExecutable;

/// Errors produced while launching a resolved executable.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The file at the resolved path no longer matches the device/inode pair
    /// captured at resolution time; the child refused to execute whatever
    /// replaced it.
    #[error("'{0}' changed on disk between resolution and execution (suspected TOCTOU race)")]
    StatRace(String),
    /// Creating the child process failed (resource exhaustion). The handle
    /// stays resolved and is safe to retry or drop.
    #[error("could not spawn a child process: {0}")]
    SpawnFailed(#[source] io::Error),
    /// The child was created but replacing its image failed.
    #[error("could not execute '{program}': {source}")]
    ExecFailed {
        program: String,
        #[source]
        source: io::Error,
    },
    /// Waiting on the foreground child failed.
    #[error("could not wait for pid {pid}: {source}")]
    WaitFailed {
        pid: u32,
        #[source]
        source: io::Error,
    },
    /// The handle has already been launched; a handle launches at most once.
    #[error("'{0}' has already been launched")]
    AlreadyLaunched(String),
}

/// Whether `launch` blocks until the child exits or returns immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Block until the child terminates and capture its exit status.
    Sync,
    /// Return as soon as the child is running; the caller is responsible for
    /// registering the handle with a [`crate::system::jobs::BackgroundSlot`].
    Async,
}

/// What a successful `launch` produced.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// Sync mode: the child ran to completion with this status.
    Completed(ExitStatus),
    /// Async mode: the child is running under this pid.
    Running { pid: u32 },
}

#[derive(Debug)]
enum ProcessState {
    Resolved,
    Launched(Child),
    Waited(ExitStatus),
}

/// A launchable (or launched) child process.
///
/// The handle owns the verified executable location plus the argument vector
/// and environment it will pass on verbatim: argv exactly as tokenized (the
/// program name as argv[0], no shell-level globbing or escaping) and the
/// environment exactly as captured at startup. Exactly one component owns a
/// handle at any time; the resolved path buffer is freed when the final owner
/// drops the handle after its terminal transition.
#[derive(Debug)]
pub struct ProcessHandle {
    resolved: ResolvedExecutable,
    args: Vec<String>,
    env: Vec<(OsString, OsString)>,
    pid: Option<u32>,
    state: ProcessState,
}

impl ProcessHandle {
    /// Builds a handle from a verified executable, the tokenized argument
    /// vector and the environment the child should inherit.
    pub fn new(
        resolved: ResolvedExecutable,
        args: Vec<String>,
        env: Vec<(OsString, OsString)>,
    ) -> Self {
        Self {
            resolved,
            args,
            env,
            pid: None,
            state: ProcessState::Resolved,
        }
    }

    /// The program name used in diagnostics (argv[0]).
    pub fn name(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    /// The verified absolute path the child will execute.
    pub fn full_path(&self) -> &Path {
        self.resolved.full_path()
    }

    /// The pid assigned at launch, if the handle has been launched.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the handle has successfully launched a child.
    pub fn is_launched(&self) -> bool {
        self.pid.is_some()
    }

    /// The exit status captured by a synchronous wait or a completed poll.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.state {
            ProcessState::Waited(status) => Some(status),
            _ => None,
        }
    }

    /// Launches the child.
    ///
    /// `Sync` blocks on the exact pid it spawned (never "any child", so a
    /// concurrently running background job can never be reaped by the
    /// foreground wait) and transitions to the terminal `Waited` state.
    /// `Async` returns as soon as the pid is known. On `SpawnFailed` the
    /// handle remains in the resolved state.
    pub fn launch(&mut self, mode: LaunchMode) -> Result<LaunchOutcome, LaunchError> {
        if !matches!(self.state, ProcessState::Resolved) {
            return Err(LaunchError::AlreadyLaunched(self.name().to_string()));
        }

        let mut child = self.spawn_verified()?;
        let pid = child.id();
        self.pid = Some(pid);
        debug!("launched '{}' as pid {}", self.name(), pid);

        match mode {
            LaunchMode::Sync => {
                let status = child
                    .wait()
                    .map_err(|source| LaunchError::WaitFailed { pid, source })?;
                debug!("pid {} exited: {}", pid, status);
                self.state = ProcessState::Waited(status);
                Ok(LaunchOutcome::Completed(status))
            }
            LaunchMode::Async => {
                self.state = ProcessState::Launched(child);
                Ok(LaunchOutcome::Running { pid })
            }
        }
    }

    /// Non-blocking status check on a launched child.
    ///
    /// Returns the exit status once the child has terminated, transitioning
    /// the handle to its terminal state; repeated calls after that keep
    /// returning the captured status. A handle that was never launched has
    /// nothing to wait for and reports `None`.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match &mut self.state {
            ProcessState::Launched(child) => match child.try_wait()? {
                Some(status) => {
                    self.state = ProcessState::Waited(status);
                    Ok(Some(status))
                }
                None => Ok(None),
            },
            ProcessState::Waited(status) => Ok(Some(*status)),
            ProcessState::Resolved => Ok(None),
        }
    }

    /// Forks and, in the child, re-stats the resolved path immediately before
    /// exec, comparing device and inode against the fingerprint captured at
    /// resolution time. On mismatch the child aborts with `ESTALE` instead of
    /// executing whatever replaced the file.
    fn spawn_verified(&self) -> Result<Child, LaunchError> {
        let program = self.name().to_string();
        // Converted up front: the post-fork hook must not allocate.
        let c_path = CString::new(self.resolved.full_path().as_os_str().as_bytes()).map_err(
            |_| LaunchError::ExecFailed {
                program: program.clone(),
                source: io::ErrorKind::InvalidInput.into(),
            },
        )?;
        let device = self.resolved.device();
        let inode = self.resolved.inode();

        let mut command = Command::new(self.resolved.full_path());
        if let Some(argv0) = self.args.first() {
            command.arg0(argv0);
        }
        command.args(self.args.iter().skip(1));
        command.env_clear();
        command.envs(self.env.iter().map(|(key, value)| (key, value)));

        // Runs in the child, after fork and immediately before exec. Only the
        // identity re-check and the process-group switch happen here; any
        // error it returns is forwarded to the parent and the child never
        // executes.
        //
        // Safety: the hook performs only async-signal-safe calls (`stat`,
        // `setpgid`); the path was converted to a CString before the fork so
        // nothing allocates in the child.
        unsafe {
            command.pre_exec(move || {
                let mut probe = MaybeUninit::<libc::stat>::uninit();
                if libc::stat(c_path.as_ptr(), probe.as_mut_ptr()) != 0 {
                    return Err(io::Error::last_os_error());
                }
                // `stat` returned 0, so the buffer is initialized.
                let probe = probe.assume_init();
                if u64::from(probe.st_dev) != device || u64::from(probe.st_ino) != inode {
                    return Err(io::Error::from_raw_os_error(libc::ESTALE));
                }
                // Detach the child into its own process group before exec.
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        command
            .spawn()
            .map_err(|source| classify_spawn_error(program, source))
    }
}

/// `spawn` reports both fork-level failures and child-side failures (the
/// pre-exec hook's error travels back to the parent over a pipe), so the
/// errno decides which launch failure this was.
fn classify_spawn_error(program: String, source: io::Error) -> LaunchError {
    match source.raw_os_error() {
        Some(libc::ESTALE) => LaunchError::StatRace(program),
        Some(libc::EAGAIN | libc::ENOMEM) => LaunchError::SpawnFailed(source),
        _ => LaunchError::ExecFailed { program, source },
    }
}

/// Handles compare equal iff both have been launched and were assigned the
/// same pid. Two never-launched handles are never equal: there is no
/// meaningful identity to compare before a pid exists.
impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.pid, other.pid), (Some(a), Some(b)) if a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::{self, ResolveError};
    use crate::core::search_path::SearchPath;
    use std::env;
    use std::fs::{self, File};
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        file.set_permissions(fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn resolve_in(dir: &TempDir, name: &str) -> Result<ProcessHandle, ResolveError> {
        let raw = dir.path().to_str().unwrap().to_string();
        let resolved = resolver::resolve(name, SearchPath::new(&raw))?;
        Ok(ProcessHandle::new(
            resolved,
            vec![name.to_string()],
            env::vars_os().collect(),
        ))
    }

    fn handle_with_args(dir: &TempDir, name: &str, args: Vec<String>) -> ProcessHandle {
        let raw = dir.path().to_str().unwrap().to_string();
        let resolved = resolver::resolve(name, SearchPath::new(&raw)).unwrap();
        ProcessHandle::new(resolved, args, env::vars_os().collect())
    }

    #[test]
    fn sync_launch_reports_the_exact_exit_code() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "exit_seven", "exit 7");

        let mut handle = resolve_in(&dir, "exit_seven").unwrap();
        let outcome = handle.launch(LaunchMode::Sync).unwrap();
        let LaunchOutcome::Completed(status) = outcome else {
            panic!("sync launch must complete");
        };
        assert_eq!(status.code(), Some(7));
        assert_eq!(handle.exit_status().and_then(|s| s.code()), Some(7));
        assert!(handle.is_launched());
    }

    #[test]
    fn sync_launch_of_a_succeeding_program_reports_success() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "ok", "exit 0");

        let mut handle = resolve_in(&dir, "ok").unwrap();
        let LaunchOutcome::Completed(status) = handle.launch(LaunchMode::Sync).unwrap() else {
            panic!("sync launch must complete");
        };
        assert!(status.success());
    }

    #[test]
    fn argv_reaches_the_child_verbatim() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "record", "printf '%s' \"$1\" > \"$2\"");
        let out = dir.path().join("out.txt");

        let mut handle = handle_with_args(
            &dir,
            "record",
            vec![
                "record".to_string(),
                "hello world".to_string(),
                out.to_str().unwrap().to_string(),
            ],
        );
        handle.launch(LaunchMode::Sync).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello world");
    }

    #[test]
    fn environment_reaches_the_child_verbatim() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "record_env", "printf '%s' \"$MINISH_PROBE\" > \"$1\"");
        let out = dir.path().join("env.txt");

        let raw = dir.path().to_str().unwrap().to_string();
        let resolved = resolver::resolve("record_env", SearchPath::new(&raw)).unwrap();
        let mut env: Vec<_> = env::vars_os().collect();
        env.push(("MINISH_PROBE".into(), "sentinel-value".into()));
        let mut handle = ProcessHandle::new(
            resolved,
            vec!["record_env".to_string(), out.to_str().unwrap().to_string()],
            env,
        );
        handle.launch(LaunchMode::Sync).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "sentinel-value");
    }

    #[test]
    fn toctou_replacement_is_refused_without_running_it() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        write_script(dir.path(), "victim", "exit 0");

        let mut handle = handle_with_args(&dir, "victim", vec!["victim".to_string()]);

        // Replace the file after resolution. The replacement is created while
        // the victim still exists, so it necessarily has a different inode
        // (unlink + recreate may reuse the freed inode number on some
        // filesystems); rename preserves that inode while swapping it into
        // place. The replacement would leave a marker if it ever ran.
        write_script(
            dir.path(),
            "victim.replacement",
            &format!("touch '{}'", marker.display()),
        );
        fs::rename(
            dir.path().join("victim.replacement"),
            dir.path().join("victim"),
        )
        .unwrap();

        let err = handle.launch(LaunchMode::Sync).unwrap_err();
        assert!(matches!(err, LaunchError::StatRace(name) if name == "victim"));
        assert!(!marker.exists(), "replacement must not have executed");
    }

    #[test]
    fn spawn_failure_leaves_the_handle_retryable() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "flaky", "exit 0");

        let mut handle = handle_with_args(&dir, "flaky", vec!["flaky".to_string()]);

        // Stage the restore copy while the original still exists so it gets a
        // distinct inode (recreating after the unlink may reuse the freed
        // inode number on some filesystems), then trigger a non-race failure
        // and retry.
        let path = dir.path().join("flaky");
        let staged = dir.path().join("flaky.staged");
        fs::copy(&path, &staged).unwrap();
        fs::set_permissions(&staged, fs::Permissions::from_mode(0o755)).unwrap();
        fs::remove_file(&path).unwrap();
        let err = handle.launch(LaunchMode::Sync).unwrap_err();
        assert!(!matches!(err, LaunchError::AlreadyLaunched(_)));
        assert!(!handle.is_launched());

        // Rename preserves the staged file's inode while restoring the path.
        fs::rename(&staged, &path).unwrap();
        // The old fingerprint no longer matches the recreated file, so the
        // retry is refused as a race rather than executed blindly.
        let err = handle.launch(LaunchMode::Sync).unwrap_err();
        assert!(matches!(err, LaunchError::StatRace(_)));
    }

    #[test]
    fn async_launch_returns_immediately_with_a_pid() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "napper", "sleep 5");

        let mut handle = resolve_in(&dir, "napper").unwrap();
        let LaunchOutcome::Running { pid } = handle.launch(LaunchMode::Async).unwrap() else {
            panic!("async launch must not block");
        };
        assert_eq!(handle.pid(), Some(pid));
        assert!(handle.exit_status().is_none());
    }

    #[test]
    fn relaunching_a_launched_handle_is_refused() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "once", "exit 0");

        let mut handle = resolve_in(&dir, "once").unwrap();
        handle.launch(LaunchMode::Sync).unwrap();
        let err = handle.launch(LaunchMode::Sync).unwrap_err();
        assert!(matches!(err, LaunchError::AlreadyLaunched(_)));
    }

    #[test]
    fn equality_follows_assigned_pids() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "a", "exit 0");
        write_script(dir.path(), "b", "exit 0");

        let mut first = resolve_in(&dir, "a").unwrap();
        let mut second = resolve_in(&dir, "b").unwrap();
        first.launch(LaunchMode::Sync).unwrap();
        second.launch(LaunchMode::Sync).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, first);

        // Never-launched handles carry no identity and are never equal,
        // not even to themselves.
        let unlaunched_a = resolve_in(&dir, "a").unwrap();
        let unlaunched_b = resolve_in(&dir, "b").unwrap();
        assert_ne!(unlaunched_a, unlaunched_b);
        assert_ne!(unlaunched_a, unlaunched_a);
        assert_ne!(unlaunched_a, first);
    }

    #[test]
    fn end_to_end_against_system_binaries() {
        let raw = "/usr/bin:/bin".to_string();

        let resolved = resolver::resolve("true", SearchPath::new(&raw)).unwrap();
        let mut truthy =
            ProcessHandle::new(resolved, vec!["true".to_string()], env::vars_os().collect());
        let LaunchOutcome::Completed(status) = truthy.launch(LaunchMode::Sync).unwrap() else {
            panic!("sync launch must complete");
        };
        assert!(status.success());

        let resolved = resolver::resolve("false", SearchPath::new(&raw)).unwrap();
        let mut falsy =
            ProcessHandle::new(resolved, vec!["false".to_string()], env::vars_os().collect());
        let LaunchOutcome::Completed(status) = falsy.launch(LaunchMode::Sync).unwrap() else {
            panic!("sync launch must complete");
        };
        assert!(!status.success());

        let err = resolver::resolve("does-not-exist-xyz", SearchPath::new(&raw)).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn diagnostic_accessors_expose_name_and_path() {
        let dir = TempDir::new().unwrap();
        let path = write_script(dir.path(), "probe", "exit 0");

        let handle = resolve_in(&dir, "probe").unwrap();
        assert_eq!(handle.name(), "probe");
        assert_eq!(handle.full_path(), path);
        assert!(!handle.is_launched());
        assert_eq!(handle.pid(), None);
    }
}
