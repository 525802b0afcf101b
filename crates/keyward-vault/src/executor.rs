use std::{
    collections::VecDeque,
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("revoke failed: {0}")]
    Revoke(String),
}

/// Captured result of one helper invocation.
pub struct HelperOutput {
    pub success: bool,
    /// Raw helper stdout; holds key material on success.
    pub stdout: Zeroizing<Vec<u8>>,
    pub stderr: String,
}

impl fmt::Debug for HelperOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperOutput")
            .field("success", &self.success)
            .field("stdout", &format_args!("<{} bytes>", self.stdout.len()))
            .field("stderr", &self.stderr)
            .finish()
    }
}

/// Capability to run the privileged helper through the OS escalation
/// mechanism and to revoke the resulting elevation.
#[async_trait]
pub trait PrivilegedExecutor: Send + Sync {
    /// Run `helper` with elevated privileges, waiting at most `timeout`
    /// (which includes the authentication prompt).
    async fn run_helper(&self, helper: &Path, timeout: Duration)
        -> Result<HelperOutput, ExecutorError>;

    /// Invalidate any cached elevation. Synchronous so it can run from `Drop`.
    fn revoke(&self) -> Result<(), ExecutorError>;
}

/// Escalates with `sudo`. Uses `sudo -k <helper>` so a cached timestamp from
/// an earlier `sudo` in the user's shell is never reused, and `sudo -k` to
/// revoke afterwards.
#[derive(Debug, Clone)]
pub struct SudoExecutor {
    program: PathBuf,
}

impl SudoExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn spawn_err(&self, err: std::io::Error) -> ExecutorError {
        ExecutorError::Spawn {
            program: self.program.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl Default for SudoExecutor {
    fn default() -> Self {
        Self::new("sudo")
    }
}

#[async_trait]
impl PrivilegedExecutor for SudoExecutor {
    async fn run_helper(
        &self,
        helper: &Path,
        timeout: Duration,
    ) -> Result<HelperOutput, ExecutorError> {
        debug!(program = %self.program.display(), helper = %helper.display(), "escalating");
        let child = Command::new(&self.program)
            .arg("-k")
            .arg(helper)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_err(e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutorError::TimedOut(timeout))?
            .map_err(|e| self.spawn_err(e))?;

        Ok(HelperOutput {
            success: output.status.success(),
            stdout: Zeroizing::new(output.stdout),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn revoke(&self) -> Result<(), ExecutorError> {
        let status = std::process::Command::new(&self.program)
            .arg("-k")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| ExecutorError::Revoke(e.to_string()))?;
        if !status.success() {
            return Err(ExecutorError::Revoke(format!(
                "{} -k exited with {status}",
                self.program.display()
            )));
        }
        Ok(())
    }
}

/// Canned helper behaviour for [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Helper exits 0 with this stdout.
    Success(Vec<u8>),
    /// Helper exits non-zero with this stderr.
    Failure(String),
    /// The escalation itself fails.
    Error(ExecutorError),
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    fallback: Option<Scripted>,
    runs: usize,
    revokes: usize,
    fail_revoke: bool,
}

/// Test double: replays scripted helper results and counts calls.
/// Clones share state, so a test can keep one handle while the broker owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct ScriptedExecutor {
    inner: Arc<Mutex<ScriptState>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor whose helper always succeeds with `stdout`.
    pub fn always(stdout: impl Into<Vec<u8>>) -> Self {
        let executor = Self::new();
        executor.state().fallback = Some(Scripted::Success(stdout.into()));
        executor
    }

    /// Queue a response; queued responses are used before the fallback.
    pub fn push(&self, response: Scripted) -> &Self {
        self.state().queue.push_back(response);
        self
    }

    /// Make every subsequent `revoke` fail.
    pub fn fail_revokes(&self) -> &Self {
        self.state().fail_revoke = true;
        self
    }

    pub fn run_count(&self) -> usize {
        self.state().runs
    }

    pub fn revoke_count(&self) -> usize {
        self.state().revokes
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PrivilegedExecutor for ScriptedExecutor {
    async fn run_helper(
        &self,
        _helper: &Path,
        timeout: Duration,
    ) -> Result<HelperOutput, ExecutorError> {
        let next = {
            let mut state = self.state();
            state.runs += 1;
            let queued = state.queue.pop_front();
            queued.or_else(|| state.fallback.clone())
        };

        match next {
            Some(Scripted::Success(stdout)) => Ok(HelperOutput {
                success: true,
                stdout: Zeroizing::new(stdout),
                stderr: String::new(),
            }),
            Some(Scripted::Failure(stderr)) => Ok(HelperOutput {
                success: false,
                stdout: Zeroizing::new(Vec::new()),
                stderr,
            }),
            Some(Scripted::Error(err)) => Err(err),
            None => Err(ExecutorError::TimedOut(timeout)),
        }
    }

    fn revoke(&self) -> Result<(), ExecutorError> {
        let mut state = self.state();
        state.revokes += 1;
        if state.fail_revoke {
            return Err(ExecutorError::Revoke("scripted revoke failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_queue_runs_before_fallback() {
        let executor = ScriptedExecutor::always("fallback");
        executor.push(Scripted::Failure("denied".into()));

        let first = executor
            .run_helper(Path::new("/helper"), Duration::from_secs(1))
            .await
            .expect("first run");
        assert!(!first.success);
        assert_eq!(first.stderr, "denied");

        let second = executor
            .run_helper(Path::new("/helper"), Duration::from_secs(1))
            .await
            .expect("second run");
        assert!(second.success);
        assert_eq!(second.stdout.as_slice(), b"fallback");
        assert_eq!(executor.run_count(), 2);
    }

    #[tokio::test]
    async fn empty_script_behaves_like_a_timeout() {
        let executor = ScriptedExecutor::new();
        let err = executor
            .run_helper(Path::new("/helper"), Duration::from_secs(3))
            .await
            .expect_err("nothing scripted");
        assert_eq!(err, ExecutorError::TimedOut(Duration::from_secs(3)));
    }

    #[test]
    fn helper_output_debug_hides_stdout() {
        let output = HelperOutput {
            success: true,
            stdout: Zeroizing::new(b"super-secret".to_vec()),
            stderr: String::new(),
        };
        let rendered = format!("{output:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<12 bytes>"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sudo_executor_kills_helper_on_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sudo = script(dir.path(), "sudo", "exec sleep 30");
        let executor = SudoExecutor::new(sudo);

        let timeout = Duration::from_millis(300);
        let started = std::time::Instant::now();
        let err = executor
            .run_helper(Path::new("/helper"), timeout)
            .await
            .expect_err("helper should time out");
        assert_eq!(err, ExecutorError::TimedOut(timeout));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sudo_executor_captures_helper_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Stand-in for sudo: check for `-k`, then run the helper.
        let sudo = script(
            dir.path(),
            "sudo",
            "[ \"$1\" = \"-k\" ] || exit 64\nshift\n[ $# -eq 0 ] && exit 0\nexec \"$@\"",
        );
        let helper = script(dir.path(), "helper", "printf 'key-material'\necho oops >&2");
        let executor = SudoExecutor::new(sudo);

        let output = executor
            .run_helper(&helper, Duration::from_secs(10))
            .await
            .expect("helper ran");
        assert!(output.success);
        assert_eq!(output.stdout.as_slice(), b"key-material");
        assert_eq!(output.stderr.trim(), "oops");
        executor.revoke().expect("revoke");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sudo_executor_reports_missing_program() {
        let executor = SudoExecutor::new("/nonexistent/keyward-sudo");
        let err = executor
            .run_helper(Path::new("/helper"), Duration::from_secs(1))
            .await
            .expect_err("missing program");
        assert!(matches!(err, ExecutorError::Spawn { .. }));
        assert!(matches!(executor.revoke(), Err(ExecutorError::Revoke(_))));
    }
}
