use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use keyward_core::key::{BrokerError, MasterKey, MasterKeySource};
use tracing::{debug, error, info, instrument};

use crate::executor::{ExecutorError, PrivilegedExecutor};

pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches the master key through a privileged helper, one escalation per
/// call, and revokes that escalation before returning.
pub struct MasterKeyBroker<E: PrivilegedExecutor> {
    executor: E,
    helper: PathBuf,
    timeout: Duration,
}

impl<E: PrivilegedExecutor> MasterKeyBroker<E> {
    pub fn new(executor: E, helper: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            helper: helper.into(),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn helper(&self) -> &Path {
        &self.helper
    }

    async fn run_helper(&self) -> Result<MasterKey, BrokerError> {
        // Only a definite "absent" counts; a helper we cannot stat may still
        // be reachable by root.
        if let Ok(false) = self.helper.try_exists() {
            return Err(BrokerError::HelperNotFound {
                path: self.helper.display().to_string(),
            });
        }

        let output = self
            .executor
            .run_helper(&self.helper, self.timeout)
            .await
            .map_err(|err| match err {
                ExecutorError::TimedOut(after) => BrokerError::TimedOut { after },
                other => BrokerError::Escalation {
                    reason: other.to_string(),
                },
            })?;

        if !output.success {
            let message = output.stderr.trim();
            return Err(BrokerError::HelperFailed {
                message: if message.is_empty() {
                    "helper exited with a non-zero status".to_string()
                } else {
                    message.to_string()
                },
            });
        }

        let encoded = output.stdout.trim_ascii();
        if encoded.is_empty() {
            return Err(BrokerError::EmptyMasterKey);
        }
        MasterKey::decode(encoded)
    }
}

#[async_trait]
impl<E: PrivilegedExecutor> MasterKeySource for MasterKeyBroker<E> {
    #[instrument(skip_all, fields(helper = %self.helper.display()))]
    async fn fetch(&self) -> Result<MasterKey, BrokerError> {
        info!("requesting master key; strong authentication required");
        let guard = ElevationGuard::open(&self.executor);
        let outcome = self.run_helper().await;
        let revoked = guard.release();

        match (&outcome, &revoked) {
            (Ok(_), Ok(())) => info!("master key obtained"),
            (Err(err), _) => error!(%err, "master key fetch failed"),
            (Ok(_), Err(_)) => {}
        }

        // The helper's own failure is the more useful error; a failed revoke
        // alongside it has already been logged by the guard.
        let key = outcome?;
        revoked?;
        Ok(key)
    }
}

/// Scoped elevation window. `release` revokes on the normal path; `Drop`
/// revokes on every other one (early return, panic, cancelled future).
/// Either way revoke runs exactly once.
struct ElevationGuard<'a, E: PrivilegedExecutor> {
    executor: &'a E,
    released: bool,
}

impl<'a, E: PrivilegedExecutor> ElevationGuard<'a, E> {
    fn open(executor: &'a E) -> Self {
        debug!("elevation window opened");
        Self {
            executor,
            released: false,
        }
    }

    fn release(mut self) -> Result<(), BrokerError> {
        self.released = true;
        revoke(self.executor)
    }
}

impl<E: PrivilegedExecutor> Drop for ElevationGuard<'_, E> {
    fn drop(&mut self) {
        if !self.released {
            let _ = revoke(self.executor);
        }
    }
}

fn revoke<E: PrivilegedExecutor>(executor: &E) -> Result<(), BrokerError> {
    match executor.revoke() {
        Ok(()) => {
            debug!("elevation revoked");
            Ok(())
        }
        Err(err) => {
            error!(%err, "failed to revoke elevation");
            Err(BrokerError::RevokeFailed {
                reason: err.to_string(),
            })
        }
    }
}
