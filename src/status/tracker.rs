//! Sync run state machine

use super::store::StatusStore;
use super::types::{now, StartPolicy, SyncRun};
use crate::error::Result;
use crate::types::SyncMode;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records run outcomes and answers watermark queries
#[derive(Clone)]
pub struct SyncStatusTracker {
    store: Arc<dyn StatusStore>,
    policy: StartPolicy,
}

impl SyncStatusTracker {
    /// Create a tracker with the default start policy
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            policy: StartPolicy::default(),
        }
    }

    /// Set the start policy
    #[must_use]
    pub fn with_policy(mut self, policy: StartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Open an `in_progress` run
    pub async fn start(&self, object_type: &str, mode: SyncMode) -> Result<SyncRun> {
        if self.policy == StartPolicy::FindOrCreate {
            if let Some(mut run) = self.store.latest_in_progress(object_type).await? {
                debug!(object_type = %object_type, id = run.id, "Reusing in-progress run");
                run.mode = mode;
                run.started_at = now();
                self.store.update(&run).await?;
                return Ok(run);
            }
        }

        let mut run = SyncRun::start(object_type, mode);
        run.id = self.store.insert(&run).await?;
        Ok(run)
    }

    /// Close the latest `in_progress` run as successful
    ///
    /// The stored watermark never moves backwards: when the run observed no
    /// newer modification time the previous one is carried forward.
    pub async fn complete_success(
        &self,
        object_type: &str,
        mode: SyncMode,
        records: u64,
        high_watermark: Option<DateTime<Utc>>,
    ) -> Result<SyncRun> {
        let previous = self.last_successful_sync(object_type).await?;
        let watermark = high_watermark.max(previous);

        let mut run = self.open_run(object_type, mode).await?;
        run.succeed(records, watermark);
        self.close(&mut run).await?;

        info!(
            object_type = %object_type,
            records,
            watermark = ?run.high_watermark,
            "Sync succeeded"
        );
        Ok(run)
    }

    /// Close the latest `in_progress` run as failed
    pub async fn complete_error(
        &self,
        object_type: &str,
        mode: SyncMode,
        records: u64,
        detail: &str,
    ) -> Result<SyncRun> {
        let mut run = self.open_run(object_type, mode).await?;
        run.fail(records, detail);
        self.close(&mut run).await?;

        warn!(object_type = %object_type, detail = %detail, "Sync failed");
        Ok(run)
    }

    /// Watermark of the most recent successful run
    pub async fn last_successful_sync(&self, object_type: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .last_successful(object_type)
            .await?
            .and_then(|run| run.high_watermark))
    }

    /// Most recent run of any status
    pub async fn last_sync(&self, object_type: &str) -> Result<Option<SyncRun>> {
        self.store.last(object_type).await
    }

    /// Most recent runs, newest first
    pub async fn recent(&self, object_type: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        self.store.recent(object_type, limit).await
    }

    async fn open_run(&self, object_type: &str, mode: SyncMode) -> Result<SyncRun> {
        match self.store.latest_in_progress(object_type).await? {
            Some(run) => Ok(run),
            None => {
                debug!(object_type = %object_type, "No in-progress run, recording a terminal one");
                Ok(SyncRun::start(object_type, mode))
            }
        }
    }

    async fn close(&self, run: &mut SyncRun) -> Result<()> {
        if run.id == 0 {
            run.id = self.store.insert(run).await?;
        } else {
            self.store.update(run).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStatusTracker")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
