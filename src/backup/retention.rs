//! Purges backup jobs and artifacts that fell out of the retention window.

use crate::backup::ledger::{JobId, JobLedger, JobState};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::settings::SettingsStore;
use crate::backup::storage::ArtifactStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one sweep. With `auto_delete` off the sweep is a dry run:
/// candidates are reported but nothing is deleted.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub candidates: Vec<JobId>,
    pub deleted: Vec<JobId>,
    pub errors: Vec<Error>,
    pub dry_run: bool,
}

pub struct Sweeper {
    settings: SettingsStore,
    ledger: JobLedger,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Sweeper {
    pub fn new(settings: SettingsStore, ledger: JobLedger, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            settings,
            ledger,
            artifacts,
        }
    }

    /// One pass over the ledger. Per-candidate failures are collected and do
    /// not stop the sweep; `last_cleanup` is recorded even then, since a
    /// partially-successful sweep is still progress. A failed candidate keeps
    /// its job row and is retried on the next sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let settings = self.settings.get()?;
        let cutoff = now - TimeDelta::days(i64::from(settings.retention_days));
        let expired = self.ledger.expired(cutoff)?;

        let mut report = SweepReport {
            candidates: expired.iter().map(|job| job.id).collect(),
            dry_run: !settings.auto_delete,
            ..SweepReport::default()
        };

        if settings.auto_delete {
            for job in &expired {
                match self.delete_candidate(job.id, &job.state) {
                    Ok(()) => report.deleted.push(job.id),
                    Err(e) => {
                        warn!("Sweeping backup job {} failed: {e}", job.id);
                        report.errors.push(e.with_msg(format!("backup job {}", job.id)));
                    }
                }
            }
            info!(
                "Retention sweep deleted {}/{} expired backup jobs",
                report.deleted.len(),
                report.candidates.len()
            );
        } else {
            info!(
                "Retention sweep (dry run): {} expired backup jobs reported",
                report.candidates.len()
            );
        }

        self.settings.record_cleanup(now)?;
        Ok(report)
    }

    fn delete_candidate(&self, id: JobId, state: &JobState) -> Result<()> {
        // Failed jobs never committed an artifact; only the row goes.
        if let JobState::Completed { download_url } = state {
            self.artifacts.delete(download_url)?;
        }
        self.ledger.remove(id)
    }
}
