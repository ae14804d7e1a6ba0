//! Wires the stores, executor, scheduler and sweeper into one service.
//!
//! `BackupService` is the surface the binary (or an embedding application)
//! talks to: manual triggers, job queries, settings edits and the polling
//! loop all go through here.

use crate::backup::db::Database;
use crate::backup::directory::UserDirectory;
use crate::backup::executor::Executor;
use crate::backup::ledger::{BackupJob, JobFilter, JobId, JobLedger, Page, TriggerKind};
use crate::backup::notifications::Notifier;
use crate::backup::papers::PaperStore;
use crate::backup::result_error::result::Result;
use crate::backup::retention::{SweepReport, Sweeper};
use crate::backup::scheduler::Scheduler;
use crate::backup::service_config::ServiceConfig;
use crate::backup::settings::{BackupSettings, SettingsPatch, SettingsStore};
use crate::backup::storage::LocalDirStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

static INTERRUPTED_MESSAGE: &str = "backup interrupted by service restart";

pub struct BackupService {
    settings: SettingsStore,
    ledger: JobLedger,
    executor: Arc<Executor>,
    scheduler: Scheduler,
    sweeper: Sweeper,
    poll_interval: Duration,
    sweep_interval: TimeDelta,
    stale_running_after: TimeDelta,
}

impl BackupService {
    pub fn new(
        config: &ServiceConfig,
        db: Database,
        papers: Arc<dyn PaperStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        let settings = SettingsStore::new(db.clone())?;
        let ledger = JobLedger::new(db);
        let artifacts = Arc::new(LocalDirStore::new(config.artifact_dir.clone()));
        let notifier = Notifier::new(config.notifications.clone(), directory);
        let executor = Arc::new(Executor::new(
            ledger.clone(),
            settings.clone(),
            papers,
            artifacts.clone(),
            notifier,
            config.archive_base_name.clone(),
            config.compression.clone().unwrap_or_default(),
        ));
        let scheduler = Scheduler::new(settings.clone(), ledger.clone(), executor.clone());
        let sweeper = Sweeper::new(settings.clone(), ledger.clone(), artifacts);

        Ok(Self {
            settings,
            ledger,
            executor,
            scheduler,
            sweeper,
            poll_interval: config.poll_interval,
            sweep_interval: to_delta(config.sweep_interval),
            stale_running_after: to_delta(config.stale_running_after),
        })
    }

    /// Starts a manual backup for `actor` and returns its job id right away;
    /// the run itself proceeds on a worker thread. `ConcurrencyConflict` if a
    /// run is already active.
    pub fn trigger_backup(&self, actor: &str) -> Result<JobId> {
        let (guard, job) = self.executor.begin(TriggerKind::Manual, actor)?;
        let id = job.id;
        let executor = self.executor.clone();
        std::thread::spawn(move || {
            if let Err(e) = executor.run(guard, job) {
                warn!("Manual backup job {id} did not reach a terminal state: {e}");
            }
        });
        Ok(id)
    }

    pub fn get_job(&self, id: JobId) -> Result<BackupJob> {
        self.ledger.get(id)
    }

    pub fn list_jobs(&self, filter: &JobFilter, page: &Page) -> Result<Vec<BackupJob>> {
        self.ledger.list(filter, page)
    }

    pub fn get_settings(&self) -> Result<BackupSettings> {
        self.settings.get()
    }

    pub fn update_settings(
        &self,
        patch: &SettingsPatch,
        expected_version: DateTime<Utc>,
    ) -> Result<BackupSettings> {
        self.settings.update(patch, expected_version)
    }

    pub fn run_retention_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweeper.sweep(now)
    }

    /// Startup reconciliation: jobs stuck in `running` from a previous
    /// process are failed so they cannot block the at-most-one-running rule.
    pub fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let recovered =
            self.ledger
                .recover_interrupted(now - self.stale_running_after, now, INTERRUPTED_MESSAGE)?;
        for id in &recovered {
            warn!("Marked interrupted backup job {id} as failed");
        }
        Ok(recovered)
    }

    /// Runs a sweep when none has happened within `sweep_interval`. A store
    /// with no recorded cleanup yet is always due.
    pub fn sweep_if_due(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>> {
        let settings = self.settings.get()?;
        let due = match settings.last_cleanup {
            None => true,
            Some(last) => now - last >= self.sweep_interval,
        };
        if due {
            self.sweeper.sweep(now).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Blocking service loop: reconcile once, then poll the scheduler and
    /// the sweep cadence until an unrecoverable error surfaces.
    pub fn run_loop(&self) -> Result<()> {
        self.recover_interrupted(Utc::now())?;
        info!(
            "Backup service loop started (poll every {:?})",
            self.poll_interval
        );
        loop {
            let now = Utc::now();
            self.scheduler.tick(now)?;
            self.sweep_if_due(now)?;
            std::thread::sleep(self.poll_interval);
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::directory::SqliteUserDirectory;
    use crate::backup::ledger::JobState;
    use crate::backup::papers::PaperItem;
    use crate::backup::result_error::error::Error;
    use std::path::Path;

    struct SlowPapers {
        delay: Duration,
    }

    impl PaperStore for SlowPapers {
        fn list_items(&self) -> Result<Box<dyn Iterator<Item = Result<PaperItem>> + Send>> {
            let delay = self.delay;
            let items = (0..3).map(move |i| {
                std::thread::sleep(delay);
                Ok(PaperItem {
                    name: format!("paper-{i}"),
                    content: vec![b'p'; 32],
                    metadata: serde_json::json!({ "i": i }),
                })
            });
            Ok(Box::new(items))
        }
    }

    fn config(artifact_dir: &Path) -> ServiceConfig {
        ServiceConfig {
            database: Path::new("unused-in-tests.db").into(),
            artifact_dir: artifact_dir.to_path_buf().into(),
            archive_base_name: "papers".into(),
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            stale_running_after: Duration::from_secs(6 * 60 * 60),
            compression: None,
            notifications: None,
        }
    }

    fn service(dir: &Path, delay: Duration) -> BackupService {
        let db = Database::open_in_memory().unwrap();
        let papers = Arc::new(SlowPapers { delay });
        let directory = Arc::new(SqliteUserDirectory::new({
            let db = db.clone();
            db.with(|conn| {
                conn.execute_batch(
                    "CREATE TABLE users (username TEXT PRIMARY KEY, email TEXT NOT NULL)",
                )?;
                Ok(())
            })
            .unwrap();
            db
        }));
        BackupService::new(&config(dir), db, papers, directory).unwrap()
    }

    fn wait_terminal(service: &BackupService, id: JobId) -> BackupJob {
        for _ in 0..250 {
            let job = service.get_job(id).unwrap();
            if job.state.is_terminal() {
                return job;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("job {id} never reached a terminal state");
    }

    #[test]
    fn test_manual_trigger_returns_id_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), Duration::from_millis(50));

        let id = service.trigger_backup("alice").unwrap();
        // The id is usable immediately, while the run is still going.
        let early = service.get_job(id).unwrap();
        assert!(matches!(early.state, JobState::Running | JobState::Completed { .. }));

        let done = wait_terminal(&service, id);
        assert!(matches!(done.state, JobState::Completed { .. }));
        assert_eq!(done.file_count, 3);
        assert_eq!(done.created_by, "alice");
    }

    #[test]
    fn test_concurrent_triggers_yield_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), Duration::from_millis(100));

        let first = service.trigger_backup("alice").unwrap();
        let second = service.trigger_backup("bob");
        assert!(matches!(second, Err(Error::ConcurrencyConflict)));

        wait_terminal(&service, first);
        assert_eq!(
            service.list_jobs(&JobFilter::default(), &Page::default()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_restart_reconciliation_fails_stale_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), Duration::ZERO);
        let now = Utc::now();

        let stale = service
            .ledger
            .create(TriggerKind::Scheduled, "system", now - TimeDelta::hours(12))
            .unwrap();
        service.ledger.mark_running(stale.id).unwrap();

        let recovered = service.recover_interrupted(now).unwrap();
        assert_eq!(recovered, vec![stale.id]);
        let job = service.get_job(stale.id).unwrap();
        assert_eq!(
            job.state,
            JobState::Failed {
                error_message: INTERRUPTED_MESSAGE.into()
            }
        );

        // A fresh trigger works after reconciliation.
        let id = service.trigger_backup("alice").unwrap();
        wait_terminal(&service, id);
    }

    #[test]
    fn test_sweep_runs_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), Duration::ZERO);
        let now = Utc::now();

        // Never swept: due immediately.
        let first = service.sweep_if_due(now).unwrap();
        assert!(first.is_some());

        // Swept just now: not due again.
        let second = service.sweep_if_due(now + TimeDelta::minutes(5)).unwrap();
        assert!(second.is_none());

        // A day later it is due again.
        let third = service.sweep_if_due(now + TimeDelta::hours(25)).unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn test_settings_round_trip_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), Duration::ZERO);

        let current = service.get_settings().unwrap();
        let patch = SettingsPatch {
            retention_days: Some(14),
            ..SettingsPatch::default()
        };
        let updated = service.update_settings(&patch, current.updated_at).unwrap();
        assert_eq!(updated.retention_days, 14);

        // The stale version is rejected on a second attempt.
        assert!(matches!(
            service.update_settings(&patch, current.updated_at),
            Err(Error::Conflict { .. })
        ));
    }
}
