//! # paper-backup
//!
//! Backup orchestration and retention for a paper archive: jobs are streamed
//! into tar archives (optionally XZ compressed), tracked in a SQLite job
//! ledger, scheduled on a daily/weekly/monthly cadence and purged once they
//! fall out of the retention window.
//!
//! ## Features
//!
//! - **Job Ledger**: Every run is a persistent record with a strict
//!   `pending -> running -> {completed | failed}` lifecycle
//! - **At Most One Run**: Manual and scheduled triggers contend for a single
//!   run slot; losers fail fast without creating a record
//! - **Scheduling**: Wall-clock daily/weekly/monthly cadence, DST aware
//! - **Retention**: Expired jobs and their artifacts are swept, with a
//!   dry-run mode when auto-delete is off
//! - **Notifications**: Optional SMTP announcements per finished job
//!
//! ## Quick Start
//!
//! ```no_run
//! use paper_backup::backup::db::Database;
//! use paper_backup::backup::directory::SqliteUserDirectory;
//! use paper_backup::backup::papers::SqlitePaperStore;
//! use paper_backup::backup::service::BackupService;
//! use paper_backup::backup::service_config::ServiceConfig;
//! use std::sync::Arc;
//!
//! // Load configuration from YAML file
//! let config: ServiceConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//!
//! let db = Database::open(&config.database)?;
//! let papers = Arc::new(SqlitePaperStore::new(db.clone()));
//! let directory = Arc::new(SqliteUserDirectory::new(db.clone()));
//!
//! // Start the service loop
//! let service = BackupService::new(&config, db, papers, directory)?;
//! service.run_loop()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
