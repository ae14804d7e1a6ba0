//! YAML service configuration.
//!
//! Deployment-level knobs live here; the backup policy itself (frequency,
//! retention and so on) is runtime state in the settings store.

use crate::backup::compress::xz::XzConfig;
use crate::backup::notifications::NotificationConfig;
use crate::backup::validate::{validate_archive_base_name, validate_writable_dir};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// SQLite database holding settings, the job ledger, papers and users.
    pub database: Arc<Path>,
    #[validate(custom(function = validate_writable_dir))]
    pub artifact_dir: Arc<Path>,
    #[validate(custom(function = validate_archive_base_name))]
    pub archive_base_name: Arc<str>,
    /// How often the scheduler loop wakes up.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Minimum age of `last_cleanup` before another retention sweep runs.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    /// Running jobs older than this are failed at startup reconciliation.
    #[serde(with = "humantime_serde", default = "default_stale_running_after")]
    pub stale_running_after: Duration,
    #[validate(nested)]
    pub compression: Option<XzConfig>,
    #[validate(nested)]
    pub notifications: Option<NotificationConfig>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_stale_running_after() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}
