//! Completion notifications for backup jobs.
//!
//! The `Notification` trait is the delivery seam; `NotificationConfig` is the
//! serde-tagged union of configured channels. `Notifier` sits above both and
//! decides whether and to whom a finished job is announced. Notification
//! failures are logged and swallowed: a backup that ran is never marked
//! failed because the announcement did not go out.

use crate::backup::directory::UserDirectory;
use crate::backup::ledger::{BackupJob, JobState};
use crate::backup::notifications::smtp::SmtpNotificationConfig;
use crate::backup::result_error::result::Result;
use crate::backup::settings::BackupSettings;
use derive_more::From;
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::{Validate, ValidationErrors};

pub mod smtp;

pub trait Notification {
    fn send<D1: Display, D2: Display>(&self, to: &Mailbox, topic: D1, msg: D2) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    Smtp(SmtpNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl Notification for NotificationConfig {
    fn send<D1: Display, D2: Display>(&self, to: &Mailbox, topic: D1, msg: D2) -> Result<()> {
        match self {
            Self::Smtp(inner) => inner.send(to, topic, msg),
        }
    }
}

/// Decides per job whether a notification goes out and to which address.
/// The recipient is the configured `notification_email` when present,
/// otherwise the triggering actor's directory contact.
pub struct Notifier {
    channel: Option<NotificationConfig>,
    directory: Arc<dyn UserDirectory>,
}

impl Notifier {
    pub fn new(channel: Option<NotificationConfig>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { channel, directory }
    }

    pub fn notify(&self, settings: &BackupSettings, job: &BackupJob) {
        if !settings.email_notifications {
            return;
        }
        let Some(channel) = &self.channel else {
            debug!(
                "Email notifications are on but no channel is configured; \
                 skipping announcement for job {}",
                job.id
            );
            return;
        };

        let Some(mailbox) = self.recipient(settings, job) else {
            return;
        };

        match channel.send(&mailbox, topic(job), body(job)) {
            Ok(()) => info!("Sent notification for job {} to {mailbox}", job.id),
            Err(e) => warn!("Notification for job {} failed: {e}", job.id),
        }
    }

    fn recipient(&self, settings: &BackupSettings, job: &BackupJob) -> Option<Mailbox> {
        let address = match &settings.notification_email {
            Some(address) => address.clone(),
            None => match self.directory.resolve_contact(&job.created_by) {
                Ok(address) => address,
                Err(e) => {
                    warn!(
                        "No notification recipient for job {} (actor {:?}): {e}",
                        job.id, job.created_by
                    );
                    return None;
                }
            },
        };
        match address.parse() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                warn!("Bad notification address {address:?} for job {}: {e}", job.id);
                None
            }
        }
    }
}

fn topic(job: &BackupJob) -> String {
    format!("Backup job {} {}", job.id, job.state.kind().as_str())
}

fn body(job: &BackupJob) -> String {
    let mut lines = vec![
        format!("Trigger: {}", job.trigger.as_str()),
        format!("Started: {}", job.created_at),
        format!("Items archived: {}", job.file_count),
        format!("Archive size: {}", job.total_size_display()),
    ];
    match &job.state {
        JobState::Completed { download_url } => {
            lines.push(format!("Download: {download_url}"));
        }
        JobState::Failed { error_message } => {
            lines.push(format!("Error: {error_message}"));
        }
        JobState::Pending | JobState::Running => {}
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ledger::{JobId, TriggerKind};
    use crate::backup::result_error::error::Error;
    use chrono::Utc;

    struct StaticDirectory(Option<&'static str>);

    impl UserDirectory for StaticDirectory {
        fn resolve_contact(&self, user_id: &str) -> Result<String> {
            self.0
                .map(String::from)
                .ok_or_else(|| Error::NotFound(format!("contact for user {user_id:?}")))
        }
    }

    fn job(state: JobState) -> BackupJob {
        let terminal = state.is_terminal();
        BackupJob {
            id: JobId::from(7),
            trigger: TriggerKind::Manual,
            state,
            created_by: "alice".into(),
            created_at: Utc::now(),
            completed_at: terminal.then(Utc::now),
            file_count: 3,
            total_size: 2048,
        }
    }

    #[test]
    fn test_topic_and_body_for_completed_job() {
        let job = job(JobState::Completed {
            download_url: "/backups/papers.tar.xz".into(),
        });
        assert_eq!(topic(&job), "Backup job 7 completed");
        let body = body(&job);
        assert!(body.contains("Items archived: 3"));
        assert!(body.contains("Archive size: 2.0 KiB"));
        assert!(body.contains("Download: /backups/papers.tar.xz"));
    }

    #[test]
    fn test_body_for_failed_job_carries_the_error() {
        let job = job(JobState::Failed {
            error_message: "enumeration fault".into(),
        });
        assert_eq!(topic(&job), "Backup job 7 failed");
        assert!(body(&job).contains("Error: enumeration fault"));
    }

    fn notifier(contact: Option<&'static str>) -> Notifier {
        Notifier::new(None, Arc::new(StaticDirectory(contact)))
    }

    fn settings(email: Option<&str>) -> BackupSettings {
        use crate::backup::db::Database;
        use crate::backup::settings::SettingsStore;
        let store = SettingsStore::new(Database::open_in_memory().unwrap()).unwrap();
        let mut settings = store.get().unwrap();
        settings.email_notifications = true;
        settings.notification_email = email.map(String::from);
        settings
    }

    #[test]
    fn test_configured_address_wins_over_directory() {
        let notifier = notifier(Some("alice@example.com"));
        let settings = settings(Some("ops@example.com"));
        let mailbox = notifier.recipient(&settings, &job(JobState::Pending)).unwrap();
        assert_eq!(mailbox.email.to_string(), "ops@example.com");
    }

    #[test]
    fn test_falls_back_to_directory_contact() {
        let notifier = notifier(Some("alice@example.com"));
        let settings = settings(None);
        let mailbox = notifier.recipient(&settings, &job(JobState::Pending)).unwrap();
        assert_eq!(mailbox.email.to_string(), "alice@example.com");
    }

    #[test]
    fn test_no_recipient_resolves_to_none() {
        let notifier = notifier(None);
        let settings = settings(None);
        assert!(notifier.recipient(&settings, &job(JobState::Pending)).is_none());
    }

    #[test]
    fn test_unparsable_address_resolves_to_none() {
        let notifier = notifier(Some("not an address"));
        let settings = settings(None);
        assert!(notifier.recipient(&settings, &job(JobState::Pending)).is_none());
    }

    #[test]
    fn test_notify_without_channel_is_a_no_op() {
        let notifier = notifier(Some("alice@example.com"));
        let settings = settings(None);
        notifier.notify(&settings, &job(JobState::Completed { download_url: "/x".into() }));
    }
}
