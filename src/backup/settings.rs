//! The single mutable backup policy record.
//!
//! Exactly one `BackupSettings` row exists (seeded with defaults on first
//! open). Edits are read-modify-write guarded by the `updated_at` stamp, so a
//! writer holding a stale version gets a `Conflict` instead of clobbering a
//! concurrent edit.

use crate::backup::db::{from_db, to_db, Database};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::{parse_time_of_day, validate_time_of_day};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::{Validate, ValidationError, ValidationErrors};

static TIME_OF_DAY_FORMAT: &str = "%H:%M";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    fn from_db(raw: &str) -> Result<Self> {
        match raw {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(Error::CorruptRecord(format!("bad frequency {other:?}"))),
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupSettings {
    pub frequency: Frequency,
    pub backup_time: NaiveTime,
    pub retention_days: u32,
    pub auto_delete: bool,
    pub compress_backups: bool,
    pub email_notifications: bool,
    pub notification_email: Option<String>,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency stamp; strictly increases on every update.
    pub updated_at: DateTime<Utc>,
}

/// Partial settings edit. Absent fields keep their stored value.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub frequency: Option<Frequency>,
    /// Wall-clock time of day, `HH:MM`.
    #[validate(custom(function = validate_time_of_day))]
    pub backup_time: Option<String>,
    #[validate(range(min = 1))]
    pub retention_days: Option<u32>,
    pub auto_delete: Option<bool>,
    pub compress_backups: Option<bool>,
    pub email_notifications: Option<bool>,
    /// Absent keeps the stored address; an explicit null clears it.
    #[validate(email)]
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub notification_email: Option<Option<String>>,
}

#[derive(Clone)]
pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    /// Opens the store, seeding the default policy on first boot.
    pub fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        store.seed_defaults()?;
        Ok(store)
    }

    fn seed_defaults(&self) -> Result<()> {
        let now = to_db(Utc::now());
        self.db.with(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO backup_settings \
                 (id, frequency, backup_time, retention_days, auto_delete, compress_backups, \
                  email_notifications, notification_email, last_cleanup, created_at, updated_at) \
                 VALUES (1, 'daily', '02:00', 30, 1, 1, 0, NULL, NULL, ?1, ?1)",
                params![now],
            )?;
            Ok(())
        })
    }

    pub fn get(&self) -> Result<BackupSettings> {
        self.db.with(|conn| {
            conn.query_row("SELECT * FROM backup_settings WHERE id = 1", [], decode_row)
                .optional()?
                .ok_or_else(|| Error::NotFound("backup settings".into()))?
        })
    }

    /// Applies a validated patch if `expected_version` still matches the
    /// stored `updated_at`. Returns the new record with a strictly greater
    /// version stamp.
    pub fn update(
        &self,
        patch: &SettingsPatch,
        expected_version: DateTime<Utc>,
    ) -> Result<BackupSettings> {
        patch.validate()?;
        let current = self.get()?;
        if current.updated_at != expected_version {
            return Err(Error::Conflict {
                expected: to_db(expected_version),
                stored: to_db(current.updated_at),
            });
        }

        let mut next = current.clone();
        if let Some(frequency) = patch.frequency {
            next.frequency = frequency;
        }
        if let Some(raw) = &patch.backup_time {
            next.backup_time = parse_patch_time(raw)?;
        }
        if let Some(retention_days) = patch.retention_days {
            next.retention_days = retention_days;
        }
        if let Some(auto_delete) = patch.auto_delete {
            next.auto_delete = auto_delete;
        }
        if let Some(compress_backups) = patch.compress_backups {
            next.compress_backups = compress_backups;
        }
        if let Some(email_notifications) = patch.email_notifications {
            next.email_notifications = email_notifications;
        }
        if let Some(notification_email) = &patch.notification_email {
            next.notification_email = notification_email.clone();
        }

        let now = Utc::now();
        next.updated_at = if now > current.updated_at {
            now
        } else {
            current.updated_at + TimeDelta::microseconds(1)
        };

        let changed = self.db.with(|conn| {
            // last_cleanup is deliberately not written here; the sweeper owns
            // it and must not be clobbered by a concurrent settings edit.
            let changed = conn.execute(
                "UPDATE backup_settings SET frequency = ?1, backup_time = ?2, \
                 retention_days = ?3, auto_delete = ?4, compress_backups = ?5, \
                 email_notifications = ?6, notification_email = ?7, updated_at = ?8 \
                 WHERE id = 1 AND updated_at = ?9",
                params![
                    next.frequency.as_str(),
                    next.backup_time.format(TIME_OF_DAY_FORMAT).to_string(),
                    next.retention_days,
                    next.auto_delete,
                    next.compress_backups,
                    next.email_notifications,
                    next.notification_email,
                    to_db(next.updated_at),
                    to_db(expected_version),
                ],
            )?;
            Ok(changed)
        })?;

        if changed == 0 {
            let stored = self.get()?;
            return Err(Error::Conflict {
                expected: to_db(expected_version),
                stored: to_db(stored.updated_at),
            });
        }

        self.get()
    }

    /// Records that a retention sweep ran. Not version guarded: the sweeper
    /// owns this field and never touches the policy itself.
    pub fn record_cleanup(&self, at: DateTime<Utc>) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE backup_settings SET last_cleanup = ?1 WHERE id = 1",
                params![to_db(at)],
            )?;
            Ok(())
        })
    }
}

fn parse_patch_time(raw: &str) -> Result<NaiveTime> {
    parse_time_of_day(raw).map_err(|_| {
        let mut errors = ValidationErrors::new();
        errors.add("backup_time", ValidationError::new("InvalidTimeOfDay"));
        Error::Validation(errors)
    })
}

fn decode_row(row: &Row) -> rusqlite::Result<Result<BackupSettings>> {
    let frequency: String = row.get("frequency")?;
    let backup_time: String = row.get("backup_time")?;
    let notification_email: Option<String> = row.get("notification_email")?;
    let last_cleanup: Option<String> = row.get("last_cleanup")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let retention_days: u32 = row.get("retention_days")?;
    let auto_delete: bool = row.get("auto_delete")?;
    let compress_backups: bool = row.get("compress_backups")?;
    let email_notifications: bool = row.get("email_notifications")?;

    Ok((|| {
        Ok(BackupSettings {
            frequency: Frequency::from_db(&frequency)?,
            backup_time: parse_time_of_day(&backup_time)
                .map_err(|e| Error::CorruptRecord(format!("bad backup_time: {e}")))?,
            retention_days,
            auto_delete,
            compress_backups,
            email_notifications,
            notification_email,
            last_cleanup: last_cleanup.as_deref().map(from_db).transpose()?,
            created_at: from_db(&created_at)?,
            updated_at: from_db(&updated_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SettingsStore {
        SettingsStore::new(Database::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_seeded_once() {
        let store = store();
        let settings = store.get().unwrap();
        assert_eq!(settings.frequency, Frequency::Daily);
        assert_eq!(settings.backup_time, NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(settings.retention_days, 30);
        assert!(settings.auto_delete);
        assert!(settings.compress_backups);
        assert!(!settings.email_notifications);
        assert!(settings.last_cleanup.is_none());
    }

    #[test]
    fn test_get_is_idempotent() {
        let store = store();
        assert_eq!(store.get().unwrap(), store.get().unwrap());
    }

    #[test]
    fn test_update_round_trip() {
        let store = store();
        let before = store.get().unwrap();
        let patch = SettingsPatch {
            frequency: Some(Frequency::Weekly),
            backup_time: Some("04:30".into()),
            retention_days: Some(7),
            auto_delete: Some(false),
            compress_backups: Some(false),
            email_notifications: Some(true),
            notification_email: Some(Some("admin@example.com".into())),
        };

        let updated = store.update(&patch, before.updated_at).unwrap();
        assert_eq!(updated.frequency, Frequency::Weekly);
        assert_eq!(updated.backup_time, NaiveTime::from_hms_opt(4, 30, 0).unwrap());
        assert_eq!(updated.retention_days, 7);
        assert!(!updated.auto_delete);
        assert!(!updated.compress_backups);
        assert!(updated.email_notifications);
        assert_eq!(updated.notification_email.as_deref(), Some("admin@example.com"));
        assert!(updated.updated_at > before.updated_at);
        assert_eq!(store.get().unwrap(), updated);
    }

    #[test]
    fn test_update_stale_version_conflicts() {
        let store = store();
        let before = store.get().unwrap();
        let patch = SettingsPatch {
            retention_days: Some(5),
            ..SettingsPatch::default()
        };
        store.update(&patch, before.updated_at).unwrap();

        // Second writer still holds the old stamp.
        let res = store.update(&patch, before.updated_at);
        assert!(matches!(res, Err(Error::Conflict { .. })));
        assert_eq!(store.get().unwrap().retention_days, 5);
    }

    #[test]
    fn test_update_rejects_bad_patch() {
        let store = store();
        let version = store.get().unwrap().updated_at;

        let bad_retention = SettingsPatch {
            retention_days: Some(0),
            ..SettingsPatch::default()
        };
        assert!(matches!(
            store.update(&bad_retention, version),
            Err(Error::Validation(_))
        ));

        let bad_time = SettingsPatch {
            backup_time: Some("25:61".into()),
            ..SettingsPatch::default()
        };
        assert!(matches!(store.update(&bad_time, version), Err(Error::Validation(_))));

        let bad_email = SettingsPatch {
            notification_email: Some(Some("not-an-address".into())),
            ..SettingsPatch::default()
        };
        assert!(matches!(store.update(&bad_email, version), Err(Error::Validation(_))));

        // Nothing was persisted by the rejected patches.
        assert_eq!(store.get().unwrap().retention_days, 30);
    }

    #[test]
    fn test_patch_can_clear_notification_email() {
        let store = store();
        let version = store.get().unwrap().updated_at;
        let set = SettingsPatch {
            notification_email: Some(Some("admin@example.com".into())),
            ..SettingsPatch::default()
        };
        let updated = store.update(&set, version).unwrap();
        assert_eq!(updated.notification_email.as_deref(), Some("admin@example.com"));

        // An absent field keeps the address.
        let keep = SettingsPatch::default();
        let updated = store.update(&keep, updated.updated_at).unwrap();
        assert_eq!(updated.notification_email.as_deref(), Some("admin@example.com"));

        let clear = SettingsPatch {
            notification_email: Some(None),
            ..SettingsPatch::default()
        };
        let updated = store.update(&clear, updated.updated_at).unwrap();
        assert!(updated.notification_email.is_none());
    }

    #[test]
    fn test_patch_email_absent_vs_null() {
        let absent: SettingsPatch = serde_yml::from_str("retention_days: 10").unwrap();
        assert!(absent.notification_email.is_none());

        let null: SettingsPatch = serde_yml::from_str("notification_email: null").unwrap();
        assert_eq!(null.notification_email, Some(None));

        let set: SettingsPatch =
            serde_yml::from_str("notification_email: admin@example.com").unwrap();
        assert_eq!(
            set.notification_email,
            Some(Some("admin@example.com".into()))
        );
    }

    #[test]
    fn test_record_cleanup_keeps_version() {
        let store = store();
        let before = store.get().unwrap();
        let swept_at = Utc::now();
        store.record_cleanup(swept_at).unwrap();

        let after = store.get().unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(
            after.last_cleanup.map(|dt| dt.timestamp_micros()),
            Some(swept_at.timestamp_micros())
        );
    }

    #[test]
    fn test_settings_edit_does_not_clobber_cleanup() {
        let store = store();
        let swept_at = Utc::now();
        store.record_cleanup(swept_at).unwrap();

        let version = store.get().unwrap().updated_at;
        let patch = SettingsPatch {
            retention_days: Some(14),
            ..SettingsPatch::default()
        };
        let updated = store.update(&patch, version).unwrap();
        assert!(updated.last_cleanup.is_some());
    }
}
