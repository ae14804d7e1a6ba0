//! Decides when the next scheduled backup is due and kicks it off.

use crate::backup::executor::{Executor, SYSTEM_ACTOR};
use crate::backup::ledger::{JobLedger, TriggerKind};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::settings::{Frequency, SettingsStore};
use chrono::offset::LocalResult;
use chrono::{DateTime, Days, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Next occurrence of `backup_time` strictly after `last_run`, one period
/// along. The wall-clock time of day is preserved across DST transitions and
/// month-length differences, so the duration between runs may vary.
pub fn next_run_at<T: TimeZone>(
    frequency: Frequency,
    backup_time: NaiveTime,
    last_run: DateTime<T>,
) -> DateTime<T> {
    let tz = last_run.timezone();
    let last_date = last_run.date_naive();
    let candidate_date = match frequency {
        Frequency::Daily => last_date,
        Frequency::Weekly => advance(frequency, last_date),
        Frequency::Monthly => advance(frequency, last_date),
    };
    let candidate = resolve_local(&tz, candidate_date, backup_time);
    if candidate > last_run {
        candidate
    } else {
        resolve_local(&tz, advance(frequency, candidate_date), backup_time)
    }
}

fn advance(frequency: Frequency, date: NaiveDate) -> NaiveDate {
    match frequency {
        Frequency::Daily => date + Days::new(1),
        Frequency::Weekly => date + Days::new(7),
        Frequency::Monthly => date
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX),
    }
}

/// Maps a local wall-clock instant to the timezone, resolving DST anomalies:
/// an ambiguous time takes the earlier offset, a gapped time slides forward
/// until it exists.
fn resolve_local<T: TimeZone>(tz: &T, date: NaiveDate, time: NaiveTime) -> DateTime<T> {
    let mut naive = date.and_time(time);
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => naive += TimeDelta::hours(1),
        }
    }
}

pub struct Scheduler {
    settings: SettingsStore,
    ledger: JobLedger,
    executor: Arc<Executor>,
}

impl Scheduler {
    pub fn new(settings: SettingsStore, ledger: JobLedger, executor: Arc<Executor>) -> Self {
        Self {
            settings,
            ledger,
            executor,
        }
    }

    /// Polling-loop entry point. When a run is due, the backup is handed to a
    /// worker thread so this never blocks the loop. The executor's guard is
    /// the actual mutual-exclusion mechanism; the idle check here only avoids
    /// spawning threads that would immediately lose the race.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let settings = self.settings.get()?;
        let last_run = self
            .ledger
            .last_scheduled_run_at()?
            .unwrap_or(DateTime::UNIX_EPOCH);
        let due_at = next_run_at(settings.frequency, settings.backup_time, last_run);
        if now < due_at {
            debug!("Next scheduled backup due at {due_at}");
            return Ok(());
        }
        if self.executor.is_running() {
            debug!("Scheduled backup due but a run is active; will retry next tick");
            return Ok(());
        }

        let executor = self.executor.clone();
        std::thread::spawn(move || {
            match executor.start(TriggerKind::Scheduled, SYSTEM_ACTOR) {
                Ok(job) => info!("Scheduled backup job {} finished: {}", job.id, job.state.kind().as_str()),
                Err(Error::ConcurrencyConflict) => {
                    debug!("Scheduled backup lost the start race; skipping")
                }
                Err(e) => warn!("Scheduled backup did not start: {e}"),
            }
        });
        Ok(())
    }
}
