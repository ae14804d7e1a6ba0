//! Carries one backup job from creation to a terminal state.
//!
//! The executor is the only writer of job state. A `RunGuard` over an atomic
//! flag enforces at most one active run; it is released on every exit path
//! (including unwinds) because release lives in `Drop`.

use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::compress::xz::XzConfig;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::ledger::{BackupJob, JobLedger, TriggerKind};
use crate::backup::notifications::Notifier;
use crate::backup::papers::PaperStore;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::settings::{BackupSettings, SettingsStore};
use crate::backup::storage::ArtifactStore;
use crate::backup::finish::Finish;
use chrono::Utc;
use itertools::Itertools;
use std::io::{BufWriter, IntoInnerError, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub static SYSTEM_ACTOR: &str = "system";

static TIME_FORMAT: &str = "%Y-%m-%dT%Hh%Mm%Ss";
/// Cap on the persisted `error_message` of a failed job.
static ERROR_SUMMARY_MAX: usize = 500;

/// Scoped "backup in progress" acquisition. Dropping it releases the slot.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct RunStats {
    file_count: u64,
    total_size: u64,
}

pub struct Executor {
    ledger: JobLedger,
    settings: SettingsStore,
    papers: Arc<dyn PaperStore>,
    artifacts: Arc<dyn ArtifactStore>,
    notifier: Notifier,
    archive_base_name: Arc<str>,
    xz: XzConfig,
    busy: Arc<AtomicBool>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: JobLedger,
        settings: SettingsStore,
        papers: Arc<dyn PaperStore>,
        artifacts: Arc<dyn ArtifactStore>,
        notifier: Notifier,
        archive_base_name: Arc<str>,
        xz: XzConfig,
    ) -> Self {
        Self {
            ledger,
            settings,
            papers,
            artifacts,
            notifier,
            archive_base_name,
            xz,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claims the run slot and creates the job record, immediately advanced
    /// to `running`. Fails with `ConcurrencyConflict` (and creates no record)
    /// if a run is active. The caller decides whether to `run` inline or on a
    /// worker thread; either way the returned guard travels with the run.
    pub fn begin(&self, trigger: TriggerKind, actor: &str) -> Result<(RunGuard, BackupJob)> {
        let guard = RunGuard::try_acquire(&self.busy).ok_or(Error::ConcurrencyConflict)?;
        let job = self.ledger.create(trigger, actor, Utc::now())?;
        self.ledger.mark_running(job.id)?;
        info!(
            "Backup job {} started ({} trigger by {})",
            job.id,
            trigger.as_str(),
            actor
        );
        let job = self.ledger.get(job.id)?;
        Ok((guard, job))
    }

    /// Runs a begun job to its terminal state and notifies. Never leaves the
    /// job `running`: any fault is absorbed into a `failed` record.
    pub fn run(&self, guard: RunGuard, job: BackupJob) -> Result<BackupJob> {
        let _guard = guard;
        let mut stats = RunStats::default();
        let outcome = self
            .settings
            .get()
            .and_then(|settings| self.write_archive(&settings, &job, &mut stats));

        let now = Utc::now();
        let finished = match outcome {
            Ok(download_url) => {
                let finished = self.ledger.finish_completed(
                    job.id,
                    now,
                    stats.file_count,
                    stats.total_size,
                    &download_url,
                )?;
                info!(
                    "Backup job {} completed: {} files, {}",
                    job.id,
                    stats.file_count,
                    finished.total_size_display()
                );
                finished
            }
            Err(e) => {
                warn!("Backup job {} failed: {e}", job.id);
                self.ledger.finish_failed(
                    job.id,
                    now,
                    stats.file_count,
                    stats.total_size,
                    &e.bounded_summary(ERROR_SUMMARY_MAX),
                )?
            }
        };

        // Fire-and-forget: the notifier logs and swallows its own failures.
        if let Ok(settings) = self.settings.get() {
            self.notifier.notify(&settings, &finished);
        }
        Ok(finished)
    }

    /// `begin` + `run` in one call, for the scheduler's worker thread.
    pub fn start(&self, trigger: TriggerKind, actor: &str) -> Result<BackupJob> {
        let (guard, job) = self.begin(trigger, actor)?;
        self.run(guard, job)
    }

    fn write_archive(
        &self,
        settings: &BackupSettings,
        job: &BackupJob,
        stats: &mut RunStats,
    ) -> Result<String> {
        let compressor = if settings.compress_backups {
            CompressorConfig::Xz(self.xz.clone())
        } else {
            CompressorConfig::None
        };
        let ext = std::iter::once("tar".into())
            .chain(compressor.file_ext())
            .join(".");
        let name = format!(
            "{}.{}.{}.{}",
            self.archive_base_name,
            job.created_at.format(TIME_FORMAT),
            job.id,
            ext
        );

        let staged = self.artifacts.create(&name)?;
        match self.stream_entries(&compressor, staged, stats) {
            Ok(()) => self.artifacts.commit(&name),
            Err(e) => {
                // No partial artifact survives a failed run.
                self.artifacts.discard(&name);
                Err(e)
            }
        }
    }

    fn stream_entries(
        &self,
        compressor: &CompressorConfig,
        staged: Box<dyn Write + Send>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let writer = compressor.build_compressor(BufWriter::new(staged))?;
        let mut builder = tar::Builder::new(BufWriter::new(writer));
        let mtime = Utc::now().timestamp() as u64;

        for item in self.papers.list_items()? {
            let item = item?;
            let meta = serde_json::to_vec_pretty(&item.metadata)?;
            append_entry(&mut builder, &format!("papers/{}", item.name), &item.content, mtime)?;
            append_entry(
                &mut builder,
                &format!("papers/{}.meta.json", item.name),
                &meta,
                mtime,
            )?;
            stats.file_count += 1;
            stats.total_size += (item.content.len() + meta.len()) as u64;
        }

        builder
            .into_inner()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .flush()
            .map_err(Error::from)
            .with_msg("Flushing archive failed")
    }
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append_data(&mut header, path, data)?;
    Ok(())
}
