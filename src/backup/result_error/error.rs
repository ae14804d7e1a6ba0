use crate::backup::result_error::WithMsg;
use itertools::Itertools;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    EmailBuild(#[from] lettre::error::Error),
    #[error(transparent)]
    EmailAddress(#[from] lettre::address::AddressError),
    #[error(transparent)]
    SmtpTransport(#[from] lettre::transport::smtp::Error),
    #[error("smtp server rejected message: {0}")]
    SmtpSend(String),
    /// A backup run is already in progress; no job record was created.
    #[error("a backup is already running")]
    ConcurrencyConflict,
    /// Settings update raced against another writer.
    #[error("stale settings version: expected {expected}, stored {stored}")]
    Conflict { expected: String, stored: String },
    #[error("{0} not found")]
    NotFound(String),
    /// A job was asked to move out of a state it is not in.
    #[error("job {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: String,
        to: &'static str,
    },
    /// A persisted job row violates the status/companion-field invariants.
    #[error("corrupt job record: {0}")]
    CorruptRecord(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(
            errors
                .into_iter()
                .flat_map(|e| e.into_iter())
                .collect_vec(),
        )
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Single-line rendering capped at `limit` characters, suitable for the
    /// `error_message` column of a failed job.
    pub fn bounded_summary(&self, limit: usize) -> String {
        let flat = self.to_string().split_whitespace().join(" ");
        if flat.chars().count() <= limit {
            flat
        } else {
            let cut: String = flat.chars().take(limit.saturating_sub(1)).collect();
            format!("{cut}…")
        }
    }
}
