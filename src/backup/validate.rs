//! Validation functions for configuration values.
//!
//! Custom `validator` functions for directories, archive base names, and
//! time-of-day strings used by the service config and settings patches.

use chrono::NaiveTime;
use sanitize_filename::{is_sanitized, sanitize};
use std::path::Path;
use validator::ValidationError;

pub fn validate_archive_base_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    if !is_sanitized(name.as_ref()) {
        return Err(ValidationError::new("InvalidArchiveBaseName").with_message(
            format!(
                "Invalid file name, try sanitizing like {:?}",
                sanitize(name)
            )
            .into(),
        ));
    }

    if name.as_ref().len() > 100 {
        return Err(ValidationError::new("InvalidArchiveBaseName")
            .with_message("Invalid archive base name, maximum len is 100".into()));
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory")
                .with_message(format!("cannot create or access dir {:?}: {}", dir, e).into())
        })?;
    }
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

/// Accepts a wall-clock time of day as `HH:MM`.
pub fn validate_time_of_day<S: AsRef<str>>(raw: S) -> Result<(), ValidationError> {
    parse_time_of_day(raw.as_ref()).map(|_| ()).map_err(|_| {
        ValidationError::new("InvalidTimeOfDay")
            .with_message(format!("Invalid time of day {:?}, expected HH:MM", raw.as_ref()).into())
    })
}

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_base_name() {
        assert!(validate_archive_base_name("papers-backup").is_ok());
        assert!(validate_archive_base_name("a/b").is_err());
        assert!(validate_archive_base_name("x".repeat(101)).is_err());
    }

    #[test]
    fn test_time_of_day() {
        assert!(validate_time_of_day("02:00").is_ok());
        assert!(validate_time_of_day("23:59").is_ok());
        assert!(validate_time_of_day("24:00").is_err());
        assert!(validate_time_of_day("2am").is_err());
        assert_eq!(
            parse_time_of_day("02:30").unwrap(),
            NaiveTime::from_hms_opt(2, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_writable_dir_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        assert!(validate_writable_dir(&nested).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_writable_dir_rejects_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(validate_writable_dir(tmp.path()).is_err());
    }
}
