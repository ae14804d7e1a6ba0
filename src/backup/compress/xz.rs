use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::result_error::result::Result;
use liblzma::stream::{Check, MtStreamBuilder};
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use std::num::NonZero;
use validator::Validate;

static DEFAULT_COMPRESSION_LEVEL: u32 = 3;
static DEFAULT_MAX_PARALLELIZATION: usize = 32;

/// Tuning for the XZ (LZMA) artifact compression stage.
///
/// Whether compression happens at all is a policy decision
/// (`BackupSettings::compress_backups`); this only controls how.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct XzConfig {
    /// Compression level (0-9). Higher levels trade CPU for size.
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,

    /// Number of encoder threads. Defaults to half the available cores.
    #[validate(range(min = 1))]
    thread: Option<u32>,
}

impl<W: Write> CompressorBuilder<W> for XzConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let level = self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);

        let thread = self.thread.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZero::get)
                .map(|core| core / 2)
                .map(|t| t.max(1))
                .map(|t| t.min(DEFAULT_MAX_PARALLELIZATION) as u32)
                .unwrap_or(1)
        });

        tracing::debug!("Creating XZ compressor with level={}, threads={}", level, thread);

        if thread == 1 {
            Ok(XzEncoder::new(writer, level).into())
        } else {
            let stream = MtStreamBuilder::new()
                .preset(level)
                .check(Check::Crc64)
                .threads(thread)
                .encoder()?;
            Ok(XzEncoder::new_stream(writer, stream).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_xz_config_default() {
        let config = XzConfig::default();
        assert!(config.level.is_none());
        assert!(config.thread.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_xz_config_invalid_level() {
        let config = XzConfig {
            level: Some(10),
            thread: Some(1),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_xz_config_invalid_thread() {
        let config = XzConfig {
            level: Some(5),
            thread: Some(0),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_compressor_single_thread() {
        let config = XzConfig {
            level: Some(1),
            thread: Some(1),
        };
        let compressor = config.build_compressor(Cursor::new(Vec::new())).unwrap();
        match compressor {
            Compressor::XzEncoder(_) => (),
            _ => panic!("Expected XzEncoder"),
        }
    }

    #[test]
    fn test_build_compressor_auto_thread() {
        let config = XzConfig::default();
        let _compressor = config.build_compressor(Cursor::new(Vec::new())).unwrap();
    }
}
