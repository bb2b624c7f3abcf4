//! Archive extraction.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use crate::error::{BazaarError, Result};

/// Unpacks a package archive into a directory.
///
/// Implementations block; callers run them on the blocking pool.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract every entry of `archive` below `dest`, creating it if needed.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// [`ArchiveExtractor`] for zip archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ZipExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        fs::create_dir_all(dest)?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            // Entries escaping `dest` (absolute paths, `..`) are refused.
            let relative = entry.enclosed_name().ok_or_else(|| {
                BazaarError::Archive(format!("unsafe entry path: {}", entry.name()))
            })?;
            let target = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }

        debug!("Extracted {} entries to {:?}", zip.len(), dest);
        Ok(())
    }
}
