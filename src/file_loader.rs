// File loading utilities with ZIP support
// Bugreports come either as the plain dumpstate text or as the zip produced
// by `adb bugreport`; both end up as one in-memory byte buffer.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::info;

use crate::error::{BugreportError, Result};
use crate::zip_utils;

/// Loads a file into memory, extracting the main bugreport entry if it's a ZIP.
///
/// # Returns
/// * `Ok((Arc<[u8]>, bool))` - The file content and whether it was extracted from ZIP
/// * `Err` - If the file cannot be read or the archive has no bugreport in it
pub fn load_bugreport_file(file_path: &Path) -> Result<(Arc<[u8]>, bool)> {
    let file = File::open(file_path).map_err(|e| BugreportError::io(file_path, e))?;
    let file_size = file
        .metadata()
        .map_err(|e| BugreportError::io(file_path, e))?
        .len();

    if file_size == 0 {
        return Ok((Arc::from(Vec::new()), false));
    }

    // SAFETY: The file is not modified while the map is open
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| BugreportError::io(file_path, e))?;

    if zip_utils::is_zip_file(&mmap) {
        info!("Detected ZIP file, extracting the bugreport text...");

        let content = zip_utils::extract_bugreport_from_zip_bytes(&mmap).map_err(|message| {
            BugreportError::Archive {
                path: file_path.to_path_buf(),
                message,
            }
        })?;

        info!(
            "Extracted bugreport: {:.2} MB (original ZIP: {:.2} MB)",
            content.len() as f64 / 1_048_576.0,
            file_size as f64 / 1_048_576.0
        );

        Ok((Arc::from(content), true))
    } else {
        info!(
            "Loading plain text file {}: {:.2} MB",
            file_path.display(),
            file_size as f64 / 1_048_576.0
        );
        Ok((Arc::from(&mmap[..]), false))
    }
}
