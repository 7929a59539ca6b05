// ZIP file handling for bugreports produced by `adb bugreport`.
// The archive holds the dumpstate text plus a pile of side files (proto
// dumps, dumpstate_log.txt, version.txt); only the main text is wanted.

use std::io::{Cursor, Read, Seek};

use zip::ZipArchive;

/// Checks if the given bytes represent a ZIP file by examining the magic bytes
pub fn is_zip_file(data: &[u8]) -> bool {
    // ZIP files start with PK\x03\x04 (0x50 0x4B 0x03 0x04)
    data.len() >= 4 && data[0] == 0x50 && data[1] == 0x4B && data[2] == 0x03 && data[3] == 0x04
}

pub fn extract_bugreport_from_zip_bytes(zip_data: &[u8]) -> Result<Vec<u8>, String> {
    let mut archive = ZipArchive::new(Cursor::new(zip_data)).map_err(|e| e.to_string())?;
    extract_bugreport_from_archive(&mut archive)
}

fn base_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_lowercase()
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, index: usize) -> Result<Vec<u8>, String> {
    let mut file = archive.by_index(index).map_err(|e| e.to_string())?;
    tracing::info!("Reading bugreport entry: {}", file.name());
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents).map_err(|e| e.to_string())?;
    Ok(contents)
}

fn find_entry<R: Read + Seek, F: Fn(&str) -> bool>(
    archive: &mut ZipArchive<R>,
    predicate: F,
) -> Option<usize> {
    (0..archive.len()).find(|&i| {
        archive
            .by_index(i)
            .map(|file| predicate(&base_name(file.name())))
            .unwrap_or(false)
    })
}

/// Picks the main bugreport text out of the archive.
///
/// 1. the entry named inside `main_entry.txt`
/// 2. `bugreport-*.txt`
/// 3. `dumpstate.txt` / `dumpstate-*.txt` (never `dumpstate_log.txt`)
fn extract_bugreport_from_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<u8>, String> {
    if let Some(index) = find_entry(archive, |name| name == "main_entry.txt") {
        let pointer = read_entry(archive, index)?;
        let target = String::from_utf8_lossy(&pointer).trim().to_lowercase();
        if !target.is_empty() {
            let target = base_name(&target);
            if let Some(index) = find_entry(archive, |name| name == target) {
                return read_entry(archive, index);
            }
            tracing::warn!("main_entry.txt names {} but the archive has no such entry", target);
        }
    }

    if let Some(index) = find_entry(archive, |name| {
        name.starts_with("bugreport-") && name.ends_with(".txt")
    }) {
        return read_entry(archive, index);
    }

    if let Some(index) = find_entry(archive, |name| {
        (name == "dumpstate.txt" || name.starts_with("dumpstate-")) && name.ends_with(".txt")
    }) {
        return read_entry(archive, index);
    }

    Err("no bugreport text found in the archive".to_string())
}
