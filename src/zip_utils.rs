// ZIP file handling utilities
// Finds the dumpstate text among the entries of a bugreport archive.

use std::io::{Cursor, Read, Seek};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::{BugreportError, Result};

/// Fallback entries smaller than this are not taken for a dumpstate.
const MIN_FALLBACK_SIZE: u64 = 100_000;

/// Checks if the given bytes represent a ZIP file by examining the magic bytes
pub fn is_zip_file(data: &[u8]) -> bool {
    // PK\x03\x04
    data.starts_with(&[0x50, 0x4B, 0x03, 0x04])
}

pub fn extract_dumpstate_from_zip<R: Read + Seek>(reader: R) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(reader)?;
    extract_dumpstate_from_archive(&mut archive)
}

pub fn extract_dumpstate_from_zip_bytes(zip_data: &[u8]) -> Result<Vec<u8>> {
    extract_dumpstate_from_zip(Cursor::new(zip_data))
}

/// Base name of an entry, lowercased.
fn file_name(entry: &str) -> String {
    entry.rsplit('/').next().unwrap_or(entry).to_lowercase()
}

fn is_dumpstate_log(name: &str) -> bool {
    name.contains("dumpstate_log") || name.contains("dumpstate_debug")
}

fn is_plain_dumpstate(name: &str) -> bool {
    name == "dumpstate.txt"
}

fn is_dated_dumpstate(name: &str) -> bool {
    name.starts_with("dumpstate-") && name.ends_with(".txt")
}

fn is_bugreport_text(name: &str) -> bool {
    name.starts_with("bugreport-") && name.ends_with(".txt")
}

/// Entry name predicates, in order of preference.
const PASSES: [(&str, fn(&str) -> bool); 3] = [
    ("dumpstate.txt", is_plain_dumpstate),
    ("dumpstate-*.txt", is_dated_dumpstate),
    ("bugreport-*.txt", is_bugreport_text),
];

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, index: usize) -> Result<Vec<u8>> {
    let mut file = archive.by_index(index)?;
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn extract_dumpstate_from_archive<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<u8>> {
    for (pattern, accepts) in PASSES {
        for i in 0..archive.len() {
            let name = archive.by_index(i)?.name().to_string();
            let base = file_name(&name);
            if accepts(&base) && !is_dumpstate_log(&base) {
                info!(entry = %name, pattern, "found the dumpstate");
                return read_entry(archive, i);
            }
        }
    }

    // Any large .txt file, preferring the root level then the larger one
    let mut candidates: Vec<(usize, u64, usize)> = Vec::new();
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        let name = file.name();
        if name.ends_with(".txt") && file.size() > MIN_FALLBACK_SIZE && !is_dumpstate_log(&file_name(name)) {
            candidates.push((i, file.size(), name.matches('/').count()));
        }
    }
    candidates.sort_by(|a, b| a.2.cmp(&b.2).then(b.1.cmp(&a.1)));

    if let Some(&(index, _, _)) = candidates.first() {
        let name = archive.by_index(index)?.name().to_string();
        warn!("Using {} as dumpstate (couldn't find dumpstate.txt)", name);
        return read_entry(archive, index);
    }

    Err(BugreportError::Archive(format!(
        "could not find a dumpstate among {} ZIP entries",
        archive.len()
    )))
}
