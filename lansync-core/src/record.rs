//! File records and the flat directory scan behind a listing.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::integrity;
use crate::protocol::validate_filename;

/// Hash and size of one shared file. The filename is the key in [`Listing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    pub size: u64,
}

/// Snapshot of a shared directory: filename -> record, ordered by name.
pub type Listing = BTreeMap<String, FileRecord>;

/// Result of one directory scan. Entries that could not be read are reported, not fatal.
#[derive(Debug, Default)]
pub struct Scan {
    pub records: Listing,
    pub skipped: Vec<(String, io::Error)>,
}

/// Scan `dir` (non-recursive): every regular file without the staging marker gets a record.
/// Fails only if the directory itself cannot be read.
pub fn scan_directory(dir: &Path, block_size: u64) -> io::Result<Scan> {
    let mut scan = Scan::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                scan.skipped.push((String::new(), e));
                continue;
            }
        };
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            // Not representable on the wire.
            Err(_) => continue,
        };
        // Staging files, and names a peer could never request.
        if validate_filename(&name).is_err() {
            continue;
        }
        let path = entry.path();
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            // Removed between read_dir and stat.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                scan.skipped.push((name, e));
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        match integrity::hash_file(&path, block_size) {
            Ok(hash) if integrity::is_absent(&hash) => continue,
            Ok(hash) => {
                scan.records.insert(
                    name,
                    FileRecord {
                        hash,
                        size: meta.len(),
                    },
                );
            }
            Err(e) => scan.skipped.push((name, e)),
        }
    }
    Ok(scan)
}
