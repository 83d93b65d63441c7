//! File-based persistence: JSON position snapshots and a JSON Lines ledger.
//!
//! Snapshots are replaced atomically: the new content is written to a
//! temporary file in the same directory and renamed over the old one, so a
//! crash leaves either the previous or the new snapshot, never a torn one.
//!
//! The ledger is one [`LedgerEntry`] per line (`.jsonl`), appended after a
//! successful run.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::ledger::{DailyLedger, LedgerEntry};
use crate::portfolio::{PositionBook, Snapshot};

/// Atomically write `bytes` to `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

impl PositionBook {
    /// Load and validate a JSON snapshot.
    pub fn load_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&text)?;
        Self::load(snapshot)
    }

    /// Write the book as a pretty-printed JSON snapshot, atomically.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(&self.to_snapshot())?;
        json.push(b'\n');
        write_atomic(path, &json)
    }
}

/// Append entries to a JSON Lines ledger file, creating it if needed.
pub fn append_entries(entries: &[LedgerEntry], path: &Path) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    // Serialize everything first so a bad entry appends nothing.
    let mut buf = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

/// Load entries from a JSON Lines ledger file.
///
/// Empty lines are skipped.
pub fn load_entries(path: &Path) -> Result<Vec<LedgerEntry>> {
    let file = fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: LedgerEntry = serde_json::from_str(line).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}:{}: {}", path.display(), line_num + 1, e),
            )
        })?;
        entries.push(entry);
    }

    Ok(entries)
}

impl DailyLedger {
    /// Load a ledger file. A missing file is an empty ledger.
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Self::from_entries(load_entries(path)?)
    }
}
