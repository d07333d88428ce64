//! Staleness decisions: is a cache entry missing, incomplete, or older than
//! its source?
//!
//! Timestamps are representative, not raw: a gallery directory's mtime is
//! derived from its child files (bulk downloads often land with near-equal
//! mtimes skewed from the directory itself), and a cache entry's mtime is
//! the newest of its immediate files.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::fileindex::FileIndex;

/// Marker file distinguishing generator-owned directories from
/// coincidentally-named user directories.
pub const CACHE_MARKER: &str = "is-cache";

/// Child-file mtimes within this span of each other collapse to the oldest,
/// tolerating bulk-download timestamp skew.
const MTIME_COLLAPSE_SPAN: Duration = Duration::from_secs(3600);

/// Representative modification time of a source entry.
///
/// Files report their own mtime. Directories report the max of their
/// immediate child-file mtimes, collapsed to the min when all children fall
/// within [`MTIME_COLLAPSE_SPAN`] of each other; an empty directory falls
/// back to its own mtime.
pub fn source_mtime(path: &Path) -> io::Result<SystemTime> {
    let own = fs::metadata(path)?;
    if !own.is_dir() {
        return own.modified();
    }
    let times = child_file_mtimes(path)?;
    let (Some(&min), Some(&max)) = (times.iter().min(), times.iter().max()) else {
        return own.modified();
    };
    let collapsed = max
        .duration_since(min)
        .map(|span| span <= MTIME_COLLAPSE_SPAN)
        .unwrap_or(true);
    Ok(if collapsed { min } else { max })
}

/// Best-effort creation time of a source entry: birth time where the
/// platform provides it, otherwise mtime; for directories, the min across
/// immediate child files.
pub fn source_created(path: &Path) -> io::Result<SystemTime> {
    let own = fs::metadata(path)?;
    if !own.is_dir() {
        return Ok(own.created().or_else(|_| own.modified())?);
    }
    let mut earliest: Option<SystemTime> = None;
    for entry in fs::read_dir(path)? {
        let meta = entry?.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let created = meta.created().or_else(|_| meta.modified())?;
        earliest = Some(earliest.map_or(created, |e| e.min(created)));
    }
    match earliest {
        Some(t) => Ok(t),
        None => Ok(own.created().or_else(|_| own.modified())?),
    }
}

/// Representative modification time of a cache entry: the max mtime among
/// its immediate files, or the directory's own mtime if it holds none.
fn dest_mtime(dest: &Path) -> io::Result<SystemTime> {
    let times = child_file_mtimes(dest)?;
    match times.into_iter().max() {
        Some(t) => Ok(t),
        None => fs::metadata(dest)?.modified(),
    }
}

fn child_file_mtimes(dir: &Path) -> io::Result<Vec<SystemTime>> {
    let mut times = Vec::new();
    for entry in fs::read_dir(dir)? {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            times.push(meta.modified()?);
        }
    }
    Ok(times)
}

/// True when `dest` must be regenerated because it is absent or older than
/// `source`. Fails with [`io::ErrorKind::NotFound`] if the source itself is
/// gone (the caller removes the orphaned entry instead).
pub fn is_deprecated(source: &Path, dest: &Path) -> io::Result<bool> {
    if !source.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source no longer exists: {}", source.display()),
        ));
    }
    if !dest.exists() {
        return Ok(true);
    }
    Ok(source_mtime(source)? > dest_mtime(dest)?)
}

/// True when no file index is present for `dest`. Index absence is the
/// authoritative "not a complete cache entry" signal.
pub fn is_incomplete(dest: &Path) -> bool {
    !FileIndex::new(dest).exists()
}

/// True when the `is-cache` marker exists directly under `dest`.
pub fn is_cache_entry(dest: &Path) -> bool {
    dest.join(CACHE_MARKER).is_file()
}
