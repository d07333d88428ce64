//! Per-entry manifest of every file a generator wrote.
//!
//! The index is the sole deletion authority for a cache entry. Users may
//! drop supplementary files (custom thumbnails, notes) into an entry
//! directory; because removal only ever touches indexed paths, those files
//! survive regeneration and invalidation. No caller deletes a cache-entry
//! directory wholesale.
//!
//! Lifecycle: built in memory while a generator runs, persisted as
//! `file-index.txt` only once the entry is complete. Index absence is the
//! authoritative "incomplete entry" signal (see [`crate::stale`]).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// Manifest filename, stored directly under the entry root.
pub const INDEX_FILE_NAME: &str = "file-index.txt";

#[derive(Debug)]
pub struct FileIndex {
    root: PathBuf,
    entries: Vec<PathBuf>,
}

impl FileIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the on-disk manifest file.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.index_path().is_file()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Indexed paths, relative to the entry root, in registration order.
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn contains(&self, relative: impl AsRef<Path>) -> bool {
        self.entries.iter().any(|e| e == relative.as_ref())
    }

    /// Register a file as belonging to this entry (memory only) and return
    /// its absolute path for the caller to write to.
    pub fn add_file(&mut self, relative: impl Into<PathBuf>) -> PathBuf {
        let relative = relative.into();
        debug!("indexing {}", relative.display());
        let absolute = self.root.join(&relative);
        self.entries.push(relative);
        absolute
    }

    /// Replace the in-memory entries with the on-disk manifest. Blank lines
    /// and `#` comments are skipped.
    pub fn load(&mut self) -> io::Result<()> {
        let text = fs::read_to_string(self.index_path())?;
        self.entries.clear();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.entries.push(PathBuf::from(line));
        }
        Ok(())
    }

    /// Load the manifest if one is on disk; otherwise keep the current state.
    pub fn ensure_loaded(&mut self) -> io::Result<()> {
        if self.exists() {
            self.load()?;
        }
        Ok(())
    }

    /// Persist the manifest atomically (write a sibling temp file, then
    /// rename over the final name).
    pub fn save(&self) -> io::Result<()> {
        let final_path = self.index_path();
        let tmp_path = self.root.join(format!("{INDEX_FILE_NAME}.tmp"));
        {
            let mut file = fs::File::create(&tmp_path)?;
            for entry in &self.entries {
                writeln!(file, "{}", entry.display())?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Delete the manifest file itself.
    pub fn unlink(&self) -> io::Result<()> {
        match fs::remove_file(self.index_path()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Delete every indexed file. Missing files are not an error. With
    /// `cleanup_directories`, also remove now-empty parent directories,
    /// walking upward from each deleted file and stopping at the entry root
    /// or the first non-empty or missing ancestor.
    pub fn unlink_indexed(&self, cleanup_directories: bool) -> io::Result<()> {
        for entry in &self.entries {
            let path = self.root.join(entry);
            warn!("removing indexed file {}", path.display());
            match fs::remove_file(&path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                other => other?,
            }
        }
        if cleanup_directories {
            for entry in &self.entries {
                let mut parent = self.root.join(entry);
                while let Some(dir) = parent.parent().map(Path::to_path_buf) {
                    if dir == self.root || !dir.exists() || !dir_is_empty(&dir)? {
                        break;
                    }
                    warn!("removing empty directory {}", dir.display());
                    fs::remove_dir(&dir)?;
                    parent = dir;
                }
            }
        }
        Ok(())
    }
}

fn dir_is_empty(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}
