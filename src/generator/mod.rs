//! Cache-entry generation pipeline.
//!
//! [`Generator`] supplies the format-specific stages; [`run`] owns the
//! stage sequence and may not be overridden: mark, meta, previews, static
//! preview, animated preview, extras, type marker, cleanup. Every file a
//! stage writes is registered in the entry's [`FileIndex`]; on any stage
//! failure the driver runs cleanup, unwinds the partial entry through the
//! index and propagates the error so the orchestrator can turn it into a
//! problem record without aborting the run.

mod gallery;
mod video;

pub use gallery::GalleryGenerator;
pub use video::VideoGenerator;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use thiserror::Error;

use crate::encoder::EncoderError;
use crate::fileindex::FileIndex;
use crate::imaging::ImagingError;
use crate::probe::ProbeError;
use crate::stale::CACHE_MARKER;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no video stream in {}", .0.display())]
    NoVideoStream(PathBuf),
    #[error("expected {expected} extracted frames, found {actual}")]
    FrameCount { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("metadata serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl GeneratorError {
    /// Stable kind string recorded in problem records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::NoVideoStream(_) => "no-video-stream",
            Self::FrameCount { .. } => "frame-count",
            Self::Io(_) => "io",
            Self::Imaging(_) => "imaging",
            Self::Probe(_) => "probe",
            Self::Encoder(_) => "encoder",
            Self::Json(_) => "json",
        }
    }

    /// The full error chain, one cause per line.
    pub fn trace(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Format-specific stages of one cache entry. Implementations write files
/// only through paths returned by `index.add_file`, so the driver can
/// unwind exactly what was created.
pub trait Generator {
    fn source(&self) -> &Path;
    fn dest(&self) -> &Path;
    /// Name of the `*.type` marker file.
    fn type_marker(&self) -> &'static str;

    fn generate_meta(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError>;
    fn generate_previews(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError>;
    fn generate_static_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError>;
    fn generate_animated_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError>;
    /// Format-specific side artifacts; no-op by default.
    fn generate_extras(&mut self, _index: &mut FileIndex) -> Result<(), GeneratorError> {
        Ok(())
    }
    /// Best-effort removal of scratch/staging directories; no-op by default.
    fn cleanup(&mut self) {}
}

/// Run the full stage sequence for one entry. The sequencing is fixed;
/// variants only implement the stages.
pub fn run(generator: &mut dyn Generator) -> Result<(), GeneratorError> {
    let source = generator.source().to_path_buf();
    let dest = generator.dest().to_path_buf();
    info!("generating cache entry for {}", source.display());
    if !source.exists() {
        return Err(GeneratorError::NotFound(source.display().to_string()));
    }

    // A leftover entry from an earlier run is unwound through its own
    // on-disk index before the clean slate is created.
    if dest.is_dir() {
        remove(&dest)?;
    }
    fs::create_dir_all(&dest)?;

    let mut index = FileIndex::new(&dest);
    match run_stages(generator, &mut index) {
        Ok(()) => {
            generator.cleanup();
            index.save()?;
            Ok(())
        }
        Err(err) => {
            error!(
                "generation failed for {} ({}), unwinding partial entry",
                source.display(),
                err.kind()
            );
            generator.cleanup();
            if let Err(unwind) = index.unlink_indexed(true).and_then(|()| index.unlink()) {
                error!("failed to unwind {}: {unwind}", dest.display());
            }
            let _ = fs::remove_dir(&dest);
            Err(err)
        }
    }
}

fn run_stages(
    generator: &mut dyn Generator,
    index: &mut FileIndex,
) -> Result<(), GeneratorError> {
    debug!("marking {}", generator.dest().display());
    fs::write(index.add_file(CACHE_MARKER), b"")?;
    debug!("generating meta");
    generator.generate_meta(index)?;
    debug!("generating previews");
    generator.generate_previews(index)?;
    debug!("generating static preview");
    generator.generate_static_preview(index)?;
    debug!("generating animated preview");
    generator.generate_animated_preview(index)?;
    debug!("generating extras");
    generator.generate_extras(index)?;
    debug!("writing type marker");
    fs::write(index.add_file(generator.type_marker()), b"")?;
    Ok(())
}

/// Index-driven removal of an on-disk entry not created by this process:
/// delete exactly the indexed files, the manifest, emptied subdirectories
/// and finally the entry root if nothing foreign remains.
pub fn remove(dest: &Path) -> io::Result<()> {
    let mut index = FileIndex::new(dest);
    if index.exists() {
        index.load()?;
        index.unlink_indexed(true)?;
        index.unlink()?;
    }
    match fs::remove_dir(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
            debug!("keeping {} (contains foreign files)", dest.display());
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Recreate a generator-owned scratch directory from scratch.
pub(crate) fn reset_scratch(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    fs::create_dir_all(path)
}

/// Best-effort scratch removal for cleanup stages.
pub(crate) fn discard_scratch(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!("failed to drop scratch {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeGenerator {
        source: PathBuf,
        dest: PathBuf,
        fail_at_previews: bool,
        cleaned: bool,
    }

    impl Generator for FakeGenerator {
        fn source(&self) -> &Path {
            &self.source
        }
        fn dest(&self) -> &Path {
            &self.dest
        }
        fn type_marker(&self) -> &'static str {
            "gallery.type"
        }
        fn generate_meta(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
            fs::write(index.add_file("meta.json"), "{}")?;
            Ok(())
        }
        fn generate_previews(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
            if self.fail_at_previews {
                return Err(GeneratorError::NotFound("no image files".into()));
            }
            let path = index.add_file("previews/1.webp");
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(path, "x")?;
            Ok(())
        }
        fn generate_static_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
            fs::write(index.add_file("preview.webp"), "x")?;
            Ok(())
        }
        fn generate_animated_preview(
            &mut self,
            index: &mut FileIndex,
        ) -> Result<(), GeneratorError> {
            fs::write(index.add_file("animated.webp"), "x")?;
            Ok(())
        }
        fn cleanup(&mut self) {
            self.cleaned = true;
        }
    }

    fn fake(tmp: &TempDir, fail: bool) -> FakeGenerator {
        let source = tmp.path().join("source.mp4");
        fs::write(&source, "x").unwrap();
        FakeGenerator {
            source,
            dest: tmp.path().join("cache/source.mp4"),
            fail_at_previews: fail,
            cleaned: false,
        }
    }

    #[test]
    fn success_leaves_a_complete_indexed_entry() {
        let tmp = TempDir::new().unwrap();
        let mut generator = fake(&tmp, false);
        run(&mut generator).unwrap();

        let dest = &generator.dest;
        for name in ["is-cache", "meta.json", "preview.webp", "animated.webp", "gallery.type"] {
            assert!(dest.join(name).is_file(), "{name}");
        }
        assert!(dest.join("previews/1.webp").is_file());
        assert!(generator.cleaned);

        let mut index = FileIndex::new(dest);
        assert!(index.exists());
        index.load().unwrap();
        assert!(index.contains("is-cache"));
        assert!(index.contains("gallery.type"));
    }

    #[test]
    fn missing_source_fails_before_touching_dest() {
        let tmp = TempDir::new().unwrap();
        let mut generator = fake(&tmp, false);
        fs::remove_file(&generator.source).unwrap();
        let err = run(&mut generator).unwrap_err();
        assert_eq!(err.kind(), "not-found");
        assert!(!generator.dest.exists());
    }

    #[test]
    fn failure_unwinds_partial_entry_and_runs_cleanup() {
        let tmp = TempDir::new().unwrap();
        let mut generator = fake(&tmp, true);
        let err = run(&mut generator).unwrap_err();
        assert_eq!(err.kind(), "not-found");
        assert!(generator.cleaned);
        assert!(!generator.dest.exists(), "partial entry must not remain");
    }

    #[test]
    fn regeneration_replaces_indexed_files_but_keeps_foreign_ones() {
        let tmp = TempDir::new().unwrap();
        let mut generator = fake(&tmp, false);
        run(&mut generator).unwrap();
        let foreign = generator.dest.join("user-note.txt");
        fs::write(&foreign, "keep").unwrap();

        let mut generator = fake(&tmp, false);
        run(&mut generator).unwrap();
        assert!(foreign.is_file());
        assert!(generator.dest.join("meta.json").is_file());
    }

    #[test]
    fn remove_deletes_only_indexed_files() {
        let tmp = TempDir::new().unwrap();
        let mut generator = fake(&tmp, false);
        run(&mut generator).unwrap();
        let foreign = generator.dest.join("user-note.txt");
        fs::write(&foreign, "keep").unwrap();

        remove(&generator.dest).unwrap();
        assert!(foreign.is_file());
        assert!(!generator.dest.join("meta.json").exists());
        assert!(!generator.dest.join(crate::fileindex::INDEX_FILE_NAME).exists());
        assert!(generator.dest.exists(), "non-empty root survives");

        fs::remove_file(&foreign).unwrap();
        remove(&generator.dest).unwrap();
        assert!(!generator.dest.exists());
    }

    #[test]
    fn error_trace_includes_causes() {
        let err = GeneratorError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(err.trace().contains("denied"));
        assert_eq!(err.kind(), "io");
    }
}
