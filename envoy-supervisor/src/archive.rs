//! Run directory archival

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Path of the archive for `run_dir`: `<parent>/<base>.tar.gz`
pub fn archive_path(run_dir: &Path) -> io::Result<PathBuf> {
    let base = run_dir.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("run directory {} has no base name", run_dir.display()),
        )
    })?;
    let parent = run_dir.parent().unwrap_or_else(|| Path::new("."));
    let mut name = base.to_os_string();
    name.push(".tar.gz");
    Ok(parent.join(name))
}

/// Compress `run_dir` into `<parent>/<base>.tar.gz`, then delete it.
///
/// Entries are stored under `<base>/` so extraction recreates the directory.
/// The directory is only removed once the archive is fully written.
pub fn archive_run_dir(run_dir: &Path) -> io::Result<PathBuf> {
    let target = archive_path(run_dir)?;
    let base = run_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_default();

    let file = File::create(&target)?;
    if let Err(e) = write_archive(file, &base, run_dir) {
        // Never leave a truncated archive next to the directory it failed to capture
        if let Err(cleanup) = std::fs::remove_file(&target) {
            tracing::warn!("Unable to remove partial archive {}: {}", target.display(), cleanup);
        }
        return Err(e);
    }

    std::fs::remove_dir_all(run_dir)?;
    tracing::debug!("Archived {} to {}", run_dir.display(), target.display());
    Ok(target)
}

fn write_archive(file: File, base: &Path, run_dir: &Path) -> io::Result<()> {
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(base, run_dir)?;
    builder.into_inner()?.finish()?.sync_all()
}
