use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use retouch_contracts::batch::BatchJob;
use retouch_contracts::blob::ImageBlob;
use retouch_contracts::errors::InputError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DOWNLOAD_PREFIX: &str = "retouch-";
pub const DEFAULT_ARCHIVE_NAME: &str = "retouch-batch.zip";

pub fn download_name(image: &ImageBlob) -> String {
    format!("{DOWNLOAD_PREFIX}{}", image.file_name())
}

/// Archive entry name for the output at `index` (0-based) of a batch.
pub fn archive_entry_name(index: usize, image: &ImageBlob) -> String {
    format!("{}-{}", index + 1, image.file_name())
}

/// Writes `image` into `dir` as `retouch-<name>` and returns the path.
pub fn save_image(image: &ImageBlob, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(download_name(image));
    fs::write(&path, image.bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Bundles every produced batch output into one zip archive at `path`.
///
/// Refuses with [`InputError::NothingToDownload`] when there is nothing to
/// bundle. The archive is assembled under a temporary name and renamed into
/// place, so a failure never leaves a partial file at `path`.
pub fn write_batch_archive(job: &BatchJob, path: &Path) -> Result<PathBuf> {
    let entries = job.downloadable();
    if entries.is_empty() {
        return Err(InputError::NothingToDownload.into());
    }
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let partial = partial_path(path);
    let written = write_entries(&entries, &partial);
    if let Err(err) = written {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    fs::rename(&partial, path).with_context(|| format!("failed to move archive to {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn write_entries(entries: &[(usize, &ImageBlob)], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (index, image) in entries {
        let name = archive_entry_name(*index, image);
        archive
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed to add {name} to archive"))?;
        archive.write_all(image.bytes())?;
    }
    archive.finish().context("failed to finish archive")?;
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
