//! Zip archives of workspace folders.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::tempfile;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::Config;
use crate::error::GatewayError;

/// Size caps for a single archive. Zero disables a cap.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_bytes: u64,
    pub max_entries: u64,
}

impl ArchiveLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_bytes: config.max_zip_bytes,
            max_entries: config.max_zip_entries,
        }
    }
}

enum Entry {
    Dir(String),
    File { name: String, path: PathBuf },
}

/// Zip `dir` into a temporary file, with entry names relative to `dir`.
///
/// Returns the rewound file and its size. The archive lives on disk so large
/// folders are never buffered in memory.
pub async fn zip_directory(
    dir: PathBuf,
    limits: ArchiveLimits,
) -> Result<(fs::File, u64), GatewayError> {
    let (file, size) = tokio::task::spawn_blocking(move || zip_directory_blocking(&dir, limits))
        .await
        .map_err(|err| GatewayError::Io(std::io::Error::other(err.to_string())))??;

    Ok((fs::File::from_std(file), size))
}

fn zip_directory_blocking(
    dir: &Path,
    limits: ArchiveLimits,
) -> Result<(std::fs::File, u64), GatewayError> {
    let entries = collect_entries(dir, limits)?;

    let mut zip = ZipWriter::new(tempfile()?);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in &entries {
        match entry {
            Entry::Dir(name) => {
                zip.add_directory(name.as_str(), options)
                    .map_err(zip_error)?;
            }
            Entry::File { name, path } => {
                let mut input = match std::fs::File::open(path) {
                    Ok(input) => input,
                    // Deleted since the walk.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                zip.start_file(name.as_str(), options).map_err(zip_error)?;
                std::io::copy(&mut input, &mut zip)?;
            }
        }
    }

    let mut file = zip.finish().map_err(zip_error)?;
    file.flush()?;

    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    debug!(
        "Zipped {} ({} entries, {} bytes)",
        dir.display(),
        entries.len(),
        size
    );

    Ok((file, size))
}

/// Walk `dir` without following symlinks, enforcing `limits` as we go.
fn collect_entries(dir: &Path, limits: ArchiveLimits) -> Result<Vec<Entry>, GatewayError> {
    let mut entries = Vec::new();
    let mut total_bytes = 0u64;
    let mut total_files = 0u64;

    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let Some(name) = relative_name(dir, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            entries.push(Entry::Dir(format!("{name}/")));
        } else if entry.file_type().is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            total_files = total_files.saturating_add(1);
            total_bytes = total_bytes.saturating_add(size);

            if limits.max_entries > 0 && total_files > limits.max_entries {
                return Err(GatewayError::ArchiveTooManyEntries {
                    entries: total_files,
                    limit: limits.max_entries,
                });
            }
            if limits.max_bytes > 0 && total_bytes > limits.max_bytes {
                return Err(GatewayError::ArchiveTooLarge {
                    size: total_bytes,
                    limit: limits.max_bytes,
                });
            }

            entries.push(Entry::File {
                name,
                path: entry.into_path(),
            });
        }
    }

    Ok(entries)
}

fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn zip_error(error: zip::result::ZipError) -> GatewayError {
    GatewayError::Io(std::io::Error::other(error.to_string()))
}
