//! Release packaging
//!
//! Zips the localization folder into a versioned archive under the
//! repository's `.dist/` folder. The version comes from the newest tag that
//! carries a semantic-looking version string, falling back to `1.0.0` for
//! untagged repositories.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::repo::RepositoryManager;

const FALLBACK_VERSION: &str = "1.0.0";

/// Version string from the most recent tag, by tagged-commit time.
/// Repositories without a matching tag report `1.0.0`.
pub fn latest_release_version(manager: &RepositoryManager) -> Result<String> {
    let pattern = Regex::new(r"(\d+\.\d+\.\d+)").context("invalid version pattern")?;
    let repo = manager.repo();

    let mut newest: Option<(i64, String)> = None;
    let references = repo.references_glob("refs/tags/*")?;
    for reference in references.flatten() {
        let Some(name) = reference.shorthand().map(str::to_string) else {
            continue;
        };
        let Some(version) = pattern.find(&name).map(|m| m.as_str().to_string()) else {
            debug!(tag = name, "tag carries no version, skipping");
            continue;
        };
        let Ok(commit) = reference.peel_to_commit() else {
            continue;
        };
        let time = commit.time().seconds();
        if newest.as_ref().is_none_or(|(t, _)| time > *t) {
            newest = Some((time, version));
        }
    }

    match newest {
        Some((_, version)) => Ok(version),
        None => {
            warn!("no version tag found, using {FALLBACK_VERSION}");
            Ok(FALLBACK_VERSION.to_string())
        }
    }
}

/// Zip the localization folder into `.dist/<name> v<version>.zip` and return
/// the archive path. An existing archive with the same name is replaced.
pub fn package_localization(manager: &RepositoryManager, version: &str) -> Result<PathBuf> {
    let source = manager.localization_dir();
    if !source.is_dir() {
        bail!(
            "localization folder not found at {}; nothing to package",
            source.display()
        );
    }

    let name = manager
        .display_name()
        .unwrap_or_else(|| "localization".to_string());
    let dist = manager.dist_dir();
    fs::create_dir_all(&dist)
        .with_context(|| format!("failed to create {}", dist.display()))?;
    let archive_path = dist.join(format!("{name} v{version}.zip"));
    if archive_path.exists() {
        fs::remove_file(&archive_path)
            .with_context(|| format!("failed to replace {}", archive_path.display()))?;
    }

    let file = fs::File::create(&archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries = 0usize;
    for entry in WalkDir::new(&source).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&source)
            .context("walked path escaped the localization folder")?;
        // Zip entry names always use forward slashes.
        let entry_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(&entry_name, options)
            .with_context(|| format!("failed to start archive entry {entry_name}"))?;
        let mut source_file = fs::File::open(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        let mut buffer = Vec::new();
        source_file.read_to_end(&mut buffer)?;
        zip.write_all(&buffer)?;
        entries += 1;
    }
    zip.finish().context("failed to finalize archive")?;

    info!(entries, path = %archive_path.display(), "packaged localization");
    Ok(archive_path)
}
