//! Archive fallback transport: branch snapshots downloaded as zip files.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::plugin::error::RepositoryError;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

static GITHUB_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://(?:www\.)?github\.com/|git@github\.com:|ssh://git@github\.com/)([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$",
    )
    .expect("valid github repository regex")
});

/// Archive endpoint for `branch` of `repo_url`, when the host is one whose
/// urls we know how to rewrite.
pub fn archive_url(repo_url: &str, branch: &str) -> Option<String> {
    let caps = GITHUB_REPO_RE.captures(repo_url.trim())?;
    Some(format!(
        "https://github.com/{}/{}/archive/refs/heads/{branch}.zip",
        &caps[1], &caps[2]
    ))
}

pub trait ArchiveDownloader {
    /// Download `url` into the file at `dest`, replacing its contents.
    fn download(&self, url: &str, dest: &Path) -> Result<(), RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct HttpArchive {
    timeout: Duration,
}

impl Default for HttpArchive {
    fn default() -> Self {
        Self {
            timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

impl ArchiveDownloader for HttpArchive {
    fn download(&self, url: &str, dest: &Path) -> Result<(), RepositoryError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("plugin-manager/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()
            .map_err(|e| RepositoryError::ArchiveDownload(format!("http client: {e}")))?;

        tracing::debug!(%url, "downloading archive");
        let mut response = client
            .get(url)
            .send()
            .map_err(|e| RepositoryError::ArchiveDownload(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(RepositoryError::ArchiveDownload(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let mut file = File::create(dest).map_err(|e| {
            RepositoryError::ArchiveDownload(format!("{}: {e}", dest.display()))
        })?;
        response
            .copy_to(&mut file)
            .map_err(|e| RepositoryError::ArchiveDownload(format!("{url}: {e}")))?;

        Ok(())
    }
}

/// Extract a provider archive into `target`, dropping the single top-level
/// directory every entry is wrapped in. Returns the number of files written.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<usize, RepositoryError> {
    let extract_err = RepositoryError::ArchiveExtract;

    let file = File::open(archive_path)
        .map_err(|e| extract_err(format!("{}: {e}", archive_path.display())))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| extract_err(format!("not a zip archive: {e}")))?;

    fs::create_dir_all(target)
        .map_err(|e| extract_err(format!("failed to create {}: {e}", target.display())))?;

    let mut written = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| extract_err(format!("failed to read entry {index}: {e}")))?;

        let Some(entry_path) = entry.enclosed_name() else {
            return Err(extract_err(format!(
                "entry escapes archive root: {}",
                entry.name()
            )));
        };

        let relative = strip_first_component(&entry_path);
        if relative.as_os_str().is_empty() {
            // The wrapper directory itself, or a stray top-level file.
            continue;
        }
        let out_path = target.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| extract_err(format!("failed to create {}: {e}", out_path.display())))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| extract_err(format!("failed to create {}: {e}", parent.display())))?;
        }
        let mut out = File::create(&out_path)
            .map_err(|e| extract_err(format!("failed to create {}: {e}", out_path.display())))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| extract_err(format!("failed to write {}: {e}", out_path.display())))?;
        written += 1;
    }

    Ok(written)
}

/// `repo-main/src/lib.py` -> `src/lib.py`
fn strip_first_component(path: &Path) -> PathBuf {
    path.components()
        .skip(1)
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect()
}
