//! Repository acquisition: a shallow git clone, falling back to a branch
//! archive download when git is missing or the clone fails.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plugin::archive::{ArchiveDownloader, HttpArchive, archive_url, extract_archive};
use crate::plugin::error::{ProcessError, RepositoryError};
use crate::plugin::process::{CommandRunner, Invocation, SystemRunner};

/// Timeout for git clone operations (5 minutes).
const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);

pub trait SourceControl {
    /// Whether the client exists on this host at all.
    fn is_available(&self) -> bool;

    /// Clone `branch` of `url` at depth 1 into `target`, which does not exist.
    fn shallow_clone(&self, url: &str, branch: &str, target: &Path)
    -> Result<(), RepositoryError>;
}

/// The `git` binary found on `PATH`.
pub struct GitCli {
    binary: Option<PathBuf>,
    runner: Box<dyn CommandRunner>,
    timeout: Duration,
}

impl GitCli {
    pub fn detect() -> Self {
        let binary = which::which("git").ok();
        match binary.as_ref() {
            Some(path) => tracing::debug!("using git at {}", path.display()),
            None => tracing::info!("git not found on PATH, archive downloads only"),
        }
        Self::with_runner(binary, Box::new(SystemRunner))
    }

    pub fn with_runner(binary: Option<PathBuf>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            binary,
            runner,
            timeout: GIT_CLONE_TIMEOUT,
        }
    }
}

impl SourceControl for GitCli {
    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    fn shallow_clone(
        &self,
        url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<(), RepositoryError> {
        let Some(binary) = self.binary.as_ref() else {
            return Err(RepositoryError::CloneUnavailable);
        };

        let invocation = Invocation::new(binary.to_string_lossy(), self.timeout)
            .args(["clone", "--branch", branch, "--depth", "1", "--", url])
            .args([target.to_string_lossy()])
            // Fail fast instead of hanging on a credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");

        let output = self.runner.run(&invocation).map_err(|err| match err {
            ProcessError::TimedOut { timeout, .. } => RepositoryError::CloneTimedOut(timeout),
            other => RepositoryError::CloneFailed(other.to_string()),
        })?;

        if output.success {
            Ok(())
        } else {
            Err(RepositoryError::CloneFailed(format!(
                "{}: {}",
                output.status, output.stderr
            )))
        }
    }
}

/// Which transport produced the installed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Clone,
    Archive,
}

pub struct RepositoryFetcher {
    git: Box<dyn SourceControl>,
    archives: Box<dyn ArchiveDownloader>,
}

impl RepositoryFetcher {
    pub fn new(git: Box<dyn SourceControl>, archives: Box<dyn ArchiveDownloader>) -> Self {
        Self { git, archives }
    }

    pub fn from_host() -> Self {
        Self::new(Box::new(GitCli::detect()), Box::new(HttpArchive::default()))
    }

    /// Replace whatever is at `target` with `branch` of `url`.
    pub fn fetch(
        &self,
        url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<FetchSource, RepositoryError> {
        let primary = if self.git.is_available() {
            println!("  [DOWNLOAD] Cloning {url} (branch: {branch})");
            match self.clone_into(url, branch, target) {
                Ok(()) => return Ok(FetchSource::Clone),
                Err(err) => {
                    tracing::warn!(%url, %branch, "clone failed: {err}");
                    err
                }
            }
        } else {
            RepositoryError::CloneUnavailable
        };

        println!("  [FALLBACK] {primary}, trying archive download...");
        match self.download_into(url, branch, target) {
            Ok(files) => {
                tracing::info!(%url, %branch, files, "extracted archive into {}", target.display());
                Ok(FetchSource::Archive)
            }
            Err(fallback) => {
                tracing::warn!(%url, %branch, "archive fallback failed: {fallback}");
                Err(RepositoryError::Exhausted {
                    primary: Box::new(primary),
                    fallback: Box::new(fallback),
                })
            }
        }
    }

    fn clone_into(&self, url: &str, branch: &str, target: &Path) -> Result<(), RepositoryError> {
        reset_target(target).map_err(|e| {
            RepositoryError::CloneFailed(format!("failed to clear {}: {e}", target.display()))
        })?;

        self.git.shallow_clone(url, branch, target)?;

        let git_dir = target.join(".git");
        if git_dir.exists() {
            match fs::remove_dir_all(&git_dir) {
                Ok(()) => tracing::debug!("removed {}", git_dir.display()),
                Err(err) => tracing::warn!("could not remove {}: {err}", git_dir.display()),
            }
        }

        Ok(())
    }

    fn download_into(
        &self,
        url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<usize, RepositoryError> {
        let Some(archive) = archive_url(url, branch) else {
            return Err(RepositoryError::ArchiveUnsupported(url.to_string()));
        };

        println!("  [ARCHIVE] Downloading {archive}");
        // Removed on drop, whether or not extraction succeeds.
        let tmp = tempfile::Builder::new()
            .prefix("plugin-archive-")
            .suffix(".zip")
            .tempfile()
            .map_err(|e| RepositoryError::ArchiveDownload(format!("temp file: {e}")))?;

        self.archives.download(&archive, tmp.path())?;

        reset_target(target).map_err(|e| {
            RepositoryError::ArchiveExtract(format!("failed to clear {}: {e}", target.display()))
        })?;
        extract_archive(tmp.path(), target)
    }
}

/// Remove `target` if present and make sure its parent exists.
fn reset_target(target: &Path) -> io::Result<()> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plugin::archive::tests::write_zip;
    use crate::plugin::process::CommandOutput;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Clone behaviour for fake git clients.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum CloneMode {
        Missing,
        Fails,
        Writes,
        /// Reports success without producing a checkout.
        Phantom,
    }

    pub(crate) struct FakeGit {
        pub(crate) mode: CloneMode,
        pub(crate) calls: Rc<RefCell<Vec<(String, String)>>>,
    }

    impl FakeGit {
        pub(crate) fn new(mode: CloneMode) -> Self {
            Self {
                mode,
                calls: Rc::default(),
            }
        }
    }

    impl SourceControl for FakeGit {
        fn is_available(&self) -> bool {
            !matches!(self.mode, CloneMode::Missing)
        }

        fn shallow_clone(
            &self,
            url: &str,
            branch: &str,
            target: &Path,
        ) -> Result<(), RepositoryError> {
            self.calls
                .borrow_mut()
                .push((url.to_string(), branch.to_string()));
            match self.mode {
                CloneMode::Missing => Err(RepositoryError::CloneUnavailable),
                CloneMode::Fails => {
                    // A failed clone can leave a partial checkout behind.
                    fs::create_dir_all(target).unwrap();
                    fs::write(target.join("partial"), "").unwrap();
                    Err(RepositoryError::CloneFailed("exit status: 128".to_string()))
                }
                CloneMode::Writes => {
                    fs::create_dir_all(target.join(".git/objects")).unwrap();
                    fs::write(target.join("plugin.py"), branch).unwrap();
                    Ok(())
                }
                CloneMode::Phantom => Ok(()),
            }
        }
    }

    /// Serves a fixed zip snapshot, or fails every download.
    pub(crate) struct FakeArchive {
        pub(crate) entries: Option<Vec<(&'static str, &'static str)>>,
        pub(crate) requests: Rc<RefCell<Vec<String>>>,
    }

    impl FakeArchive {
        pub(crate) fn serving(entries: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                entries: Some(entries),
                requests: Rc::default(),
            }
        }

        pub(crate) fn offline() -> Self {
            Self {
                entries: None,
                requests: Rc::default(),
            }
        }
    }

    impl ArchiveDownloader for FakeArchive {
        fn download(&self, url: &str, dest: &Path) -> Result<(), RepositoryError> {
            self.requests.borrow_mut().push(url.to_string());
            match self.entries.as_ref() {
                Some(entries) => {
                    write_zip(dest, entries);
                    Ok(())
                }
                None => Err(RepositoryError::ArchiveDownload(format!(
                    "{url} returned 404 Not Found"
                ))),
            }
        }
    }

    const GITHUB_URL: &str = "https://github.com/acme/radionics.git";

    fn snapshot() -> Vec<(&'static str, &'static str)> {
        vec![
            ("radionics-main/", ""),
            ("radionics-main/plugin.py", "from archive"),
        ]
    }

    #[test]
    fn clone_replaces_target_and_drops_git_metadata() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("plugins/radionics");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.txt"), "old").unwrap();

        let fetcher = RepositoryFetcher::new(
            Box::new(FakeGit::new(CloneMode::Writes)),
            Box::new(FakeArchive::offline()),
        );
        let source = fetcher.fetch(GITHUB_URL, "main", &target).unwrap();

        assert_eq!(source, FetchSource::Clone);
        assert!(target.join("plugin.py").is_file());
        assert!(!target.join("stale.txt").exists());
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn missing_git_goes_straight_to_archive() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("plugins/radionics");
        let git = FakeGit::new(CloneMode::Missing);
        let git_calls = git.calls.clone();
        let archive = FakeArchive::serving(snapshot());
        let requests = archive.requests.clone();

        let fetcher = RepositoryFetcher::new(Box::new(git), Box::new(archive));
        let source = fetcher.fetch(GITHUB_URL, "main", &target).unwrap();

        assert_eq!(source, FetchSource::Archive);
        assert!(git_calls.borrow().is_empty());
        assert_eq!(
            *requests.borrow(),
            ["https://github.com/acme/radionics/archive/refs/heads/main.zip"]
        );
        assert_eq!(
            fs::read_to_string(target.join("plugin.py")).unwrap(),
            "from archive"
        );
    }

    #[test]
    fn failed_clone_falls_back_and_clears_partial_checkout() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("radionics");

        let fetcher = RepositoryFetcher::new(
            Box::new(FakeGit::new(CloneMode::Fails)),
            Box::new(FakeArchive::serving(snapshot())),
        );
        let source = fetcher.fetch(GITHUB_URL, "main", &target).unwrap();

        assert_eq!(source, FetchSource::Archive);
        assert!(target.join("plugin.py").is_file());
        assert!(!target.join("partial").exists());
    }

    #[test]
    fn unsupported_host_reports_both_stages() {
        let dir = TempDir::new().unwrap();
        let archive = FakeArchive::serving(snapshot());
        let requests = archive.requests.clone();
        let fetcher =
            RepositoryFetcher::new(Box::new(FakeGit::new(CloneMode::Fails)), Box::new(archive));

        let err = fetcher
            .fetch("https://gitlab.com/acme/radionics.git", "main", &dir.path().join("r"))
            .unwrap_err();

        let RepositoryError::Exhausted { primary, fallback } = &err else {
            panic!("expected exhausted transports, got {err:?}");
        };
        assert!(matches!(**primary, RepositoryError::CloneFailed(_)));
        assert!(matches!(**fallback, RepositoryError::ArchiveUnsupported(_)));
        assert!(requests.borrow().is_empty());
        assert!(err.to_string().contains("git clone failed"));
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn download_failure_is_distinguished_from_unavailable_clone() {
        let dir = TempDir::new().unwrap();
        let fetcher = RepositoryFetcher::new(
            Box::new(FakeGit::new(CloneMode::Missing)),
            Box::new(FakeArchive::offline()),
        );

        let err = fetcher
            .fetch(GITHUB_URL, "main", &dir.path().join("r"))
            .unwrap_err();

        let RepositoryError::Exhausted { primary, fallback } = err else {
            panic!("expected exhausted transports");
        };
        assert!(matches!(*primary, RepositoryError::CloneUnavailable));
        assert!(matches!(*fallback, RepositoryError::ArchiveDownload(_)));
    }

    struct ScriptedRunner {
        result: fn() -> Result<CommandOutput, ProcessError>,
        seen: Rc<RefCell<Vec<Invocation>>>,
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
            self.seen.borrow_mut().push(invocation.clone());
            (self.result)()
        }
    }

    #[test]
    fn git_cli_builds_shallow_branch_clone() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let git = GitCli::with_runner(
            Some(PathBuf::from("git")),
            Box::new(ScriptedRunner {
                result: || {
                    Ok(CommandOutput {
                        success: true,
                        status: "exit status: 0".to_string(),
                        stderr: String::new(),
                    })
                },
                seen: seen.clone(),
            }),
        );

        git.shallow_clone(GITHUB_URL, "dev", Path::new("plugins/radionics"))
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(
            seen[0].args,
            [
                "clone",
                "--branch",
                "dev",
                "--depth",
                "1",
                "--",
                GITHUB_URL,
                "plugins/radionics"
            ]
        );
        assert_eq!(seen[0].timeout, GIT_CLONE_TIMEOUT);
    }

    #[test]
    fn option_like_urls_stay_positional() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let git = GitCli::with_runner(
            Some(PathBuf::from("git")),
            Box::new(ScriptedRunner {
                result: || {
                    Ok(CommandOutput {
                        success: true,
                        status: "exit status: 0".to_string(),
                        stderr: String::new(),
                    })
                },
                seen: seen.clone(),
            }),
        );

        git.shallow_clone("--upload-pack=touch pwned", "main", Path::new("x"))
            .unwrap();

        let seen = seen.borrow();
        let separator = seen[0].args.iter().position(|arg| arg == "--").unwrap();
        let url = seen[0]
            .args
            .iter()
            .position(|arg| arg.starts_with("--upload-pack"))
            .unwrap();
        assert!(separator < url);
    }

    #[test]
    fn git_cli_maps_timeout_and_exit_failures() {
        let timed_out = GitCli::with_runner(
            Some(PathBuf::from("git")),
            Box::new(ScriptedRunner {
                result: || {
                    Err(ProcessError::TimedOut {
                        program: "git".to_string(),
                        timeout: GIT_CLONE_TIMEOUT,
                    })
                },
                seen: Rc::default(),
            }),
        );
        assert!(matches!(
            timed_out.shallow_clone(GITHUB_URL, "main", Path::new("x")),
            Err(RepositoryError::CloneTimedOut(_))
        ));

        let rejected = GitCli::with_runner(
            Some(PathBuf::from("git")),
            Box::new(ScriptedRunner {
                result: || {
                    Ok(CommandOutput {
                        success: false,
                        status: "exit status: 128".to_string(),
                        stderr: "Remote branch dev not found".to_string(),
                    })
                },
                seen: Rc::default(),
            }),
        );
        let err = rejected
            .shallow_clone(GITHUB_URL, "dev", Path::new("x"))
            .unwrap_err();
        assert!(err.to_string().contains("Remote branch dev not found"));

        let missing = GitCli::with_runner(None, Box::new(SystemRunner));
        assert!(!missing.is_available());
    }
}
