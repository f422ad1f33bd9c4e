//! Error types for the install pipeline. Every variant is scoped to a single
//! plugin; none of them abort a batch.

use std::path::PathBuf;
use std::time::Duration;

/// Failure running a host command.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed waiting on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure acquiring a plugin's source tree.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("git client not available on host")]
    CloneUnavailable,

    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("git clone timed out after {0:?}")]
    CloneTimedOut(Duration),

    #[error("archive download not supported for {0}")]
    ArchiveUnsupported(String),

    #[error("archive download failed: {0}")]
    ArchiveDownload(String),

    #[error("archive extraction failed: {0}")]
    ArchiveExtract(String),

    /// Both transports failed; carries the reason from each stage.
    #[error("{primary}; fallback: {fallback}")]
    Exhausted {
        primary: Box<RepositoryError>,
        fallback: Box<RepositoryError>,
    },
}

/// Failure installing declared dependencies or running the host pass.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("no package manager configured for {0} dependencies")]
    UnknownEcosystem(String),

    #[error("{ecosystem} dependency install exited with {status}: {stderr}")]
    Failed {
        ecosystem: String,
        status: String,
        stderr: String,
    },

    #[error("host provisioning script {script} exited with {status}: {stderr}")]
    HostPassFailed {
        script: PathBuf,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Reason carried by a failed install outcome.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("invalid descriptor: {0}")]
    Invalid(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("verification failed: {} does not exist after fetch", .0.display())]
    Verification(PathBuf),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}
