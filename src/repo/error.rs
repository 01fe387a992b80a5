//! Classified synchronization failures
//!
//! Backend errors are caught and re-classified here so the calling layer can
//! show a cause-specific message (re-authenticate vs. check connectivity vs.
//! pull first) instead of a generic failure.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "no Git repository found at {0} (checked the path itself, its parent, and its children)"
    )]
    NotARepository(PathBuf),

    #[error("remote '{0}' is not configured for this repository")]
    MissingRemote(String),

    #[error(
        "authentication failed: {0}. Check that the access token is valid, unexpired, and has write access to the repository"
    )]
    Authentication(#[source] git2::Error),

    #[error("network failure while talking to the remote: {0}. Check your connection")]
    Network(#[source] git2::Error),

    #[error(
        "push rejected: the remote contains commits you do not have locally. Synchronize first, then retry"
    )]
    NonFastForward(#[source] git2::Error),

    #[error("merge produced conflicts requiring manual resolution:\n{}", conflict_list(.0))]
    MergeConflicts(Vec<String>),

    #[error("git user.name and user.email must be configured before committing")]
    MissingSignature,

    #[error("local and remote branches share no common history; refusing to merge")]
    UnrelatedHistories,

    #[error(transparent)]
    Git(#[from] git2::Error),
}

fn conflict_list(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| format!("  {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Classify an error returned by a fetch or push into the taxonomy above.
pub(crate) fn classify_remote_error(err: git2::Error) -> SyncError {
    use git2::{ErrorClass, ErrorCode};

    match err.code() {
        ErrorCode::Auth => return SyncError::Authentication(err),
        ErrorCode::NotFastForward => return SyncError::NonFastForward(err),
        _ => {}
    }

    let message = err.message().to_ascii_lowercase();
    if message.contains("non-fastforward") || message.contains("non-fast-forward") {
        return SyncError::NonFastForward(err);
    }
    if message.contains("401")
        || message.contains("403")
        || message.contains("authentication")
        || message.contains("permission")
    {
        return SyncError::Authentication(err);
    }

    match err.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl => SyncError::Network(err),
        _ => SyncError::Git(err),
    }
}
