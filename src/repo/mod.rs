//! Git-backed repository management for the localization tree
//!
//! [`RepositoryManager`] wraps a `git2` working copy and exposes the handful
//! of operations the tool needs: divergence inspection, staging and
//! committing local edits, and the full fetch/merge/push sequence in
//! [`sync`]. Every backend failure is re-classified into [`SyncError`]
//! before it reaches the caller.

mod error;
mod sync;

pub use error::SyncError;
pub(crate) use error::classify_remote_error;
pub use sync::{MergeOutcome, SyncSummary};

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Commit, ErrorCode, IndexAddOption, Oid, Repository, Signature, Status, StatusOptions};
use tracing::debug;

/// Remote every synchronization operation targets.
pub const DEFAULT_REMOTE: &str = "origin";

/// Folder inside the repository holding the translated files.
pub const LOCALIZATION_FOLDER: &str = "localize";

/// Folder receiving packaged release archives.
pub const DIST_FOLDER: &str = ".dist";

pub const SYNC_COMMIT_MESSAGE: &str = "Synchronization of local and remote changes [locsync]";
pub const RECONCILE_COMMIT_MESSAGE: &str = "Merged new files from the game [locsync]";

/// Working-tree states that make a path worth committing. Ignored and
/// untouched files stay out.
const COMMITTABLE: Status = Status::WT_NEW
    .union(Status::WT_MODIFIED)
    .union(Status::WT_DELETED)
    .union(Status::WT_RENAMED)
    .union(Status::WT_TYPECHANGE)
    .union(Status::INDEX_NEW)
    .union(Status::INDEX_MODIFIED)
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_RENAMED)
    .union(Status::INDEX_TYPECHANGE);

pub struct RepositoryManager {
    repo: Repository,
    root: PathBuf,
    token: Option<String>,
}

impl RepositoryManager {
    /// Open the repository at `path`. Settings frequently point at the
    /// localization folder or at a folder containing the checkout, so the
    /// path itself, its parent, and its immediate children are all tried.
    pub fn open(path: &Path, token: Option<String>) -> Result<Self, SyncError> {
        let repo =
            Self::discover(path).ok_or_else(|| SyncError::NotARepository(path.to_path_buf()))?;
        let root = repo
            .workdir()
            .ok_or_else(|| SyncError::NotARepository(path.to_path_buf()))?
            .to_path_buf();
        debug!(root = %root.display(), "opened repository");
        Ok(Self { repo, root, token })
    }

    fn discover(path: &Path) -> Option<Repository> {
        if let Ok(repo) = Repository::open(path) {
            return Some(repo);
        }
        if let Some(parent) = path.parent()
            && let Ok(repo) = Repository::open(parent)
        {
            return Some(repo);
        }
        for entry in fs::read_dir(path).ok()?.flatten() {
            let candidate = entry.path();
            if candidate.is_dir()
                && let Ok(repo) = Repository::open(&candidate)
            {
                return Some(repo);
            }
        }
        None
    }

    /// Working-directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn localization_dir(&self) -> PathBuf {
        self.root.join(LOCALIZATION_FOLDER)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.root.join(DIST_FOLDER)
    }

    /// Direct access to the underlying repository, for tag inspection.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn current_branch(&self) -> Result<String, SyncError> {
        let head = self.repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    /// Human-readable repository name derived from the remote URL. Handles
    /// both http(s) and scp-style URLs.
    pub fn display_name(&self) -> Option<String> {
        let remote = self.repo.find_remote(DEFAULT_REMOTE).ok()?;
        let url = remote.url()?;
        let tail = if !url.starts_with("http")
            && let Some((_, rest)) = url.rsplit_once(':')
        {
            rest
        } else {
            url
        };
        let name = tail.rsplit('/').next().unwrap_or(tail);
        let name = name.trim_end_matches(".git");
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// (ahead, behind) commit counts between the local branch tip and its
    /// remote tracking branch. A branch with no upstream reports `(0, 0)`;
    /// an unpublished branch is a valid state, not a failure.
    pub fn divergence(&self) -> Result<(usize, usize), SyncError> {
        let Some((local, upstream)) = self.tracking_pair()? else {
            return Ok((0, 0));
        };
        let counts = self.repo.graph_ahead_behind(local, upstream)?;
        Ok(counts)
    }

    /// Local tip and upstream tip, or `None` when the branch is unborn or
    /// has no tracking branch.
    pub(crate) fn tracking_pair(&self) -> Result<Option<(Oid, Oid)>, SyncError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(local) = head.target() else {
            return Ok(None);
        };
        let branch = git2::Branch::wrap(head);
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(remote_tip) = upstream.get().target() else {
            return Ok(None);
        };
        Ok(Some((local, remote_tip)))
    }

    /// Paths with committable working-tree or index changes.
    pub fn changed_paths(&self) -> Result<Vec<String>, SyncError> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status().intersects(COMMITTABLE))
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }

    /// Stage everything and commit it with the given message. Returns the
    /// new commit id, or `None` when there was nothing to commit.
    ///
    /// A repository without a configured user identity cannot produce a
    /// signature; that is surfaced before anything is staged.
    pub fn commit_changes(&self, message: &str) -> Result<Option<Oid>, SyncError> {
        if self.changed_paths()?.is_empty() {
            debug!("nothing to commit");
            return Ok(None);
        }
        let signature = self.signature()?;

        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                None
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            // Only ignored or untouched files moved; nothing staged.
            return Ok(None);
        }
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        debug!(%oid, "created commit");
        Ok(Some(oid))
    }

    /// Author/committer signature from the repository configuration.
    pub(crate) fn signature(&self) -> Result<Signature<'static>, SyncError> {
        let config = self.repo.config()?.snapshot()?;
        let name = config.get_string("user.name").unwrap_or_default();
        let email = config.get_string("user.email").unwrap_or_default();
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(SyncError::MissingSignature);
        }
        Ok(Signature::now(&name, &email)?)
    }
}
