//! The fetch → divergence → merge → commit → push sequence
//!
//! Each step either succeeds or terminates the whole sequence with a
//! classified [`SyncError`]. No step ever discards local work: the only
//! branch-pointer update performed without a merge commit is the
//! fast-forward case, taken only when the local tip is provably an ancestor
//! of the remote tip.

use git2::build::CheckoutBuilder;
use git2::{AnnotatedCommit, Cred, FetchOptions, Oid, PushOptions, RemoteCallbacks};
use tracing::{debug, info};

use super::{DEFAULT_REMOTE, RepositoryManager, SYNC_COMMIT_MESSAGE, SyncError};
use crate::repo::classify_remote_error;

/// How a pull resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The local branch already contained everything the remote had.
    UpToDate,
    /// The local branch pointer was moved forward to the remote tip.
    FastForwarded(Oid),
    /// Histories diverged; a merge commit was created.
    MergedCommit(Oid),
}

/// What one full synchronization pass did.
#[derive(Debug, Clone, Copy)]
pub struct SyncSummary {
    pub merge: MergeOutcome,
    pub committed: Option<Oid>,
    pub pushed: bool,
}

impl RepositoryManager {
    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let token = self.token().map(str::to_string);
        callbacks.credentials(move |_url, _username_from_url, _allowed| match &token {
            // GitHub accepts personal access tokens as the password with a
            // fixed "token" username.
            Some(token) => Cred::userpass_plaintext("token", token),
            None => Cred::default(),
        });
        callbacks
    }

    /// Retrieve remote refs for the tracked remote. Does not touch local
    /// history.
    pub fn fetch(&self) -> Result<(), SyncError> {
        let mut remote = self
            .repo()
            .find_remote(DEFAULT_REMOTE)
            .map_err(|_| SyncError::MissingRemote(DEFAULT_REMOTE.to_string()))?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        info!(remote = DEFAULT_REMOTE, "fetching");
        // An empty refspec list fetches the remote's configured refspecs.
        remote
            .fetch(&[] as &[&str], Some(&mut options), None)
            .map_err(classify_remote_error)
    }

    /// Fetch and integrate remote commits into the local branch.
    pub fn pull(&self) -> Result<MergeOutcome, SyncError> {
        self.fetch()?;

        let (_, behind) = self.divergence()?;
        if behind == 0 {
            debug!("no remote commits to integrate");
            return Ok(MergeOutcome::UpToDate);
        }
        let Some((local_tip, remote_tip)) = self.tracking_pair()? else {
            return Ok(MergeOutcome::UpToDate);
        };
        info!(behind, "local branch is behind its tracking branch");

        let merge_base = self
            .repo()
            .merge_base(local_tip, remote_tip)
            .map_err(|_| SyncError::UnrelatedHistories)?;

        if merge_base == local_tip {
            // The local tip is an ancestor of the remote tip, so moving the
            // branch pointer cannot drop any local commit.
            self.fast_forward(remote_tip)?;
            info!(tip = %remote_tip, "fast-forwarded");
            return Ok(MergeOutcome::FastForwarded(remote_tip));
        }

        let annotated = self.repo().find_annotated_commit(remote_tip)?;
        self.three_way_merge(&annotated, local_tip, remote_tip)
    }

    fn fast_forward(&self, remote_tip: Oid) -> Result<(), SyncError> {
        let branch = self.current_branch()?;
        let refname = format!("refs/heads/{branch}");
        let mut reference = self.repo().find_reference(&refname)?;
        reference.set_target(remote_tip, "fast-forward")?;
        self.repo().set_head(&refname)?;
        self.repo()
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn three_way_merge(
        &self,
        annotated: &AnnotatedCommit<'_>,
        local_tip: Oid,
        remote_tip: Oid,
    ) -> Result<MergeOutcome, SyncError> {
        // Surface a missing identity before touching the working tree.
        let signature = self.signature()?;

        self.repo().merge(&[annotated], None, None)?;

        let mut index = self.repo().index()?;
        if index.has_conflicts() {
            let paths = index
                .conflicts()?
                .filter_map(Result::ok)
                .filter_map(|conflict| conflict.our.or(conflict.their).or(conflict.ancestor))
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
            return Err(SyncError::MergeConflicts(paths));
        }

        let tree_id = index.write_tree()?;
        let tree = self.repo().find_tree(tree_id)?;
        let local = self.repo().find_commit(local_tip)?;
        let remote = self.repo().find_commit(remote_tip)?;
        let branch = self.current_branch()?;
        let message = format!("Merge remote-tracking branch '{DEFAULT_REMOTE}/{branch}'");
        let oid = self.repo().commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &[&local, &remote],
        )?;
        self.repo().cleanup_state()?;
        info!(%oid, "created merge commit");
        Ok(MergeOutcome::MergedCommit(oid))
    }

    /// Push the current branch, if it is ahead of its tracking branch.
    /// Returns whether anything was pushed.
    pub fn push(&self) -> Result<bool, SyncError> {
        let (ahead, _) = self.divergence()?;
        if ahead == 0 {
            debug!("no local commits to push");
            return Ok(false);
        }
        let branch = self.current_branch()?;
        let mut remote = self
            .repo()
            .find_remote(DEFAULT_REMOTE)
            .map_err(|_| SyncError::MissingRemote(DEFAULT_REMOTE.to_string()))?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut options = PushOptions::new();
        options.remote_callbacks(self.callbacks());
        info!(branch, "pushing");
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(classify_remote_error)?;
        Ok(true)
    }

    /// The full synchronization sequence: pull, commit local edits, push.
    pub fn synchronize(&self) -> Result<SyncSummary, SyncError> {
        let merge = self.pull()?;
        let committed = self.commit_changes(SYNC_COMMIT_MESSAGE)?;
        let pushed = self.push()?;
        Ok(SyncSummary {
            merge,
            committed,
            pushed,
        })
    }
}
