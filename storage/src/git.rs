//! Git repository backend.
//!
//! Each root keeps a working checkout under the work cache. Reads are served
//! from that checkout; writes commit on top of the configured branch and
//! push. With `requirePullRequest` set, every change is pushed to a fresh
//! `stowage/<id>` branch instead and the configured branch is left untouched.

use crate::disk::{list_dir, read_file};
use crate::runtime::{
    ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteMode, WriteRequest, clean, clean_file
};
use async_trait::async_trait;
use config::{GitConfig, RootKind};
use errors::RuntimeError;
use git2::{Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub const REVIEW_BRANCH_PREFIX: &str = "stowage/";
const TOKEN_USERNAME: &str = "x-access-token";

/// One lock per checkout directory, shared by every runtime built from the
/// same [`crate::BuildContext`].
///
/// A reload opens the new generation's runtime on the directory the previous
/// generation may still be committing in, and a construction abandoned on
/// timeout keeps running on the blocking pool. Both hold this lock for as
/// long as they touch the working tree.
#[derive(Clone, Default)]
pub struct CheckoutLocks {
    locks: Arc<parking_lot::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>
}

impl CheckoutLocks {
    pub fn for_dir(&self, dir: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(dir.to_path_buf()).or_default())
    }
}

pub struct GitStorage {
    checkout: Arc<GitCheckout>,
    lock: Arc<Mutex<()>>
}

struct GitCheckout {
    prefix: String,
    remote: String,
    branch: String,
    root_subpath: String,
    require_pull_request: bool,
    token: Option<Zeroizing<String>>,
    work_dir: PathBuf
}

enum Change<'a> {
    Put(&'a [u8]),
    Remove
}

fn git_err(operation: &'static str) -> impl Fn(git2::Error) -> RuntimeError {
    move |e| RuntimeError::Git {
        operation: operation.to_string(),
        reason: e.message().to_string()
    }
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> RuntimeError + '_ {
    move |e| RuntimeError::Io {
        path: path.display().to_string(),
        reason: e.to_string()
    }
}

/// Scheme-less remotes such as `github.com/org/repo` are fetched over HTTPS.
/// URLs, scp-style addresses and existing local paths are used unchanged.
pub fn remote_url(remote: &str) -> String {
    let remote = remote.trim();
    if remote.contains("://") || remote.starts_with("git@") || Path::new(remote).exists() {
        remote.to_string()
    } else {
        format!("https://{remote}")
    }
}

impl GitStorage {
    /// Clone (or refresh) the checkout for `prefix`.
    ///
    /// Runs on the blocking pool; `cancel` interrupts the transfer. The
    /// checkout lock is held until the blocking work ends, even when the
    /// caller stops waiting.
    pub async fn open(
        prefix: &str,
        config: &GitConfig,
        token: Option<Zeroizing<String>>,
        work_cache_dir: &Path,
        locks: &CheckoutLocks,
        cancel: CancellationToken
    ) -> Result<Self, RuntimeError> {
        let remote = remote_url(&config.remote);
        let checkout = Arc::new(GitCheckout {
            prefix: prefix.to_string(),
            work_dir: work_cache_dir.join(utils::cache_dir_name(prefix, &remote)),
            remote,
            branch: config.branch.clone(),
            root_subpath: clean(&config.root_subpath)?,
            require_pull_request: config.require_pull_request,
            token
        });

        let lock = locks.for_dir(&checkout.work_dir);
        let guard = Arc::clone(&lock).lock_owned().await;
        let worker = Arc::clone(&checkout);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            worker.sync(&cancel).map(|_| ())
        })
            .await
            .map_err(|e| RuntimeError::Git {
                operation: "clone".to_string(),
                reason: e.to_string()
            })??;

        info!(
            prefix = %checkout.prefix,
            remote = %checkout.remote,
            branch = %checkout.branch,
            "Git checkout ready"
        );
        Ok(Self { checkout, lock })
    }

    pub fn work_dir(&self) -> &Path {
        &self.checkout.work_dir
    }

    fn content_dir(&self) -> PathBuf {
        self.checkout.work_dir.join(&self.checkout.root_subpath)
    }

    async fn run_blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&GitCheckout) -> Result<T, RuntimeError> + Send + 'static
    {
        let guard: OwnedMutexGuard<()> = Arc::clone(&self.lock).lock_owned().await;
        let checkout = Arc::clone(&self.checkout);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f(&checkout)
        })
            .await
            .map_err(|e| RuntimeError::Git {
                operation: operation.to_string(),
                reason: e.to_string()
            })?
    }
}

#[async_trait]
impl StorageRuntime for GitStorage {
    fn kind(&self) -> RootKind {
        RootKind::Git
    }

    fn location(&self) -> String {
        let c = &self.checkout;
        if c.root_subpath.is_empty() {
            format!("{}#{}", c.remote, c.branch)
        } else {
            format!("{}#{}:{}", c.remote, c.branch, c.root_subpath)
        }
    }

    fn write_mode(&self) -> WriteMode {
        if self.checkout.require_pull_request {
            WriteMode::ReviewGated
        } else {
            WriteMode::Direct
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<EntryInfo>, RuntimeError> {
        let cleaned = clean(path)?;
        let _guard = self.lock.lock().await;
        list_dir(&self.content_dir(), &cleaned).await
    }

    async fn read(&self, path: &str) -> Result<Option<Entry>, RuntimeError> {
        let cleaned = clean_file(path)?;
        let _guard = self.lock.lock().await;
        read_file(&self.content_dir(), &cleaned).await
    }

    async fn write(&self, request: WriteRequest) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(&request.path)?;
        let message = request
            .message
            .clone()
            .unwrap_or_else(|| format!("Update {cleaned}"));
        self.run_blocking("write", move |checkout| {
            checkout.apply(&cleaned, Change::Put(&request.body), &message)
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(path)?;
        let message = format!("Delete {cleaned}");
        self.run_blocking("delete", move |checkout| {
            checkout.apply(&cleaned, Change::Remove, &message)
        })
        .await
    }
}

impl GitCheckout {
    fn callbacks<'a>(&'a self, cancel: &'a CancellationToken) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = 0_u8;
        callbacks.credentials(move |_url, username, allowed| {
            attempts += 1;
            if attempts > 1 {
                return Err(git2::Error::from_str("credentials rejected by remote"));
            }
            match &self.token {
                Some(token) if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                    Cred::userpass_plaintext(TOKEN_USERNAME, token)
                }
                _ if allowed.contains(CredentialType::SSH_KEY) => {
                    Cred::ssh_key_from_agent(username.unwrap_or("git"))
                }
                _ => Cred::default()
            }
        });
        callbacks.transfer_progress(move |_| !cancel.is_cancelled());
        callbacks
    }

    /// Bring the checkout in line with the remote branch, cloning on first use.
    fn sync(&self, cancel: &CancellationToken) -> Result<Repository, RuntimeError> {
        if cancel.is_cancelled() {
            return Err(RuntimeError::Git {
                operation: "clone".to_string(),
                reason: "cancelled".to_string()
            });
        }

        let repo = if self.work_dir.join(".git").exists() {
            let repo = Repository::open(&self.work_dir).map_err(git_err("open"))?;
            {
                let mut remote = repo.find_remote("origin").map_err(git_err("fetch"))?;
                let mut fetch_options = FetchOptions::new();
                fetch_options.remote_callbacks(self.callbacks(cancel));
                let refspec = format!(
                    "+refs/heads/{0}:refs/remotes/origin/{0}",
                    self.branch
                );
                remote
                    .fetch(&[refspec.as_str()], Some(&mut fetch_options), None)
                    .map_err(git_err("fetch"))?;
            }
            debug!(prefix = %self.prefix, "Fetched {}", self.remote);
            repo
        } else {
            if self.work_dir.exists() {
                warn!(prefix = %self.prefix, "Discarding incomplete checkout at {:?}", self.work_dir);
                std::fs::remove_dir_all(&self.work_dir).map_err(io_err(&self.work_dir))?;
            }
            if let Some(parent) = self.work_dir.parent() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            let mut fetch_options = FetchOptions::new();
            fetch_options.remote_callbacks(self.callbacks(cancel));
            info!(prefix = %self.prefix, "Cloning {} to {:?}", self.remote, self.work_dir);
            git2::build::RepoBuilder::new()
                .branch(&self.branch)
                .fetch_options(fetch_options)
                .clone(&self.remote, &self.work_dir)
                .map_err(git_err("clone"))?
        };

        self.reset_to_remote(&repo)?;
        Ok(repo)
    }

    /// Point the local branch at the remote-tracking branch and make the
    /// working tree match it.
    fn reset_to_remote(&self, repo: &Repository) -> Result<(), RuntimeError> {
        let tracking = format!("refs/remotes/origin/{}", self.branch);
        let commit = repo
            .find_reference(&tracking)
            .and_then(|r| r.peel_to_commit())
            .map_err(git_err("reset"))?;
        let local = format!("refs/heads/{}", self.branch);
        repo.reference(&local, commit.id(), true, "stowage: sync with remote")
            .map_err(git_err("reset"))?;
        repo.set_head(&local).map_err(git_err("reset"))?;
        repo.reset(commit.as_object(), git2::ResetType::Hard, None)
            .map_err(git_err("reset"))
    }

    fn apply(&self, path: &str, change: Change<'_>, message: &str) -> Result<ChangeOutcome, RuntimeError> {
        let never = CancellationToken::new();
        let repo = self.sync(&never)?;
        let rel = utils::join_clean(&self.root_subpath, path);
        let file = self.work_dir.join(&rel);

        if matches!(change, Change::Remove) && !file.is_file() {
            return Ok(ChangeOutcome::Missing {
                path: path.to_string()
            });
        }

        let base = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(git_err("head"))?;

        let review_branch = if self.require_pull_request {
            let name = format!("{REVIEW_BRANCH_PREFIX}{}", uuid::Uuid::new_v4().simple());
            repo.branch(&name, &base, false).map_err(git_err("branch"))?;
            repo.set_head(&format!("refs/heads/{name}"))
                .map_err(git_err("branch"))?;
            Some(name)
        } else {
            None
        };
        let target = review_branch.clone().unwrap_or_else(|| self.branch.clone());

        let result = self
            .commit_change(&repo, &rel, &file, change, message, &base)
            .and_then(|revision| {
                self.push(&repo, &target)?;
                Ok(revision)
            });

        if review_branch.is_some() || result.is_err() {
            self.reset_to_remote(&repo)?;
        }
        if let Some(name) = &review_branch
            && let Ok(mut branch) = repo.find_branch(name, git2::BranchType::Local)
            && let Err(e) = branch.delete()
        {
            debug!("Failed to delete local review branch {}: {}", name, e);
        }

        let revision = result?;
        info!(prefix = %self.prefix, path = %rel, branch = %target, revision = %revision, "Pushed change");
        Ok(match review_branch {
            Some(branch) => ChangeOutcome::Proposed {
                path: path.to_string(),
                branch,
                revision
            },
            None => ChangeOutcome::Committed {
                path: path.to_string(),
                revision: Some(revision)
            }
        })
    }

    fn commit_change(
        &self,
        repo: &Repository,
        rel: &str,
        file: &Path,
        change: Change<'_>,
        message: &str,
        parent: &git2::Commit<'_>
    ) -> Result<String, RuntimeError> {
        let mut index = repo.index().map_err(git_err("index"))?;
        match change {
            Change::Put(body) => {
                if let Some(dir) = file.parent() {
                    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
                }
                std::fs::write(file, body).map_err(io_err(file))?;
                index.add_path(Path::new(rel)).map_err(git_err("index"))?;
            }
            Change::Remove => {
                std::fs::remove_file(file).map_err(io_err(file))?;
                index.remove_path(Path::new(rel)).map_err(git_err("index"))?;
            }
        }
        index.write().map_err(git_err("index"))?;

        let tree_id = index.write_tree().map_err(git_err("commit"))?;
        let tree = repo.find_tree(tree_id).map_err(git_err("commit"))?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Stowage", "stowage@localhost"))
            .map_err(git_err("commit"))?;

        let commit_id = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[parent])
            .map_err(git_err("commit"))?;
        Ok(commit_id.to_string())
    }

    fn push(&self, repo: &Repository, branch: &str) -> Result<(), RuntimeError> {
        let never = CancellationToken::new();
        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut remote = repo.find_remote("origin").map_err(git_err("push"))?;
            let mut callbacks = self.callbacks(&never);
            callbacks.push_update_reference(|refname, status| {
                if let Some(status) = status {
                    *rejection.borrow_mut() = Some(format!("{refname}: {status}"));
                }
                Ok(())
            });
            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            remote
                .push(&[refspec.as_str()], Some(&mut push_options))
                .map_err(git_err("push"))?;
        }
        match rejection.into_inner() {
            Some(reason) => Err(RuntimeError::Git {
                operation: "push".to_string(),
                reason
            }),
            None => Ok(())
        }
    }
}
