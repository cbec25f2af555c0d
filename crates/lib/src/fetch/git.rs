//! Git checkouts: clone, load, tags, revisions.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::interrupt::Interrupt;

#[derive(Debug, Error)]
pub enum GitError {
  /// Failed to clone a git repository.
  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Clone succeeded but the working tree could not be checked out.
  #[error("failed to check out '{url}': {source}")]
  Checkout {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to open an existing git repository.
  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to list tags in '{path}': {message}")]
  Tags { path: PathBuf, message: String },

  /// Failed to find the specified revision.
  #[error("revision '{rev}' not found in repository")]
  RevisionNotFound { rev: String },

  #[error("failed to resolve HEAD: {0}")]
  ResolveHead(String),

  #[error("failed to walk history: {0}")]
  Walk(String),

  #[error("failed to create '{0}': {1}")]
  CreateDir(PathBuf, #[source] std::io::Error),

  #[error("clone of '{url}' was interrupted")]
  Interrupted { url: String },
}

impl GitError {
  /// Clone failures happen while talking to the remote.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Clone { .. })
  }
}

/// A checkout on disk. Cheap to clone; every query reopens the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
  path: PathBuf,
}

impl RepoHandle {
  /// Clones `url` into `dest` and checks out the default branch.
  pub fn clone_from(url: &str, dest: &Path, interrupt: &Interrupt) -> Result<Self, GitError> {
    info!(url, dest = %dest.display(), "cloning repository");
    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent).map_err(|e| GitError::CreateDir(parent.to_path_buf(), e))?;
    }

    let interrupted = || GitError::Interrupted { url: url.to_string() };
    let mut prepared = gix::prepare_clone(url, dest).map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

    let (mut checkout, _outcome) = prepared
      .fetch_then_checkout(gix::progress::Discard, interrupt.flag())
      .map_err(|e| {
        if interrupt.is_tripped() {
          return interrupted();
        }
        GitError::Clone {
          url: url.to_string(),
          source: Box::new(e),
        }
      })?;

    checkout
      .main_worktree(gix::progress::Discard, interrupt.flag())
      .map_err(|e| {
        if interrupt.is_tripped() {
          return interrupted();
        }
        GitError::Checkout {
          url: url.to_string(),
          source: Box::new(e),
        }
      })?;

    debug!(url, "clone complete");
    Ok(Self {
      path: dest.to_path_buf(),
    })
  }

  /// Opens an existing checkout.
  pub fn open(path: &Path) -> Result<Self, GitError> {
    gix::open(path).map_err(|e| GitError::Open {
      path: path.to_path_buf(),
      source: Box::new(e),
    })?;
    Ok(Self {
      path: path.to_path_buf(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn repo(&self) -> Result<gix::Repository, GitError> {
    gix::open(&self.path).map_err(|e| GitError::Open {
      path: self.path.clone(),
      source: Box::new(e),
    })
  }

  /// Tag names, sorted lexicographically. Empty when the repository has none.
  pub fn tags(&self) -> Result<Vec<String>, GitError> {
    let repo = self.repo()?;
    let tags_err = |message: String| GitError::Tags {
      path: self.path.clone(),
      message,
    };

    let references = repo.references().map_err(|e| tags_err(e.to_string()))?;
    let mut names = Vec::new();
    for reference in references.tags().map_err(|e| tags_err(e.to_string()))? {
      let reference = reference.map_err(|e| tags_err(e.to_string()))?;
      names.push(reference.name().shorten().to_string());
    }
    names.sort();
    Ok(names)
  }

  /// Commit id a tag points at. Annotated tags are peeled to their commit.
  pub fn revision(&self, tag: &str) -> Result<String, GitError> {
    let repo = self.repo()?;
    let spec = format!("refs/tags/{tag}");
    resolve_commit(&repo, &spec).map_err(|_| GitError::RevisionNotFound { rev: tag.to_string() })
  }

  /// Number of commits reachable from `HEAD` but not from `rev`.
  pub fn commits_since(&self, rev: &str) -> Result<usize, GitError> {
    let repo = self.repo()?;
    let target = resolve_commit_id(&repo, rev)?;

    let mut head = repo.head().map_err(|e| GitError::ResolveHead(e.to_string()))?;
    let head_commit = head
      .peel_to_commit()
      .map_err(|e| GitError::ResolveHead(e.to_string()))?;

    let walk = repo
      .rev_walk([head_commit.id])
      .with_hidden([target])
      .all()
      .map_err(|e| GitError::Walk(e.to_string()))?;

    let mut count = 0;
    for info in walk {
      info.map_err(|e| GitError::Walk(e.to_string()))?;
      count += 1;
    }
    Ok(count)
  }
}

fn resolve_commit(repo: &gix::Repository, rev: &str) -> Result<String, GitError> {
  resolve_commit_id(repo, rev).map(|id| id.to_string())
}

fn resolve_commit_id(repo: &gix::Repository, rev: &str) -> Result<gix::ObjectId, GitError> {
  let not_found = |detail: String| GitError::RevisionNotFound { rev: detail };

  let spec = repo.rev_parse(rev).map_err(|_| not_found(rev.to_string()))?;
  let object_id = spec
    .single()
    .ok_or_else(|| not_found(format!("{rev} (ambiguous)")))?;
  let commit = object_id
    .object()
    .map_err(|e| not_found(format!("{rev}: {e}")))?
    .peel_to_commit()
    .map_err(|e| not_found(format!("{rev}: {e}")))?;

  Ok(commit.id)
}

/// Directory name for a clone of `url`: the last path segment without `.git`.
pub fn repo_dir_name(url: &str) -> String {
  let trimmed = url.trim_end_matches('/');
  let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
  let name = last.strip_suffix(".git").unwrap_or(last);
  if name.is_empty() || name == "." || name == ".." {
    return "repo".to_string();
  }
  name.to_string()
}
