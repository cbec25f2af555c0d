//! Content fetcher: HTTP downloads, git checkouts and the shared download cache.

pub mod cache;
pub mod git;
pub mod http;

pub use cache::DownloadCache;
pub use git::{GitError, RepoHandle};
pub use http::{FetchConfig, FetchError, Fetcher, url_to_filename};
