// gitmesh - A client-side runtime for decentralized Git collaboration over Nostr
// Copyright (C) 2025 Awiteb <a@4rs.nl>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://gnu.org/licenses/gpl-3.0.html>.

//! Turning a repository key into a usable local working set: cloning,
//! progressive deepening, robust branch resolution, mirror fallback, and
//! cache reuse.

/// Branch resolution cascade.
pub mod branches;
/// Persistent per-address cache records.
pub mod cache;
/// Object reads with depth escalation.
pub mod reads;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    discovery::{DiscoverOptions, Discovery},
    error::{ErrorClass, GitMeshError, GitMeshResult},
    key::RepoKey,
    ports::{CloneOpts, EventIo, FetchOpts, Fs, GitProvider, NetOpts},
    retry::{self, RetryOptions, TimeoutOptions, with_retry, with_timeout},
};

/// How much of a repository is locally usable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum DataLevel {
    /// Ref metadata only.
    Refs,
    /// One-deep history on one branch.
    Shallow,
    /// Deepened to the requested depth, or unbounded.
    Full,
}

/// Default TTL of the persistent materializer cache.
pub const REPO_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Options for [`Materializer::ensure_repo`].
#[derive(Clone, Default)]
pub struct EnsureOptions {
    /// Clone URL preferred over the announcement ordering.
    pub preferred_url: Option<String>,
    pub branch:        Option<String>,
    /// Target depth for [`DataLevel::Full`]; unbounded when absent.
    pub depth:         Option<u32>,
    pub cancel:        Option<CancellationToken>,
    /// Retry policy for network calls; the default policy when absent.
    pub retry:         Option<RetryOptions>,
}

/// A locally materialized repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedRepo {
    pub dir:         PathBuf,
    pub branch:      String,
    pub level:       DataLevel,
    pub head_commit: Option<String>,
}

/// Owns local repository directories: all writes to a directory go
/// through here and are serialized per directory.
pub struct Materializer<P, E, F> {
    provider:     P,
    discovery:    Arc<Discovery<E>>,
    fs:           F,
    root:         PathBuf,
    cache_ttl_ms: u64,
    locks:        Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl<P, E, F> Materializer<P, E, F>
where
    P: GitProvider,
    E: EventIo,
    F: Fs,
{
    pub fn new(provider: P, discovery: Arc<Discovery<E>>, fs: F, root: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            discovery,
            fs,
            root: root.into(),
            cache_ttl_ms: REPO_CACHE_TTL_MS,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn discovery(&self) -> &Discovery<E> {
        &self.discovery
    }

    /// The directory a repository materializes into.
    pub fn dir_for(&self, key: &RepoKey) -> PathBuf {
        self.root.join(key.address.replace([':', '/'], "_"))
    }

    async fn dir_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(dir.to_path_buf())
            .or_default()
            .clone()
    }

    /// Ensures the repository is locally usable at the given level,
    /// reusing the persistent cache when it is fresh enough.
    pub async fn ensure_repo(
        &self,
        key: &RepoKey,
        level: DataLevel,
        opts: &EnsureOptions,
    ) -> GitMeshResult<MaterializedRepo> {
        let dir = self.dir_for(key);
        let lock = self.dir_lock(&dir).await;
        let _guard = lock.lock().await;

        if let Some(entry) = cache::load(&self.fs, &self.root, &key.address).await
            && entry.is_fresh(self.cache_ttl_ms)
            && entry.data_level >= level
            && self.provider.list_refs(&dir).await.is_ok()
        {
            tracing::debug!(address = %key.address, "Materializer cache hit");
            let branch = match &opts.branch {
                Some(requested) => requested.clone(),
                None => entry.branches.first().cloned().unwrap_or_default(),
            };
            return Ok(MaterializedRepo {
                dir,
                branch,
                level: entry.data_level,
                head_commit: entry.head_commit,
            });
        }

        let discovered = self
            .discovery
            .discover_repo(key, &DiscoverOptions::default())
            .await?;
        let branch = match &opts.branch {
            Some(requested) => requested.clone(),
            None => {
                discovered
                    .state
                    .as_ref()
                    .and_then(|s| s.auto_head())
                    .unwrap_or_else(|| "main".to_owned())
            }
        };

        let already_cloned = self.provider.list_refs(&dir).await.is_ok();
        let urls = order_clone_urls(&discovered.urls, opts.preferred_url.as_deref());
        if !already_cloned {
            if urls.is_empty() {
                return Err(GitMeshError::not_found(format!(
                    "clone URLs for `{}`",
                    key.address
                )));
            }
            self.clone_from_mirrors(&dir, &urls, &branch, level, opts)
                .await?;
        }

        let (branch, head_commit) = match level {
            DataLevel::Refs => (branch, None),
            DataLevel::Shallow | DataLevel::Full => {
                let net = NetOpts {
                    cancel: opts.cancel.clone(),
                    ..Default::default()
                };
                if level == DataLevel::Full {
                    self.deepen(&dir, opts.depth, opts.cancel.clone()).await?;
                }
                let (branch, oid) =
                    branches::resolve_branch(&self.provider, &dir, &branch, &net).await?;
                self.provider.checkout(&dir, &branch).await?;
                (branch, Some(oid))
            }
        };

        let entry = cache::RepoCacheEntry {
            last_updated: cache::now_ms(),
            head_commit: head_commit.clone(),
            data_level: level,
            branches: discovered.branches.clone(),
            clone_urls: urls,
        };
        if let Err(err) = cache::store(&self.fs, &self.root, &key.address, &entry).await {
            tracing::warn!(address = %key.address, error = %err, "Failed persisting repo cache");
        }

        Ok(MaterializedRepo {
            dir,
            branch,
            level,
            head_commit,
        })
    }

    /// `ensure_repo` at shallow level for one branch.
    pub async fn ensure_shallow(
        &self,
        key: &RepoKey,
        branch: &str,
    ) -> GitMeshResult<MaterializedRepo> {
        self.ensure_repo(
            key,
            DataLevel::Shallow,
            &EnsureOptions {
                branch: Some(branch.to_owned()),
                ..Default::default()
            },
        )
        .await
    }

    /// `ensure_repo` at full level, deepened to `depth` when given.
    pub async fn ensure_full(
        &self,
        key: &RepoKey,
        branch: &str,
        depth: Option<u32>,
    ) -> GitMeshResult<MaterializedRepo> {
        self.ensure_repo(
            key,
            DataLevel::Full,
            &EnsureOptions {
                branch: Some(branch.to_owned()),
                depth,
                ..Default::default()
            },
        )
        .await
    }

    /// Clones from the first mirror that works. Authentication failures
    /// propagate immediately; anything else moves on to the next mirror.
    async fn clone_from_mirrors(
        &self,
        dir: &Path,
        urls: &[String],
        branch: &str,
        level: DataLevel,
        opts: &EnsureOptions,
    ) -> GitMeshResult<()> {
        let depth = match level {
            DataLevel::Refs | DataLevel::Shallow => Some(1),
            DataLevel::Full => opts.depth,
        };

        let retry_opts = opts.retry.clone().unwrap_or_default();
        let mut last_error = None;
        for url in urls {
            let timeout = TimeoutOptions::new("clone", retry::CLONE_TIMEOUT);
            let timeout = match &opts.cancel {
                Some(token) => timeout.with_cancel(token.clone()),
                None => timeout,
            };
            let result = with_timeout(timeout, |token| {
                let clone_opts = CloneOpts {
                    url:    url.clone(),
                    depth,
                    branch: Some(branch.to_owned()),
                    net:    NetOpts {
                        cancel: Some(token),
                        ..Default::default()
                    },
                };
                with_retry(&retry_opts, move |_| {
                    let clone_opts = clone_opts.clone();
                    async move { self.provider.clone_repo(dir, &clone_opts).await }
                })
            })
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(err @ GitMeshError::OperationAborted) => {
                    // A cancelled clone may have left partial state
                    // behind; drop HEAD so nothing mistakes the
                    // directory for a usable repository.
                    if let Err(cleanup) = self.provider.delete_ref(dir, "HEAD").await {
                        tracing::trace!(error = %cleanup, "No partial clone state to invalidate");
                    }
                    return Err(err);
                }
                Err(err) if err.class() == ErrorClass::UserActionable => return Err(err),
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "Clone failed, trying next mirror");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GitMeshError::not_found("any usable clone mirror".to_owned())
        }))
    }

    /// Deepens the local history. `None` means unbounded.
    async fn deepen(
        &self,
        dir: &Path,
        depth: Option<u32>,
        cancel: Option<CancellationToken>,
    ) -> GitMeshResult<()> {
        let timeout = TimeoutOptions::new("fetch", retry::FETCH_TIMEOUT);
        let timeout = match cancel {
            Some(token) => timeout.with_cancel(token),
            None => timeout,
        };
        with_timeout(timeout, |token| {
            async move {
                self.provider
                    .fetch(
                        dir,
                        &FetchOpts {
                            depth,
                            net: NetOpts {
                                cancel: Some(token),
                                ..Default::default()
                            },
                            ..Default::default()
                        },
                    )
                    .await
            }
        })
        .await
    }
}

/// Orders clone URLs: caller preference first, then SSH, then the
/// announcement order (HTTPS and the rest).
fn order_clone_urls(urls: &[String], preference: Option<&str>) -> Vec<String> {
    let mut ordered = Vec::new();
    if let Some(preferred) = preference
        && let Some(url) = urls.iter().find(|u| u.as_str() == preferred)
    {
        ordered.push(url.clone());
    }
    for url in urls {
        if is_ssh_url(url) && !ordered.contains(url) {
            ordered.push(url.clone());
        }
    }
    for url in urls {
        if !ordered.contains(url) {
            ordered.push(url.clone());
        }
    }
    ordered
}

fn is_ssh_url(url: &str) -> bool {
    url.starts_with("ssh://") || (url.contains('@') && url.contains(':') && !url.contains("://"))
}
