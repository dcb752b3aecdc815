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

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::GitMeshResult,
    ports::{
        CloneOpts,
        CommitInfo,
        CommitOpts,
        FetchOpts,
        GitProvider,
        PushOpts,
        StatusEntry,
        TreeEntry,
    },
};

/// Default idle lifetime of a per-directory cache entry.
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(30);

/// Caching policy of a [`CachedProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Cache object and ref reads, expiring entries idle longer than the
    /// given age.
    ReadThrough { max_age: Duration },
    /// Bypass caching entirely.
    Off,
}

/// One read result. Object reads are immutable by oid; ref-level reads
/// are only valid until the next mutating call on the directory.
#[derive(Debug, Clone)]
enum CachedValue {
    Bytes(Vec<u8>),
    Oid(String),
    Names(Vec<String>),
    Pairs(Vec<(String, String)>),
    Commit(CommitInfo),
    Commits(Vec<CommitInfo>),
    Tree(Vec<TreeEntry>),
}

#[derive(Debug, Default)]
struct DirCache {
    values:    HashMap<String, CachedValue>,
    last_used: Option<Instant>,
}

/// A [`GitProvider`] wrapper with a per-directory read cache. Reads go
/// through the cache; every mutating call invalidates the directory's
/// entry; entries idle past `max_age` are replaced wholesale.
pub struct CachedProvider<P> {
    inner: P,
    mode:  CacheMode,
    dirs:  Mutex<HashMap<PathBuf, DirCache>>,
}

impl<P> CachedProvider<P> {
    pub fn new(inner: P, mode: CacheMode) -> Self {
        Self {
            inner,
            mode,
            dirs: Mutex::new(HashMap::new()),
        }
    }

    /// Wraps with the default read-through policy.
    pub fn with_default_ttl(inner: P) -> Self {
        Self::new(
            inner,
            CacheMode::ReadThrough {
                max_age: DEFAULT_CACHE_MAX_AGE,
            },
        )
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Drops the cache entry of one directory.
    pub async fn invalidate(&self, dir: &Path) {
        self.dirs.lock().await.remove(dir);
    }

    async fn lookup(&self, dir: &Path, key: &str) -> Option<CachedValue> {
        let CacheMode::ReadThrough { max_age } = self.mode else {
            return None;
        };
        let mut dirs = self.dirs.lock().await;
        let entry = dirs.entry(dir.to_path_buf()).or_default();
        if entry
            .last_used
            .is_some_and(|at| at.elapsed() > max_age)
        {
            tracing::trace!(dir = %dir.display(), "Cache entry expired");
            *entry = DirCache::default();
        }
        entry.last_used = Some(Instant::now());
        entry.values.get(key).cloned()
    }

    async fn store(&self, dir: &Path, key: String, value: CachedValue) {
        if matches!(self.mode, CacheMode::Off) {
            return;
        }
        let mut dirs = self.dirs.lock().await;
        let entry = dirs.entry(dir.to_path_buf()).or_default();
        entry.last_used = Some(Instant::now());
        entry.values.insert(key, value);
    }
}

/// Reads delegate through the cache; writes delegate then invalidate.
macro_rules! cached_read {
    ($self:ident, $dir:ident, $key:expr, $variant:ident, $fetch:expr) => {{
        if let Some(CachedValue::$variant(value)) = $self.lookup($dir, &$key).await {
            tracing::trace!(dir = %$dir.display(), key = %$key, "Cache hit");
            return Ok(value.into());
        }
        let value = $fetch;
        $self
            .store($dir, $key, CachedValue::$variant(value.clone().into()))
            .await;
        Ok(value)
    }};
}

#[async_trait]
impl<P: GitProvider> GitProvider for CachedProvider<P> {
    async fn clone_repo(&self, dir: &Path, opts: &CloneOpts) -> GitMeshResult<()> {
        let result = self.inner.clone_repo(dir, opts).await;
        self.invalidate(dir).await;
        result
    }

    async fn fetch(&self, dir: &Path, opts: &FetchOpts) -> GitMeshResult<()> {
        let result = self.inner.fetch(dir, opts).await;
        self.invalidate(dir).await;
        result
    }

    async fn push(&self, dir: &Path, opts: &PushOpts) -> GitMeshResult<()> {
        let result = self.inner.push(dir, opts).await;
        self.invalidate(dir).await;
        result
    }

    async fn pull(&self, dir: &Path, opts: &FetchOpts) -> GitMeshResult<()> {
        let result = self.inner.pull(dir, opts).await;
        self.invalidate(dir).await;
        result
    }

    async fn init(&self, dir: &Path) -> GitMeshResult<()> {
        let result = self.inner.init(dir).await;
        self.invalidate(dir).await;
        result
    }

    async fn commit(&self, dir: &Path, opts: &CommitOpts) -> GitMeshResult<String> {
        let result = self.inner.commit(dir, opts).await;
        self.invalidate(dir).await;
        result
    }

    async fn log(
        &self,
        dir: &Path,
        start: &str,
        depth: Option<usize>,
    ) -> GitMeshResult<Vec<CommitInfo>> {
        let key = format!("log:{start}:{depth:?}");
        cached_read!(self, dir, key, Commits, {
            self.inner.log(dir, start, depth).await?
        })
    }

    async fn status(&self, dir: &Path) -> GitMeshResult<Vec<StatusEntry>> {
        // Working-tree state is too volatile to cache.
        self.inner.status(dir).await
    }

    async fn walk(
        &self,
        dir: &Path,
        start: &str,
        depth: Option<usize>,
    ) -> GitMeshResult<Vec<String>> {
        let key = format!("walk:{start}:{depth:?}");
        cached_read!(self, dir, key, Names, {
            self.inner.walk(dir, start, depth).await?
        })
    }

    async fn read_blob(&self, dir: &Path, oid: &str) -> GitMeshResult<Vec<u8>> {
        let key = format!("blob:{oid}");
        cached_read!(self, dir, key, Bytes, {
            self.inner.read_blob(dir, oid).await?
        })
    }

    async fn read_commit(&self, dir: &Path, oid: &str) -> GitMeshResult<CommitInfo> {
        let key = format!("commit:{oid}");
        cached_read!(self, dir, key, Commit, {
            self.inner.read_commit(dir, oid).await?
        })
    }

    async fn read_tree(&self, dir: &Path, oid: &str) -> GitMeshResult<Vec<TreeEntry>> {
        let key = format!("tree:{oid}");
        cached_read!(self, dir, key, Tree, {
            self.inner.read_tree(dir, oid).await?
        })
    }

    async fn write_ref(&self, dir: &Path, name: &str, oid: &str) -> GitMeshResult<()> {
        let result = self.inner.write_ref(dir, name, oid).await;
        self.invalidate(dir).await;
        result
    }

    async fn delete_ref(&self, dir: &Path, name: &str) -> GitMeshResult<()> {
        let result = self.inner.delete_ref(dir, name).await;
        self.invalidate(dir).await;
        result
    }

    async fn list_refs(&self, dir: &Path) -> GitMeshResult<Vec<(String, String)>> {
        let key = "refs".to_owned();
        cached_read!(self, dir, key, Pairs, { self.inner.list_refs(dir).await? })
    }

    async fn list_branches(&self, dir: &Path) -> GitMeshResult<Vec<String>> {
        let key = "branches".to_owned();
        cached_read!(self, dir, key, Names, {
            self.inner.list_branches(dir).await?
        })
    }

    async fn list_tags(&self, dir: &Path) -> GitMeshResult<Vec<String>> {
        let key = "tags".to_owned();
        cached_read!(self, dir, key, Names, { self.inner.list_tags(dir).await? })
    }

    async fn resolve_ref(&self, dir: &Path, name: &str) -> GitMeshResult<String> {
        let key = format!("ref:{name}");
        cached_read!(self, dir, key, Oid, {
            self.inner.resolve_ref(dir, name).await?
        })
    }

    async fn list_remotes(&self, dir: &Path) -> GitMeshResult<Vec<(String, String)>> {
        let key = "remotes".to_owned();
        cached_read!(self, dir, key, Pairs, {
            self.inner.list_remotes(dir).await?
        })
    }

    async fn add(&self, dir: &Path, path: &str) -> GitMeshResult<()> {
        let result = self.inner.add(dir, path).await;
        self.invalidate(dir).await;
        result
    }

    async fn remove(&self, dir: &Path, path: &str) -> GitMeshResult<()> {
        let result = self.inner.remove(dir, path).await;
        self.invalidate(dir).await;
        result
    }

    async fn checkout(&self, dir: &Path, branch: &str) -> GitMeshResult<()> {
        let result = self.inner.checkout(dir, branch).await;
        self.invalidate(dir).await;
        result
    }

    async fn write_file(&self, dir: &Path, path: &str, content: &[u8]) -> GitMeshResult<()> {
        let result = self.inner.write_file(dir, path, content).await;
        self.invalidate(dir).await;
        result
    }

    async fn read_file(&self, dir: &Path, path: &str) -> GitMeshResult<Vec<u8>> {
        // Working-tree reads bypass the cache for the same reason as
        // `status`.
        self.inner.read_file(dir, path).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testutil::FakeProvider;

    fn dir() -> PathBuf {
        PathBuf::from("/repos/demo")
    }

    #[tokio::test]
    async fn repeated_reads_hit_the_cache() {
        let provider = FakeProvider::new();
        provider.seed_blob(&dir(), "abc123", b"hello").await;
        let cached = CachedProvider::with_default_ttl(provider);

        assert_eq!(cached.read_blob(&dir(), "abc123").await.unwrap(), b"hello");
        assert_eq!(cached.read_blob(&dir(), "abc123").await.unwrap(), b"hello");
        assert_eq!(cached.inner().read_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn writes_invalidate_the_directory() {
        let provider = FakeProvider::new();
        provider.seed_blob(&dir(), "abc123", b"hello").await;
        provider.seed_ref(&dir(), "refs/heads/main", "abc123").await;
        let cached = CachedProvider::with_default_ttl(provider);

        cached.resolve_ref(&dir(), "refs/heads/main").await.unwrap();
        cached
            .write_ref(&dir(), "refs/heads/main", "def456")
            .await
            .unwrap();
        cached.resolve_ref(&dir(), "refs/heads/main").await.unwrap();

        // Both resolves reached the provider.
        assert_eq!(cached.inner().read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_replaced() {
        let provider = FakeProvider::new();
        provider.seed_blob(&dir(), "abc123", b"hello").await;
        let cached = CachedProvider::new(
            provider,
            CacheMode::ReadThrough {
                max_age: Duration::from_millis(20),
            },
        );

        cached.read_blob(&dir(), "abc123").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cached.read_blob(&dir(), "abc123").await.unwrap();
        assert_eq!(cached.inner().read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn off_mode_bypasses_caching() {
        let provider = FakeProvider::new();
        provider.seed_blob(&dir(), "abc123", b"hello").await;
        let cached = CachedProvider::new(provider, CacheMode::Off);

        cached.read_blob(&dir(), "abc123").await.unwrap();
        cached.read_blob(&dir(), "abc123").await.unwrap();
        assert_eq!(cached.inner().read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn caches_are_per_directory() {
        let provider = FakeProvider::new();
        provider.seed_blob(&dir(), "abc123", b"hello").await;
        provider
            .seed_blob(Path::new("/repos/other"), "abc123", b"world")
            .await;
        let cached = CachedProvider::with_default_ttl(provider);

        assert_eq!(cached.read_blob(&dir(), "abc123").await.unwrap(), b"hello");
        assert_eq!(
            cached
                .read_blob(Path::new("/repos/other"), "abc123")
                .await
                .unwrap(),
            b"world"
        );
        assert_eq!(cached.inner().read_calls.load(Ordering::SeqCst), 2);
    }
}
