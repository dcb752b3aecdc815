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

//! In-crate fakes for the ports. Tests script these instead of mocking
//! frameworks: a deterministic Git provider with a depth-gated remote, a
//! recording event transport, and an in-memory filesystem.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use async_trait::async_trait;
use nostr::{
    event::{Event, EventId, UnsignedEvent},
    filter::Filter,
    key::{Keys, PublicKey},
    types::RelayUrl,
};
use tokio::sync::{Mutex, mpsc};

use crate::{
    error::{GitMeshError, GitMeshResult},
    ports::{
        BlossomMirror,
        CloneOpts,
        CommitInfo,
        CommitOpts,
        EventIo,
        FetchOpts,
        FileStat,
        Fs,
        GitProvider,
        MirrorProgress,
        PublishReceipt,
        PushOpts,
        RelaySubscriber,
        StatusEntry,
        TreeEntry,
    },
};

/// One local repository directory inside [`FakeProvider`].
#[derive(Debug, Default, Clone)]
pub struct FakeRepo {
    pub files:       BTreeMap<String, Vec<u8>>,
    pub refs:        BTreeMap<String, String>,
    pub remotes:     Vec<(String, String)>,
    pub staged:      Vec<String>,
    /// History depth available locally; objects deeper than this are
    /// invisible until a deepening fetch.
    pub depth:       u32,
    pub tags_synced: bool,
}

#[derive(Debug, Default)]
struct ObjectStore {
    blobs:   HashMap<String, Vec<u8>>,
    trees:   HashMap<String, Vec<TreeEntry>>,
    commits: HashMap<String, CommitInfo>,
    /// How deep each object sits; `0` means always visible.
    depths:  HashMap<String, u32>,
}

/// A scripted [`GitProvider`]. Objects live in one shared store; each
/// directory tracks which depth of it is locally visible.
#[derive(Default)]
pub struct FakeProvider {
    repos:           Mutex<HashMap<PathBuf, FakeRepo>>,
    objects:         Mutex<ObjectStore>,
    remote_refs:     Mutex<BTreeMap<String, String>>,
    fail_urls:       Mutex<HashSet<String>>,
    pub pushes:      Mutex<Vec<(Option<String>, Vec<String>)>>,
    pub calls:       Mutex<Vec<String>>,
    pub read_calls:  AtomicU32,
    commit_counter:  AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log_call(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
    }

    pub async fn seed_blob(&self, dir: &Path, oid: &str, content: &[u8]) {
        self.ensure_repo(dir).await;
        self.objects
            .lock()
            .await
            .blobs
            .insert(oid.to_owned(), content.to_vec());
    }

    pub async fn seed_tree(&self, dir: &Path, oid: &str, entries: Vec<TreeEntry>) {
        self.ensure_repo(dir).await;
        self.objects.lock().await.trees.insert(oid.to_owned(), entries);
    }

    pub async fn seed_commit(&self, dir: &Path, commit: CommitInfo) {
        self.ensure_repo(dir).await;
        self.objects
            .lock()
            .await
            .commits
            .insert(commit.oid.clone(), commit);
    }

    pub async fn seed_ref(&self, dir: &Path, name: &str, oid: &str) {
        self.ensure_repo(dir).await;
        self.repos
            .lock()
            .await
            .get_mut(dir)
            .expect("just ensured")
            .refs
            .insert(name.to_owned(), oid.to_owned());
    }

    pub async fn seed_file(&self, dir: &Path, path: &str, content: &[u8]) {
        self.ensure_repo(dir).await;
        self.repos
            .lock()
            .await
            .get_mut(dir)
            .expect("just ensured")
            .files
            .insert(path.to_owned(), content.to_vec());
    }

    /// Marks an object as only reachable at the given history depth.
    pub async fn set_object_depth(&self, oid: &str, depth: u32) {
        self.objects
            .lock()
            .await
            .depths
            .insert(oid.to_owned(), depth);
    }

    /// Seeds the remote the provider clones and fetches from.
    pub async fn seed_remote_ref(&self, name: &str, oid: &str) {
        self.remote_refs
            .lock()
            .await
            .insert(name.to_owned(), oid.to_owned());
    }

    /// Makes every network operation against `url` fail.
    pub async fn fail_url(&self, url: &str) {
        self.fail_urls.lock().await.insert(url.to_owned());
    }

    pub async fn repo(&self, dir: &Path) -> Option<FakeRepo> {
        self.repos.lock().await.get(dir).cloned()
    }

    async fn ensure_repo(&self, dir: &Path) {
        self.repos
            .lock()
            .await
            .entry(dir.to_path_buf())
            .or_insert_with(|| {
                FakeRepo {
                    depth: u32::MAX,
                    ..Default::default()
                }
            });
    }

    async fn check_url(&self, url: &str) -> GitMeshResult<()> {
        if self.fail_urls.lock().await.contains(url) {
            return Err(GitMeshError::network("fake", format!("unreachable `{url}`")));
        }
        Ok(())
    }

    async fn visible(&self, dir: &Path, oid: &str) -> GitMeshResult<()> {
        let depth = self
            .repos
            .lock()
            .await
            .get(dir)
            .map(|r| r.depth)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        let object_depth = self
            .objects
            .lock()
            .await
            .depths
            .get(oid)
            .copied()
            .unwrap_or(0);
        if object_depth > depth {
            return Err(GitMeshError::not_found(format!("object `{oid}`")));
        }
        Ok(())
    }
}

#[async_trait]
impl GitProvider for FakeProvider {
    async fn clone_repo(&self, dir: &Path, opts: &CloneOpts) -> GitMeshResult<()> {
        self.log_call(format!("clone:{}:{:?}", opts.url, opts.depth)).await;
        self.check_url(&opts.url).await?;
        let refs = self.remote_refs.lock().await.clone();
        self.repos.lock().await.insert(
            dir.to_path_buf(),
            FakeRepo {
                refs,
                remotes: vec![("origin".to_owned(), opts.url.clone())],
                depth: opts.depth.unwrap_or(u32::MAX),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn fetch(&self, dir: &Path, opts: &FetchOpts) -> GitMeshResult<()> {
        self.log_call(format!(
            "fetch:{:?}:{:?}:tags={}",
            opts.depth, opts.branch, opts.tags
        ))
        .await;
        if let Some(url) = &opts.url {
            self.check_url(url).await?;
        }
        let remote = self.remote_refs.lock().await.clone();
        let mut repos = self.repos.lock().await;
        let repo = repos
            .get_mut(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        // A fetch without an explicit depth does not unshallow.
        if let Some(depth) = opts.depth {
            repo.depth = repo.depth.max(depth);
        }
        if opts.tags {
            repo.tags_synced = true;
        }
        match &opts.branch {
            Some(branch) => {
                let name = format!("refs/heads/{branch}");
                if let Some(oid) = remote.get(&name) {
                    repo.refs.insert(name, oid.clone());
                } else {
                    return Err(GitMeshError::not_found(format!("remote branch `{branch}`")));
                }
            }
            None => repo.refs.extend(remote),
        }
        Ok(())
    }

    async fn push(&self, dir: &Path, opts: &PushOpts) -> GitMeshResult<()> {
        self.log_call(format!("push:{:?}", opts.url)).await;
        let url = match &opts.url {
            Some(url) => Some(url.clone()),
            None => {
                self.repos
                    .lock()
                    .await
                    .get(dir)
                    .and_then(|r| r.remotes.first().map(|(_, url)| url.clone()))
            }
        };
        if let Some(url) = &url {
            self.check_url(url).await?;
        }
        self.pushes.lock().await.push((
            url,
            opts.refspecs.iter().map(ToString::to_string).collect(),
        ));
        Ok(())
    }

    async fn pull(&self, dir: &Path, opts: &FetchOpts) -> GitMeshResult<()> {
        self.fetch(dir, opts).await
    }

    async fn init(&self, dir: &Path) -> GitMeshResult<()> {
        self.ensure_repo(dir).await;
        Ok(())
    }

    async fn commit(&self, dir: &Path, opts: &CommitOpts) -> GitMeshResult<String> {
        let number = self.commit_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let oid = format!("{number:040x}");
        let mut repos = self.repos.lock().await;
        let repo = repos
            .get_mut(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        let parent = repo.refs.get("refs/heads/main").cloned();
        repo.refs.insert("refs/heads/main".to_owned(), oid.clone());
        repo.staged.clear();
        drop(repos);
        self.objects.lock().await.commits.insert(
            oid.clone(),
            CommitInfo {
                oid: oid.clone(),
                tree: String::new(),
                parents: parent.into_iter().collect(),
                author: crate::events::types::Committer {
                    name: opts.name.clone(),
                    email: opts.email.clone(),
                    timestamp: 0,
                    tz_minutes: 0,
                },
                committer: crate::events::types::Committer {
                    name: opts.name.clone(),
                    email: opts.email.clone(),
                    timestamp: 0,
                    tz_minutes: 0,
                },
                message: opts.message.clone(),
            },
        );
        self.log_call(format!("commit:{oid}")).await;
        Ok(oid)
    }

    async fn log(
        &self,
        dir: &Path,
        start: &str,
        depth: Option<usize>,
    ) -> GitMeshResult<Vec<CommitInfo>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let oids = self.walk(dir, start, depth).await?;
        let objects = self.objects.lock().await;
        Ok(oids
            .iter()
            .filter_map(|oid| objects.commits.get(oid).cloned())
            .collect())
    }

    async fn status(&self, dir: &Path) -> GitMeshResult<Vec<StatusEntry>> {
        let repos = self.repos.lock().await;
        let repo = repos
            .get(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        Ok(repo
            .staged
            .iter()
            .map(|path| {
                StatusEntry {
                    path:   path.clone(),
                    staged: true,
                    state:  "modified".to_owned(),
                }
            })
            .collect())
    }

    async fn walk(
        &self,
        dir: &Path,
        start: &str,
        depth: Option<usize>,
    ) -> GitMeshResult<Vec<String>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.visible(dir, start).await?;
        let objects = self.objects.lock().await;
        let mut oids = Vec::new();
        let mut cursor = Some(start.to_owned());
        while let Some(oid) = cursor {
            if depth.is_some_and(|d| oids.len() >= d) {
                break;
            }
            cursor = objects
                .commits
                .get(&oid)
                .and_then(|c| c.parents.first().cloned());
            oids.push(oid);
        }
        Ok(oids)
    }

    async fn read_blob(&self, dir: &Path, oid: &str) -> GitMeshResult<Vec<u8>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.log_call(format!("read_blob:{oid}")).await;
        self.visible(dir, oid).await?;
        self.objects
            .lock()
            .await
            .blobs
            .get(oid)
            .cloned()
            .ok_or_else(|| GitMeshError::not_found(format!("blob `{oid}`")))
    }

    async fn read_commit(&self, dir: &Path, oid: &str) -> GitMeshResult<CommitInfo> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.log_call(format!("read_commit:{oid}")).await;
        self.visible(dir, oid).await?;
        self.objects
            .lock()
            .await
            .commits
            .get(oid)
            .cloned()
            .ok_or_else(|| GitMeshError::not_found(format!("commit `{oid}`")))
    }

    async fn read_tree(&self, dir: &Path, oid: &str) -> GitMeshResult<Vec<TreeEntry>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.log_call(format!("read_tree:{oid}")).await;
        self.visible(dir, oid).await?;
        self.objects
            .lock()
            .await
            .trees
            .get(oid)
            .cloned()
            .ok_or_else(|| GitMeshError::not_found(format!("tree `{oid}`")))
    }

    async fn write_ref(&self, dir: &Path, name: &str, oid: &str) -> GitMeshResult<()> {
        self.seed_ref(dir, name, oid).await;
        Ok(())
    }

    async fn delete_ref(&self, dir: &Path, name: &str) -> GitMeshResult<()> {
        self.repos
            .lock()
            .await
            .get_mut(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?
            .refs
            .remove(name);
        Ok(())
    }

    async fn list_refs(&self, dir: &Path) -> GitMeshResult<Vec<(String, String)>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let repos = self.repos.lock().await;
        let repo = repos
            .get(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        Ok(repo
            .refs
            .iter()
            .map(|(name, oid)| (name.clone(), oid.clone()))
            .collect())
    }

    async fn list_branches(&self, dir: &Path) -> GitMeshResult<Vec<String>> {
        Ok(self
            .list_refs(dir)
            .await?
            .into_iter()
            .filter_map(|(name, _)| {
                name.strip_prefix("refs/heads/").map(ToOwned::to_owned)
            })
            .collect())
    }

    async fn list_tags(&self, dir: &Path) -> GitMeshResult<Vec<String>> {
        Ok(self
            .list_refs(dir)
            .await?
            .into_iter()
            .filter_map(|(name, _)| {
                name.strip_prefix("refs/tags/").map(ToOwned::to_owned)
            })
            .collect())
    }

    async fn resolve_ref(&self, dir: &Path, name: &str) -> GitMeshResult<String> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.log_call(format!("resolve_ref:{name}")).await;
        let repos = self.repos.lock().await;
        let repo = repos
            .get(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        repo.refs
            .get(name)
            .cloned()
            .ok_or_else(|| GitMeshError::not_found(format!("ref `{name}`")))
    }

    async fn list_remotes(&self, dir: &Path) -> GitMeshResult<Vec<(String, String)>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let repos = self.repos.lock().await;
        Ok(repos.get(dir).map(|r| r.remotes.clone()).unwrap_or_default())
    }

    async fn add(&self, dir: &Path, path: &str) -> GitMeshResult<()> {
        self.repos
            .lock()
            .await
            .get_mut(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?
            .staged
            .push(path.to_owned());
        Ok(())
    }

    async fn remove(&self, dir: &Path, path: &str) -> GitMeshResult<()> {
        let mut repos = self.repos.lock().await;
        let repo = repos
            .get_mut(dir)
            .ok_or_else(|| GitMeshError::not_found(format!("repository `{}`", dir.display())))?;
        repo.files.remove(path);
        repo.staged.push(path.to_owned());
        Ok(())
    }

    async fn checkout(&self, dir: &Path, branch: &str) -> GitMeshResult<()> {
        self.log_call(format!("checkout:{branch}")).await;
        Ok(())
    }

    async fn write_file(&self, dir: &Path, path: &str, content: &[u8]) -> GitMeshResult<()> {
        self.seed_file(dir, path, content).await;
        Ok(())
    }

    async fn read_file(&self, dir: &Path, path: &str) -> GitMeshResult<Vec<u8>> {
        let repos = self.repos.lock().await;
        repos
            .get(dir)
            .and_then(|r| r.files.get(path).cloned())
            .ok_or_else(|| GitMeshError::not_found(format!("file `{path}`")))
    }
}

/// A recording [`EventIo`] with a canned relay store.
pub struct FakeEventIo {
    pub keys:      Keys,
    pub canned:    Mutex<Vec<Event>>,
    pub published: Mutex<Vec<Event>>,
    pub relays:    Mutex<Vec<RelayUrl>>,
}

impl FakeEventIo {
    pub fn new() -> Self {
        Self {
            keys:      Keys::generate(),
            canned:    Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            relays:    Mutex::new(Vec::new()),
        }
    }

    pub async fn seed_event(&self, event: Event) {
        self.canned.lock().await.push(event);
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }
}

/// Manual filter matching over the fields the runtime queries by.
pub fn filter_matches(filter: &Filter, event: &Event) -> bool {
    if let Some(kinds) = &filter.kinds
        && !kinds.contains(&event.kind)
    {
        return false;
    }
    if let Some(authors) = &filter.authors
        && !authors.contains(&event.pubkey)
    {
        return false;
    }
    if let Some(ids) = &filter.ids
        && !ids.contains(&event.id)
    {
        return false;
    }
    for (letter, values) in filter.generic_tags.iter() {
        let kind = nostr::event::TagKind::SingleLetter(*letter);
        let present = event.tags.filter(kind).filter_map(|t| t.content());
        let mut found = false;
        for value in present {
            if values.iter().any(|v| v.to_string() == value) {
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
    }
    true
}

#[async_trait]
impl EventIo for FakeEventIo {
    async fn fetch_events(
        &self,
        filter: Filter,
        _timeout: std::time::Duration,
    ) -> GitMeshResult<Vec<Event>> {
        Ok(self
            .canned
            .lock()
            .await
            .iter()
            .filter(|e| filter_matches(&filter, e))
            .cloned()
            .collect())
    }

    async fn publish_event(&self, event: UnsignedEvent) -> GitMeshResult<PublishReceipt> {
        let signed = self.sign_event(event).await?;
        self.published.lock().await.push(signed);
        Ok(PublishReceipt {
            ok: true,
            ..Default::default()
        })
    }

    async fn sign_event(&self, event: UnsignedEvent) -> GitMeshResult<Event> {
        event
            .sign_with_keys(&self.keys)
            .map_err(|err| GitMeshError::Internal(err.to_string()))
    }

    async fn current_pubkey(&self) -> GitMeshResult<Option<PublicKey>> {
        Ok(Some(self.keys.public_key()))
    }

    async fn ensure_relays(&self, relays: &[RelayUrl]) -> GitMeshResult<()> {
        self.relays.lock().await.extend(relays.iter().cloned());
        Ok(())
    }
}

/// A manual-pump [`RelaySubscriber`].
#[derive(Default)]
pub struct FakeSubscriber {
    subs:        Mutex<HashMap<String, (Filter, mpsc::Sender<Event>)>>,
    counter:     AtomicU64,
    pub events:  Mutex<Vec<Event>>,
}

impl FakeSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an event to every matching live subscription.
    pub async fn emit(&self, event: Event) {
        let subs = self.subs.lock().await;
        for (filter, sender) in subs.values() {
            if filter_matches(filter, &event) {
                let _ = sender.send(event.clone()).await;
            }
        }
    }

    pub async fn live_subscriptions(&self) -> usize {
        self.subs.lock().await.len()
    }
}

#[async_trait]
impl RelaySubscriber for FakeSubscriber {
    async fn subscribe(
        &self,
        filter: Filter,
        events: mpsc::Sender<Event>,
    ) -> GitMeshResult<String> {
        let id = format!("sub-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.subs.lock().await.insert(id.clone(), (filter, events));
        Ok(id)
    }

    async fn unsubscribe(&self, sub_id: &str) -> GitMeshResult<()> {
        self.subs.lock().await.remove(sub_id);
        Ok(())
    }

    async fn publish(&self, event: Event) -> GitMeshResult<EventId> {
        let id = event.id;
        self.events.lock().await.push(event);
        Ok(id)
    }
}

/// An in-memory [`Fs`] with an optional recording Blossom mirror.
#[derive(Default)]
pub struct MemoryFs {
    files:              Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    pub mirror_enabled: bool,
    pub mirror_pushes:  Mutex<Vec<(PathBuf, String)>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror() -> Self {
        Self {
            mirror_enabled: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Fs for MemoryFs {
    async fn read_file(&self, path: &Path) -> GitMeshResult<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| GitMeshError::not_found(format!("file `{}`", path.display())))
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> GitMeshResult<()> {
        self.files
            .lock()
            .await
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn mkdir(&self, _path: &Path) -> GitMeshResult<()> {
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> GitMeshResult<Vec<String>> {
        let files = self.files.lock().await;
        Ok(files
            .keys()
            .filter_map(|p| p.strip_prefix(path).ok())
            .filter_map(|p| p.iter().next())
            .map(|c| c.to_string_lossy().into_owned())
            .collect())
    }

    async fn stat(&self, path: &Path) -> GitMeshResult<FileStat> {
        let files = self.files.lock().await;
        if let Some(data) = files.get(path) {
            return Ok(FileStat {
                size:        data.len() as u64,
                is_dir:      false,
                modified_ms: None,
            });
        }
        if files.keys().any(|p| p.starts_with(path)) {
            return Ok(FileStat {
                size:        0,
                is_dir:      true,
                modified_ms: None,
            });
        }
        Err(GitMeshError::not_found(format!("path `{}`", path.display())))
    }

    async fn unlink(&self, path: &Path) -> GitMeshResult<()> {
        self.files.lock().await.remove(path);
        Ok(())
    }

    fn blossom(&self) -> Option<&dyn BlossomMirror> {
        self.mirror_enabled.then_some(self as &dyn BlossomMirror)
    }
}

#[async_trait]
impl BlossomMirror for MemoryFs {
    async fn push_to_blossom(
        &self,
        dir: &Path,
        endpoint: &str,
        _on_progress: Option<MirrorProgress>,
    ) -> GitMeshResult<()> {
        self.mirror_pushes
            .lock()
            .await
            .push((dir.to_path_buf(), endpoint.to_owned()));
        Ok(())
    }
}
