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

//! The ports this runtime consumes. Git plumbing, relay transport, signing
//! and the filesystem are all external; the core only ever sees these
//! traits, so every one of them is mockable.

use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use nostr::{
    event::{Event, EventId, UnsignedEvent},
    filter::Filter,
    key::PublicKey,
    types::RelayUrl,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{GitMeshError, GitMeshResult},
    events::types::Committer,
};

/// Ref prefix whose pushes become patch events instead of Git pushes.
pub const PR_REF_PREFIX: &str = "refs/heads/pr/";

/// CORS proxy selection for network-bearing Git calls. Relay-hosted Git
/// endpoints reject proxied requests, so callers must be able to disable
/// the proxy explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorsProxy {
    /// Use the provider's configured default.
    #[default]
    Default,
    /// No proxy, even if the provider has a default.
    Disabled,
    /// A specific proxy URL.
    Url(String),
}

/// Hook for outer transports that must stamp requests, e.g. a NIP-98
/// wrapper producing `Authorization: Nostr <base64(signed event)>`.
#[async_trait]
pub trait HttpAuth: Send + Sync {
    async fn authorization(&self, url: &str, method: &str) -> GitMeshResult<Option<String>>;
}

/// Options every network-bearing provider call accepts.
#[derive(Clone, Default)]
pub struct NetOpts {
    pub cors_proxy: CorsProxy,
    /// HTTP override for signed transports.
    pub http:       Option<Arc<dyn HttpAuth>>,
    /// Cooperative cancellation; checked at every suspension point.
    pub cancel:     Option<CancellationToken>,
}

impl std::fmt::Debug for NetOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetOpts")
            .field("cors_proxy", &self.cors_proxy)
            .field("http", &self.http.as_ref().map(|_| "<override>"))
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// An author/committer signature.
pub type Signature = Committer;

/// A commit as read from the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub oid:       String,
    pub tree:      String,
    pub parents:   Vec<String>,
    pub author:    Signature,
    pub committer: Signature,
    pub message:   String,
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEntryKind {
    Blob,
    Tree,
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub oid:  String,
    pub kind: TreeEntryKind,
    pub mode: String,
}

/// Working-tree status of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path:   String,
    pub staged: bool,
    pub state:  String,
}

/// A push refspec `[+]<src>:<dst>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub src:   String,
    pub dst:   String,
    pub force: bool,
}

impl RefSpec {
    /// Whether this refspec belongs to the PR class, which is routed to
    /// patch events instead of a Git push.
    pub fn is_pr(&self) -> bool {
        self.dst.starts_with(PR_REF_PREFIX) || self.src.starts_with(PR_REF_PREFIX)
    }
}

impl FromStr for RefSpec {
    type Err = GitMeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (force, rest) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (src, dst) = rest
            .split_once(':')
            .map(|(src, dst)| (src.to_owned(), dst.to_owned()))
            .unwrap_or_else(|| (rest.to_owned(), rest.to_owned()));
        if src.is_empty() || dst.is_empty() {
            return Err(GitMeshError::InvalidInput(format!("Empty refspec `{s}`")));
        }
        Ok(Self { src, dst, force })
    }
}

impl std::fmt::Display for RefSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.force {
            write!(f, "+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

/// Options for clone operations.
#[derive(Debug, Clone, Default)]
pub struct CloneOpts {
    pub url:    String,
    pub depth:  Option<u32>,
    pub branch: Option<String>,
    pub net:    NetOpts,
}

/// Options for fetch operations.
#[derive(Debug, Clone, Default)]
pub struct FetchOpts {
    /// Remote URL; the provider's `origin` when absent.
    pub url:    Option<String>,
    pub depth:  Option<u32>,
    pub branch: Option<String>,
    /// Also fetch tags.
    pub tags:   bool,
    pub net:    NetOpts,
}

/// Options for push operations.
#[derive(Debug, Clone, Default)]
pub struct PushOpts {
    pub url:      Option<String>,
    pub refspecs: Vec<RefSpec>,
    pub net:      NetOpts,
}

/// Options for commit operations.
#[derive(Debug, Clone, Default)]
pub struct CommitOpts {
    pub message: String,
    pub name:    String,
    pub email:   String,
}

/// The Git plumbing surface the runtime drives. Implementations wrap a
/// real Git library or binary; the runtime never touches object formats
/// itself.
#[async_trait]
pub trait GitProvider: Send + Sync {
    async fn clone_repo(&self, dir: &Path, opts: &CloneOpts) -> GitMeshResult<()>;
    async fn fetch(&self, dir: &Path, opts: &FetchOpts) -> GitMeshResult<()>;
    async fn push(&self, dir: &Path, opts: &PushOpts) -> GitMeshResult<()>;
    async fn pull(&self, dir: &Path, opts: &FetchOpts) -> GitMeshResult<()>;
    async fn init(&self, dir: &Path) -> GitMeshResult<()>;
    async fn commit(&self, dir: &Path, opts: &CommitOpts) -> GitMeshResult<String>;
    /// Commits reachable from `start`, newest first, bounded by `depth`.
    async fn log(&self, dir: &Path, start: &str, depth: Option<usize>)
    -> GitMeshResult<Vec<CommitInfo>>;
    async fn status(&self, dir: &Path) -> GitMeshResult<Vec<StatusEntry>>;
    /// Commit oids reachable from `start`, newest first.
    async fn walk(&self, dir: &Path, start: &str, depth: Option<usize>)
    -> GitMeshResult<Vec<String>>;
    async fn read_blob(&self, dir: &Path, oid: &str) -> GitMeshResult<Vec<u8>>;
    async fn read_commit(&self, dir: &Path, oid: &str) -> GitMeshResult<CommitInfo>;
    async fn read_tree(&self, dir: &Path, oid: &str) -> GitMeshResult<Vec<TreeEntry>>;
    async fn write_ref(&self, dir: &Path, name: &str, oid: &str) -> GitMeshResult<()>;
    async fn delete_ref(&self, dir: &Path, name: &str) -> GitMeshResult<()>;
    async fn list_refs(&self, dir: &Path) -> GitMeshResult<Vec<(String, String)>>;
    async fn list_branches(&self, dir: &Path) -> GitMeshResult<Vec<String>>;
    async fn list_tags(&self, dir: &Path) -> GitMeshResult<Vec<String>>;
    async fn resolve_ref(&self, dir: &Path, name: &str) -> GitMeshResult<String>;
    async fn list_remotes(&self, dir: &Path) -> GitMeshResult<Vec<(String, String)>>;
    async fn add(&self, dir: &Path, path: &str) -> GitMeshResult<()>;
    async fn remove(&self, dir: &Path, path: &str) -> GitMeshResult<()>;
    async fn checkout(&self, dir: &Path, branch: &str) -> GitMeshResult<()>;
    /// Writes file content into the working tree. Used by patch
    /// application before `add`/`commit`.
    async fn write_file(&self, dir: &Path, path: &str, content: &[u8]) -> GitMeshResult<()>;
    /// Reads file content from the working tree.
    async fn read_file(&self, dir: &Path, path: &str) -> GitMeshResult<Vec<u8>>;
}

/// Outcome of publishing one event.
#[derive(Debug, Clone, Default)]
pub struct PublishReceipt {
    pub ok:     bool,
    pub error:  Option<String>,
    /// Relays that accepted the event.
    pub relays: Vec<RelayUrl>,
}

/// Relay-facing event I/O plus signing. This is the only capability the
/// runtime uses to produce signed events; callers never construct signer
/// objects themselves.
#[async_trait]
pub trait EventIo: Send + Sync {
    async fn fetch_events(&self, filter: Filter, timeout: Duration) -> GitMeshResult<Vec<Event>>;
    async fn publish_event(&self, event: UnsignedEvent) -> GitMeshResult<PublishReceipt>;
    async fn sign_event(&self, event: UnsignedEvent) -> GitMeshResult<Event>;
    async fn current_pubkey(&self) -> GitMeshResult<Option<PublicKey>>;
    /// Makes the given relays part of the pool before the next operation.
    /// Implementations without a pool may ignore this.
    async fn ensure_relays(&self, _relays: &[RelayUrl]) -> GitMeshResult<()> {
        Ok(())
    }
}

/// Lower-level streaming subscriptions, used by the thread subsystem.
/// Matching events are delivered on the channel until unsubscribed.
#[async_trait]
pub trait RelaySubscriber: Send + Sync {
    async fn subscribe(
        &self,
        filter: Filter,
        events: mpsc::Sender<Event>,
    ) -> GitMeshResult<String>;
    async fn unsubscribe(&self, sub_id: &str) -> GitMeshResult<()>;
    async fn publish(&self, event: Event) -> GitMeshResult<EventId>;
}

/// A signing capability. Usually embedded in [`EventIo`]; standalone
/// implementations exist for import-time minting of ephemeral identities.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_event(&self, event: UnsignedEvent) -> GitMeshResult<Event>;
    async fn public_key(&self) -> GitMeshResult<PublicKey>;
}

#[async_trait]
impl Signer for nostr::key::Keys {
    async fn sign_event(&self, event: UnsignedEvent) -> GitMeshResult<Event> {
        event
            .sign_with_keys(self)
            .map_err(|err| GitMeshError::Internal(err.to_string()))
    }

    async fn public_key(&self) -> GitMeshResult<PublicKey> {
        Ok(nostr::key::Keys::public_key(self))
    }
}

/// Stat record for [`Fs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size:        u64,
    pub is_dir:      bool,
    /// Milliseconds since the epoch, when the backend tracks it.
    pub modified_ms: Option<u64>,
}

/// Progress callback for mirror uploads.
pub type MirrorProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Optional content-addressed object mirror, exposed by filesystems that
/// know how to upload a repository to a Blossom endpoint.
#[async_trait]
pub trait BlossomMirror: Send + Sync {
    async fn push_to_blossom(
        &self,
        dir: &Path,
        endpoint: &str,
        on_progress: Option<MirrorProgress>,
    ) -> GitMeshResult<()>;
}

/// The Unix-like filesystem surface. May be in-memory, browser-persistent
/// or disk-backed.
#[async_trait]
pub trait Fs: Send + Sync {
    async fn read_file(&self, path: &Path) -> GitMeshResult<Vec<u8>>;
    async fn write_file(&self, path: &Path, data: &[u8]) -> GitMeshResult<()>;
    async fn mkdir(&self, path: &Path) -> GitMeshResult<()>;
    async fn read_dir(&self, path: &Path) -> GitMeshResult<Vec<String>>;
    async fn stat(&self, path: &Path) -> GitMeshResult<FileStat>;
    async fn unlink(&self, path: &Path) -> GitMeshResult<()>;
    /// The mirror extension, when this filesystem supports it.
    fn blossom(&self) -> Option<&dyn BlossomMirror> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refspec_parsing() {
        let spec: RefSpec = "refs/heads/main:refs/heads/main".parse().unwrap();
        assert!(!spec.force);
        assert!(!spec.is_pr());
        assert_eq!(spec.src, "refs/heads/main");

        let spec: RefSpec = "+refs/heads/pr/feature-x:refs/heads/pr/feature-x"
            .parse()
            .unwrap();
        assert!(spec.force);
        assert!(spec.is_pr());

        let spec: RefSpec = "refs/heads/dev".parse().unwrap();
        assert_eq!(spec.src, spec.dst);

        assert!("".parse::<RefSpec>().is_err());
        assert!(":".parse::<RefSpec>().is_err());
    }

    #[test]
    fn refspec_display_round_trip() {
        for raw in [
            "refs/heads/main:refs/heads/main",
            "+refs/heads/pr/x:refs/heads/pr/x",
        ] {
            assert_eq!(raw.parse::<RefSpec>().unwrap().to_string(), raw);
        }
    }
}
