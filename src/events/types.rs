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

use std::collections::BTreeMap;

use nostr::{
    event::{EventId, Kind, Tags},
    hashes::sha1::Hash as Sha1Hash,
    key::PublicKey,
    nips::nip01::Coordinate,
    types::{RelayUrl, Timestamp, Url},
};

use crate::kinds::GitKinds;

/// Prefix for branch references in Git.
pub const HEADS_REFS: &str = "refs/heads/";
/// Prefix for tag references in Git.
pub const TAGS_REFS: &str = "refs/tags/";
/// Suffix marking a peeled (dereferenced) tag ref.
pub const PEELED_SUFFIX: &str = "^{}";

/// A clone endpoint: the primary URL plus any alias relays listed after it
/// in the same tag. Insertion order is preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneEntry {
    pub url:     String,
    pub aliases: Vec<String>,
}

impl CloneEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url:     url.into(),
            aliases: Vec::new(),
        }
    }
}

/// A repository announcement (addressable by `(author, d)`).
#[derive(Debug, Clone, Default)]
pub struct RepoAnnouncement {
    /// The `d` identifier (repository name segment of the address).
    pub id:          String,
    pub name:        Option<String>,
    pub description: Option<String>,
    pub web:         Vec<Url>,
    /// Ordered clone endpoints, most preferred first.
    pub clone:       Vec<CloneEntry>,
    pub relays:      Vec<RelayUrl>,
    pub maintainers: Vec<PublicKey>,
    pub hashtags:    Vec<String>,
    /// Earliest unique commit: a stable identity anchor across mirrors.
    pub euc:         Option<Sha1Hash>,
    /// The announcing author, known once the event is signed.
    pub author:      Option<PublicKey>,
    pub created_at:  Option<Timestamp>,
    /// Every tag of the source event, including ones the codec does not
    /// promote into fields.
    pub raw:         Tags,
}

/// How `HEAD` is expressed in a state event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// `ref: refs/heads/<branch>`
    Symbolic(String),
    /// A bare commit id.
    Oid(String),
}

impl Head {
    /// The tag value this head serializes to.
    pub fn to_value(&self) -> String {
        match self {
            Self::Symbolic(branch) => format!("ref: {HEADS_REFS}{branch}"),
            Self::Oid(oid) => oid.clone(),
        }
    }
}

/// A repository state event: the full ref map (addressable by
/// `(author, d)`).
#[derive(Debug, Clone, Default)]
pub struct RepoState {
    /// The `d` identifier (same as the announcement's).
    pub id:         String,
    pub head:       Option<Head>,
    /// `refs/heads/*`, `refs/tags/*` and peeled `refs/tags/*^{}` entries,
    /// mapped to commit ids. Sorted for deterministic iteration.
    pub refs:       BTreeMap<String, String>,
    pub author:     Option<PublicKey>,
    pub created_at: Option<Timestamp>,
    pub raw:        Tags,
}

impl RepoState {
    /// Branch names (without the `refs/heads/` prefix), sorted.
    pub fn branches(&self) -> Vec<String> {
        self.refs
            .keys()
            .filter_map(|r| r.strip_prefix(HEADS_REFS))
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Tag names (without the `refs/tags/` prefix), excluding peeled
    /// entries, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.refs
            .keys()
            .filter_map(|r| r.strip_prefix(TAGS_REFS))
            .filter(|t| !t.ends_with(PEELED_SUFFIX))
            .map(ToOwned::to_owned)
            .collect()
    }

    /// The effective default branch. An explicit symbolic `HEAD` wins;
    /// otherwise `master`, then `main`, then the lexicographically first
    /// head.
    pub fn auto_head(&self) -> Option<String> {
        if let Some(Head::Symbolic(branch)) = &self.head {
            return Some(branch.clone());
        }
        for candidate in ["master", "main"] {
            if self.refs.contains_key(&format!("{HEADS_REFS}{candidate}")) {
                return Some(candidate.to_owned());
            }
        }
        self.branches().first().cloned()
    }

    /// Commit id a branch points at, if present.
    pub fn branch_oid(&self, branch: &str) -> Option<&str> {
        self.refs
            .get(&format!("{HEADS_REFS}{branch}"))
            .map(String::as_str)
    }
}

/// The committer quintuple carried on patch events.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Committer {
    pub name:       String,
    pub email:      String,
    /// Unix seconds.
    pub timestamp:  i64,
    /// Timezone offset in minutes east of UTC.
    pub tz_minutes: i32,
}

/// A parsed patch event: one unified-diff payload.
#[derive(Debug, Clone, Default)]
pub struct PatchEvent {
    pub id:            Option<EventId>,
    pub author:        Option<PublicKey>,
    /// Repository addresses this patch targets (`a` tags).
    pub repo_addrs:    Vec<Coordinate>,
    /// The unified diff (optionally with a `From …` mail header block).
    pub content:       String,
    pub commit:        Option<String>,
    pub parent_commit: Option<String>,
    pub committer:     Option<Committer>,
    pub pgp_sig:       Option<String>,
    /// Cover-letter linkage.
    pub in_reply_to:   Option<EventId>,
    /// Series target branch from `t base:<branch>`.
    pub base_branch:   Option<String>,
    pub is_root:       bool,
    pub is_revision:   bool,
    pub created_at:    Option<Timestamp>,
    pub raw:           Tags,
}

/// A parsed issue event.
#[derive(Debug, Clone, Default)]
pub struct IssueEvent {
    pub id:         Option<EventId>,
    pub author:     Option<PublicKey>,
    pub repo_addrs: Vec<Coordinate>,
    pub subject:    Option<String>,
    pub content:    String,
    /// Legacy `t` labels carried directly on the issue.
    pub labels:     Vec<String>,
    /// `p`-tagged recipients.
    pub recipients: Vec<PublicKey>,
    pub created_at: Option<Timestamp>,
    pub raw:        Tags,
}

/// The lifecycle state a status event expresses, by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Open,
    Applied,
    Closed,
    Draft,
}

impl StatusKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Applied => "applied",
            Self::Closed => "closed",
            Self::Draft => "draft",
        }
    }

    /// The lifecycle state a status event kind expresses, if any.
    pub fn from_kind(kinds: &GitKinds, kind: Kind) -> Option<Self> {
        if kind == kinds.status_open {
            Some(Self::Open)
        } else if kind == kinds.status_applied {
            Some(Self::Applied)
        } else if kind == kinds.status_closed {
            Some(Self::Closed)
        } else if kind == kinds.status_draft {
            Some(Self::Draft)
        } else {
            None
        }
    }

    /// Checks whether a thread in this status may move to `new`.
    /// Applied is terminal; closed and drafted threads must be reopened
    /// before they can be applied.
    pub fn check_transition(self, new: StatusKind) -> crate::error::GitMeshResult<()> {
        use crate::error::GitMeshError;

        let reject = |message: &str| Err(GitMeshError::InvalidInput(message.to_owned()));
        match (self, new) {
            (Self::Applied, _) => reject("You can't change an already merged/applied thread"),
            (Self::Closed, Self::Applied) => reject("You can't merge or apply a closed thread"),
            (Self::Draft, Self::Applied) => reject("You can't merge or apply a draft thread"),
            (Self::Closed, Self::Closed) => reject("The thread is already closed"),
            (Self::Open, Self::Open) => reject("The thread is already open"),
            (Self::Draft, Self::Draft) => reject("The thread is already a draft"),
            _ => Ok(()),
        }
    }
}

/// A parsed status event on an issue or patch thread.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub id:                 Option<EventId>,
    pub author:             Option<PublicKey>,
    pub status:             StatusKind,
    /// Thread root (`e` with `root` marker, or the first `e`).
    pub root:               Option<EventId>,
    pub reply:              Option<EventId>,
    pub repo_addrs:         Vec<Coordinate>,
    pub recipients:         Vec<PublicKey>,
    pub merge_commit:       Option<Sha1Hash>,
    pub applied_as_commits: Vec<Sha1Hash>,
    pub created_at:         Option<Timestamp>,
    pub raw:                Tags,
}

/// A parsed pull-request (or PR update) event: a branch proposal by
/// commit ids rather than inline diff.
#[derive(Debug, Clone, Default)]
pub struct PullRequestEvent {
    pub id:          Option<EventId>,
    pub author:      Option<PublicKey>,
    pub repo_addrs:  Vec<Coordinate>,
    pub content:     String,
    /// Proposed commit ids (`c` tags), tip last.
    pub commits:     Vec<String>,
    pub clone:       Vec<String>,
    pub branch_name: Option<String>,
    pub merge_base:  Option<String>,
    /// True for update events amending an earlier proposal.
    pub is_update:   bool,
    pub created_at:  Option<Timestamp>,
    pub raw:         Tags,
}

/// Verdict of a merge analysis, as carried on merge/conflict metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Clean,
    FastForward,
    Conflict,
}

impl MergeResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::FastForward => "ff",
            Self::Conflict => "conflict",
        }
    }
}

/// One conflicted file in a merge analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    pub path:   String,
    /// Content on the target branch side.
    pub ours:   String,
    /// Content on the patch side.
    pub theirs: String,
    /// Common ancestor content, when known.
    pub base:   Option<String>,
}

/// Merge or conflict metadata (addressable), anchored at a root patch/PR.
#[derive(Debug, Clone)]
pub struct MergeMetadata {
    pub id:             String,
    pub author:         Option<PublicKey>,
    pub root:           EventId,
    pub repo_addrs:     Vec<Coordinate>,
    pub base_branch:    String,
    pub target_branch:  String,
    pub result:         MergeResult,
    pub conflict_files: Vec<String>,
    pub conflicts:      Vec<ConflictDetail>,
    pub created_at:     Option<Timestamp>,
    pub raw:            Tags,
}

/// What a label event points at.
#[derive(Debug, Clone, Default)]
pub struct LabelTargets {
    pub events:    Vec<EventId>,
    pub addresses: Vec<Coordinate>,
    pub pubkeys:   Vec<PublicKey>,
    pub refs:      Vec<String>,
    pub topics:    Vec<String>,
}

/// A parsed NIP-32 label event.
#[derive(Debug, Clone, Default)]
pub struct LabelEvent {
    pub id:         Option<EventId>,
    pub author:     Option<PublicKey>,
    /// `(namespace, value)` pairs. Values whose mark is missing or
    /// unknown fall back to the `ugc` namespace.
    pub labels:     Vec<(String, String)>,
    pub targets:    LabelTargets,
    pub created_at: Option<Timestamp>,
    pub raw:        Tags,
}
