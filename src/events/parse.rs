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

use std::str::FromStr;

use nostr::{
    JsonUtil,
    event::{Event, EventId, Kind, Tag, TagKind, Tags},
    hashes::sha1::Hash as Sha1Hash,
    key::PublicKey,
    nips::nip01::Coordinate,
    types::{RelayUrl, Timestamp, Url},
};

use super::{
    types::{
        CloneEntry,
        Committer,
        ConflictDetail,
        HEADS_REFS,
        Head,
        IssueEvent,
        LabelEvent,
        LabelTargets,
        MergeMetadata,
        MergeResult,
        PatchEvent,
        PullRequestEvent,
        RepoAnnouncement,
        RepoState,
        StatusEvent,
        StatusKind,
        TAGS_REFS,
    },
    validate,
};
use crate::{
    error::{GitMeshError, GitMeshResult},
    kinds::GitKinds,
};

/// Fallback namespace for labels whose mark is missing or unknown.
pub const UGC_NAMESPACE: &str = "ugc";

/// Helper accessors over raw tags. The codec promotes known tags through
/// these; everything else survives on the record's `raw` shadow.
#[easy_ext::ext(TagsExt)]
impl Tags {
    /// First value of the first tag of the given kind.
    #[inline]
    pub fn value(&self, kind: TagKind) -> Option<String> {
        self.find(kind).and_then(Tag::content).map(ToOwned::to_owned)
    }

    /// First value of every tag of the given kind.
    #[inline]
    pub fn values(&self, kind: TagKind) -> Vec<String> {
        self.filter(kind)
            .filter_map(|t| t.content().map(ToOwned::to_owned))
            .collect()
    }

    /// All values (beyond the kind) of the first tag of the given kind.
    #[inline]
    pub fn multi(&self, kind: TagKind) -> Vec<String> {
        self.find(kind)
            .map(|t| t.clone().to_vec().into_iter().skip(1).collect())
            .unwrap_or_default()
    }

    /// All values of every tag of the given kind, flattened.
    #[inline]
    pub fn multi_all(&self, kind: TagKind) -> Vec<String> {
        self.filter(kind)
            .flat_map(|t| t.clone().to_vec().into_iter().skip(1))
            .collect()
    }
}

#[inline]
fn custom_kind(name: &'static str) -> TagKind<'static> {
    TagKind::custom(name)
}

#[inline]
fn d_kind() -> TagKind<'static> {
    TagKind::single_letter(nostr::filter::Alphabet::D, false)
}

#[inline]
fn p_kind() -> TagKind<'static> {
    TagKind::single_letter(nostr::filter::Alphabet::P, false)
}

/// Parses a `<kind>:<pubkey>:<identifier>` coordinate value.
pub fn parse_coordinate(value: &str) -> Option<Coordinate> {
    let mut parts = value.splitn(3, ':');
    let kind: u16 = parts.next()?.parse().ok()?;
    let pubkey = PublicKey::from_hex(parts.next()?).ok()?;
    let identifier = parts.next().unwrap_or_default();
    Some(Coordinate::new(Kind::from(kind), pubkey).identifier(identifier))
}

/// Repository addresses from the event's `a` tags.
fn repo_addrs(tags: &Tags) -> Vec<Coordinate> {
    tags.values(TagKind::single_letter(nostr::filter::Alphabet::A, false))
        .iter()
        .filter_map(|v| parse_coordinate(v))
        .collect()
}

/// `p`-tagged recipients. Unparsable keys are dropped with a trace.
fn recipients(tags: &Tags) -> Vec<PublicKey> {
    tags.values(p_kind())
        .iter()
        .filter_map(|v| {
            let result = PublicKey::from_hex(v);
            if result.is_err() {
                tracing::trace!("Dropping unparsable `p` value `{v}`");
            }
            result.ok()
        })
        .collect()
}

/// The `e` tag carrying the given NIP-10 marker.
fn marked_event(tags: &Tags, marker: &str) -> Option<EventId> {
    tags.filter(TagKind::e())
        .find(|t| {
            (**t)
                .clone()
                .to_vec()
                .get(3)
                .is_some_and(|m| m == marker)
        })
        .and_then(Tag::content)
        .and_then(|v| EventId::from_hex(v).ok())
}

/// Accepts an event whose `created_at` arrives as int seconds or a numeric
/// string; an absent `created_at` degrades to the current wall clock.
pub fn lenient_event_from_json(json: &str) -> GitMeshResult<Event> {
    let mut value: serde_json::Value = serde_json::from_str(json)?;
    if let Some(object) = value.as_object_mut() {
        match object.get("created_at") {
            Some(serde_json::Value::String(s)) => {
                let seconds: u64 = s.parse().map_err(|_| {
                    GitMeshError::InvalidInput(format!("Non-numeric created_at `{s}`"))
                })?;
                object.insert("created_at".to_owned(), serde_json::json!(seconds));
            }
            None => {
                object.insert(
                    "created_at".to_owned(),
                    serde_json::json!(Timestamp::now().as_u64()),
                );
            }
            _ => {}
        }
    }
    Event::from_json(value.to_string()).map_err(GitMeshError::from)
}

/// Parses a repository announcement event.
pub fn announcement(kinds: &GitKinds, event: &Event) -> GitMeshResult<RepoAnnouncement> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    let clone = tags
        .filter(TagKind::Clone)
        .filter_map(|t| {
            let mut values = t.clone().to_vec().into_iter().skip(1);
            Some(CloneEntry {
                url:     values.next()?,
                aliases: values.collect(),
            })
        })
        .collect();

    let relays = tags
        .multi_all(TagKind::Relays)
        .iter()
        .filter_map(|v| RelayUrl::from_str(v.trim_end_matches('/')).ok())
        .collect::<Vec<_>>();

    Ok(RepoAnnouncement {
        id: tags.value(d_kind()).unwrap_or_default(),
        name: tags.value(TagKind::Name),
        description: tags.value(TagKind::Description),
        web: tags
            .multi_all(TagKind::Web)
            .iter()
            .filter_map(|v| Url::parse(v).ok())
            .collect(),
        clone,
        relays: dedup_relays(relays),
        maintainers: tags
            .multi_all(TagKind::Maintainers)
            .iter()
            .filter_map(|v| PublicKey::from_hex(v).ok())
            .collect(),
        hashtags: tags.values(TagKind::t()),
        euc: euc_marker(tags),
        author: Some(event.pubkey),
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

/// The `r` tag carrying the `euc` marker, parsed as a commit id.
fn euc_marker(tags: &Tags) -> Option<Sha1Hash> {
    tags.filter(TagKind::single_letter(nostr::filter::Alphabet::R, false))
        .find(|t| (**t).clone().to_vec().last().is_some_and(|m| m == "euc"))
        .and_then(Tag::content)
        .and_then(|v| Sha1Hash::from_str(v).ok())
}

fn dedup_relays(relays: Vec<RelayUrl>) -> Vec<RelayUrl> {
    let mut seen = Vec::new();
    for relay in relays {
        if !seen.contains(&relay) {
            seen.push(relay);
        }
    }
    seen
}

/// Parses a repository state event into a ref map.
pub fn state(kinds: &GitKinds, event: &Event) -> GitMeshResult<RepoState> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    let mut refs = std::collections::BTreeMap::new();
    let mut head = None;
    for tag in tags.iter() {
        let values = tag.clone().to_vec();
        let Some((name, rest)) = values.split_first() else {
            continue;
        };
        let Some(value) = rest.first() else { continue };

        if name == "HEAD" {
            head = Some(match value.strip_prefix("ref: ") {
                Some(target) => {
                    Head::Symbolic(target.strip_prefix(HEADS_REFS).unwrap_or(target).to_owned())
                }
                None => Head::Oid(value.clone()),
            });
        } else if name.starts_with(HEADS_REFS) || name.starts_with(TAGS_REFS) {
            refs.insert(name.clone(), value.clone());
        }
    }

    Ok(RepoState {
        id: tags.value(d_kind()).unwrap_or_default(),
        head,
        refs,
        author: Some(event.pubkey),
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

/// Parses the committer quintuple `(name, email, unix-ts, tz-minutes)`.
/// The timestamp may arrive as a numeric string with surrounding noise
/// from lax producers.
fn committer(tags: &Tags) -> Option<Committer> {
    let values = tags.multi(custom_kind("committer"));
    let mut values = values.into_iter();
    Some(Committer {
        name:       values.next()?,
        email:      values.next()?,
        timestamp:  values.next()?.trim().parse().ok()?,
        tz_minutes: values.next()?.trim().parse().ok()?,
    })
}

/// Parses a patch event.
pub fn patch(kinds: &GitKinds, event: &Event) -> GitMeshResult<PatchEvent> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    let hashtags = tags.values(TagKind::t());
    let is_root = hashtags.iter().any(|t| t == "root");
    // `revision-root` was a typo in early producers and is kept for
    // compatibility.
    let is_revision = hashtags
        .iter()
        .any(|t| t == "root-revision" || t == "revision-root");
    let base_branch = hashtags
        .iter()
        .find_map(|t| t.strip_prefix("base:"))
        .map(ToOwned::to_owned);

    Ok(PatchEvent {
        id: Some(event.id),
        author: Some(event.pubkey),
        repo_addrs: repo_addrs(tags),
        content: event.content.clone(),
        commit: tags.value(custom_kind("commit")),
        parent_commit: tags.value(custom_kind("parent-commit")),
        committer: committer(tags),
        pgp_sig: tags.value(custom_kind("pgp-sig")),
        in_reply_to: marked_event(tags, "reply").or_else(|| marked_event(tags, "root")),
        base_branch,
        is_root,
        is_revision,
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

/// Parses an issue event.
pub fn issue(kinds: &GitKinds, event: &Event) -> GitMeshResult<IssueEvent> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    Ok(IssueEvent {
        id: Some(event.id),
        author: Some(event.pubkey),
        repo_addrs: repo_addrs(tags),
        subject: tags.value(TagKind::Subject),
        content: event.content.clone(),
        labels: tags.values(TagKind::t()),
        recipients: recipients(tags),
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

/// Parses a status event. Fails on kinds outside the four status kinds.
pub fn status(kinds: &GitKinds, event: &Event) -> GitMeshResult<StatusEvent> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    let status = StatusKind::from_kind(kinds, event.kind).ok_or_else(|| {
        GitMeshError::InvalidInput(format!("Not a status kind: {}", event.kind))
    })?;

    let first_e = tags
        .value(TagKind::e())
        .and_then(|v| EventId::from_hex(&v).ok());

    Ok(StatusEvent {
        id: Some(event.id),
        author: Some(event.pubkey),
        status,
        root: marked_event(tags, "root").or(first_e),
        reply: marked_event(tags, "reply"),
        repo_addrs: repo_addrs(tags),
        recipients: recipients(tags),
        merge_commit: tags
            .value(custom_kind("merge-commit"))
            .and_then(|v| Sha1Hash::from_str(&v).ok()),
        applied_as_commits: tags
            .multi(custom_kind("applied-as-commits"))
            .iter()
            .filter_map(|v| Sha1Hash::from_str(v).ok())
            .collect(),
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

/// Parses a pull-request or PR-update event.
pub fn pull_request(kinds: &GitKinds, event: &Event) -> GitMeshResult<PullRequestEvent> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    Ok(PullRequestEvent {
        id: Some(event.id),
        author: Some(event.pubkey),
        repo_addrs: repo_addrs(tags),
        content: event.content.clone(),
        commits: tags.values(TagKind::single_letter(nostr::filter::Alphabet::C, false)),
        clone: tags.multi_all(TagKind::Clone),
        branch_name: tags.value(custom_kind("branch-name")),
        merge_base: tags.value(custom_kind("merge-base")),
        is_update: event.kind == kinds.pr_update,
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

/// Parses merge or conflict metadata.
pub fn merge_metadata(kinds: &GitKinds, event: &Event) -> GitMeshResult<MergeMetadata> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    let root = marked_event(tags, "root")
        .or_else(|| {
            tags.value(TagKind::e())
                .and_then(|v| EventId::from_hex(&v).ok())
        })
        .ok_or_else(|| {
            GitMeshError::InvalidInput("Merge metadata without a root `e` tag".to_owned())
        })?;

    let result = match tags.value(custom_kind("result")).as_deref() {
        Some("clean") => MergeResult::Clean,
        Some("ff") => MergeResult::FastForward,
        Some("conflict") => MergeResult::Conflict,
        None if event.kind == kinds.conflict_meta => MergeResult::Conflict,
        other => {
            return Err(GitMeshError::InvalidInput(format!(
                "Unknown merge result `{}`",
                other.unwrap_or_default()
            )));
        }
    };

    let conflicts = if event.content.is_empty() {
        Vec::new()
    } else {
        parse_conflict_payload(&event.content)?
    };

    Ok(MergeMetadata {
        id: tags.value(d_kind()).unwrap_or_default(),
        author: Some(event.pubkey),
        root,
        repo_addrs: repo_addrs(tags),
        base_branch: tags.value(custom_kind("base-branch")).unwrap_or_default(),
        target_branch: tags.value(custom_kind("target-branch")).unwrap_or_default(),
        result,
        conflict_files: tags.values(custom_kind("file")),
        conflicts,
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}

fn parse_conflict_payload(content: &str) -> GitMeshResult<Vec<ConflictDetail>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(content)?;
    Ok(values
        .into_iter()
        .filter_map(|v| {
            Some(ConflictDetail {
                path:   v.get("path")?.as_str()?.to_owned(),
                ours:   v.get("ours")?.as_str()?.to_owned(),
                theirs: v.get("theirs")?.as_str()?.to_owned(),
                base:   v.get("base").and_then(|b| b.as_str()).map(ToOwned::to_owned),
            })
        })
        .collect())
}

/// Parses a NIP-32 label event. Values with a missing or unlisted
/// namespace mark land in `ugc`.
pub fn label(kinds: &GitKinds, event: &Event) -> GitMeshResult<LabelEvent> {
    validate::check(kinds, event)?;
    let tags = &event.tags;

    Ok(LabelEvent {
        id: Some(event.id),
        author: Some(event.pubkey),
        labels: super::labels::label_pairs(tags),
        targets: LabelTargets {
            events:    tags
                .values(TagKind::e())
                .iter()
                .filter_map(|v| EventId::from_hex(v).ok())
                .collect(),
            addresses: tags
                .values(TagKind::single_letter(nostr::filter::Alphabet::A, false))
                .iter()
                .filter_map(|v| parse_coordinate(v))
                .collect(),
            pubkeys:   recipients(tags),
            refs:      tags.values(TagKind::single_letter(nostr::filter::Alphabet::R, false)),
            topics:    tags.values(TagKind::t()),
        },
        created_at: Some(event.created_at),
        raw: tags.clone(),
    })
}
