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

use std::borrow::Cow;

use convert_case::{Case, Casing};
use either::Either;
use nostr::{
    event::{EventBuilder, EventId, Tag, TagKind, Tags},
    hashes::sha1::Hash as Sha1Hash,
    key::PublicKey,
    nips::{nip01::Coordinate, nip10::Marker},
    types::RelayUrl,
};

use super::types::{
    Committer,
    ConflictDetail,
    IssueEvent,
    LabelTargets,
    MergeMetadata,
    RepoAnnouncement,
    RepoState,
    StatusKind,
};
use crate::{
    error::{GitMeshError, GitMeshResult},
    kinds::GitKinds,
};

/// Prefix used for git patch alt tags.
pub const PATCH_ALT_PREFIX: &str = "git patch: ";
/// Prefix used for git issue alt tags.
pub const ISSUE_ALT_PREFIX: &str = "git issue: ";

/// `HEAD` tag kind on state events.
pub const HEAD_TAG_KIND: TagKind = TagKind::Custom(Cow::Borrowed("HEAD"));

#[inline]
fn custom_kind(name: &'static str) -> TagKind<'static> {
    TagKind::custom(name)
}

/// Generate a reply tag for an event with the given ID, relay URL (if any),
/// and marker.
#[inline]
pub fn event_reply_tag(reply_to: &EventId, relay: Option<&RelayUrl>, marker: Marker) -> Tag {
    Tag::custom(
        TagKind::e(),
        [
            reply_to.to_hex(),
            relay.map(|r| r.to_string()).unwrap_or_default(),
            marker.to_string(),
        ],
    )
}

/// Strips the trailing slash relays accumulate through naive URL joining,
/// so equal relays compare equal.
pub fn clean_relay_value(relay: &RelayUrl) -> String {
    relay.to_string().trim_end_matches('/').to_owned()
}

/// Deduplicates relays by their cleaned value, keeping first-seen order.
pub fn sanitize_relays(relays: &[RelayUrl]) -> Vec<String> {
    let mut seen = Vec::new();
    for relay in relays {
        let value = clean_relay_value(relay);
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// Builds a repository announcement event. The repository id must be
/// kebab-case unless `force_id` is set.
pub fn announcement(
    kinds: &GitKinds,
    repo: &RepoAnnouncement,
    force_id: bool,
) -> GitMeshResult<EventBuilder> {
    let repo_id = repo.id.trim();
    let kebab_repo_id = repo_id.to_case(Case::Kebab);
    if repo_id.is_empty() || (!force_id && repo_id != kebab_repo_id) {
        if repo_id != kebab_repo_id {
            tracing::error!(
                "The repo id should be `{kebab_repo_id}` (kebab-case). Pass `force_id` to \
                 override this check"
            );
        }
        return Err(GitMeshError::InvalidInput(
            "Invalid repository id, it can't be empty and must be kebab-case".to_owned(),
        ));
    }

    let mut tags = Tags::new();
    tags.push(Tag::identifier(repo_id));
    if let Some(name) = &repo.name {
        tags.push(Tag::custom(TagKind::Name, [name.clone()]));
    }
    if let Some(description) = &repo.description {
        tags.push(Tag::custom(TagKind::Description, [description.clone()]));
    }
    if !repo.web.is_empty() {
        tags.push(Tag::custom(
            TagKind::Web,
            repo.web.iter().map(ToString::to_string),
        ));
    }
    // One tag per clone endpoint so alias tails stay attached to their
    // primary, in preference order.
    for entry in &repo.clone {
        let mut values = vec![entry.url.clone()];
        values.extend(entry.aliases.iter().cloned());
        tags.push(Tag::custom(TagKind::Clone, values));
    }
    let relays = sanitize_relays(&repo.relays);
    if !relays.is_empty() {
        tags.push(Tag::custom(TagKind::Relays, relays));
    }
    if !repo.maintainers.is_empty() {
        tags.push(Tag::custom(
            TagKind::Maintainers,
            repo.maintainers.iter().map(|p| p.to_hex()),
        ));
    }
    if let Some(euc) = &repo.euc {
        tags.push(Tag::custom(
            TagKind::single_letter(nostr::filter::Alphabet::R, false),
            [euc.to_string(), "euc".to_owned()],
        ));
    }
    tags.extend(repo.hashtags.iter().cloned().map(Tag::hashtag));

    Ok(EventBuilder::new(kinds.announcement, "").tags(tags))
}

/// Builds a repository state event from a ref map. `HEAD` goes first, then
/// refs in map order.
pub fn state(kinds: &GitKinds, state: &RepoState) -> EventBuilder {
    let mut tags = Tags::new();
    tags.push(Tag::identifier(&state.id));
    if let Some(head) = &state.head {
        tags.push(Tag::custom(HEAD_TAG_KIND, [head.to_value()]));
    }
    for (name, oid) in &state.refs {
        tags.push(
            Tag::parse([name.clone(), oid.clone()]).expect("A ref tag is never empty"),
        );
    }
    EventBuilder::new(kinds.state, "").tags(tags)
}

/// Everything needed to build one patch event.
#[derive(Debug, Clone, Default)]
pub struct PatchDraft {
    /// The unified-diff payload (may start with a mail header block).
    pub content:       String,
    pub subject:       Option<String>,
    pub repo_addrs:    Vec<Coordinate>,
    pub commit:        Option<String>,
    pub parent_commit: Option<String>,
    pub committer:     Option<Committer>,
    pub pgp_sig:       Option<String>,
    /// Root of the series this patch belongs to, with optional relay hint.
    pub root:          Option<(EventId, Option<RelayUrl>)>,
    /// The event this patch directly replies to (cover letter or previous
    /// patch in the series).
    pub in_reply_to:   Option<(EventId, Option<RelayUrl>)>,
    /// Target branch, emitted as `t base:<branch>`.
    pub base_branch:   Option<String>,
    pub recipients:    Vec<PublicKey>,
    pub euc:           Option<Sha1Hash>,
}

/// Builds a patch event. A draft without a `root` is itself a series root
/// and gets the `root` hashtag.
pub fn patch(kinds: &GitKinds, draft: &PatchDraft) -> EventBuilder {
    let mut tags = Tags::new();
    if let Some(subject) = &draft.subject {
        tags.push(Tag::alt(format!("{PATCH_ALT_PREFIX}{subject}")));
        tags.push(Tag::description(subject.clone()));
    }
    tags.extend(
        draft
            .repo_addrs
            .iter()
            .map(|c| Tag::coordinate(c.clone(), None)),
    );
    tags.extend(
        draft
            .repo_addrs
            .iter()
            .map(|c| Tag::public_key(c.public_key)),
    );
    tags.extend(draft.recipients.iter().map(|p| Tag::public_key(*p)));
    if let Some(commit) = &draft.commit {
        tags.push(Tag::custom(custom_kind("commit"), [commit.clone()]));
        tags.push(Tag::reference(commit.clone()));
    }
    if let Some(parent) = &draft.parent_commit {
        tags.push(Tag::custom(custom_kind("parent-commit"), [parent.clone()]));
    }
    if let Some(committer) = &draft.committer {
        tags.push(Tag::custom(
            custom_kind("committer"),
            [
                committer.name.clone(),
                committer.email.clone(),
                committer.timestamp.to_string(),
                committer.tz_minutes.to_string(),
            ],
        ));
    }
    if let Some(sig) = &draft.pgp_sig {
        tags.push(Tag::custom(custom_kind("pgp-sig"), [sig.clone()]));
    }
    if let Some(branch) = &draft.base_branch {
        tags.push(Tag::hashtag(format!("base:{branch}")));
    }
    if let Some(euc) = &draft.euc {
        tags.push(Tag::custom(
            TagKind::single_letter(nostr::filter::Alphabet::R, false),
            [euc.to_string(), "euc".to_owned()],
        ));
    }
    tags.dedup();

    let mut event_builder = EventBuilder::new(kinds.patch, draft.content.clone()).tags(tags);

    // Reply markers live outside the dedup set: a patch replying to the
    // root twice (root marker + reply marker) must keep both tags.
    if let Some((root_id, relay)) = &draft.root {
        event_builder =
            event_builder.tag(event_reply_tag(root_id, relay.as_ref(), Marker::Root));
    } else {
        event_builder = event_builder.tag(Tag::hashtag("root"));
    }
    if let Some((reply_id, relay)) = &draft.in_reply_to {
        event_builder =
            event_builder.tag(event_reply_tag(reply_id, relay.as_ref(), Marker::Reply));
    }

    event_builder
}

/// Builds an issue event.
pub fn issue(kinds: &GitKinds, issue: &IssueEvent) -> GitMeshResult<EventBuilder> {
    let mut coordinates = issue.repo_addrs.iter();
    let first = coordinates
        .next()
        .ok_or_else(|| GitMeshError::InvalidInput("An issue needs a repository address".to_owned()))?;

    let mut tags = Tags::new();
    tags.push(Tag::coordinate(first.clone(), None));
    tags.push(Tag::public_key(first.public_key));
    for coordinate in coordinates {
        tags.push(Tag::coordinate(coordinate.clone(), None));
        tags.push(Tag::public_key(coordinate.public_key));
    }
    tags.extend(issue.recipients.iter().map(|p| Tag::public_key(*p)));
    if let Some(subject) = &issue.subject {
        tags.push(Tag::custom(TagKind::Subject, [subject.clone()]));
        tags.push(Tag::alt(format!("{ISSUE_ALT_PREFIX}{subject}")));
    }
    tags.extend(
        issue
            .labels
            .iter()
            .map(|l| Tag::hashtag(l.trim().to_owned())),
    );
    tags.dedup();

    Ok(EventBuilder::new(kinds.issue, issue.content.clone()).tags(tags))
}

/// Builds a status event for an issue/patch thread. The payload is a merge
/// commit for merges, or the applied commit list for applied series.
pub fn status(
    kinds: &GitKinds,
    status: StatusKind,
    root: EventId,
    relay_hint: Option<&RelayUrl>,
    repo_addrs: &[Coordinate],
    recipients: &[PublicKey],
    payload: Option<Either<Sha1Hash, Vec<Sha1Hash>>>,
) -> EventBuilder {
    let kind = match status {
        StatusKind::Open => kinds.status_open,
        StatusKind::Applied => kinds.status_applied,
        StatusKind::Closed => kinds.status_closed,
        StatusKind::Draft => kinds.status_draft,
    };

    let mut builder = EventBuilder::new(kind, "")
        .tag(event_reply_tag(&root, relay_hint, Marker::Root))
        .tags(recipients.iter().map(|p| Tag::public_key(*p)))
        .tags(
            repo_addrs
                .iter()
                .map(|c| Tag::coordinate(c.clone(), relay_hint.cloned())),
        );

    match payload {
        Some(Either::Left(merge_commit)) => {
            builder = builder.tag(Tag::custom(
                custom_kind("merge-commit"),
                [merge_commit.to_string()],
            ));
        }
        Some(Either::Right(applied)) => {
            builder = builder.tag(Tag::custom(
                custom_kind("applied-as-commits"),
                applied.iter().map(ToString::to_string),
            ));
        }
        None => {}
    }

    builder.dedup_tags()
}

/// Everything needed to build a pull-request (or PR update) event.
#[derive(Debug, Clone, Default)]
pub struct PullRequestDraft {
    pub repo_addrs:  Vec<Coordinate>,
    pub content:     String,
    /// Proposed commits, tip last.
    pub commits:     Vec<String>,
    pub clone:       Vec<String>,
    pub branch_name: Option<String>,
    pub merge_base:  Option<String>,
    /// Root PR event when this is an update.
    pub update_of:   Option<(EventId, Option<RelayUrl>)>,
}

/// Builds a pull-request proposal or update event.
pub fn pull_request(kinds: &GitKinds, draft: &PullRequestDraft) -> EventBuilder {
    let kind = if draft.update_of.is_some() {
        kinds.pr_update
    } else {
        kinds.pull_request
    };

    let mut tags = Tags::new();
    tags.extend(
        draft
            .repo_addrs
            .iter()
            .map(|c| Tag::coordinate(c.clone(), None)),
    );
    tags.extend(
        draft
            .repo_addrs
            .iter()
            .map(|c| Tag::public_key(c.public_key)),
    );
    for commit in &draft.commits {
        tags.push(Tag::custom(
            TagKind::single_letter(nostr::filter::Alphabet::C, false),
            [commit.clone()],
        ));
    }
    if !draft.clone.is_empty() {
        tags.push(Tag::custom(TagKind::Clone, draft.clone.clone()));
    }
    if let Some(branch) = &draft.branch_name {
        tags.push(Tag::custom(custom_kind("branch-name"), [branch.clone()]));
    }
    if let Some(base) = &draft.merge_base {
        tags.push(Tag::custom(custom_kind("merge-base"), [base.clone()]));
    }
    tags.dedup();

    let mut builder = EventBuilder::new(kind, draft.content.clone()).tags(tags);
    if let Some((root_id, relay)) = &draft.update_of {
        builder = builder.tag(event_reply_tag(root_id, relay.as_ref(), Marker::Root));
    }
    builder
}

/// Builds merge or conflict metadata anchored at a root patch/PR. Conflict
/// details go to the content as JSON; file paths are also tagged for
/// relay-side filtering.
pub fn merge_metadata(kinds: &GitKinds, meta: &MergeMetadata) -> GitMeshResult<EventBuilder> {
    let kind = if meta.result == super::types::MergeResult::Conflict {
        kinds.conflict_meta
    } else {
        kinds.merge_meta
    };

    let content = if meta.conflicts.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&conflict_payload(&meta.conflicts))?
    };

    let mut tags = Tags::new();
    tags.push(Tag::identifier(&meta.id));
    tags.push(event_reply_tag(&meta.root, None, Marker::Root));
    tags.extend(
        meta.repo_addrs
            .iter()
            .map(|c| Tag::coordinate(c.clone(), None)),
    );
    tags.push(Tag::custom(
        custom_kind("base-branch"),
        [meta.base_branch.clone()],
    ));
    tags.push(Tag::custom(
        custom_kind("target-branch"),
        [meta.target_branch.clone()],
    ));
    tags.push(Tag::custom(
        custom_kind("result"),
        [meta.result.label().to_owned()],
    ));
    for file in &meta.conflict_files {
        tags.push(Tag::custom(custom_kind("file"), [file.clone()]));
    }

    Ok(EventBuilder::new(kind, content).tags(tags))
}

fn conflict_payload(conflicts: &[ConflictDetail]) -> Vec<serde_json::Value> {
    conflicts
        .iter()
        .map(|c| {
            serde_json::json!({
                "path": c.path,
                "ours": c.ours,
                "theirs": c.theirs,
                "base": c.base,
            })
        })
        .collect()
}

/// Builds a NIP-32 label event: one namespace, any number of values,
/// applied to the given targets.
pub fn label(
    kinds: &GitKinds,
    namespace: &str,
    values: &[String],
    targets: &LabelTargets,
) -> EventBuilder {
    let mut tags = Tags::new();
    tags.push(Tag::custom(
        TagKind::single_letter(nostr::filter::Alphabet::L, true),
        [namespace.to_owned()],
    ));
    for value in values {
        tags.push(Tag::custom(
            TagKind::single_letter(nostr::filter::Alphabet::L, false),
            [value.clone(), namespace.to_owned()],
        ));
    }
    tags.extend(targets.events.iter().map(|id| Tag::event(*id)));
    tags.extend(
        targets
            .addresses
            .iter()
            .map(|c| Tag::coordinate(c.clone(), None)),
    );
    tags.extend(targets.pubkeys.iter().map(|p| Tag::public_key(*p)));
    tags.extend(
        targets
            .refs
            .iter()
            .map(|r| Tag::reference(r.clone())),
    );
    tags.extend(targets.topics.iter().cloned().map(Tag::hashtag));

    EventBuilder::new(kinds.label, "").tags(tags)
}
