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

use either::Either;
use nostr::{
    JsonUtil,
    event::{Event, EventBuilder, EventId},
    hashes::sha1::Hash as Sha1Hash,
    key::Keys,
    nips::nip01::Coordinate,
    types::{RelayUrl, Url},
};

use super::{build, parse, types::*};
use crate::kinds::GitKinds;

fn sign(builder: EventBuilder, keys: &Keys) -> Event {
    builder.sign_with_keys(keys).unwrap()
}

fn coordinate(keys: &Keys) -> Coordinate {
    Coordinate::new(GitKinds::default().announcement, keys.public_key()).identifier("demo")
}

const OID_A: &str = "24e8522268ad675996fc3b35209ce23951236bdc";
const OID_B: &str = "864f3018f62ab2e1265edb670d5493dafe7d2cb2";

#[test]
fn announcement_round_trip() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let maintainer = Keys::generate().public_key();

    let repo = RepoAnnouncement {
        id: "demo".to_owned(),
        name: Some("Demo".to_owned()),
        description: Some("A demo repository".to_owned()),
        web: vec![Url::parse("https://example.com/demo").unwrap()],
        clone: vec![
            CloneEntry {
                url:     "https://example.com/demo.git".to_owned(),
                aliases: vec!["wss://relay.example.com".to_owned()],
            },
            CloneEntry::new("ssh://git@example.com/demo.git"),
        ],
        relays: vec![
            RelayUrl::from_str("wss://relay.example.com").unwrap(),
            RelayUrl::from_str("wss://relay.example.com/").unwrap(),
            RelayUrl::from_str("wss://other.example.com").unwrap(),
        ],
        maintainers: vec![maintainer],
        hashtags: vec!["rust".to_owned()],
        euc: Some(Sha1Hash::from_str(OID_A).unwrap()),
        ..Default::default()
    };

    let event = sign(build::announcement(&kinds, &repo, false).unwrap(), &keys);
    let parsed = parse::announcement(&kinds, &event).unwrap();

    assert_eq!(parsed.id, "demo");
    assert_eq!(parsed.name.as_deref(), Some("Demo"));
    assert_eq!(parsed.clone.len(), 2);
    assert_eq!(parsed.clone[0].url, "https://example.com/demo.git");
    assert_eq!(parsed.clone[0].aliases, vec!["wss://relay.example.com"]);
    assert_eq!(parsed.clone[1].url, "ssh://git@example.com/demo.git");
    // The duplicate relay differing only by trailing slash collapses.
    assert_eq!(parsed.relays.len(), 2);
    assert_eq!(parsed.maintainers, vec![maintainer]);
    assert_eq!(parsed.hashtags, vec!["rust"]);
    assert_eq!(parsed.euc, repo.euc);
    assert_eq!(parsed.author, Some(keys.public_key()));
}

#[test]
fn announcement_requires_kebab_id() {
    let kinds = GitKinds::default();
    let repo = RepoAnnouncement {
        id: "My Repo".to_owned(),
        ..Default::default()
    };
    assert!(build::announcement(&kinds, &repo, false).is_err());
    assert!(build::announcement(&kinds, &repo, true).is_ok());
}

#[test]
fn state_round_trip_with_symbolic_head() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();

    let mut state = RepoState {
        id: "demo".to_owned(),
        head: Some(Head::Symbolic("main".to_owned())),
        ..Default::default()
    };
    state
        .refs
        .insert("refs/heads/main".to_owned(), OID_A.to_owned());
    state
        .refs
        .insert("refs/tags/v1.0".to_owned(), OID_B.to_owned());
    state
        .refs
        .insert("refs/tags/v1.0^{}".to_owned(), OID_A.to_owned());

    let event = sign(build::state(&kinds, &state), &keys);
    let parsed = parse::state(&kinds, &event).unwrap();

    assert_eq!(parsed.id, "demo");
    assert_eq!(parsed.head, Some(Head::Symbolic("main".to_owned())));
    assert_eq!(parsed.refs, state.refs);
    assert_eq!(parsed.branches(), vec!["main"]);
    assert_eq!(parsed.tags(), vec!["v1.0"]);
}

#[test]
fn state_with_oid_head() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let state = RepoState {
        id: "demo".to_owned(),
        head: Some(Head::Oid(OID_A.to_owned())),
        ..Default::default()
    };
    let parsed = parse::state(&kinds, &sign(build::state(&kinds, &state), &keys)).unwrap();
    assert_eq!(parsed.head, Some(Head::Oid(OID_A.to_owned())));
}

#[test]
fn peeled_tag_without_base_is_invalid() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let mut state = RepoState {
        id: "demo".to_owned(),
        ..Default::default()
    };
    state
        .refs
        .insert("refs/tags/v1.0^{}".to_owned(), OID_A.to_owned());

    let event = sign(build::state(&kinds, &state), &keys);
    let err = parse::state(&kinds, &event).unwrap_err();
    assert_eq!(err.code(), "EVENT_INVALID");
}

#[test]
fn patch_round_trip() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let recipient = Keys::generate().public_key();

    let draft = build::PatchDraft {
        content: "diff --git a/README.md b/README.md\n".to_owned(),
        subject: Some("[PATCH] docs: fix readme".to_owned()),
        repo_addrs: vec![coordinate(&keys)],
        commit: Some(OID_A.to_owned()),
        parent_commit: Some(OID_B.to_owned()),
        committer: Some(Committer {
            name:       "Awiteb".to_owned(),
            email:      "a@4rs.nl".to_owned(),
            timestamp:  1716800000,
            tz_minutes: -300,
        }),
        base_branch: Some("main".to_owned()),
        recipients: vec![recipient],
        ..Default::default()
    };

    let event = sign(build::patch(&kinds, &draft), &keys);
    let parsed = parse::patch(&kinds, &event).unwrap();

    assert_eq!(parsed.commit.as_deref(), Some(OID_A));
    assert_eq!(parsed.parent_commit.as_deref(), Some(OID_B));
    assert_eq!(parsed.committer, draft.committer);
    assert_eq!(parsed.base_branch.as_deref(), Some("main"));
    assert!(parsed.is_root);
    assert!(!parsed.is_revision);
    assert_eq!(parsed.repo_addrs.len(), 1);
    assert_eq!(parsed.content, draft.content);
}

#[test]
fn patch_series_member_replies_to_root() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let root_id = EventId::all_zeros();

    let draft = build::PatchDraft {
        content: "diff --git a/a b/a\n".to_owned(),
        repo_addrs: vec![coordinate(&keys)],
        root: Some((root_id, None)),
        in_reply_to: Some((root_id, None)),
        ..Default::default()
    };

    let parsed = parse::patch(&kinds, &sign(build::patch(&kinds, &draft), &keys)).unwrap();
    assert!(!parsed.is_root);
    assert_eq!(parsed.in_reply_to, Some(root_id));
}

#[test]
fn legacy_revision_root_hashtag_is_recognized() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let event = sign(
        build::patch(
            &kinds,
            &build::PatchDraft {
                repo_addrs: vec![coordinate(&keys)],
                ..Default::default()
            },
        )
        .tag(nostr::event::Tag::hashtag("revision-root")),
        &keys,
    );
    assert!(parse::patch(&kinds, &event).unwrap().is_revision);
}

#[test]
fn patch_without_repo_address_is_invalid() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let event = sign(build::patch(&kinds, &build::PatchDraft::default()), &keys);
    assert_eq!(parse::patch(&kinds, &event).unwrap_err().code(), "EVENT_INVALID");
}

#[test]
fn issue_round_trip() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();

    let issue = IssueEvent {
        repo_addrs: vec![coordinate(&keys)],
        subject: Some("Clone fails behind proxy".to_owned()),
        content: "Steps to reproduce: ...".to_owned(),
        labels: vec!["bug".to_owned()],
        ..Default::default()
    };

    let event = sign(build::issue(&kinds, &issue).unwrap(), &keys);
    let parsed = parse::issue(&kinds, &event).unwrap();

    assert_eq!(parsed.subject.as_deref(), Some("Clone fails behind proxy"));
    assert!(parsed.labels.contains(&"bug".to_owned()));
    assert_eq!(parsed.content, issue.content);
    assert_eq!(parsed.repo_addrs.len(), 1);
}

#[test]
fn status_round_trip_with_merge_commit() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let root = EventId::all_zeros();
    let merge_commit = Sha1Hash::from_str(OID_A).unwrap();

    let event = sign(
        build::status(
            &kinds,
            StatusKind::Applied,
            root,
            None,
            &[coordinate(&keys)],
            &[keys.public_key()],
            Some(Either::Left(merge_commit)),
        ),
        &keys,
    );
    let parsed = parse::status(&kinds, &event).unwrap();

    assert_eq!(parsed.status, StatusKind::Applied);
    assert_eq!(parsed.root, Some(root));
    assert_eq!(parsed.merge_commit, Some(merge_commit));
    assert!(parsed.applied_as_commits.is_empty());
}

#[test]
fn status_round_trip_with_applied_commits() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let applied = vec![
        Sha1Hash::from_str(OID_A).unwrap(),
        Sha1Hash::from_str(OID_B).unwrap(),
    ];

    let event = sign(
        build::status(
            &kinds,
            StatusKind::Applied,
            EventId::all_zeros(),
            None,
            &[coordinate(&keys)],
            &[],
            Some(Either::Right(applied.clone())),
        ),
        &keys,
    );
    let parsed = parse::status(&kinds, &event).unwrap();
    assert_eq!(parsed.applied_as_commits, applied);
}

#[test]
fn pull_request_round_trip() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();

    let draft = build::PullRequestDraft {
        repo_addrs: vec![coordinate(&keys)],
        content: "Implements the new resolver".to_owned(),
        commits: vec![OID_A.to_owned(), OID_B.to_owned()],
        clone: vec!["https://example.com/fork.git".to_owned()],
        branch_name: Some("feature-x".to_owned()),
        merge_base: Some(OID_B.to_owned()),
        ..Default::default()
    };

    let event = sign(build::pull_request(&kinds, &draft), &keys);
    let parsed = parse::pull_request(&kinds, &event).unwrap();

    assert_eq!(parsed.commits, draft.commits);
    assert_eq!(parsed.branch_name.as_deref(), Some("feature-x"));
    assert_eq!(parsed.merge_base.as_deref(), Some(OID_B));
    assert_eq!(parsed.clone, draft.clone);
    assert!(!parsed.is_update);
}

#[test]
fn merge_metadata_round_trip_with_conflicts() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();

    let meta = MergeMetadata {
        id: "merge-demo".to_owned(),
        author: None,
        root: EventId::all_zeros(),
        repo_addrs: vec![coordinate(&keys)],
        base_branch: "main".to_owned(),
        target_branch: "feature-x".to_owned(),
        result: MergeResult::Conflict,
        conflict_files: vec!["src/lib.rs".to_owned()],
        conflicts: vec![ConflictDetail {
            path:   "src/lib.rs".to_owned(),
            ours:   "fn a() {}".to_owned(),
            theirs: "fn b() {}".to_owned(),
            base:   Some("fn base() {}".to_owned()),
        }],
        created_at: None,
        raw: Default::default(),
    };

    let event = sign(build::merge_metadata(&kinds, &meta).unwrap(), &keys);
    assert_eq!(event.kind, kinds.conflict_meta);
    let parsed = parse::merge_metadata(&kinds, &event).unwrap();

    assert_eq!(parsed.result, MergeResult::Conflict);
    assert_eq!(parsed.base_branch, "main");
    assert_eq!(parsed.target_branch, "feature-x");
    assert_eq!(parsed.conflict_files, meta.conflict_files);
    assert_eq!(parsed.conflicts, meta.conflicts);
    assert_eq!(parsed.root, meta.root);
}

#[test]
fn clean_merge_metadata_uses_merge_kind() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let meta = MergeMetadata {
        id: "merge-demo".to_owned(),
        author: None,
        root: EventId::all_zeros(),
        repo_addrs: vec![coordinate(&keys)],
        base_branch: "main".to_owned(),
        target_branch: "feature-x".to_owned(),
        result: MergeResult::FastForward,
        conflict_files: Vec::new(),
        conflicts: Vec::new(),
        created_at: None,
        raw: Default::default(),
    };
    let event = sign(build::merge_metadata(&kinds, &meta).unwrap(), &keys);
    assert_eq!(event.kind, kinds.merge_meta);
    let parsed = parse::merge_metadata(&kinds, &event).unwrap();
    assert_eq!(parsed.result, MergeResult::FastForward);
}

#[test]
fn label_round_trip() {
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let targets = LabelTargets {
        events: vec![EventId::all_zeros()],
        addresses: vec![coordinate(&keys)],
        ..Default::default()
    };

    let event = sign(
        build::label(&kinds, "org.example.status", &["triage".to_owned()], &targets),
        &keys,
    );
    let parsed = parse::label(&kinds, &event).unwrap();

    assert_eq!(
        parsed.labels,
        vec![("org.example.status".to_owned(), "triage".to_owned())]
    );
    assert_eq!(parsed.targets.events, targets.events);
    assert_eq!(parsed.targets.addresses.len(), 1);
}

#[test]
fn built_tags_survive_parsing() {
    // Round-tripping may add information but never lose tags.
    let kinds = GitKinds::default();
    let keys = Keys::generate();
    let draft = build::PatchDraft {
        content: "diff --git a/a b/a\n".to_owned(),
        repo_addrs: vec![coordinate(&keys)],
        commit: Some(OID_A.to_owned()),
        ..Default::default()
    };
    let event = sign(build::patch(&kinds, &draft), &keys);
    let parsed = parse::patch(&kinds, &event).unwrap();
    for tag in event.tags.iter() {
        assert!(
            parsed.raw.iter().any(|t| t == tag),
            "tag {tag:?} lost in parsing"
        );
    }
}

#[test]
fn lenient_json_accepts_string_created_at() {
    let keys = Keys::generate();
    let event = sign(
        build::state(
            &GitKinds::default(),
            &RepoState {
                id: "demo".to_owned(),
                ..Default::default()
            },
        ),
        &keys,
    );

    let created_at = event.created_at.as_u64();
    let json = event
        .as_json()
        .replace(&format!("\"created_at\":{created_at}"), &format!("\"created_at\":\"{created_at}\""));
    let reparsed = parse::lenient_event_from_json(&json).unwrap();
    assert_eq!(reparsed.created_at, event.created_at);
}
