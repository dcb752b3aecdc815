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

use nostr::event::{Event, TagKind};

use super::{
    parse::TagsExt,
    types::{PEELED_SUFFIX, TAGS_REFS},
};
use crate::{
    error::{GitMeshError, GitMeshResult},
    kinds::GitKinds,
};

/// Environment variable controlling event validation. Truthy values force
/// it on, falsy values force it off.
pub const VALIDATE_EVENTS_ENV: &str = "GITMESH_VALIDATE_EVENTS";

/// Whether inbound events should be validated before parsing. Defaults to
/// on in debug builds, off in release builds; the environment variable
/// overrides in both directions.
pub fn should_validate_events() -> bool {
    match std::env::var(VALIDATE_EVENTS_ENV) {
        Ok(value) => {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => cfg!(debug_assertions),
            }
        }
        Err(_) => cfg!(debug_assertions),
    }
}

/// Validates `event` when validation is enabled, otherwise does nothing.
pub fn check(kinds: &GitKinds, event: &Event) -> GitMeshResult<()> {
    if should_validate_events() {
        assert_event(kinds, event)
    } else {
        Ok(())
    }
}

fn issue_at(event: &Event, path: &str, message: &str) -> GitMeshError {
    GitMeshError::EventInvalid {
        kind:    event.kind,
        path:    path.to_owned(),
        message: message.to_owned(),
    }
}

/// Validates the tag schema of a collaboration event. Unknown tags pass
/// through without error; unknown kinds are accepted as-is. Fails with
/// `EVENT_INVALID` carrying the first issue's path and message.
pub fn assert_event(kinds: &GitKinds, event: &Event) -> GitMeshResult<()> {
    let tags = &event.tags;
    let has_a = !tags
        .values(TagKind::single_letter(nostr::filter::Alphabet::A, false))
        .is_empty();

    if event.kind == kinds.announcement {
        if tags
            .value(TagKind::single_letter(nostr::filter::Alphabet::D, false))
            .is_none()
        {
            return Err(issue_at(event, "tags.d", "announcement requires a `d` tag"));
        }
        for relay in tags.multi_all(TagKind::Relays) {
            if !relay.starts_with("wss://") && !relay.starts_with("ws://") {
                return Err(issue_at(
                    event,
                    "tags.relays",
                    &format!("`{relay}` is not a ws/wss URL"),
                ));
            }
        }
    } else if event.kind == kinds.state {
        for tag in tags.iter() {
            let values = tag.clone().to_vec();
            let Some(name) = values.first() else { continue };
            if let Some(bare) = name.strip_suffix(PEELED_SUFFIX)
                && name.starts_with(TAGS_REFS)
                && !tags.iter().any(|t| {
                    t.clone().to_vec().first().is_some_and(|n| n == bare)
                })
            {
                return Err(issue_at(
                    event,
                    &format!("tags.{name}"),
                    "peeled tag without its base tag",
                ));
            }
        }
    } else if event.kind == kinds.patch {
        if !has_a {
            return Err(issue_at(event, "tags.a", "patch requires an `a` tag"));
        }
    } else if event.kind == kinds.issue {
        if !has_a {
            return Err(issue_at(event, "tags.a", "issue requires an `a` tag"));
        }
    } else if kinds.is_status(event.kind) {
        if tags.value(TagKind::e()).is_none() {
            return Err(issue_at(event, "tags.e", "status requires an `e` tag"));
        }
        if tags
            .value(TagKind::single_letter(nostr::filter::Alphabet::P, false))
            .is_none()
        {
            tracing::debug!(event_id = %event.id, "Status event without `p` recipients");
        }
    } else if event.kind == kinds.pull_request || event.kind == kinds.pr_update {
        if !has_a {
            return Err(issue_at(event, "tags.a", "pull request requires an `a` tag"));
        }
    } else if event.kind == kinds.merge_meta || event.kind == kinds.conflict_meta {
        if !has_a {
            return Err(issue_at(event, "tags.a", "merge metadata requires an `a` tag"));
        }
        if tags.value(TagKind::e()).is_none() {
            return Err(issue_at(
                event,
                "tags.e",
                "merge metadata requires a root `e` tag",
            ));
        }
    }

    Ok(())
}
