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

//! Repository discovery: resolves a normalized key into clone endpoints
//! and ref state by querying relays for the announcement and state events.

use std::{collections::HashMap, time::Duration};

use nostr::{event::Event, filter::Filter, key::PublicKey};
use tokio::sync::Mutex;

use crate::{
    error::{GitMeshError, GitMeshResult},
    events::{
        parse,
        types::{RepoAnnouncement, RepoState},
    },
    key::RepoKey,
    kinds::GitKinds,
    ports::EventIo,
};

/// Default window for discovery queries.
pub const DISCOVER_TIMEOUT: Duration = Duration::from_millis(1500);

/// Options for [`Discovery::discover_repo`].
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub timeout:         Duration,
    /// When set, only these authors may supply announcement/state.
    pub allowed_pubkeys: Option<Vec<PublicKey>>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            timeout:         DISCOVER_TIMEOUT,
            allowed_pubkeys: None,
        }
    }
}

/// What discovery resolved for a repository.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// Clone URL primaries in announcement preference order.
    pub urls:         Vec<String>,
    pub branches:     Vec<String>,
    pub tags:         Vec<String>,
    pub announcement: Option<RepoAnnouncement>,
    pub state:        Option<RepoState>,
}

/// Relay-backed announcement/state resolver with a per-address default
/// branch memo.
pub struct Discovery<E> {
    io:               E,
    kinds:            GitKinds,
    default_branches: Mutex<HashMap<String, String>>,
}

impl<E: EventIo> Discovery<E> {
    pub fn new(io: E) -> Self {
        Self::with_kinds(io, GitKinds::default())
    }

    pub fn with_kinds(io: E, kinds: GitKinds) -> Self {
        Self {
            io,
            kinds,
            default_branches: Mutex::new(HashMap::new()),
        }
    }

    pub fn io(&self) -> &E {
        &self.io
    }

    /// Queries relays for the repository's announcement and state, newest
    /// first per replaceable identity. Fails with `NOT_FOUND` only when
    /// neither event arrives inside the window.
    pub async fn discover_repo(
        &self,
        key: &RepoKey,
        opts: &DiscoverOptions,
    ) -> GitMeshResult<Discovered> {
        self.io.ensure_relays(&key.relays).await?;

        let announcement_filter = Filter::new()
            .kind(self.kinds.announcement)
            .author(key.parts.pubkey)
            .identifier(key.name());
        let state_filter = Filter::new()
            .kind(self.kinds.state)
            .identifier(key.name());

        let (announcements, states) = tokio::join!(
            self.io.fetch_events(announcement_filter, opts.timeout),
            self.io.fetch_events(state_filter, opts.timeout),
        );

        let announcement = self
            .newest(announcements?, opts)
            .and_then(|e| self.parse_announcement(&e));
        let state = self
            .newest(states?, opts)
            .and_then(|e| self.parse_state(&e));

        if announcement.is_none() && state.is_none() {
            return Err(GitMeshError::not_found(format!(
                "repository `{}` on the configured relays",
                key.address
            ))
            .context("discover_repo", key.address.clone()));
        }

        if let Some(state) = &state
            && let Some(branch) = state.auto_head()
        {
            self.default_branches
                .lock()
                .await
                .insert(key.address.clone(), branch);
        }

        Ok(Discovered {
            urls: announcement
                .as_ref()
                .map(|a| a.clone.iter().map(|c| c.url.clone()).collect())
                .unwrap_or_default(),
            branches: state.as_ref().map(RepoState::branches).unwrap_or_default(),
            tags: state.as_ref().map(RepoState::tags).unwrap_or_default(),
            announcement,
            state,
        })
    }

    /// The repository's default branch: memoized from the first successful
    /// detection, refreshed whenever discovery runs again.
    pub async fn default_branch(&self, key: &RepoKey) -> GitMeshResult<String> {
        if let Some(branch) = self.default_branches.lock().await.get(&key.address) {
            return Ok(branch.clone());
        }
        let discovered = self.discover_repo(key, &DiscoverOptions::default()).await?;
        discovered
            .state
            .as_ref()
            .and_then(RepoState::auto_head)
            .ok_or_else(|| {
                GitMeshError::not_found(format!("default branch of `{}`", key.address))
            })
    }

    /// Clears the default-branch memo, forcing re-detection.
    pub async fn clear_default_branch_memo(&self) {
        self.default_branches.lock().await.clear();
    }

    /// The newest event passing the author whitelist.
    fn newest(&self, events: Vec<Event>, opts: &DiscoverOptions) -> Option<Event> {
        events
            .into_iter()
            .filter(|e| {
                opts.allowed_pubkeys
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(&e.pubkey))
            })
            .max_by_key(|e| e.created_at)
    }

    fn parse_announcement(&self, event: &Event) -> Option<RepoAnnouncement> {
        match parse::announcement(&self.kinds, event) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::debug!(event_id = %event.id, error = %err, "Dropping invalid announcement");
                None
            }
        }
    }

    fn parse_state(&self, event: &Event) -> Option<RepoState> {
        match parse::state(&self.kinds, event) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::debug!(event_id = %event.id, error = %err, "Dropping invalid state");
                None
            }
        }
    }
}
