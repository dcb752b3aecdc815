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

//! Inbound collaboration threads: a filtered live feed of patches,
//! issues and statuses for one repository address, plus best-effort
//! participant collection for outbound `p` tag enrichment.

use std::{collections::HashSet, time::Duration};

use nostr::{
    event::{Event, EventId, TagKind},
    filter::{Alphabet, Filter, SingleLetterTag},
    key::PublicKey,
};
use tokio::sync::mpsc;

use crate::{
    error::GitMeshResult,
    events::{parse::TagsExt, types::StatusKind, validate},
    kinds::GitKinds,
    ports::RelaySubscriber,
};

/// Default window for participant collection.
pub const PARTICIPANT_WINDOW: Duration = Duration::from_millis(200);

/// Channel capacity of a repo subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

/// A live subscription to a repository's collaboration feed.
pub struct RepoSubscription {
    pub sub_id: String,
    pub events: mpsc::Receiver<Event>,
}

/// The `<repoId>` suffix match used to post-filter events: relays only
/// filter coarsely by kind, and one repo id may be announced by several
/// maintainers.
fn belongs_to(event: &Event, repo_id: &str) -> bool {
    let suffix = format!(":{repo_id}");
    event
        .tags
        .values(TagKind::single_letter(Alphabet::A, false))
        .iter()
        .any(|a| a.ends_with(&suffix))
}

/// Subscribes to the patch/issue/status feed of a repository address.
/// Events failing the address post-filter, or validation when it is
/// enabled, never reach the returned channel.
pub async fn subscribe_repo<S: RelaySubscriber>(
    subscriber: &S,
    kinds: &GitKinds,
    address: &str,
) -> GitMeshResult<RepoSubscription> {
    let repo_id = address.rsplit(':').next().unwrap_or_default().to_owned();
    let filter = Filter::new().kinds(kinds.thread_kinds());

    let (raw_tx, mut raw_rx) = mpsc::channel::<Event>(SUBSCRIPTION_BUFFER);
    let (tx, rx) = mpsc::channel::<Event>(SUBSCRIPTION_BUFFER);
    let sub_id = subscriber.subscribe(filter, raw_tx).await?;

    let kinds = *kinds;
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            if !belongs_to(&event, &repo_id) {
                continue;
            }
            if let Err(err) = validate::check(&kinds, &event) {
                tracing::debug!(event_id = %event.id, error = %err, "Dropping invalid thread event");
                continue;
            }
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    Ok(RepoSubscription { sub_id, events: rx })
}

/// Ends a repo subscription.
pub async fn unsubscribe_repo<S: RelaySubscriber>(
    subscriber: &S,
    subscription: &RepoSubscription,
) -> GitMeshResult<()> {
    subscriber.unsubscribe(&subscription.sub_id).await
}

/// The current lifecycle status of a thread: the newest status event
/// anchored at `root`, restricted to `authorities` (maintainers and the
/// thread author) when given. A thread with no status history is open.
pub async fn current_status<E: crate::ports::EventIo>(
    io: &E,
    kinds: &GitKinds,
    root: EventId,
    authorities: &[PublicKey],
    window: Duration,
) -> StatusKind {
    let mut filter = Filter::new()
        .kinds([
            kinds.status_open,
            kinds.status_applied,
            kinds.status_closed,
            kinds.status_draft,
        ])
        .custom_tag(SingleLetterTag::lowercase(Alphabet::E), root.to_hex());
    if !authorities.is_empty() {
        filter = filter.authors(authorities.iter().copied());
    }

    io.fetch_events(filter, window)
        .await
        .unwrap_or_default()
        .into_iter()
        .max_by_key(|e| e.created_at)
        .and_then(|e| StatusKind::from_kind(kinds, e.kind))
        .unwrap_or(StatusKind::Open)
}

/// Collects every pubkey seen on a thread: event authors and `p` tags of
/// everything anchored at `root` under `address`, gathered over a
/// bounded window. Best-effort: failures return what was gathered so
/// far.
pub async fn collect_participants<E: crate::ports::EventIo>(
    io: &E,
    kinds: &GitKinds,
    address: &str,
    root: EventId,
    window: Duration,
) -> HashSet<PublicKey> {
    let mut participants = HashSet::new();

    let thread_filter = Filter::new()
        .kinds(kinds.thread_kinds())
        .custom_tag(SingleLetterTag::lowercase(Alphabet::E), root.to_hex());
    let root_filter = Filter::new().id(root);

    let (thread_events, root_events) = tokio::join!(
        io.fetch_events(thread_filter, window),
        io.fetch_events(root_filter, window),
    );

    let repo_suffix = format!(":{}", address.rsplit(':').next().unwrap_or_default());
    for event in thread_events
        .unwrap_or_default()
        .iter()
        .filter(|e| {
            e.tags
                .values(TagKind::single_letter(Alphabet::A, false))
                .iter()
                .any(|a| a.ends_with(&repo_suffix))
        })
        .chain(root_events.unwrap_or_default().iter())
    {
        participants.insert(event.pubkey);
        for p in event.tags.values(TagKind::single_letter(Alphabet::P, false)) {
            if let Ok(pubkey) = PublicKey::from_hex(&p) {
                participants.insert(pubkey);
            }
        }
    }

    participants
}
