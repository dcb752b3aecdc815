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

//! The bundled relay transport: an [`EventIo`]/[`RelaySubscriber`]
//! implementation over a `nostr-sdk` relay pool. Embedders with their own
//! transport implement the ports instead.

/// NIP-98 HTTP authentication.
pub mod nip98;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use futures::future;
use nostr::{
    event::{Event, EventId, Kind, UnsignedEvent},
    filter::Filter,
    key::{Keys, PublicKey},
    nips::{
        nip01::Coordinate,
        nip19::{Nip19Event, Nip19Coordinate, ToBech32},
    },
    types::RelayUrl,
};
use nostr_sdk::Client;
use tokio::{sync::Mutex, sync::mpsc, task::JoinHandle};

use crate::{
    error::{GitMeshError, GitMeshResult},
    ports::{EventIo, PublishReceipt, RelaySubscriber},
};

/// Timeout for connecting a single relay.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Returns a vector with duplicate elements removed.
fn dedup<I, T>(iter: I) -> Vec<T>
where
    T: std::cmp::Ord,
    I: Iterator<Item = T>,
{
    let mut vector: Vec<T> = iter.collect();
    vector.sort_unstable();
    vector.dedup();
    vector
}

/// Creates a NIP-19 nevent string from an event ID and up to 3 unique
/// relay URLs.
pub fn new_nevent(event_id: EventId, relays: &[RelayUrl]) -> GitMeshResult<String> {
    Nip19Event::new(event_id)
        .relays(
            dedup(relays.iter().cloned())
                .into_iter()
                .take(3)
                .collect::<Vec<_>>(),
        )
        .to_bech32()
        .map_err(GitMeshError::from)
}

/// Creates a NIP-19 naddr string for a repository announcement and up to
/// 3 unique relay URLs.
pub fn repo_naddr(
    repo_id: impl Into<String>,
    kind: Kind,
    pubkey: PublicKey,
    relays: &[RelayUrl],
) -> GitMeshResult<String> {
    Nip19Coordinate::new(
        Coordinate::new(kind, pubkey).identifier(repo_id),
        dedup(relays.iter().cloned()).into_iter().take(3),
    )
    .to_bech32()
    .map_err(GitMeshError::from)
}

/// A relay-pool client for collaboration events.
pub struct RelayClient {
    client: Client,
    pumps:  Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RelayClient {
    /// Builds a client signing with the given keys.
    pub fn new(keys: Keys) -> Self {
        Self::from_client(Client::builder().signer(keys).build())
    }

    /// Wraps an already-configured client (external signer, custom
    /// options).
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            pumps: Mutex::new(HashMap::new()),
        }
    }

    /// Adds relays to the pool and connects to them concurrently.
    pub async fn add_relays(&self, relays: &[RelayUrl]) {
        let mut tasks = Vec::new();
        for relay in relays {
            let relay = relay.clone();
            let client = self.client.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = client.add_relay(&relay).await {
                    tracing::error!("Failed to add relay '{relay}': {err}");
                    return;
                }
                if let Err(err) = client.try_connect_relay(&relay, CONNECT_TIMEOUT).await {
                    tracing::error!("Failed to connect to relay '{relay}': {err}");
                }
            }));
        }
        future::join_all(tasks).await;
    }

    fn transport_error(err: impl ToString) -> GitMeshError {
        GitMeshError::network("relay", err)
    }
}

#[async_trait]
impl EventIo for RelayClient {
    async fn fetch_events(&self, filter: Filter, timeout: Duration) -> GitMeshResult<Vec<Event>> {
        Ok(self
            .client
            .fetch_events(filter, timeout)
            .await
            .map_err(Self::transport_error)?
            .into_iter()
            .collect())
    }

    async fn publish_event(&self, mut event: UnsignedEvent) -> GitMeshResult<PublishReceipt> {
        event.ensure_id();
        let event_id = event.id.expect("The id was just ensured");
        let signed = self.sign_event(event).await?;

        let output = self
            .client
            .send_event(&signed)
            .await
            .map_err(Self::transport_error)?;

        for relay in &output.success {
            tracing::info!(event_id = %event_id, relay = %relay, "Event sent successfully");
        }
        for (relay, reason) in &output.failed {
            tracing::warn!(event_id = %event_id, relay = %relay, reason = %reason, "Failed to send event");
        }

        Ok(PublishReceipt {
            ok:     !output.success.is_empty(),
            error:  output.failed.values().next().cloned(),
            relays: output.success.iter().cloned().collect(),
        })
    }

    async fn sign_event(&self, event: UnsignedEvent) -> GitMeshResult<Event> {
        let signer = self
            .client
            .signer()
            .await
            .map_err(Self::transport_error)?;
        event.sign(&signer).await.map_err(Self::transport_error)
    }

    async fn current_pubkey(&self) -> GitMeshResult<Option<PublicKey>> {
        let Ok(signer) = self.client.signer().await else {
            return Ok(None);
        };
        Ok(signer.get_public_key().await.ok())
    }

    async fn ensure_relays(&self, relays: &[RelayUrl]) -> GitMeshResult<()> {
        self.add_relays(relays).await;
        Ok(())
    }
}

#[async_trait]
impl RelaySubscriber for RelayClient {
    async fn subscribe(
        &self,
        filter: Filter,
        events: mpsc::Sender<Event>,
    ) -> GitMeshResult<String> {
        let output = self
            .client
            .subscribe(filter, None)
            .await
            .map_err(Self::transport_error)?;
        let sub_id = output.val.clone();

        let mut notifications = self.client.notifications();
        let wanted = sub_id.clone();
        let pump = tokio::spawn(async move {
            while let Ok(notification) = notifications.recv().await {
                if let nostr_sdk::RelayPoolNotification::Event {
                    subscription_id,
                    event,
                    ..
                } = notification
                    && subscription_id == wanted
                    && events.send(*event).await.is_err()
                {
                    break;
                }
            }
        });

        let sub_id = sub_id.to_string();
        self.pumps.lock().await.insert(sub_id.clone(), pump);
        Ok(sub_id)
    }

    async fn unsubscribe(&self, sub_id: &str) -> GitMeshResult<()> {
        self.client
            .unsubscribe(&nostr_sdk::SubscriptionId::new(sub_id))
            .await;
        if let Some(pump) = self.pumps.lock().await.remove(sub_id) {
            pump.abort();
        }
        Ok(())
    }

    async fn publish(&self, event: Event) -> GitMeshResult<EventId> {
        let output = self
            .client
            .send_event(&event)
            .await
            .map_err(Self::transport_error)?;
        Ok(*output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nevent_rendering_caps_relay_hints() {
        let relays: Vec<RelayUrl> = (1..=5)
            .map(|i| format!("wss://relay{i}.example.com").parse().unwrap())
            .collect();
        let nevent = new_nevent(EventId::all_zeros(), &relays).unwrap();
        assert!(nevent.starts_with("nevent1"));
    }

    #[test]
    fn naddr_rendering_round_trips() {
        use nostr::nips::nip19::FromBech32;

        let keys = Keys::generate();
        let naddr = repo_naddr(
            "demo",
            Kind::GitRepoAnnouncement,
            keys.public_key(),
            &[],
        )
        .unwrap();
        let parsed = Nip19Coordinate::from_bech32(&naddr).unwrap();
        assert_eq!(parsed.coordinate.identifier, "demo");
        assert_eq!(parsed.public_key, keys.public_key());
    }
}
