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

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Remembers the last clone URL a repository pushed through
/// successfully. Append-latest-wins; embedders may persist it.
#[async_trait]
pub trait ProtocolPreferenceStore: Send + Sync {
    async fn get(&self, repo_id: &str) -> Option<String>;
    async fn set(&self, repo_id: &str, url: &str);
}

/// The default in-memory store.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    urls: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtocolPreferenceStore for MemoryPreferenceStore {
    async fn get(&self, repo_id: &str) -> Option<String> {
        self.urls.lock().await.get(repo_id).cloned()
    }

    async fn set(&self, repo_id: &str, url: &str) {
        self.urls
            .lock()
            .await
            .insert(repo_id.to_owned(), url.to_owned());
    }
}
