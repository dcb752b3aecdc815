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

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::DataLevel;
use crate::{error::GitMeshResult, ports::Fs};

/// Persistent per-address record of what is already materialized. A warm
/// entry at a sufficient level short-circuits initialization entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCacheEntry {
    /// Milliseconds since the epoch.
    pub last_updated: u64,
    pub head_commit:  Option<String>,
    pub data_level:   DataLevel,
    pub branches:     Vec<String>,
    pub clone_urls:   Vec<String>,
}

impl RepoCacheEntry {
    pub fn is_fresh(&self, ttl_ms: u64) -> bool {
        now_ms().saturating_sub(self.last_updated) < ttl_ms
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Where the cache record of an address lives, under the materializer
/// root.
pub fn entry_path(root: &Path, address: &str) -> PathBuf {
    root.join(".cache")
        .join(format!("{}.json", address.replace([':', '/'], "_")))
}

pub async fn load(fs: &dyn Fs, root: &Path, address: &str) -> Option<RepoCacheEntry> {
    let bytes = fs.read_file(&entry_path(root, address)).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(entry) => Some(entry),
        Err(err) => {
            tracing::debug!(address = %address, error = %err, "Discarding unreadable cache entry");
            None
        }
    }
}

pub async fn store(
    fs: &dyn Fs,
    root: &Path,
    address: &str,
    entry: &RepoCacheEntry,
) -> GitMeshResult<()> {
    let path = entry_path(root, address);
    if let Some(parent) = path.parent() {
        fs.mkdir(parent).await?;
    }
    fs.write_file(&path, &serde_json::to_vec(entry)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryFs;

    #[tokio::test]
    async fn round_trips_through_fs() {
        let fs = MemoryFs::new();
        let entry = RepoCacheEntry {
            last_updated: now_ms(),
            head_commit:  Some("deadbeef".to_owned()),
            data_level:   DataLevel::Shallow,
            branches:     vec!["main".to_owned()],
            clone_urls:   vec!["https://example.com/demo.git".to_owned()],
        };
        store(&fs, Path::new("/repos"), "30617:aa:demo", &entry)
            .await
            .unwrap();
        let loaded = load(&fs, Path::new("/repos"), "30617:aa:demo")
            .await
            .unwrap();
        assert_eq!(loaded, entry);
        assert!(loaded.is_fresh(60_000));
    }

    #[tokio::test]
    async fn stale_entries_report_unfresh() {
        let entry = RepoCacheEntry {
            last_updated: now_ms().saturating_sub(10_000),
            head_commit:  None,
            data_level:   DataLevel::Refs,
            branches:     Vec::new(),
            clone_urls:   Vec::new(),
        };
        assert!(!entry.is_fresh(5_000));
        assert!(entry.is_fresh(60_000));
    }
}
