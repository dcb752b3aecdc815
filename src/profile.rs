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

//! Import-time identity minting: every platform user encountered while
//! mirroring a repository gets a fresh ephemeral keypair and a profile
//! event. The private keys live only as long as the mint.

use std::collections::HashMap;

use nostr::{
    JsonUtil, Metadata,
    event::{Event, Tag, TagKind},
    key::{Keys, PublicKey},
    types::Url,
};
use tokio::sync::Mutex;

use crate::{
    error::{GitMeshError, GitMeshResult},
    kinds::GitKinds,
};

/// Fallback avatar for platform users without a known picture.
const DEFAULT_AVATAR_BASE: &str = "https://robohash.org";

/// A minted platform-user identity.
#[derive(Debug, Clone)]
pub struct MintedProfile {
    pub pubkey:   PublicKey,
    /// The signed kind-0 profile event, ready for publication.
    pub event:    Event,
    pub platform: String,
    pub username: String,
}

/// Mints one ephemeral identity per `(platform, username)` pair seen in
/// an import session. Keys are generated, used for the one signature,
/// and dropped.
#[derive(Default)]
pub struct ProfileMint {
    kinds:    GitKinds,
    profiles: Mutex<HashMap<String, MintedProfile>>,
}

impl ProfileMint {
    pub fn new() -> Self {
        Self::default()
    }

    fn profile_key(platform: &str, username: &str) -> String {
        format!("{platform}:{username}")
    }

    /// The minted profile for a platform user, creating it on first
    /// sight. `avatar_url` overrides the generated default when the
    /// platform knows one.
    pub async fn profile_for(
        &self,
        platform: &str,
        username: &str,
        avatar_url: Option<&str>,
    ) -> GitMeshResult<MintedProfile> {
        let key = Self::profile_key(platform, username);
        let mut profiles = self.profiles.lock().await;
        if let Some(existing) = profiles.get(&key) {
            return Ok(existing.clone());
        }

        let keys = Keys::generate();
        let avatar = avatar_url
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("{DEFAULT_AVATAR_BASE}/{username}.png"));
        let metadata = Metadata::new()
            .name(username)
            .display_name(format!("{username} (mirrored user from {platform})"))
            .picture(
                Url::parse(&avatar)
                    .map_err(|err| GitMeshError::InvalidInput(err.to_string()))?,
            );

        let event = nostr::event::EventBuilder::new(self.kinds.profile, metadata.as_json())
            .tag(Tag::custom(TagKind::custom("imported"), [""]))
            .sign_with_keys(&keys)?;

        let minted = MintedProfile {
            pubkey: keys.public_key(),
            event,
            platform: platform.to_owned(),
            username: username.to_owned(),
        };
        tracing::debug!(key = %key, pubkey = %minted.pubkey, "Minted mirrored-user profile");
        profiles.insert(key, minted.clone());
        Ok(minted)
    }

    /// Every profile minted so far.
    pub async fn profiles(&self) -> Vec<MintedProfile> {
        self.profiles.lock().await.values().cloned().collect()
    }
}
