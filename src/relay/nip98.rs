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

//! NIP-98 HTTP authentication for relay-hosted Git endpoints: every
//! request carries `Authorization: Nostr <base64(signed kind-27235
//! event)>` with the request URL and method tagged on the event.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use nostr::{
    JsonUtil,
    event::{EventBuilder, Kind, Tag, TagKind},
};

use crate::{
    error::GitMeshResult,
    ports::{HttpAuth, Signer},
};

/// The NIP-98 HTTP auth event kind.
pub const HTTP_AUTH_KIND: Kind = Kind::Custom(27235);

/// An [`HttpAuth`] implementation producing NIP-98 authorization headers
/// from any [`Signer`].
pub struct Nip98Auth<S> {
    signer: S,
}

impl<S: Signer> Nip98Auth<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl<S: Signer> HttpAuth for Nip98Auth<S> {
    async fn authorization(&self, url: &str, method: &str) -> GitMeshResult<Option<String>> {
        let pubkey = self.signer.public_key().await?;
        let template = EventBuilder::new(HTTP_AUTH_KIND, "")
            .tag(Tag::custom(TagKind::custom("u"), [url.to_owned()]))
            .tag(Tag::custom(
                TagKind::custom("method"),
                [method.to_ascii_uppercase()],
            ))
            .build(pubkey);
        let event = self.signer.sign_event(template).await?;
        Ok(Some(format!("Nostr {}", BASE64.encode(event.as_json()))))
    }
}
