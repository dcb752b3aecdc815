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

use std::sync::LazyLock;

use nostr::{
    key::PublicKey,
    nips::{
        nip05::{Nip05Address, Nip05Profile},
        nip19::{FromBech32, Nip19Coordinate, ToBech32},
    },
    types::RelayUrl,
};
use regex::Regex;

use crate::{
    error::{GitMeshError, GitMeshResult, warn_once},
    kinds::GitKinds,
};

/// Canonical address form: `<kind>:<pubkey_hex>:<name>`. The name may be
/// empty (bare pubkey keys).
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?<kind>\d{1,5}):(?<pubkey>[0-9a-f]{64}):(?<name>.*)$").unwrap());

/// Deprecated `30617.<pubkey_hex>` form still produced by some early
/// tooling.
static DEPRECATED_KIND_DOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?<kind>\d{1,5})\.(?<pubkey>[0-9a-f]{64})$").unwrap());

/// Exactly 64 lowercase hex characters.
static HEX64_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// The pieces a repository key decomposes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    /// Repository owner.
    pub pubkey: PublicKey,
    /// Repository name (`d` identifier). `None` for bare-pubkey keys.
    pub name:   Option<String>,
    /// Bech32 form of the owner key.
    pub npub:   String,
    /// The NIP-05 identifier the key was resolved from, if any.
    pub nip05:  Option<String>,
}

/// A normalized repository handle. Any accepted input form maps to the same
/// `RepoKey` for the same repository, and `address` round-trips through
/// [`normalize`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoKey {
    /// Canonical address: `<announcement_kind>:<pubkey_hex>:<name>` (empty
    /// name segment for bare pubkeys).
    pub address: String,
    /// Decomposed parts.
    pub parts:   KeyParts,
    /// Relay hints carried by the input (naddr hints, NIP-05 relays).
    pub relays:  Vec<RelayUrl>,
}

impl RepoKey {
    fn new(
        kinds: &GitKinds,
        pubkey: PublicKey,
        name: Option<String>,
        nip05: Option<String>,
        relays: Vec<RelayUrl>,
    ) -> GitMeshResult<Self> {
        let npub = pubkey
            .to_bech32()
            .unwrap_or_else(|e: std::convert::Infallible| match e {});
        Ok(Self {
            address: format!(
                "{}:{}:{}",
                kinds.announcement.as_u16(),
                pubkey.to_hex(),
                name.as_deref().unwrap_or_default()
            ),
            parts: KeyParts {
                pubkey,
                name,
                npub,
                nip05,
            },
            relays,
        })
    }

    /// The repository name segment, empty for bare-pubkey keys.
    pub fn name(&self) -> &str {
        self.parts.name.as_deref().unwrap_or_default()
    }
}

/// Everything [`normalize`] understands, after shape detection but before
/// any network round-trip.
enum ParsedInput {
    Key {
        pubkey: PublicKey,
        name:   Option<String>,
        relays: Vec<RelayUrl>,
    },
    /// A NIP-05 identifier which still needs an HTTP probe.
    Nip05 { nip05: String, name: Option<String> },
}

/// Normalizes any supported repository-key form into a [`RepoKey`].
///
/// Accepted forms: `naddr1…`, `npub1…/name`, `<hex64>/name`,
/// `<nip05>/name`, bare `npub1…`, bare `<hex64>`, bare `<nip05>`, and the
/// canonical `<kind>:<pubkey>:<name>` address. NIP-05 identifiers are
/// resolved over HTTP; use [`normalize_sync`] when that is unacceptable.
pub async fn normalize(input: &str) -> GitMeshResult<RepoKey> {
    let kinds = GitKinds::default();
    match parse_input(input, &kinds)? {
        ParsedInput::Key {
            pubkey,
            name,
            relays,
        } => RepoKey::new(&kinds, pubkey, name, None, relays),
        ParsedInput::Nip05 { nip05, name } => {
            let profile = resolve_nip05(&nip05).await?;
            RepoKey::new(
                &kinds,
                profile.public_key,
                name,
                Some(nip05),
                profile.relays,
            )
        }
    }
}

/// Like [`normalize`], but fails with `REQUIRES_ASYNC` on inputs that need
/// a NIP-05 network probe.
pub fn normalize_sync(input: &str) -> GitMeshResult<RepoKey> {
    let kinds = GitKinds::default();
    match parse_input(input, &kinds)? {
        ParsedInput::Key {
            pubkey,
            name,
            relays,
        } => RepoKey::new(&kinds, pubkey, name, None, relays),
        ParsedInput::Nip05 { nip05, .. } => Err(GitMeshError::RequiresAsync(nip05)),
    }
}

fn invalid(input: &str, reason: impl Into<String>) -> GitMeshError {
    GitMeshError::InvalidKey {
        input:  input.to_owned(),
        reason: reason.into(),
    }
}

fn parse_input(raw: &str, kinds: &GitKinds) -> GitMeshResult<ParsedInput> {
    let input = raw.trim().trim_start_matches("nostr:");
    if input.is_empty() {
        return Err(invalid(raw, "empty input"));
    }

    // Canonical address form first, so `normalize` is idempotent over its
    // own output. The announcement kind is the only one addressable here.
    if let Some(captures) = ADDRESS_RE.captures(input) {
        if captures["kind"] != kinds.announcement.as_u16().to_string() {
            return Err(invalid(input, "address kind is not a repo announcement"));
        }
        let pubkey = PublicKey::from_hex(&captures["pubkey"])?;
        let name = canonical_name(&captures["name"]);
        return Ok(ParsedInput::Key {
            pubkey,
            name,
            relays: Vec::new(),
        });
    }

    if let Some(captures) = DEPRECATED_KIND_DOT_RE.captures(input) {
        warn_once(
            "repo-key-kind-dot",
            "`<kind>.<pubkey>` repository keys are deprecated, use `naddr` or `npub/name`",
        );
        if captures["kind"] != kinds.announcement.as_u16().to_string() {
            return Err(invalid(input, "address kind is not a repo announcement"));
        }
        return Ok(ParsedInput::Key {
            pubkey: PublicKey::from_hex(&captures["pubkey"])?,
            name:   None,
            relays: Vec::new(),
        });
    }

    if input.starts_with("naddr1") {
        let naddr = Nip19Coordinate::from_bech32(input)?;
        if naddr.kind != kinds.announcement {
            return Err(invalid(input, "naddr is not a repo announcement address"));
        }
        if naddr.relays.is_empty() {
            tracing::warn!("The repository naddr does not contain any relay hints");
        }
        return Ok(ParsedInput::Key {
            pubkey: naddr.public_key,
            name:   canonical_name(&naddr.coordinate.identifier),
            relays: naddr.relays.clone(),
        });
    }

    if input.starts_with("note1") || input.starts_with("nevent1") {
        return Err(invalid(input, "event references are not repository keys"));
    }

    // Only the first `/` or `:` separates the owner from the name.
    let (owner, name) = match input.find(['/', ':']) {
        Some(at) => {
            let name = canonical_name(&input[at + 1..])
                .ok_or_else(|| invalid(input, "empty repository name after separator"))?;
            (&input[..at], Some(name))
        }
        None => (input, None),
    };

    parse_owner(raw, owner, name)
}

fn parse_owner(raw: &str, owner: &str, name: Option<String>) -> GitMeshResult<ParsedInput> {
    if owner.starts_with("npub1") {
        return Ok(ParsedInput::Key {
            pubkey: PublicKey::from_bech32(owner)?,
            name,
            relays: Vec::new(),
        });
    }

    if HEX64_RE.is_match(owner) {
        return Ok(ParsedInput::Key {
            pubkey: PublicKey::from_hex(owner)?,
            name,
            relays: Vec::new(),
        });
    }

    // Hex of the wrong case or length is malformed, not a NIP-05 name.
    if owner.len() == 64 && owner.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(raw, "pubkey must be exactly 64 lowercase hex chars"));
    }

    if owner.contains('@') || owner.contains('.') {
        return Ok(ParsedInput::Nip05 {
            nip05: owner.to_owned(),
            name,
        });
    }

    Err(invalid(raw, "unrecognized repository key form"))
}

/// Canonicalizes a name segment: trims it and replaces inner whitespace
/// runs with a single `-`. Returns `None` when nothing is left.
fn canonical_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-"),
    )
}

/// Resolves a NIP-05 identifier to its profile via the well-known JSON
/// document. A bare domain probes the `_` local part.
async fn resolve_nip05(nip05: &str) -> GitMeshResult<Nip05Profile> {
    let (username, domain) = nip05.split_once('@').unwrap_or(("_", nip05));
    let address = Nip05Address::parse(&format!("{username}@{domain}"))
        .map_err(|err| invalid(nip05, err.to_string()))?;

    let json = reqwest::get(address.url().as_str())
        .await
        .map_err(|err| GitMeshError::network("nip05_resolve", err))?
        .text()
        .await
        .map_err(|err| GitMeshError::network("nip05_resolve", err))?;

    Nip05Profile::from_raw_json(&address, &json)
        .map_err(|err| invalid(nip05, format!("unresolvable NIP-05: {err}")))
}
