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

//! A client-side runtime for decentralized Git collaboration over Nostr
//! relays. Repository identity, ref state, maintainer sets and
//! collaboration threads live as signed addressable events (NIP-34 and
//! friends); object bytes move over Smart HTTP. This crate binds the two
//! worlds: it discovers and materializes repositories, builds and parses
//! every collaboration event kind, analyzes and applies patches, and
//! routes pushes between patch events and the Git transport.
//!
//! Git plumbing, the relay pool, signing and the filesystem are consumed
//! through the traits in [`ports`]; a relay-pool implementation of the
//! event ports ships in [`relay`].

/// Repository discovery over relays.
pub mod discovery;
/// Gitmesh errors and the deprecation registry.
pub mod error;
/// The collaboration event codec.
pub mod events;
/// Git provider wrappers.
pub mod git;
/// Repository key normalization.
pub mod key;
/// Collaboration event kinds.
pub mod kinds;
/// Local repository materialization.
pub mod materialize;
/// The patch engine.
pub mod patch;
/// Ports consumed by the runtime.
pub mod ports;
/// Import-time identity minting.
pub mod profile;
/// The push router.
pub mod push;
/// Vendor REST rate limiting.
pub mod ratelimit;
/// The bundled relay transport.
pub mod relay;
/// Retry and timeout policy.
pub mod retry;
/// Collaboration thread feeds.
pub mod threads;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ErrorClass, GitMeshError, GitMeshResult};
pub use key::{KeyParts, RepoKey, normalize, normalize_sync};
pub use kinds::GitKinds;
