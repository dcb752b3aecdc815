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

//! The collaboration event codec: builders for unsigned event templates and
//! parsers from signed events into domain records. JSON and signing stay
//! with the transport; the codec only shapes tags and contents.

/// Unsigned event template builders.
pub mod build;
/// NIP-32 label merging.
pub mod labels;
/// Signed event parsers.
pub mod parse;
/// Domain records.
pub mod types;
/// Tag schema validation.
pub mod validate;
#[cfg(test)]
mod tests;
