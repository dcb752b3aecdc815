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

use std::collections::{BTreeMap, BTreeSet};

use nostr::event::{Tag, TagKind, Tags};

use super::{parse::UGC_NAMESPACE, types::LabelEvent};

/// Labels effective on a target after merging every source: self labels on
/// the carrier event, external NIP-32 label events, and legacy `t` tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveLabels {
    /// Values grouped by namespace.
    pub by_namespace: BTreeMap<String, BTreeSet<String>>,
    /// `"<namespace>/<value>"` strings, for flat matching.
    pub flat:         BTreeSet<String>,
    /// Plain hashtag labels, kept apart from namespaced ones.
    pub legacy_t:     BTreeSet<String>,
}

/// Extracts `(namespace, value)` pairs from the `L`/`l` tags of an event.
/// A value whose mark is missing, or names a namespace the event does not
/// declare, falls back to `ugc`.
pub fn label_pairs(tags: &Tags) -> Vec<(String, String)> {
    let namespaces: Vec<String> = tags
        .filter(TagKind::single_letter(nostr::filter::Alphabet::L, true))
        .filter_map(|t| t.content().map(ToOwned::to_owned))
        .collect();

    tags.filter(TagKind::single_letter(nostr::filter::Alphabet::L, false))
        .filter_map(|t: &Tag| {
            let values = t.clone().to_vec();
            let value = values.get(1)?.clone();
            let namespace = values
                .get(2)
                .filter(|ns| namespaces.contains(ns))
                .cloned()
                .unwrap_or_else(|| UGC_NAMESPACE.to_owned());
            Some((namespace, value))
        })
        .collect()
}

/// Merges every label source into one effective set.
pub fn merge_labels(
    self_labels: &[(String, String)],
    external: &[LabelEvent],
    legacy_t: &[String],
) -> EffectiveLabels {
    let mut effective = EffectiveLabels::default();

    let external_pairs = external.iter().flat_map(|e| e.labels.iter().cloned());
    for (namespace, value) in self_labels.iter().cloned().chain(external_pairs) {
        effective.flat.insert(format!("{namespace}/{value}"));
        effective
            .by_namespace
            .entry(namespace)
            .or_default()
            .insert(value);
    }

    effective
        .legacy_t
        .extend(legacy_t.iter().map(|t| t.trim().to_owned()));

    effective
}
