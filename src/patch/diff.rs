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

use std::path::Path;

use similar::TextDiff;

use super::changes::{ChangeType, FileChange, compute_changes};
use crate::{error::GitMeshResult, ports::GitProvider};

/// Context lines around each hunk.
const CONTEXT_RADIUS: usize = 3;

/// Short-oid width used in `index` header hints.
const SHORT_OID: usize = 7;

fn short(oid: Option<&str>) -> &str {
    let oid = oid.unwrap_or("0000000");
    &oid[..SHORT_OID.min(oid.len())]
}

/// Produces a unified diff for one file, with git-style headers and
/// 7-char oid hints. Equal contents produce an empty string.
pub fn unified_diff(
    path: &str,
    old: &str,
    new: &str,
    a_oid: Option<&str>,
    b_oid: Option<&str>,
) -> String {
    if old == new {
        return String::new();
    }

    let diff = TextDiff::from_lines(old, new);
    let mut out = format!(
        "diff --git a/{path} b/{path}\nindex {}..{} 100644\n",
        short(a_oid),
        short(b_oid),
    );
    out.push_str(
        &diff
            .unified_diff()
            .context_radius(CONTEXT_RADIUS)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string(),
    );
    out
}

/// The unified diff of one change, reading blob contents through the
/// provider. Absent sides read as empty, per the change type.
pub async fn file_patch<P: GitProvider>(
    provider: &P,
    dir: &Path,
    change: &FileChange,
) -> GitMeshResult<String> {
    let old = match (&change.kind, &change.a_oid) {
        (ChangeType::Add, _) | (_, None) => String::new(),
        (_, Some(oid)) => {
            String::from_utf8_lossy(&provider.read_blob(dir, oid).await?).into_owned()
        }
    };
    let new = match (&change.kind, &change.b_oid) {
        (ChangeType::Remove, _) | (_, None) => String::new(),
        (_, Some(oid)) => {
            String::from_utf8_lossy(&provider.read_blob(dir, oid).await?).into_owned()
        }
    };
    Ok(unified_diff(
        &change.path,
        &old,
        &new,
        change.a_oid.as_deref(),
        change.b_oid.as_deref(),
    ))
}

/// The concatenated unified diff between two trees. A missing old side
/// diffs against the empty tree, so everything appears as additions.
pub async fn multi_file_patch<P: GitProvider>(
    provider: &P,
    dir: &Path,
    a_tree: Option<&str>,
    b_tree: Option<&str>,
) -> GitMeshResult<String> {
    let changes = compute_changes(provider, dir, a_tree, b_tree).await?;
    let mut parts = Vec::new();
    for change in &changes {
        let patch = file_patch(provider, dir, change).await?;
        if !patch.is_empty() {
            parts.push(patch);
        }
    }
    Ok(parts.concat())
}
