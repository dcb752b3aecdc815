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

use std::{collections::BTreeMap, path::Path};

use nostr::hashes::{Hash, sha256::Hash as Sha256Hash};

use crate::{
    error::GitMeshResult,
    ports::{GitProvider, TreeEntry, TreeEntryKind},
};

/// The well-known id of git's empty tree, used as the synthetic parent of
/// root commits.
pub const EMPTY_TREE_OID: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// What happened to a path between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Remove,
    Modify,
}

/// One changed leaf path. Directories never emit changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path:  String,
    pub kind:  ChangeType,
    /// Blob oid on the old side, absent for additions.
    pub a_oid: Option<String>,
    /// Blob oid on the new side, absent for removals.
    pub b_oid: Option<String>,
}

/// The `diff-<sha256(path)>` anchor of a changed file, as used in patch
/// permalinks.
pub fn diff_anchor(path: &str) -> String {
    format!("diff-{}", Sha256Hash::hash(path.as_bytes()))
}

/// Finds the changed file a diff anchor points at.
pub fn find_file_by_anchor<'c>(
    changes: &'c [FileChange],
    anchor: &str,
) -> Option<&'c FileChange> {
    changes.iter().find(|c| diff_anchor(&c.path) == anchor)
}

/// Walks two trees simultaneously and emits a change for every leaf path
/// whose blob oids differ. `None` on either side means the empty tree.
pub async fn compute_changes<P: GitProvider>(
    provider: &P,
    dir: &Path,
    a_tree: Option<&str>,
    b_tree: Option<&str>,
) -> GitMeshResult<Vec<FileChange>> {
    let mut changes = Vec::new();
    walk(provider, dir, a_tree, b_tree, "", &mut changes).await?;
    Ok(changes)
}

async fn entries_of<P: GitProvider>(
    provider: &P,
    dir: &Path,
    tree: Option<&str>,
) -> GitMeshResult<BTreeMap<String, TreeEntry>> {
    let Some(oid) = tree else {
        return Ok(BTreeMap::new());
    };
    if oid == EMPTY_TREE_OID {
        return Ok(BTreeMap::new());
    }
    Ok(provider
        .read_tree(dir, oid)
        .await?
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

async fn walk<P: GitProvider>(
    provider: &P,
    dir: &Path,
    a_tree: Option<&str>,
    b_tree: Option<&str>,
    prefix: &str,
    changes: &mut Vec<FileChange>,
) -> GitMeshResult<()> {
    let a_entries = entries_of(provider, dir, a_tree).await?;
    let b_entries = entries_of(provider, dir, b_tree).await?;

    let mut names: Vec<&String> = a_entries.keys().collect();
    names.extend(b_entries.keys().filter(|n| !a_entries.contains_key(*n)));
    names.sort_unstable();

    for name in names {
        let path = join(prefix, name);
        let a = a_entries.get(name);
        let b = b_entries.get(name);
        match (a, b) {
            (Some(a), Some(b)) if a.oid == b.oid => {}
            (Some(a), Some(b)) => {
                match (a.kind, b.kind) {
                    (TreeEntryKind::Blob, TreeEntryKind::Blob) => {
                        changes.push(FileChange {
                            path,
                            kind: ChangeType::Modify,
                            a_oid: Some(a.oid.clone()),
                            b_oid: Some(b.oid.clone()),
                        });
                    }
                    (TreeEntryKind::Tree, TreeEntryKind::Tree) => {
                        Box::pin(walk(
                            provider,
                            dir,
                            Some(&a.oid),
                            Some(&b.oid),
                            &path,
                            changes,
                        ))
                        .await?;
                    }
                    // A path flipping between file and directory is a
                    // removal of one shape and an addition of the other.
                    (TreeEntryKind::Blob, TreeEntryKind::Tree) => {
                        changes.push(FileChange {
                            path: path.clone(),
                            kind: ChangeType::Remove,
                            a_oid: Some(a.oid.clone()),
                            b_oid: None,
                        });
                        Box::pin(walk(provider, dir, None, Some(&b.oid), &path, changes))
                            .await?;
                    }
                    (TreeEntryKind::Tree, TreeEntryKind::Blob) => {
                        Box::pin(walk(provider, dir, Some(&a.oid), None, &path, changes))
                            .await?;
                        changes.push(FileChange {
                            path,
                            kind: ChangeType::Add,
                            a_oid: None,
                            b_oid: Some(b.oid.clone()),
                        });
                    }
                }
            }
            (Some(a), None) => {
                match a.kind {
                    TreeEntryKind::Blob => {
                        changes.push(FileChange {
                            path,
                            kind: ChangeType::Remove,
                            a_oid: Some(a.oid.clone()),
                            b_oid: None,
                        });
                    }
                    TreeEntryKind::Tree => {
                        Box::pin(walk(provider, dir, Some(&a.oid), None, &path, changes))
                            .await?;
                    }
                }
            }
            (None, Some(b)) => {
                match b.kind {
                    TreeEntryKind::Blob => {
                        changes.push(FileChange {
                            path,
                            kind: ChangeType::Add,
                            a_oid: None,
                            b_oid: Some(b.oid.clone()),
                        });
                    }
                    TreeEntryKind::Tree => {
                        Box::pin(walk(provider, dir, None, Some(&b.oid), &path, changes))
                            .await?;
                    }
                }
            }
            (None, None) => unreachable!("name came from one of the maps"),
        }
    }
    Ok(())
}
