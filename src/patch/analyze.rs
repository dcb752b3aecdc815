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

use super::{
    PatchFile,
    apply::{FilePatch, apply_hunks, parse_patch},
    changes::ChangeType,
};
use crate::{
    error::GitMeshResult,
    events::types::{ConflictDetail, PatchEvent},
    ports::{GitProvider, TreeEntryKind},
};

/// History window searched when checking whether a patch commit already
/// landed on the target branch.
const UP_TO_DATE_WINDOW: usize = 1000;

/// Outcome class of a merge analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    FastForward,
    Conflict,
    Error,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::FastForward => "ff",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }
}

/// What a dry-run merge of a patch against a target branch would do.
#[derive(Debug, Clone)]
pub struct MergeAnalysis {
    pub can_merge:        bool,
    pub has_conflicts:    bool,
    pub conflict_files:   Vec<String>,
    pub conflict_details: Vec<ConflictDetail>,
    /// The patch commit is already in the target history.
    pub up_to_date:       bool,
    /// The patch parent is the current target tip.
    pub fast_forward:     bool,
    pub patch_commits:    Vec<String>,
    pub analysis:         Verdict,
    pub error_message:    Option<String>,
}

impl MergeAnalysis {
    fn error(message: impl Into<String>) -> Self {
        Self {
            can_merge:        false,
            has_conflicts:    false,
            conflict_files:   Vec::new(),
            conflict_details: Vec::new(),
            up_to_date:       false,
            fast_forward:     false,
            patch_commits:    Vec::new(),
            analysis:         Verdict::Error,
            error_message:    Some(message.into()),
        }
    }
}

/// Analyzes whether a patch merges cleanly onto `target_branch`.
/// Failures of the analysis itself come back as the `error` verdict, not
/// as an `Err`.
pub async fn analyze_merge<P: GitProvider>(
    provider: &P,
    dir: &Path,
    patch: &PatchEvent,
    target_branch: &str,
) -> GitMeshResult<MergeAnalysis> {
    let target_oid = match provider
        .resolve_ref(dir, &format!("refs/heads/{target_branch}"))
        .await
    {
        Ok(oid) => oid,
        Err(err) => return Ok(MergeAnalysis::error(err.to_string())),
    };

    let patch_commits: Vec<String> = patch.commit.iter().cloned().collect();

    if let Some(commit) = &patch.commit {
        let history = provider
            .walk(dir, &target_oid, Some(UP_TO_DATE_WINDOW))
            .await
            .unwrap_or_default();
        if history.contains(commit) {
            return Ok(MergeAnalysis {
                can_merge: true,
                has_conflicts: false,
                conflict_files: Vec::new(),
                conflict_details: Vec::new(),
                up_to_date: true,
                fast_forward: false,
                patch_commits,
                analysis: Verdict::Clean,
                error_message: None,
            });
        }
    }

    let fast_forward = patch.parent_commit.as_deref() == Some(target_oid.as_str());

    // Mail-formatted contents are narrowed to their diff section;
    // bare-diff contents analyze as-is.
    let diff_text = match PatchFile::from_event(patch) {
        Some(file) => {
            tracing::debug!(subject = %file.subject, "Analyzing mail-formatted patch");
            file.diff().to_owned()
        }
        None => patch.content.clone(),
    };
    let files = match parse_patch(&diff_text) {
        Ok(files) => files,
        Err(err) => return Ok(MergeAnalysis::error(err.to_string())),
    };

    let mut conflict_files = Vec::new();
    let mut conflict_details = Vec::new();
    for file in &files {
        if let Some(detail) = file_conflict(provider, dir, &target_oid, file).await? {
            conflict_files.push(detail.path.clone());
            conflict_details.push(detail);
        }
    }

    let has_conflicts = !conflict_files.is_empty();
    Ok(MergeAnalysis {
        can_merge: !has_conflicts,
        has_conflicts,
        conflict_files,
        conflict_details,
        up_to_date: false,
        fast_forward: fast_forward && !has_conflicts,
        patch_commits,
        analysis: if has_conflicts {
            Verdict::Conflict
        } else if fast_forward {
            Verdict::FastForward
        } else {
            Verdict::Clean
        },
        error_message: None,
    })
}

/// Dry-runs one file of the patch against the target tree. `None` means
/// it applies.
async fn file_conflict<P: GitProvider>(
    provider: &P,
    dir: &Path,
    target_oid: &str,
    file: &FilePatch,
) -> GitMeshResult<Option<ConflictDetail>> {
    let target_content = blob_at(provider, dir, target_oid, &file.old_path).await?;

    match file.kind {
        ChangeType::Add => {
            // Adding a file that already exists with other content
            // conflicts; an identical file is a no-op.
            match target_content {
                None => Ok(None),
                Some(existing) => {
                    let added = apply_hunks("", &file.hunks).unwrap_or_default();
                    if existing == added {
                        Ok(None)
                    } else {
                        Ok(Some(ConflictDetail {
                            path:   file.path.clone(),
                            ours:   existing,
                            theirs: added,
                            base:   None,
                        }))
                    }
                }
            }
        }
        ChangeType::Remove => Ok(None),
        ChangeType::Modify => {
            let Some(current) = target_content else {
                return Ok(Some(ConflictDetail {
                    path:   file.path.clone(),
                    ours:   String::new(),
                    theirs: post_image_preview(file),
                    base:   None,
                }));
            };
            match apply_hunks(&current, &file.hunks) {
                Ok(_) => Ok(None),
                Err(_) => {
                    Ok(Some(ConflictDetail {
                        path:   file.path.clone(),
                        ours:   current,
                        theirs: post_image_preview(file),
                        base:   None,
                    }))
                }
            }
        }
    }
}

/// What the patch wants the file to contain around its hunks, used as the
/// `theirs` side of a conflict record.
fn post_image_preview(file: &FilePatch) -> String {
    file.hunks
        .iter()
        .flat_map(|h| {
            h.lines.iter().filter_map(|l| {
                match l {
                    super::apply::HunkLine::Context(s) | super::apply::HunkLine::Add(s) => {
                        Some(s.as_str())
                    }
                    super::apply::HunkLine::Remove(_) => None,
                }
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The blob content of `path` in the tree of `commit_oid`, when present.
async fn blob_at<P: GitProvider>(
    provider: &P,
    dir: &Path,
    commit_oid: &str,
    path: &str,
) -> GitMeshResult<Option<String>> {
    let commit = match provider.read_commit(dir, commit_oid).await {
        Ok(commit) => commit,
        Err(_) => return Ok(None),
    };
    let mut tree_oid = commit.tree;
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
    while let Some(component) = components.next() {
        let entries = match provider.read_tree(dir, &tree_oid).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };
        let Some(entry) = entries.into_iter().find(|e| e.name == component) else {
            return Ok(None);
        };
        if components.peek().is_none() {
            if entry.kind != TreeEntryKind::Blob {
                return Ok(None);
            }
            let bytes = provider.read_blob(dir, &entry.oid).await?;
            return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
        }
        if entry.kind != TreeEntryKind::Tree {
            return Ok(None);
        }
        tree_oid = entry.oid;
    }
    Ok(None)
}
