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

use std::{future::Future, path::Path};

use super::{DataLevel, EnsureOptions, Materializer};
use crate::{
    error::{GitMeshError, GitMeshResult},
    key::RepoKey,
    ports::{CommitInfo, EventIo, FetchOpts, Fs, GitProvider, TreeEntry, TreeEntryKind},
};

/// Depths tried, in order, when an object read misses. After the ladder a
/// tags fetch gets one more chance before giving up.
pub const DEPTH_LADDER: [u32; 4] = [10, 100, 500, 1000];

/// One entry of a repository listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    pub oid:  String,
    pub kind: TreeEntryKind,
}

impl<P, E, F> Materializer<P, E, F>
where
    P: GitProvider,
    E: EventIo,
    F: Fs,
{
    /// Runs an object read, deepening the local history step by step when
    /// it misses. Exhausting the ladder surfaces `OBJECT_UNREACHABLE`
    /// with the commit/branch/path context.
    pub async fn read_escalating<T, Op, Fut>(
        &self,
        dir: &Path,
        commit: &str,
        branch: &str,
        path: Option<&str>,
        op: Op,
    ) -> GitMeshResult<T>
    where
        Op: Fn() -> Fut,
        Fut: Future<Output = GitMeshResult<T>>,
    {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.code() == "NOT_FOUND" => {}
            Err(err) => return Err(err),
        }

        for depth in DEPTH_LADDER {
            tracing::debug!(commit = %commit, depth = depth, "Object missing, deepening");
            if let Err(err) = self
                .provider()
                .fetch(
                    dir,
                    &FetchOpts {
                        depth: Some(depth),
                        ..Default::default()
                    },
                )
                .await
            {
                tracing::debug!(depth = depth, error = %err, "Deepening fetch failed");
                continue;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.code() == "NOT_FOUND" => {}
                Err(err) => return Err(err),
            }
        }

        // The object may hang off a tag rather than branch history.
        if let Err(err) = self
            .provider()
            .fetch(
                dir,
                &FetchOpts {
                    tags: true,
                    ..Default::default()
                },
            )
            .await
        {
            tracing::debug!(error = %err, "Tags fetch failed");
        }
        op().await.map_err(|_| {
            GitMeshError::ObjectUnreachable {
                commit: commit.to_owned(),
                branch: branch.to_owned(),
                path:   path.map(ToOwned::to_owned),
            }
        })
    }

    /// [`GitProvider::read_commit`] with depth escalation.
    pub async fn read_commit_escalating(
        &self,
        dir: &Path,
        oid: &str,
        branch: &str,
    ) -> GitMeshResult<CommitInfo> {
        self.read_escalating(dir, oid, branch, None, || {
            self.provider().read_commit(dir, oid)
        })
        .await
    }

    /// [`GitProvider::read_blob`] with depth escalation.
    pub async fn read_blob_escalating(
        &self,
        dir: &Path,
        oid: &str,
        branch: &str,
        path: Option<&str>,
    ) -> GitMeshResult<Vec<u8>> {
        self.read_escalating(dir, oid, branch, path, || {
            self.provider().read_blob(dir, oid)
        })
        .await
    }

    /// Lists the tree at a branch head, recursively, with directories and
    /// files classified.
    pub async fn list_files(&self, key: &RepoKey, branch: &str) -> GitMeshResult<Vec<FileEntry>> {
        let repo = self.ensure_shallow(key, branch).await?;
        let head = repo.head_commit.clone().ok_or_else(|| {
            GitMeshError::not_found(format!("head commit of `{branch}`"))
        })?;
        let commit = self
            .read_commit_escalating(&repo.dir, &head, &repo.branch)
            .await?;

        let mut entries = Vec::new();
        self.walk_tree(&repo.dir, &commit.tree, &repo.branch, "", &mut entries)
            .await?;
        Ok(entries)
    }

    /// The content of one file at a branch head or explicit commit,
    /// deepening as needed to reach it.
    pub async fn file_content(
        &self,
        key: &RepoKey,
        branch: &str,
        commit: Option<&str>,
        path: &str,
    ) -> GitMeshResult<String> {
        let repo = self
            .ensure_repo(
                key,
                DataLevel::Shallow,
                &EnsureOptions {
                    branch: Some(branch.to_owned()),
                    ..Default::default()
                },
            )
            .await?;

        let commit_oid = match commit {
            Some(oid) => oid.to_owned(),
            None => {
                repo.head_commit.clone().ok_or_else(|| {
                    GitMeshError::not_found(format!("head commit of `{branch}`"))
                })?
            }
        };

        let commit = self
            .read_commit_escalating(&repo.dir, &commit_oid, &repo.branch)
            .await?;
        let blob_oid = self
            .resolve_path(&repo.dir, &commit.tree, &repo.branch, path)
            .await?
            .ok_or_else(|| {
                GitMeshError::ObjectUnreachable {
                    commit: commit_oid.clone(),
                    branch: repo.branch.clone(),
                    path:   Some(path.to_owned()),
                }
            })?;
        let bytes = self
            .read_blob_escalating(&repo.dir, &blob_oid, &repo.branch, Some(path))
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Resolves a slash-separated path inside a tree to a blob oid.
    async fn resolve_path(
        &self,
        dir: &Path,
        tree_oid: &str,
        branch: &str,
        path: &str,
    ) -> GitMeshResult<Option<String>> {
        let mut current = tree_oid.to_owned();
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let entries = self
                .read_escalating(dir, &current, branch, Some(path), || {
                    self.provider().read_tree(dir, &current)
                })
                .await?;
            let Some(entry) = entries.iter().find(|e| e.name == component) else {
                return Ok(None);
            };
            if components.peek().is_none() {
                return Ok((entry.kind == TreeEntryKind::Blob).then(|| entry.oid.clone()));
            }
            if entry.kind != TreeEntryKind::Tree {
                return Ok(None);
            }
            current = entry.oid.clone();
        }
        Ok(None)
    }

    async fn walk_tree(
        &self,
        dir: &Path,
        tree_oid: &str,
        branch: &str,
        prefix: &str,
        entries: &mut Vec<FileEntry>,
    ) -> GitMeshResult<()> {
        let tree: Vec<TreeEntry> = self
            .read_escalating(dir, tree_oid, branch, None, || {
                self.provider().read_tree(dir, tree_oid)
            })
            .await?;

        for entry in tree {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            entries.push(FileEntry {
                name: entry.name.clone(),
                path: path.clone(),
                oid:  entry.oid.clone(),
                kind: entry.kind,
            });
            if entry.kind == TreeEntryKind::Tree {
                Box::pin(self.walk_tree(dir, &entry.oid, branch, &path, entries)).await?;
            }
        }
        Ok(())
    }
}
