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

use crate::{
    error::{GitMeshError, GitMeshResult},
    ports::{FetchOpts, GitProvider, NetOpts},
};

/// Branches tried after the requested one, in order.
const FALLBACK_BRANCHES: [&str; 4] = ["main", "master", "develop", "dev"];

/// Resolves a branch to its commit id, walking an explicit strategy list:
/// the requested branch, the common defaults, the remote-tracking ref,
/// and finally a targeted fetch of the requested branch. Every attempt is
/// traced; all-failure surfaces `BRANCH_NOT_FOUND` with the tried list.
pub async fn resolve_branch<P: GitProvider>(
    provider: &P,
    dir: &Path,
    requested: &str,
    net: &NetOpts,
) -> GitMeshResult<(String, String)> {
    let mut tried = Vec::new();

    let mut candidates = vec![requested.to_owned()];
    candidates.extend(
        FALLBACK_BRANCHES
            .iter()
            .filter(|b| **b != requested)
            .map(|b| (*b).to_owned()),
    );

    for branch in &candidates {
        let name = format!("refs/heads/{branch}");
        match provider.resolve_ref(dir, &name).await {
            Ok(oid) => {
                tracing::trace!(branch = %branch, oid = %oid, "Branch resolved");
                return Ok((branch.clone(), oid));
            }
            Err(err) => {
                tracing::trace!(reference = %name, error = %err, "Branch attempt failed");
                tried.push(name);
            }
        }
    }

    let remote_ref = format!("refs/remotes/origin/{requested}");
    match provider.resolve_ref(dir, &remote_ref).await {
        Ok(oid) => return Ok((requested.to_owned(), oid)),
        Err(err) => {
            tracing::trace!(reference = %remote_ref, error = %err, "Remote-tracking attempt failed");
            tried.push(remote_ref);
        }
    }

    // Last resort: the branch may simply not be here yet.
    let fetch = FetchOpts {
        branch: Some(requested.to_owned()),
        net: net.clone(),
        ..Default::default()
    };
    if let Err(err) = provider.fetch(dir, &fetch).await {
        tracing::debug!(branch = %requested, error = %err, "Targeted branch fetch failed");
    } else if let Ok(oid) = provider
        .resolve_ref(dir, &format!("refs/heads/{requested}"))
        .await
    {
        return Ok((requested.to_owned(), oid));
    }
    tried.push(format!("fetch {requested}"));

    Err(GitMeshError::BranchNotFound {
        branch: requested.to_owned(),
        tried,
    })
}
