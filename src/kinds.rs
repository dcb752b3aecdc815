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

use nostr::event::Kind;

/// Pull-request proposal kind.
pub const PR_KIND: Kind = Kind::Custom(1618);
/// Pull-request update kind.
pub const PR_UPDATE_KIND: Kind = Kind::Custom(1619);
/// Repository state announcement kind.
pub const REPO_STATE_KIND: Kind = Kind::Custom(30618);
/// User GRASP server list kind.
pub const USER_GRASP_LIST_KIND: Kind = Kind::Custom(10317);
/// Patch/PR stack kind.
pub const STACK_KIND: Kind = Kind::Custom(34611);
/// Merge metadata kind (addressable).
pub const MERGE_METADATA_KIND: Kind = Kind::Custom(30507);
/// Conflict metadata kind (addressable).
pub const CONFLICT_METADATA_KIND: Kind = Kind::Custom(30508);
/// NIP-32 label kind.
pub const LABEL_KIND: Kind = Kind::Custom(1985);

/// The collaboration event kinds used by a deployment. Relays don't care
/// which integers carry which role, so deployments may remap them; the
/// defaults are the NIP-34 numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitKinds {
    pub announcement:   Kind,
    pub state:          Kind,
    pub patch:          Kind,
    pub issue:          Kind,
    pub status_open:    Kind,
    pub status_applied: Kind,
    pub status_closed:  Kind,
    pub status_draft:   Kind,
    pub pull_request:   Kind,
    pub pr_update:      Kind,
    pub grasp_list:     Kind,
    pub stack:          Kind,
    pub merge_meta:     Kind,
    pub conflict_meta:  Kind,
    pub label:          Kind,
    pub profile:        Kind,
}

impl Default for GitKinds {
    fn default() -> Self {
        Self {
            announcement:   Kind::GitRepoAnnouncement,
            state:          REPO_STATE_KIND,
            patch:          Kind::GitPatch,
            issue:          Kind::GitIssue,
            status_open:    Kind::GitStatusOpen,
            status_applied: Kind::GitStatusApplied,
            status_closed:  Kind::GitStatusClosed,
            status_draft:   Kind::GitStatusDraft,
            pull_request:   PR_KIND,
            pr_update:      PR_UPDATE_KIND,
            grasp_list:     USER_GRASP_LIST_KIND,
            stack:          STACK_KIND,
            merge_meta:     MERGE_METADATA_KIND,
            conflict_meta:  CONFLICT_METADATA_KIND,
            label:          LABEL_KIND,
            profile:        Kind::Metadata,
        }
    }
}

impl GitKinds {
    /// Whether the kind is one of the four status kinds.
    pub fn is_status(&self, kind: Kind) -> bool {
        kind == self.status_open
            || kind == self.status_applied
            || kind == self.status_closed
            || kind == self.status_draft
    }

    /// Whether the kind is kept by relays under `(author, kind, d)`,
    /// last write wins.
    pub fn is_addressable(&self, kind: Kind) -> bool {
        kind == self.announcement
            || kind == self.state
            || kind == self.stack
            || kind == self.merge_meta
            || kind == self.conflict_meta
    }

    /// All kinds that belong to a repository's collaboration thread feed.
    pub fn thread_kinds(&self) -> [Kind; 6] {
        [
            self.patch,
            self.issue,
            self.status_open,
            self.status_applied,
            self.status_closed,
            self.status_draft,
        ]
    }
}
